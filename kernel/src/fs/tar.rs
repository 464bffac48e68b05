//! ustar archive parser.
//!
//! Parses a ustar-format TAR archive from an in-memory byte buffer and
//! loads its regular files into a [`TarFs`]. The archive's directory
//! entries carry no information the flat path table needs, so they are
//! skipped; symlinks are resolved by copying the target file's bytes.

use alloc::{format, string::String, vec::Vec};

use super::TarFs;
use crate::error::KernelError;

/// TAR block size (every header and data region is a multiple of this).
const BLOCK_SIZE: usize = 512;

/// TAR header field offsets and sizes (ustar format).
mod field {
    /// File name (100 bytes, null-terminated ASCII).
    pub const NAME_OFF: usize = 0;
    pub const NAME_LEN: usize = 100;

    /// File size in octal ASCII (12 bytes).
    pub const SIZE_OFF: usize = 124;
    pub const SIZE_LEN: usize = 12;

    /// Type flag (1 byte): '0' or '\0' = regular file, '2' = symlink, '5' =
    /// directory.
    pub const TYPE_OFF: usize = 156;

    /// Link name for symlinks (100 bytes, null-terminated ASCII).
    pub const LINK_OFF: usize = 157;
    pub const LINK_LEN: usize = 100;

    /// Name prefix for paths > 100 chars (155 bytes, null-terminated).
    pub const PREFIX_OFF: usize = 345;
    pub const PREFIX_LEN: usize = 155;

    /// Magic field ("ustar\0" for POSIX TAR).
    pub const MAGIC_OFF: usize = 257;
    pub const MAGIC_LEN: usize = 6;
}

/// Parse a null-terminated ASCII string from a fixed-size TAR field.
fn parse_str(buf: &[u8]) -> &str {
    let end = buf.iter().position(|&b| b == 0).unwrap_or(buf.len());
    core::str::from_utf8(&buf[..end]).unwrap_or("")
}

/// Parse an octal ASCII number from a TAR field.
///
/// Handles both null/space-terminated octal strings and the GNU
/// base-256 extension (high bit set in the first byte).
fn parse_octal(buf: &[u8]) -> usize {
    if !buf.is_empty() && (buf[0] & 0x80) != 0 {
        let mut val: usize = 0;
        for &b in &buf[1..] {
            val = val.wrapping_shl(8) | (b as usize);
        }
        return val;
    }

    let s = parse_str(buf).trim();
    if s.is_empty() {
        return 0;
    }
    usize::from_str_radix(s, 8).unwrap_or(0)
}

/// Check whether a 512-byte block is all zeros (end-of-archive marker).
fn is_zero_block(block: &[u8]) -> bool {
    block.iter().all(|&b| b == 0)
}

/// Normalize a TAR entry name into an absolute path.
fn normalize(name: &str) -> String {
    let s = if name.starts_with('/') {
        String::from(name)
    } else {
        format!("/{}", name)
    };
    if s.len() > 1 && s.ends_with('/') {
        String::from(&s[..s.len() - 1])
    } else {
        s
    }
}

/// Load a ustar archive from a byte buffer into `fs`.
///
/// Returns the number of regular files (including resolved symlinks)
/// loaded.
pub fn load_tar(fs: &TarFs, data: &[u8]) -> Result<usize, KernelError> {
    if data.len() < BLOCK_SIZE {
        return Ok(0);
    }

    let mut offset: usize = 0;
    let mut count: usize = 0;
    // Symlinks whose target hadn't been seen yet; resolved in a second pass.
    let mut deferred_symlinks: Vec<(String, String)> = Vec::new();

    while offset + BLOCK_SIZE <= data.len() {
        let header = &data[offset..offset + BLOCK_SIZE];

        if is_zero_block(header) {
            if offset + 2 * BLOCK_SIZE <= data.len()
                && is_zero_block(&data[offset + BLOCK_SIZE..offset + 2 * BLOCK_SIZE])
            {
                break;
            }
            offset += BLOCK_SIZE;
            continue;
        }

        let magic = parse_str(&header[field::MAGIC_OFF..field::MAGIC_OFF + field::MAGIC_LEN]);
        if !magic.is_empty() && !magic.starts_with("ustar") {
            offset += BLOCK_SIZE;
            continue;
        }

        let prefix = parse_str(&header[field::PREFIX_OFF..field::PREFIX_OFF + field::PREFIX_LEN]);
        let name_raw = parse_str(&header[field::NAME_OFF..field::NAME_OFF + field::NAME_LEN]);
        let size = parse_octal(&header[field::SIZE_OFF..field::SIZE_OFF + field::SIZE_LEN]);
        let typeflag = header[field::TYPE_OFF];

        let full_name = if prefix.is_empty() {
            String::from(name_raw)
        } else {
            format!("{}/{}", prefix, name_raw)
        };
        let path = normalize(&full_name);

        offset += BLOCK_SIZE;
        let data_blocks = size.div_ceil(BLOCK_SIZE);

        match typeflag {
            b'0' | b'\0' => {
                let file_data = if size > 0 && offset + size <= data.len() {
                    data[offset..offset + size].to_vec()
                } else {
                    Vec::new()
                };
                fs.insert(path, file_data);
                count += 1;
                offset += data_blocks * BLOCK_SIZE;
            }
            b'2' => {
                let link_target_raw =
                    parse_str(&header[field::LINK_OFF..field::LINK_OFF + field::LINK_LEN]);
                let target = normalize(link_target_raw);

                if let Ok(node) = fs.open(&target) {
                    let size = node.metadata().map(|m| m.size).unwrap_or(0);
                    let mut buf = alloc::vec![0u8; size];
                    let n = node.read(0, &mut buf).unwrap_or(0);
                    buf.truncate(n);
                    fs.insert(path, buf);
                    count += 1;
                } else {
                    deferred_symlinks.push((path, target));
                }
                offset += data_blocks * BLOCK_SIZE;
            }
            _ => {
                // Directories carry no data the flat path table needs; hard
                // links and other exotic types are unsupported.
                offset += data_blocks * BLOCK_SIZE;
            }
        }
    }

    // Second pass: resolve symlinks whose target appeared later in the
    // archive than the symlink itself.
    for (path, target) in deferred_symlinks {
        if let Ok(node) = fs.open(&target) {
            let size = node.metadata().map(|m| m.size).unwrap_or(0);
            let mut buf = alloc::vec![0u8; size];
            let n = node.read(0, &mut buf).unwrap_or(0);
            buf.truncate(n);
            fs.insert(path, buf);
            count += 1;
        }
    }

    Ok(count)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_tar_header(name: &str, size: usize, typeflag: u8) -> [u8; 512] {
        let mut header = [0u8; 512];

        let name_bytes = name.as_bytes();
        let len = name_bytes.len().min(100);
        header[..len].copy_from_slice(&name_bytes[..len]);

        let size_str = format!("{:011o}\0", size);
        header[124..136].copy_from_slice(size_str.as_bytes());

        header[156] = typeflag;
        header[257..263].copy_from_slice(b"ustar\0");
        header[263..265].copy_from_slice(b"00");

        header
    }

    fn build_tar(entries: &[(&str, u8, &[u8])]) -> Vec<u8> {
        let mut archive = Vec::new();
        for &(name, typeflag, data) in entries {
            let header = make_tar_header(name, data.len(), typeflag);
            archive.extend_from_slice(&header);
            if !data.is_empty() {
                archive.extend_from_slice(data);
                let remainder = data.len() % 512;
                if remainder != 0 {
                    archive.extend(core::iter::repeat(0u8).take(512 - remainder));
                }
            }
        }
        archive.extend(core::iter::repeat(0u8).take(1024));
        archive
    }

    #[test]
    fn test_parse_octal_basic() {
        assert_eq!(parse_octal(b"0000755\0"), 0o755);
        assert_eq!(parse_octal(b"00000000013\0"), 11);
    }

    #[test]
    fn test_parse_octal_empty() {
        assert_eq!(parse_octal(b"\0\0\0\0"), 0);
        assert_eq!(parse_octal(b""), 0);
    }

    #[test]
    fn test_parse_str() {
        assert_eq!(parse_str(b"hello\0world"), "hello");
        assert_eq!(parse_str(b"hello"), "hello");
        assert_eq!(parse_str(b"\0"), "");
    }

    #[test]
    fn test_is_zero_block() {
        let zero = [0u8; 512];
        assert!(is_zero_block(&zero));
        let mut nonzero = [0u8; 512];
        nonzero[100] = 1;
        assert!(!is_zero_block(&nonzero));
    }

    #[test]
    fn test_normalize() {
        assert_eq!(normalize("bin/ls"), "/bin/ls");
        assert_eq!(normalize("/bin/ls/"), "/bin/ls");
        assert_eq!(normalize("/"), "/");
    }

    #[test]
    fn test_load_tar_regular_file() {
        let fs = TarFs::default();
        let archive = build_tar(&[("hello.txt", b'0', b"hi there")]);
        let loaded = load_tar(&fs, &archive).unwrap();
        assert_eq!(loaded, 1);

        let node = fs.open("/hello.txt").unwrap();
        let mut buf = [0u8; 8];
        let n = node.read(0, &mut buf).unwrap();
        assert_eq!(&buf[..n], b"hi there");
    }

    #[test]
    fn test_load_tar_skips_directories() {
        let fs = TarFs::default();
        let archive = build_tar(&[("usr/", b'5', b"")]);
        let loaded = load_tar(&fs, &archive).unwrap();
        assert_eq!(loaded, 0);
        assert!(!fs.exists("/usr"));
    }

    #[test]
    fn test_load_tar_resolves_symlink() {
        let fs = TarFs::default();
        let mut archive = Vec::new();
        let real_data: &[u8] = b"payload";
        archive.extend_from_slice(&make_tar_header("real.txt", real_data.len(), b'0'));
        archive.extend_from_slice(real_data);
        archive.extend(core::iter::repeat(0u8).take(512 - real_data.len()));

        let mut link_header = make_tar_header("link.txt", 0, b'2');
        link_header[157..165].copy_from_slice(b"real.txt");
        archive.extend_from_slice(&link_header);
        archive.extend(core::iter::repeat(0u8).take(1024));

        let loaded = load_tar(&fs, &archive).unwrap();
        assert_eq!(loaded, 2);

        let node = fs.open("/link.txt").unwrap();
        let mut buf = [0u8; 7];
        let n = node.read(0, &mut buf).unwrap();
        assert_eq!(&buf[..n], b"payload");
    }

    #[test]
    fn test_short_buffer_is_empty_archive() {
        let fs = TarFs::default();
        assert_eq!(load_tar(&fs, &[0u8; 10]).unwrap(), 0);
    }
}
