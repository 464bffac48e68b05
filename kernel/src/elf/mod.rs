//! ELF64 program image parser (C10).
//!
//! Parses just enough of the ELF64 format to load a statically linked,
//! non-PIE x86_64 executable: the file header and its `PT_LOAD` program
//! headers. Dynamic linking, relocations, and other machine types are not
//! supported — the process loader only ever runs binaries built for this
//! kernel's own sysroot.

use alloc::vec::Vec;

const ELF_MAGIC: [u8; 4] = [0x7f, b'E', b'L', b'F'];
const ELFCLASS64: u8 = 2;
const ELFDATA2LSB: u8 = 1;
const ET_EXEC: u16 = 2;
const EM_X86_64: u16 = 62;
const PT_LOAD: u32 = 1;

/// Segment is readable.
pub const PF_R: u32 = 4;
/// Segment is writable.
pub const PF_W: u32 = 2;
/// Segment is executable.
pub const PF_X: u32 = 1;

#[repr(C)]
#[derive(Debug, Clone, Copy)]
struct Elf64Header {
    magic: [u8; 4],
    class: u8,
    data: u8,
    version: u8,
    os_abi: u8,
    abi_version: u8,
    padding: [u8; 7],
    elf_type: u16,
    machine: u16,
    version2: u32,
    entry: u64,
    phoff: u64,
    shoff: u64,
    flags: u32,
    ehsize: u16,
    phentsize: u16,
    phnum: u16,
    shentsize: u16,
    shnum: u16,
    shstrndx: u16,
}

#[repr(C)]
#[derive(Debug, Clone, Copy)]
struct Elf64ProgramHeader {
    p_type: u32,
    p_flags: u32,
    p_offset: u64,
    p_vaddr: u64,
    p_paddr: u64,
    p_filesz: u64,
    p_memsz: u64,
    p_align: u64,
}

/// One `PT_LOAD` segment: where its bytes live in the file and where they
/// belong in the process's address space.
#[derive(Debug, Clone)]
pub struct LoadSegment {
    pub vaddr: u64,
    pub file_offset: usize,
    pub file_size: usize,
    pub mem_size: u64,
    pub flags: u32,
}

/// A fully parsed program image, ready for the loader to map.
#[derive(Debug, Clone)]
pub struct LoadedImage {
    pub entry: u64,
    pub segments: Vec<LoadSegment>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElfError {
    TooShort,
    BadMagic,
    Not64Bit,
    NotLittleEndian,
    NotExecutable,
    UnsupportedMachine,
    BadProgramHeader,
}

/// Parse `data` as a statically linked x86_64 ELF64 executable.
pub fn parse(data: &[u8]) -> Result<LoadedImage, ElfError> {
    if data.len() < core::mem::size_of::<Elf64Header>() {
        return Err(ElfError::TooShort);
    }

    // SAFETY: `data` is at least `size_of::<Elf64Header>()` bytes and the
    // header has no alignment requirement stricter than a byte.
    let header = unsafe { &*(data.as_ptr() as *const Elf64Header) };

    if header.magic != ELF_MAGIC {
        return Err(ElfError::BadMagic);
    }
    if header.class != ELFCLASS64 {
        return Err(ElfError::Not64Bit);
    }
    if header.data != ELFDATA2LSB {
        return Err(ElfError::NotLittleEndian);
    }
    if header.elf_type != ET_EXEC {
        return Err(ElfError::NotExecutable);
    }
    if header.machine != EM_X86_64 {
        return Err(ElfError::UnsupportedMachine);
    }

    let ph_entry_size = core::mem::size_of::<Elf64ProgramHeader>();
    let ph_table_size = header.phnum as usize * ph_entry_size;
    let ph_start = header.phoff as usize;
    let ph_end = ph_start
        .checked_add(ph_table_size)
        .ok_or(ElfError::BadProgramHeader)?;
    if ph_end > data.len() {
        return Err(ElfError::BadProgramHeader);
    }

    let mut segments = Vec::new();
    for i in 0..header.phnum as usize {
        let off = ph_start + i * ph_entry_size;
        // SAFETY: `off + ph_entry_size <= ph_end <= data.len()`, checked
        // above; no alignment requirement stricter than a byte.
        let ph = unsafe { &*(data[off..].as_ptr() as *const Elf64ProgramHeader) };
        if ph.p_type != PT_LOAD {
            continue;
        }

        let file_offset = ph.p_offset as usize;
        let file_size = ph.p_filesz as usize;
        let file_end = file_offset
            .checked_add(file_size)
            .ok_or(ElfError::BadProgramHeader)?;
        if file_end > data.len() || ph.p_memsz < ph.p_filesz {
            return Err(ElfError::BadProgramHeader);
        }

        segments.push(LoadSegment {
            vaddr: ph.p_vaddr,
            file_offset,
            file_size,
            mem_size: ph.p_memsz,
            flags: ph.p_flags,
        });
    }

    Ok(LoadedImage {
        entry: header.entry,
        segments,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn build_image(entry: u64, segment: &[u8], vaddr: u64) -> Vec<u8> {
        let header_size = core::mem::size_of::<Elf64Header>();
        let phdr_size = core::mem::size_of::<Elf64ProgramHeader>();
        let phoff = header_size as u64;
        let data_off = phoff + phdr_size as u64;

        let header = Elf64Header {
            magic: ELF_MAGIC,
            class: ELFCLASS64,
            data: ELFDATA2LSB,
            version: 1,
            os_abi: 0,
            abi_version: 0,
            padding: [0; 7],
            elf_type: ET_EXEC,
            machine: EM_X86_64,
            version2: 1,
            entry,
            phoff,
            shoff: 0,
            flags: 0,
            ehsize: header_size as u16,
            phentsize: phdr_size as u16,
            phnum: 1,
            shentsize: 0,
            shnum: 0,
            shstrndx: 0,
        };
        let phdr = Elf64ProgramHeader {
            p_type: PT_LOAD,
            p_flags: PF_R | PF_X,
            p_offset: data_off,
            p_vaddr: vaddr,
            p_paddr: vaddr,
            p_filesz: segment.len() as u64,
            p_memsz: segment.len() as u64,
            p_align: 0x1000,
        };

        let mut out = Vec::new();
        // SAFETY: both types are `#[repr(C)]` plain-old-data with no
        // padding-sensitive invariants; reading their bytes back is exact.
        unsafe {
            out.extend_from_slice(core::slice::from_raw_parts(
                &header as *const _ as *const u8,
                header_size,
            ));
            out.extend_from_slice(core::slice::from_raw_parts(
                &phdr as *const _ as *const u8,
                phdr_size,
            ));
        }
        out.extend_from_slice(segment);
        out
    }

    #[test]
    fn parses_entry_and_one_load_segment() {
        let image = build_image(0x40_1000, &[0x90, 0x90, 0xc3], 0x40_0000);
        let parsed = parse(&image).unwrap();
        assert_eq!(parsed.entry, 0x40_1000);
        assert_eq!(parsed.segments.len(), 1);
        assert_eq!(parsed.segments[0].vaddr, 0x40_0000);
        assert_eq!(parsed.segments[0].file_size, 3);
    }

    #[test]
    fn rejects_bad_magic() {
        let mut image = build_image(0x1000, &[0x90], 0x1000);
        image[0] = 0;
        assert_eq!(parse(&image), Err(ElfError::BadMagic));
    }

    #[test]
    fn rejects_truncated_header() {
        assert_eq!(parse(&[0u8; 4]), Err(ElfError::TooShort));
    }
}
