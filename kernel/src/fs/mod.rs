//! Tar-backed file system.
//!
//! This is not a general VFS: at boot a single ustar archive is parsed (see
//! `tar`) and its regular files are loaded into a flat path -> bytes table.
//! This module is the concrete `file`/`file_system` capability the program
//! loader and the `open`/`close`/`read`/`write`/`seek` syscalls are built
//! on.

use alloc::{boxed::Box, collections::BTreeMap, string::String, sync::Arc, vec, vec::Vec};

use spin::{Mutex, RwLock};

pub mod file;
pub mod tar;

pub use file::{File, FileDescriptor, FileTable, OpenFlags, SeekFrom};

use crate::error::KernelError;

/// Maximum path length accepted by `open`.
pub const PATH_MAX: usize = 4096;

/// Metadata for a single file, as exposed through [`VfsNode::metadata`].
#[derive(Debug, Clone, Copy)]
pub struct Metadata {
    pub size: usize,
}

/// A single open-able file as stored by the tar-backed provider.
pub trait VfsNode: Send + Sync {
    fn read(&self, offset: usize, buffer: &mut [u8]) -> Result<usize, KernelError>;
    fn write(&self, offset: usize, data: &[u8]) -> Result<usize, KernelError>;
    fn metadata(&self) -> Result<Metadata, KernelError>;
    fn truncate(&self, size: usize) -> Result<(), KernelError>;
}

/// An in-memory file backed by a growable byte buffer.
struct TarFile {
    data: Mutex<Vec<u8>>,
}

impl TarFile {
    fn new(data: Vec<u8>) -> Self {
        Self {
            data: Mutex::new(data),
        }
    }
}

impl VfsNode for TarFile {
    fn read(&self, offset: usize, buffer: &mut [u8]) -> Result<usize, KernelError> {
        let data = self.data.lock();
        if offset >= data.len() {
            return Ok(0);
        }
        let n = core::cmp::min(buffer.len(), data.len() - offset);
        buffer[..n].copy_from_slice(&data[offset..offset + n]);
        Ok(n)
    }

    fn write(&self, offset: usize, input: &[u8]) -> Result<usize, KernelError> {
        let mut data = self.data.lock();
        let end = offset
            .checked_add(input.len())
            .ok_or(KernelError::BadParameter)?;
        if data.len() < end {
            data.resize(end, 0);
        }
        data[offset..end].copy_from_slice(input);
        Ok(input.len())
    }

    fn metadata(&self) -> Result<Metadata, KernelError> {
        Ok(Metadata {
            size: self.data.lock().len(),
        })
    }

    fn truncate(&self, size: usize) -> Result<(), KernelError> {
        self.data.lock().resize(size, 0);
        Ok(())
    }
}

/// The tar-backed file system: a flat map from absolute path to file node.
pub struct TarFs {
    files: RwLock<BTreeMap<String, Arc<TarFile>>>,
}

impl TarFs {
    fn new() -> Self {
        Self {
            files: RwLock::new(BTreeMap::new()),
        }
    }

    /// Insert (or overwrite) a file's contents. Used by the tar loader.
    fn insert(&self, path: String, data: Vec<u8>) {
        self.files.write().insert(path, Arc::new(TarFile::new(data)));
    }

    /// Resolve an absolute path to its backing node.
    pub fn open(&self, path: &str) -> Result<Arc<dyn VfsNode>, KernelError> {
        self.files
            .read()
            .get(path)
            .cloned()
            .map(|f| f as Arc<dyn VfsNode>)
            .ok_or(KernelError::NotFound)
    }

    /// Create an empty file at `path`, or return the existing one.
    pub fn create(&self, path: &str) -> Result<Arc<dyn VfsNode>, KernelError> {
        if let Ok(node) = self.open(path) {
            return Ok(node);
        }
        let node = Arc::new(TarFile::new(Vec::new()));
        self.files.write().insert(String::from(path), node.clone());
        Ok(node)
    }

    pub fn exists(&self, path: &str) -> bool {
        self.files.read().contains_key(path)
    }

    pub fn remove(&self, path: &str) -> Result<(), KernelError> {
        self.files
            .write()
            .remove(path)
            .map(|_| ())
            .ok_or(KernelError::NotFound)
    }
}

impl Default for TarFs {
    fn default() -> Self {
        Self::new()
    }
}

static mut FS_PTR: *const RwLock<TarFs> = core::ptr::null();

/// Get the global tar file system. Panics if [`init`] has not run.
pub fn get_fs() -> &'static RwLock<TarFs> {
    unsafe {
        let ptr = core::ptr::read_volatile(&raw const FS_PTR);
        if ptr.is_null() {
            panic!("file system not initialized");
        }
        &*ptr
    }
}

/// Try to get the global tar file system without panicking.
pub fn try_get_fs() -> Option<&'static RwLock<TarFs>> {
    unsafe {
        let ptr = core::ptr::read_volatile(&raw const FS_PTR);
        if ptr.is_null() {
            None
        } else {
            Some(&*ptr)
        }
    }
}

/// Parse `archive` as a ustar archive and install it as the global file
/// system. Safe to call with an empty slice (no boot archive present).
pub fn init(archive: &[u8]) {
    let fs = TarFs::new();
    let loaded = tar::load_tar(&fs, archive).unwrap_or(0);
    crate::println!("[FS] loaded {} entries from boot archive", loaded);

    let boxed = Box::new(RwLock::new(fs));
    let ptr = Box::leak(boxed) as *const RwLock<TarFs>;
    unsafe {
        core::ptr::write_volatile(&raw mut FS_PTR, ptr);
    }
}

/// Read an entire file's contents.
pub fn read_file(path: &str) -> Result<Vec<u8>, KernelError> {
    let fs = get_fs().read();
    let node = fs.open(path)?;
    let size = node.metadata()?.size;
    let mut buf = vec![0u8; size];
    let n = node.read(0, &mut buf)?;
    buf.truncate(n);
    Ok(buf)
}

/// Overwrite (or create) a file with `data`.
pub fn write_file(path: &str, data: &[u8]) -> Result<usize, KernelError> {
    let fs = get_fs().read();
    let node = fs.create(path)?;
    node.truncate(0)?;
    node.write(0, data)
}

pub fn file_exists(path: &str) -> bool {
    match try_get_fs() {
        Some(fs) => fs.read().exists(path),
        None => false,
    }
}

pub fn file_size(path: &str) -> Result<usize, KernelError> {
    let fs = get_fs().read();
    let node = fs.open(path)?;
    Ok(node.metadata()?.size)
}
