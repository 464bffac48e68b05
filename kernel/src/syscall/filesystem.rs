//! `open`/`close`/`read`/`write`/`seek` (C9): the syscall-ABI glue over
//! [`crate::fs`]'s tar-backed file system and each process's own
//! [`crate::fs::FileTable`].
//!
//! `fd` 0/1/2 are reserved slots in every [`crate::fs::FileTable`] that
//! `open` never fills, so a `read`/`write`/`seek` against stdin fails the
//! same way as any other never-opened descriptor; `write`'s fd 1/2 are the
//! one exception, special-cased below to the kernel's own console sink.

use alloc::string::String;
use alloc::sync::Arc;

use crate::error::{KernelError, KernelResult};
use crate::fs::{self, File, FileDescriptor, OpenFlags, SeekFrom, PATH_MAX};
use crate::mm::user_validation;
use crate::process::pcb::Pid;
use crate::process::table::PROCESS_TABLE;

fn read_user_path(caller: Pid, path_ptr: u64) -> KernelResult<String> {
    let mapper = {
        let table = PROCESS_TABLE.lock();
        let pcb = table.get(caller).ok_or(KernelError::NotFound)?;
        pcb.memory.as_ref().ok_or(KernelError::BadParameter)?.mapper
    };
    let src = user_validation::translate(&mapper, path_ptr, PATH_MAX, false)?;
    // SAFETY: `translate` verified `src..src+PATH_MAX` is present,
    // unprivileged memory in the caller's own address space.
    let bytes = unsafe { core::slice::from_raw_parts(src, PATH_MAX) };
    let len = bytes.iter().position(|&b| b == 0).ok_or(KernelError::BadParameter)?;
    core::str::from_utf8(&bytes[..len]).map(String::from).map_err(|_| KernelError::BadParameter)
}

/// `open(path, flags)`. Creates the node first when `O_CREAT` is set and
/// nothing exists at `path` yet; otherwise opens what's already there.
pub fn open(caller: Pid, path_ptr: u64, flags_raw: u64, _mode: u64) -> KernelResult<u64> {
    let path = read_user_path(caller, path_ptr)?;
    let flags = OpenFlags::from_bits(flags_raw as u32).ok_or(KernelError::BadParameter)?;

    let node = {
        let fs = fs::get_fs().read();
        if flags.create && !fs.exists(&path) {
            fs.create(&path)?
        } else {
            fs.open(&path)?
        }
    };

    let file = Arc::new(File::new(node, flags));
    let table = PROCESS_TABLE.lock();
    let pcb = table.get(caller).ok_or(KernelError::NotFound)?;
    pcb.files.open_with_flags(file, false).map(|fd| fd as u64)
}

pub fn close(caller: Pid, fd: u64) -> KernelResult<u64> {
    let table = PROCESS_TABLE.lock();
    let pcb = table.get(caller).ok_or(KernelError::NotFound)?;
    pcb.files.close(fd as FileDescriptor)?;
    Ok(0)
}

pub fn read(caller: Pid, fd: u64, buf_ptr: u64, len: u64) -> KernelResult<u64> {
    let (file, mapper) = {
        let table = PROCESS_TABLE.lock();
        let pcb = table.get(caller).ok_or(KernelError::NotFound)?;
        let file = pcb.files.get(fd as FileDescriptor).ok_or(KernelError::BadChannel)?;
        let mapper = pcb.memory.as_ref().ok_or(KernelError::BadParameter)?.mapper;
        (file, mapper)
    };
    let dst = user_validation::translate(&mapper, buf_ptr, len as usize, true)?;
    // SAFETY: `translate` verified `dst..dst+len` is present, writable,
    // unprivileged memory in the caller's own address space.
    let slice = unsafe { core::slice::from_raw_parts_mut(dst, len as usize) };
    file.read(slice).map(|n| n as u64)
}

/// `write(fd, buf, len)`. `fd == 0` is a no-op (nothing reads stdin
/// writes); `fd == 1`/`2` go straight to the VGA console rather than
/// through a file capability, since there is no stdout/stderr node to
/// open one against.
pub fn write(caller: Pid, fd: u64, buf_ptr: u64, len: u64) -> KernelResult<u64> {
    if fd == 0 {
        return Ok(0);
    }

    let mapper = {
        let table = PROCESS_TABLE.lock();
        let pcb = table.get(caller).ok_or(KernelError::NotFound)?;
        pcb.memory.as_ref().ok_or(KernelError::BadParameter)?.mapper
    };
    let src = user_validation::translate(&mapper, buf_ptr, len as usize, false)?;
    // SAFETY: see above.
    let slice = unsafe { core::slice::from_raw_parts(src, len as usize) };

    if fd == 1 || fd == 2 {
        crate::arch::x86_64::vga::write_bytes(slice);
        return Ok(len);
    }

    let table = PROCESS_TABLE.lock();
    let pcb = table.get(caller).ok_or(KernelError::NotFound)?;
    let file = pcb.files.get(fd as FileDescriptor).ok_or(KernelError::BadChannel)?;
    drop(table);
    file.write(slice).map(|n| n as u64)
}

pub fn seek(caller: Pid, fd: u64, offset: u64, whence: u64) -> KernelResult<u64> {
    let table = PROCESS_TABLE.lock();
    let pcb = table.get(caller).ok_or(KernelError::NotFound)?;
    let file = pcb.files.get(fd as FileDescriptor).ok_or(KernelError::BadChannel)?;
    drop(table);

    let signed = offset as i64;
    let from = match whence {
        0 => SeekFrom::Start(offset as usize),
        1 => SeekFrom::Current(signed as isize),
        2 => SeekFrom::End(signed as isize),
        _ => return Err(KernelError::BadParameter),
    };
    file.seek(from).map(|n| n as u64)
}
