//! `brk`/`sbrk`, shared-memory pages, and the `drm` framebuffer syscall.
//!
//! `brk`/`sbrk` just wrap [`crate::process::memory`]; `allocshared`/
//! `popsharedmem` are this kernel's only form of inter-process memory
//! sharing -- one pending delivery per receiver, no channel or handle to
//! manage -- and `drm` hands a process the one boot-time linear
//! framebuffer, mapped once into its own address space.

use alloc::vec::Vec;

use crate::drivers::framebuffer;
use crate::error::{KernelError, KernelResult};
use crate::mm::page_table::PageMapper;
use crate::mm::{user_validation, PageFlags, FRAME_SIZE};
use crate::process::pcb::{Pid, SharedMemoryInbox};
use crate::process::table::PROCESS_TABLE;

const SHARED_FLAGS: PageFlags = PageFlags::WRITABLE.union(PageFlags::UNPRIVILEGED);

pub fn brk(caller: Pid, addr: u64) -> KernelResult<u64> {
    crate::process::memory::brk(caller, addr)
}

pub fn sbrk(caller: Pid, incr: i64) -> KernelResult<u64> {
    crate::process::memory::sbrk(caller, incr)
}

/// `allocshared(n_pages, target)`: reserve `n_pages` in the caller's own
/// address space, eagerly back them with real frames, and leave a
/// delivery for `target` to claim with [`popsharedmem`]. Returns the
/// caller's own virtual address for the region.
///
/// Self-sharing and pid 0 (no process ever has it) are both refused, and
/// so is targeting a receiver with an already-pending, unclaimed inbox --
/// there is exactly one delivery slot per receiver, not a queue.
pub fn allocshared(caller: Pid, n_pages: usize, target: Pid) -> KernelResult<u64> {
    if n_pages == 0 || target == 0 || target == caller {
        return Err(KernelError::BadParameter);
    }

    let mut table = PROCESS_TABLE.lock();
    if table.get(target).ok_or(KernelError::NotFound)?.inbox.is_some() {
        return Err(KernelError::BadParameter);
    }

    let va = {
        let pcb = table.get_mut(caller).ok_or(KernelError::NotFound)?;
        let ctx = pcb.memory.as_mut().ok_or(KernelError::BadParameter)?;
        let va = ctx.alloc_pages(n_pages, SHARED_FLAGS)?;
        for i in 0..n_pages {
            ctx.mapper.load_page(va + (i * FRAME_SIZE) as u64)?;
        }
        va
    };

    let receiver = table.get_mut(target).ok_or(KernelError::NotFound)?;
    receiver.inbox = Some(SharedMemoryInbox { source_pid: caller, base_va: va, page_count: n_pages });
    Ok(va)
}

/// `popsharedmem()`: claim the caller's pending shared-memory delivery, if
/// any, mapping the same physical frames the sender committed at the same
/// virtual address in the caller's own context. Returns 0 (never a valid
/// user address, since [`crate::mm::vmm`] reserves a guard gap below its
/// user-space base) if there is nothing to claim, or if the sender has
/// exited since.
pub fn popsharedmem(caller: Pid) -> KernelResult<u64> {
    let mut table = PROCESS_TABLE.lock();

    let inbox = match table.get_mut(caller).ok_or(KernelError::NotFound)?.inbox.take() {
        Some(inbox) => inbox,
        None => return Ok(0),
    };

    let Some(sender_mapper) = table
        .get(inbox.source_pid)
        .and_then(|pcb| pcb.memory.as_ref())
        .map(|ctx| ctx.mapper)
    else {
        return Ok(0);
    };

    let mut frames = Vec::with_capacity(inbox.page_count);
    for i in 0..inbox.page_count {
        let page_va = inbox.base_va + (i * FRAME_SIZE) as u64;
        let Some(frame) = sender_mapper.get_pte(page_va).and_then(|e| e.frame()) else {
            return Ok(0);
        };
        frames.push(frame);
    }

    let receiver = table.get_mut(caller).ok_or(KernelError::NotFound)?;
    let ctx = receiver.memory.as_mut().ok_or(KernelError::BadParameter)?;
    ctx.vas.take(inbox.base_va, inbox.page_count)?;
    for (i, frame) in frames.iter().enumerate() {
        let page_va = inbox.base_va + (i * FRAME_SIZE) as u64;
        ctx.mapper.map_page(page_va, Some(frame.as_addr()), SHARED_FLAGS)?;
    }

    Ok(inbox.base_va)
}

/// Fixed VA every process's `drm` call maps the boot framebuffer to. The
/// surface's "one mapping per process" rule is enforced by checking
/// whether this address is already mapped in the caller, rather than
/// tracking a separate flag.
const FRAMEBUFFER_VA: u64 = 0x0000_7f00_0000_0000;

/// `drm(*addr, *width, *height, *bpp)`: map the boot-time linear
/// framebuffer into the caller's address space (idempotent: a second call
/// from the same process reuses the same mapping) and report its
/// geometry through the four output pointers. Fails if the bootloader
/// never handed the kernel a framebuffer.
pub fn drm(caller: Pid, fb_ptr: u64, w_ptr: u64, h_ptr: u64, bpp_ptr: u64) -> KernelResult<u64> {
    let info = framebuffer::info().ok_or(KernelError::NotFound)?;

    let mapper = {
        let mut table = PROCESS_TABLE.lock();
        let pcb = table.get_mut(caller).ok_or(KernelError::NotFound)?;
        let ctx = pcb.memory.as_mut().ok_or(KernelError::BadParameter)?;

        if ctx.mapper.get_pte(FRAMEBUFFER_VA).is_none() {
            let n_pages = info.size_bytes().div_ceil(FRAME_SIZE);
            for i in 0..n_pages {
                let page_va = FRAMEBUFFER_VA + (i * FRAME_SIZE) as u64;
                let page_phys = info.phys_addr + (i * FRAME_SIZE) as u64;
                ctx.mapper.map_page(page_va, Some(page_phys), SHARED_FLAGS)?;
            }
        }
        ctx.mapper
    };

    write_out(&mapper, fb_ptr, FRAMEBUFFER_VA)?;
    write_out(&mapper, w_ptr, info.width as u64)?;
    write_out(&mapper, h_ptr, info.height as u64)?;
    write_out(&mapper, bpp_ptr, info.bpp as u64)?;

    Ok(info.size_bytes() as u64)
}

fn write_out(mapper: &PageMapper, ptr: u64, value: u64) -> KernelResult<()> {
    let dst = user_validation::translate(mapper, ptr, core::mem::size_of::<u64>(), true)?;
    // SAFETY: `translate` verified `dst` is present, writable, and
    // unprivileged in the caller's own address space.
    unsafe { core::ptr::write_unaligned(dst as *mut u64, value) };
    Ok(())
}
