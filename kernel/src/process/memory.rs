//! `brk`/`sbrk` (C9): grow or shrink a process's heap.
//!
//! The loader records where the heap begins (`loader.heap_start`, just past
//! the last loaded segment); everything from there to `loader.heap_end` is
//! backed, eagerly, by [`MemoryContext::alloc_pages_at`].

use super::pcb::Pid;
use super::table::PROCESS_TABLE;
use crate::error::{KernelError, KernelResult};
use crate::mm::{PageFlags, FRAME_SIZE};

const HEAP_FLAGS: PageFlags = PageFlags::WRITABLE.union(PageFlags::UNPRIVILEGED);

/// `brk(addr)`: set the break to `addr`. Returns the break *before* the
/// call on success. Fails if `addr` is below `heap_start`.
pub fn brk(caller: Pid, addr: u64) -> KernelResult<u64> {
    let mut table = PROCESS_TABLE.lock();
    let pcb = table.get_mut(caller).ok_or(KernelError::NotFound)?;
    if addr < pcb.loader.heap_start {
        return Err(KernelError::BadParameter);
    }
    let old_end = pcb.loader.heap_end;
    let heap_start = pcb.loader.heap_start;
    let ctx = pcb.memory.as_mut().ok_or(KernelError::BadParameter)?;

    resize_heap(ctx, heap_start, old_end, addr)?;
    table.get_mut(caller).expect("checked above").loader.heap_end = addr;
    Ok(old_end)
}

/// `sbrk(incr)`: grow (`incr > 0`) or shrink (`incr < 0`) the heap by
/// `incr` bytes. Returns the break before the call.
pub fn sbrk(caller: Pid, incr: i64) -> KernelResult<u64> {
    let old_end = {
        let table = PROCESS_TABLE.lock();
        table.get(caller).ok_or(KernelError::NotFound)?.loader.heap_end
    };
    let new_end = if incr >= 0 {
        old_end.checked_add(incr as u64).ok_or(KernelError::BadParameter)?
    } else {
        old_end.checked_sub((-incr) as u64).ok_or(KernelError::BadParameter)?
    };
    brk(caller, new_end)
}

/// Map or unmap whatever whole pages lie between `old_end` and `new_end`,
/// both measured from `heap_start`. Only ever touches the delta, not the
/// whole heap.
fn resize_heap(
    ctx: &mut crate::mm::MemoryContext,
    heap_start: u64,
    old_end: u64,
    new_end: u64,
) -> KernelResult<()> {
    let page_end = |addr: u64| heap_start + (addr - heap_start).div_ceil(FRAME_SIZE as u64) * FRAME_SIZE as u64;
    let old_page_end = page_end(old_end);
    let new_page_end = page_end(new_end);

    if new_page_end > old_page_end {
        let n_pages = ((new_page_end - old_page_end) / FRAME_SIZE as u64) as usize;
        ctx.alloc_pages_at(old_page_end, n_pages, HEAP_FLAGS)?;
    } else if new_page_end < old_page_end {
        ctx.free_pages(new_page_end)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn brk_below_heap_start_fails() {
        let mut table = PROCESS_TABLE.lock();
        let pid = table.alloc(0, crate::process::pcb::Priority::Standard).unwrap();
        table.get_mut(pid).unwrap().loader.heap_start = 0x5000;
        table.get_mut(pid).unwrap().loader.heap_end = 0x5000;
        drop(table);
        assert_eq!(brk(pid, 0x1000), Err(KernelError::BadParameter));
    }

    #[test]
    fn brk_without_memory_context_fails() {
        let mut table = PROCESS_TABLE.lock();
        let pid = table.alloc(0, crate::process::pcb::Priority::Standard).unwrap();
        table.get_mut(pid).unwrap().loader.heap_start = 0x1000;
        table.get_mut(pid).unwrap().loader.heap_end = 0x1000;
        drop(table);
        assert_eq!(brk(pid, 0x2000), Err(KernelError::BadParameter));
    }
}
