//! Program loader (C10): turns an ELF image into a freshly scheduled
//! process.
//!
//! Binaries run under this kernel link against its own sysroot, so their
//! segment addresses already fall inside [`USER_SPACE_BASE`]..
//! [`USER_SPACE_END`](crate::mm::vmm) — there is no separate base-relocation
//! step.

use alloc::vec::Vec;

use super::pcb::{Pid, Priority, ProcessState};
use super::table::PROCESS_TABLE;
use crate::arch::context::Registers;
use crate::elf::{self, ElfError, LoadSegment, PF_W};
use crate::error::{KernelError, KernelResult};
use crate::mm::frame_allocator::FRAME_ALLOCATOR;
use crate::mm::{phys_to_virt, MemoryContext, PageFlags, FRAME_SIZE};

/// Upper bound on `PT_LOAD` segments a single image may have; a handful of
/// segments (text, rodata, data+bss) covers every realistic statically
/// linked binary this kernel's sysroot produces.
const MAX_LOAD_SEGMENTS: usize = 16;

/// Fixed top-of-stack VA for every process: high enough in the user half
/// to never collide with a sysroot binary's own link address.
const USER_STACK_TOP: u64 = 0x0000_7fff_fffe_0000;
/// 64 KiB user stack.
const USER_STACK_PAGES: usize = 16;

impl From<ElfError> for KernelError {
    fn from(_: ElfError) -> Self {
        KernelError::BadParameter
    }
}

/// Map and populate one `PT_LOAD` segment: eagerly backed (not lazy), file
/// bytes copied in, the `memsz - filesz` tail zeroed.
fn load_segment(ctx: &mut MemoryContext, seg: &LoadSegment, image: &[u8]) -> KernelResult<()> {
    let page_base = seg.vaddr & !(FRAME_SIZE as u64 - 1);
    let page_delta = (seg.vaddr - page_base) as usize;
    let total = page_delta + seg.mem_size as usize;
    let n_pages = total.div_ceil(FRAME_SIZE);

    let flags = PageFlags::UNPRIVILEGED
        | if seg.flags & PF_W != 0 { PageFlags::WRITABLE } else { PageFlags::empty() };

    ctx.vas.take(page_base, n_pages)?;

    let file_bytes = &image[seg.file_offset..seg.file_offset + seg.file_size];
    let mut copied = 0usize;
    for i in 0..n_pages {
        let page_va = page_base + (i * FRAME_SIZE) as u64;
        let frame = FRAME_ALLOCATOR.lock().alloc_one().ok_or(KernelError::OutOfMemory)?;
        let dst = phys_to_virt(frame.as_addr()) as *mut u8;
        // SAFETY: `frame` was just allocated and is exclusively owned here;
        // `dst` is a whole `FRAME_SIZE`-byte kernel-virtual alias of it.
        unsafe { core::ptr::write_bytes(dst, 0, FRAME_SIZE) };

        let page_start_in_file = if i == 0 { page_delta } else { 0 };
        let page_end_in_file = FRAME_SIZE.min(total.saturating_sub(i * FRAME_SIZE));
        if page_end_in_file > page_start_in_file {
            let want = page_end_in_file - page_start_in_file;
            let remaining = file_bytes.len().saturating_sub(copied);
            let take = want.min(remaining);
            if take > 0 {
                // SAFETY: `dst + page_start_in_file` is within the
                // zeroed frame just allocated, with at least `take` bytes
                // of room (`page_start_in_file + take <= FRAME_SIZE`).
                unsafe {
                    core::ptr::copy_nonoverlapping(
                        file_bytes[copied..copied + take].as_ptr(),
                        dst.add(page_start_in_file),
                        take,
                    );
                }
                copied += take;
            }
        }

        ctx.mapper.map_page(page_va, Some(frame.as_addr()), flags)?;
    }

    Ok(())
}

/// Write `argc`/`argv` and a synthesized return frame onto a fresh user
/// stack, per C10. Returns the stack pointer the PCB's saved registers
/// should resume at (pointing at the `argc` slot).
fn setup_stack(ctx: &mut MemoryContext, argv: &[&str]) -> KernelResult<u64> {
    let stack_base = USER_STACK_TOP - (USER_STACK_PAGES * FRAME_SIZE) as u64;
    ctx.alloc_pages_at(
        stack_base,
        USER_STACK_PAGES,
        PageFlags::WRITABLE | PageFlags::UNPRIVILEGED,
    )?;
    // Force the whole stack to be eagerly backed: `alloc_pages_at` reserves
    // it lazily, but argv writes below go straight through the physical
    // alias rather than the page-fault path.
    for i in 0..USER_STACK_PAGES {
        ctx.mapper.load_page(stack_base + (i * FRAME_SIZE) as u64)?;
    }

    // SAFETY helper: write through the kernel alias of whatever frame
    // backs `va` in `ctx`. Every `va` touched below lies within the stack
    // range just eagerly mapped above.
    let write_bytes = |va: u64, bytes: &[u8]| -> KernelResult<()> {
        let pte = ctx.mapper.get_pte(va).ok_or(KernelError::NoPageTableEntry)?;
        let frame = pte.frame().ok_or(KernelError::NoPageTableEntry)?;
        let page_off = (va % FRAME_SIZE as u64) as usize;
        let dst = (phys_to_virt(frame.as_addr()) as *mut u8).wrapping_add(page_off);
        // SAFETY: `va` is mapped and backed (checked above); `bytes.len()`
        // never crosses a page boundary for any call site below.
        unsafe { core::ptr::copy_nonoverlapping(bytes.as_ptr(), dst, bytes.len()) };
        Ok(())
    };
    let write_u64 = |va: u64, value: u64| write_bytes(va, &value.to_ne_bytes());

    let mut sp = USER_STACK_TOP;

    // String bodies, highest addresses first.
    let mut argv_ptrs: Vec<u64> = Vec::with_capacity(argv.len());
    for &arg in argv.iter().rev() {
        let bytes = arg.as_bytes();
        sp -= (bytes.len() + 1) as u64;
        write_bytes(sp, bytes)?;
        write_bytes(sp + bytes.len() as u64, &[0])?;
        argv_ptrs.push(sp);
    }
    argv_ptrs.reverse();

    // Pointer array, null-terminated, then argc, 16-byte aligned at argc.
    let slots = 1 + argv_ptrs.len() + 1; // argc + pointers + null
    sp -= (slots * core::mem::size_of::<u64>()) as u64;
    sp &= !0xF;

    let mut write_pos = sp;
    write_u64(write_pos, argv.len() as u64)?;
    write_pos += 8;
    for &ptr in &argv_ptrs {
        write_u64(write_pos, ptr)?;
        write_pos += 8;
    }
    write_u64(write_pos, 0)?;

    Ok(sp)
}

/// Load `image` as a fresh process parented to `parent`, scheduling it
/// ready-to-run. On success the PCB's saved registers point at a
/// synthesized frame that resumes at the entry point with `argc`/`argv` on
/// the stack, per C10.
pub fn spawn(image: &[u8], argv: &[&str], parent: Pid, priority: Priority) -> KernelResult<Pid> {
    let loaded = elf::parse(image)?;
    if loaded.segments.len() > MAX_LOAD_SEGMENTS {
        return Err(KernelError::LoadLimit);
    }

    let mut ctx = MemoryContext::clone_from_kernel()?;
    let mut heap_start = 0u64;
    for seg in &loaded.segments {
        load_segment(&mut ctx, seg, image)?;
        let seg_end = (seg.vaddr + seg.mem_size).next_multiple_of(FRAME_SIZE as u64);
        heap_start = heap_start.max(seg_end);
    }

    let stack_ptr = setup_stack(&mut ctx, argv)?;
    let cr3 = ctx.mapper.l4_phys;

    let pid = PROCESS_TABLE.lock().alloc(parent, priority)?;
    {
        let mut table = PROCESS_TABLE.lock();
        let pcb = table.get_mut(pid).expect("just allocated");
        pcb.regs = Registers::new_user(loaded.entry, stack_ptr, cr3);
        pcb.loader.heap_start = heap_start;
        pcb.loader.heap_end = heap_start;
        pcb.loader.argc = argv.len() as u32;
        pcb.memory = Some(ctx);
        pcb.state = ProcessState::Ready;
    }
    super::make_ready(pid);
    Ok(pid)
}

/// Load and schedule the init process: PID 1, the reparenting target for
/// every orphaned process, read from the boot archive mounted at `/init`.
pub fn spawn_init() -> KernelResult<Pid> {
    let image = crate::fs::read_file("/init")?;
    spawn(&image, &["init"], 0, Priority::Standard)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_elf_error_is_bad_parameter() {
        let err: KernelError = ElfError::BadMagic.into();
        assert_eq!(err, KernelError::BadParameter);
    }
}
