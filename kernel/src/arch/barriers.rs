//! Memory barrier primitives.
//!
//! x86_64's strongly-ordered memory model makes all three of these a single
//! `MFENCE`-equivalent fence (or, for the instruction barrier, a no-op); the
//! three names stay distinct so call sites document *why* a barrier is
//! needed (TLB/page-table visibility vs. MMIO ordering) even though they
//! compile to the same instruction here.

/// Full memory fence: all reads/writes issued before this barrier are
/// globally visible before any reads/writes issued after it. Used after
/// writing a page-table entry and invalidating its TLB entry.
#[inline(always)]
pub fn memory_fence() {
    core::sync::atomic::fence(core::sync::atomic::Ordering::SeqCst);
}

/// Data synchronization barrier: a store must be visible before whatever
/// follows reads it back (e.g. writing an MMIO control register before
/// polling its status register).
#[inline(always)]
pub fn data_sync_barrier() {
    core::sync::atomic::fence(core::sync::atomic::Ordering::SeqCst);
}

/// Instruction stream synchronization barrier. A no-op on x86_64, whose
/// strong ordering and unified instruction/data view make it unnecessary.
#[inline(always)]
pub fn instruction_sync_barrier() {}
