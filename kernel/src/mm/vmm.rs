//! Memory contexts (C4): a process's page tables plus its virtual-range
//! allocator, bound together.
//!
//! Every context's kernel half is identical — copied verbatim from the
//! kernel's own mapper at creation time — so switching contexts never
//! changes what kernel code/data is mapped. Only the user half (low
//! canonical addresses) differs between processes.

use core::sync::atomic::{AtomicU64, Ordering};

use super::frame_allocator::FRAME_ALLOCATOR;
use super::page_table::{PageMapper, PageTableError};
use super::vas::VirtualRangeAllocator;
use super::{FrameNumber, PageFlags};
use crate::error::{KernelError, KernelResult};

/// Lowest user-space virtual address handed out by the allocator; leaves a
/// guard gap below it so a null-pointer-style access never lands in a
/// mapped page.
const USER_SPACE_BASE: u64 = 0x0000_0001_0000_0000;
/// One past the highest user-space address: top of the canonical low half.
const USER_SPACE_END: u64 = 0x0000_7fff_ffff_f000;

static KERNEL_L4_PHYS: AtomicU64 = AtomicU64::new(0);

/// Record the kernel's own PML4 frame. Must be called once, during boot,
/// before any [`MemoryContext::clone_from_kernel`] call.
pub fn set_kernel_mapper(mapper: &PageMapper) {
    KERNEL_L4_PHYS.store(mapper.l4_phys, Ordering::Release);
}

fn kernel_mapper() -> PageMapper {
    PageMapper::new(KERNEL_L4_PHYS.load(Ordering::Acquire))
}

impl From<PageTableError> for KernelError {
    fn from(e: PageTableError) -> Self {
        match e {
            PageTableError::OutOfMemory => KernelError::OutOfMemory,
            PageTableError::Conflict | PageTableError::Unaligned => KernelError::BadParameter,
        }
    }
}

/// A process's address space: its page tables and the virtual ranges
/// carved out of them.
pub struct MemoryContext {
    pub mapper: PageMapper,
    pub vas: VirtualRangeAllocator,
}

impl MemoryContext {
    /// Fresh context whose kernel half mirrors the running kernel's own
    /// mappings and whose user half is entirely free.
    pub fn clone_from_kernel() -> KernelResult<Self> {
        let mapper = PageMapper::new_empty()?;
        kernel_mapper().copy_kernel_half_into(&mapper);
        let mut vas = VirtualRangeAllocator::new(USER_SPACE_BASE, USER_SPACE_END - USER_SPACE_BASE);
        vas.promote_to_heap();
        Ok(Self { mapper, vas })
    }

    /// Used by `fork`: a new context with the same kernel half, a
    /// frame-for-frame copy of every backed user mapping (no
    /// copy-on-write), lazy mappings carried over lazy, and a duplicate of
    /// the virtual-range list.
    pub fn clone_process(&self) -> KernelResult<Self> {
        let mapper = PageMapper::new_empty()?;
        kernel_mapper().copy_kernel_half_into(&mapper);
        self.mapper.clone_user_half_into(&mapper)?;
        let vas = self.vas.clone_list();
        Ok(Self { mapper, vas })
    }

    /// `alloc_pages`: reserve `n_pages` of virtual space and back it with
    /// lazily-loaded leaves (no frames committed until first touch).
    pub fn alloc_pages(&mut self, n_pages: usize, flags: PageFlags) -> KernelResult<u64> {
        let va = self.vas.alloc(n_pages).ok_or(KernelError::OutOfMemory)?;
        self.mapper.map_range(va, None, flags, n_pages)?;
        Ok(va)
    }

    /// `alloc_pages_at`: same, but at a caller-chosen fixed address (used
    /// to lay out a loaded program's segments and its argument stack).
    pub fn alloc_pages_at(&mut self, va: u64, n_pages: usize, flags: PageFlags) -> KernelResult<()> {
        self.vas.take(va, n_pages)?;
        self.mapper.map_range(va, None, flags, n_pages)?;
        Ok(())
    }

    /// `free_pages`: release a previously allocated range and its backing
    /// frames.
    pub fn free_pages(&mut self, va: u64) -> KernelResult<()> {
        let n_pages = self.vas.free(va)?;
        self.mapper.unmap_range(va, n_pages);
        Ok(())
    }

    /// Tear down this context entirely: every user-half mapping and table
    /// frame, then the PML4 frame itself. The kernel half is never
    /// touched. Consumes `self` so it cannot be used afterward.
    pub fn destroy(self) {
        self.mapper.free_user_half();
        FRAME_ALLOCATOR.lock().free(FrameNumber::from_addr(self.mapper.l4_phys));
    }
}
