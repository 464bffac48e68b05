//! Memory management: physical frames (C1), per-context virtual ranges (C2),
//! the paging engine (C3), memory contexts (C4) and the kernel heap (C5).
//!
//! The paging engine needs to read and write page-table frames that live at
//! arbitrary physical addresses. Rather than the classical "scratch page"
//! technique of re-pointing a single reserved kernel-virtual page's leaf PTE
//! on demand, this kernel relies on `bootloader_api`'s offset-mapped physical
//! memory: the bootloader maps the *entire* physical address space at a
//! fixed, kernel-chosen virtual offset ([`PHYS_MEM_OFFSET`]), so any physical
//! address can be turned into a dereferenceable kernel pointer by adding the
//! offset — no per-access re-pointing or TLB shootdown of a scratch slot is
//! needed. See DESIGN.md for why this is treated as the resolved form of the
//! "scratch mapping" glossary entry.

pub mod bootloader;
pub mod frame_allocator;
pub mod heap;
pub mod page_fault;
pub mod page_table;
pub mod user_validation;
pub mod vas;
pub mod vmm;

use core::sync::atomic::{AtomicU64, Ordering};

pub use frame_allocator::{FrameAllocatorError, FRAME_ALLOCATOR};
pub use vmm::MemoryContext;

/// Size of one physical frame / virtual page.
pub const FRAME_SIZE: usize = 4096;

/// Offset at which the bootloader maps all physical memory into the
/// kernel's virtual address space. Populated once from `BootInfo` at boot.
static PHYS_MEM_OFFSET: AtomicU64 = AtomicU64::new(0);

/// Record the bootloader's physical-memory mapping offset. Must be called
/// exactly once, before any call to [`phys_to_virt`].
pub fn init_phys_mem_offset(offset: u64) {
    PHYS_MEM_OFFSET.store(offset, Ordering::Release);
}

/// Translate a physical address to the kernel-virtual alias the bootloader
/// mapped it at.
pub fn phys_to_virt(phys: u64) -> u64 {
    PHYS_MEM_OFFSET.load(Ordering::Acquire) + phys
}

/// A physical frame number (frame index, not byte address).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct FrameNumber(pub u64);

impl FrameNumber {
    pub const fn new(n: u64) -> Self {
        Self(n)
    }

    pub const fn as_addr(self) -> u64 {
        self.0 * FRAME_SIZE as u64
    }

    pub const fn from_addr(addr: u64) -> Self {
        Self(addr / FRAME_SIZE as u64)
    }
}

/// A page-aligned virtual address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct VirtualAddress(pub u64);

impl VirtualAddress {
    pub const fn new(addr: u64) -> Self {
        Self(addr)
    }

    pub const fn as_u64(self) -> u64 {
        self.0
    }

    pub const fn is_page_aligned(self) -> bool {
        self.0 % FRAME_SIZE as u64 == 0
    }
}

/// A single usable memory region reported by the firmware memory map,
/// clamped and page-aligned (see [`bootloader::process_memory_map`]).
#[derive(Debug, Clone, Copy)]
pub struct MemoryRegion {
    pub start: u64,
    pub size: u64,
    pub usable: bool,
}

bitflags::bitflags! {
    /// Page-table leaf flags, independent of architecture encoding.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct PageFlags: u64 {
        const PRESENT      = 1 << 0;
        const WRITABLE     = 1 << 1;
        const UNPRIVILEGED = 1 << 2;
        const GLOBAL       = 1 << 3;
        /// Kernel-only software bit: set once a lazily-reserved leaf has
        /// had a frame installed by `load_page`.
        const LOADED       = 1 << 4;
    }
}

/// Initialize memory management from the bootloader-supplied boot
/// information: records the physical memory offset, builds the frame
/// bitmap from the memory map, and installs the global kernel heap.
///
/// # Safety
///
/// Must be called exactly once, early in boot, before any other `mm::*`
/// function, and only after `phys_mem_offset` has been validated as the
/// base of a complete identity-style mapping of physical RAM.
pub unsafe fn init(phys_mem_offset: u64, regions: &[MemoryRegion]) {
    init_phys_mem_offset(phys_mem_offset);
    frame_allocator::init(regions);
    vmm::set_kernel_mapper(&page_table::PageMapper::current());
    // SAFETY: the frame allocator is initialized and the kernel's virtual
    // address space (identity-mapped high half) is stable at this point,
    // satisfying `heap::init`'s precondition.
    unsafe {
        heap::init();
    }
    log::info!(
        "mm: initialized ({} usable regions)",
        regions.iter().filter(|r| r.usable).count()
    );
}
