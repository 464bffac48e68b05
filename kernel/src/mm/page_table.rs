//! Paging engine (C3): builds and mutates 4-level page tables, maps/unmaps
//! ranges, and services page faults with lazy backing.
//!
//! All operations here take an explicit [`PageMapper`] (a root physical
//! frame) and are expected to be called with interrupts disabled by the
//! caller when mutating the *currently active* context's tables, per the
//! concurrency model. Page-table frames are read and written through the
//! bootloader's physical-memory offset mapping (see [`super::phys_to_virt`])
//! rather than a re-pointed scratch page.

use super::{frame_allocator::FRAME_ALLOCATOR, phys_to_virt, FrameNumber, PageFlags, FRAME_SIZE};

pub const PAGE_TABLE_ENTRIES: usize = 512;

/// One 4 KiB, 512-entry page table (PML4, PDPT, PD, or PT — all identically
/// shaped at this architecture's 4-level depth).
#[repr(C, align(4096))]
pub struct PageTable {
    entries: [PageTableEntry; PAGE_TABLE_ENTRIES],
}

impl PageTable {
    pub fn zero(&mut self) {
        for e in &mut self.entries {
            *e = PageTableEntry::empty();
        }
    }
}

impl core::ops::Index<usize> for PageTable {
    type Output = PageTableEntry;
    fn index(&self, i: usize) -> &PageTableEntry {
        &self.entries[i]
    }
}

impl core::ops::IndexMut<usize> for PageTable {
    fn index_mut(&mut self, i: usize) -> &mut PageTableEntry {
        &mut self.entries[i]
    }
}

/// A single page-table leaf or interior entry.
///
/// Bit layout: bit 0 present, bit 1 writable, bit 2 user-accessible, bit 8
/// global, bit 9 (a CPU-ignored "available to software" bit) the
/// kernel-only *loaded* bit distinguishing a mapped-but-physically-backed
/// leaf from one reserved for lazy allocation, bits 12..52 the frame
/// address.
#[derive(Clone, Copy)]
#[repr(transparent)]
pub struct PageTableEntry(u64);

const ADDR_MASK: u64 = 0x000f_ffff_ffff_f000;
const LOADED_BIT: u64 = 1 << 9;

impl PageTableEntry {
    pub const fn empty() -> Self {
        Self(0)
    }

    pub fn is_present(&self) -> bool {
        self.0 & PageFlags::PRESENT.bits() != 0
    }

    pub fn is_loaded(&self) -> bool {
        self.0 & LOADED_BIT != 0
    }

    pub fn frame(&self) -> Option<FrameNumber> {
        if self.0 & ADDR_MASK == 0 {
            None
        } else {
            Some(FrameNumber::from_addr(self.0 & ADDR_MASK))
        }
    }

    pub fn flags(&self) -> PageFlags {
        PageFlags::from_bits_truncate(self.0 & 0xFFF)
    }

    pub fn raw(&self) -> u64 {
        self.0
    }

    /// Set this entry to point at `frame` with `flags`, marking it present
    /// and loaded.
    pub fn set_mapped(&mut self, frame: FrameNumber, flags: PageFlags) {
        self.0 = frame.as_addr() | (flags | PageFlags::PRESENT | PageFlags::LOADED).bits();
    }

    /// Set this entry as an interior-table pointer (always present,
    /// writable, and user-accessible so a leaf's own permissions govern
    /// access — matching the x86_64 architectural requirement that every
    /// table on the walk path permit the access the leaf allows).
    pub fn set_table(&mut self, frame: FrameNumber) {
        self.0 = frame.as_addr()
            | (PageFlags::PRESENT | PageFlags::WRITABLE | PageFlags::UNPRIVILEGED).bits();
    }

    /// Reserve this leaf for lazy allocation: structurally present-enough
    /// to record an intent (non-zero), but `PRESENT` and `LOADED` both
    /// clear so a fault on it calls [`PageMapper::load_page`] rather than
    /// faulting straight to "unmapped".
    pub fn set_lazy(&mut self, flags: PageFlags) {
        self.0 = (flags & !(PageFlags::PRESENT | PageFlags::LOADED)).bits() | RESERVED_MARKER;
    }

    pub fn is_reserved(&self) -> bool {
        self.0 & RESERVED_MARKER != 0
    }

    pub fn clear(&mut self) {
        self.0 = 0;
    }
}

/// Marks a leaf as "reserved for lazy allocation" even though PRESENT is
/// clear; distinguishes it from a genuinely empty (never-mapped) entry.
const RESERVED_MARKER: u64 = 1 << 10;

/// Breaks a canonical 48-bit virtual address into its four page-table
/// indices and page offset.
pub struct VirtualAddressBreakdown {
    pub l4: usize,
    pub l3: usize,
    pub l2: usize,
    pub l1: usize,
    pub offset: usize,
}

impl VirtualAddressBreakdown {
    pub fn new(va: u64) -> Self {
        Self {
            l4: ((va >> 39) & 0x1FF) as usize,
            l3: ((va >> 30) & 0x1FF) as usize,
            l2: ((va >> 21) & 0x1FF) as usize,
            l1: ((va >> 12) & 0x1FF) as usize,
            offset: (va & 0xFFF) as usize,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageTableError {
    OutOfMemory,
    /// Mapping an already-mapped VA with a different PTE value: a bug, not
    /// a recoverable condition, per the spec's edge-case rule.
    Conflict,
    Unaligned,
}

/// A 4-level page-table tree rooted at one physical frame.
#[derive(Clone, Copy)]
pub struct PageMapper {
    pub l4_phys: u64,
}

fn table_at(phys: u64) -> &'static mut PageTable {
    // SAFETY: `phys` is always a frame handed out by the frame allocator
    // and installed as a page-table frame by this module, so the
    // bootloader's physical-memory mapping covers it and it is exclusively
    // owned by page-table-walk callers serialized per the concurrency model.
    unsafe { &mut *(phys_to_virt(phys) as *mut PageTable) }
}

fn alloc_table_frame() -> Result<u64, PageTableError> {
    let frame = FRAME_ALLOCATOR.lock().alloc_one().ok_or(PageTableError::OutOfMemory)?;
    let table = table_at(frame.as_addr());
    table.zero();
    Ok(frame.as_addr())
}

impl PageMapper {
    /// Allocate and zero a fresh PML4, returning a mapper rooted at it.
    pub fn new_empty() -> Result<Self, PageTableError> {
        Ok(Self { l4_phys: alloc_table_frame()? })
    }

    pub fn new(l4_phys: u64) -> Self {
        Self { l4_phys }
    }

    fn walk_create(&self, brk: &VirtualAddressBreakdown) -> Result<&'static mut PageTable, PageTableError> {
        let l4 = table_at(self.l4_phys);
        let l3_phys = ensure_child(l4, brk.l4)?;
        let l3 = table_at(l3_phys);
        let l2_phys = ensure_child(l3, brk.l3)?;
        let l2 = table_at(l2_phys);
        let l1_phys = ensure_child(l2, brk.l2)?;
        Ok(table_at(l1_phys))
    }

    fn walk_existing(&self, brk: &VirtualAddressBreakdown) -> Option<&'static mut PageTable> {
        let l4 = table_at(self.l4_phys);
        let l3_phys = l4[brk.l4].frame()?.as_addr();
        let l3 = table_at(l3_phys);
        let l2_phys = l3[brk.l3].frame()?.as_addr();
        let l2 = table_at(l2_phys);
        let l1_phys = l2[brk.l2].frame()?.as_addr();
        Some(table_at(l1_phys))
    }

    /// `map_page(ctx, va, phys|null, flags)`.
    pub fn map_page(&self, va: u64, phys: Option<u64>, flags: PageFlags) -> Result<(), PageTableError> {
        if va % FRAME_SIZE as u64 != 0 {
            return Err(PageTableError::Unaligned);
        }
        let brk = VirtualAddressBreakdown::new(va);
        let l1 = self.walk_create(&brk)?;
        let entry = &mut l1[brk.l1];

        if entry.is_present() {
            let same = match phys {
                Some(p) => entry.frame().map(|f| f.as_addr()) == Some(p) && entry.flags() == flags,
                None => false,
            };
            if same {
                return Ok(());
            }
            panic!("map_page: conflicting remap of already-mapped va {:#x}", va);
        }

        match phys {
            Some(p) => {
                entry.set_mapped(FrameNumber::from_addr(p), flags);
                invalidate(va);
            }
            None => entry.set_lazy(flags),
        }
        Ok(())
    }

    /// `map_range(ctx, va_start, phys_start|null, flags, n_pages)`: batched,
    /// rolling back everything created on failure.
    pub fn map_range(
        &self,
        va_start: u64,
        phys_start: Option<u64>,
        flags: PageFlags,
        n_pages: usize,
    ) -> Result<(), PageTableError> {
        for i in 0..n_pages {
            let va = va_start + (i as u64) * FRAME_SIZE as u64;
            let phys = phys_start.map(|p| p + (i as u64) * FRAME_SIZE as u64);
            if let Err(e) = self.map_page(va, phys, flags) {
                for j in 0..i {
                    self.unmap_page(va_start + (j as u64) * FRAME_SIZE as u64);
                }
                return Err(e);
            }
        }
        Ok(())
    }

    /// `unmap_page`: clears the leaf; releases empty interior tables on
    /// the way back up. Unmap of an unmapped VA is silently ignored.
    pub fn unmap_page(&self, va: u64) {
        let brk = VirtualAddressBreakdown::new(va);
        let l4 = table_at(self.l4_phys);
        let Some(l3_phys) = l4[brk.l4].frame().map(|f| f.as_addr()) else { return };
        let l3 = table_at(l3_phys);
        let Some(l2_phys) = l3[brk.l3].frame().map(|f| f.as_addr()) else { return };
        let l2 = table_at(l2_phys);
        let Some(l1_phys) = l2[brk.l2].frame().map(|f| f.as_addr()) else { return };
        let l1 = table_at(l1_phys);

        let entry = &mut l1[brk.l1];
        if entry.is_present() {
            if let Some(frame) = entry.frame() {
                FRAME_ALLOCATOR.lock().free(frame);
            }
            invalidate(va);
        }
        entry.clear();

        release_if_empty(l2, brk.l2, l1_phys);
        release_if_empty(l3, brk.l3, l2_phys);
        release_if_empty(l4, brk.l4, l3_phys);
    }

    pub fn unmap_range(&self, va_start: u64, n_pages: usize) {
        for i in 0..n_pages {
            self.unmap_page(va_start + (i as u64) * FRAME_SIZE as u64);
        }
    }

    /// `get_pte(ctx, va) -> *entry|null`.
    pub fn get_pte(&self, va: u64) -> Option<PageTableEntry> {
        let brk = VirtualAddressBreakdown::new(va);
        let l1 = self.walk_existing(&brk)?;
        let e = l1[brk.l1];
        if e.raw() == 0 { None } else { Some(e) }
    }

    /// `load_page(ctx, va)`: invoked by the page-fault handler. If the
    /// leaf exists and is lazily reserved, allocate one frame, install it,
    /// mark present+loaded, invalidate the TLB.
    pub fn load_page(&self, va: u64) -> Result<(), PageTableError> {
        let brk = VirtualAddressBreakdown::new(va);
        let l1 = self.walk_existing(&brk).ok_or(PageTableError::Conflict)?;
        let entry = &mut l1[brk.l1];
        if !entry.is_reserved() || entry.is_present() {
            return Err(PageTableError::Conflict);
        }
        let flags = entry.flags();
        let frame = FRAME_ALLOCATOR.lock().alloc_one().ok_or(PageTableError::OutOfMemory)?;
        // Zero the freshly backed page before exposing it to user code.
        table_at(frame.as_addr()).zero();
        entry.set_mapped(frame, flags);
        invalidate(va);
        Ok(())
    }

    /// `mapaddr(ctx, phys, va|null, len, flags)`: maps a (typically MMIO)
    /// physical region, returning the virtual address adjusted for any
    /// sub-page offset in `phys`.
    pub fn mapaddr(
        &self,
        phys: u64,
        va_base: u64,
        len: usize,
        flags: PageFlags,
    ) -> Result<u64, PageTableError> {
        let page_offset = phys % FRAME_SIZE as u64;
        let aligned_phys = phys - page_offset;
        let n_pages = (page_offset as usize + len).div_ceil(FRAME_SIZE);
        self.map_range(va_base, Some(aligned_phys), flags, n_pages)?;
        Ok(va_base + page_offset)
    }

    /// `switch(ctx)`: writes the PML4 frame into the architectural
    /// page-table base register. Flushes all non-global TLB entries.
    pub fn switch(&self) {
        use x86_64::registers::control::{Cr3, Cr3Flags};
        use x86_64::structures::paging::PhysFrame;
        use x86_64::PhysAddr;
        let frame = PhysFrame::containing_address(PhysAddr::new(self.l4_phys));
        // SAFETY: `self.l4_phys` is a valid, fully-populated PML4 frame
        // whose kernel half mirrors the active kernel context (see
        // `MemoryContext::clone_from_kernel`), so switching to it leaves
        // kernel code/data mapped and executing.
        unsafe {
            Cr3::write(frame, Cr3Flags::empty());
        }
    }

    /// Current active mapper, read from CR3.
    pub fn current() -> Self {
        use x86_64::registers::control::Cr3;
        let (frame, _) = Cr3::read();
        Self { l4_phys: frame.start_address().as_u64() }
    }

    /// Copy this mapper's upper-half (kernel) PML4 entries verbatim into
    /// `into` and zero its lower half. Every process context shares the
    /// same kernel mappings this way.
    pub fn copy_kernel_half_into(&self, into: &Self) {
        let src = table_at(self.l4_phys);
        let dst = table_at(into.l4_phys);
        for i in 0..PAGE_TABLE_ENTRIES {
            dst[i] = if i >= KERNEL_L4_START { src[i] } else { PageTableEntry::empty() };
        }
    }

    /// Duplicate every present user-half mapping into `into`: backed leaves
    /// get a fresh frame with the contents copied, lazy leaves stay lazy.
    /// `into` must already have its kernel half populated.
    pub fn clone_user_half_into(&self, into: &Self) -> Result<(), PageTableError> {
        for l4 in 0..KERNEL_L4_START {
            let Some(l3_phys) = table_at(self.l4_phys)[l4].frame().map(|f| f.as_addr()) else { continue };
            for l3 in 0..PAGE_TABLE_ENTRIES {
                let Some(l2_phys) = table_at(l3_phys)[l3].frame().map(|f| f.as_addr()) else { continue };
                for l2 in 0..PAGE_TABLE_ENTRIES {
                    let Some(l1_phys) = table_at(l2_phys)[l2].frame().map(|f| f.as_addr()) else { continue };
                    for l1 in 0..PAGE_TABLE_ENTRIES {
                        let entry = table_at(l1_phys)[l1];
                        if entry.raw() == 0 {
                            continue;
                        }
                        let va = ((l4 as u64) << 39)
                            | ((l3 as u64) << 30)
                            | ((l2 as u64) << 21)
                            | ((l1 as u64) << 12);
                        if entry.is_reserved() && !entry.is_present() {
                            into.map_page(va, None, entry.flags())?;
                        } else if let Some(frame) = entry.frame() {
                            let new_frame =
                                FRAME_ALLOCATOR.lock().alloc_one().ok_or(PageTableError::OutOfMemory)?;
                            let src_ptr = phys_to_virt(frame.as_addr()) as *const u8;
                            let dst_ptr = phys_to_virt(new_frame.as_addr()) as *mut u8;
                            // SAFETY: both addresses are whole, page-aligned, distinct
                            // physical frames, for exactly FRAME_SIZE bytes each.
                            unsafe {
                                core::ptr::copy_nonoverlapping(src_ptr, dst_ptr, FRAME_SIZE);
                            }
                            into.map_page(va, Some(new_frame.as_addr()), entry.flags())?;
                        }
                    }
                }
            }
        }
        Ok(())
    }

    /// Unmap and free every user-half leaf and interior table frame,
    /// walking the tree directly rather than through `unmap_range` (most
    /// of the user half is never populated). Leaves the kernel half and
    /// the PML4 frame itself untouched; the caller frees the PML4 once
    /// every process referencing this context has gone.
    pub fn free_user_half(&self) {
        for l4 in 0..KERNEL_L4_START {
            let Some(l3_frame) = table_at(self.l4_phys)[l4].frame() else { continue };
            for l3 in 0..PAGE_TABLE_ENTRIES {
                let Some(l2_frame) = table_at(l3_frame.as_addr())[l3].frame() else { continue };
                for l2 in 0..PAGE_TABLE_ENTRIES {
                    let Some(l1_frame) = table_at(l2_frame.as_addr())[l2].frame() else { continue };
                    for l1 in 0..PAGE_TABLE_ENTRIES {
                        if let Some(frame) = table_at(l1_frame.as_addr())[l1].frame() {
                            FRAME_ALLOCATOR.lock().free(frame);
                        }
                    }
                    FRAME_ALLOCATOR.lock().free(l1_frame);
                }
                FRAME_ALLOCATOR.lock().free(l2_frame);
            }
            FRAME_ALLOCATOR.lock().free(l3_frame);
        }
    }
}

/// PML4 index at which the kernel (upper) half begins; every index below
/// this is process-private user space.
pub const KERNEL_L4_START: usize = PAGE_TABLE_ENTRIES / 2;

fn ensure_child(table: &mut PageTable, idx: usize) -> Result<u64, PageTableError> {
    let entry = &mut table[idx];
    if let Some(frame) = entry.frame() {
        return Ok(frame.as_addr());
    }
    let child = alloc_table_frame()?;
    entry.set_table(FrameNumber::from_addr(child));
    Ok(child)
}

fn release_if_empty(parent: &mut PageTable, idx: usize, child_phys: u64) {
    let child = table_at(child_phys);
    if (0..PAGE_TABLE_ENTRIES).all(|i| child[i].raw() == 0) {
        FRAME_ALLOCATOR.lock().free(FrameNumber::from_addr(child_phys));
        parent[idx].clear();
    }
}

fn invalidate(va: u64) {
    use x86_64::instructions::tlb;
    use x86_64::VirtAddr;
    tlb::flush(VirtAddr::new(va));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn virtual_address_breakdown_roundtrips_offset() {
        let brk = VirtualAddressBreakdown::new(0x1234_5678_9000 + 0x123);
        assert_eq!(brk.offset, 0x123);
    }

    #[test]
    fn page_table_entry_lazy_then_mapped() {
        let mut e = PageTableEntry::empty();
        e.set_lazy(PageFlags::WRITABLE | PageFlags::UNPRIVILEGED);
        assert!(!e.is_present());
        assert!(e.is_reserved());
        e.set_mapped(FrameNumber::new(5), PageFlags::WRITABLE);
        assert!(e.is_present());
        assert!(e.is_loaded());
        assert_eq!(e.frame(), Some(FrameNumber::new(5)));
    }
}
