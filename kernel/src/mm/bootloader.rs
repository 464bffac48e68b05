//! Bootloader memory map integration.
//!
//! Converts the `bootloader_api` memory map into the plain [`MemoryRegion`]
//! slice the frame allocator clamps and bitmaps (see
//! [`frame_allocator::FrameAllocator::build`](super::frame_allocator)).

use bootloader_api::info::{MemoryRegionKind, MemoryRegions};

use super::MemoryRegion;

const MAX_REGIONS: usize = 64;

/// Collect the usable-RAM regions from a `bootloader_api` memory map into a
/// fixed-size buffer (the allocator itself has no heap yet at this point in
/// boot, so this cannot return a `Vec`).
pub fn collect_usable_regions(regions: &MemoryRegions) -> ([MemoryRegion; MAX_REGIONS], usize) {
    let mut out = [MemoryRegion { start: 0, size: 0, usable: false }; MAX_REGIONS];
    let mut count = 0;
    for region in regions.iter() {
        if count >= MAX_REGIONS {
            break;
        }
        let usable = matches!(region.kind, MemoryRegionKind::Usable);
        if !usable {
            continue;
        }
        out[count] = MemoryRegion {
            start: region.start,
            size: region.end - region.start,
            usable: true,
        };
        count += 1;
    }
    (out, count)
}
