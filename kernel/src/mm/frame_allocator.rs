//! Physical frame allocator (C1).
//!
//! Owns the map of RAM and hands out/reclaims 4 KiB frames. The firmware
//! memory map is clamped to `[LOW_CUTOFF, HIGH_CUTOFF)`, page-aligned, and
//! concatenated into an ordered sequence of usable regions; one bit per
//! frame across that sequence records free/allocated state. Before the
//! bitmap exists the allocator operates as a bump allocator over the first
//! usable region above the kernel image; once the bitmap is built, every
//! frame the bump stage handed out is marked used in it.

use spin::Mutex;

use super::{FrameNumber, MemoryRegion, FRAME_SIZE};

/// Below this physical address, memory is never handed out (real-mode IVT,
/// BIOS data area, the kernel image itself during early boot).
pub const LOW_CUTOFF: u64 = 1024 * 1024;

/// Above this physical address, memory is not used by the default
/// allocator region (kept modest for the educational target; raised by
/// `init` only if the platform reports less total usable memory).
pub const HIGH_CUTOFF_DEFAULT: u64 = 1024 * 1024 * 1024;

const MAX_REGIONS: usize = 32;
/// Bits available to the bitmap: 1,048,576 frames = 4 GiB of tracked RAM.
const BITMAP_WORDS: usize = 1024 * 1024 / 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameAllocatorError {
    OutOfMemory,
    InvalidFrame,
    TooManyRegions,
}

#[derive(Debug, Clone, Copy)]
struct Region {
    /// First frame number covered by this region.
    start_frame: u64,
    /// Number of frames covered.
    frame_count: u64,
    /// Index into the bitmap of this region's first frame.
    bitmap_base: u64,
}

/// Frame accounting counters, exposed to diagnostics/tests.
#[derive(Debug, Clone, Copy, Default)]
pub struct FrameStats {
    pub total_frames: u64,
    pub used_frames: u64,
}

impl FrameStats {
    pub fn free_frames(&self) -> u64 {
        self.total_frames - self.used_frames
    }
}

pub struct FrameAllocator {
    bitmap: [u64; BITMAP_WORDS],
    regions: [Region; MAX_REGIONS],
    region_count: usize,
    total_frames: u64,
    used_frames: u64,
    /// Bump-mode cursor used before `build_bitmap` has run. `u64::MAX` once
    /// bump mode has ended.
    bump_next_frame: u64,
    bump_region_end_frame: u64,
}

impl FrameAllocator {
    const fn empty() -> Self {
        Self {
            bitmap: [0; BITMAP_WORDS],
            regions: [Region { start_frame: 0, frame_count: 0, bitmap_base: 0 }; MAX_REGIONS],
            region_count: 0,
            total_frames: 0,
            used_frames: 0,
            bump_next_frame: u64::MAX,
            bump_region_end_frame: 0,
        }
    }

    /// Build the region table and bitmap from a clamped, page-aligned
    /// memory map. Any frame handed out by the bump stage while this was
    /// being constructed is marked used.
    fn build(&mut self, regions: &[MemoryRegion]) {
        for region in regions {
            if !region.usable || self.region_count >= MAX_REGIONS {
                continue;
            }
            let start = region.start.max(LOW_CUTOFF);
            let end = (region.start + region.size).min(HIGH_CUTOFF_DEFAULT);
            if end <= start {
                continue;
            }
            let start_frame = start.div_ceil(FRAME_SIZE as u64);
            let end_frame = end / FRAME_SIZE as u64;
            if end_frame <= start_frame {
                continue;
            }
            let frame_count = end_frame - start_frame;
            let bitmap_base = self.total_frames;
            if bitmap_base + frame_count > BITMAP_WORDS as u64 * 64 {
                break;
            }
            self.regions[self.region_count] = Region { start_frame, frame_count, bitmap_base };
            self.region_count += 1;
            self.total_frames += frame_count;

            if self.bump_next_frame == u64::MAX {
                self.bump_next_frame = start_frame;
                self.bump_region_end_frame = end_frame;
            }
        }

        // Replay the bump allocations made before the bitmap existed.
        let bumped = self.bump_next_frame;
        if bumped != u64::MAX {
            let mut frame = self.regions[0].start_frame;
            while frame < bumped {
                self.mark_used_unchecked(FrameNumber::new(frame));
                frame += 1;
            }
        }
        self.bump_next_frame = u64::MAX;
    }

    fn frame_to_bit(&self, frame: FrameNumber) -> Option<u64> {
        for region in &self.regions[..self.region_count] {
            if frame.0 >= region.start_frame && frame.0 < region.start_frame + region.frame_count {
                return Some(region.bitmap_base + (frame.0 - region.start_frame));
            }
        }
        None
    }

    fn bit_to_frame(&self, bit: u64) -> FrameNumber {
        for region in &self.regions[..self.region_count] {
            if bit >= region.bitmap_base && bit < region.bitmap_base + region.frame_count {
                return FrameNumber::new(region.start_frame + (bit - region.bitmap_base));
            }
        }
        unreachable!("bit must belong to a known region")
    }

    fn is_set(&self, bit: u64) -> bool {
        self.bitmap[(bit / 64) as usize] & (1 << (bit % 64)) != 0
    }

    fn set_bit(&mut self, bit: u64) {
        self.bitmap[(bit / 64) as usize] |= 1 << (bit % 64);
    }

    fn clear_bit(&mut self, bit: u64) {
        self.bitmap[(bit / 64) as usize] &= !(1 << (bit % 64));
    }

    fn mark_used_unchecked(&mut self, frame: FrameNumber) {
        if let Some(bit) = self.frame_to_bit(frame) {
            if !self.is_set(bit) {
                self.set_bit(bit);
                self.used_frames += 1;
            }
        }
    }

    /// `alloc_one`: first-fit scan for a clear bit; sets it.
    pub fn alloc_one(&mut self) -> Option<FrameNumber> {
        if self.bump_next_frame != u64::MAX {
            return self.bump_alloc();
        }
        for word_idx in 0..BITMAP_WORDS {
            let word = self.bitmap[word_idx];
            if word == u64::MAX {
                continue;
            }
            for bit_in_word in 0..64 {
                let bit = (word_idx as u64) * 64 + bit_in_word;
                if bit >= self.total_frames {
                    break;
                }
                if !self.is_set(bit) {
                    self.set_bit(bit);
                    self.used_frames += 1;
                    return Some(self.bit_to_frame(bit));
                }
            }
        }
        None
    }

    fn bump_alloc(&mut self) -> Option<FrameNumber> {
        if self.bump_next_frame >= self.bump_region_end_frame {
            return None;
        }
        let frame = FrameNumber::new(self.bump_next_frame);
        self.bump_next_frame += 1;
        Some(frame)
    }

    /// `alloc_exact(n)`: finds `n` consecutive clear bits; sets them.
    pub fn alloc_exact(&mut self, n: usize) -> Option<FrameNumber> {
        if n == 0 {
            return None;
        }
        let n = n as u64;
        let mut run_start: Option<u64> = None;
        let mut run_len = 0u64;
        for bit in 0..self.total_frames {
            if !self.is_set(bit) {
                if run_start.is_none() {
                    run_start = Some(bit);
                }
                run_len += 1;
                if run_len == n {
                    let start = run_start.unwrap();
                    for b in start..start + n {
                        self.set_bit(b);
                    }
                    self.used_frames += n;
                    return Some(self.bit_to_frame(start));
                }
            } else {
                run_start = None;
                run_len = 0;
            }
        }
        None
    }

    /// `alloc_withextra(max)`: first clear bit, then opportunistically
    /// claims up to `max-1` more consecutive frames following it.
    pub fn alloc_withextra(&mut self, max: usize) -> Option<(FrameNumber, usize)> {
        let first = self.alloc_one()?;
        let first_bit = self.frame_to_bit(first).unwrap();
        let mut count = 1usize;
        let mut bit = first_bit + 1;
        while count < max && bit < self.total_frames && !self.is_set(bit) {
            self.set_bit(bit);
            self.used_frames += 1;
            count += 1;
            bit += 1;
        }
        Some((first, count))
    }

    /// Freeing a frame not in the managed region is a no-op.
    pub fn free(&mut self, frame: FrameNumber) {
        if let Some(bit) = self.frame_to_bit(frame) {
            if self.is_set(bit) {
                self.clear_bit(bit);
                self.used_frames -= 1;
            }
        }
    }

    pub fn free_range(&mut self, frame: FrameNumber, n: usize) {
        for i in 0..n as u64 {
            self.free(FrameNumber::new(frame.0 + i));
        }
    }

    pub fn stats(&self) -> FrameStats {
        FrameStats { total_frames: self.total_frames, used_frames: self.used_frames }
    }
}

pub static FRAME_ALLOCATOR: Mutex<FrameAllocator> = Mutex::new(FrameAllocator::empty());

/// Build the global frame allocator's region table and bitmap from the
/// firmware memory map. See [`FrameAllocator::build`].
pub(super) fn init(regions: &[MemoryRegion]) {
    FRAME_ALLOCATOR.lock().build(regions);
    let stats = FRAME_ALLOCATOR.lock().stats();
    log::info!(
        "frame_allocator: {} total frames, {} free",
        stats.total_frames,
        stats.free_frames()
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_regions() -> [MemoryRegion; 1] {
        [MemoryRegion { start: LOW_CUTOFF, size: 16 * FRAME_SIZE as u64, usable: true }]
    }

    #[test]
    fn alloc_one_sets_distinct_frames() {
        let mut a = FrameAllocator::empty();
        a.build(&test_regions());
        let f1 = a.alloc_one().unwrap();
        let f2 = a.alloc_one().unwrap();
        assert_ne!(f1, f2);
        assert_eq!(a.stats().used_frames, 2);
    }

    #[test]
    fn free_then_alloc_reuses_frame() {
        let mut a = FrameAllocator::empty();
        a.build(&test_regions());
        let f = a.alloc_one().unwrap();
        a.free(f);
        assert_eq!(a.stats().used_frames, 0);
        let f2 = a.alloc_one().unwrap();
        assert_eq!(f, f2);
    }

    #[test]
    fn alloc_exact_finds_contiguous_run() {
        let mut a = FrameAllocator::empty();
        a.build(&test_regions());
        let _ = a.alloc_one();
        let run = a.alloc_exact(4).unwrap();
        assert_eq!(a.stats().used_frames, 5);
        // Contiguous, in order.
        for i in 0..4 {
            assert!(a.is_set(a.frame_to_bit(FrameNumber::new(run.0 + i)).unwrap()));
        }
    }

    #[test]
    fn alloc_withextra_opportunistically_grows() {
        let mut a = FrameAllocator::empty();
        a.build(&test_regions());
        let (_first, count) = a.alloc_withextra(8).unwrap();
        assert!(count >= 1 && count <= 8);
    }

    #[test]
    fn freeing_out_of_range_frame_is_noop() {
        let mut a = FrameAllocator::empty();
        a.build(&test_regions());
        a.free(FrameNumber::new(999_999));
        assert_eq!(a.stats().used_frames, 0);
    }
}
