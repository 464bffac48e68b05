//! Kernel heap (C5): a page-backed, header-linked free-block allocator.
//!
//! Blocks are laid out contiguously within a "node" (a run of pages taken
//! from the paging engine in one growth step). Each block carries a small
//! header recording its own size and its predecessor's total size, so
//! freeing a block can coalesce with both neighbors in constant time
//! without a separate free list. A node whose blocks have all coalesced
//! back into a single free span is unmapped and its frames returned.

use core::alloc::{GlobalAlloc, Layout};
use core::mem::size_of;

use spin::Mutex;

use super::page_table::PageMapper;
use super::{frame_allocator::FRAME_ALLOCATOR, PageFlags, FRAME_SIZE};

/// Kernel-virtual base address the heap grows from. Chosen inside the
/// canonical kernel half, well clear of the kernel image and the
/// bootloader's physical-memory mapping window.
const HEAP_START: u64 = 0xFFFF_9000_0000_0000;
const INITIAL_GROWTH_PAGES: usize = 64;
const GROWTH_PAGES: usize = 64;
const MAGIC: u32 = 0x4865_6150; // "HeaP"
const MAX_NODES: usize = 256;
const MIN_BLOCK_PAYLOAD: usize = 16;
const ALIGN: usize = 16;

#[repr(C)]
struct BlockHeader {
    magic: u32,
    used: bool,
    node: u32,
    /// Total size of this block including the header, in bytes.
    total_size: usize,
    /// Total size of the immediately preceding block in this node, or 0
    /// if this is the node's first block.
    prev_total_size: usize,
}

const HEADER_SIZE: usize = size_of::<BlockHeader>();

#[derive(Clone, Copy)]
struct Node {
    start: u64,
    end: u64,
}

struct HeapState {
    nodes: [Option<Node>; MAX_NODES],
    node_count: usize,
    next_va: u64,
}

impl HeapState {
    const fn empty() -> Self {
        Self { nodes: [None; MAX_NODES], node_count: 0, next_va: HEAP_START }
    }

    /// Map `n_pages` fresh frames as one new node, install its initial
    /// single free block, and return its node number.
    fn grow(&mut self, n_pages: usize) -> Option<u32> {
        let slot = (0..self.node_count).find(|&i| self.nodes[i].is_none()).or_else(|| {
            if self.node_count < MAX_NODES {
                let s = self.node_count;
                self.node_count += 1;
                Some(s)
            } else {
                None
            }
        })?;

        let start = self.next_va;
        let len = (n_pages * FRAME_SIZE) as u64;
        let mapper = PageMapper::current();
        for i in 0..n_pages {
            let frame = FRAME_ALLOCATOR.lock().alloc_one()?;
            let va = start + (i * FRAME_SIZE) as u64;
            mapper.map_page(va, Some(frame.as_addr()), PageFlags::WRITABLE).ok()?;
        }
        self.next_va += len;
        self.nodes[slot] = Some(Node { start, end: start + len });

        // SAFETY: every byte in [start, start+len) was just freshly mapped
        // above and is exclusively owned by the heap.
        unsafe {
            (start as *mut BlockHeader).write(BlockHeader {
                magic: MAGIC,
                used: false,
                node: slot as u32,
                total_size: len as usize,
                prev_total_size: 0,
            });
        }
        Some(slot as u32)
    }

    /// First-fit scan across every node's contiguous block chain.
    fn find_free_block(&self, need: usize) -> Option<*mut BlockHeader> {
        for node in self.nodes[..self.node_count].iter().flatten() {
            let mut addr = node.start;
            while addr < node.end {
                // SAFETY: `addr` is within a mapped node and always lands on a
                // live header written by `grow` or a previous split/merge.
                let header = unsafe { &*(addr as *const BlockHeader) };
                debug_assert_eq!(header.magic, MAGIC);
                if !header.used && header.total_size - HEADER_SIZE >= need {
                    return Some(addr as *mut BlockHeader);
                }
                addr += header.total_size as u64;
            }
        }
        None
    }

    fn node_span(&self, node: u32) -> Node {
        self.nodes[node as usize].unwrap()
    }

    /// If a live block immediately follows `block_addr`, fix up its
    /// `prev_total_size` after `block_addr`'s size changed.
    fn fixup_next_prev(&self, block_addr: u64, new_total: usize) {
        let next_addr = block_addr + new_total as u64;
        // SAFETY: `block_addr` points at a live header.
        let node = unsafe { self.node_span((*(block_addr as *const BlockHeader)).node) };
        if next_addr < node.end {
            // SAFETY: `next_addr` is within the node and addresses a live header.
            unsafe {
                (*(next_addr as *mut BlockHeader)).prev_total_size = new_total;
            }
        }
    }
}

static HEAP: Mutex<HeapState> = Mutex::new(HeapState::empty());

fn align_up(n: usize, align: usize) -> usize {
    (n + align - 1) & !(align - 1)
}

pub struct KernelHeap;

#[global_allocator]
static ALLOCATOR: KernelHeap = KernelHeap;

unsafe impl GlobalAlloc for KernelHeap {
    unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
        let need = align_up(layout.size().max(MIN_BLOCK_PAYLOAD), ALIGN);
        let mut state = HEAP.lock();
        let block_addr = loop {
            if let Some(b) = state.find_free_block(need) {
                break b as u64;
            }
            let pages = (need + HEADER_SIZE).div_ceil(FRAME_SIZE).max(GROWTH_PAGES);
            if state.grow(pages).is_none() {
                return core::ptr::null_mut();
            }
        };

        // SAFETY: `block_addr` came from `find_free_block`, which only
        // returns addresses of live, unused headers with enough payload.
        unsafe {
            let header = &mut *(block_addr as *mut BlockHeader);
            let remaining = header.total_size - HEADER_SIZE - need;
            if remaining >= HEADER_SIZE + MIN_BLOCK_PAYLOAD {
                let split_addr = block_addr + HEADER_SIZE as u64 + need as u64;
                let split_total = remaining;
                let node = header.node;
                header.total_size = HEADER_SIZE + need;
                (split_addr as *mut BlockHeader).write(BlockHeader {
                    magic: MAGIC,
                    used: false,
                    node,
                    total_size: split_total,
                    prev_total_size: HEADER_SIZE + need,
                });
                state.fixup_next_prev(split_addr, split_total);
            }
            header.used = true;
            (block_addr + HEADER_SIZE as u64) as *mut u8
        }
    }

    unsafe fn dealloc(&self, ptr: *mut u8, _layout: Layout) {
        let mut state = HEAP.lock();
        let mut block_addr = ptr as u64 - HEADER_SIZE as u64;
        // SAFETY: `ptr` was handed out by `alloc` immediately after a
        // header of this exact layout.
        unsafe {
            let header = &mut *(block_addr as *mut BlockHeader);
            debug_assert_eq!(header.magic, MAGIC);
            header.used = false;
            let node = state.node_span(header.node);

            // Coalesce forward.
            let next_addr = block_addr + header.total_size as u64;
            if next_addr < node.end {
                let next = &*(next_addr as *const BlockHeader);
                if !next.used {
                    header.total_size += next.total_size;
                    state.fixup_next_prev(block_addr, header.total_size);
                }
            }
            // Coalesce backward.
            if header.prev_total_size != 0 {
                let prev_addr = block_addr - header.prev_total_size as u64;
                let prev = &*(prev_addr as *const BlockHeader);
                if !prev.used {
                    let merged_total = prev.total_size + header.total_size;
                    (*(prev_addr as *mut BlockHeader)).total_size = merged_total;
                    state.fixup_next_prev(prev_addr, merged_total);
                    block_addr = prev_addr;
                }
            }

            let header = &*(block_addr as *const BlockHeader);
            if block_addr == node.start && header.total_size as u64 == node.end - node.start {
                release_node(&mut state, header.node);
            }
        }
    }
}

/// Unmap and return every frame backing `node_number`'s pages. Caller
/// holds `state`'s lock and has verified the node is a single, fully-free
/// block.
unsafe fn release_node(state: &mut HeapState, node_number: u32) {
    let node = state.nodes[node_number as usize].take().unwrap();
    let mapper = PageMapper::current();
    let mut addr = node.start;
    while addr < node.end {
        mapper.unmap_page(addr);
        addr += FRAME_SIZE as u64;
    }
}

/// Bring the heap up: one node mapped and ready for the global allocator.
///
/// # Safety
///
/// Must be called once, after the frame allocator and the kernel's own
/// page tables are initialized, before any allocation-dependent code runs.
pub unsafe fn init() {
    let mut state = HEAP.lock();
    state.grow(INITIAL_GROWTH_PAGES).expect("kernel heap: initial growth failed");
    log::info!("heap: initialized ({} KiB)", INITIAL_GROWTH_PAGES * FRAME_SIZE / 1024);
}
