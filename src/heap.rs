//! First-fit heap allocator over a fixed memory region.
//!
//! The region is tiled by blocks. Each block starts with a two-word header
//! holding its span (header included) and a tag saying whether it is live or
//! free; the payload follows the header. Because the blocks tile the region
//! exactly, the allocator can always walk them from the start, which is how
//! `free` proves that an address really is the base of a live block before
//! touching anything.
//!
//! Allocation picks the lowest-addressed free block that fits. Freeing merges
//! the block with free neighbours on both sides, so two free blocks are never
//! adjacent.
//!
//! The heap is single-writer. It does not mask interrupts itself: whoever owns
//! it (the kernel lock on target) must keep an exception from re-entering it
//! mid-operation.

use core::mem::size_of;
use core::ptr::NonNull;

use log::trace;
use static_assertions::const_assert_eq;

use crate::error::HeapError;

/// Payload addresses and block spans are multiples of this.
pub const ALIGNMENT: usize = 8;

#[repr(C)]
struct BlockHeader {
    span: usize,
    tag: usize,
}

/// Bytes of bookkeeping in front of every payload.
pub const BLOCK_OVERHEAD: usize = size_of::<BlockHeader>();

const MIN_PAYLOAD: usize = ALIGNMENT;
const MIN_SPAN: usize = BLOCK_OVERHEAD + MIN_PAYLOAD;

const TAG_FREE: usize = 0x4652_4545;
const TAG_LIVE: usize = 0x4C49_5645;

const_assert_eq!(BLOCK_OVERHEAD % ALIGNMENT, 0);

const fn align_up(n: usize) -> usize {
    (n + ALIGNMENT - 1) & !(ALIGNMENT - 1)
}

pub struct Heap {
    start: usize,
    size: usize,
}

/// One block as seen by [`Heap::blocks`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Block {
    /// Payload base.
    pub addr: usize,
    /// Payload capacity, which may exceed what was requested.
    pub size: usize,
    pub live: bool,
}

impl Block {
    pub fn span(&self) -> usize {
        self.size + BLOCK_OVERHEAD
    }

    pub fn end(&self) -> usize {
        self.addr + self.size
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct HeapStats {
    /// Bytes managed, headers included.
    pub total: usize,
    /// Spans of live blocks.
    pub used: usize,
    /// Spans of free blocks.
    pub free: usize,
    pub live_blocks: usize,
    pub free_blocks: usize,
    /// Largest payload a single allocation could currently get.
    pub largest_free: usize,
}

impl Heap {
    /// Create an empty heap. Call [`init`](Self::init) before use.
    pub const fn empty() -> Heap {
        Heap { start: 0, size: 0 }
    }

    /// Hand the region `[start, start + size)` to the heap.
    ///
    /// `start` is rounded up and `size` down to [`ALIGNMENT`].
    ///
    /// # Safety
    ///
    /// Call this exactly once. The region must be valid, writable memory that
    /// nothing else uses for as long as the heap lives.
    pub unsafe fn init(&mut self, start: usize, size: usize) {
        debug_assert!(!self.is_initialized(), "heap initialized twice");
        let aligned = align_up(start);
        let size = size.saturating_sub(aligned - start) & !(ALIGNMENT - 1);
        debug_assert!(size >= MIN_SPAN, "heap region too small");
        if size < MIN_SPAN {
            return;
        }
        self.start = aligned;
        self.size = size;
        self.write_header(0, size, TAG_FREE);
    }

    pub fn is_initialized(&self) -> bool {
        self.size != 0
    }

    /// First byte of the managed region.
    pub fn start(&self) -> usize {
        self.start
    }

    /// Bytes managed, after alignment.
    pub fn size(&self) -> usize {
        self.size
    }

    pub fn contains(&self, addr: usize) -> bool {
        addr >= self.start && addr - self.start < self.size
    }

    /// Whether `[addr, addr + len)` touches the managed region at all.
    pub fn overlaps(&self, addr: usize, len: usize) -> bool {
        let end = addr.saturating_add(len);
        self.is_initialized() && addr < self.start + self.size && end > self.start
    }

    /// Whether `[addr, addr + len)` lies inside the payload of one live block.
    /// Headers and free blocks never qualify.
    pub fn in_live_payload(&self, addr: usize, len: usize) -> bool {
        let Some(end) = addr.checked_add(len) else {
            return false;
        };
        self.blocks()
            .any(|b| b.live && b.addr <= addr && end <= b.end())
    }

    /// Allocate at least `size` bytes, aligned to [`ALIGNMENT`].
    pub fn alloc(&mut self, size: usize) -> Result<NonNull<u8>, HeapError> {
        if !self.is_initialized() {
            return Err(HeapError::Uninitialized);
        }
        if size == 0 {
            return Err(HeapError::ZeroSize);
        }
        let oom = HeapError::OutOfMemory { requested: size };
        let need = size.checked_add(ALIGNMENT - 1).ok_or(oom)? & !(ALIGNMENT - 1);
        if need > self.size {
            return Err(oom);
        }

        let mut offset = 0;
        while offset < self.size {
            let (span, live) = self.read_header(offset)?;
            if !live && span - BLOCK_OVERHEAD >= need {
                let used = BLOCK_OVERHEAD + need;
                // SAFETY: both headers lie inside the block just validated.
                unsafe {
                    if span - used >= MIN_SPAN {
                        self.write_header(offset + used, span - used, TAG_FREE);
                        self.write_header(offset, used, TAG_LIVE);
                    } else {
                        self.write_header(offset, span, TAG_LIVE);
                    }
                }
                let addr = self.start + offset + BLOCK_OVERHEAD;
                trace!("alloc {} -> {:#x}", size, addr);
                return NonNull::new(addr as *mut u8).ok_or(HeapError::Corrupted(addr));
            }
            offset += span;
        }
        Err(oom)
    }

    /// Return the block whose payload starts at `addr`.
    ///
    /// Anything else is rejected without modifying the heap: addresses outside
    /// the region, addresses inside a block, and blocks that are already free.
    pub fn free(&mut self, addr: usize) -> Result<(), HeapError> {
        if !self.is_initialized() {
            return Err(HeapError::Uninitialized);
        }
        if addr < self.start + BLOCK_OVERHEAD || !self.contains(addr) {
            return Err(HeapError::Foreign(addr));
        }
        let target = addr - self.start - BLOCK_OVERHEAD;

        // Free predecessor, if the block right before the target is free.
        let mut prev: Option<(usize, usize)> = None;
        let mut offset = 0;
        let span = loop {
            if offset > target || offset >= self.size {
                return Err(HeapError::NotAllocated(addr));
            }
            let (span, live) = self.read_header(offset)?;
            if offset == target {
                if !live {
                    return Err(HeapError::AlreadyFree(addr));
                }
                break span;
            }
            prev = if live { None } else { Some((offset, span)) };
            offset += span;
        };

        let mut merged_offset = target;
        let mut merged_span = span;
        let next = target + span;
        if next < self.size {
            let (next_span, next_live) = self.read_header(next)?;
            if !next_live {
                merged_span += next_span;
            }
        }
        if let Some((prev_offset, prev_span)) = prev {
            merged_offset = prev_offset;
            merged_span += prev_span;
        }

        // SAFETY: the merged range is made of blocks validated above.
        unsafe { self.write_header(merged_offset, merged_span, TAG_FREE) };
        trace!("free {:#x}", addr);
        Ok(())
    }

    /// Walk the blocks in address order. Stops early at a corrupted header.
    pub fn blocks(&self) -> Blocks<'_> {
        Blocks {
            heap: self,
            offset: 0,
        }
    }

    pub fn stats(&self) -> HeapStats {
        let mut stats = HeapStats {
            total: self.size,
            ..HeapStats::default()
        };
        for block in self.blocks() {
            if block.live {
                stats.used += block.span();
                stats.live_blocks += 1;
            } else {
                stats.free += block.span();
                stats.free_blocks += 1;
                stats.largest_free = stats.largest_free.max(block.size);
            }
        }
        stats
    }

    /// Check that every header is intact, the blocks tile the region and no
    /// two free blocks are adjacent.
    pub fn verify(&self) -> Result<HeapStats, HeapError> {
        let mut offset = 0;
        let mut prev_free = false;
        while offset < self.size {
            let (span, live) = self.read_header(offset)?;
            if !live && prev_free {
                return Err(HeapError::Corrupted(self.start + offset));
            }
            prev_free = !live;
            offset += span;
        }
        Ok(self.stats())
    }

    fn read_header(&self, offset: usize) -> Result<(usize, bool), HeapError> {
        let corrupted = HeapError::Corrupted(self.start + offset);
        if offset % ALIGNMENT != 0 || self.size - offset < MIN_SPAN {
            return Err(corrupted);
        }
        // SAFETY: the header is aligned and lies inside the region.
        let header = unsafe { ((self.start + offset) as *const BlockHeader).read() };
        let live = match header.tag {
            TAG_FREE => false,
            TAG_LIVE => true,
            _ => return Err(corrupted),
        };
        if header.span < MIN_SPAN || header.span % ALIGNMENT != 0 || header.span > self.size - offset {
            return Err(corrupted);
        }
        Ok((header.span, live))
    }

    unsafe fn write_header(&mut self, offset: usize, span: usize, tag: usize) {
        ((self.start + offset) as *mut BlockHeader).write(BlockHeader { span, tag });
    }
}

pub struct Blocks<'a> {
    heap: &'a Heap,
    offset: usize,
}

impl Iterator for Blocks<'_> {
    type Item = Block;

    fn next(&mut self) -> Option<Block> {
        if self.offset >= self.heap.size {
            return None;
        }
        match self.heap.read_header(self.offset) {
            Ok((span, live)) => {
                let block = Block {
                    addr: self.heap.start + self.offset + BLOCK_OVERHEAD,
                    size: span - BLOCK_OVERHEAD,
                    live,
                };
                self.offset += span;
                Some(block)
            }
            Err(_) => {
                self.offset = self.heap.size;
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const WORDS: usize = 512; // 4 KiB

    fn heap_over(words: usize) -> (Vec<u64>, Heap) {
        let mut mem = vec![0u64; words];
        let mut heap = Heap::empty();
        unsafe { heap.init(mem.as_mut_ptr() as usize, words * 8) };
        (mem, heap)
    }

    fn addr(ptr: NonNull<u8>) -> usize {
        ptr.as_ptr() as usize
    }

    #[test]
    fn live_payload_excludes_headers_and_free_space() {
        let (_mem, mut heap) = heap_over(WORDS);
        let a = addr(heap.alloc(64).unwrap());
        let end = heap.start() + heap.size();

        assert!(heap.in_live_payload(a, 64));
        assert!(heap.in_live_payload(a + 8, 16));
        assert!(!heap.in_live_payload(a - BLOCK_OVERHEAD, 16));
        assert!(!heap.in_live_payload(a, 65));
        assert!(!heap.in_live_payload(a + 64 + BLOCK_OVERHEAD, 8));

        assert!(heap.overlaps(a - BLOCK_OVERHEAD, 1));
        assert!(heap.overlaps(heap.start() - 4, 8));
        assert!(!heap.overlaps(heap.start() - 8, 8));
        assert!(!heap.overlaps(end, 16));

        heap.free(a).unwrap();
        assert!(!heap.in_live_payload(a, 8));
    }

    #[test]
    fn init_creates_one_free_block() {
        let (_mem, heap) = heap_over(WORDS);
        let blocks: Vec<_> = heap.blocks().collect();
        assert_eq!(
            blocks,
            vec![Block {
                addr: heap.start() + BLOCK_OVERHEAD,
                size: WORDS * 8 - BLOCK_OVERHEAD,
                live: false,
            }]
        );
        let stats = heap.verify().unwrap();
        assert_eq!(stats.free, heap.size());
        assert_eq!(stats.used, 0);
    }

    #[test]
    fn init_aligns_the_region() {
        let mut mem = vec![0u64; WORDS];
        let mut heap = Heap::empty();
        unsafe { heap.init(mem.as_mut_ptr() as usize + 3, WORDS * 8 - 3) };
        assert_eq!(heap.start() % ALIGNMENT, 0);
        assert_eq!(heap.start(), mem.as_ptr() as usize + 8);
        assert_eq!(heap.size(), WORDS * 8 - 8);
    }

    #[test]
    fn uninitialized_heap_refuses_requests() {
        let mut heap = Heap::empty();
        assert_eq!(heap.alloc(16), Err(HeapError::Uninitialized));
        assert_eq!(heap.free(0x1000), Err(HeapError::Uninitialized));
    }

    #[test]
    fn alloc_rounds_up_and_splits() {
        let (_mem, mut heap) = heap_over(WORDS);
        let a = addr(heap.alloc(10).unwrap());
        assert_eq!(a, heap.start() + BLOCK_OVERHEAD);
        assert_eq!(a % ALIGNMENT, 0);

        let blocks: Vec<_> = heap.blocks().collect();
        assert_eq!(blocks.len(), 2);
        assert_eq!(blocks[0], Block { addr: a, size: 16, live: true });
        assert!(!blocks[1].live);
        assert_eq!(blocks[1].addr, a + 16 + BLOCK_OVERHEAD);
    }

    #[test]
    fn zero_size_is_rejected() {
        let (_mem, mut heap) = heap_over(WORDS);
        let before = heap.stats();
        assert_eq!(heap.alloc(0), Err(HeapError::ZeroSize));
        assert_eq!(heap.stats(), before);
    }

    #[test]
    fn first_fit_reuses_the_lowest_hole() {
        let (_mem, mut heap) = heap_over(WORDS);
        let a = addr(heap.alloc(32).unwrap());
        let b = addr(heap.alloc(32).unwrap());
        let c = addr(heap.alloc(32).unwrap());
        assert!(a < b && b < c);

        heap.free(a).unwrap();
        heap.free(c).unwrap();
        assert_eq!(addr(heap.alloc(16).unwrap()), a);
        // The rest of a's hole is too small for 32 bytes, so c's hole is next.
        assert_eq!(addr(heap.alloc(32).unwrap()), c);
    }

    #[test]
    fn small_remainder_stays_with_the_block() {
        let (_mem, mut heap) = heap_over(WORDS);
        let payload = heap.size() - BLOCK_OVERHEAD;
        // Leaves exactly one header's worth, which cannot hold a block.
        let a = addr(heap.alloc(payload - BLOCK_OVERHEAD).unwrap());
        let blocks: Vec<_> = heap.blocks().collect();
        assert_eq!(blocks, vec![Block { addr: a, size: payload, live: true }]);
        assert_eq!(heap.alloc(1), Err(HeapError::OutOfMemory { requested: 1 }));
    }

    #[test]
    fn double_free_is_reported_and_harmless() {
        let (_mem, mut heap) = heap_over(WORDS);
        let a = addr(heap.alloc(64).unwrap());
        let b = addr(heap.alloc(64).unwrap());

        heap.free(a).unwrap();
        let after_first = heap.stats();
        assert_eq!(heap.free(a), Err(HeapError::AlreadyFree(a)));
        assert_eq!(heap.free(a), Err(HeapError::AlreadyFree(a)));
        assert_eq!(heap.stats(), after_first);

        heap.free(b).unwrap();
        // b was merged into a's block, so it is no longer a block base.
        assert_eq!(heap.free(b), Err(HeapError::NotAllocated(b)));
        assert_eq!(heap.verify().unwrap().live_blocks, 0);
    }

    #[test]
    fn addresses_that_are_not_block_bases_are_rejected() {
        let (_mem, mut heap) = heap_over(WORDS);
        let a = addr(heap.alloc(64).unwrap());
        let before = heap.stats();

        assert_eq!(heap.free(a + 8), Err(HeapError::NotAllocated(a + 8)));
        assert_eq!(heap.free(a + 3), Err(HeapError::NotAllocated(a + 3)));
        assert_eq!(heap.free(heap.start()), Err(HeapError::Foreign(heap.start())));
        let past_end = heap.start() + heap.size() + 8;
        assert_eq!(heap.free(past_end), Err(HeapError::Foreign(past_end)));
        assert_eq!(heap.free(16), Err(HeapError::Foreign(16)));

        assert_eq!(heap.stats(), before);
        heap.free(a).unwrap();
    }

    #[test]
    fn oversized_requests_fail_cleanly() {
        let (_mem, mut heap) = heap_over(WORDS);
        let before = heap.stats();
        let too_big = heap.size() + 1;
        assert_eq!(heap.alloc(too_big), Err(HeapError::OutOfMemory { requested: too_big }));
        assert_eq!(
            heap.alloc(usize::MAX),
            Err(HeapError::OutOfMemory { requested: usize::MAX })
        );
        assert_eq!(heap.stats(), before);
    }

    #[test]
    fn exhaustion_then_recovery() {
        let (_mem, mut heap) = heap_over(WORDS);
        let mut live = Vec::new();
        while let Ok(ptr) = heap.alloc(64) {
            live.push(addr(ptr));
        }
        assert!(live.len() > 10);
        assert_eq!(heap.alloc(64), Err(HeapError::OutOfMemory { requested: 64 }));

        let victim = live[live.len() / 2];
        heap.free(victim).unwrap();
        assert_eq!(addr(heap.alloc(64).unwrap()), victim);
    }

    #[test]
    fn freeing_everything_coalesces_back_to_one_block() {
        let (_mem, mut heap) = heap_over(WORDS);
        let a = addr(heap.alloc(40).unwrap());
        let b = addr(heap.alloc(8).unwrap());
        let c = addr(heap.alloc(200).unwrap());

        heap.free(b).unwrap();
        heap.free(a).unwrap();
        heap.free(c).unwrap();

        let stats = heap.verify().unwrap();
        assert_eq!(stats.free_blocks, 1);
        assert_eq!(stats.largest_free, heap.size() - BLOCK_OVERHEAD);
    }

    #[test]
    fn corrupted_header_stops_the_walk() {
        let (_mem, mut heap) = heap_over(WORDS);
        let a = addr(heap.alloc(16).unwrap());
        let b = addr(heap.alloc(16).unwrap());
        // Smash b's tag as an overrunning write into a would.
        let tag = (b - BLOCK_OVERHEAD + size_of::<usize>()) as *mut usize;
        unsafe { tag.write(0xDEAD_BEEF) };

        let corrupted = HeapError::Corrupted(b - BLOCK_OVERHEAD);
        assert_eq!(heap.alloc(64), Err(corrupted));
        assert_eq!(heap.free(b), Err(corrupted));
        assert_eq!(heap.verify(), Err(corrupted));
        assert_eq!(heap.blocks().count(), 1);
        // Freeing a must read b's header to coalesce, so it fails too.
        assert_eq!(heap.free(a), Err(corrupted));
    }

    struct XorShift(u32);

    impl XorShift {
        fn next(&mut self) -> u32 {
            let mut x = self.0;
            x ^= x << 13;
            x ^= x >> 17;
            x ^= x << 5;
            self.0 = x;
            x
        }
    }

    #[test]
    fn random_workload_keeps_blocks_disjoint_and_conserved() {
        let (_mem, mut heap) = heap_over(WORDS * 4);
        let mut rng = XorShift(0x1234_5678);
        let mut live: Vec<(usize, usize, u8)> = Vec::new();

        for step in 0..4000u32 {
            let do_alloc = live.is_empty() || rng.next() % 3 != 0;
            if do_alloc {
                let size = (rng.next() % 300 + 1) as usize;
                if let Ok(ptr) = heap.alloc(size) {
                    let fill = step as u8;
                    unsafe { core::ptr::write_bytes(ptr.as_ptr(), fill, size) };
                    live.push((addr(ptr), size, fill));
                }
            } else {
                let (a, size, fill) = live.swap_remove(rng.next() as usize % live.len());
                let bytes = unsafe { core::slice::from_raw_parts(a as *const u8, size) };
                assert!(bytes.iter().all(|&b| b == fill), "block at {a:#x} was overwritten");
                heap.free(a).unwrap();
                assert!(heap.free(a).is_err());
            }

            let stats = heap.verify().unwrap();
            assert_eq!(stats.used + stats.free, heap.size());
            assert_eq!(stats.live_blocks, live.len());

            let blocks: Vec<_> = heap.blocks().collect();
            for pair in blocks.windows(2) {
                assert_eq!(pair[0].end() + BLOCK_OVERHEAD, pair[1].addr);
            }
            for &(a, size, _) in &live {
                let block = blocks.iter().find(|b| b.addr == a).unwrap();
                assert!(block.live && block.size >= size);
            }
        }
    }
}
