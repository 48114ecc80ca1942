use super::free_list::FreeList;
use super::segment_map::{SegmentMap, FREE_SEGMENT};
use crate::util::constants::BYTES_IN_PAGE;
use crate::util::conversions;
use crate::util::memory::{self, CodeProtection};
use crate::util::Address;

use spin::Mutex;
use std::io::{Error, ErrorKind, Result};
use std::sync::atomic::{AtomicUsize, Ordering};

/// The header at the start of every block in the code heap, used or free.
#[repr(C)]
struct HeapBlockHeader {
    /// Length of the block in segments (including the header) shifted left by one, with the
    /// low bit set if the block is handed out.
    length_and_used: AtomicUsize,
    /// A word the owner of a used block publishes for lock-free readers. Zero until
    /// published.
    owner: AtomicUsize,
}

impl HeapBlockHeader {
    fn length(&self) -> usize {
        self.length_and_used.load(Ordering::Relaxed) >> 1
    }

    fn is_used(&self) -> bool {
        self.length_and_used.load(Ordering::Relaxed) & 1 == 1
    }
}

/// The bytes at the start of each block that are not part of the allocated space.
pub const HEAP_BLOCK_HEADER_SIZE: usize = std::mem::size_of::<HeapBlockHeader>();

const_assert!(HEAP_BLOCK_HEADER_SIZE <= 16);

struct CodeHeapSync {
    free_list: FreeList,
    /// Segments below this index have been handed out at least once.
    next_segment: usize,
}

/// A heap of executable memory. The address range is reserved when the heap is created
/// and committed page-wise from the low end as the heap grows. Space is handed out in
/// whole segments. Each block starts with a small header, and the free blocks are kept in
/// an address-ordered list that is searched best-fit.
///
/// Mutation is serialised by an internal lock. [`CodeHeap::contains`] and
/// [`CodeHeap::find_start`] take no lock and may run concurrently with mutation.
pub struct CodeHeap {
    low_boundary: Address,
    high_boundary: Address,
    /// End of the committed part of the range.
    high: AtomicUsize,
    log_segment_size: usize,
    min_block_length: usize,
    exec: bool,
    protection: CodeProtection,
    segment_map: SegmentMap,
    sync: Mutex<CodeHeapSync>,
}

impl CodeHeap {
    /// Reserve `reserved_size` bytes and commit the first `committed_size` bytes of them.
    /// Both are rounded up to whole pages.
    pub fn new(
        reserved_size: usize,
        committed_size: usize,
        segment_size: usize,
        min_block_length: usize,
        exec: bool,
    ) -> Result<Self> {
        if !segment_size.is_power_of_two() || segment_size < HEAP_BLOCK_HEADER_SIZE {
            return Err(Error::new(
                ErrorKind::InvalidInput,
                format!("invalid code heap segment size {}", segment_size),
            ));
        }
        let reserved_size = conversions::page_align_up_size(reserved_size);
        let committed_size = conversions::page_align_up_size(committed_size).min(reserved_size);
        if reserved_size == 0 {
            return Err(Error::new(
                ErrorKind::InvalidInput,
                "code heap reservation is empty",
            ));
        }

        let low_boundary = memory::reserve(reserved_size)?;
        let protection = match memory::commit(low_boundary, committed_size, exec) {
            Ok(p) => p,
            Err(e) => {
                if let Err(release_err) = memory::release(low_boundary, reserved_size) {
                    warn!("Failed to release code heap reservation: {}", release_err);
                }
                return Err(e);
            }
        };
        info!(
            "Code heap reserved [{}, {}), committed {} ({:?})",
            low_boundary,
            low_boundary + reserved_size,
            conversions::bytes_to_formatted_string(committed_size),
            protection
        );

        Ok(CodeHeap {
            low_boundary,
            high_boundary: low_boundary + reserved_size,
            high: AtomicUsize::new((low_boundary + committed_size).as_usize()),
            log_segment_size: segment_size.trailing_zeros() as usize,
            min_block_length: min_block_length.max(1),
            exec,
            protection,
            segment_map: SegmentMap::new(reserved_size / segment_size),
            sync: Mutex::new(CodeHeapSync {
                free_list: FreeList::default(),
                next_segment: 0,
            }),
        })
    }

    pub fn segment_size(&self) -> usize {
        1 << self.log_segment_size
    }

    pub fn low_boundary(&self) -> Address {
        self.low_boundary
    }

    pub fn high_boundary(&self) -> Address {
        self.high_boundary
    }

    /// End of the committed memory.
    pub fn high(&self) -> Address {
        unsafe { Address::from_usize(self.high.load(Ordering::Acquire)) }
    }

    pub fn protection(&self) -> CodeProtection {
        self.protection
    }

    /// Is `addr` inside the committed part of the heap?
    pub fn contains(&self, addr: Address) -> bool {
        addr.is_in_range(self.low_boundary, self.high())
    }

    fn segment_for(&self, addr: Address) -> usize {
        (addr - self.low_boundary) >> self.log_segment_size
    }

    fn block_at(&self, segment: usize) -> Address {
        self.low_boundary + (segment << self.log_segment_size)
    }

    fn committed_segments(&self) -> usize {
        (self.high() - self.low_boundary) >> self.log_segment_size
    }

    fn segments_for(&self, size: usize) -> usize {
        conversions::size_to_units_up(size + HEAP_BLOCK_HEADER_SIZE, self.segment_size())
            .max(self.min_block_length)
    }

    fn header<'a>(block: Address) -> &'a HeapBlockHeader {
        unsafe { &*block.to_ptr::<HeapBlockHeader>() }
    }

    fn write_header(block: Address, length: usize, used: bool) {
        let header = Self::header(block);
        if used {
            header.owner.store(0, Ordering::Relaxed);
        }
        header
            .length_and_used
            .store((length << 1) | used as usize, Ordering::Relaxed);
    }

    /// Allocate at least `size` bytes. Returns the start of the allocated space, which is
    /// aligned to the word size, or `None` if the committed memory has no room.
    pub fn allocate(&self, size: usize) -> Option<Address> {
        let length = self.segments_for(size);
        let mut sync = self.sync.lock();

        let start = if let Some((block, remainder)) =
            sync.free_list.alloc(length, self.min_block_length)
        {
            if let Some(rest) = remainder {
                Self::write_header(self.block_at(rest.start), rest.length, false);
            }
            Self::write_header(self.block_at(block.start), block.length, true);
            self.segment_map.mark_used(block.start, block.length);
            block.start
        } else if sync.next_segment + length <= self.committed_segments() {
            let start = sync.next_segment;
            sync.next_segment += length;
            Self::write_header(self.block_at(start), length, true);
            self.segment_map.mark_used(start, length);
            start
        } else {
            return None;
        };

        let space = self.block_at(start) + HEAP_BLOCK_HEADER_SIZE;
        trace!("Code heap allocated {} bytes at {}", size, space);
        Some(space)
    }

    /// Return the block whose space starts at `addr` to the free list.
    pub fn deallocate(&self, addr: Address) {
        guarantee!(
            addr.is_in_range(self.low_boundary + HEAP_BLOCK_HEADER_SIZE, self.high()),
            "deallocating {} outside the code heap",
            addr
        );
        let block = addr - HEAP_BLOCK_HEADER_SIZE;
        guarantee!(
            block.is_aligned_to(self.segment_size()),
            "deallocating {} which is not the start of a block",
            addr
        );
        let segment = self.segment_for(block);
        let mut sync = self.sync.lock();
        let header = Self::header(block);
        guarantee!(
            header.is_used(),
            "double free of code heap block at {}",
            addr
        );
        guarantee!(
            header.owner.load(Ordering::Relaxed) == 0,
            "freeing code heap block at {} that is still published",
            addr
        );
        let length = header.length();
        guarantee!(
            segment + length <= sync.next_segment,
            "corrupt code heap block at {} (length {})",
            addr,
            length
        );

        self.segment_map.mark_free(segment, length);
        let merged = sync.free_list.free(segment, length);
        Self::write_header(self.block_at(merged.start), merged.length, false);

        // Give the top of the heap back to bump allocation.
        if let Some(last) = sync.free_list.last() {
            if last.end() == sync.next_segment {
                sync.free_list.pop_last();
                sync.next_segment = last.start;
            }
        }
        trace!("Code heap freed block at {}", addr);
    }

    /// Commit at least `size` more bytes, up to the reserved size. Returns false if the heap
    /// is already fully committed or the OS refused.
    pub fn expand_by(&self, size: usize) -> bool {
        let _sync = self.sync.lock();
        let high = self.high();
        if high >= self.high_boundary {
            return false;
        }
        let grow = conversions::page_align_up_size(size.max(BYTES_IN_PAGE));
        let new_high = (high + grow).min(self.high_boundary);
        match memory::commit(high, new_high - high, self.exec) {
            Ok(_) => {
                self.high.store(new_high.as_usize(), Ordering::Release);
                info!(
                    "Code heap expanded to {} of {}",
                    conversions::bytes_to_formatted_string(new_high - self.low_boundary),
                    conversions::bytes_to_formatted_string(self.max_capacity())
                );
                true
            }
            Err(e) => {
                warn!("Failed to expand code heap at {}: {}", high, e);
                false
            }
        }
    }

    /// The start of the allocated space of the used block containing `addr`. Takes no lock.
    /// Returns `None` for free space, block headers of free blocks, and addresses outside
    /// the heap.
    pub fn find_start(&self, addr: Address) -> Option<Address> {
        if !self.contains(addr) {
            return None;
        }
        let start = self.segment_map.find_block_start(self.segment_for(addr))?;
        let block = self.block_at(start);
        if !Self::header(block).is_used() {
            return None;
        }
        Some(block + HEAP_BLOCK_HEADER_SIZE)
    }

    /// Publish `word` for the used block whose space starts at `addr`. Readers that load
    /// the word with [`CodeHeap::owner`] see everything written before this call.
    pub fn set_owner(&self, addr: Address, word: usize) {
        Self::header(addr - HEAP_BLOCK_HEADER_SIZE)
            .owner
            .store(word, Ordering::Release);
    }

    /// The word published for the block whose space starts at `addr`, or zero.
    pub fn owner(&self, addr: Address) -> usize {
        Self::header(addr - HEAP_BLOCK_HEADER_SIZE)
            .owner
            .load(Ordering::Acquire)
    }

    /// The usable bytes of the block whose space starts at `addr`.
    pub fn allocated_size(&self, addr: Address) -> usize {
        let block = addr - HEAP_BLOCK_HEADER_SIZE;
        (Self::header(block).length() << self.log_segment_size) - HEAP_BLOCK_HEADER_SIZE
    }

    fn next_used_from(&self, mut segment: usize) -> Option<Address> {
        let sync = self.sync.lock();
        while segment < sync.next_segment {
            let block = self.block_at(segment);
            let header = Self::header(block);
            if header.is_used() {
                return Some(block + HEAP_BLOCK_HEADER_SIZE);
            }
            segment += header.length();
        }
        None
    }

    /// The first used block in address order.
    pub fn first(&self) -> Option<Address> {
        self.next_used_from(0)
    }

    /// The used block after the one whose space starts at `addr`, in address order.
    pub fn next(&self, addr: Address) -> Option<Address> {
        let block = addr - HEAP_BLOCK_HEADER_SIZE;
        let length = Self::header(block).length();
        self.next_used_from(self.segment_for(block) + length)
    }

    /// Iterate over the allocated space of all used blocks in address order.
    pub fn iter(&self) -> impl Iterator<Item = Address> + '_ {
        std::iter::successors(self.first(), move |addr| self.next(*addr))
    }

    /// Committed bytes.
    pub fn capacity(&self) -> usize {
        self.high() - self.low_boundary
    }

    /// Reserved bytes. The heap never grows beyond this.
    pub fn max_capacity(&self) -> usize {
        self.high_boundary - self.low_boundary
    }

    /// Bytes in used blocks, headers included.
    pub fn allocated_capacity(&self) -> usize {
        let sync = self.sync.lock();
        (sync.next_segment - sync.free_list.free_segments()) << self.log_segment_size
    }

    /// Committed bytes that are not in used blocks.
    pub fn unallocated_capacity(&self) -> usize {
        self.capacity() - self.allocated_capacity()
    }

    /// The largest request, in bytes of block, that can be satisfied without expanding.
    pub fn largest_free_block(&self) -> usize {
        let sync = self.sync.lock();
        let tail = self.committed_segments() - sync.next_segment;
        sync.free_list.largest().max(tail) << self.log_segment_size
    }

    /// Blocks on the free list. Free space above the high-water mark is not counted.
    pub fn free_block_count(&self) -> usize {
        self.sync.lock().free_list.len()
    }

    /// Check the block chain, the free list and the segment map against each other.
    /// Any inconsistency is fatal.
    pub fn verify(&self) {
        let sync = self.sync.lock();
        let free_blocks = sync.free_list.blocks();
        let mut free_index = 0;
        let mut free_segments = 0;
        let mut previous_free = false;
        let mut segment = 0;

        while segment < sync.next_segment {
            let block = self.block_at(segment);
            let header = Self::header(block);
            let length = header.length();
            guarantee!(length > 0, "zero-length code heap block at {}", block);
            guarantee!(
                segment + length <= sync.next_segment,
                "code heap block at {} runs past the high-water mark",
                block
            );
            if header.is_used() {
                for s in segment..segment + length {
                    guarantee!(
                        self.segment_map.find_block_start(s) == Some(segment),
                        "segment map broken for segment {} of block at {}",
                        s,
                        block
                    );
                }
                previous_free = false;
            } else {
                guarantee!(!previous_free, "uncoalesced free blocks at {}", block);
                guarantee!(
                    free_index < free_blocks.len()
                        && free_blocks[free_index].start == segment
                        && free_blocks[free_index].length == length,
                    "free block at {} is not on the free list",
                    block
                );
                for s in segment..segment + length {
                    guarantee!(
                        self.segment_map.get(s) == FREE_SEGMENT,
                        "free segment {} is marked used",
                        s
                    );
                }
                free_index += 1;
                free_segments += length;
                previous_free = true;
            }
            segment += length;
        }

        guarantee!(
            !previous_free,
            "free block at the top of the code heap below the high-water mark"
        );
        guarantee!(
            free_index == free_blocks.len(),
            "free list has {} blocks but {} were found",
            free_blocks.len(),
            free_index
        );
        guarantee!(
            free_segments == sync.free_list.free_segments(),
            "free list accounts {} segments but {} were found",
            sync.free_list.free_segments(),
            free_segments
        );
        for s in sync.next_segment..self.segment_map.len() {
            guarantee!(
                self.segment_map.get(s) == FREE_SEGMENT,
                "segment {} above the high-water mark is marked used",
                s
            );
        }
    }
}

impl Drop for CodeHeap {
    fn drop(&mut self) {
        if let Err(e) = memory::release(self.low_boundary, self.max_capacity()) {
            warn!("Failed to release code heap at {}: {}", self.low_boundary, e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::util::constants::BYTES_IN_KBYTE;
    use rand::Rng;

    fn heap() -> CodeHeap {
        CodeHeap::new(64 * BYTES_IN_KBYTE, 16 * BYTES_IN_KBYTE, 64, 1, false).unwrap()
    }

    #[test]
    fn allocate_does_not_overlap() {
        let heap = heap();
        let a = heap.allocate(100).unwrap();
        let b = heap.allocate(100).unwrap();
        assert!(a + heap.allocated_size(a) <= b - HEAP_BLOCK_HEADER_SIZE);
        assert_eq!(heap.allocated_size(a), 128 - HEAP_BLOCK_HEADER_SIZE);
        assert_eq!(heap.iter().collect::<Vec<_>>(), vec![a, b]);
        heap.verify();
    }

    #[test]
    fn find_start_inside_blocks() {
        let heap = heap();
        let a = heap.allocate(300).unwrap();
        let b = heap.allocate(40).unwrap();
        assert_eq!(heap.find_start(a), Some(a));
        assert_eq!(heap.find_start(a + 299usize), Some(a));
        assert_eq!(heap.find_start(b + 10usize), Some(b));
        assert_eq!(heap.find_start(b + 200usize), None);
        assert_eq!(heap.find_start(heap.high_boundary()), None);
        heap.deallocate(a);
        assert_eq!(heap.find_start(a + 10usize), None);
    }

    #[test]
    fn owner_word() {
        let heap = heap();
        let a = heap.allocate(64).unwrap();
        assert_eq!(heap.owner(a), 0);
        heap.set_owner(a, 0x1234);
        assert_eq!(heap.owner(a), 0x1234);
        heap.set_owner(a, 0);
        heap.deallocate(a);
        // a reused block starts unpublished
        let b = heap.allocate(64).unwrap();
        assert_eq!(b, a);
        assert_eq!(heap.owner(b), 0);
    }

    #[test]
    fn reuse_freed_space() {
        let heap = heap();
        let a = heap.allocate(1000).unwrap();
        let _b = heap.allocate(64).unwrap();
        heap.deallocate(a);
        assert_eq!(heap.free_block_count(), 1);
        // a smaller request is carved from the tail of the freed block
        let c = heap.allocate(200).unwrap();
        assert!(c > a && c < a + 1000usize);
        heap.verify();
    }

    #[test]
    fn free_top_lowers_high_water_mark() {
        let heap = heap();
        let before = heap.allocated_capacity();
        let a = heap.allocate(500).unwrap();
        let b = heap.allocate(500).unwrap();
        heap.deallocate(a);
        heap.deallocate(b);
        assert_eq!(heap.allocated_capacity(), before);
        assert_eq!(heap.free_block_count(), 0);
        assert_eq!(heap.first(), None);
        heap.verify();
    }

    #[test]
    fn exhaustion_and_expansion() {
        let heap = heap();
        assert!(heap.allocate(32 * BYTES_IN_KBYTE).is_none());
        assert!(heap.expand_by(32 * BYTES_IN_KBYTE));
        assert_eq!(heap.capacity(), 48 * BYTES_IN_KBYTE);
        assert!(heap.allocate(32 * BYTES_IN_KBYTE).is_some());
        assert!(heap.expand_by(1));
        assert!(heap.expand_by(1_000_000));
        assert_eq!(heap.capacity(), heap.max_capacity());
        assert!(!heap.expand_by(1));
        heap.verify();
    }

    #[test]
    #[should_panic]
    fn double_free_is_fatal() {
        let heap = heap();
        let a = heap.allocate(64).unwrap();
        let _b = heap.allocate(64).unwrap();
        heap.deallocate(a);
        heap.deallocate(a);
    }

    #[test]
    fn random_round_trip() {
        let heap = heap();
        let mut rng = rand::rng();
        let before = (heap.allocated_capacity(), heap.free_block_count());
        let mut live = vec![];
        for _ in 0..200 {
            if live.is_empty() || rng.random_bool(0.6) {
                if let Some(a) = heap.allocate(rng.random_range(1..600)) {
                    live.push(a);
                }
            } else {
                let i = rng.random_range(0..live.len());
                heap.deallocate(live.swap_remove(i));
            }
        }
        heap.verify();
        for a in live {
            heap.deallocate(a);
        }
        heap.verify();
        assert_eq!((heap.allocated_capacity(), heap.free_block_count()), before);
    }
}
