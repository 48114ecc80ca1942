use std::sync::atomic::{AtomicU8, Ordering};

/// Map entry of a segment that is not part of a used block.
pub const FREE_SEGMENT: u8 = 0xFF;
/// The largest back-distance a single map entry records. Longer distances are walked in hops.
const MAX_HOP: usize = FREE_SEGMENT as usize - 1;

/// One byte per segment of the reserved range, so that the start of the block containing
/// any address can be found without taking a lock.
///
/// The first segment of a used block maps to 0. Each following segment maps to a
/// distance that leads back towards the block start; following the distances repeatedly
/// arrives at the first segment. Segments outside used blocks map to [`FREE_SEGMENT`].
///
/// Entries are written only by the heap while it holds its lock, after the block header.
/// Readers may race with writers and see a block half marked. The caller validates what it
/// finds at the returned start.
pub(crate) struct SegmentMap {
    map: Box<[AtomicU8]>,
}

impl SegmentMap {
    pub fn new(segments: usize) -> Self {
        SegmentMap {
            map: (0..segments).map(|_| AtomicU8::new(FREE_SEGMENT)).collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn mark_used(&self, start: usize, length: usize) {
        debug_assert!(start + length <= self.map.len());
        for i in 0..length {
            let value = if i == 0 { 0 } else { ((i - 1) % MAX_HOP + 1) as u8 };
            self.map[start + i].store(value, Ordering::Release);
        }
    }

    pub fn mark_free(&self, start: usize, length: usize) {
        debug_assert!(start + length <= self.map.len());
        for entry in &self.map[start..start + length] {
            entry.store(FREE_SEGMENT, Ordering::Release);
        }
    }

    pub fn get(&self, segment: usize) -> u8 {
        self.map[segment].load(Ordering::Acquire)
    }

    /// The first segment of the used block containing `segment`, or `None` if the segment
    /// is free (or was observed mid-update).
    pub fn find_block_start(&self, segment: usize) -> Option<usize> {
        if segment >= self.map.len() {
            return None;
        }
        let mut current = segment;
        loop {
            match self.get(current) {
                FREE_SEGMENT => return None,
                0 => return Some(current),
                hop => {
                    let hop = hop as usize;
                    if hop > current {
                        return None;
                    }
                    current -= hop;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_block() {
        let map = SegmentMap::new(16);
        map.mark_used(3, 4);
        assert_eq!(map.find_block_start(2), None);
        for seg in 3..7 {
            assert_eq!(map.find_block_start(seg), Some(3));
        }
        assert_eq!(map.find_block_start(7), None);
        assert_eq!(map.find_block_start(16), None);
    }

    #[test]
    fn long_block_hops() {
        let map = SegmentMap::new(1024);
        map.mark_used(10, 600);
        assert_eq!(map.get(10), 0);
        assert_eq!(map.get(11), 1);
        assert_eq!(map.get(10 + 254), 254);
        assert_eq!(map.get(10 + 255), 1);
        for seg in [10, 11, 263, 264, 265, 500, 609] {
            assert_eq!(map.find_block_start(seg), Some(10), "segment {}", seg);
        }
        map.mark_free(10, 600);
        assert_eq!(map.find_block_start(300), None);
    }
}
