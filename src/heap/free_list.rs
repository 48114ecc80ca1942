/// A run of free segments.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub(crate) struct FreeBlock {
    pub start: usize,
    pub length: usize,
}

impl FreeBlock {
    pub fn end(&self) -> usize {
        self.start + self.length
    }
}

/// Free segments below the heap's high-water mark, kept sorted by address and fully
/// coalesced (no two blocks touch).
///
/// FreeList instances are not thread-safe. The code heap keeps its list behind a lock.
#[derive(Default, Debug)]
pub(crate) struct FreeList {
    blocks: Vec<FreeBlock>,
    free_segments: usize,
}

impl FreeList {
    pub fn blocks(&self) -> &[FreeBlock] {
        &self.blocks
    }

    pub fn free_segments(&self) -> usize {
        self.free_segments
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn largest(&self) -> usize {
        self.blocks.iter().map(|b| b.length).max().unwrap_or(0)
    }

    pub fn last(&self) -> Option<FreeBlock> {
        self.blocks.last().copied()
    }

    /// Take `length` segments from the smallest block that fits. A remainder of at least
    /// `min_block_length` segments stays on the list as the front of the block and the tail
    /// is handed out; a smaller remainder is handed out with the request.
    ///
    /// Returns the allocated run, or `None` if no block is large enough. If a remainder stays
    /// free it is returned as well, so the caller can rewrite its header.
    pub fn alloc(
        &mut self,
        length: usize,
        min_block_length: usize,
    ) -> Option<(FreeBlock, Option<FreeBlock>)> {
        let (index, _) = self
            .blocks
            .iter()
            .enumerate()
            .filter(|(_, b)| b.length >= length)
            .min_by_key(|(_, b)| b.length)?;

        let block = self.blocks[index];
        if block.length - length < min_block_length {
            self.blocks.remove(index);
            self.free_segments -= block.length;
            Some((block, None))
        } else {
            let remainder = FreeBlock {
                start: block.start,
                length: block.length - length,
            };
            self.blocks[index] = remainder;
            self.free_segments -= length;
            Some((
                FreeBlock {
                    start: remainder.end(),
                    length,
                },
                Some(remainder),
            ))
        }
    }

    /// Return a run to the list, merging it with free neighbours. Returns the merged block.
    pub fn free(&mut self, start: usize, length: usize) -> FreeBlock {
        let index = self.blocks.partition_point(|b| b.start < start);
        debug_assert!(index == self.blocks.len() || self.blocks[index].start >= start + length);
        debug_assert!(index == 0 || self.blocks[index - 1].end() <= start);
        self.free_segments += length;

        let mut merged = FreeBlock { start, length };
        let merge_right = index < self.blocks.len() && self.blocks[index].start == merged.end();
        let merge_left = index > 0 && self.blocks[index - 1].end() == merged.start;

        if merge_right {
            merged.length += self.blocks[index].length;
            self.blocks.remove(index);
        }
        if merge_left {
            let left = &mut self.blocks[index - 1];
            left.length += merged.length;
            *left
        } else {
            self.blocks.insert(index, merged);
            merged
        }
    }

    /// Remove the last block. Used when it touches the high-water mark.
    pub fn pop_last(&mut self) -> Option<FreeBlock> {
        let last = self.blocks.pop()?;
        self.free_segments -= last.length;
        Some(last)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn best_fit_and_split() {
        let mut list = FreeList::default();
        list.free(0, 10);
        list.free(20, 4);
        list.free(40, 6);
        assert_eq!(list.free_segments(), 20);

        // smallest block that fits 5 is the one at 40
        let (got, rest) = list.alloc(5, 2).unwrap();
        // remainder of 1 is below the minimum, so the whole block goes
        assert_eq!(got, FreeBlock { start: 40, length: 6 });
        assert_eq!(rest, None);

        let (got, rest) = list.alloc(3, 1).unwrap();
        assert_eq!(got, FreeBlock { start: 21, length: 3 });
        assert_eq!(rest, Some(FreeBlock { start: 20, length: 1 }));
        assert_eq!(list.free_segments(), 11);
        assert!(list.alloc(11, 1).is_none());
    }

    #[test]
    fn coalesce_both_sides() {
        let mut list = FreeList::default();
        list.free(0, 2);
        list.free(4, 2);
        assert_eq!(list.len(), 2);
        let merged = list.free(2, 2);
        assert_eq!(merged, FreeBlock { start: 0, length: 6 });
        assert_eq!(list.len(), 1);
        assert_eq!(list.largest(), 6);
        assert_eq!(list.pop_last(), Some(merged));
        assert_eq!(list.free_segments(), 0);
    }
}
