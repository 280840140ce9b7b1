use std::{fmt, marker::PhantomData, ptr::NonNull};

use crate::block::{BlockHeader, Link};

/// Outcome of walking the chain looking for a block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum BlockSearchResult {
    /// Free block with enough capacity, already split to the requested size.
    Found(NonNull<BlockHeader>),
    /// Nothing fits. Carries the last block of the chain so the heap can grow after it.
    ReachedEnd(NonNull<BlockHeader>),
    /// The chain has no first block.
    Corrupted,
}

/// Walks the chain from `start` and returns the first free block that can
/// hold `query` bytes (first-fit).
///
/// ```text
///             too small, merge and look again
///                  +---------+
///                  |         |
///                  v         |
/// +------+    +--------+    +--------+    +------+
/// | Used | -> |  Free  | -> |  Free  | -> | Used | -> ...
/// +------+    +--------+    +--------+    +------+
/// ```
///
/// A free block that is too small swallows its successor while they are
/// both free and adjacent, and it is checked again after every merge. Each
/// merge removes one block from the chain, so the loop always ends.
///
/// **SAFETY**: every block reachable from `start` must be a valid header and
/// `query` a multiple of the word size.
pub(crate) unsafe fn find_good_or_last(start: Link, query: usize) -> BlockSearchResult {
    let Some(mut current) = start else {
        return BlockSearchResult::Corrupted;
    };

    unsafe {
        loop {
            let block = current.as_ref();

            if block.is_free {
                if block.capacity >= query {
                    BlockHeader::split_if_too_big(current, query);
                    return BlockSearchResult::Found(current);
                }

                if BlockHeader::try_merge_with_next(current) {
                    continue;
                }
            }

            match current.as_ref().next {
                Some(next) => current = next,
                None => return BlockSearchResult::ReachedEnd(current),
            }
        }
    }
}

/// Snapshot of one block of the chain, as seen from outside the heap.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockInfo {
    /// Address of the block header.
    pub address: usize,
    /// Address returned to the user for this block.
    pub contents: usize,
    pub capacity: usize,
    pub is_free: bool,
    /// Address of the next block header, if any.
    pub next: Option<usize>,
}

impl fmt::Display for BlockInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let status = if self.is_free { "free" } else { "taken" };

        write!(f, "{:#14x} {:>12} {:>8}", self.address, self.capacity, status)?;

        match self.next {
            Some(next) => write!(f, " {next:#14x}"),
            None => write!(f, " {:>14}", "-"),
        }
    }
}

/// Read-only iterator over the chain. It never merges nor splits anything.
pub struct Blocks<'a> {
    current: Link,
    marker: PhantomData<&'a BlockHeader>,
}

impl<'a> Blocks<'a> {
    pub(crate) fn new(start: Link) -> Self {
        Self {
            current: start,
            marker: PhantomData,
        }
    }
}

impl<'a> Iterator for Blocks<'a> {
    type Item = BlockInfo;

    fn next(&mut self) -> Option<Self::Item> {
        let block = self.current?;

        unsafe {
            let header = block.as_ref();
            self.current = header.next;

            Some(BlockInfo {
                address: block.as_ptr() as usize,
                contents: BlockHeader::contents(block).as_ptr() as usize,
                capacity: header.capacity,
                is_free: header.is_free,
                next: header.next.map(|next| next.as_ptr() as usize),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::{BLOCK_HEADER_SIZE, BLOCK_MIN_CAPACITY, tests::Scratch};

    #[test]
    fn empty_chain_is_corrupted() {
        assert_eq!(unsafe { find_good_or_last(None, 64) }, BlockSearchResult::Corrupted);
    }

    #[test]
    fn first_fit_skips_used_and_small_blocks() {
        let mut scratch = Scratch::new();

        unsafe {
            let third = BlockHeader::init(scratch.at(512), 512, None);
            let mut second = BlockHeader::init(scratch.at(256), 256, Some(third));
            let mut first = BlockHeader::init(scratch.at(0), 256, Some(second));
            first.as_mut().is_free = false;
            // Free but not adjacent to anything free.
            second.as_mut().capacity = 64;

            let found = find_good_or_last(Some(first), 128);

            assert_eq!(found, BlockSearchResult::Found(third));
            assert_eq!(third.as_ref().capacity, 128);
            assert!(third.as_ref().next.is_some());
            assert_eq!(second.as_ref().capacity, 64);
        }
    }

    #[test]
    fn small_free_blocks_merge_before_giving_up() {
        let mut scratch = Scratch::new();

        unsafe {
            let third = BlockHeader::init(scratch.at(256), 256, None);
            let second = BlockHeader::init(scratch.at(128), 128, Some(third));
            let first = BlockHeader::init(scratch.at(0), 128, Some(second));

            // Too big to leave a remainder once the three blocks are merged.
            let query = 512 - BLOCK_HEADER_SIZE - BLOCK_MIN_CAPACITY;
            let found = find_good_or_last(Some(first), query);

            assert_eq!(found, BlockSearchResult::Found(first));
            assert_eq!(first.as_ref().capacity, 512 - BLOCK_HEADER_SIZE);
            assert!(first.as_ref().next.is_none());
        }
    }

    #[test]
    fn reached_end_returns_last_block() {
        let mut scratch = Scratch::new();

        unsafe {
            let mut second = BlockHeader::init(scratch.at(256), 256, None);
            let first = BlockHeader::init(scratch.at(0), 256, Some(second));
            second.as_mut().is_free = false;

            assert_eq!(find_good_or_last(Some(first), 512), BlockSearchResult::ReachedEnd(second));
        }
    }

    #[test]
    fn reached_end_after_merging_everything() {
        let mut scratch = Scratch::new();

        unsafe {
            let second = BlockHeader::init(scratch.at(256), 256, None);
            let first = BlockHeader::init(scratch.at(0), 256, Some(second));

            assert_eq!(find_good_or_last(Some(first), 1024), BlockSearchResult::ReachedEnd(first));
            assert_eq!(first.as_ref().capacity, 512 - BLOCK_HEADER_SIZE);
        }
    }

    #[test]
    fn iterator_follows_links_without_touching_them() {
        let mut scratch = Scratch::new();

        unsafe {
            let second = BlockHeader::init(scratch.at(256), 256, None);
            let first = BlockHeader::init(scratch.at(0), 256, Some(second));

            let blocks: Vec<BlockInfo> = Blocks::new(Some(first)).collect();

            assert_eq!(blocks.len(), 2);
            assert_eq!(blocks[0].address, first.as_ptr() as usize);
            assert_eq!(blocks[0].contents, first.as_ptr() as usize + BLOCK_HEADER_SIZE);
            assert_eq!(blocks[0].next, Some(second.as_ptr() as usize));
            assert_eq!(blocks[1].next, None);
            // Both are free and adjacent, still two blocks.
            assert_eq!(first.as_ref().next, Some(second));
        }
    }
}
