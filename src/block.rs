use std::{mem, ptr::NonNull};

use log::trace;

use crate::utils::WORD_SIZE;

/// Non-null pointer to the next [`BlockHeader`] of the chain, `None` for the last block.
pub(crate) type Link = Option<NonNull<BlockHeader>>;

/// Header size of a block. Contents start right after it, so the pointer
/// handed out to the user is always `header + BLOCK_HEADER_SIZE`.
pub(crate) const BLOCK_HEADER_SIZE: usize = mem::size_of::<BlockHeader>();

/// Smallest capacity a block can have. A split that would leave a remainder
/// smaller than this is refused and the whole block is handed out instead.
pub(crate) const BLOCK_MIN_CAPACITY: usize = 24;

const _: () = assert!(BLOCK_HEADER_SIZE % WORD_SIZE == 0);
const _: () = assert!(BLOCK_MIN_CAPACITY % WORD_SIZE == 0);

/// This is the structure of a block. The fields of the block are it's metadata,
/// content is placed after this header.
///
/// ```text
/// +---------------------+ <------+
/// |        next         |        |
/// +---------------------+        |
/// |      capacity       |        | -> Header
/// +---------------------+        |
/// |    is_free (1b)     |        |
/// +---------------------+ <------+
/// |       Content       |        |
/// |         ...         |        |
/// |         ...         |        | -> `capacity` addressable bytes
/// |         ...         |        |
/// +---------------------+ <------+
/// ```
///
/// Headers are never allocated on their own. They are written in place at the
/// start of a mapped region or right after the content of a block that is
/// being split, and they live there for as long as the heap does.
#[repr(C)]
pub(crate) struct BlockHeader {
    /// Next block of the chain.
    pub next: Link,
    /// Usable bytes after the header.
    pub capacity: usize,
    /// Flag to tell whether the block is free or not.
    pub is_free: bool,
}

/// Size of the whole block (header included) able to hold `capacity` bytes.
#[inline]
pub(crate) const fn size_from_capacity(capacity: usize) -> usize {
    capacity + BLOCK_HEADER_SIZE
}

/// Capacity left to the user in a block spanning `size` bytes.
/// `size` must be at least [`BLOCK_HEADER_SIZE`].
#[inline]
pub(crate) const fn capacity_from_size(size: usize) -> usize {
    size - BLOCK_HEADER_SIZE
}

impl BlockHeader {
    /// Writes a free header at `addr` covering `block_size` bytes and linked to `next`.
    ///
    /// **SAFETY**: `addr` must be word aligned and valid for writes of `block_size`
    /// bytes, which has to be at least [`BLOCK_HEADER_SIZE`].
    pub unsafe fn init(addr: NonNull<u8>, block_size: usize, next: Link) -> NonNull<Self> {
        let block = addr.cast::<Self>();

        unsafe {
            block.as_ptr().write(Self {
                next,
                capacity: capacity_from_size(block_size),
                is_free: true,
            });
        }

        block
    }

    /// Pointer to the first content byte of `block`.
    #[inline]
    pub fn contents(block: NonNull<Self>) -> NonNull<u8> {
        unsafe { block.cast::<u8>().add(BLOCK_HEADER_SIZE) }
    }

    /// Recovers the header of a block from the pointer given to the user.
    ///
    /// **SAFETY**: `contents` must come from [`BlockHeader::contents`].
    #[inline]
    pub unsafe fn from_contents(contents: NonNull<u8>) -> NonNull<Self> {
        unsafe { contents.sub(BLOCK_HEADER_SIZE).cast() }
    }

    /// Address of the first byte after the content of `block`.
    #[inline]
    pub unsafe fn end_address(block: NonNull<Self>) -> usize {
        unsafe { block.as_ptr() as usize + size_from_capacity(block.as_ref().capacity) }
    }

    /// Two blocks are continuous when `snd` starts exactly where `fst` ends.
    /// Blocks coming from regions that were not mapped one after the other
    /// are never continuous, even if they are linked together.
    #[inline]
    pub unsafe fn continuous(fst: NonNull<Self>, snd: NonNull<Self>) -> bool {
        unsafe { Self::end_address(fst) == snd.as_ptr() as usize }
    }

    #[inline]
    pub unsafe fn mergeable(fst: NonNull<Self>, snd: NonNull<Self>) -> bool {
        unsafe { fst.as_ref().is_free && snd.as_ref().is_free && Self::continuous(fst, snd) }
    }

    /// Absorbs the next block of the chain into `block` if both are free and
    /// physically adjacent. The absorbed header is just left behind as content.
    ///
    /// **SAFETY**: `block` and its successor must be valid headers.
    pub unsafe fn try_merge_with_next(mut block: NonNull<Self>) -> bool {
        unsafe {
            let Some(next) = block.as_ref().next else {
                return false;
            };

            if !Self::mergeable(block, next) {
                return false;
            }

            let (absorbed_capacity, absorbed_next) = {
                let absorbed = next.as_ref();
                (absorbed.capacity, absorbed.next)
            };

            let header = block.as_mut();
            header.capacity += size_from_capacity(absorbed_capacity);
            header.next = absorbed_next;
            let capacity = header.capacity;

            trace!("merged block {next:p} into {block:p}, capacity is now {capacity}");

            true
        }
    }

    /// A block can be split when, after giving `query` bytes away, there is
    /// still room for another header and [`BLOCK_MIN_CAPACITY`] bytes.
    #[inline]
    unsafe fn splittable(block: NonNull<Self>, query: usize) -> bool {
        let header = unsafe { block.as_ref() };
        header.is_free && query + BLOCK_HEADER_SIZE + BLOCK_MIN_CAPACITY <= header.capacity
    }

    /// Shrinks `block` to `query` bytes and writes a new free block with the
    /// remainder right after it.
    ///
    /// ```text
    /// Before:
    /// +--------+---------------------------------------------+
    /// | Header |                 capacity                    | -> next
    /// +--------+---------------------------------------------+
    ///
    /// After:
    /// +--------+---------+--------+--------------------------+
    /// | Header |  query  | Header |  capacity - query - hdr  | -> next
    /// +--------+---------+--------+--------------------------+
    ///     |                  ^
    ///     +------------------+
    /// ```
    ///
    /// The remainder is linked to the old `next` before `block` points to it,
    /// so the chain never has a dangling link.
    ///
    /// **SAFETY**: `block` must be a valid header and `query` a multiple of the word size.
    pub unsafe fn split_if_too_big(mut block: NonNull<Self>, query: usize) -> bool {
        let query = query.max(BLOCK_MIN_CAPACITY);

        unsafe {
            if !Self::splittable(block, query) {
                return false;
            }

            let (capacity, next) = {
                let header = block.as_ref();
                (header.capacity, header.next)
            };

            let remainder_size = size_from_capacity(capacity) - size_from_capacity(query);
            let remainder_addr = Self::contents(block).add(query);
            let remainder = Self::init(remainder_addr, remainder_size, next);

            let header = block.as_mut();
            header.capacity = query;
            header.next = Some(remainder);

            trace!(
                "split block {:p}: kept {} bytes, remainder {:p} has {} bytes",
                block,
                query,
                remainder,
                remainder.as_ref().capacity
            );
        }

        true
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use proptest::prelude::*;

    /// Small word aligned piece of memory to lay blocks over.
    #[repr(C, align(16))]
    pub(crate) struct Scratch(pub [u8; 1024]);

    impl Scratch {
        pub fn new() -> Box<Self> {
            Box::new(Scratch([0; 1024]))
        }

        pub fn at(&mut self, offset: usize) -> NonNull<u8> {
            NonNull::new(self.0[offset..].as_mut_ptr()).unwrap()
        }
    }

    proptest! {
        #[test]
        fn capacity_size_inverse(capacity in 0usize..(1 << 40)) {
            prop_assert_eq!(capacity_from_size(size_from_capacity(capacity)), capacity);
        }
    }

    #[test]
    fn init_writes_free_header() {
        let mut scratch = Scratch::new();

        unsafe {
            let block = BlockHeader::init(scratch.at(0), 512, None);

            assert!(block.as_ref().is_free);
            assert_eq!(block.as_ref().capacity, 512 - BLOCK_HEADER_SIZE);
            assert!(block.as_ref().next.is_none());
            assert_eq!(BlockHeader::end_address(block), scratch.at(512).as_ptr() as usize);
        }
    }

    #[test]
    fn contents_and_header_are_inverse() {
        let mut scratch = Scratch::new();

        unsafe {
            let block = BlockHeader::init(scratch.at(64), 128, None);
            let contents = BlockHeader::contents(block);

            assert_eq!(contents.as_ptr() as usize, block.as_ptr() as usize + BLOCK_HEADER_SIZE);
            assert_eq!(BlockHeader::from_contents(contents), block);
        }
    }

    #[test]
    fn split_leaves_free_remainder() {
        let mut scratch = Scratch::new();

        unsafe {
            let block = BlockHeader::init(scratch.at(0), 1024, None);
            let capacity = block.as_ref().capacity;

            assert!(BlockHeader::split_if_too_big(block, 200));

            let remainder = block.as_ref().next.unwrap();
            assert_eq!(block.as_ref().capacity, 200);
            assert_eq!(remainder.as_ref().capacity, capacity - 200 - BLOCK_HEADER_SIZE);
            assert!(remainder.as_ref().is_free);
            assert!(remainder.as_ref().next.is_none());
            assert!(BlockHeader::continuous(block, remainder));
            assert_eq!(BlockHeader::end_address(remainder), scratch.at(0).as_ptr() as usize + 1024);
        }
    }

    #[test]
    fn split_keeps_old_next() {
        let mut scratch = Scratch::new();

        unsafe {
            let tail = BlockHeader::init(scratch.at(512), 512, None);
            let block = BlockHeader::init(scratch.at(0), 512, Some(tail));

            assert!(BlockHeader::split_if_too_big(block, 64));

            let remainder = block.as_ref().next.unwrap();
            assert_eq!(remainder.as_ref().next, Some(tail));
            assert!(BlockHeader::continuous(remainder, tail));
        }
    }

    #[test]
    fn split_raises_small_queries_to_minimum() {
        let mut scratch = Scratch::new();

        unsafe {
            let block = BlockHeader::init(scratch.at(0), 256, None);

            assert!(BlockHeader::split_if_too_big(block, 8));
            assert_eq!(block.as_ref().capacity, BLOCK_MIN_CAPACITY);
        }
    }

    #[test]
    fn split_refused_when_remainder_too_small() {
        let mut scratch = Scratch::new();

        unsafe {
            let size = size_from_capacity(200 + BLOCK_HEADER_SIZE + BLOCK_MIN_CAPACITY - WORD_SIZE);
            let block = BlockHeader::init(scratch.at(0), size, None);
            let capacity = block.as_ref().capacity;

            assert!(!BlockHeader::split_if_too_big(block, 200));
            assert_eq!(block.as_ref().capacity, capacity);
            assert!(block.as_ref().next.is_none());

            // One more word is enough room for the remainder.
            let block = BlockHeader::init(scratch.at(0), size + WORD_SIZE, None);
            assert!(BlockHeader::split_if_too_big(block, 200));
            assert_eq!(block.as_ref().next.unwrap().as_ref().capacity, BLOCK_MIN_CAPACITY);
        }
    }

    #[test]
    fn used_block_is_not_split() {
        let mut scratch = Scratch::new();

        unsafe {
            let mut block = BlockHeader::init(scratch.at(0), 1024, None);
            block.as_mut().is_free = false;

            assert!(!BlockHeader::split_if_too_big(block, 64));
        }
    }

    #[test]
    fn merge_reclaims_header() {
        let mut scratch = Scratch::new();

        unsafe {
            let snd = BlockHeader::init(scratch.at(256), 256, None);
            let fst = BlockHeader::init(scratch.at(0), 256, Some(snd));

            assert!(BlockHeader::try_merge_with_next(fst));
            assert_eq!(fst.as_ref().capacity, 512 - BLOCK_HEADER_SIZE);
            assert!(fst.as_ref().next.is_none());
            assert!(!BlockHeader::try_merge_with_next(fst));
        }
    }

    #[test]
    fn merge_requires_both_free() {
        let mut scratch = Scratch::new();

        unsafe {
            let mut snd = BlockHeader::init(scratch.at(256), 256, None);
            let mut fst = BlockHeader::init(scratch.at(0), 256, Some(snd));

            snd.as_mut().is_free = false;
            assert!(!BlockHeader::try_merge_with_next(fst));

            snd.as_mut().is_free = true;
            fst.as_mut().is_free = false;
            assert!(!BlockHeader::try_merge_with_next(fst));
            assert_eq!(fst.as_ref().next, Some(snd));
        }
    }

    #[test]
    fn merge_requires_continuity() {
        let mut scratch = Scratch::new();

        unsafe {
            // Gap of 64 bytes between both blocks.
            let snd = BlockHeader::init(scratch.at(320), 256, None);
            let fst = BlockHeader::init(scratch.at(0), 256, Some(snd));

            assert!(!BlockHeader::continuous(fst, snd));
            assert!(!BlockHeader::try_merge_with_next(fst));
            assert_eq!(fst.as_ref().capacity, 256 - BLOCK_HEADER_SIZE);
        }
    }
}
