//! This file contains all the helper functions for the allocator.
//! This are functions that don't particularly belong to any concrete module of the program.

/// Machine word size. Every block capacity is a multiple of this so that the
/// headers carved out by splitting stay aligned.
pub(crate) const WORD_SIZE: usize = std::mem::size_of::<usize>();

/// It aligns `to_be_aligned` using `aligment`, which has to be a power of two.
///
/// This method is used to round requested capacities up to the machine word
/// and region sizes up to [`crate::kernel::PlatformMemory::page_size`].
pub(crate) fn align(to_be_aligned: usize, aligment: usize) -> usize {
    (to_be_aligned + aligment - 1) & !(aligment - 1)
}

/// Number of pages of `page_size` bytes needed to hold `mem` bytes.
pub(crate) fn pages_count(mem: usize, page_size: usize) -> usize {
    mem / page_size + usize::from(mem % page_size > 0)
}

/// Rounds `mem` up to a whole number of pages.
pub(crate) fn round_pages(mem: usize, page_size: usize) -> usize {
    page_size * pages_count(mem, page_size)
}
