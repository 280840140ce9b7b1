use std::{
    io::{self, Write},
    ptr::{self, NonNull},
};

use log::{debug, trace, warn};

use crate::{
    block::{BLOCK_MIN_CAPACITY, BlockHeader, size_from_capacity},
    chain::{BlockSearchResult, Blocks, find_good_or_last},
    config::HeapConfig,
    error::{HeapError, Result},
    kernel::{Kernel, PlatformMemory},
    region::{Region, region_actual_size},
    utils::{WORD_SIZE, align},
};

/// Biggest request we accept. Anything above cannot be padded, rounded to
/// pages and given a header without overflowing.
pub const MAX_REQUEST: usize = isize::MAX as usize / 2;

/// A heap built out of memory mapped directly from the kernel.
///
/// All the blocks of the heap, used or free, are kept in one singly linked
/// chain that starts at the first mapped region. Headers live inside the
/// mapped memory itself, so the heap needs no memory other than what it maps.
///
/// ```text
///   start
///     |
///     v
/// +--------+------+--------+-----------+--------+------+      +--------+-----------+
/// | Header | used | Header |   free    | Header | used | ---> | Header |   free    |
/// +--------+------+--------+-----------+--------+------+      +--------+-----------+
///             region 1 (first mapping)                        region 2 (grown)
/// ```
///
/// A `Heap` is neither `Send` nor `Sync`: it is meant to have exactly one
/// owner. Wrap it in a lock if several threads must share it.
///
/// Mapped memory is never given back to the kernel, not even when a whole
/// region becomes free or the `Heap` is dropped. Pointers handed out stay
/// valid until the process exits.
pub struct Heap<P: PlatformMemory = Kernel> {
    /// First block of the chain, at the start of the first region.
    start: NonNull<BlockHeader>,
    config: HeapConfig,
    pages: P,
}

/// Occupancy summary of a heap, computed by walking the chain.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HeapStats {
    pub blocks: usize,
    pub free_blocks: usize,
    /// Capacity of the blocks in use.
    pub used_bytes: usize,
    /// Capacity of the free blocks.
    pub free_bytes: usize,
}

impl Heap<Kernel> {
    /// Maps the first `initial_size` bytes (rounded up to pages) at
    /// [`crate::config::HEAP_START`], or anywhere if that address is taken.
    pub fn init(initial_size: usize) -> Result<Self> {
        Self::with_config(HeapConfig::default(), Kernel::new(), initial_size)
    }
}

impl<P: PlatformMemory> Heap<P> {
    /// Creates a heap that gets its memory from `pages`.
    pub fn with_config(config: HeapConfig, mut pages: P, initial_size: usize) -> Result<Self> {
        if initial_size > MAX_REQUEST {
            return Err(HeapError::SizeOverflow(initial_size));
        }

        let region = Region::alloc(
            &mut pages,
            config.base_address,
            initial_size,
            initial_size,
            config.min_region_size,
        )
        .ok_or_else(|| HeapError::MapFailed {
            hint: config.base_address,
            len: region_actual_size(initial_size, pages.page_size(), config.min_region_size),
        })?;

        debug!(
            "heap initialized at {:p} with {} bytes (preferred {:#x})",
            region.addr, region.size, config.base_address
        );

        Ok(Self {
            start: region.first_block(),
            config,
            pages,
        })
    }

    /// Address of the first block of the heap.
    pub fn start(&self) -> NonNull<u8> {
        self.start.cast()
    }

    pub fn config(&self) -> &HeapConfig {
        &self.config
    }

    /// Allocates `size` bytes, returning a null pointer when there is no memory left.
    ///
    /// The returned pointer is aligned to the machine word.
    pub fn allocate(&mut self, size: usize) -> *mut u8 {
        match self.try_allocate(size) {
            Ok(contents) => contents.as_ptr(),
            Err(err) => {
                warn!("allocation of {size} bytes failed: {err}");
                ptr::null_mut()
            }
        }
    }

    /// Same as [`Heap::allocate`] but tells why the allocation failed.
    ///
    /// First we look for a free block in the chain (see
    /// [`find_good_or_last`]). If none fits we grow the heap once after the
    /// last block and take the block growing produced.
    pub fn try_allocate(&mut self, size: usize) -> Result<NonNull<u8>> {
        if size > MAX_REQUEST {
            return Err(HeapError::SizeOverflow(size));
        }

        // Capacities are kept word aligned so split headers are aligned too.
        let query = align(size, WORD_SIZE).max(BLOCK_MIN_CAPACITY);

        let mut block = match unsafe { find_good_or_last(Some(self.start), query) } {
            BlockSearchResult::Found(block) => block,
            BlockSearchResult::ReachedEnd(last) => self
                .grow_heap(last, query)
                .ok_or(HeapError::OutOfMemory { requested: size })?,
            BlockSearchResult::Corrupted => return Err(HeapError::Corrupted),
        };

        unsafe { block.as_mut().is_free = false };

        let contents = BlockHeader::contents(block);
        trace!("allocated {size} bytes at {contents:p}");

        Ok(contents)
    }

    /// Gives the block of `contents` back to the heap and merges it with the
    /// free blocks that follow it. A null pointer is ignored.
    ///
    /// Only following blocks are merged here. A free block right before this
    /// one is merged the next time a search goes through it.
    ///
    /// **SAFETY**: `contents` must be null or a pointer returned by this heap's
    /// [`Heap::allocate`] that has not been released yet.
    pub unsafe fn release(&mut self, contents: *mut u8) {
        let Some(contents) = NonNull::new(contents) else {
            return;
        };

        unsafe {
            let mut block = BlockHeader::from_contents(contents);
            block.as_mut().is_free = true;

            while BlockHeader::try_merge_with_next(block) {}

            trace!("released {:p}, block now holds {} bytes", contents, block.as_ref().capacity);
        }
    }

    /// Maps a new region right after `last` and links it to the chain.
    ///
    /// If `last` is free we only need the bytes it is missing, as the new
    /// region will be merged into it. When the kernel puts the region
    /// somewhere else it must be big enough to hold the whole request by
    /// itself, since blocks of different regions are never merged.
    ///
    /// ```text
    /// Extended:
    /// +--------+------------+--------------------+
    /// |  last  | (if free)  |  new region  ....  |   merged into `last`
    /// +--------+------------+--------------------+
    ///
    /// Relocated:
    /// +--------+------------+   +~~~~~~~+   +--------------------+
    /// |  last  |            |-->|foreign|-->|  new region  .... |   `last.next`
    /// +--------+------------+   +~~~~~~~+   +--------------------+
    /// ```
    ///
    /// Returns the block, already split to `query` bytes, that the caller
    /// has to mark as used, or `None` if the kernel has no memory for us.
    fn grow_heap(&mut self, mut last: NonNull<BlockHeader>, query: usize) -> Option<NonNull<BlockHeader>> {
        let (last_free, hint) = unsafe {
            let header = last.as_ref();
            let free_capacity = if header.is_free { header.capacity } else { 0 };

            (free_capacity, BlockHeader::end_address(last))
        };

        // A free `last` only gets here when it is too small, so nothing is
        // really missing only if the chain was tampered with. Clamp anyway.
        let missing = query.saturating_sub(last_free);

        let Some(region) = Region::alloc(
            &mut self.pages,
            hint,
            size_from_capacity(missing),
            size_from_capacity(query),
            self.config.min_region_size,
        ) else {
            warn!("could not grow the heap by {missing} bytes after {hint:#x}");
            return None;
        };

        debug!(
            "heap grown by {} bytes at {:p} ({})",
            region.size,
            region.addr,
            if region.extends { "contiguous" } else { "relocated" }
        );

        unsafe {
            last.as_mut().next = Some(region.first_block());

            let block = if BlockHeader::try_merge_with_next(last) {
                last
            } else {
                region.first_block()
            };

            BlockHeader::split_if_too_big(block, query);

            Some(block)
        }
    }

    /// Iterates over every block of the chain, in chain order.
    pub fn blocks(&self) -> Blocks<'_> {
        Blocks::new(Some(self.start))
    }

    pub fn stats(&self) -> HeapStats {
        self.blocks().fold(HeapStats::default(), |mut stats, block| {
            stats.blocks += 1;

            if block.is_free {
                stats.free_blocks += 1;
                stats.free_bytes += block.capacity;
            } else {
                stats.used_bytes += block.capacity;
            }

            stats
        })
    }

    /// Writes one line per block of the chain to `out`. The heap is not modified.
    ///
    /// ```text
    ///  --- Heap 0x4040000 ---
    ///          start     capacity   status           next
    ///      0x4040000          200    taken      0x40400e0
    ///      0x40400e0        16136     free              -
    /// ```
    pub fn debug_dump<W: Write>(&self, out: &mut W) -> io::Result<()> {
        writeln!(out, " --- Heap {:p} ---", self.start)?;
        writeln!(out, "{:>14} {:>12} {:>8} {:>14}", "start", "capacity", "status", "next")?;

        for block in self.blocks() {
            writeln!(out, "{block}")?;
        }

        Ok(())
    }
}
