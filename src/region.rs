use std::ptr::NonNull;

use log::{debug, warn};

use crate::{
    block::BlockHeader,
    kernel::{Placement, PlatformMemory},
    utils::round_pages,
};

/// A span of memory obtained in one mapping request. Regions are not tracked
/// once the heap has wrapped them in a block: this descriptor only lives long
/// enough to decide how the new block is linked into the chain.
///
/// [`libc::mmap`] gives us memory aligned with the computer page size, but we
/// cannot assume two requests land one after the other. We always ask for the
/// address right after the previous region first and fall back to any
/// address, so the chain may look like this:
///
/// ```text
///  extends = true                        extends = false
/// +----------------+----------------+   +~~~~~~~~~~~+   +----------------+
/// | Block -> Block | Block -> Block |-->|  foreign  |-->| Block -> Block |
/// +----------------+----------------+   +~~~~~~~~~~~+   +----------------+
///      region 1         region 2                            region 3
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Region {
    /// Start address of the region returned by the kernel.
    pub addr: NonNull<u8>,
    /// Size of the region, always a whole number of pages.
    pub size: usize,
    /// Whether the region starts exactly at the address we asked for.
    pub extends: bool,
}

/// Size of the region we map to hold `query` bytes.
pub(crate) fn region_actual_size(query: usize, page_size: usize, min_region_size: usize) -> usize {
    round_pages(query.max(min_region_size), page_size)
}

impl Region {
    /// Maps a new region and initializes it as one free block with no successor.
    ///
    /// We first try to place `exact_query` bytes at `addr`. If something else
    /// already lives there, we ask for `relocated_query` bytes anywhere. Both
    /// are rounded up to whole pages and to at least `min_region_size`.
    ///
    /// Returns `None` when the kernel could not give us memory at all, or
    /// handed out a region that does not start on a page boundary.
    pub(crate) fn alloc<P: PlatformMemory>(
        pages: &mut P,
        addr: usize,
        exact_query: usize,
        relocated_query: usize,
        min_region_size: usize,
    ) -> Option<Self> {
        let page_size = pages.page_size();

        let exact_size = region_actual_size(exact_query, page_size, min_region_size);

        let region = match pages.map_pages(addr, exact_size, Placement::Exact) {
            Some(region) => Self {
                addr: region,
                size: exact_size,
                extends: true,
            },
            None => {
                let relocated_size = region_actual_size(relocated_query, page_size, min_region_size);
                let region = pages.map_pages(addr, relocated_size, Placement::Anywhere)?;

                debug!("address {addr:#x} is taken, region relocated to {region:p}");

                Self {
                    addr: region,
                    size: relocated_size,
                    extends: region.as_ptr() as usize == addr,
                }
            }
        };

        if region.addr.as_ptr() as usize % page_size != 0 {
            warn!("refusing region at {:p}, not aligned to {page_size} bytes", region.addr);
            return None;
        }

        unsafe { BlockHeader::init(region.addr, region.size, None) };

        Some(region)
    }

    /// The free block that covers the whole region.
    #[inline]
    pub(crate) fn first_block(&self) -> NonNull<BlockHeader> {
        self.addr.cast()
    }
}
