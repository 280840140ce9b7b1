//! # chainheap - A first-fit heap over anonymous memory mappings
//!
//! This crate manages its own heap out of pages mapped straight from the
//! kernel (`mmap` on unix, `VirtualAlloc` on windows), without going through
//! the system allocator at any point.
//!
//! Every block of the heap starts with a small header. Headers are linked
//! together in address order, so the whole heap is one chain that can be
//! walked from its first block:
//!
//! ```text
//! +--------+---------+--------+--------------+--------+------+
//! | Header |  used   | Header |     free     | Header | used | -> ...
//! +--------+---------+--------+--------------+--------+------+
//!     |                  ^  |                    ^
//!     +------------------+  +--------------------+
//! ```
//!
//! - **Allocation** looks for the first free block big enough (first-fit),
//!   splitting it when the leftover is worth keeping. Small free blocks met on
//!   the way are merged with the free blocks after them.
//! - **Growth** happens when nothing fits: a new region is mapped right after
//!   the last block and merged into it when the kernel lets us have that
//!   address.
//! - **Release** marks the block free and merges it with the free blocks
//!   that follow.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use chainheap::Heap;
//!
//! let mut heap = Heap::init(15000).unwrap();
//!
//! let ptr = heap.allocate(200);
//! assert!(!ptr.is_null());
//!
//! unsafe {
//!     ptr.write(42);
//!     heap.release(ptr);
//! }
//!
//! heap.debug_dump(&mut std::io::stdout()).unwrap();
//! ```
//!
//! ## Limitations
//!
//! - **Single owner**: a [`Heap`] is neither `Send` nor `Sync`.
//! - **No memory is ever unmapped**: free regions stay mapped until the
//!   process exits, even after the [`Heap`] is dropped.
//! - **Linear search**: there are no size classes nor free block index.
//! - **No misuse detection**: releasing a foreign pointer or releasing twice
//!   is undefined behavior.

mod block;
mod chain;
pub mod config;
mod error;
mod heap;
pub mod kernel;
mod region;
mod utils;

pub use chain::{BlockInfo, Blocks};
pub use config::HeapConfig;
pub use error::{HeapError, Result};
pub use heap::{Heap, HeapStats, MAX_REQUEST};
pub use kernel::{Kernel, Placement, PlatformMemory};

/// Bytes taken by the header in front of every block.
pub const BLOCK_HEADER_SIZE: usize = block::BLOCK_HEADER_SIZE;

/// Smallest capacity of a block.
pub const BLOCK_MIN_CAPACITY: usize = block::BLOCK_MIN_CAPACITY;
