use thiserror::Error;

/// Errors reported by a [`crate::Heap`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum HeapError {
    /// The first region of the heap could not be mapped.
    #[error("could not map {len} bytes for the heap (preferred address {hint:#x})")]
    MapFailed { hint: usize, len: usize },

    /// No block fits the request and the kernel refused to grow the heap.
    #[error("out of memory: no room for {requested} bytes and the heap cannot grow")]
    OutOfMemory { requested: usize },

    /// The search started from an empty chain.
    #[error("block chain is corrupted")]
    Corrupted,

    /// The request cannot be represented once padded and given a header.
    #[error("requested size {0} is too large")]
    SizeOverflow(usize),
}

pub type Result<T> = core::result::Result<T, HeapError>;
