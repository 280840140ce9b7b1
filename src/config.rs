/// Address the first region of a heap is mapped at when nothing else is there.
pub const HEAP_START: usize = 0x0404_0000;

/// Smallest region we ever ask the kernel for.
pub const REGION_MIN_SIZE: usize = 2 * 4096;

/// Knobs of a [`crate::Heap`].
///
/// ```
/// use chainheap::HeapConfig;
///
/// let config = HeapConfig::new()
///     .with_base_address(0x1000_0000)
///     .with_min_region_size(64 * 1024);
///
/// assert_eq!(config.base_address, 0x1000_0000);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeapConfig {
    /// Preferred address of the first region. If it is taken, the kernel
    /// places the heap somewhere else.
    pub base_address: usize,
    /// Every region is at least this big, even for tiny requests. It is
    /// rounded up to whole pages together with the request.
    pub min_region_size: usize,
}

impl HeapConfig {
    pub const fn new() -> Self {
        Self {
            base_address: HEAP_START,
            min_region_size: REGION_MIN_SIZE,
        }
    }

    pub const fn with_base_address(mut self, base_address: usize) -> Self {
        self.base_address = base_address;
        self
    }

    pub const fn with_min_region_size(mut self, min_region_size: usize) -> Self {
        self.min_region_size = min_region_size;
        self
    }
}

impl Default for HeapConfig {
    fn default() -> Self {
        Self::new()
    }
}
