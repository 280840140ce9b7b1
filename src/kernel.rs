use std::ptr::NonNull;

/// Where a new mapping is allowed to land.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Placement {
    /// The mapping must start exactly at the requested address, or fail.
    Exact,
    /// The requested address is only a hint, any free address will do.
    Anywhere,
}

/// This trait provides an abstraction to handle low level memory operations
/// and syscalls. As the allocator, our top level view of this, has nothing
/// to do with the concrete implementations / APIs offered by each kernel.
///
/// Implementations must never replace an existing mapping when asked for
/// [`Placement::Exact`]: if something already lives at `addr`, they fail.
///
/// # Safety
///
/// The heap writes block headers into whatever [`PlatformMemory::map_pages`]
/// returns and hands those bytes out to callers. Every pointer it returns
/// must therefore:
///
/// - be aligned to [`PlatformMemory::page_size`],
/// - be valid for reads and writes of `len` bytes,
/// - not overlap any other mapping handed out before,
/// - stay mapped, and never be remapped, while any heap built on top of it
///   is still in use.
///
/// With [`Placement::Exact`] the pointer must be exactly `addr`.
///
/// A provider that forgets this cannot be written without `unsafe`:
///
/// ```compile_fail,E0200
/// use std::ptr::NonNull;
/// use chainheap::{Placement, PlatformMemory};
///
/// struct Dangling;
///
/// impl PlatformMemory for Dangling {
///     fn map_pages(&mut self, _: usize, _: usize, _: Placement) -> Option<NonNull<u8>> {
///         Some(NonNull::dangling())
///     }
///
///     fn page_size(&self) -> usize {
///         4096
///     }
/// }
/// ```
pub unsafe trait PlatformMemory {
    /// Request a memory region of `len` bytes starting at `addr` (see [`Placement`]).
    /// `len` is always a multiple of [`PlatformMemory::page_size`]. It returns a
    /// pointer to the mapped region or `None` if the underlying syscall fails.
    fn map_pages(&mut self, addr: usize, len: usize, placement: Placement) -> Option<NonNull<u8>>;

    /// Returns the virtual memory page size of the computer in bytes.
    fn page_size(&self) -> usize;
}

/// [`PlatformMemory`] backed by the operating system.
///
/// Memory mapped through the kernel is never given back: the heap owns it
/// until the process exits.
#[derive(Debug, Clone, Copy)]
pub struct Kernel {
    /// Virtual memory page size of the computer. This is usually 4096.
    page_size: usize,
}

impl Kernel {
    /// Create a new instance of the allocator's `Kernel`, asking the
    /// operating system for its page size.
    pub fn new() -> Self {
        Self { page_size: sys::page_size() }
    }
}

impl Default for Kernel {
    fn default() -> Self {
        Self::new()
    }
}

// SAFETY: fresh anonymous read-write mappings, page aligned by the kernel,
// never unmapped once returned. Exact placement is checked against `addr`.
unsafe impl PlatformMemory for Kernel {
    fn map_pages(&mut self, addr: usize, len: usize, placement: Placement) -> Option<NonNull<u8>> {
        let mapped = unsafe { sys::map_pages(addr, len, placement) };

        match mapped {
            Some(region) => log::debug!(
                "mapped {len} bytes at {region:p} (wanted {addr:#x}, {placement:?})"
            ),
            None => log::debug!("could not map {len} bytes at {addr:#x} ({placement:?})"),
        }

        mapped
    }

    #[inline]
    fn page_size(&self) -> usize {
        self.page_size
    }
}

#[cfg(unix)]
mod sys {
    use super::Placement;

    use libc::{mmap, munmap, off_t, size_t};

    use std::{
        os::raw::{c_int, c_void},
        ptr::NonNull,
    };

    #[cfg(target_os = "linux")]
    const FIXED_NOREPLACE: c_int = libc::MAP_FIXED_NOREPLACE;

    // Without MAP_FIXED_NOREPLACE the address is a hint and we check where
    // the mapping landed ourselves.
    #[cfg(not(target_os = "linux"))]
    const FIXED_NOREPLACE: c_int = 0;

    pub unsafe fn map_pages(addr: usize, len: usize, placement: Placement) -> Option<NonNull<u8>> {
        // Read-Write only memory.
        const PROT: c_int = libc::PROT_READ | libc::PROT_WRITE;
        const FD: c_int = -1;
        const OFFSET: off_t = 0;

        let flags = libc::MAP_PRIVATE
            | libc::MAP_ANONYMOUS
            | match placement {
                Placement::Exact => FIXED_NOREPLACE,
                Placement::Anywhere => 0,
            };

        unsafe {
            let mapped = mmap(addr as *mut c_void, len as size_t, PROT, flags, FD, OFFSET);

            if mapped == libc::MAP_FAILED {
                return None;
            }

            // Kernels older than 4.17 ignore MAP_FIXED_NOREPLACE.
            if placement == Placement::Exact && mapped as usize != addr {
                munmap(mapped, len as size_t);
                return None;
            }

            NonNull::new(mapped.cast::<u8>())
        }
    }

    pub fn page_size() -> usize {
        unsafe { libc::sysconf(libc::_SC_PAGESIZE) as usize }
    }
}

#[cfg(windows)]
mod sys {
    use std::{mem::MaybeUninit, os::raw::c_void, ptr::NonNull};

    use super::Placement;

    use windows::Win32::System::{Memory, SystemInformation};

    pub unsafe fn map_pages(addr: usize, len: usize, placement: Placement) -> Option<NonNull<u8>> {
        // Read-Write only.
        let protection = Memory::PAGE_READWRITE;

        let flags = Memory::MEM_RESERVE | Memory::MEM_COMMIT;

        let hint = match placement {
            Placement::Exact => Some(addr as *const c_void),
            Placement::Anywhere => None,
        };

        unsafe {
            let mapped = NonNull::new(Memory::VirtualAlloc(hint, len, flags, protection).cast::<u8>())?;

            // Reservations are rounded down to the allocation granularity.
            if placement == Placement::Exact && mapped.as_ptr() as usize != addr {
                if let Err(err) = Memory::VirtualFree(mapped.as_ptr().cast(), 0, Memory::MEM_RELEASE) {
                    log::debug!("could not release misplaced mapping at {mapped:p}: {err}");
                }
                return None;
            }

            Some(mapped)
        }
    }

    pub fn page_size() -> usize {
        unsafe {
            let mut system_info = MaybeUninit::uninit();
            SystemInformation::GetSystemInfo(system_info.as_mut_ptr());

            system_info.assume_init().dwPageSize as usize
        }
    }
}
