//! The host memory allocator (AS): backs the shared-memory region every
//! buffer handle is built on top of.

use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum HostMemoryError {
    #[error("host allocator exhausted requesting {requested} bytes")]
    Exhausted { requested: u64 },
    #[error("mmap failed: {0}")]
    MapFailed(String),
}

pub type Result<T> = std::result::Result<T, HostMemoryError>;

/// One block returned by `hostMalloc`: a guest-visible mapping plus the
/// host physical offset a [`crate::HostChannel::bind_dma_directly`] call
/// needs to address it directly.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostBlock {
    pub guest_virtual_ptr: usize,
    pub host_physical_offset: u64,
    pub size: u64,
    pub fd: i32,
}

pub trait HostMemoryAllocator: Send + Sync {
    fn host_malloc(&self, size: u64) -> Result<HostBlock>;
    fn host_free(&self, block: &HostBlock) -> Result<()>;
    fn memory_map(&self, fd: i32, offset: u64, size: u64) -> Result<usize>;
    fn memory_unmap(&self, ptr: usize, size: u64) -> Result<()>;
}

#[cfg(target_os = "linux")]
pub use linux::MemfdHostMemoryAllocator;

/// A production [`HostMemoryAllocator`] backed by anonymous `memfd`-sealed
/// shared memory rather than a real host-side allocator pool: the Android
/// goldfish `goldfish_address_space` device has no portable equivalent, so a
/// `memfd` plus `mmap` stands in as the thing both the allocator and any
/// importing mapper can reach via a duplicated fd. `host_physical_offset`
/// is synthesized as a monotonically increasing counter rather than a real
/// physical address, matching the role `physAddrToOffset` plays for
/// `vgfx-mapper`: a stable per-block value DMA binding can key off of.
#[cfg(target_os = "linux")]
mod linux {
    use std::ffi::CString;
    use std::sync::atomic::{AtomicU64, Ordering};

    use super::{HostBlock, HostMemoryAllocator, HostMemoryError, Result};

    pub struct MemfdHostMemoryAllocator {
        next_offset: AtomicU64,
    }

    impl MemfdHostMemoryAllocator {
        pub fn new() -> Self {
            Self { next_offset: AtomicU64::new(0) }
        }
    }

    impl Default for MemfdHostMemoryAllocator {
        fn default() -> Self {
            Self::new()
        }
    }

    impl HostMemoryAllocator for MemfdHostMemoryAllocator {
        fn host_malloc(&self, size: u64) -> Result<HostBlock> {
            let name = CString::new("vgfx-buffer").unwrap();
            let fd = unsafe { libc::memfd_create(name.as_ptr(), libc::MFD_CLOEXEC) };
            if fd < 0 {
                return Err(HostMemoryError::Exhausted { requested: size });
            }
            if unsafe { libc::ftruncate(fd, size as libc::off_t) } != 0 {
                unsafe { libc::close(fd) };
                return Err(HostMemoryError::Exhausted { requested: size });
            }
            let ptr = unsafe {
                libc::mmap(
                    std::ptr::null_mut(),
                    size as libc::size_t,
                    libc::PROT_READ | libc::PROT_WRITE,
                    libc::MAP_SHARED,
                    fd,
                    0,
                )
            };
            if ptr == libc::MAP_FAILED {
                unsafe { libc::close(fd) };
                return Err(HostMemoryError::MapFailed("mmap failed".into()));
            }

            let offset = self.next_offset.fetch_add(size, Ordering::SeqCst);
            Ok(HostBlock { guest_virtual_ptr: ptr as usize, host_physical_offset: offset, size, fd })
        }

        fn host_free(&self, block: &HostBlock) -> Result<()> {
            let rc = unsafe { libc::munmap(block.guest_virtual_ptr as *mut libc::c_void, block.size as libc::size_t) };
            unsafe { libc::close(block.fd) };
            if rc != 0 {
                return Err(HostMemoryError::MapFailed("munmap failed".into()));
            }
            Ok(())
        }

        fn memory_map(&self, fd: i32, _offset: u64, size: u64) -> Result<usize> {
            // `offset` is `HostBlock::host_physical_offset`, a synthetic
            // address-space-wide counter used for `bind_dma_directly`, not
            // a real byte offset within `fd`: each `host_malloc` call here
            // creates its own dedicated memfd sized exactly to the block,
            // so the mapping always starts at the beginning of that fd.
            let ptr = unsafe {
                libc::mmap(
                    std::ptr::null_mut(),
                    size as libc::size_t,
                    libc::PROT_READ | libc::PROT_WRITE,
                    libc::MAP_SHARED,
                    fd,
                    0,
                )
            };
            if ptr == libc::MAP_FAILED {
                return Err(HostMemoryError::MapFailed(format!("mmap of fd {fd} failed")));
            }
            Ok(ptr as usize)
        }

        fn memory_unmap(&self, ptr: usize, size: u64) -> Result<()> {
            let rc = unsafe { libc::munmap(ptr as *mut libc::c_void, size as libc::size_t) };
            if rc != 0 {
                return Err(HostMemoryError::MapFailed("munmap failed".into()));
            }
            Ok(())
        }
    }
}
