//! In-memory fakes for [`crate::HostChannel`], [`crate::HostMemoryAllocator`]
//! and [`crate::PipeClient`], used by `vgfx-allocator`'s and
//! `vgfx-mapper`'s own test suites in place of a real host connection.
//!
//! Each fake tracks open handles/fds so tests can assert a rolled-back
//! allocation batch leaked nothing.

use std::collections::HashMap;
use std::sync::atomic::{AtomicI32, AtomicU32, AtomicU64, Ordering};
use std::sync::Mutex;

use crate::channel::{FeatureInfo, HostChannel, HostChannelError};
use crate::memory::{HostBlock, HostMemoryAllocator, HostMemoryError};
use crate::pipe::{PipeClient, PipeError};

/// A host-channel fake that records every open color buffer and can be
/// told to fail the Nth `create_color_buffer_dma` call.
pub struct FakeHostChannel {
    next_handle: AtomicU32,
    open_buffers: Mutex<HashMap<u32, (u32, u32)>>,
    feature_info: FeatureInfo,
    fail_create_after: Option<u32>,
    create_calls: AtomicU32,
}

impl FakeHostChannel {
    pub fn new() -> Self {
        Self {
            next_handle: AtomicU32::new(1),
            open_buffers: Mutex::new(HashMap::new()),
            feature_info: FeatureInfo {
                has_shared_slots_host_memory_allocator: true,
                has_read_color_buffer_dma: true,
                has_yuv_cache: true,
            },
            fail_create_after: None,
            create_calls: AtomicU32::new(0),
        }
    }

    /// Causes the `n`th call (1-indexed) to `create_color_buffer_dma` to
    /// fail, simulating host exhaustion mid-batch.
    pub fn fail_nth_create(mut self, n: u32) -> Self {
        self.fail_create_after = Some(n);
        self
    }

    pub fn open_buffer_count(&self) -> usize {
        self.open_buffers.lock().unwrap().len()
    }
}

impl Default for FakeHostChannel {
    fn default() -> Self {
        Self::new()
    }
}

impl HostChannel for FakeHostChannel {
    fn feature_info(&self) -> FeatureInfo {
        self.feature_info
    }

    fn create_color_buffer_dma(
        &self,
        width: u32,
        height: u32,
        _rc_alloc_format: i32,
        _emu_fwk_format: i32,
    ) -> crate::channel::Result<u32> {
        let call_index = self.create_calls.fetch_add(1, Ordering::SeqCst) + 1;
        if self.fail_create_after == Some(call_index) {
            return Err(HostChannelError::Rejected("simulated host exhaustion".into()));
        }
        let handle = self.next_handle.fetch_add(1, Ordering::SeqCst);
        self.open_buffers.lock().unwrap().insert(handle, (width, height));
        Ok(handle)
    }

    fn close_color_buffer(&self, handle: u32) -> crate::channel::Result<()> {
        self.open_buffers
            .lock()
            .unwrap()
            .remove(&handle)
            .ok_or_else(|| HostChannelError::Rejected(format!("unknown color buffer {handle}")))?;
        Ok(())
    }

    fn color_buffer_cache_flush(&self, _handle: u32) -> crate::channel::Result<i32> {
        Ok(0)
    }

    fn read_color_buffer_yuv(
        &self,
        _handle: u32,
        _width: u32,
        _height: u32,
        _dst: &mut [u8],
    ) -> crate::channel::Result<()> {
        Ok(())
    }

    fn read_color_buffer_dma(
        &self,
        _handle: u32,
        _width: u32,
        _height: u32,
        _gl_format: i32,
        _gl_type: i32,
        _dst: &mut [u8],
    ) -> crate::channel::Result<()> {
        Ok(())
    }

    fn update_color_buffer_dma(
        &self,
        _handle: u32,
        _width: u32,
        _height: u32,
        _gl_format: i32,
        _gl_type: i32,
        _src: &[u8],
    ) -> crate::channel::Result<()> {
        Ok(())
    }

    fn bind_dma_directly(&self, _ptr: usize, _phys_addr: u64) -> crate::channel::Result<()> {
        Ok(())
    }
}

/// A host memory allocator fake backed by a simple bump allocator over a
/// `Vec<u8>` arena, with each block's "fd" being an index into an internal
/// free-list so `host_free` can be observed by tests.
pub struct FakeHostMemoryAllocator {
    next_fd: AtomicI32,
    next_offset: AtomicU64,
    live_blocks: Mutex<HashMap<i32, u64>>,
    fail_after_bytes: Option<u64>,
    allocated_bytes: AtomicU64,
}

impl FakeHostMemoryAllocator {
    pub fn new() -> Self {
        Self {
            next_fd: AtomicI32::new(1),
            next_offset: AtomicU64::new(0),
            live_blocks: Mutex::new(HashMap::new()),
            fail_after_bytes: None,
            allocated_bytes: AtomicU64::new(0),
        }
    }

    /// Causes any `host_malloc` that would push cumulative allocation past
    /// `limit` bytes to fail, simulating host exhaustion.
    pub fn fail_after_bytes(mut self, limit: u64) -> Self {
        self.fail_after_bytes = Some(limit);
        self
    }

    pub fn live_block_count(&self) -> usize {
        self.live_blocks.lock().unwrap().len()
    }
}

impl Default for FakeHostMemoryAllocator {
    fn default() -> Self {
        Self::new()
    }
}

impl HostMemoryAllocator for FakeHostMemoryAllocator {
    fn host_malloc(&self, size: u64) -> crate::memory::Result<HostBlock> {
        let projected = self.allocated_bytes.load(Ordering::SeqCst) + size;
        if let Some(limit) = self.fail_after_bytes {
            if projected > limit {
                return Err(HostMemoryError::Exhausted { requested: size });
            }
        }
        self.allocated_bytes.store(projected, Ordering::SeqCst);

        let offset = self.next_offset.fetch_add(size, Ordering::SeqCst);
        let fd = self.next_fd.fetch_add(1, Ordering::SeqCst);
        self.live_blocks.lock().unwrap().insert(fd, size);
        Ok(HostBlock {
            guest_virtual_ptr: offset as usize,
            host_physical_offset: offset,
            size,
            fd,
        })
    }

    fn host_free(&self, block: &HostBlock) -> crate::memory::Result<()> {
        let mut blocks = self.live_blocks.lock().unwrap();
        if blocks.remove(&block.fd).is_none() {
            return Err(HostMemoryError::MapFailed(format!("double free of fd {}", block.fd)));
        }
        Ok(())
    }

    fn memory_map(&self, _fd: i32, offset: u64, _size: u64) -> crate::memory::Result<usize> {
        Ok(offset as usize)
    }

    fn memory_unmap(&self, _ptr: usize, _size: u64) -> crate::memory::Result<()> {
        Ok(())
    }
}

/// A pipe client fake: every `open` hands out a fresh fd; `close` removes
/// it so tests can assert no refcount fd leaked past a rollback.
pub struct FakePipeClient {
    next_fd: AtomicI32,
    open_fds: Mutex<HashMap<i32, Vec<u8>>>,
}

impl FakePipeClient {
    pub fn new() -> Self {
        Self { next_fd: AtomicI32::new(1000), open_fds: Mutex::new(HashMap::new()) }
    }

    pub fn open_fd_count(&self) -> usize {
        self.open_fds.lock().unwrap().len()
    }
}

impl Default for FakePipeClient {
    fn default() -> Self {
        Self::new()
    }
}

impl PipeClient for FakePipeClient {
    fn open(&self, _name: &str) -> crate::pipe::Result<i32> {
        let fd = self.next_fd.fetch_add(1, Ordering::SeqCst);
        self.open_fds.lock().unwrap().insert(fd, Vec::new());
        Ok(fd)
    }

    fn write(&self, fd: i32, payload: &[u8]) -> crate::pipe::Result<()> {
        let mut fds = self.open_fds.lock().unwrap();
        let buf = fds
            .get_mut(&fd)
            .ok_or_else(|| PipeError::WriteFailed(format!("fd {fd} not open")))?;
        buf.extend_from_slice(payload);
        Ok(())
    }

    fn close(&self, fd: i32) -> crate::pipe::Result<()> {
        self.open_fds
            .lock()
            .unwrap()
            .remove(&fd)
            .ok_or_else(|| PipeError::WriteFailed(format!("fd {fd} not open")))?;
        Ok(())
    }
}
