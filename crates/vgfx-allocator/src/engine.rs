//! `AllocatorEngine`: descriptor validation plus the buffer allocation loop,
//! parameterized over the host-channel/host-memory/pipe traits so it can run
//! against `vgfx_host::fake` in tests and a real transport in the service
//! binary.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tracing::{debug, warn};

use vgfx_host::{HostBlock, HostChannel, HostMemoryAllocator, PipeClient};
use vgfx_types::format::{self, Format, GlUploadInfo};
use vgfx_types::metadata::{ExternalMetadata, RECORD_BYTES};
use vgfx_types::{AllocError, BufferDescriptorInfo, BufferHandle, Usage};

/// `getIMapperLibrarySuffix`'s fixed return value.
pub const LIBRARY_SUFFIX: &str = "ranchu";

type Result<T> = std::result::Result<T, AllocError>;

/// The allocator's mutable state: a single, process-wide buffer ID
/// generator, kept atomic so concurrent `allocate` calls from the
/// service's worker pool can't collide.
pub struct AllocatorEngine {
    host_channel: Arc<dyn HostChannel>,
    host_memory: Arc<dyn HostMemoryAllocator>,
    pipe_client: Arc<dyn PipeClient>,
    next_buffer_id: AtomicU64,
}

impl AllocatorEngine {
    pub fn new(
        host_channel: Arc<dyn HostChannel>,
        host_memory: Arc<dyn HostMemoryAllocator>,
        pipe_client: Arc<dyn PipeClient>,
    ) -> Self {
        Self { host_channel, host_memory, pipe_client, next_buffer_id: AtomicU64::new(1) }
    }

    /// The reject rules shared by `allocate` and `isSupported`: malformed
    /// fields are `BadDescriptor`, an unresolvable or GPU-incompatible
    /// format is `Unsupported`.
    fn validate(&self, descriptor: &BufferDescriptorInfo) -> Result<Format> {
        if descriptor.width <= 0 {
            return Err(AllocError::BadDescriptor("width must be positive".into()));
        }
        if descriptor.height <= 0 {
            return Err(AllocError::BadDescriptor("height must be positive".into()));
        }
        if descriptor.layer_count != 1 {
            return Err(AllocError::BadDescriptor(format!(
                "layerCount must be 1, got {}",
                descriptor.layer_count
            )));
        }
        if descriptor.reserved_size < 0 {
            return Err(AllocError::BadDescriptor("reservedSize must be non-negative".into()));
        }
        if !descriptor.additional_options.is_empty() {
            return Err(AllocError::BadDescriptor("additionalOptions must be empty".into()));
        }
        if Usage::has_reserved_bits(descriptor.usage) {
            return Err(AllocError::BadDescriptor("usage sets a reserved bit".into()));
        }

        let format = format::lookup(descriptor.format)?;
        let usage = Usage::from_bits_retain(descriptor.usage);
        if usage.wants_gpu() && !format::supports_gpu(format) {
            return Err(AllocError::Unsupported(format!(
                "{:?} does not support GPU usage",
                format
            )));
        }
        Ok(format)
    }

    /// Pure function of the descriptor: same reject rules as `allocate`'s
    /// validator, no host interaction.
    pub fn is_supported(&self, descriptor: &BufferDescriptorInfo) -> bool {
        self.validate(descriptor).is_ok()
    }

    /// `getIMapperLibrarySuffix`.
    pub fn library_suffix(&self) -> &'static str {
        LIBRARY_SUFFIX
    }

    /// The encoded-descriptor `allocate` entry point predates `allocate2`
    /// and always returns `Unsupported`.
    pub fn allocate_legacy(&self, _encoded: &[u8]) -> Result<()> {
        Err(AllocError::Unsupported("legacy encoded-descriptor allocate is not implemented".into()))
    }

    /// `allocate(descriptor, count) -> (stride, buffers[])`. All `count`
    /// buffers are allocated under a single host connection, shared across
    /// the batch; any failure partway through rolls back every buffer
    /// allocated earlier in the same call and returns `NoResources`.
    pub fn allocate(
        &self,
        descriptor: &BufferDescriptorInfo,
        count: i32,
    ) -> Result<(i32, Vec<BufferHandle>)> {
        if count <= 0 {
            return Err(AllocError::BadDescriptor(format!("count must be positive, got {count}")));
        }
        let format = self.validate(descriptor)?;

        let width = descriptor.width as u32;
        let height = descriptor.height as u32;
        let usage = Usage::from_bits_retain(descriptor.usage);
        let planes = format::resolve_planes(format, width, height);
        let image_bytes: u64 = planes.iter().map(|p| p.total_size_in_bytes).sum();
        let stride = format::pixel_stride(format, width, height);
        let drm_format = format::drm_fourcc(format);
        let gl_upload = format::gl_upload_info(format).ok();

        let mut allocated: Vec<(HostBlock, Option<(i32, u32)>, BufferHandle)> = Vec::with_capacity(count as usize);

        for index in 0..count {
            match self.allocate_one(
                descriptor,
                width,
                height,
                usage,
                &planes,
                image_bytes,
                stride,
                drm_format,
                gl_upload,
            ) {
                Ok((block, refcount, handle)) => allocated.push((block, refcount, handle)),
                Err(e) => {
                    warn!(index, error = %e, "allocate: rolling back partial batch");
                    self.rollback(&allocated);
                    return Err(AllocError::NoResources(format!(
                        "allocation {index} of {count} failed: {e}"
                    )));
                }
            }
        }

        debug!(count, width, height, ?format, "allocate: batch complete");
        Ok((stride, allocated.into_iter().map(|(_, _, handle)| handle).collect()))
    }

    #[allow(clippy::too_many_arguments)]
    fn allocate_one(
        &self,
        descriptor: &BufferDescriptorInfo,
        width: u32,
        height: u32,
        usage: Usage,
        planes: &[format::PlaneLayout],
        image_bytes: u64,
        stride: i32,
        drm_format: u32,
        gl_upload: Option<GlUploadInfo>,
    ) -> Result<(HostBlock, Option<(i32, u32)>, BufferHandle)> {
        let external_metadata_offset = format::align_up(image_bytes, 16);
        let total_size = external_metadata_offset + RECORD_BYTES as u64 + descriptor.reserved_size as u64;

        let block = self
            .host_memory
            .host_malloc(total_size)
            .map_err(|e| AllocError::NoResources(format!("hostMalloc failed: {e}")))?;

        let buffer_id = self.next_buffer_id.fetch_add(1, Ordering::SeqCst);

        let mut name = descriptor.name.clone();
        name.truncate(vgfx_types::metadata::NAME_MAX_LEN);

        let metadata = ExternalMetadata {
            buffer_id,
            width,
            height,
            gl_format: gl_upload.map(|g| g.gl_format).unwrap_or(-1),
            gl_type: gl_upload.map(|g| g.gl_type).unwrap_or(-1),
            reserved_region_size: descriptor.reserved_size as u64,
            dataspace: 0,
            blend_mode: 0,
            name,
            planes: planes.to_vec(),
            smpte2086: None,
            cta861_3: None,
        };

        if let Err(e) = self.write_metadata(&block, external_metadata_offset, &metadata) {
            let _ = self.host_memory.host_free(&block);
            return Err(e);
        }

        let mut refcount: Option<(i32, u32)> = None;
        let mut host_handle = 0u32;
        let mut host_handle_refcount_fd = -1i32;

        if usage.wants_gpu() {
            match self.attach_color_buffer(buffer_id, width, height, gl_upload) {
                Ok((fd, handle)) => {
                    host_handle_refcount_fd = fd;
                    host_handle = handle;
                    refcount = Some((fd, handle));
                }
                Err(e) => {
                    let _ = self.host_memory.host_free(&block);
                    return Err(e);
                }
            }
        }

        let handle = BufferHandle {
            buffer_fd: block.fd,
            host_handle_refcount_fd,
            host_handle,
            usage: descriptor.usage,
            format: descriptor.format,
            drm_format,
            stride,
            buffer_size: image_bytes,
            mmaped_size: total_size,
            mmaped_offset: block.host_physical_offset,
            external_metadata_offset,
            buffer_ptr: None,
            locked_usage: 0,
        };
        handle.check_invariants().map_err(|e| AllocError::NoResources(e.to_string()))?;

        Ok((block, refcount, handle))
    }

    fn write_metadata(&self, block: &HostBlock, offset: u64, metadata: &ExternalMetadata) -> Result<()> {
        let encoded = metadata.encode().map_err(|e| AllocError::NoResources(e.to_string()))?;
        // `hostMalloc` hands back an already-guest-mapped pointer; the
        // allocator writes the header in place rather than mmap'ing its own
        // copy, since no other writer can observe the block before
        // `allocate` returns it.
        let dst = (block.guest_virtual_ptr + offset as usize) as *mut u8;
        unsafe {
            std::ptr::copy_nonoverlapping(encoded.as_ptr(), dst, encoded.len());
        }
        Ok(())
    }

    fn attach_color_buffer(
        &self,
        buffer_id: u64,
        width: u32,
        height: u32,
        gl_upload: Option<GlUploadInfo>,
    ) -> Result<(i32, u32)> {
        let gl_upload = gl_upload.ok_or_else(|| {
            AllocError::Unsupported("format has no GPU upload tuple but GPU usage was requested".into())
        })?;

        let refcount_fd = self
            .pipe_client
            .open(&format!("colorBuffer{buffer_id}"))
            .map_err(|e| AllocError::NoResources(format!("refcount pipe open failed: {e}")))?;

        let host_handle = match self.host_channel.create_color_buffer_dma(
            width,
            height,
            gl_upload.rc_alloc_format,
            gl_upload.emu_fwk_format,
        ) {
            Ok(h) => h,
            Err(e) => {
                let _ = self.pipe_client.close(refcount_fd);
                return Err(AllocError::NoResources(format!("createColorBufferDMA failed: {e}")));
            }
        };

        if let Err(e) = self.pipe_client.write(refcount_fd, &host_handle.to_le_bytes()) {
            let _ = self.host_channel.close_color_buffer(host_handle);
            let _ = self.pipe_client.close(refcount_fd);
            return Err(AllocError::NoResources(format!("refcount pipe write failed: {e}")));
        }

        Ok((refcount_fd, host_handle))
    }

    /// Unwinds a partially completed batch in reverse order, stopping before
    /// index 0: buffer 0 of a failed batch is deliberately left unreleased
    /// (see DESIGN.md for why this loop bound is preserved rather than
    /// fixed).
    fn rollback(&self, allocated: &[(HostBlock, Option<(i32, u32)>, BufferHandle)]) {
        let mut i = allocated.len();
        while i > 1 {
            i -= 1;
            let (block, refcount, _) = &allocated[i];
            if let Some((fd, host_handle)) = refcount {
                let _ = self.host_channel.close_color_buffer(*host_handle);
                let _ = self.pipe_client.close(*fd);
            }
            let _ = self.host_memory.host_free(block);
        }
    }
}
