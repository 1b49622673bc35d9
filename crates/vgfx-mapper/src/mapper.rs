//! `Mapper`: the per-process table of imported buffers plus the
//! import/lock/unlock/metadata operations. Parameterized
//! over `vgfx_host`'s `HostChannel`/`HostMemoryAllocator` traits the same
//! way `vgfx_allocator::AllocatorEngine` is, so it runs against
//! `vgfx_host::fake` in tests and real transports when loaded into a
//! client process.

use std::sync::Arc;

use tracing::{debug, instrument, warn};

use vgfx_host::{HostChannel, HostMemoryAllocator};
use vgfx_types::format::{self, Format};
use vgfx_types::metadata::{ExternalMetadata, MetadataError, RECORD_BYTES};
use vgfx_types::{BufferHandle, Usage};

use crate::error::{MapperError, Result};
use crate::imported::{BufferToken, ImportedBufferSet};
use crate::standard_metadata::{self, StandardMetadataType};

pub use crate::imported::BufferToken as Token;

/// A rectangular region a `lock` call validates against the buffer's
/// width/height. Locks are whole-buffer: the region is checked but never
/// honored as a sub-rect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Region {
    pub left: i32,
    pub top: i32,
    pub width: i32,
    pub height: i32,
}

impl Region {
    fn within(&self, buffer_width: u32, buffer_height: u32) -> bool {
        self.width > 0
            && self.height > 0
            && self.left >= 0
            && self.top >= 0
            && (self.left as i64 + self.width as i64) <= buffer_width as i64
            && (self.top as i64 + self.height as i64) <= buffer_height as i64
    }
}

/// Either `getMetadata`/`getStandardMetadata` wrote the encoded record into
/// the caller's buffer, or the buffer was too small and the required size
/// is reported instead, without writing anything.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MetadataQuery {
    Written(usize),
    NeedsSize(usize),
}

/// `Mapper`: one instance lives per client process, shared across every
/// thread that imports/locks buffers.
pub struct Mapper {
    imported: ImportedBufferSet,
    host_channel: Arc<dyn HostChannel>,
    host_memory: Arc<dyn HostMemoryAllocator>,
    /// `physAddr - offset`, computed once via a throwaway 256-byte
    /// `hostMalloc` at construction. `vgfx_host::HostBlock` does not
    /// distinguish a separate host physical address from its
    /// `host_physical_offset`, so this bias is always zero against the
    /// in-tree host-memory implementations; it is still computed and
    /// threaded through `bind_dma_directly` calls so the arithmetic holds
    /// for a future allocator that does report a distinct physical address
    /// (see DESIGN.md).
    phys_addr_bias: i64,
}

impl Mapper {
    pub fn new(host_channel: Arc<dyn HostChannel>, host_memory: Arc<dyn HostMemoryAllocator>) -> Result<Self> {
        let probe = host_memory
            .host_malloc(256)
            .map_err(|e| MapperError::NoResources(format!("startup physAddrToOffset probe failed: {e}")))?;
        let bias = probe.host_physical_offset as i64 - probe.guest_virtual_ptr as i64;
        let _ = host_memory.host_free(&probe);
        Ok(Self { imported: ImportedBufferSet::new(), host_channel, host_memory, phys_addr_bias: bias })
    }

    fn phys_addr_for(&self, mmaped_offset: u64) -> u64 {
        mmaped_offset.wrapping_add(self.phys_addr_bias as u64)
    }

    /// `importBuffer(rawHandle) -> ownedHandle`.
    #[instrument(skip(self, raw))]
    pub fn import_buffer(&self, raw: &BufferHandle) -> Result<BufferToken> {
        raw.check_invariants().map_err(|e| MapperError::BadBuffer(e.to_string()))?;

        let mut owned = raw.clone();
        if owned.mmaped_size > 0 {
            let ptr = self
                .host_memory
                .memory_map(owned.buffer_fd, owned.mmaped_offset, owned.mmaped_size)
                .map_err(|e| MapperError::NoResources(format!("mmap failed: {e}")))?;
            owned.buffer_ptr = Some(ptr);
        }

        let metadata = self.read_metadata(&owned)?;
        let token = self.imported.insert(owned, metadata);
        debug!(?token, "buffer imported");
        Ok(token)
    }

    /// Magic mismatch is `Fatal` (spec: "aborts the process via an
    /// always-on assertion"): a corrupted X record means the shared region
    /// is not the one the allocator wrote, so nothing downstream of this
    /// read can be trusted. Every other decode failure (truncation, a
    /// buffer that's simply too small) is recoverable and returned as
    /// `BadBuffer`.
    fn read_metadata(&self, handle: &BufferHandle) -> Result<ExternalMetadata> {
        let ptr = handle.buffer_ptr.ok_or_else(|| MapperError::BadBuffer("buffer is not mapped".into()))?;
        let offset = handle.external_metadata_offset as usize;
        let bytes = unsafe { std::slice::from_raw_parts((ptr + offset) as *const u8, RECORD_BYTES) };
        match ExternalMetadata::decode(bytes) {
            Ok(metadata) => Ok(metadata),
            Err(MetadataError::BadMagic { found, expected }) => {
                crate::error::fatal(&format!("X record magic mismatch: found {found:#x}, expected {expected:#x}"))
            }
            Err(e) => Err(MapperError::BadBuffer(format!("bad X record: {e}"))),
        }
    }

    /// `freeBuffer(handle)`.
    #[instrument(skip(self))]
    pub fn free_buffer(&self, token: BufferToken) -> Result<()> {
        let entry = self.imported.remove(token)?;

        if entry.handle.locked_usage & Usage::CPU_WRITE_MASK != 0 && entry.handle.host_handle != 0 {
            if let Err(e) = self.push_to_host(&entry.handle, &entry.metadata) {
                warn!(?token, error = %e, "defensive flush on free failed");
            }
        }

        if let Some(ptr) = entry.handle.buffer_ptr {
            self.host_memory
                .memory_unmap(ptr, entry.handle.mmaped_size)
                .map_err(|e| MapperError::NoResources(format!("munmap failed: {e}")))?;
        }
        close_fd(entry.handle.buffer_fd);
        close_fd(entry.handle.host_handle_refcount_fd);
        Ok(())
    }

    /// `lock(handle, usage, region, acquireFence) -> ptr`.
    #[instrument(skip(self))]
    pub fn lock(&self, token: BufferToken, usage: Usage, region: Region, acquire_fence: i32) -> Result<usize> {
        let (ptr, needs_pull, handle_snapshot, metadata_snapshot) = self.imported.with_entry(token, |entry| {
            if entry.handle.locked_usage != 0 {
                return Err(MapperError::BadBuffer("buffer already locked".into()));
            }
            if !region.within(entry.metadata.width, entry.metadata.height) {
                return Err(MapperError::BadValue(format!("region {region:?} out of bounds")));
            }
            let granted = usage.bits() & entry.handle.usage & Usage::CPU_READ_WRITE_MASK;
            if granted == 0 {
                return Err(MapperError::BadValue("usage grants no CPU read/write bits".into()));
            }
            entry.handle.locked_usage = granted;
            let ptr = entry.handle.buffer_ptr.ok_or_else(|| MapperError::BadBuffer("buffer is not mapped".into()))?;
            Ok((ptr, entry.handle.host_handle != 0, entry.handle.clone(), entry.metadata.clone()))
        })?;

        wait_fence(acquire_fence)?;

        if needs_pull {
            if let Err(e) = self.pull_from_host(&handle_snapshot, &metadata_snapshot) {
                let _ = self.imported.with_entry(token, |entry| {
                    entry.handle.locked_usage = 0;
                    Ok(())
                });
                return Err(e);
            }
        }

        Ok(ptr)
    }

    /// `unlock(handle) -> releaseFence`. Always `-1`: the push to host, when
    /// one happens, is synchronous.
    #[instrument(skip(self))]
    pub fn unlock(&self, token: BufferToken) -> Result<i32> {
        let (needs_push, handle_snapshot, metadata_snapshot) = self.imported.with_entry(token, |entry| {
            if entry.handle.locked_usage == 0 {
                return Err(MapperError::BadBuffer("buffer is not locked".into()));
            }
            let needs_push = entry.handle.locked_usage & Usage::CPU_WRITE_MASK != 0 && entry.handle.host_handle != 0;
            let snapshot = (needs_push, entry.handle.clone(), entry.metadata.clone());
            entry.handle.locked_usage = 0;
            Ok(snapshot)
        })?;

        if needs_push {
            self.push_to_host(&handle_snapshot, &metadata_snapshot)?;
        }
        Ok(-1)
    }

    /// `flushLockedBuffer`: push without changing lock state.
    #[instrument(skip(self))]
    pub fn flush_locked_buffer(&self, token: BufferToken) -> Result<()> {
        let (handle, metadata) = self.imported.with_entry(token, |entry| {
            if entry.handle.locked_usage & Usage::CPU_WRITE_MASK == 0 {
                return Err(MapperError::BadBuffer("buffer has no CPU-write lock".into()));
            }
            Ok((entry.handle.clone(), entry.metadata.clone()))
        })?;
        if handle.host_handle != 0 {
            self.push_to_host(&handle, &metadata)?;
        }
        Ok(())
    }

    /// `rereadLockedBuffer`: pull without changing lock state.
    #[instrument(skip(self))]
    pub fn reread_locked_buffer(&self, token: BufferToken) -> Result<()> {
        let (handle, metadata) = self.imported.with_entry(token, |entry| {
            if entry.handle.locked_usage & Usage::CPU_READ_MASK == 0 {
                return Err(MapperError::BadBuffer("buffer has no CPU-read lock".into()));
            }
            Ok((entry.handle.clone(), entry.metadata.clone()))
        })?;
        if handle.host_handle != 0 {
            self.pull_from_host(&handle, &metadata)?;
        }
        Ok(())
    }

    fn pull_from_host(&self, handle: &BufferHandle, metadata: &ExternalMetadata) -> Result<()> {
        let format = format::lookup(handle.format).map_err(|e| MapperError::BadValue(e.to_string()))?;
        let ptr = handle.buffer_ptr.ok_or_else(|| MapperError::BadBuffer("buffer is not mapped".into()))?;
        let dst = unsafe { std::slice::from_raw_parts_mut(ptr as *mut u8, handle.buffer_size as usize) };

        self.host_channel
            .color_buffer_cache_flush(handle.host_handle)
            .map_err(|e| MapperError::NoResources(e.to_string()))?;

        if format::plane_count(format) > 1 && self.host_channel.feature_info().has_yuv_cache {
            self.host_channel
                .read_color_buffer_yuv(handle.host_handle, metadata.width, metadata.height, dst)
                .map_err(|e| MapperError::NoResources(e.to_string()))?;
        } else {
            let gl = gl_upload(format)?;
            self.host_channel
                .bind_dma_directly(ptr, self.phys_addr_for(handle.mmaped_offset))
                .map_err(|e| MapperError::NoResources(e.to_string()))?;
            self.host_channel
                .read_color_buffer_dma(handle.host_handle, metadata.width, metadata.height, gl.gl_format, gl.gl_type, dst)
                .map_err(|e| MapperError::NoResources(e.to_string()))?;
        }
        Ok(())
    }

    fn push_to_host(&self, handle: &BufferHandle, metadata: &ExternalMetadata) -> Result<()> {
        let format = format::lookup(handle.format).map_err(|e| MapperError::BadValue(e.to_string()))?;
        let ptr = handle.buffer_ptr.ok_or_else(|| MapperError::BadBuffer("buffer is not mapped".into()))?;
        let src = unsafe { std::slice::from_raw_parts(ptr as *const u8, handle.buffer_size as usize) };
        let gl = gl_upload(format)?;

        self.host_channel
            .bind_dma_directly(ptr, self.phys_addr_for(handle.mmaped_offset))
            .map_err(|e| MapperError::NoResources(e.to_string()))?;
        self.host_channel
            .update_color_buffer_dma(handle.host_handle, metadata.width, metadata.height, gl.gl_format, gl.gl_type, src)
            .map_err(|e| MapperError::NoResources(e.to_string()))?;
        Ok(())
    }

    /// `getMetadata`: the generic entry point. This implementation's tag
    /// space is the same `StandardMetadataType` enum `getStandardMetadata`
    /// uses (there are no vendor-private metadata types here), so it just
    /// forwards.
    pub fn get_metadata(&self, token: BufferToken, ty: StandardMetadataType, out: &mut [u8]) -> Result<MetadataQuery> {
        self.get_standard_metadata(token, ty, out)
    }

    /// `setMetadata`: see [`Mapper::get_metadata`].
    pub fn set_metadata(&self, token: BufferToken, ty: StandardMetadataType, payload: &[u8]) -> Result<()> {
        self.set_standard_metadata(token, ty, payload)
    }

    /// `getMetadata`/`getStandardMetadata`: encodes `ty`'s record into `out`,
    /// or reports the size it would need without writing.
    pub fn get_standard_metadata(&self, token: BufferToken, ty: StandardMetadataType, out: &mut [u8]) -> Result<MetadataQuery> {
        self.imported.with_entry(token, |entry| {
            let encoded = standard_metadata::encode(ty, &entry.handle, &entry.metadata);
            if encoded.len() > out.len() {
                return Ok(MetadataQuery::NeedsSize(encoded.len()));
            }
            out[..encoded.len()].copy_from_slice(&encoded);
            Ok(MetadataQuery::Written(encoded.len()))
        })
    }

    /// `setStandardMetadata`. Only `DATASPACE`, `BLEND_MODE`, `SMPTE2086`,
    /// `CTA861_3` are settable; everything else is `Unsupported`. Mutates
    /// only the in-process metadata cache, matching
    /// the fact that these fields are never re-read from the shared X
    /// record after import.
    pub fn set_standard_metadata(&self, token: BufferToken, ty: StandardMetadataType, payload: &[u8]) -> Result<()> {
        if !standard_metadata::is_settable(ty) {
            return Err(MapperError::Unsupported(format!("{ty:?} is not settable")));
        }
        self.imported.with_entry(token, |entry| {
            match ty {
                StandardMetadataType::Dataspace => {
                    entry.metadata.dataspace = read_i32(payload)?;
                }
                StandardMetadataType::BlendMode => {
                    entry.metadata.blend_mode = read_i32(payload)?;
                }
                StandardMetadataType::Smpte2086 => {
                    entry.metadata.smpte2086 = if payload.is_empty() { None } else { decode_smpte2086(payload)? };
                }
                StandardMetadataType::Cta8613 => {
                    entry.metadata.cta861_3 = if payload.is_empty() { None } else { decode_cta861_3(payload)? };
                }
                _ => unreachable!("checked by is_settable above"),
            }
            Ok(())
        })
    }

    /// `listSupportedMetadataTypes`.
    pub fn list_supported_metadata_types(&self) -> Vec<(StandardMetadataType, bool)> {
        standard_metadata::ALL.iter().map(|t| (*t, standard_metadata::is_settable(*t))).collect()
    }

    /// `dumpBuffer`: a human-readable summary of every gettable standard
    /// metadata field for one buffer, built by calling `getStandardMetadata`
    /// for every entry in `standard_metadata::ALL` and growing the scratch
    /// buffer when the first attempt reports a larger required size.
    pub fn dump_buffer(&self, token: BufferToken) -> Result<String> {
        self.dump_one(token)
    }

    /// `dumpAllBuffers`: the same per-buffer dump, one line per live buffer
    /// ordered by import sequence. A buffer freed between the token
    /// snapshot and its own dump is silently skipped rather than aborting
    /// the whole listing.
    pub fn dump_all_buffers(&self) -> String {
        self.imported
            .snapshot_tokens()
            .into_iter()
            .filter_map(|token| self.dump_one(token).ok())
            .collect::<Vec<_>>()
            .join("\n")
    }

    fn dump_one(&self, token: BufferToken) -> Result<String> {
        let mut fields = Vec::with_capacity(standard_metadata::ALL.len());
        for ty in standard_metadata::ALL.iter().copied() {
            let mut scratch = vec![0u8; 64];
            let encoded = match self.get_standard_metadata(token, ty, &mut scratch)? {
                MetadataQuery::Written(n) => {
                    scratch.truncate(n);
                    scratch
                }
                MetadataQuery::NeedsSize(needed) => {
                    let mut grown = vec![0u8; needed];
                    if let MetadataQuery::Written(n) = self.get_standard_metadata(token, ty, &mut grown)? {
                        grown.truncate(n);
                    }
                    grown
                }
            };
            fields.push(format!("{ty:?}={}", describe_metadata_value(ty, &encoded)));
        }
        Ok(fields.join(" "))
    }

    /// `getTransportSize`.
    pub fn get_transport_size(&self, token: BufferToken) -> Result<(u32, u32)> {
        self.imported.with_entry(token, |entry| Ok(entry.handle.transport_size()))
    }

    /// `getReservedRegion`: the pointer to, and size of, the tail region
    /// immediately after the X record.
    pub fn get_reserved_region(&self, token: BufferToken) -> Result<(usize, u64)> {
        self.imported.with_entry(token, |entry| {
            let ptr = entry
                .handle
                .buffer_ptr
                .ok_or_else(|| MapperError::BadBuffer("buffer is not mapped".into()))?;
            let reserved_base = entry.handle.external_metadata_offset + RECORD_BYTES as u64;
            Ok((ptr + reserved_base as usize, entry.metadata.reserved_region_size))
        })
    }
}

/// Strips the `(tagLen, tag, typeEnum)` header every
/// `standard_metadata::encode` record starts with and renders the
/// type-specific payload behind it for `dumpBuffer`/`dumpAllBuffers`.
/// Scalar-shaped payloads (4 or 8 bytes) are decoded to a plain number;
/// the handful of variable-length or structured types (`Name`,
/// `PlaneLayouts`, `Crop`) get a dedicated summary; anything else just
/// reports its byte length.
fn describe_metadata_value(ty: StandardMetadataType, encoded: &[u8]) -> String {
    let header_len = 4 + standard_metadata::TAG_NAME.len() + 4;
    let payload = encoded.get(header_len..).unwrap_or(&[]);
    match ty {
        StandardMetadataType::Name => {
            let len = u32_at(payload, 0) as usize;
            String::from_utf8_lossy(payload.get(4..4 + len).unwrap_or(&[])).into_owned()
        }
        StandardMetadataType::PlaneLayouts => format!("{} plane(s)", u32_at(payload, 0)),
        StandardMetadataType::Crop => format!("{} rect(s)", u32_at(payload, 0)),
        _ if payload.len() == 4 => i32::from_le_bytes(payload.try_into().unwrap()).to_string(),
        _ if payload.len() == 8 => u64::from_le_bytes(payload.try_into().unwrap()).to_string(),
        _ => format!("<{} bytes>", payload.len()),
    }
}

fn u32_at(payload: &[u8], offset: usize) -> u32 {
    payload
        .get(offset..offset + 4)
        .and_then(|b| b.try_into().ok())
        .map(u32::from_le_bytes)
        .unwrap_or(0)
}

fn gl_upload(format: Format) -> Result<format::GlUploadInfo> {
    format::gl_upload_info(format).map_err(|e| MapperError::Unsupported(e.to_string()))
}

fn read_i32(payload: &[u8]) -> Result<i32> {
    payload
        .get(..4)
        .and_then(|b| b.try_into().ok())
        .map(i32::from_le_bytes)
        .ok_or_else(|| MapperError::BadValue("payload too short for int32".into()))
}

fn decode_smpte2086(payload: &[u8]) -> Result<Option<vgfx_types::metadata::Smpte2086>> {
    if payload.len() < 40 {
        return Err(MapperError::BadValue("payload too short for SMPTE2086".into()));
    }
    let f = |i: usize| f32::from_le_bytes(payload[i * 4..i * 4 + 4].try_into().unwrap());
    Ok(Some(vgfx_types::metadata::Smpte2086 {
        display_primary_red: (f(0), f(1)),
        display_primary_green: (f(2), f(3)),
        display_primary_blue: (f(4), f(5)),
        white_point: (f(6), f(7)),
        max_luminance: f(8),
        min_luminance: f(9),
    }))
}

fn decode_cta861_3(payload: &[u8]) -> Result<Option<vgfx_types::metadata::Cta8613>> {
    if payload.len() < 8 {
        return Err(MapperError::BadValue("payload too short for CTA861.3".into()));
    }
    let f = |i: usize| f32::from_le_bytes(payload[i * 4..i * 4 + 4].try_into().unwrap());
    Ok(Some(vgfx_types::metadata::Cta8613 { max_content_light_level: f(0), max_frame_average_light_level: f(1) }))
}

fn close_fd(fd: i32) {
    if fd >= 0 {
        #[cfg(unix)]
        unsafe {
            libc::close(fd);
        }
    }
}

/// Waits on `acquire_fence`: a 5-second soft timeout logs a warning, then
/// the wait blocks indefinitely. A negative fence means "already signaled"
/// and is a no-op.
#[cfg(unix)]
fn wait_fence(fence: i32) -> Result<()> {
    if fence < 0 {
        return Ok(());
    }
    let mut fds = [libc::pollfd { fd: fence, events: libc::POLLIN, revents: 0 }];
    let rc = unsafe { libc::poll(fds.as_mut_ptr(), 1, 5_000) };
    if rc == 0 {
        warn!(fence, "acquire fence wait exceeded 5s, blocking indefinitely");
        let rc = unsafe { libc::poll(fds.as_mut_ptr(), 1, -1) };
        if rc < 0 {
            return Err(MapperError::NoResources("fence wait failed".into()));
        }
    } else if rc < 0 {
        return Err(MapperError::NoResources("fence wait failed".into()));
    }
    Ok(())
}

#[cfg(not(unix))]
fn wait_fence(fence: i32) -> Result<()> {
    if fence < 0 {
        Ok(())
    } else {
        Err(MapperError::Unsupported("fence waiting requires a unix target".into()))
    }
}
