//! The C-ABI surface a non-Rust client process loads this library through:
//! a version constant plus a loader entry point yielding a table of
//! `extern "C"` function pointers, modeled as a lazily-initialized
//! process-wide singleton [`Mapper`].
//!
//! Every entry point below is a thin, `catch_unwind`-wrapped translation
//! from raw tokens/pointers to the safe [`crate::mapper::Mapper`] API; the
//! status codes returned match [`vgfx_types::error::StatusCode`] (0 == ok,
//! negative == error). The metadata entry points specifically return the
//! negated error code on failure, a convention generalized here to every
//! entry point for a consistent ABI.

use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, OnceLock};

use vgfx_host::{MemfdHostMemoryAllocator, UnixHostChannel};
use vgfx_types::error::StatusCode;
use vgfx_types::Usage;

use crate::error::MapperError;
use crate::mapper::{Mapper, MetadataQuery, Region};
use crate::standard_metadata::StandardMetadataType;

/// Exported so a client can verify this is the ABI version it was built
/// against before calling anything else.
pub const ANDROID_HAL_MAPPER_VERSION: u32 = 5;

const DEFAULT_HOST_CHANNEL_SOCKET: &str = "/tmp/vgfx-host-channel.sock";

static MAPPER: OnceLock<Mapper> = OnceLock::new();

fn mapper() -> &'static Mapper {
    MAPPER.get_or_init(|| {
        let socket = std::env::var("VGFX_HOST_CHANNEL_SOCKET").unwrap_or_else(|_| DEFAULT_HOST_CHANNEL_SOCKET.into());
        let host_channel = UnixHostChannel::connect(&socket)
            .unwrap_or_else(|e| crate::error::fatal(&format!("failed to connect host channel at {socket}: {e}")));
        let host_memory = MemfdHostMemoryAllocator::new();
        Mapper::new(Arc::new(host_channel), Arc::new(host_memory))
            .unwrap_or_else(|e| crate::error::fatal(&format!("mapper startup probe failed: {e}")))
    })
}

fn status_of(result: Result<(), MapperError>) -> i32 {
    match result {
        Ok(()) => StatusCode::Ok as i32,
        Err(e) => e.as_status_code() as i32,
    }
}

fn catch<T>(f: impl FnOnce() -> T) -> Option<T> {
    panic::catch_unwind(AssertUnwindSafe(f)).ok()
}

/// `importBuffer`: `fds`/`ints` are the same wire layout
/// `vgfx_types::handle::WireBufferHandle` decodes, since the loader's
/// caller is expected to hand over the raw fd/int arrays it received over
/// `binder`/a socket rather than a Rust type.
#[no_mangle]
pub extern "C" fn vgfx_mapper_import_buffer(fds: *const i32, num_fds: u32, ints: *const i32, num_ints: u32, out_token: *mut u64) -> i32 {
    let Some(outcome) = catch(|| {
        let fds = unsafe { std::slice::from_raw_parts(fds, num_fds as usize) }.to_vec();
        let ints = unsafe { std::slice::from_raw_parts(ints, num_ints as usize) }.to_vec();
        let wire = vgfx_types::handle::WireBufferHandle { fds, ints };
        let handle = wire.to_handle().map_err(|e| MapperError::BadBuffer(e.to_string()))?;
        mapper().import_buffer(&handle)
    }) else {
        return StatusCode::NoResources as i32;
    };
    match outcome {
        Ok(token) => {
            unsafe { *out_token = token_to_raw(token) };
            StatusCode::Ok as i32
        }
        Err(e) => e.as_status_code() as i32,
    }
}

#[no_mangle]
pub extern "C" fn vgfx_mapper_free_buffer(token: u64) -> i32 {
    catch(|| status_of(mapper().free_buffer(raw_to_token(token)))).unwrap_or(StatusCode::NoResources as i32)
}

#[no_mangle]
pub extern "C" fn vgfx_mapper_lock(
    token: u64,
    usage_bits: u64,
    left: i32,
    top: i32,
    width: i32,
    height: i32,
    acquire_fence: i32,
    out_ptr: *mut usize,
) -> i32 {
    let Some(outcome) = catch(|| {
        let region = Region { left, top, width, height };
        mapper().lock(raw_to_token(token), Usage::from_bits_retain(usage_bits), region, acquire_fence)
    }) else {
        return StatusCode::NoResources as i32;
    };
    match outcome {
        Ok(ptr) => {
            unsafe { *out_ptr = ptr };
            StatusCode::Ok as i32
        }
        Err(e) => e.as_status_code() as i32,
    }
}

#[no_mangle]
pub extern "C" fn vgfx_mapper_unlock(token: u64, out_release_fence: *mut i32) -> i32 {
    let Some(outcome) = catch(|| mapper().unlock(raw_to_token(token))) else {
        return StatusCode::NoResources as i32;
    };
    match outcome {
        Ok(fence) => {
            unsafe { *out_release_fence = fence };
            StatusCode::Ok as i32
        }
        Err(e) => e.as_status_code() as i32,
    }
}

#[no_mangle]
pub extern "C" fn vgfx_mapper_flush_locked_buffer(token: u64) -> i32 {
    catch(|| status_of(mapper().flush_locked_buffer(raw_to_token(token)))).unwrap_or(StatusCode::NoResources as i32)
}

#[no_mangle]
pub extern "C" fn vgfx_mapper_reread_locked_buffer(token: u64) -> i32 {
    catch(|| status_of(mapper().reread_locked_buffer(raw_to_token(token)))).unwrap_or(StatusCode::NoResources as i32)
}

/// `getStandardMetadata`: writes into `out`/`out_len` if it fits, else
/// returns the required size as a *positive* `i32` without writing; a
/// real error is returned negated.
#[no_mangle]
pub extern "C" fn vgfx_mapper_get_standard_metadata(token: u64, metadata_type: i32, out: *mut u8, out_len: u32) -> i32 {
    let Some(ty) = standard_metadata_type_from_raw(metadata_type) else {
        return StatusCode::Unsupported as i32;
    };
    let Some(outcome) = catch(|| {
        let buf = unsafe { std::slice::from_raw_parts_mut(out, out_len as usize) };
        mapper().get_standard_metadata(raw_to_token(token), ty, buf)
    }) else {
        return StatusCode::NoResources as i32;
    };
    match outcome {
        Ok(MetadataQuery::Written(n)) => n as i32,
        Ok(MetadataQuery::NeedsSize(n)) => n as i32,
        // Already a negative `StatusCode`, distinguishing it from the
        // positive byte-count success values above.
        Err(e) => e.as_status_code() as i32,
    }
}

#[no_mangle]
pub extern "C" fn vgfx_mapper_set_standard_metadata(token: u64, metadata_type: i32, payload: *const u8, payload_len: u32) -> i32 {
    let Some(ty) = standard_metadata_type_from_raw(metadata_type) else {
        return StatusCode::Unsupported as i32;
    };
    catch(|| {
        let buf = unsafe { std::slice::from_raw_parts(payload, payload_len as usize) };
        status_of(mapper().set_standard_metadata(raw_to_token(token), ty, buf))
    })
    .unwrap_or(StatusCode::NoResources as i32)
}

/// `getMetadata`: the generic entry point. Same wire contract as
/// `getStandardMetadata` above (see [`crate::mapper::Mapper::get_metadata`]).
#[no_mangle]
pub extern "C" fn vgfx_mapper_get_metadata(token: u64, metadata_type: i32, out: *mut u8, out_len: u32) -> i32 {
    let Some(ty) = standard_metadata_type_from_raw(metadata_type) else {
        return StatusCode::Unsupported as i32;
    };
    let Some(outcome) = catch(|| {
        let buf = unsafe { std::slice::from_raw_parts_mut(out, out_len as usize) };
        mapper().get_metadata(raw_to_token(token), ty, buf)
    }) else {
        return StatusCode::NoResources as i32;
    };
    match outcome {
        Ok(MetadataQuery::Written(n)) => n as i32,
        Ok(MetadataQuery::NeedsSize(n)) => n as i32,
        Err(e) => e.as_status_code() as i32,
    }
}

/// `setMetadata`: the generic entry point.
#[no_mangle]
pub extern "C" fn vgfx_mapper_set_metadata(token: u64, metadata_type: i32, payload: *const u8, payload_len: u32) -> i32 {
    let Some(ty) = standard_metadata_type_from_raw(metadata_type) else {
        return StatusCode::Unsupported as i32;
    };
    catch(|| {
        let buf = unsafe { std::slice::from_raw_parts(payload, payload_len as usize) };
        status_of(mapper().set_metadata(raw_to_token(token), ty, buf))
    })
    .unwrap_or(StatusCode::NoResources as i32)
}

/// `listSupportedMetadataTypes`: writes `(typeEnum, isSettable)` pairs into
/// the caller's parallel `out_types`/`out_settable` arrays. Same
/// positive-byte-count-or-NeedsSize convention as the metadata getters
/// above, except the unit is "entries" rather than bytes: a buffer too
/// small to hold every entry reports the entry count needed, without
/// writing anything.
#[no_mangle]
pub extern "C" fn vgfx_mapper_list_supported_metadata_types(out_types: *mut i32, out_settable: *mut u8, max_len: u32) -> i32 {
    let Some(entries) = catch(|| mapper().list_supported_metadata_types()) else {
        return StatusCode::NoResources as i32;
    };
    if entries.len() > max_len as usize {
        return entries.len() as i32;
    }
    unsafe {
        for (i, (ty, settable)) in entries.iter().enumerate() {
            *out_types.add(i) = *ty as i32;
            *out_settable.add(i) = *settable as u8;
        }
    }
    entries.len() as i32
}

/// `dumpBuffer`: writes the human-readable summary into `out` if it fits,
/// else reports the required byte length without writing (same convention
/// as `getStandardMetadata`). The summary is not NUL-terminated; `out_len`
/// on success is the exact byte count the caller should read.
#[no_mangle]
pub extern "C" fn vgfx_mapper_dump_buffer(token: u64, out: *mut u8, out_len: u32) -> i32 {
    let Some(outcome) = catch(|| mapper().dump_buffer(raw_to_token(token))) else {
        return StatusCode::NoResources as i32;
    };
    match outcome {
        Ok(text) => write_dump(&text, out, out_len),
        Err(e) => e.as_status_code() as i32,
    }
}

/// `dumpAllBuffers`: same convention as `dumpBuffer`, one line per live
/// buffer.
#[no_mangle]
pub extern "C" fn vgfx_mapper_dump_all_buffers(out: *mut u8, out_len: u32) -> i32 {
    let Some(text) = catch(|| mapper().dump_all_buffers()) else {
        return StatusCode::NoResources as i32;
    };
    write_dump(&text, out, out_len)
}

fn write_dump(text: &str, out: *mut u8, out_len: u32) -> i32 {
    let bytes = text.as_bytes();
    if bytes.len() > out_len as usize {
        return bytes.len() as i32;
    }
    unsafe { std::ptr::copy_nonoverlapping(bytes.as_ptr(), out, bytes.len()) };
    bytes.len() as i32
}

#[no_mangle]
pub extern "C" fn vgfx_mapper_get_transport_size(token: u64, out_num_fds: *mut u32, out_num_ints: *mut u32) -> i32 {
    let Some(outcome) = catch(|| mapper().get_transport_size(raw_to_token(token))) else {
        return StatusCode::NoResources as i32;
    };
    match outcome {
        Ok((fds, ints)) => {
            unsafe {
                *out_num_fds = fds;
                *out_num_ints = ints;
            }
            StatusCode::Ok as i32
        }
        Err(e) => e.as_status_code() as i32,
    }
}

#[no_mangle]
pub extern "C" fn vgfx_mapper_get_reserved_region(token: u64, out_ptr: *mut usize, out_size: *mut u64) -> i32 {
    let Some(outcome) = catch(|| mapper().get_reserved_region(raw_to_token(token))) else {
        return StatusCode::NoResources as i32;
    };
    match outcome {
        Ok((ptr, size)) => {
            unsafe {
                *out_ptr = ptr;
                *out_size = size;
            }
            StatusCode::Ok as i32
        }
        Err(e) => e.as_status_code() as i32,
    }
}

fn standard_metadata_type_from_raw(raw: i32) -> Option<StandardMetadataType> {
    crate::standard_metadata::ALL.iter().copied().find(|t| *t as i32 == raw)
}

fn token_to_raw(token: crate::BufferToken) -> u64 {
    token.raw()
}

fn raw_to_token(raw: u64) -> crate::BufferToken {
    crate::BufferToken::from_raw(raw)
}
