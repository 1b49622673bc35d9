//! The length-prefixed, tagged-enum wire protocol the allocator service
//! listens on: `allocate2`, `isSupported`, `getIMapperLibrarySuffix`, and
//! the legacy `allocate` stub. Framed the same way `vgfx_host::channel`'s
//! `UnixHostChannel` frames its own requests, and in the same tagged-enum +
//! `encode_*`/`decode_*` free-function style as `aero-ipc`'s
//! `Command`/`Event` wire types.

use vgfx_types::error::StatusCode;
use vgfx_types::handle::WireBufferHandle;
use vgfx_types::{AllocError, BufferDescriptorInfo, BufferHandle};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    Allocate2 { descriptor: BufferDescriptorInfo, count: i32 },
    IsSupported { descriptor: BufferDescriptorInfo },
    GetLibrarySuffix,
    /// The pre-existing encoded-descriptor `allocate` entry point; always
    /// answered with `Unsupported`.
    AllocateLegacy { encoded: Vec<u8>, count: i32 },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    Allocation { stride: i32, buffers: Vec<WireBufferHandle> },
    Supported(bool),
    LibrarySuffix(String),
    Error(StatusCode),
}

fn encode_descriptor(out: &mut Vec<u8>, d: &BufferDescriptorInfo) {
    out.extend_from_slice(&d.width.to_le_bytes());
    out.extend_from_slice(&d.height.to_le_bytes());
    out.extend_from_slice(&d.format.to_le_bytes());
    out.extend_from_slice(&d.layer_count.to_le_bytes());
    out.extend_from_slice(&d.usage.to_le_bytes());
    out.extend_from_slice(&d.reserved_size.to_le_bytes());
    out.extend_from_slice(&(d.name.len() as u32).to_le_bytes());
    out.extend_from_slice(d.name.as_bytes());
    out.extend_from_slice(&(d.additional_options.len() as u32).to_le_bytes());
    for (k, v) in &d.additional_options {
        out.extend_from_slice(&(k.len() as u32).to_le_bytes());
        out.extend_from_slice(k.as_bytes());
        out.extend_from_slice(&(v.len() as u32).to_le_bytes());
        out.extend_from_slice(v.as_bytes());
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecodeError;

fn decode_descriptor(bytes: &[u8], cursor: &mut usize) -> Result<BufferDescriptorInfo, DecodeError> {
    let i32_at = |bytes: &[u8], off: usize| -> Result<i32, DecodeError> {
        bytes.get(off..off + 4).map(|b| i32::from_le_bytes(b.try_into().unwrap())).ok_or(DecodeError)
    };
    let u32_at = |bytes: &[u8], off: usize| -> Result<u32, DecodeError> {
        bytes.get(off..off + 4).map(|b| u32::from_le_bytes(b.try_into().unwrap())).ok_or(DecodeError)
    };
    let u64_at = |bytes: &[u8], off: usize| -> Result<u64, DecodeError> {
        bytes.get(off..off + 8).map(|b| u64::from_le_bytes(b.try_into().unwrap())).ok_or(DecodeError)
    };
    let i64_at = |bytes: &[u8], off: usize| -> Result<i64, DecodeError> {
        bytes.get(off..off + 8).map(|b| i64::from_le_bytes(b.try_into().unwrap())).ok_or(DecodeError)
    };

    let width = i32_at(bytes, *cursor)?;
    let height = i32_at(bytes, *cursor + 4)?;
    let format = i32_at(bytes, *cursor + 8)?;
    let layer_count = i32_at(bytes, *cursor + 12)?;
    let usage = u64_at(bytes, *cursor + 16)?;
    let reserved_size = i64_at(bytes, *cursor + 24)?;
    *cursor += 32;

    let name_len = u32_at(bytes, *cursor)? as usize;
    *cursor += 4;
    let name = String::from_utf8(bytes.get(*cursor..*cursor + name_len).ok_or(DecodeError)?.to_vec())
        .map_err(|_| DecodeError)?;
    *cursor += name_len;

    let option_count = u32_at(bytes, *cursor)? as usize;
    *cursor += 4;
    let mut additional_options = Vec::with_capacity(option_count);
    for _ in 0..option_count {
        let klen = u32_at(bytes, *cursor)? as usize;
        *cursor += 4;
        let k = String::from_utf8(bytes.get(*cursor..*cursor + klen).ok_or(DecodeError)?.to_vec())
            .map_err(|_| DecodeError)?;
        *cursor += klen;
        let vlen = u32_at(bytes, *cursor)? as usize;
        *cursor += 4;
        let v = String::from_utf8(bytes.get(*cursor..*cursor + vlen).ok_or(DecodeError)?.to_vec())
            .map_err(|_| DecodeError)?;
        *cursor += vlen;
        additional_options.push((k, v));
    }

    Ok(BufferDescriptorInfo { width, height, format, layer_count, usage, reserved_size, name, additional_options })
}

pub fn encode_request(req: &Request) -> Vec<u8> {
    let mut out = Vec::new();
    match req {
        Request::Allocate2 { descriptor, count } => {
            out.push(0);
            encode_descriptor(&mut out, descriptor);
            out.extend_from_slice(&count.to_le_bytes());
        }
        Request::IsSupported { descriptor } => {
            out.push(1);
            encode_descriptor(&mut out, descriptor);
        }
        Request::GetLibrarySuffix => out.push(2),
        Request::AllocateLegacy { encoded, count } => {
            out.push(3);
            out.extend_from_slice(&(encoded.len() as u32).to_le_bytes());
            out.extend_from_slice(encoded);
            out.extend_from_slice(&count.to_le_bytes());
        }
    }
    out
}

pub fn decode_request(bytes: &[u8]) -> Result<Request, DecodeError> {
    let tag = *bytes.first().ok_or(DecodeError)?;
    let mut cursor = 1usize;
    Ok(match tag {
        0 => {
            let descriptor = decode_descriptor(bytes, &mut cursor)?;
            let count = i32::from_le_bytes(bytes.get(cursor..cursor + 4).ok_or(DecodeError)?.try_into().unwrap());
            Request::Allocate2 { descriptor, count }
        }
        1 => Request::IsSupported { descriptor: decode_descriptor(bytes, &mut cursor)? },
        2 => Request::GetLibrarySuffix,
        3 => {
            let len = u32::from_le_bytes(bytes.get(cursor..cursor + 4).ok_or(DecodeError)?.try_into().unwrap()) as usize;
            cursor += 4;
            let encoded = bytes.get(cursor..cursor + len).ok_or(DecodeError)?.to_vec();
            cursor += len;
            let count = i32::from_le_bytes(bytes.get(cursor..cursor + 4).ok_or(DecodeError)?.try_into().unwrap());
            Request::AllocateLegacy { encoded, count }
        }
        _ => return Err(DecodeError),
    })
}

pub fn encode_response(resp: &Response) -> Vec<u8> {
    let mut out = Vec::new();
    match resp {
        Response::Allocation { stride, buffers } => {
            out.push(0);
            out.extend_from_slice(&stride.to_le_bytes());
            out.extend_from_slice(&(buffers.len() as u32).to_le_bytes());
            for b in buffers {
                out.extend_from_slice(&b.to_bytes());
            }
        }
        Response::Supported(v) => {
            out.push(1);
            out.push(*v as u8);
        }
        Response::LibrarySuffix(s) => {
            out.push(2);
            out.extend_from_slice(&(s.len() as u32).to_le_bytes());
            out.extend_from_slice(s.as_bytes());
        }
        Response::Error(code) => {
            out.push(3);
            out.extend_from_slice(&(*code as i32).to_le_bytes());
        }
    }
    out
}

/// Maps an `AllocError` to the `Error` wire response carrying its
/// service-specific status code.
pub fn error_response(err: &AllocError) -> Response {
    Response::Error(err.as_status_code())
}

pub fn decode_response(bytes: &[u8]) -> Result<Response, DecodeError> {
    let tag = *bytes.first().ok_or(DecodeError)?;
    let body = &bytes[1..];
    Ok(match tag {
        0 => {
            let stride = i32::from_le_bytes(body.get(0..4).ok_or(DecodeError)?.try_into().unwrap());
            let count = u32::from_le_bytes(body.get(4..8).ok_or(DecodeError)?.try_into().unwrap()) as usize;
            let mut cursor = 8;
            let mut buffers = Vec::with_capacity(count);
            for _ in 0..count {
                let wire = WireBufferHandle::from_bytes(&body[cursor..]).map_err(|_| DecodeError)?;
                cursor += 8 + (wire.fds.len() + wire.ints.len()) * 4;
                buffers.push(wire);
            }
            Response::Allocation { stride, buffers }
        }
        1 => Response::Supported(*body.first().ok_or(DecodeError)? != 0),
        2 => {
            let len = u32::from_le_bytes(body.get(0..4).ok_or(DecodeError)?.try_into().unwrap()) as usize;
            let s = String::from_utf8(body.get(4..4 + len).ok_or(DecodeError)?.to_vec()).map_err(|_| DecodeError)?;
            Response::LibrarySuffix(s)
        }
        3 => {
            let raw = i32::from_le_bytes(body.get(0..4).ok_or(DecodeError)?.try_into().unwrap());
            Response::Error(status_code_from_raw(raw).ok_or(DecodeError)?)
        }
        _ => return Err(DecodeError),
    })
}

fn status_code_from_raw(raw: i32) -> Option<StatusCode> {
    Some(match raw {
        0 => StatusCode::Ok,
        -1 => StatusCode::BadDescriptor,
        -2 => StatusCode::Unsupported,
        -3 => StatusCode::NoResources,
        -4 => StatusCode::BadBuffer,
        -5 => StatusCode::BadValue,
        _ => return None,
    })
}
