use vgfx_types::error::StatusCode;
use vgfx_types::handle::WireBufferHandle;
use vgfx_types::{BufferDescriptorInfo, BufferHandle};

use crate::protocol::{decode_request, decode_response, encode_request, encode_response, Request, Response};

fn sample_descriptor() -> BufferDescriptorInfo {
    BufferDescriptorInfo {
        width: 1920,
        height: 1080,
        format: 1,
        layer_count: 1,
        usage: 0x30C,
        reserved_size: 16,
        name: "framebuffer".into(),
        additional_options: vec![("k".into(), "v".into())],
    }
}

#[test]
fn allocate2_request_round_trips() {
    let req = Request::Allocate2 { descriptor: sample_descriptor(), count: 2 };
    let bytes = encode_request(&req);
    assert_eq!(decode_request(&bytes).unwrap(), req);
}

#[test]
fn is_supported_request_round_trips() {
    let req = Request::IsSupported { descriptor: sample_descriptor() };
    let bytes = encode_request(&req);
    assert_eq!(decode_request(&bytes).unwrap(), req);
}

#[test]
fn get_library_suffix_request_round_trips() {
    let req = Request::GetLibrarySuffix;
    assert_eq!(decode_request(&encode_request(&req)).unwrap(), req);
}

#[test]
fn allocate_legacy_request_round_trips() {
    let req = Request::AllocateLegacy { encoded: vec![1, 2, 3, 4], count: 1 };
    assert_eq!(decode_request(&encode_request(&req)).unwrap(), req);
}

#[test]
fn allocation_response_round_trips() {
    let handle = BufferHandle {
        buffer_fd: 3,
        host_handle_refcount_fd: 4,
        host_handle: 7,
        usage: 0x30C,
        format: 1,
        drm_format: 0x34324241,
        stride: 1920,
        buffer_size: 1920 * 1080 * 4,
        mmaped_size: 1920 * 1080 * 4 + 1024,
        mmaped_offset: 0x1000,
        external_metadata_offset: 1920 * 1080 * 4,
        buffer_ptr: None,
        locked_usage: 0,
    };
    let resp = Response::Allocation { stride: 1920, buffers: vec![WireBufferHandle::from_handle(&handle)] };
    let bytes = encode_response(&resp);
    assert_eq!(decode_response(&bytes).unwrap(), resp);
}

#[test]
fn error_response_round_trips_every_status_code() {
    for code in [
        StatusCode::Ok,
        StatusCode::BadDescriptor,
        StatusCode::Unsupported,
        StatusCode::NoResources,
        StatusCode::BadBuffer,
        StatusCode::BadValue,
    ] {
        let resp = Response::Error(code);
        assert_eq!(decode_response(&encode_response(&resp)).unwrap(), resp);
    }
}

#[test]
fn library_suffix_response_round_trips() {
    let resp = Response::LibrarySuffix("ranchu".into());
    assert_eq!(decode_response(&encode_response(&resp)).unwrap(), resp);
}
