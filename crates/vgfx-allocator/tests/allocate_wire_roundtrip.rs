//! End-to-end: a descriptor goes in as a wire request, comes back out as a
//! wire response, and the reconstructed handles match what the engine
//! actually allocated.

use std::sync::Arc;

use vgfx_allocator::engine::AllocatorEngine;
use vgfx_allocator::protocol::{decode_request, encode_request, encode_response, Request, Response};
use vgfx_host::fake::{FakeHostChannel, FakeHostMemoryAllocator, FakePipeClient};
use vgfx_types::format::Format;
use vgfx_types::handle::WireBufferHandle;
use vgfx_types::{BufferDescriptorInfo, Usage};

#[test]
fn allocate2_over_the_wire_yields_the_same_handle_fields() {
    let engine = AllocatorEngine::new(
        Arc::new(FakeHostChannel::new()),
        Arc::new(FakeHostMemoryAllocator::new()),
        Arc::new(FakePipeClient::new()),
    );

    let descriptor = BufferDescriptorInfo {
        width: 1920,
        height: 1080,
        format: Format::Rgba8888 as i32,
        layer_count: 1,
        usage: (Usage::CPU_READ_OFTEN | Usage::CPU_WRITE_OFTEN | Usage::GPU_TEXTURE).bits(),
        reserved_size: 0,
        name: "fb".into(),
        additional_options: Vec::new(),
    };

    let wire_request = encode_request(&Request::Allocate2 { descriptor: descriptor.clone(), count: 1 });
    let Request::Allocate2 { descriptor: decoded, count } = decode_request(&wire_request).unwrap() else {
        panic!("expected Allocate2");
    };
    assert_eq!(decoded, descriptor);

    let (stride, buffers) = engine.allocate(&decoded, count).unwrap();
    let response = Response::Allocation {
        stride,
        buffers: buffers.iter().map(WireBufferHandle::from_handle).collect(),
    };
    let wire_response = encode_response(&response);

    let decoded_response = vgfx_allocator::protocol::decode_response(&wire_response).unwrap();
    let Response::Allocation { stride: decoded_stride, buffers: decoded_buffers } = decoded_response else {
        panic!("expected Allocation");
    };

    assert_eq!(decoded_stride, 1920);
    let reconstructed = decoded_buffers[0].to_handle().unwrap();
    assert_eq!(reconstructed.stride, buffers[0].stride);
    assert_eq!(reconstructed.buffer_size, buffers[0].buffer_size);
    assert_eq!(reconstructed.host_handle, buffers[0].host_handle);
    assert_ne!(reconstructed.host_handle, 0);
}
