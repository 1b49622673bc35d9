use std::sync::Arc;

use vgfx_host::fake::{FakeHostChannel, FakeHostMemoryAllocator, FakePipeClient};
use vgfx_types::error::StatusCode;
use vgfx_types::format::Format;
use vgfx_types::{AllocError, BufferDescriptorInfo, Usage};

use crate::AllocatorEngine;

fn descriptor(width: i32, height: i32, format: i32, usage: u64) -> BufferDescriptorInfo {
    BufferDescriptorInfo {
        width,
        height,
        format,
        layer_count: 1,
        usage,
        reserved_size: 0,
        name: "test".into(),
        additional_options: Vec::new(),
    }
}

fn engine() -> AllocatorEngine {
    AllocatorEngine::new(
        Arc::new(FakeHostChannel::new()),
        Arc::new(FakeHostMemoryAllocator::new()),
        Arc::new(FakePipeClient::new()),
    )
}

#[test]
fn allocate_rgba8888_1920x1080_matches_scenario_one() {
    let engine = engine();
    let usage = (Usage::CPU_READ_OFTEN | Usage::CPU_WRITE_OFTEN | Usage::GPU_TEXTURE).bits();
    let d = descriptor(1920, 1080, Format::Rgba8888 as i32, usage);

    let (stride, buffers) = engine.allocate(&d, 1).unwrap();
    assert_eq!(stride, 1920);
    let handle = &buffers[0];
    assert_eq!(handle.buffer_size, 1920 * 1080 * 4);
    assert_ne!(handle.host_handle, 0);
    assert_eq!(handle.drm_format, vgfx_types::format::drm_fourcc(Format::Rgba8888));
}

#[test]
fn allocate_yv12_640x480_matches_scenario_two() {
    let engine = engine();
    let usage = (Usage::CPU_READ_OFTEN | Usage::CPU_WRITE_OFTEN).bits();
    let d = descriptor(640, 480, Format::Yv12 as i32, usage);

    let (_stride, buffers) = engine.allocate(&d, 1).unwrap();
    let planes = vgfx_types::format::resolve_planes(Format::Yv12, 640, 480);
    assert_eq!(planes.len(), 3);
    assert_eq!(planes[0].stride_in_bytes, 640);
    assert_eq!(planes[1].stride_in_bytes, 320);
    assert_eq!(planes[2].stride_in_bytes, 320);
    assert_eq!(planes[1].offset_in_bytes, 640 * 480);
    assert_eq!(buffers[0].buffer_size, planes.iter().map(|p| p.total_size_in_bytes).sum::<u64>());
}

#[test]
fn allocate_blob_with_gpu_texture_is_unsupported() {
    let engine = engine();
    let d = descriptor(256, 256, Format::Blob as i32, Usage::GPU_TEXTURE.bits());
    let err = engine.allocate(&d, 1).unwrap_err();
    assert_eq!(err.as_status_code(), StatusCode::Unsupported);
}

#[test]
fn allocate_rejects_nonpositive_count() {
    let engine = engine();
    let d = descriptor(64, 64, Format::Rgba8888 as i32, 0);
    assert!(matches!(engine.allocate(&d, 0), Err(AllocError::BadDescriptor(_))));
}

#[test]
fn allocate_rejects_zero_width() {
    let engine = engine();
    let d = descriptor(0, 64, Format::Rgba8888 as i32, 0);
    assert!(matches!(engine.allocate(&d, 1), Err(AllocError::BadDescriptor(_))));
}

#[test]
fn allocate_rejects_wrong_layer_count() {
    let mut d = descriptor(64, 64, Format::Rgba8888 as i32, 0);
    d.layer_count = 2;
    let engine = engine();
    assert!(matches!(engine.allocate(&d, 1), Err(AllocError::BadDescriptor(_))));
}

#[test]
fn allocate_rejects_reserved_usage_bit() {
    let engine = engine();
    let d = descriptor(64, 64, Format::Rgba8888 as i32, 1 << 10);
    assert!(matches!(engine.allocate(&d, 1), Err(AllocError::BadDescriptor(_))));
}

#[test]
fn access_region_out_of_bounds_style_descriptor_rejections_are_bad_descriptor() {
    let engine = engine();
    let mut d = descriptor(64, 64, Format::Rgba8888 as i32, 0);
    d.reserved_size = -1;
    assert!(matches!(engine.allocate(&d, 1), Err(AllocError::BadDescriptor(_))));
}

#[test]
fn failed_batch_rolls_back_and_reports_no_resources() {
    // 100x100 RGBA8888 is 40000 bytes of image plus the X record; size the
    // budget to let two buffers through and fail the third, exercising the
    // rollback path across a multi-buffer batch.
    let host_memory = Arc::new(FakeHostMemoryAllocator::new().fail_after_bytes(90_000));
    let engine = AllocatorEngine::new(
        Arc::new(FakeHostChannel::new()),
        Arc::clone(&host_memory) as Arc<dyn vgfx_host::HostMemoryAllocator>,
        Arc::new(FakePipeClient::new()),
    );
    let d = descriptor(100, 100, Format::Rgba8888 as i32, 0);

    let err = engine.allocate(&d, 3).unwrap_err();
    assert_eq!(err.as_status_code(), StatusCode::NoResources);

    // The rollback loop preserves the source's skip-index-0 bound (see
    // DESIGN.md): of the two buffers that succeeded before the third
    // failed, only index 1 is unwound, leaving index 0's block live.
    assert_eq!(host_memory.live_block_count(), 1);
}

#[test]
fn is_supported_agrees_with_allocate_accept_reject() {
    let engine = engine();
    let ok = descriptor(16, 16, Format::Rgba8888 as i32, 0);
    assert!(engine.is_supported(&ok));
    assert!(engine.allocate(&ok, 1).is_ok());

    let bad = descriptor(0, 16, Format::Rgba8888 as i32, 0);
    assert!(!engine.is_supported(&bad));
}

#[test]
fn library_suffix_is_ranchu() {
    assert_eq!(engine().library_suffix(), "ranchu");
}

#[test]
fn legacy_allocate_entry_point_is_always_unsupported() {
    let engine = engine();
    assert!(matches!(engine.allocate_legacy(&[]), Err(AllocError::Unsupported(_))));
}
