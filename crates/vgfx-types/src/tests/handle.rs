use crate::handle::{BufferHandle, HandleError, WireBufferHandle};

fn sample_handle() -> BufferHandle {
    BufferHandle {
        buffer_fd: 7,
        host_handle_refcount_fd: 8,
        host_handle: 0x1234_5678,
        usage: 0x00FF_00FF_00FF_00FFu64,
        format: 1,
        drm_format: 0x3432_4241,
        stride: 1920,
        buffer_size: 1920 * 1080 * 4,
        mmaped_size: 1920 * 1080 * 4 + 4096,
        mmaped_offset: 0xDEAD_0000,
        external_metadata_offset: 1920 * 1080 * 4,
        buffer_ptr: None,
        locked_usage: 0,
    }
}

#[test]
fn wire_round_trip_preserves_scalar_fields() {
    let handle = sample_handle();
    let wire = WireBufferHandle::from_handle(&handle);
    let back = wire.to_handle().unwrap();
    assert_eq!(back, handle);
}

#[test]
fn byte_round_trip_preserves_scalar_fields() {
    let handle = sample_handle();
    let wire = WireBufferHandle::from_handle(&handle);
    let bytes = wire.to_bytes();
    let decoded = WireBufferHandle::from_bytes(&bytes).unwrap();
    assert_eq!(decoded, wire);
}

#[test]
fn transport_size_matches_handle_layout() {
    let handle = sample_handle();
    assert_eq!(handle.transport_size(), (2, 14));
}

#[test]
fn invariant_rejects_host_handle_without_refcount_fd() {
    let mut handle = sample_handle();
    handle.host_handle_refcount_fd = -1;
    assert!(matches!(handle.check_invariants(), Err(_)));
}

#[test]
fn invariant_rejects_mmaped_size_without_buffer_fd() {
    let mut handle = sample_handle();
    handle.buffer_fd = -1;
    assert!(matches!(handle.check_invariants(), Err(_)));
}

#[test]
fn truncated_wire_payload_is_rejected() {
    let err = WireBufferHandle::from_bytes(&[0u8; 4]).unwrap_err();
    assert!(matches!(err, HandleError::Truncated { .. }));
}
