//! Exercises `Mapper` against a real `memfd`-backed shared region (so
//! `lock`/`unlock` actually dereference mapped memory) and a fake host
//! channel (so no live host agent is required), reusing
//! `vgfx_allocator::AllocatorEngine` to produce real allocated handles the
//! same way a client process would receive them over IPC.
#![cfg(target_os = "linux")]

use std::sync::Arc;

use vgfx_allocator::AllocatorEngine;
use vgfx_host::fake::{FakeHostChannel, FakePipeClient};
use vgfx_host::{HostMemoryAllocator, MemfdHostMemoryAllocator};
use vgfx_types::format::Format;
use vgfx_types::{BufferDescriptorInfo, BufferHandle, Usage};

use crate::error::MapperError;
use crate::mapper::{Mapper, MetadataQuery, Region};
use crate::standard_metadata::StandardMetadataType;

fn descriptor(format: Format, width: i32, height: i32, usage: u64) -> BufferDescriptorInfo {
    BufferDescriptorInfo {
        width,
        height,
        format: format as i32,
        layer_count: 1,
        usage,
        reserved_size: 0,
        name: "test".into(),
        additional_options: Vec::new(),
    }
}

fn allocate_one(
    host_memory: Arc<MemfdHostMemoryAllocator>,
    format: Format,
    width: i32,
    height: i32,
    usage: u64,
) -> BufferHandle {
    let engine = AllocatorEngine::new(Arc::new(FakeHostChannel::new()), host_memory, Arc::new(FakePipeClient::new()));
    let (_, mut buffers) = engine.allocate(&descriptor(format, width, height, usage), 1).unwrap();
    buffers.remove(0)
}

fn new_mapper(host_memory: Arc<MemfdHostMemoryAllocator>) -> Mapper {
    Mapper::new(Arc::new(FakeHostChannel::new()), host_memory).unwrap()
}

#[test]
fn import_rejects_malformed_handle() {
    let host_memory = Arc::new(MemfdHostMemoryAllocator::new());
    let mapper = new_mapper(host_memory);
    let mut handle = allocate_one(Arc::new(MemfdHostMemoryAllocator::new()), Format::Rgba8888, 4, 4, Usage::CPU_READ_OFTEN.bits());
    handle.host_handle = 7;
    handle.host_handle_refcount_fd = -1;
    assert!(matches!(mapper.import_buffer(&handle), Err(MapperError::BadBuffer(_))));
}

#[test]
fn lock_rejects_double_lock() {
    let host_memory = Arc::new(MemfdHostMemoryAllocator::new());
    let handle = allocate_one(host_memory.clone(), Format::Rgba8888, 4, 4, Usage::CPU_READ_OFTEN.bits() | Usage::CPU_WRITE_OFTEN.bits());
    let mapper = new_mapper(host_memory);
    let token = mapper.import_buffer(&handle).unwrap();
    let region = Region { left: 0, top: 0, width: 4, height: 4 };
    mapper.lock(token, Usage::CPU_WRITE_OFTEN, region, -1).unwrap();
    assert!(matches!(mapper.lock(token, Usage::CPU_WRITE_OFTEN, region, -1), Err(MapperError::BadBuffer(_))));
}

#[test]
fn lock_rejects_out_of_bounds_region() {
    let host_memory = Arc::new(MemfdHostMemoryAllocator::new());
    let handle = allocate_one(host_memory.clone(), Format::Rgba8888, 4, 4, Usage::CPU_READ_OFTEN.bits());
    let mapper = new_mapper(host_memory);
    let token = mapper.import_buffer(&handle).unwrap();
    let region = Region { left: 0, top: 0, width: 100, height: 100 };
    assert!(matches!(mapper.lock(token, Usage::CPU_READ_OFTEN, region, -1), Err(MapperError::BadValue(_))));
}

#[test]
fn flush_without_write_lock_is_bad_buffer() {
    let host_memory = Arc::new(MemfdHostMemoryAllocator::new());
    let handle = allocate_one(host_memory.clone(), Format::Rgba8888, 4, 4, Usage::CPU_READ_OFTEN.bits());
    let mapper = new_mapper(host_memory);
    let token = mapper.import_buffer(&handle).unwrap();
    let region = Region { left: 0, top: 0, width: 4, height: 4 };
    mapper.lock(token, Usage::CPU_READ_OFTEN, region, -1).unwrap();
    assert!(matches!(mapper.flush_locked_buffer(token), Err(MapperError::BadBuffer(_))));
}

#[test]
fn free_buffer_then_operate_is_bad_buffer() {
    let host_memory = Arc::new(MemfdHostMemoryAllocator::new());
    let handle = allocate_one(host_memory.clone(), Format::Rgba8888, 4, 4, Usage::CPU_READ_OFTEN.bits());
    let mapper = new_mapper(host_memory);
    let token = mapper.import_buffer(&handle).unwrap();
    mapper.free_buffer(token).unwrap();
    assert!(matches!(mapper.free_buffer(token), Err(MapperError::BadBuffer(_))));
    let region = Region { left: 0, top: 0, width: 4, height: 4 };
    assert!(matches!(mapper.lock(token, Usage::CPU_READ_OFTEN, region, -1), Err(MapperError::BadBuffer(_))));
}

/// Write pattern P under a CPU-write lock, unlock, then a second `Mapper`
/// importing the same handle (sharing the same underlying `memfd` pages)
/// reads the pattern back through its own lock. Neither side involves GPU
/// backing, so no host interaction happens; this exercises only the
/// shared-memory contract.
#[test]
fn write_then_cross_import_read_back_round_trip() {
    let host_memory = Arc::new(MemfdHostMemoryAllocator::new());
    let handle = allocate_one(
        host_memory.clone(),
        Format::Rgba8888,
        100,
        100,
        Usage::CPU_READ_OFTEN.bits() | Usage::CPU_WRITE_OFTEN.bits(),
    );

    let writer = new_mapper(host_memory.clone());
    let write_token = writer.import_buffer(&handle).unwrap();
    let region = Region { left: 0, top: 0, width: 100, height: 100 };
    let write_ptr = writer.lock(write_token, Usage::CPU_WRITE_OFTEN, region, -1).unwrap();

    let pattern: Vec<u8> = (0..handle.buffer_size as usize).map(|i| (i % 251) as u8).collect();
    unsafe { std::ptr::copy_nonoverlapping(pattern.as_ptr(), write_ptr as *mut u8, pattern.len()) };
    writer.unlock(write_token).unwrap();

    let reader = new_mapper(host_memory);
    let read_token = reader.import_buffer(&handle).unwrap();
    let read_ptr = reader.lock(read_token, Usage::CPU_READ_OFTEN, region, -1).unwrap();
    let read_back = unsafe { std::slice::from_raw_parts(read_ptr as *const u8, pattern.len()) };
    assert_eq!(read_back, pattern.as_slice());
}

/// `getStandardMetadata(PLANE_LAYOUTS)` for a YV12 buffer decodes to three
/// plane records with subsampling shifts
/// `(0,0), (1,1), (1,1)` (factors `(1,1), (2,2), (2,2)`).
#[test]
fn plane_layouts_decode_yv12_subsampling() {
    let host_memory = Arc::new(MemfdHostMemoryAllocator::new());
    let handle = allocate_one(host_memory.clone(), Format::Yv12, 16, 16, Usage::CPU_READ_OFTEN.bits());
    let mapper = new_mapper(host_memory);
    let token = mapper.import_buffer(&handle).unwrap();

    let mut buf = vec![0u8; 4096];
    let outcome = mapper.get_standard_metadata(token, StandardMetadataType::PlaneLayouts, &mut buf).unwrap();
    let MetadataQuery::Written(len) = outcome else { panic!("expected Written, got {outcome:?}") };
    let decoded = crate::standard_metadata::decode_plane_layouts(&buf[..len]);
    let shifts: Vec<(u8, u8)> =
        decoded.iter().map(|p| (p.horizontal_subsampling_shift, p.vertical_subsampling_shift)).collect();
    assert_eq!(shifts, vec![(0, 0), (1, 1), (1, 1)]);
}

#[test]
fn allocation_size_matches_mmaped_size() {
    let host_memory = Arc::new(MemfdHostMemoryAllocator::new());
    let handle = allocate_one(host_memory.clone(), Format::Rgba8888, 8, 8, Usage::CPU_READ_OFTEN.bits());
    let mmaped_size = handle.mmaped_size;
    let mapper = new_mapper(host_memory);
    let token = mapper.import_buffer(&handle).unwrap();

    let mut buf = vec![0u8; 256];
    let outcome = mapper.get_standard_metadata(token, StandardMetadataType::AllocationSize, &mut buf).unwrap();
    let MetadataQuery::Written(len) = outcome else { panic!("expected Written, got {outcome:?}") };
    let payload = &buf[len - 8..len];
    assert_eq!(u64::from_le_bytes(payload.try_into().unwrap()), mmaped_size);
}

#[test]
fn set_standard_metadata_rejects_unsettable_type() {
    let host_memory = Arc::new(MemfdHostMemoryAllocator::new());
    let handle = allocate_one(host_memory.clone(), Format::Rgba8888, 4, 4, Usage::CPU_READ_OFTEN.bits());
    let mapper = new_mapper(host_memory);
    let token = mapper.import_buffer(&handle).unwrap();
    let result = mapper.set_standard_metadata(token, StandardMetadataType::Width, &4i32.to_le_bytes());
    assert!(matches!(result, Err(MapperError::Unsupported(_))));
}

#[test]
fn get_standard_metadata_reports_required_size_when_buffer_too_small() {
    let host_memory = Arc::new(MemfdHostMemoryAllocator::new());
    let handle = allocate_one(host_memory.clone(), Format::Rgba8888, 4, 4, Usage::CPU_READ_OFTEN.bits());
    let mapper = new_mapper(host_memory);
    let token = mapper.import_buffer(&handle).unwrap();
    let mut tiny = [0u8; 1];
    let outcome = mapper.get_standard_metadata(token, StandardMetadataType::Name, &mut tiny).unwrap();
    assert!(matches!(outcome, MetadataQuery::NeedsSize(n) if n > 1));
}

/// `getMetadata`/`setMetadata` share the `StandardMetadataType` tag space
/// with `getStandardMetadata`/`setStandardMetadata`; the generic entry
/// points just forward to them.
#[test]
fn generic_get_and_set_metadata_share_standard_tag_space() {
    let host_memory = Arc::new(MemfdHostMemoryAllocator::new());
    let handle = allocate_one(host_memory.clone(), Format::Rgba8888, 4, 4, Usage::CPU_READ_OFTEN.bits());
    let mapper = new_mapper(host_memory);
    let token = mapper.import_buffer(&handle).unwrap();

    mapper.set_metadata(token, StandardMetadataType::Dataspace, &7i32.to_le_bytes()).unwrap();
    let mut buf = vec![0u8; 256];
    let outcome = mapper.get_metadata(token, StandardMetadataType::Dataspace, &mut buf).unwrap();
    let MetadataQuery::Written(len) = outcome else { panic!("expected Written, got {outcome:?}") };
    assert_eq!(i32::from_le_bytes(buf[len - 4..len].try_into().unwrap()), 7);
}

/// A corrupted X record magic is classified `Fatal`: `import_buffer` aborts
/// the process rather than returning a recoverable error, since the shared
/// region can no longer be trusted.
#[test]
#[should_panic(expected = "fatal invariant violation")]
fn import_aborts_on_corrupted_x_record_magic() {
    let host_memory = Arc::new(MemfdHostMemoryAllocator::new());
    let handle = allocate_one(host_memory.clone(), Format::Rgba8888, 4, 4, Usage::CPU_READ_OFTEN.bits());
    let mapper = new_mapper(host_memory.clone());

    let ptr = host_memory.memory_map(handle.buffer_fd, handle.mmaped_offset, handle.mmaped_size).unwrap();
    unsafe {
        let magic_ptr = (ptr + handle.external_metadata_offset as usize) as *mut u8;
        std::ptr::write_bytes(magic_ptr, 0xFF, 8);
    }
    host_memory.memory_unmap(ptr, handle.mmaped_size).unwrap();

    let _ = mapper.import_buffer(&handle);
}

#[test]
fn dump_buffer_covers_the_full_standard_metadata_set() {
    let host_memory = Arc::new(MemfdHostMemoryAllocator::new());
    let handle = allocate_one(host_memory.clone(), Format::Yv12, 16, 16, Usage::CPU_READ_OFTEN.bits());
    let mapper = new_mapper(host_memory);
    let token = mapper.import_buffer(&handle).unwrap();

    let dump = mapper.dump_buffer(token).unwrap();
    assert!(dump.contains("PlaneLayouts=3 plane(s)"), "dump was: {dump}");
    assert!(dump.contains("Crop="), "dump was: {dump}");
    assert!(dump.contains("Width=16"), "dump was: {dump}");
    assert!(dump.contains("BufferId="), "dump was: {dump}");
}

#[test]
fn dump_all_buffers_has_one_line_per_live_buffer() {
    let host_memory = Arc::new(MemfdHostMemoryAllocator::new());
    let a = allocate_one(host_memory.clone(), Format::Rgba8888, 4, 4, Usage::CPU_READ_OFTEN.bits());
    let b = allocate_one(host_memory.clone(), Format::Rgba8888, 8, 8, Usage::CPU_READ_OFTEN.bits());
    let mapper = new_mapper(host_memory);
    mapper.import_buffer(&a).unwrap();
    mapper.import_buffer(&b).unwrap();
    assert_eq!(mapper.dump_all_buffers().lines().count(), 2);
}
