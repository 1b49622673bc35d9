#![cfg(target_os = "linux")]

use crate::memory::{HostMemoryAllocator, MemfdHostMemoryAllocator};
use crate::pipe::PipeClient;
use crate::NamedFifoPipeClient;

#[test]
fn memfd_allocator_round_trips_a_block() {
    let alloc = MemfdHostMemoryAllocator::new();
    let block = alloc.host_malloc(4096).unwrap();
    assert!(block.fd >= 0);
    assert_ne!(block.guest_virtual_ptr, 0);

    unsafe {
        std::ptr::write_bytes(block.guest_virtual_ptr as *mut u8, 0xAB, 4096);
        let byte = *(block.guest_virtual_ptr as *const u8);
        assert_eq!(byte, 0xAB);
    }

    alloc.host_free(&block).unwrap();
}

/// A second block allocated from the same allocator instance gets a
/// nonzero `host_physical_offset` (the allocator's running counter); that
/// value must not be threaded back into `memory_map` as a byte offset into
/// the block's own dedicated memfd, or the second mapping would land past
/// its 4096-byte file and fail.
#[test]
fn memfd_allocator_maps_second_block_from_its_own_fd_start() {
    let alloc = MemfdHostMemoryAllocator::new();
    let first = alloc.host_malloc(4096).unwrap();
    let second = alloc.host_malloc(4096).unwrap();
    assert_ne!(first.host_physical_offset, second.host_physical_offset);

    let mapped = alloc.memory_map(second.fd, second.host_physical_offset, second.size).unwrap();
    unsafe {
        std::ptr::write_bytes(mapped as *mut u8, 0xCD, 4096);
        assert_eq!(*(mapped as *const u8), 0xCD);
    }
    alloc.memory_unmap(mapped, second.size).unwrap();

    alloc.host_free(&first).unwrap();
    alloc.host_free(&second).unwrap();
}

#[test]
fn named_fifo_pipe_opens_writes_and_closes() {
    let dir = std::env::temp_dir().join(format!("vgfx-host-test-{}", std::process::id()));
    std::fs::create_dir_all(&dir).unwrap();
    let pipe = NamedFifoPipeClient::new(dir.clone());

    let fd = pipe.open("refcount-test").unwrap();
    pipe.write(fd, &42u32.to_le_bytes()).unwrap();
    pipe.close(fd).unwrap();

    std::fs::remove_dir_all(&dir).ok();
}
