use crate::channel::HostChannel;
use crate::fake::{FakeHostChannel, FakeHostMemoryAllocator, FakePipeClient};
use crate::memory::HostMemoryAllocator;
use crate::pipe::PipeClient;

#[test]
fn create_color_buffer_dma_allocates_unique_handles() {
    let host = FakeHostChannel::new();
    let a = host.create_color_buffer_dma(64, 64, 1, 1).unwrap();
    let b = host.create_color_buffer_dma(64, 64, 1, 1).unwrap();
    assert_ne!(a, b);
    assert_eq!(host.open_buffer_count(), 2);
    host.close_color_buffer(a).unwrap();
    assert_eq!(host.open_buffer_count(), 1);
}

#[test]
fn fail_nth_create_fails_only_that_call() {
    let host = FakeHostChannel::new().fail_nth_create(3);
    assert!(host.create_color_buffer_dma(1, 1, 0, 0).is_ok());
    assert!(host.create_color_buffer_dma(1, 1, 0, 0).is_ok());
    assert!(host.create_color_buffer_dma(1, 1, 0, 0).is_err());
    assert!(host.create_color_buffer_dma(1, 1, 0, 0).is_ok());
}

#[test]
fn host_malloc_tracks_live_blocks_until_freed() {
    let alloc = FakeHostMemoryAllocator::new();
    let block = alloc.host_malloc(4096).unwrap();
    assert_eq!(alloc.live_block_count(), 1);
    alloc.host_free(&block).unwrap();
    assert_eq!(alloc.live_block_count(), 0);
}

#[test]
fn host_malloc_exhaustion_is_reported() {
    let alloc = FakeHostMemoryAllocator::new().fail_after_bytes(1024);
    assert!(alloc.host_malloc(512).is_ok());
    assert!(alloc.host_malloc(1024).is_err());
}

#[test]
fn pipe_open_close_round_trips() {
    let pipe = FakePipeClient::new();
    let fd = pipe.open("refcount").unwrap();
    pipe.write(fd, &[1, 2, 3, 4]).unwrap();
    assert_eq!(pipe.open_fd_count(), 1);
    pipe.close(fd).unwrap();
    assert_eq!(pipe.open_fd_count(), 0);
}
