//! The imported-buffer set: the per-process table of currently imported
//! buffers, guarded by a single mutex that every other mapper operation
//! consults for validation first. Same register/resolve/destroy shape as
//! `aero-gpu::shared_surface`'s `SharedSurfaceTable`, specialized to one
//! entry per imported handle rather than an alias graph.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use vgfx_types::metadata::ExternalMetadata;
use vgfx_types::BufferHandle;

use crate::error::{MapperError, Result};

/// Opaque process-local identity for an imported buffer, handed back by
/// `import_buffer` and required by every subsequent call. Stands in for the
/// source's raw `buffer_handle_t*`/`cb_handle_t*` pointer identity without
/// exposing a real pointer in the safe API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BufferToken(u64);

impl BufferToken {
    /// Reinterprets a raw `u64` as a token, for the C-ABI boundary in
    /// [`crate::abi`] where callers round-trip a token opaquely.
    pub fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    pub fn raw(self) -> u64 {
        self.0
    }
}

/// One imported buffer's live state: the owned handle copy (with
/// process-local `buffer_ptr`/`locked_usage` filled in) plus a
/// monotonically increasing import sequence number used only to give
/// `dumpAllBuffers` a stable iteration order; not part of the wire format.
pub struct ManagedBuffer {
    pub handle: BufferHandle,
    pub metadata: ExternalMetadata,
    pub import_seq: u64,
}

#[derive(Default)]
pub struct ImportedBufferSet {
    next_token: AtomicU64,
    entries: Mutex<HashMap<BufferToken, ManagedBuffer>>,
}

impl ImportedBufferSet {
    pub fn new() -> Self {
        Self { next_token: AtomicU64::new(1), entries: Mutex::new(HashMap::new()) }
    }

    /// Inserts a freshly imported handle, returning the token callers use
    /// to refer to it from then on.
    pub fn insert(&self, handle: BufferHandle, metadata: ExternalMetadata) -> BufferToken {
        let seq = self.next_token.fetch_add(1, Ordering::SeqCst);
        let token = BufferToken(seq);
        self.entries.lock().unwrap().insert(token, ManagedBuffer { handle, metadata, import_seq: seq });
        token
    }

    /// Removes and returns the entry for `token`; `BadBuffer` if it was
    /// never imported or was already freed.
    pub fn remove(&self, token: BufferToken) -> Result<ManagedBuffer> {
        self.entries
            .lock()
            .unwrap()
            .remove(&token)
            .ok_or_else(|| MapperError::BadBuffer(format!("unknown buffer token {token:?}")))
    }

    /// Runs `f` against the entry for `token` while holding the set's
    /// mutex, returning `BadBuffer` if it's not imported. Every mapper
    /// operation besides `import`/`free` goes through this so validation
    /// and the mutation it guards happen atomically with respect to
    /// concurrent `freeBuffer` calls.
    pub fn with_entry<T>(&self, token: BufferToken, f: impl FnOnce(&mut ManagedBuffer) -> Result<T>) -> Result<T> {
        let mut entries = self.entries.lock().unwrap();
        let entry = entries
            .get_mut(&token)
            .ok_or_else(|| MapperError::BadBuffer(format!("unknown buffer token {token:?}")))?;
        f(entry)
    }

    /// Snapshots every live entry ordered by import sequence, for
    /// `dumpAllBuffers`. Holds the mutex for the duration of the snapshot
    /// so the dump is a consistent view.
    pub fn snapshot_ordered(&self) -> Vec<(BufferToken, BufferHandle)> {
        let entries = self.entries.lock().unwrap();
        let mut items: Vec<_> = entries.iter().map(|(t, e)| (*t, e.handle.clone(), e.import_seq)).collect();
        items.sort_by_key(|(_, _, seq)| *seq);
        items.into_iter().map(|(t, h, _)| (t, h)).collect()
    }

    pub fn snapshot_tokens(&self) -> Vec<BufferToken> {
        self.snapshot_ordered().into_iter().map(|(t, _)| t).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_handle() -> BufferHandle {
        BufferHandle {
            buffer_fd: 3,
            host_handle_refcount_fd: -1,
            host_handle: 0,
            usage: 0,
            format: 1,
            drm_format: 0,
            stride: 0,
            buffer_size: 0,
            mmaped_size: 0,
            mmaped_offset: 0,
            external_metadata_offset: 0,
            buffer_ptr: None,
            locked_usage: 0,
        }
    }

    fn sample_metadata() -> ExternalMetadata {
        ExternalMetadata {
            buffer_id: 1,
            width: 4,
            height: 4,
            gl_format: -1,
            gl_type: -1,
            reserved_region_size: 0,
            dataspace: 0,
            blend_mode: 0,
            name: String::new(),
            planes: Vec::new(),
            smpte2086: None,
            cta861_3: None,
        }
    }

    #[test]
    fn insert_then_remove_round_trips() {
        let set = ImportedBufferSet::new();
        let token = set.insert(sample_handle(), sample_metadata());
        assert_eq!(set.len(), 1);
        let entry = set.remove(token).unwrap();
        assert_eq!(entry.handle.buffer_fd, 3);
        assert!(set.is_empty());
    }

    #[test]
    fn remove_unknown_token_is_bad_buffer() {
        let set = ImportedBufferSet::new();
        let token = set.insert(sample_handle(), sample_metadata());
        set.remove(token).unwrap();
        assert!(matches!(set.remove(token), Err(MapperError::BadBuffer(_))));
    }

    #[test]
    fn snapshot_is_ordered_by_import_sequence() {
        let set = ImportedBufferSet::new();
        for i in 0..5 {
            let mut h = sample_handle();
            h.buffer_fd = i;
            set.insert(h, sample_metadata());
        }
        let snapshot = set.snapshot_ordered();
        let fds: Vec<i32> = snapshot.iter().map(|(_, h)| h.buffer_fd).collect();
        assert_eq!(fds, vec![0, 1, 2, 3, 4]);
    }
}
