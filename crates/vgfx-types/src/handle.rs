//! The buffer handle (CB): the unit passed between processes, plus the
//! descriptor clients submit to `allocate`/`isSupported`.

use thiserror::Error;

/// `{width, height, format, layerCount, usage, reservedSize, name}` plus
/// whatever a client packs into `additionalOptions` (always expected
/// empty; a non-empty value is a validation error, not a parse error).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BufferDescriptorInfo {
    pub width: i32,
    pub height: i32,
    pub format: i32,
    pub layer_count: i32,
    pub usage: u64,
    pub reserved_size: i64,
    pub name: String,
    pub additional_options: Vec<(String, String)>,
}

/// The in-process value type for a buffer handle (the source's
/// `cb_handle_t`). `buffer_ptr` and `locked_usage` are process-local and
/// never marshalled across the IPC boundary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BufferHandle {
    pub buffer_fd: i32,
    pub host_handle_refcount_fd: i32,
    pub host_handle: u32,
    pub usage: u64,
    pub format: i32,
    pub drm_format: u32,
    pub stride: i32,
    pub buffer_size: u64,
    pub mmaped_size: u64,
    pub mmaped_offset: u64,
    pub external_metadata_offset: u64,
    pub buffer_ptr: Option<usize>,
    pub locked_usage: u64,
}

impl BufferHandle {
    /// Structural invariants, checked wherever a handle is constructed
    /// or imported rather than trusted blindly from the wire.
    pub fn check_invariants(&self) -> Result<(), HandleError> {
        if self.host_handle != 0 && self.host_handle_refcount_fd < 0 {
            return Err(HandleError::Malformed(
                "hostHandle set without a refcount fd".into(),
            ));
        }
        if self.mmaped_size > 0 && self.buffer_fd < 0 {
            return Err(HandleError::Malformed(
                "mmapedSize set without a buffer fd".into(),
            ));
        }
        Ok(())
    }

    /// `(numFds, numInts)`, read directly from the handle per
    /// `getTransportSize`.
    pub fn transport_size(&self) -> (u32, u32) {
        (FD_COUNT, INT_COUNT)
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum HandleError {
    #[error("malformed buffer handle: {0}")]
    Malformed(String),
    #[error("truncated wire handle: need {needed} {kind}, got {got}")]
    Truncated { kind: &'static str, needed: u32, got: u32 },
}

/// `#[repr(C)]` mirrors of the wire int/fd arrays, used only to derive
/// array indices via `core::mem::offset_of!` (divided by each field's
/// `i32` width) rather than hand-picked literal indices, the same idiom
/// `metadata.rs` uses for the X record's byte offsets.
#[repr(C)]
struct WireFds {
    buffer_fd: i32,
    host_handle_refcount_fd: i32,
}

#[repr(C)]
struct WireInts {
    host_handle: i32,
    usage_lo: i32,
    usage_hi: i32,
    format: i32,
    drm_format: i32,
    stride: i32,
    buffer_size_lo: i32,
    buffer_size_hi: i32,
    mmaped_size_lo: i32,
    mmaped_size_hi: i32,
    mmaped_offset_lo: i32,
    mmaped_offset_hi: i32,
    external_metadata_offset_lo: i32,
    external_metadata_offset_hi: i32,
}

const FD_COUNT: u32 = (std::mem::size_of::<WireFds>() / 4) as u32;
const INT_COUNT: u32 = (std::mem::size_of::<WireInts>() / 4) as u32;

const IDX_BUFFER_FD: usize = std::mem::offset_of!(WireFds, buffer_fd) / 4;
const IDX_HOST_HANDLE_REFCOUNT_FD: usize = std::mem::offset_of!(WireFds, host_handle_refcount_fd) / 4;

const IDX_HOST_HANDLE: usize = std::mem::offset_of!(WireInts, host_handle) / 4;
const IDX_USAGE_LO: usize = std::mem::offset_of!(WireInts, usage_lo) / 4;
const IDX_USAGE_HI: usize = std::mem::offset_of!(WireInts, usage_hi) / 4;
const IDX_FORMAT: usize = std::mem::offset_of!(WireInts, format) / 4;
const IDX_DRM_FORMAT: usize = std::mem::offset_of!(WireInts, drm_format) / 4;
const IDX_STRIDE: usize = std::mem::offset_of!(WireInts, stride) / 4;
const IDX_BUFFER_SIZE_LO: usize = std::mem::offset_of!(WireInts, buffer_size_lo) / 4;
const IDX_BUFFER_SIZE_HI: usize = std::mem::offset_of!(WireInts, buffer_size_hi) / 4;
const IDX_MMAPED_SIZE_LO: usize = std::mem::offset_of!(WireInts, mmaped_size_lo) / 4;
const IDX_MMAPED_SIZE_HI: usize = std::mem::offset_of!(WireInts, mmaped_size_hi) / 4;
const IDX_MMAPED_OFFSET_LO: usize = std::mem::offset_of!(WireInts, mmaped_offset_lo) / 4;
const IDX_MMAPED_OFFSET_HI: usize = std::mem::offset_of!(WireInts, mmaped_offset_hi) / 4;
const IDX_EXTERNAL_METADATA_OFFSET_LO: usize = std::mem::offset_of!(WireInts, external_metadata_offset_lo) / 4;
const IDX_EXTERNAL_METADATA_OFFSET_HI: usize = std::mem::offset_of!(WireInts, external_metadata_offset_hi) / 4;

/// The marshalled form of a `BufferHandle`: counts of fds/ints followed by
/// the fd array and the inline int payload that reconstructs the scalar
/// fields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WireBufferHandle {
    pub fds: Vec<i32>,
    pub ints: Vec<i32>,
}

impl WireBufferHandle {
    pub fn from_handle(handle: &BufferHandle) -> Self {
        let usage = handle.usage.to_le_bytes();
        let buffer_size = handle.buffer_size.to_le_bytes();
        let mmaped_size = handle.mmaped_size.to_le_bytes();
        let mmaped_offset = handle.mmaped_offset.to_le_bytes();
        let external_metadata_offset = handle.external_metadata_offset.to_le_bytes();

        let split_u64 = |bytes: [u8; 8]| -> (i32, i32) {
            (
                i32::from_le_bytes(bytes[0..4].try_into().unwrap()),
                i32::from_le_bytes(bytes[4..8].try_into().unwrap()),
            )
        };
        let (usage_lo, usage_hi) = split_u64(usage);
        let (size_lo, size_hi) = split_u64(buffer_size);
        let (mmap_lo, mmap_hi) = split_u64(mmaped_size);
        let (off_lo, off_hi) = split_u64(mmaped_offset);
        let (meta_lo, meta_hi) = split_u64(external_metadata_offset);

        let mut fds = vec![0; FD_COUNT as usize];
        fds[IDX_BUFFER_FD] = handle.buffer_fd;
        fds[IDX_HOST_HANDLE_REFCOUNT_FD] = handle.host_handle_refcount_fd;

        let mut ints = vec![0; INT_COUNT as usize];
        ints[IDX_HOST_HANDLE] = handle.host_handle as i32;
        ints[IDX_USAGE_LO] = usage_lo;
        ints[IDX_USAGE_HI] = usage_hi;
        ints[IDX_FORMAT] = handle.format;
        ints[IDX_DRM_FORMAT] = handle.drm_format as i32;
        ints[IDX_STRIDE] = handle.stride;
        ints[IDX_BUFFER_SIZE_LO] = size_lo;
        ints[IDX_BUFFER_SIZE_HI] = size_hi;
        ints[IDX_MMAPED_SIZE_LO] = mmap_lo;
        ints[IDX_MMAPED_SIZE_HI] = mmap_hi;
        ints[IDX_MMAPED_OFFSET_LO] = off_lo;
        ints[IDX_MMAPED_OFFSET_HI] = off_hi;
        ints[IDX_EXTERNAL_METADATA_OFFSET_LO] = meta_lo;
        ints[IDX_EXTERNAL_METADATA_OFFSET_HI] = meta_hi;

        WireBufferHandle { fds, ints }
    }

    pub fn to_handle(&self) -> Result<BufferHandle, HandleError> {
        if self.fds.len() as u32 != FD_COUNT {
            return Err(HandleError::Truncated { kind: "fds", needed: FD_COUNT, got: self.fds.len() as u32 });
        }
        if self.ints.len() as u32 != INT_COUNT {
            return Err(HandleError::Truncated { kind: "ints", needed: INT_COUNT, got: self.ints.len() as u32 });
        }
        let join_u64 = |lo: i32, hi: i32| -> u64 {
            let mut bytes = [0u8; 8];
            bytes[0..4].copy_from_slice(&lo.to_le_bytes());
            bytes[4..8].copy_from_slice(&hi.to_le_bytes());
            u64::from_le_bytes(bytes)
        };

        let handle = BufferHandle {
            buffer_fd: self.fds[IDX_BUFFER_FD],
            host_handle_refcount_fd: self.fds[IDX_HOST_HANDLE_REFCOUNT_FD],
            host_handle: self.ints[IDX_HOST_HANDLE] as u32,
            usage: join_u64(self.ints[IDX_USAGE_LO], self.ints[IDX_USAGE_HI]),
            format: self.ints[IDX_FORMAT],
            drm_format: self.ints[IDX_DRM_FORMAT] as u32,
            stride: self.ints[IDX_STRIDE],
            buffer_size: join_u64(self.ints[IDX_BUFFER_SIZE_LO], self.ints[IDX_BUFFER_SIZE_HI]),
            mmaped_size: join_u64(self.ints[IDX_MMAPED_SIZE_LO], self.ints[IDX_MMAPED_SIZE_HI]),
            mmaped_offset: join_u64(self.ints[IDX_MMAPED_OFFSET_LO], self.ints[IDX_MMAPED_OFFSET_HI]),
            external_metadata_offset: join_u64(
                self.ints[IDX_EXTERNAL_METADATA_OFFSET_LO],
                self.ints[IDX_EXTERNAL_METADATA_OFFSET_HI],
            ),
            buffer_ptr: None,
            locked_usage: 0,
        };
        handle.check_invariants()?;
        Ok(handle)
    }

    /// Flattens to a single byte buffer: `numFds`, `numInts`, then the fd
    /// array, then the int payload, all little-endian `i32`s.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(8 + (self.fds.len() + self.ints.len()) * 4);
        out.extend_from_slice(&(self.fds.len() as i32).to_le_bytes());
        out.extend_from_slice(&(self.ints.len() as i32).to_le_bytes());
        for fd in &self.fds {
            out.extend_from_slice(&fd.to_le_bytes());
        }
        for i in &self.ints {
            out.extend_from_slice(&i.to_le_bytes());
        }
        out
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, HandleError> {
        if bytes.len() < 8 {
            return Err(HandleError::Truncated { kind: "header", needed: 8, got: bytes.len() as u32 });
        }
        let num_fds = i32::from_le_bytes(bytes[0..4].try_into().unwrap()) as usize;
        let num_ints = i32::from_le_bytes(bytes[4..8].try_into().unwrap()) as usize;
        let needed = 8 + (num_fds + num_ints) * 4;
        if bytes.len() < needed {
            return Err(HandleError::Truncated { kind: "body", needed: needed as u32, got: bytes.len() as u32 });
        }
        let mut cursor = 8;
        let mut fds = Vec::with_capacity(num_fds);
        for _ in 0..num_fds {
            fds.push(i32::from_le_bytes(bytes[cursor..cursor + 4].try_into().unwrap()));
            cursor += 4;
        }
        let mut ints = Vec::with_capacity(num_ints);
        for _ in 0..num_ints {
            ints.push(i32::from_le_bytes(bytes[cursor..cursor + 4].try_into().unwrap()));
            cursor += 4;
        }
        Ok(WireBufferHandle { fds, ints })
    }
}
