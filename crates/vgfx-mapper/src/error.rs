//! The mapper's own error taxonomy. Kept separate from
//! `vgfx_types::AllocError` even though several variants name-match: the
//! mapper never returns `BadDescriptor`, and broken invariants go through
//! [`fatal`] rather than a recoverable variant. Each component keeps its
//! own rich error type distinct from the wire status codes both convert
//! to.

use thiserror::Error;

use vgfx_types::error::StatusCode;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum MapperError {
    #[error("unknown or already-freed buffer handle: {0}")]
    BadBuffer(String),
    #[error("bad value: {0}")]
    BadValue(String),
    #[error("no resources: {0}")]
    NoResources(String),
    #[error("unsupported metadata type or format: {0}")]
    Unsupported(String),
}

impl MapperError {
    pub fn as_status_code(&self) -> StatusCode {
        match self {
            MapperError::BadBuffer(_) => StatusCode::BadBuffer,
            MapperError::BadValue(_) => StatusCode::BadValue,
            MapperError::NoResources(_) => StatusCode::NoResources,
            MapperError::Unsupported(_) => StatusCode::Unsupported,
        }
    }
}

pub type Result<T> = std::result::Result<T, MapperError>;

/// A broken invariant classified `Fatal`: magic mismatch, an impossible
/// internal state, or a failed unlock of the process's own buffer. Aborts
/// the process via an always-on assertion rather than returning a
/// recoverable error, since a corrupted shared-memory region is not safe
/// to keep running against.
#[track_caller]
pub fn fatal(message: &str) -> ! {
    panic!("vgfx-mapper: fatal invariant violation: {message}");
}
