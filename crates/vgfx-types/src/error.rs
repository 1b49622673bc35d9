//! The error taxonomy shared by the allocator service and the mapper
//! library. Each variant carries a stable wire status code so it survives
//! the IPC boundary.

use thiserror::Error;

/// Service-specific status codes carried back across the allocator's and
/// mapper's wire protocols.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum StatusCode {
    Ok = 0,
    BadDescriptor = -1,
    Unsupported = -2,
    NoResources = -3,
    BadBuffer = -4,
    BadValue = -5,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AllocError {
    #[error("malformed descriptor: {0}")]
    BadDescriptor(String),

    #[error("unsupported format or metadata type: {0}")]
    Unsupported(String),

    #[error("no resources: {0}")]
    NoResources(String),

    #[error("bad buffer handle: {0}")]
    BadBuffer(String),

    #[error("bad value: {0}")]
    BadValue(String),
}

impl AllocError {
    pub fn as_status_code(&self) -> StatusCode {
        match self {
            AllocError::BadDescriptor(_) => StatusCode::BadDescriptor,
            AllocError::Unsupported(_) => StatusCode::Unsupported,
            AllocError::NoResources(_) => StatusCode::NoResources,
            AllocError::BadBuffer(_) => StatusCode::BadBuffer,
            AllocError::BadValue(_) => StatusCode::BadValue,
        }
    }
}

impl From<crate::format::FormatError> for AllocError {
    fn from(e: crate::format::FormatError) -> Self {
        AllocError::Unsupported(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, AllocError>;
