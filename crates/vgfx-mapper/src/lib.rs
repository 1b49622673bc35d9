//! The mapper library (M): loaded into every client process that imports
//! buffer handles allocated by `vgfx-allocator`. Builds a dual
//! `rlib`/`cdylib` the same way `aero-ipc` does, so the same code backs
//! both an ordinary Rust dependency and the C-ABI loader entry point in
//! [`abi`] that a non-Rust client process dlopens.

#[cfg(target_os = "linux")]
pub mod abi;
pub mod error;
pub mod imported;
pub mod mapper;
pub mod standard_metadata;

#[cfg(test)]
mod tests;

pub use error::{fatal, MapperError, Result};
pub use imported::BufferToken;
pub use mapper::{Mapper, MetadataQuery, Region};
pub use standard_metadata::StandardMetadataType;
