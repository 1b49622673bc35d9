//! Thin trait wrappers over the three "trusted collaborator" leaf modules
//! provided externally: the host-channel client (H), the host memory
//! allocator (AS), and the host pipe client (P).
//!
//! Every call the allocator and mapper make to the host goes through these
//! traits rather than a concrete transport, the way `aero-gpu`'s tests swap
//! a `VecGuestMemory` in for real guest RAM: production code gets a
//! transport-backed implementation, tests get [`fake`]'s in-memory one.

pub mod channel;
pub mod fake;
pub mod memory;
pub mod pipe;

#[cfg(test)]
mod tests;

pub use channel::{FeatureInfo, HostChannel, HostChannelError};
pub use memory::{HostBlock, HostMemoryAllocator, HostMemoryError};
pub use pipe::{PipeClient, PipeError};

#[cfg(target_os = "linux")]
pub use memory::MemfdHostMemoryAllocator;
#[cfg(unix)]
pub use pipe::NamedFifoPipeClient;
#[cfg(unix)]
pub use channel::UnixHostChannel;
