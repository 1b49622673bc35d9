//! Runtime configuration: the single `ro.boot.qemu.gralloc.debug_level`
//! property gating log verbosity.

use std::str::FromStr;

/// Verbosity levels, ordered as
/// `{ERROR, ALLOC, IMPORT, LOCK, FLUSH, METADATA}`: each level also
/// enables every level before it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum DebugLevel {
    Error = 0,
    Alloc = 1,
    Import = 2,
    Lock = 3,
    Flush = 4,
    Metadata = 5,
}

impl DebugLevel {
    pub const PROPERTY_NAME: &'static str = "ro.boot.qemu.gralloc.debug_level";

    pub fn from_raw(value: i32) -> Self {
        match value.clamp(0, 5) {
            0 => DebugLevel::Error,
            1 => DebugLevel::Alloc,
            2 => DebugLevel::Import,
            3 => DebugLevel::Lock,
            4 => DebugLevel::Flush,
            _ => DebugLevel::Metadata,
        }
    }

    /// Reads `ro.boot.qemu.gralloc.debug_level` from the environment,
    /// defaulting to `Error` (a property value of 0) when unset or
    /// unparsable. The host OS's real property namespace has no portable
    /// equivalent, so the environment variable stands in for it, the way
    /// `aero-storage-server`'s `clap` config reads its own env-backed
    /// flags.
    pub fn from_env() -> Self {
        std::env::var(Self::PROPERTY_NAME)
            .ok()
            .and_then(|v| i32::from_str(v.trim()).ok())
            .map(Self::from_raw)
            .unwrap_or(DebugLevel::Error)
    }

    pub fn enables(self, level: DebugLevel) -> bool {
        self >= level
    }
}

impl Default for DebugLevel {
    fn default() -> Self {
        DebugLevel::Error
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clamps_out_of_range_values() {
        assert_eq!(DebugLevel::from_raw(-1), DebugLevel::Error);
        assert_eq!(DebugLevel::from_raw(99), DebugLevel::Metadata);
    }

    #[test]
    fn higher_levels_enable_lower_ones() {
        assert!(DebugLevel::Metadata.enables(DebugLevel::Alloc));
        assert!(!DebugLevel::Alloc.enables(DebugLevel::Lock));
    }
}
