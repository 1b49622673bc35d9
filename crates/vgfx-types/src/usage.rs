//! The 64-bit buffer usage bitmask carried on every descriptor and handle.
//!
//! Bit positions follow the source HAL's `BufferUsage` layout so that the
//! reserved-bit rejection rule in `AllocatorEngine::validate` lines up with
//! real-world descriptors.

use bitflags::bitflags;

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct Usage: u64 {
        const CPU_READ_NEVER        = 0;
        const CPU_READ_RARELY       = 1 << 1;
        const CPU_READ_OFTEN        = 1 << 2;
        const CPU_WRITE_NEVER       = 0;
        const CPU_WRITE_RARELY      = 1 << 4;
        const CPU_WRITE_OFTEN       = 1 << 5;
        const GPU_TEXTURE           = 1 << 8;
        const GPU_RENDER_TARGET     = 1 << 9;
        // bit 10 is reserved by the source ABI and must never be set.
        const COMPOSER_OVERLAY      = 1 << 11;
        const COMPOSER_CLIENT_TARGET = 1 << 12;
        // bit 13 is reserved.
        const PROTECTED             = 1 << 14;
        const GPU_DATA_BUFFER       = 1 << 24;
        // bit 19 is reserved.
        // bit 21 is reserved.
    }
}

impl Usage {
    /// Bits the source ABI reserves for future use. A descriptor or handle
    /// setting any of these is malformed.
    pub const RESERVED: u64 = (1 << 10) | (1 << 13) | (1 << 19) | (1 << 21);

    pub const CPU_READ_MASK: u64 =
        Self::CPU_READ_RARELY.bits() | Self::CPU_READ_OFTEN.bits();
    pub const CPU_WRITE_MASK: u64 =
        Self::CPU_WRITE_RARELY.bits() | Self::CPU_WRITE_OFTEN.bits();
    pub const CPU_READ_WRITE_MASK: u64 = Self::CPU_READ_MASK | Self::CPU_WRITE_MASK;

    pub const GPU_MASK: u64 = Self::GPU_TEXTURE.bits()
        | Self::GPU_RENDER_TARGET.bits()
        | Self::GPU_DATA_BUFFER.bits()
        | Self::COMPOSER_OVERLAY.bits()
        | Self::COMPOSER_CLIENT_TARGET.bits();

    pub fn has_reserved_bits(bits: u64) -> bool {
        bits & Self::RESERVED != 0
    }

    pub fn wants_gpu(self) -> bool {
        self.bits() & Self::GPU_MASK != 0
    }

    pub fn wants_cpu_read_write(self) -> bool {
        self.bits() & Self::CPU_READ_WRITE_MASK != 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reserved_bits_are_detected() {
        assert!(Usage::has_reserved_bits(1 << 10));
        assert!(Usage::has_reserved_bits(1 << 13));
        assert!(Usage::has_reserved_bits(1 << 19));
        assert!(Usage::has_reserved_bits(1 << 21));
        assert!(!Usage::has_reserved_bits(Usage::GPU_TEXTURE.bits()));
    }

    #[test]
    fn gpu_mask_matches_gpu_and_composer_bits() {
        let usage = Usage::GPU_TEXTURE | Usage::COMPOSER_OVERLAY;
        assert!(usage.wants_gpu());
        assert!(!Usage::CPU_READ_OFTEN.wants_gpu());
    }
}
