//! Standard metadata types and their wire encoding. Every
//! `getStandardMetadata`/`setStandardMetadata` record starts
//! with the same `(tag-string, type-enum)` header used across the platform's
//! parcelable metadata types, followed by a type-specific payload; encoded
//! here with the same manual `to_le_bytes`/`from_le_bytes` layout as
//! `vgfx_types::metadata::ExternalMetadata`.

use vgfx_types::format::{self, ComponentType};
use vgfx_types::metadata::ExternalMetadata;
use vgfx_types::BufferHandle;

/// The fully-qualified tag string every standard-metadata record is prefixed
/// with, matching the platform's Java-style class naming.
pub const TAG_NAME: &str = "android.hardware.graphics.common.StandardMetadataType";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum StandardMetadataType {
    BufferId = 1,
    Name = 2,
    Width = 3,
    Height = 4,
    LayerCount = 5,
    PixelFormatRequested = 6,
    PixelFormatFourcc = 7,
    PixelFormatModifier = 8,
    Usage = 9,
    AllocationSize = 10,
    ProtectedContent = 11,
    Compression = 12,
    Interlaced = 13,
    ChromaSiting = 14,
    PlaneLayouts = 15,
    Crop = 16,
    Dataspace = 17,
    BlendMode = 18,
    Smpte2086 = 19,
    Cta8613 = 20,
    Stride = 21,
}

/// Every type `listSupportedMetadataTypes` enumerates, in declaration
/// order.
pub const ALL: &[StandardMetadataType] = &[
    StandardMetadataType::BufferId,
    StandardMetadataType::Name,
    StandardMetadataType::Width,
    StandardMetadataType::Height,
    StandardMetadataType::LayerCount,
    StandardMetadataType::PixelFormatRequested,
    StandardMetadataType::PixelFormatFourcc,
    StandardMetadataType::PixelFormatModifier,
    StandardMetadataType::Usage,
    StandardMetadataType::AllocationSize,
    StandardMetadataType::ProtectedContent,
    StandardMetadataType::Compression,
    StandardMetadataType::Interlaced,
    StandardMetadataType::ChromaSiting,
    StandardMetadataType::PlaneLayouts,
    StandardMetadataType::Crop,
    StandardMetadataType::Dataspace,
    StandardMetadataType::BlendMode,
    StandardMetadataType::Smpte2086,
    StandardMetadataType::Cta8613,
    StandardMetadataType::Stride,
];

/// Only these four accept `setStandardMetadata`.
pub fn is_settable(ty: StandardMetadataType) -> bool {
    matches!(
        ty,
        StandardMetadataType::Dataspace
            | StandardMetadataType::BlendMode
            | StandardMetadataType::Smpte2086
            | StandardMetadataType::Cta8613
    )
}

fn header(ty: StandardMetadataType, out: &mut Vec<u8>) {
    out.extend_from_slice(&(TAG_NAME.len() as u32).to_le_bytes());
    out.extend_from_slice(TAG_NAME.as_bytes());
    out.extend_from_slice(&(ty as i32).to_le_bytes());
}

/// `DRM_FORMAT_MOD_LINEAR`: the only modifier this implementation ever
/// reports.
pub const DRM_FORMAT_MOD_LINEAR: u64 = 0;

/// Encodes the gettable payload for `ty` against one imported buffer's
/// handle and decoded metadata. Returns `None` for the four settable-only
/// shapes that have nothing else to report besides what's already encoded
/// elsewhere (never reached here since every listed type is gettable).
pub fn encode(ty: StandardMetadataType, handle: &BufferHandle, metadata: &ExternalMetadata) -> Vec<u8> {
    let mut out = Vec::new();
    header(ty, &mut out);
    match ty {
        StandardMetadataType::BufferId => out.extend_from_slice(&metadata.buffer_id.to_le_bytes()),
        StandardMetadataType::Name => {
            out.extend_from_slice(&(metadata.name.len() as u32).to_le_bytes());
            out.extend_from_slice(metadata.name.as_bytes());
        }
        StandardMetadataType::Width => out.extend_from_slice(&metadata.width.to_le_bytes()),
        StandardMetadataType::Height => out.extend_from_slice(&metadata.height.to_le_bytes()),
        StandardMetadataType::LayerCount => out.extend_from_slice(&1i32.to_le_bytes()),
        StandardMetadataType::PixelFormatRequested => out.extend_from_slice(&handle.format.to_le_bytes()),
        StandardMetadataType::PixelFormatFourcc => out.extend_from_slice(&handle.drm_format.to_le_bytes()),
        StandardMetadataType::PixelFormatModifier => out.extend_from_slice(&DRM_FORMAT_MOD_LINEAR.to_le_bytes()),
        StandardMetadataType::Usage => out.extend_from_slice(&handle.usage.to_le_bytes()),
        StandardMetadataType::AllocationSize => out.extend_from_slice(&handle.mmaped_size.to_le_bytes()),
        StandardMetadataType::ProtectedContent => {
            let protected = (handle.usage & vgfx_types::Usage::PROTECTED.bits()) != 0;
            out.push(protected as u8);
        }
        StandardMetadataType::Compression => out.extend_from_slice(&0i32.to_le_bytes()), // NONE
        StandardMetadataType::Interlaced => out.extend_from_slice(&0i32.to_le_bytes()),   // NONE
        StandardMetadataType::ChromaSiting => {
            let is_yuv = metadata.planes.len() > 1;
            // SITED_INTERSTITIAL for YUV formats, NONE otherwise.
            out.extend_from_slice(&(if is_yuv { 1i32 } else { 0i32 }).to_le_bytes());
        }
        StandardMetadataType::PlaneLayouts => encode_plane_layouts(metadata, &mut out),
        StandardMetadataType::Crop => encode_crop(metadata, &mut out),
        StandardMetadataType::Dataspace => out.extend_from_slice(&metadata.dataspace.to_le_bytes()),
        StandardMetadataType::BlendMode => out.extend_from_slice(&metadata.blend_mode.to_le_bytes()),
        StandardMetadataType::Smpte2086 => encode_smpte2086(metadata, &mut out),
        StandardMetadataType::Cta8613 => encode_cta861_3(metadata, &mut out),
        StandardMetadataType::Stride => out.extend_from_slice(&(stride(metadata)).to_le_bytes()),
    }
    out
}

/// `getStandardMetadata(STRIDE)`: plane-0 pixel stride for single-plane
/// formats, 0 otherwise.
fn stride(metadata: &ExternalMetadata) -> i32 {
    if metadata.planes.len() == 1 {
        let plane = &metadata.planes[0];
        if plane.sample_increment_in_bytes > 0 {
            return (plane.stride_in_bytes / plane.sample_increment_in_bytes) as i32;
        }
    }
    0
}

fn encode_plane_layouts(metadata: &ExternalMetadata, out: &mut Vec<u8>) {
    out.extend_from_slice(&(metadata.planes.len() as u32).to_le_bytes());
    for plane in &metadata.planes {
        out.extend_from_slice(&(plane.components.len() as u32).to_le_bytes());
        for c in &plane.components {
            out.extend_from_slice(&ComponentType::as_wire_tag(c.ty).to_le_bytes());
            out.extend_from_slice(&c.offset_in_bits.to_le_bytes());
            out.extend_from_slice(&c.size_in_bits.to_le_bytes());
        }
        let width_in_samples = if plane.sample_increment_in_bytes > 0 {
            plane.stride_in_bytes / plane.sample_increment_in_bytes
        } else {
            0
        };
        let height_in_samples = if plane.stride_in_bytes > 0 {
            plane.total_size_in_bytes / plane.stride_in_bytes
        } else {
            0
        };
        out.extend_from_slice(&plane.offset_in_bytes.to_le_bytes());
        out.extend_from_slice(&(plane.sample_increment_in_bytes * 8).to_le_bytes());
        out.extend_from_slice(&plane.stride_in_bytes.to_le_bytes());
        out.extend_from_slice(&width_in_samples.to_le_bytes());
        out.extend_from_slice(&height_in_samples.to_le_bytes());
        out.extend_from_slice(&plane.total_size_in_bytes.to_le_bytes());
        out.push(plane.horizontal_subsampling_shift);
        out.push(plane.vertical_subsampling_shift);
    }
}

/// Reports `(0, 0, width, height)` per plane as plain `int32`s: real crop
/// rectangles are never computed, every plane reports the full buffer
/// extent.
fn encode_crop(metadata: &ExternalMetadata, out: &mut Vec<u8>) {
    let plane_count = metadata.planes.len().max(1) as u32;
    out.extend_from_slice(&plane_count.to_le_bytes());
    for _ in 0..plane_count {
        out.extend_from_slice(&0i32.to_le_bytes());
        out.extend_from_slice(&0i32.to_le_bytes());
        out.extend_from_slice(&(metadata.width as i32).to_le_bytes());
        out.extend_from_slice(&(metadata.height as i32).to_le_bytes());
    }
}

fn encode_smpte2086(metadata: &ExternalMetadata, out: &mut Vec<u8>) {
    match &metadata.smpte2086 {
        Some(s) => {
            out.push(1);
            for v in [
                s.display_primary_red.0,
                s.display_primary_red.1,
                s.display_primary_green.0,
                s.display_primary_green.1,
                s.display_primary_blue.0,
                s.display_primary_blue.1,
                s.white_point.0,
                s.white_point.1,
                s.max_luminance,
                s.min_luminance,
            ] {
                out.extend_from_slice(&v.to_le_bytes());
            }
        }
        None => out.push(0),
    }
}

fn encode_cta861_3(metadata: &ExternalMetadata, out: &mut Vec<u8>) {
    match &metadata.cta861_3 {
        Some(c) => {
            out.push(1);
            out.extend_from_slice(&c.max_content_light_level.to_le_bytes());
            out.extend_from_slice(&c.max_frame_average_light_level.to_le_bytes());
        }
        None => out.push(0),
    }
}

/// A decoded `PLANE_LAYOUTS` record, used by tests and `dumpBuffer` to avoid
/// re-parsing the raw byte encoding above.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedPlane {
    pub horizontal_subsampling_shift: u8,
    pub vertical_subsampling_shift: u8,
}

pub fn decode_plane_layouts(bytes: &[u8]) -> Vec<DecodedPlane> {
    let header_len = 4 + TAG_NAME.len() + 4;
    let mut cursor = header_len;
    let plane_count = u32::from_le_bytes(bytes[cursor..cursor + 4].try_into().unwrap()) as usize;
    cursor += 4;
    let mut out = Vec::with_capacity(plane_count);
    for _ in 0..plane_count {
        let component_count = u32::from_le_bytes(bytes[cursor..cursor + 4].try_into().unwrap()) as usize;
        cursor += 4;
        cursor += component_count * (4 + 8 + 8);
        cursor += 8 * 5; // offsetInBytes, sampleIncrementInBits, strideInBytes, widthInSamples, heightInSamples
        cursor += 8; // totalSizeInBytes
        let h_shift = bytes[cursor];
        let v_shift = bytes[cursor + 1];
        cursor += 2;
        out.push(DecodedPlane { horizontal_subsampling_shift: h_shift, vertical_subsampling_shift: v_shift });
    }
    out
}

pub fn format_supports_gpu_note(handle: &BufferHandle) -> bool {
    format::lookup(handle.format).map(format::supports_gpu).unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use vgfx_types::format::{self as fmt, Format};

    fn sample_handle() -> BufferHandle {
        BufferHandle {
            buffer_fd: 3,
            host_handle_refcount_fd: -1,
            host_handle: 0,
            usage: vgfx_types::Usage::CPU_READ_OFTEN.bits(),
            format: Format::Rgba8888 as i32,
            drm_format: fmt::drm_fourcc(Format::Rgba8888),
            stride: 0,
            buffer_size: 0,
            mmaped_size: 12345,
            mmaped_offset: 0,
            external_metadata_offset: 0,
            buffer_ptr: None,
            locked_usage: 0,
        }
    }

    fn sample_metadata(format: Format, width: u32, height: u32) -> ExternalMetadata {
        ExternalMetadata {
            buffer_id: 7,
            width,
            height,
            gl_format: -1,
            gl_type: -1,
            reserved_region_size: 0,
            dataspace: 0,
            blend_mode: 0,
            name: "buf".into(),
            planes: fmt::resolve_planes(format, width, height),
            smpte2086: None,
            cta861_3: None,
        }
    }

    #[test]
    fn allocation_size_matches_mmaped_size() {
        let handle = sample_handle();
        let metadata = sample_metadata(Format::Rgba8888, 4, 4);
        let bytes = encode(StandardMetadataType::AllocationSize, &handle, &metadata);
        let payload = &bytes[bytes.len() - 8..];
        assert_eq!(u64::from_le_bytes(payload.try_into().unwrap()), handle.mmaped_size);
    }

    #[test]
    fn stride_is_zero_for_multiplane_formats() {
        let metadata = sample_metadata(Format::Yv12, 8, 8);
        assert_eq!(stride(&metadata), 0);
    }

    #[test]
    fn plane_layouts_round_trip_subsampling_for_yv12() {
        let handle = {
            let mut h = sample_handle();
            h.format = Format::Yv12 as i32;
            h
        };
        let metadata = sample_metadata(Format::Yv12, 16, 16);
        let bytes = encode(StandardMetadataType::PlaneLayouts, &handle, &metadata);
        let decoded = decode_plane_layouts(&bytes);
        let shifts: Vec<(u8, u8)> =
            decoded.iter().map(|p| (p.horizontal_subsampling_shift, p.vertical_subsampling_shift)).collect();
        assert_eq!(shifts, vec![(0, 0), (1, 1), (1, 1)]);
    }

    #[test]
    fn only_four_types_are_settable() {
        let settable: Vec<StandardMetadataType> = ALL.iter().copied().filter(|t| is_settable(*t)).collect();
        assert_eq!(settable.len(), 4);
    }
}
