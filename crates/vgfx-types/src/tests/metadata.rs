use crate::format::{self, Format};
use crate::metadata::{Cta8613, ExternalMetadata, Smpte2086, MAGIC, RECORD_BYTES};

fn sample(format: Format, width: u32, height: u32) -> ExternalMetadata {
    ExternalMetadata {
        buffer_id: 42,
        width,
        height,
        gl_format: -1,
        gl_type: -1,
        reserved_region_size: 0,
        dataspace: 0,
        blend_mode: 0,
        name: "fb".to_string(),
        planes: format::resolve_planes(format, width, height),
        smpte2086: None,
        cta861_3: None,
    }
}

#[test]
fn record_size_is_16_byte_aligned() {
    assert_eq!(RECORD_BYTES % 16, 0);
}

#[test]
fn encoded_record_begins_with_magic() {
    let meta = sample(Format::Rgba8888, 1920, 1080);
    let bytes = meta.encode().unwrap();
    assert_eq!(bytes.len(), RECORD_BYTES);
    assert_eq!(u64::from_le_bytes(bytes[0..8].try_into().unwrap()), MAGIC);
}

#[test]
fn round_trip_preserves_single_plane_layout() {
    let meta = sample(Format::Rgba8888, 1920, 1080);
    let bytes = meta.encode().unwrap();
    let decoded = ExternalMetadata::decode(&bytes).unwrap();
    assert_eq!(decoded.planes, meta.planes);
    assert_eq!(decoded.name, "fb");
    assert_eq!(decoded.buffer_id, 42);
}

#[test]
fn round_trip_preserves_yv12_three_plane_layout() {
    let meta = sample(Format::Yv12, 640, 480);
    let bytes = meta.encode().unwrap();
    let decoded = ExternalMetadata::decode(&bytes).unwrap();
    assert_eq!(decoded.planes.len(), 3);
    assert_eq!(decoded.planes, meta.planes);
}

#[test]
fn round_trip_preserves_hdr_metadata_when_present() {
    let mut meta = sample(Format::RgbaU1010102, 64, 64);
    meta.smpte2086 = Some(Smpte2086 {
        display_primary_red: (0.640, 0.330),
        display_primary_green: (0.300, 0.600),
        display_primary_blue: (0.150, 0.060),
        white_point: (0.3127, 0.3290),
        max_luminance: 1000.0,
        min_luminance: 0.01,
    });
    meta.cta861_3 = Some(Cta8613 {
        max_content_light_level: 1000.0,
        max_frame_average_light_level: 400.0,
    });

    let bytes = meta.encode().unwrap();
    let decoded = ExternalMetadata::decode(&bytes).unwrap();
    assert_eq!(decoded.smpte2086, meta.smpte2086);
    assert_eq!(decoded.cta861_3, meta.cta861_3);
}

#[test]
fn clearing_hdr_metadata_clears_has_flags_on_decode() {
    let meta = sample(Format::Rgba8888, 64, 64);
    let bytes = meta.encode().unwrap();
    let decoded = ExternalMetadata::decode(&bytes).unwrap();
    assert!(decoded.smpte2086.is_none());
    assert!(decoded.cta861_3.is_none());
}

#[test]
fn bad_magic_is_rejected() {
    let meta = sample(Format::Rgba8888, 64, 64);
    let mut bytes = meta.encode().unwrap();
    bytes[0] = bytes[0].wrapping_add(1);
    assert!(ExternalMetadata::decode(&bytes).is_err());
}

#[test]
fn truncated_buffer_is_rejected() {
    assert!(ExternalMetadata::decode(&[0u8; 8]).is_err());
}
