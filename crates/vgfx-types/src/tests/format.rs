use crate::format::{self, Format};

#[test]
fn rgba_8888_1920x1080_matches_scenario_1() {
    let stride = format::pixel_stride(Format::Rgba8888, 1920, 1080);
    assert_eq!(stride, 1920);
    let bytes = format::image_bytes(Format::Rgba8888, 1920, 1080);
    assert_eq!(bytes, 1920 * 1080 * 4);
    assert!(format::supports_gpu(Format::Rgba8888));
}

#[test]
fn yv12_640x480_matches_scenario_2() {
    let planes = format::resolve_planes(Format::Yv12, 640, 480);
    assert_eq!(planes.len(), 3);

    assert_eq!(planes[0].stride_in_bytes, 640); // align(640, 16)
    assert_eq!(planes[1].stride_in_bytes, 320); // align(320, 16)
    assert_eq!(planes[2].stride_in_bytes, 320);

    assert_eq!(planes[0].offset_in_bytes, 0);
    assert_eq!(planes[1].offset_in_bytes, 640 * 480);

    // Scenario 6: subsampling factors (1,1),(2,2),(2,2).
    assert_eq!((planes[0].horizontal_subsampling_shift, planes[0].vertical_subsampling_shift), (0, 0));
    assert_eq!((planes[1].horizontal_subsampling_shift, planes[1].vertical_subsampling_shift), (1, 1));
    assert_eq!((planes[2].horizontal_subsampling_shift, planes[2].vertical_subsampling_shift), (1, 1));

    use crate::format::ComponentType;
    assert_eq!(planes[0].components[0].ty, ComponentType::Y);
    assert_eq!(planes[1].components[0].ty, ComponentType::Cr);
    assert_eq!(planes[2].components[0].ty, ComponentType::Cb);
}

#[test]
fn blob_has_no_gpu_support() {
    assert!(!format::supports_gpu(Format::Blob));
    assert!(format::gl_upload_info(Format::Blob).is_err());
}

#[test]
fn rgb_888_has_no_gpu_support() {
    assert!(!format::supports_gpu(Format::Rgb888));
}

#[test]
fn multi_plane_formats_report_zero_pixel_stride() {
    assert_eq!(format::pixel_stride(Format::Yv12, 640, 480), 0);
    assert_eq!(format::pixel_stride(Format::YCbCr420_888, 640, 480), 0);
}

#[test]
fn lookup_rejects_unknown_format() {
    assert!(format::lookup(0xDEAD_BEEFu32 as i32).is_err());
}

#[test]
fn align_up_matches_power_of_two_rounding() {
    assert_eq!(format::align_up(640, 16), 640);
    assert_eq!(format::align_up(641, 16), 656);
    assert_eq!(format::align_up(0, 16), 0);
}

mod proptests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #[test]
        fn single_plane_round_trip_offset_stride_total(width in 1u32..4096, height in 1u32..4096) {
            let planes = format::resolve_planes(Format::Rgba8888, width, height);
            let plane = &planes[0];
            let expected_stride = format::align_up(width as u64 * 4, 1);
            prop_assert_eq!(plane.stride_in_bytes, expected_stride);
            prop_assert_eq!(plane.total_size_in_bytes, expected_stride * height as u64);
            prop_assert_eq!(plane.offset_in_bytes, 0);
        }

        #[test]
        fn yv12_plane_offsets_are_monotonic(width in 16u32..2048, height in 16u32..2048) {
            let planes = format::resolve_planes(Format::Yv12, width, height);
            prop_assert!(planes[1].offset_in_bytes >= planes[0].offset_in_bytes + planes[0].total_size_in_bytes);
            prop_assert!(planes[2].offset_in_bytes >= planes[1].offset_in_bytes + planes[1].total_size_in_bytes);
        }
    }
}
