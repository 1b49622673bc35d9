//! The pixel-format / plane-layout database.
//!
//! This is the normative table reproduced as data: for every supported
//! descriptor format it fixes the plane count, the per-plane sample
//! increment and row alignment, the subsampling shifts, the component
//! list, the DRM fourcc, and the host upload
//! `(glFormat, glType, rcAllocFormat, emuFwkFormat)` tuple.

use thiserror::Error;

/// Requested pixel-format tag, matching the Android HAL ABI's numeric
/// values where one is defined; otherwise assigned densely.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum Format {
    Rgba8888 = 1,
    Rgbx8888 = 2,
    Rgb888 = 3,
    Rgb565 = 4,
    Bgra8888 = 5,
    RgbaFp16 = 22,
    Raw16 = 32,
    Blob = 33,
    Y16 = 0x20363159,
    YCrCb420Sp = 0x11,
    Yv12 = 0x32315659,
    YCbCr420_888 = 0x23,
    RgbaU1010102 = 43,
    YCbCrP010 = 0x36,
}

/// A component of one plane: which channel it carries and its bit range
/// within the sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComponentType {
    Y,
    Cb,
    Cr,
    R,
    G,
    B,
    A,
    Raw,
}

impl ComponentType {
    pub fn as_wire_tag(self) -> u32 {
        match self {
            ComponentType::Y => 1,
            ComponentType::Cb => 2,
            ComponentType::Cr => 3,
            ComponentType::R => 4,
            ComponentType::G => 5,
            ComponentType::B => 6,
            ComponentType::A => 7,
            ComponentType::Raw => 8,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ComponentSpec {
    pub ty: ComponentType,
    pub offset_in_bits: i64,
    pub size_in_bits: i64,
}

/// A resolved plane: fully-computed byte geometry for one width/height.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlaneLayout {
    pub offset_in_bytes: u64,
    pub stride_in_bytes: u64,
    pub total_size_in_bytes: u64,
    pub sample_increment_in_bytes: u64,
    pub horizontal_subsampling_shift: u8,
    pub vertical_subsampling_shift: u8,
    pub components: Vec<ComponentSpec>,
}

pub struct PlaneLayoutComponent {
    pub ty: ComponentType,
    pub offset_in_bits: i64,
    pub size_in_bits: i64,
}

/// One row of the format table: everything that does not depend on the
/// requested width/height.
struct PlaneSpec {
    sample_increment_bytes: u32,
    align: u32,
    h_shift: u8,
    v_shift: u8,
    components: &'static [ComponentSpec],
}

struct FormatEntry {
    format: Format,
    supports_gpu: bool,
    drm_fourcc: Option<u32>,
    gl_format: Option<i32>,
    gl_type: Option<i32>,
    rc_alloc_format: Option<i32>,
    emu_fwk_format: Option<i32>,
    planes: &'static [PlaneSpec],
}

const fn fourcc(a: u8, b: u8, c: u8, d: u8) -> u32 {
    u32::from_le_bytes([a, b, c, d])
}

// GL enum tokens, reproduced verbatim so the host upload tuple matches what
// a real GL/EGL implementation expects.
const GL_RGBA: i32 = 0x1908;
const GL_RGB: i32 = 0x1907;
const GL_RGB565: i32 = 0x8D62;
const GL_RGBA16F: i32 = 0x881A;
const GL_RGB10_A2: i32 = 0x8059;
const GL_UNSIGNED_BYTE: i32 = 0x1401;
const GL_UNSIGNED_SHORT_5_6_5: i32 = 0x8363;
const GL_HALF_FLOAT: i32 = 0x140B;
const GL_UNSIGNED_INT_2_10_10_10_REV: i32 = 0x8368;

// `rcAllocFormat`/`emuFwkFormat` values the host renderer uses for formats
// whose GPU upload format diverges from `glFormat`/`glType` alone.
const RC_ALLOC_RGBA: i32 = 1;
const RC_ALLOC_RGB: i32 = 2;
const EMU_FWK_YV12: i32 = 0x32315659;
const EMU_FWK_YUV420_888: i32 = 0x23;

const RGBA_COMPONENTS: &[ComponentSpec] = &[
    ComponentSpec { ty: ComponentType::R, offset_in_bits: 0, size_in_bits: 8 },
    ComponentSpec { ty: ComponentType::G, offset_in_bits: 8, size_in_bits: 8 },
    ComponentSpec { ty: ComponentType::B, offset_in_bits: 16, size_in_bits: 8 },
    ComponentSpec { ty: ComponentType::A, offset_in_bits: 24, size_in_bits: 8 },
];
const BGRA_COMPONENTS: &[ComponentSpec] = &[
    ComponentSpec { ty: ComponentType::B, offset_in_bits: 0, size_in_bits: 8 },
    ComponentSpec { ty: ComponentType::G, offset_in_bits: 8, size_in_bits: 8 },
    ComponentSpec { ty: ComponentType::R, offset_in_bits: 16, size_in_bits: 8 },
    ComponentSpec { ty: ComponentType::A, offset_in_bits: 24, size_in_bits: 8 },
];
const RGB_COMPONENTS: &[ComponentSpec] = &[
    ComponentSpec { ty: ComponentType::R, offset_in_bits: 0, size_in_bits: 8 },
    ComponentSpec { ty: ComponentType::G, offset_in_bits: 8, size_in_bits: 8 },
    ComponentSpec { ty: ComponentType::B, offset_in_bits: 16, size_in_bits: 8 },
];
const RGB565_COMPONENTS: &[ComponentSpec] = &[
    ComponentSpec { ty: ComponentType::R, offset_in_bits: 11, size_in_bits: 5 },
    ComponentSpec { ty: ComponentType::G, offset_in_bits: 5, size_in_bits: 6 },
    ComponentSpec { ty: ComponentType::B, offset_in_bits: 0, size_in_bits: 5 },
];
const RGBA_FP16_COMPONENTS: &[ComponentSpec] = &[
    ComponentSpec { ty: ComponentType::R, offset_in_bits: 0, size_in_bits: 16 },
    ComponentSpec { ty: ComponentType::G, offset_in_bits: 16, size_in_bits: 16 },
    ComponentSpec { ty: ComponentType::B, offset_in_bits: 32, size_in_bits: 16 },
    ComponentSpec { ty: ComponentType::A, offset_in_bits: 48, size_in_bits: 16 },
];
const RGBA_1010102_COMPONENTS: &[ComponentSpec] = &[
    ComponentSpec { ty: ComponentType::R, offset_in_bits: 0, size_in_bits: 10 },
    ComponentSpec { ty: ComponentType::G, offset_in_bits: 10, size_in_bits: 10 },
    ComponentSpec { ty: ComponentType::B, offset_in_bits: 20, size_in_bits: 10 },
    ComponentSpec { ty: ComponentType::A, offset_in_bits: 30, size_in_bits: 2 },
];
const RAW16_COMPONENTS: &[ComponentSpec] =
    &[ComponentSpec { ty: ComponentType::Raw, offset_in_bits: 0, size_in_bits: 16 }];
const Y16_COMPONENTS: &[ComponentSpec] =
    &[ComponentSpec { ty: ComponentType::Y, offset_in_bits: 0, size_in_bits: 16 }];
const BLOB_COMPONENTS: &[ComponentSpec] =
    &[ComponentSpec { ty: ComponentType::Raw, offset_in_bits: 0, size_in_bits: 8 }];
const Y_PLANE_COMPONENTS: &[ComponentSpec] =
    &[ComponentSpec { ty: ComponentType::Y, offset_in_bits: 0, size_in_bits: 8 }];
const CR_PLANE_COMPONENTS: &[ComponentSpec] =
    &[ComponentSpec { ty: ComponentType::Cr, offset_in_bits: 0, size_in_bits: 8 }];
const CB_PLANE_COMPONENTS: &[ComponentSpec] =
    &[ComponentSpec { ty: ComponentType::Cb, offset_in_bits: 0, size_in_bits: 8 }];
const VU_PLANE_COMPONENTS: &[ComponentSpec] = &[
    ComponentSpec { ty: ComponentType::Cr, offset_in_bits: 0, size_in_bits: 8 },
    ComponentSpec { ty: ComponentType::Cb, offset_in_bits: 8, size_in_bits: 8 },
];
const CBCR10_PLANE_COMPONENTS: &[ComponentSpec] = &[
    ComponentSpec { ty: ComponentType::Cb, offset_in_bits: 0, size_in_bits: 16 },
    ComponentSpec { ty: ComponentType::Cr, offset_in_bits: 16, size_in_bits: 16 },
];
const Y10_PLANE_COMPONENTS: &[ComponentSpec] =
    &[ComponentSpec { ty: ComponentType::Y, offset_in_bits: 0, size_in_bits: 16 }];

static FORMAT_TABLE: &[FormatEntry] = &[
    FormatEntry {
        format: Format::Rgba8888,
        supports_gpu: true,
        drm_fourcc: Some(fourcc(b'A', b'B', b'2', b'4')),
        gl_format: Some(GL_RGBA),
        gl_type: Some(GL_UNSIGNED_BYTE),
        rc_alloc_format: None,
        emu_fwk_format: None,
        planes: &[PlaneSpec { sample_increment_bytes: 4, align: 1, h_shift: 0, v_shift: 0, components: RGBA_COMPONENTS }],
    },
    FormatEntry {
        format: Format::Rgbx8888,
        supports_gpu: true,
        drm_fourcc: Some(fourcc(b'X', b'B', b'2', b'4')),
        gl_format: Some(GL_RGBA),
        gl_type: Some(GL_UNSIGNED_BYTE),
        rc_alloc_format: Some(RC_ALLOC_RGB),
        emu_fwk_format: None,
        planes: &[PlaneSpec { sample_increment_bytes: 4, align: 1, h_shift: 0, v_shift: 0, components: RGBA_COMPONENTS }],
    },
    FormatEntry {
        format: Format::Bgra8888,
        supports_gpu: true,
        drm_fourcc: Some(fourcc(b'A', b'R', b'2', b'4')),
        gl_format: Some(GL_RGBA),
        gl_type: Some(GL_UNSIGNED_BYTE),
        rc_alloc_format: None,
        emu_fwk_format: None,
        planes: &[PlaneSpec { sample_increment_bytes: 4, align: 1, h_shift: 0, v_shift: 0, components: BGRA_COMPONENTS }],
    },
    FormatEntry {
        format: Format::Rgb888,
        supports_gpu: false,
        drm_fourcc: Some(fourcc(b'B', b'G', b'2', b'4')),
        gl_format: None,
        gl_type: None,
        rc_alloc_format: None,
        emu_fwk_format: None,
        planes: &[PlaneSpec { sample_increment_bytes: 3, align: 1, h_shift: 0, v_shift: 0, components: RGB_COMPONENTS }],
    },
    FormatEntry {
        format: Format::Rgb565,
        supports_gpu: true,
        drm_fourcc: Some(fourcc(b'B', b'G', b'1', b'6')),
        gl_format: Some(GL_RGB565),
        gl_type: Some(GL_UNSIGNED_SHORT_5_6_5),
        rc_alloc_format: None,
        emu_fwk_format: None,
        planes: &[PlaneSpec { sample_increment_bytes: 2, align: 1, h_shift: 0, v_shift: 0, components: RGB565_COMPONENTS }],
    },
    FormatEntry {
        format: Format::RgbaFp16,
        supports_gpu: true,
        drm_fourcc: Some(fourcc(b'A', b'B', b'4', b'8')),
        gl_format: Some(GL_RGBA16F),
        gl_type: Some(GL_HALF_FLOAT),
        rc_alloc_format: None,
        emu_fwk_format: None,
        planes: &[PlaneSpec { sample_increment_bytes: 8, align: 1, h_shift: 0, v_shift: 0, components: RGBA_FP16_COMPONENTS }],
    },
    FormatEntry {
        format: Format::RgbaU1010102,
        supports_gpu: true,
        drm_fourcc: Some(fourcc(b'A', b'B', b'3', b'0')),
        gl_format: Some(GL_RGB10_A2),
        gl_type: Some(GL_UNSIGNED_INT_2_10_10_10_REV),
        rc_alloc_format: None,
        emu_fwk_format: None,
        planes: &[PlaneSpec { sample_increment_bytes: 4, align: 1, h_shift: 0, v_shift: 0, components: RGBA_1010102_COMPONENTS }],
    },
    FormatEntry {
        format: Format::Raw16,
        supports_gpu: false,
        drm_fourcc: Some(fourcc(b'R', b'1', b'6', b' ')),
        gl_format: None,
        gl_type: None,
        rc_alloc_format: None,
        emu_fwk_format: None,
        planes: &[PlaneSpec { sample_increment_bytes: 2, align: 16, h_shift: 0, v_shift: 0, components: RAW16_COMPONENTS }],
    },
    FormatEntry {
        format: Format::Y16,
        supports_gpu: false,
        drm_fourcc: Some(fourcc(b'R', b'1', b'6', b' ')),
        gl_format: None,
        gl_type: None,
        rc_alloc_format: None,
        emu_fwk_format: None,
        planes: &[PlaneSpec { sample_increment_bytes: 2, align: 16, h_shift: 0, v_shift: 0, components: Y16_COMPONENTS }],
    },
    FormatEntry {
        format: Format::Blob,
        supports_gpu: false,
        drm_fourcc: None,
        gl_format: None,
        gl_type: None,
        rc_alloc_format: None,
        emu_fwk_format: None,
        planes: &[PlaneSpec { sample_increment_bytes: 1, align: 1, h_shift: 0, v_shift: 0, components: BLOB_COMPONENTS }],
    },
    FormatEntry {
        format: Format::YCrCb420Sp,
        supports_gpu: false,
        drm_fourcc: Some(fourcc(b'Y', b'V', b'1', b'2')),
        gl_format: None,
        gl_type: None,
        rc_alloc_format: None,
        emu_fwk_format: None,
        planes: &[
            PlaneSpec { sample_increment_bytes: 1, align: 1, h_shift: 0, v_shift: 0, components: Y_PLANE_COMPONENTS },
            PlaneSpec { sample_increment_bytes: 2, align: 1, h_shift: 1, v_shift: 1, components: VU_PLANE_COMPONENTS },
        ],
    },
    FormatEntry {
        format: Format::Yv12,
        supports_gpu: true,
        drm_fourcc: Some(fourcc(b'Y', b'V', b'1', b'2')),
        gl_format: Some(GL_RGBA),
        gl_type: Some(GL_UNSIGNED_BYTE),
        rc_alloc_format: None,
        emu_fwk_format: Some(EMU_FWK_YV12),
        planes: &[
            PlaneSpec { sample_increment_bytes: 1, align: 16, h_shift: 0, v_shift: 0, components: Y_PLANE_COMPONENTS },
            PlaneSpec { sample_increment_bytes: 1, align: 16, h_shift: 1, v_shift: 1, components: CR_PLANE_COMPONENTS },
            PlaneSpec { sample_increment_bytes: 1, align: 16, h_shift: 1, v_shift: 1, components: CB_PLANE_COMPONENTS },
        ],
    },
    FormatEntry {
        format: Format::YCbCr420_888,
        supports_gpu: true,
        drm_fourcc: Some(fourcc(b'Y', b'U', b'1', b'2')),
        gl_format: Some(GL_RGBA),
        gl_type: Some(GL_UNSIGNED_BYTE),
        rc_alloc_format: None,
        emu_fwk_format: Some(EMU_FWK_YUV420_888),
        planes: &[
            PlaneSpec { sample_increment_bytes: 1, align: 1, h_shift: 0, v_shift: 0, components: Y_PLANE_COMPONENTS },
            PlaneSpec { sample_increment_bytes: 1, align: 1, h_shift: 1, v_shift: 1, components: CB_PLANE_COMPONENTS },
            PlaneSpec { sample_increment_bytes: 1, align: 1, h_shift: 1, v_shift: 1, components: CR_PLANE_COMPONENTS },
        ],
    },
    FormatEntry {
        format: Format::YCbCrP010,
        supports_gpu: false,
        drm_fourcc: Some(fourcc(b'P', b'0', b'1', b'0')),
        gl_format: None,
        gl_type: None,
        rc_alloc_format: None,
        emu_fwk_format: None,
        planes: &[
            PlaneSpec { sample_increment_bytes: 2, align: 1, h_shift: 0, v_shift: 0, components: Y10_PLANE_COMPONENTS },
            PlaneSpec { sample_increment_bytes: 4, align: 1, h_shift: 1, v_shift: 1, components: CBCR10_PLANE_COMPONENTS },
        ],
    },
];

#[derive(Debug, Error, PartialEq, Eq)]
pub enum FormatError {
    #[error("unknown pixel format {0:?}")]
    Unknown(i32),
    #[error("format does not support GPU usage")]
    NoGpuSupport,
}

/// The resolved host upload tuple for a format, present only when the
/// format supports GPU usage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GlUploadInfo {
    pub gl_format: i32,
    pub gl_type: i32,
    pub rc_alloc_format: i32,
    pub emu_fwk_format: i32,
}

pub fn align_up(value: u64, align: u64) -> u64 {
    debug_assert!(align.is_power_of_two());
    (value + align - 1) & !(align - 1)
}

fn entry_for(format: Format) -> &'static FormatEntry {
    FORMAT_TABLE
        .iter()
        .find(|e| e.format == format)
        .expect("FORMAT_TABLE must cover every Format variant")
}

pub fn lookup(raw: i32) -> Result<Format, FormatError> {
    FORMAT_TABLE
        .iter()
        .map(|e| e.format)
        .find(|f| *f as i32 == raw)
        .ok_or(FormatError::Unknown(raw))
}

pub fn supports_gpu(format: Format) -> bool {
    entry_for(format).supports_gpu
}

pub fn drm_fourcc(format: Format) -> u32 {
    entry_for(format).drm_fourcc.unwrap_or(0)
}

pub fn gl_upload_info(format: Format) -> Result<GlUploadInfo, FormatError> {
    let entry = entry_for(format);
    if !entry.supports_gpu {
        return Err(FormatError::NoGpuSupport);
    }
    Ok(GlUploadInfo {
        gl_format: entry.gl_format.expect("GPU-capable format must define glFormat"),
        gl_type: entry.gl_type.expect("GPU-capable format must define glType"),
        rc_alloc_format: entry.rc_alloc_format.unwrap_or(entry.gl_format.unwrap()),
        emu_fwk_format: entry.emu_fwk_format.unwrap_or(entry.gl_format.unwrap()),
    })
}

/// Resolves the full plane layout for `format` at `width`x`height`, laying
/// planes back-to-back in offset order.
pub fn resolve_planes(format: Format, width: u32, height: u32) -> Vec<PlaneLayout> {
    let entry = entry_for(format);
    let mut offset = 0u64;
    let mut planes = Vec::with_capacity(entry.planes.len());
    for spec in entry.planes {
        let plane_w = (width as u64) >> spec.h_shift;
        let plane_h = (height as u64) >> spec.v_shift;
        let stride = align_up(plane_w * spec.sample_increment_bytes as u64, spec.align as u64);
        let total = stride * plane_h;
        planes.push(PlaneLayout {
            offset_in_bytes: offset,
            stride_in_bytes: stride,
            total_size_in_bytes: total,
            sample_increment_in_bytes: spec.sample_increment_bytes as u64,
            horizontal_subsampling_shift: spec.h_shift,
            vertical_subsampling_shift: spec.v_shift,
            components: spec.components.to_vec(),
        });
        offset += total;
    }
    planes
}

/// Total logical image size in bytes: the sum of every plane's
/// `total_size_in_bytes`.
pub fn image_bytes(format: Format, width: u32, height: u32) -> u64 {
    resolve_planes(format, width, height)
        .iter()
        .map(|p| p.total_size_in_bytes)
        .sum()
}

/// `stride` as returned by `allocate`: plane-0 pixel stride for single-plane
/// formats, 0 otherwise.
pub fn pixel_stride(format: Format, width: u32, height: u32) -> i32 {
    let planes = resolve_planes(format, width, height);
    if planes.len() == 1 {
        (planes[0].stride_in_bytes / planes[0].sample_increment_in_bytes) as i32
    } else {
        0
    }
}

pub fn plane_count(format: Format) -> usize {
    entry_for(format).planes.len()
}
