//! The external metadata record (X): a fixed, 16-byte-aligned structure
//! placed inside the shared region at `externalMetadataOffset`. The layout
//! here is normative: it is produced once by the allocator and read by
//! every mapper that imports the handle, so its byte geometry must never
//! change shape across a release.

use thiserror::Error;

use crate::format::{ComponentType, PlaneLayout};

pub const MAGIC: u64 = 0x247439A87E42E932;

pub const NAME_MAX_LEN: usize = 127;
const NAME_FIELD_BYTES: usize = 128;
const MAX_PLANES: usize = 3;
const MAX_COMPONENTS: usize = 4;
const SMPTE2086_BYTES: usize = 48;
const CTA861_3_BYTES: usize = 16;

/// `#[repr(C)]` mirrors of the on-wire X record, used only to derive byte
/// offsets via `core::mem::offset_of!` rather than hand-summed constants.
/// Every padding/reserved slot is spelled out as a `u8` array (alignment 1)
/// so field order alone determines layout; nothing here is ever read back
/// out as a Rust value.
#[repr(C)]
struct XRecordHeader {
    magic: u64,
    buffer_id: u64,
    width: u32,
    height: u32,
    gl_format: i32,
    gl_type: i32,
    reserved_region_size: u64,
    dataspace: i32,
    blend_mode: i32,
    plane_layout_size: u8,
    name_size: u8,
    has_smpte2086: u8,
    has_cta861_3: u8,
    _unused: [u8; 12],
}

#[repr(C)]
struct RawPlaneLayout {
    offset_in_bytes: u64,
    stride_in_bytes: u64,
    total_size_in_bytes: u64,
    sample_increment_in_bytes: u64,
    subsampling_shifts: u8,
    _pad: [u8; 3],
    component_base: u32,
    component_size: u32,
    _reserved: [u8; 4],
}

#[repr(C)]
struct RawPlaneLayoutComponent {
    ty_tag: u32,
    _pad: [u8; 4],
    offset_in_bits: i64,
    size_in_bits: i64,
    _reserved: [u8; 8],
}

#[repr(C)]
struct XRecordLayout {
    header: XRecordHeader,
    name: [u8; NAME_FIELD_BYTES],
    planes: [RawPlaneLayout; MAX_PLANES],
    components: [RawPlaneLayoutComponent; MAX_COMPONENTS],
    smpte2086: [u8; SMPTE2086_BYTES],
    cta861_3: [u8; CTA861_3_BYTES],
}

const PLANE_LAYOUT_BYTES: usize = std::mem::size_of::<RawPlaneLayout>();
const PLANE_LAYOUT_COMPONENT_BYTES: usize = std::mem::size_of::<RawPlaneLayoutComponent>();

const MAGIC_OFFSET: usize = std::mem::offset_of!(XRecordHeader, magic);
const BUFFER_ID_OFFSET: usize = std::mem::offset_of!(XRecordHeader, buffer_id);
const WIDTH_OFFSET: usize = std::mem::offset_of!(XRecordHeader, width);
const HEIGHT_OFFSET: usize = std::mem::offset_of!(XRecordHeader, height);
const GL_FORMAT_OFFSET: usize = std::mem::offset_of!(XRecordHeader, gl_format);
const GL_TYPE_OFFSET: usize = std::mem::offset_of!(XRecordHeader, gl_type);
const RESERVED_REGION_SIZE_OFFSET: usize = std::mem::offset_of!(XRecordHeader, reserved_region_size);
const DATASPACE_OFFSET: usize = std::mem::offset_of!(XRecordHeader, dataspace);
const BLEND_MODE_OFFSET: usize = std::mem::offset_of!(XRecordHeader, blend_mode);
const PLANE_LAYOUT_SIZE_OFFSET: usize = std::mem::offset_of!(XRecordHeader, plane_layout_size);
const NAME_SIZE_OFFSET: usize = std::mem::offset_of!(XRecordHeader, name_size);
const HAS_SMPTE2086_OFFSET: usize = std::mem::offset_of!(XRecordHeader, has_smpte2086);
const HAS_CTA861_3_OFFSET: usize = std::mem::offset_of!(XRecordHeader, has_cta861_3);

const NAME_BASE: usize = std::mem::offset_of!(XRecordLayout, name);
const PLANES_BASE: usize = std::mem::offset_of!(XRecordLayout, planes);
const COMPONENTS_BASE: usize = std::mem::offset_of!(XRecordLayout, components);
const SMPTE_BASE: usize = std::mem::offset_of!(XRecordLayout, smpte2086);
const CTA_BASE: usize = std::mem::offset_of!(XRecordLayout, cta861_3);

const PLANE_STRIDE_OFFSET: usize = std::mem::offset_of!(RawPlaneLayout, stride_in_bytes);
const PLANE_TOTAL_SIZE_OFFSET: usize = std::mem::offset_of!(RawPlaneLayout, total_size_in_bytes);
const PLANE_SAMPLE_INCREMENT_OFFSET: usize = std::mem::offset_of!(RawPlaneLayout, sample_increment_in_bytes);
const PLANE_SHIFTS_OFFSET: usize = std::mem::offset_of!(RawPlaneLayout, subsampling_shifts);
const PLANE_COMPONENT_BASE_OFFSET: usize = std::mem::offset_of!(RawPlaneLayout, component_base);
const PLANE_COMPONENT_SIZE_OFFSET: usize = std::mem::offset_of!(RawPlaneLayout, component_size);

const COMPONENT_OFFSET_IN_BITS_OFFSET: usize = std::mem::offset_of!(RawPlaneLayoutComponent, offset_in_bits);
const COMPONENT_SIZE_IN_BITS_OFFSET: usize = std::mem::offset_of!(RawPlaneLayoutComponent, size_in_bits);

/// Total on-wire size of the X record. `externalMetadataOffset` is always
/// `align16(bufferSize)`; this constant is itself a multiple of 16 so the
/// reserved region that follows X stays 16-byte aligned too.
pub const RECORD_BYTES: usize = std::mem::size_of::<XRecordLayout>();

const _: () = assert!(RECORD_BYTES % 16 == 0);

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum MetadataError {
    #[error("buffer too small for X record: need {needed}, got {got}")]
    Truncated { needed: usize, got: usize },
    #[error("bad X magic: found {found:#x}, expected {expected:#x}")]
    BadMagic { found: u64, expected: u64 },
    #[error("name exceeds {NAME_MAX_LEN} bytes: {0}")]
    NameTooLong(usize),
    #[error("too many planes: {0} (max {MAX_PLANES})")]
    TooManyPlanes(usize),
    #[error("too many distinct plane components: {0} (max {MAX_COMPONENTS})")]
    TooManyComponents(usize),
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Smpte2086 {
    pub display_primary_red: (f32, f32),
    pub display_primary_green: (f32, f32),
    pub display_primary_blue: (f32, f32),
    pub white_point: (f32, f32),
    pub max_luminance: f32,
    pub min_luminance: f32,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Cta8613 {
    pub max_content_light_level: f32,
    pub max_frame_average_light_level: f32,
}

/// A component slot, plus which plane it belongs to. Planes index into a
/// shared 4-slot component table via `components_base`/`components_size`, a
/// `planeLayoutComponent[4]` shared-by-all-planes layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoredComponent {
    pub ty: ComponentType,
    pub offset_in_bits: i64,
    pub size_in_bits: i64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ExternalMetadata {
    pub buffer_id: u64,
    pub width: u32,
    pub height: u32,
    /// -1 when there is no GPU-backed color buffer.
    pub gl_format: i32,
    pub gl_type: i32,
    pub reserved_region_size: u64,
    pub dataspace: i32,
    pub blend_mode: i32,
    pub name: String,
    pub planes: Vec<PlaneLayout>,
    pub smpte2086: Option<Smpte2086>,
    pub cta861_3: Option<Cta8613>,
}

impl ExternalMetadata {
    /// `planeLayoutSize`: 0 when there is no CPU-visible image, else the
    /// plane count.
    pub fn plane_layout_size(&self) -> u8 {
        self.planes.len() as u8
    }

    fn flatten_components(&self) -> Result<([StoredComponent; MAX_COMPONENTS], Vec<(u32, u32)>), MetadataError> {
        let mut table = [StoredComponent { ty: ComponentType::Raw, offset_in_bits: 0, size_in_bits: 0 }; MAX_COMPONENTS];
        let mut windows = Vec::with_capacity(self.planes.len());
        let mut cursor = 0usize;
        for plane in &self.planes {
            let base = cursor;
            for c in &plane.components {
                if cursor >= MAX_COMPONENTS {
                    return Err(MetadataError::TooManyComponents(cursor + 1));
                }
                table[cursor] = StoredComponent { ty: c.ty, offset_in_bits: c.offset_in_bits, size_in_bits: c.size_in_bits };
                cursor += 1;
            }
            windows.push((base as u32, (cursor - base) as u32));
        }
        Ok((table, windows))
    }

    pub fn encode(&self) -> Result<Vec<u8>, MetadataError> {
        if self.planes.len() > MAX_PLANES {
            return Err(MetadataError::TooManyPlanes(self.planes.len()));
        }
        if self.name.len() > NAME_MAX_LEN {
            return Err(MetadataError::NameTooLong(self.name.len()));
        }
        let (components, windows) = self.flatten_components()?;

        let mut out = vec![0u8; RECORD_BYTES];
        write_u64(&mut out, MAGIC_OFFSET, MAGIC);
        write_u64(&mut out, BUFFER_ID_OFFSET, self.buffer_id);
        write_u32(&mut out, WIDTH_OFFSET, self.width);
        write_u32(&mut out, HEIGHT_OFFSET, self.height);
        write_i32(&mut out, GL_FORMAT_OFFSET, self.gl_format);
        write_i32(&mut out, GL_TYPE_OFFSET, self.gl_type);
        write_u64(&mut out, RESERVED_REGION_SIZE_OFFSET, self.reserved_region_size);
        write_i32(&mut out, DATASPACE_OFFSET, self.dataspace);
        write_i32(&mut out, BLEND_MODE_OFFSET, self.blend_mode);
        out[PLANE_LAYOUT_SIZE_OFFSET] = self.plane_layout_size();
        out[NAME_SIZE_OFFSET] = self.name.len() as u8;
        out[HAS_SMPTE2086_OFFSET] = self.smpte2086.is_some() as u8;
        out[HAS_CTA861_3_OFFSET] = self.cta861_3.is_some() as u8;
        // XRecordHeader::_unused is the padding that keeps
        // sizeof(X) % 16 == 0; left zeroed.

        out[NAME_BASE..NAME_BASE + self.name.len()].copy_from_slice(self.name.as_bytes());

        for (i, plane) in self.planes.iter().enumerate() {
            let base = PLANES_BASE + i * PLANE_LAYOUT_BYTES;
            write_u64(&mut out, base, plane.offset_in_bytes);
            write_u64(&mut out, base + PLANE_STRIDE_OFFSET, plane.stride_in_bytes);
            write_u64(&mut out, base + PLANE_TOTAL_SIZE_OFFSET, plane.total_size_in_bytes);
            write_u64(&mut out, base + PLANE_SAMPLE_INCREMENT_OFFSET, plane.sample_increment_in_bytes);
            out[base + PLANE_SHIFTS_OFFSET] = (plane.horizontal_subsampling_shift & 0x0F)
                | ((plane.vertical_subsampling_shift & 0x0F) << 4);
            let (comp_base, comp_size) = windows[i];
            write_u32(&mut out, base + PLANE_COMPONENT_BASE_OFFSET, comp_base);
            write_u32(&mut out, base + PLANE_COMPONENT_SIZE_OFFSET, comp_size);
        }

        for (i, c) in components.iter().enumerate() {
            let base = COMPONENTS_BASE + i * PLANE_LAYOUT_COMPONENT_BYTES;
            write_u32(&mut out, base, c.ty.as_wire_tag());
            write_i64(&mut out, base + COMPONENT_OFFSET_IN_BITS_OFFSET, c.offset_in_bits);
            write_i64(&mut out, base + COMPONENT_SIZE_IN_BITS_OFFSET, c.size_in_bits);
        }

        if let Some(s) = &self.smpte2086 {
            write_f32(&mut out, SMPTE_BASE, s.display_primary_red.0);
            write_f32(&mut out, SMPTE_BASE + 4, s.display_primary_red.1);
            write_f32(&mut out, SMPTE_BASE + 8, s.display_primary_green.0);
            write_f32(&mut out, SMPTE_BASE + 12, s.display_primary_green.1);
            write_f32(&mut out, SMPTE_BASE + 16, s.display_primary_blue.0);
            write_f32(&mut out, SMPTE_BASE + 20, s.display_primary_blue.1);
            write_f32(&mut out, SMPTE_BASE + 24, s.white_point.0);
            write_f32(&mut out, SMPTE_BASE + 28, s.white_point.1);
            write_f32(&mut out, SMPTE_BASE + 32, s.max_luminance);
            write_f32(&mut out, SMPTE_BASE + 36, s.min_luminance);
        }

        if let Some(c) = &self.cta861_3 {
            write_f32(&mut out, CTA_BASE, c.max_content_light_level);
            write_f32(&mut out, CTA_BASE + 4, c.max_frame_average_light_level);
        }

        Ok(out)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, MetadataError> {
        if bytes.len() < RECORD_BYTES {
            return Err(MetadataError::Truncated { needed: RECORD_BYTES, got: bytes.len() });
        }
        let magic = read_u64(bytes, MAGIC_OFFSET);
        if magic != MAGIC {
            return Err(MetadataError::BadMagic { found: magic, expected: MAGIC });
        }
        let buffer_id = read_u64(bytes, BUFFER_ID_OFFSET);
        let width = read_u32(bytes, WIDTH_OFFSET);
        let height = read_u32(bytes, HEIGHT_OFFSET);
        let gl_format = read_i32(bytes, GL_FORMAT_OFFSET);
        let gl_type = read_i32(bytes, GL_TYPE_OFFSET);
        let reserved_region_size = read_u64(bytes, RESERVED_REGION_SIZE_OFFSET);
        let dataspace = read_i32(bytes, DATASPACE_OFFSET);
        let blend_mode = read_i32(bytes, BLEND_MODE_OFFSET);
        let plane_layout_size = bytes[PLANE_LAYOUT_SIZE_OFFSET] as usize;
        let name_size = bytes[NAME_SIZE_OFFSET] as usize;
        let has_smpte2086 = bytes[HAS_SMPTE2086_OFFSET] != 0;
        let has_cta861_3 = bytes[HAS_CTA861_3_OFFSET] != 0;

        let name_size = name_size.min(NAME_MAX_LEN);
        let name = String::from_utf8_lossy(&bytes[NAME_BASE..NAME_BASE + name_size]).into_owned();

        let mut components = [StoredComponent { ty: ComponentType::Raw, offset_in_bits: 0, size_in_bits: 0 }; MAX_COMPONENTS];
        for i in 0..MAX_COMPONENTS {
            let base = COMPONENTS_BASE + i * PLANE_LAYOUT_COMPONENT_BYTES;
            components[i] = StoredComponent {
                ty: component_type_from_wire_tag(read_u32(bytes, base)),
                offset_in_bits: read_i64(bytes, base + COMPONENT_OFFSET_IN_BITS_OFFSET),
                size_in_bits: read_i64(bytes, base + COMPONENT_SIZE_IN_BITS_OFFSET),
            };
        }

        let mut planes = Vec::with_capacity(plane_layout_size.min(MAX_PLANES));
        for i in 0..plane_layout_size.min(MAX_PLANES) {
            let base = PLANES_BASE + i * PLANE_LAYOUT_BYTES;
            let shifts = bytes[base + PLANE_SHIFTS_OFFSET];
            let comp_base = read_u32(bytes, base + PLANE_COMPONENT_BASE_OFFSET) as usize;
            let comp_size = read_u32(bytes, base + PLANE_COMPONENT_SIZE_OFFSET) as usize;
            let plane_components = components[comp_base..(comp_base + comp_size).min(MAX_COMPONENTS)]
                .iter()
                .map(|c| crate::format::ComponentSpec { ty: c.ty, offset_in_bits: c.offset_in_bits, size_in_bits: c.size_in_bits })
                .collect();
            planes.push(PlaneLayout {
                offset_in_bytes: read_u64(bytes, base),
                stride_in_bytes: read_u64(bytes, base + PLANE_STRIDE_OFFSET),
                total_size_in_bytes: read_u64(bytes, base + PLANE_TOTAL_SIZE_OFFSET),
                sample_increment_in_bytes: read_u64(bytes, base + PLANE_SAMPLE_INCREMENT_OFFSET),
                horizontal_subsampling_shift: shifts & 0x0F,
                vertical_subsampling_shift: (shifts >> 4) & 0x0F,
                components: plane_components,
            });
        }

        let smpte2086 = has_smpte2086.then(|| Smpte2086 {
            display_primary_red: (read_f32(bytes, SMPTE_BASE), read_f32(bytes, SMPTE_BASE + 4)),
            display_primary_green: (read_f32(bytes, SMPTE_BASE + 8), read_f32(bytes, SMPTE_BASE + 12)),
            display_primary_blue: (read_f32(bytes, SMPTE_BASE + 16), read_f32(bytes, SMPTE_BASE + 20)),
            white_point: (read_f32(bytes, SMPTE_BASE + 24), read_f32(bytes, SMPTE_BASE + 28)),
            max_luminance: read_f32(bytes, SMPTE_BASE + 32),
            min_luminance: read_f32(bytes, SMPTE_BASE + 36),
        });

        let cta861_3 = has_cta861_3.then(|| Cta8613 {
            max_content_light_level: read_f32(bytes, CTA_BASE),
            max_frame_average_light_level: read_f32(bytes, CTA_BASE + 4),
        });

        Ok(ExternalMetadata {
            buffer_id,
            width,
            height,
            gl_format,
            gl_type,
            reserved_region_size,
            dataspace,
            blend_mode,
            name,
            planes,
            smpte2086,
            cta861_3,
        })
    }
}

fn component_type_from_wire_tag(tag: u32) -> ComponentType {
    match tag {
        1 => ComponentType::Y,
        2 => ComponentType::Cb,
        3 => ComponentType::Cr,
        4 => ComponentType::R,
        5 => ComponentType::G,
        6 => ComponentType::B,
        7 => ComponentType::A,
        _ => ComponentType::Raw,
    }
}

fn write_u32(buf: &mut [u8], offset: usize, v: u32) {
    buf[offset..offset + 4].copy_from_slice(&v.to_le_bytes());
}
fn write_i32(buf: &mut [u8], offset: usize, v: i32) {
    buf[offset..offset + 4].copy_from_slice(&v.to_le_bytes());
}
fn write_u64(buf: &mut [u8], offset: usize, v: u64) {
    buf[offset..offset + 8].copy_from_slice(&v.to_le_bytes());
}
fn write_i64(buf: &mut [u8], offset: usize, v: i64) {
    buf[offset..offset + 8].copy_from_slice(&v.to_le_bytes());
}
fn write_f32(buf: &mut [u8], offset: usize, v: f32) {
    buf[offset..offset + 4].copy_from_slice(&v.to_le_bytes());
}

fn read_u32(buf: &[u8], offset: usize) -> u32 {
    u32::from_le_bytes(buf[offset..offset + 4].try_into().unwrap())
}
fn read_i32(buf: &[u8], offset: usize) -> i32 {
    i32::from_le_bytes(buf[offset..offset + 4].try_into().unwrap())
}
fn read_u64(buf: &[u8], offset: usize) -> u64 {
    u64::from_le_bytes(buf[offset..offset + 8].try_into().unwrap())
}
fn read_i64(buf: &[u8], offset: usize) -> i64 {
    i64::from_le_bytes(buf[offset..offset + 8].try_into().unwrap())
}
fn read_f32(buf: &[u8], offset: usize) -> f32 {
    f32::from_le_bytes(buf[offset..offset + 4].try_into().unwrap())
}
