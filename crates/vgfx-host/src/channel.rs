//! The host-channel client (H): a session to the host rendering encoder.
//! Every operation here is issued inside a single
//! `HostConnectionSession`-scoped call; the trait models that as an
//! ordinary `&self` method, leaving serialization to the implementation.

use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum HostChannelError {
    #[error("host channel unavailable: {0}")]
    Unavailable(String),
    #[error("host rejected the request: {0}")]
    Rejected(String),
}

pub type Result<T> = std::result::Result<T, HostChannelError>;

/// Capability flags reported by `featureInfo`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FeatureInfo {
    pub has_shared_slots_host_memory_allocator: bool,
    pub has_read_color_buffer_dma: bool,
    pub has_yuv_cache: bool,
}

/// The host-channel operations. `handle` below is the host's opaque 32-bit
/// color-buffer identifier, never a [`crate::HostBlock`].
pub trait HostChannel: Send + Sync {
    fn feature_info(&self) -> FeatureInfo;

    fn create_color_buffer_dma(
        &self,
        width: u32,
        height: u32,
        rc_alloc_format: i32,
        emu_fwk_format: i32,
    ) -> Result<u32>;

    fn close_color_buffer(&self, handle: u32) -> Result<()>;

    /// `colorBufferCacheFlush(handle, 0, true)`.
    fn color_buffer_cache_flush(&self, handle: u32) -> Result<i32>;

    fn read_color_buffer_yuv(
        &self,
        handle: u32,
        width: u32,
        height: u32,
        dst: &mut [u8],
    ) -> Result<()>;

    fn read_color_buffer_dma(
        &self,
        handle: u32,
        width: u32,
        height: u32,
        gl_format: i32,
        gl_type: i32,
        dst: &mut [u8],
    ) -> Result<()>;

    fn update_color_buffer_dma(
        &self,
        handle: u32,
        width: u32,
        height: u32,
        gl_format: i32,
        gl_type: i32,
        src: &[u8],
    ) -> Result<()>;

    /// Tells the host which guest physical address backs `ptr` so a
    /// subsequent `read_color_buffer_dma`/`update_color_buffer_dma` can
    /// transfer bytes directly, rather than through a bounce buffer.
    fn bind_dma_directly(&self, ptr: usize, phys_addr: u64) -> Result<()>;
}

#[cfg(unix)]
pub use unix::UnixHostChannel;

/// A production [`HostChannel`] that speaks a small length-prefixed, tagged
/// request/response protocol over a Unix-domain socket to the host
/// rendering encoder, in the same tagged-enum + `encode_*`/`decode_*`
/// free-function style as `aero-ipc`'s `Command`/`Event` wire types. The
/// encoder process at the other end of the socket is outside this crate's
/// scope; H is treated as a trusted collaborator, not something this
/// client authenticates or sandboxes against.
#[cfg(unix)]
mod unix {
    use std::io::{Read, Write};
    use std::os::unix::net::UnixStream;
    use std::sync::Mutex;

    use super::{FeatureInfo, HostChannelError, Result};

    #[derive(Debug, Clone, PartialEq, Eq)]
    enum Request {
        FeatureInfo,
        CreateColorBufferDma { width: u32, height: u32, rc_alloc_format: i32, emu_fwk_format: i32 },
        CloseColorBuffer { handle: u32 },
        ColorBufferCacheFlush { handle: u32 },
        ReadColorBufferYuv { handle: u32, width: u32, height: u32, len: u32 },
        ReadColorBufferDma { handle: u32, width: u32, height: u32, gl_format: i32, gl_type: i32, len: u32 },
        UpdateColorBufferDma { handle: u32, width: u32, height: u32, gl_format: i32, gl_type: i32, data: Vec<u8> },
        BindDmaDirectly { ptr: u64, phys_addr: u64 },
    }

    #[derive(Debug, Clone, PartialEq, Eq)]
    enum Response {
        FeatureInfo { shared_slots: bool, read_dma: bool, yuv_cache: bool },
        Handle(u32),
        IntResult(i32),
        Data(Vec<u8>),
        Ack,
        Err(String),
    }

    fn encode_request(req: &Request) -> Vec<u8> {
        let mut out = Vec::new();
        match req {
            Request::FeatureInfo => out.push(0),
            Request::CreateColorBufferDma { width, height, rc_alloc_format, emu_fwk_format } => {
                out.push(1);
                out.extend_from_slice(&width.to_le_bytes());
                out.extend_from_slice(&height.to_le_bytes());
                out.extend_from_slice(&rc_alloc_format.to_le_bytes());
                out.extend_from_slice(&emu_fwk_format.to_le_bytes());
            }
            Request::CloseColorBuffer { handle } => {
                out.push(2);
                out.extend_from_slice(&handle.to_le_bytes());
            }
            Request::ColorBufferCacheFlush { handle } => {
                out.push(3);
                out.extend_from_slice(&handle.to_le_bytes());
            }
            Request::ReadColorBufferYuv { handle, width, height, len } => {
                out.push(4);
                out.extend_from_slice(&handle.to_le_bytes());
                out.extend_from_slice(&width.to_le_bytes());
                out.extend_from_slice(&height.to_le_bytes());
                out.extend_from_slice(&len.to_le_bytes());
            }
            Request::ReadColorBufferDma { handle, width, height, gl_format, gl_type, len } => {
                out.push(5);
                out.extend_from_slice(&handle.to_le_bytes());
                out.extend_from_slice(&width.to_le_bytes());
                out.extend_from_slice(&height.to_le_bytes());
                out.extend_from_slice(&gl_format.to_le_bytes());
                out.extend_from_slice(&gl_type.to_le_bytes());
                out.extend_from_slice(&len.to_le_bytes());
            }
            Request::UpdateColorBufferDma { handle, width, height, gl_format, gl_type, data } => {
                out.push(6);
                out.extend_from_slice(&handle.to_le_bytes());
                out.extend_from_slice(&width.to_le_bytes());
                out.extend_from_slice(&height.to_le_bytes());
                out.extend_from_slice(&gl_format.to_le_bytes());
                out.extend_from_slice(&gl_type.to_le_bytes());
                out.extend_from_slice(&(data.len() as u32).to_le_bytes());
                out.extend_from_slice(data);
            }
            Request::BindDmaDirectly { ptr, phys_addr } => {
                out.push(7);
                out.extend_from_slice(&ptr.to_le_bytes());
                out.extend_from_slice(&phys_addr.to_le_bytes());
            }
        }
        out
    }

    fn decode_response(bytes: &[u8]) -> Result<Response> {
        let tag = *bytes.first().ok_or_else(|| HostChannelError::Unavailable("empty response".into()))?;
        let body = &bytes[1..];
        let u32_at = |off: usize| u32::from_le_bytes(body[off..off + 4].try_into().unwrap());
        let i32_at = |off: usize| i32::from_le_bytes(body[off..off + 4].try_into().unwrap());
        Ok(match tag {
            0 => Response::FeatureInfo {
                shared_slots: body[0] != 0,
                read_dma: body[1] != 0,
                yuv_cache: body[2] != 0,
            },
            1 => Response::Handle(u32_at(0)),
            2 => Response::IntResult(i32_at(0)),
            3 => Response::Data(body.to_vec()),
            4 => Response::Ack,
            5 => Response::Err(String::from_utf8_lossy(body).into_owned()),
            other => return Err(HostChannelError::Unavailable(format!("unknown response tag {other}"))),
        })
    }

    /// A process-wide connection to the host agent; every call acquires the
    /// stream lock for the duration of one request/response round trip,
    /// modeling `HostConnectionSession` scope.
    pub struct UnixHostChannel {
        stream: Mutex<UnixStream>,
    }

    impl UnixHostChannel {
        pub fn connect(path: impl AsRef<std::path::Path>) -> std::io::Result<Self> {
            Ok(Self { stream: Mutex::new(UnixStream::connect(path)?) })
        }

        fn call(&self, req: Request) -> Result<Response> {
            let mut stream = self.stream.lock().unwrap();
            let encoded = encode_request(&req);
            let len = encoded.len() as u32;
            stream
                .write_all(&len.to_le_bytes())
                .and_then(|_| stream.write_all(&encoded))
                .map_err(|e| HostChannelError::Unavailable(e.to_string()))?;

            let mut len_buf = [0u8; 4];
            stream.read_exact(&mut len_buf).map_err(|e| HostChannelError::Unavailable(e.to_string()))?;
            let resp_len = u32::from_le_bytes(len_buf) as usize;
            let mut resp_buf = vec![0u8; resp_len];
            stream.read_exact(&mut resp_buf).map_err(|e| HostChannelError::Unavailable(e.to_string()))?;
            decode_response(&resp_buf)
        }
    }

    impl super::HostChannel for UnixHostChannel {
        fn feature_info(&self) -> FeatureInfo {
            match self.call(Request::FeatureInfo) {
                Ok(Response::FeatureInfo { shared_slots, read_dma, yuv_cache }) => FeatureInfo {
                    has_shared_slots_host_memory_allocator: shared_slots,
                    has_read_color_buffer_dma: read_dma,
                    has_yuv_cache: yuv_cache,
                },
                _ => FeatureInfo::default(),
            }
        }

        fn create_color_buffer_dma(&self, width: u32, height: u32, rc_alloc_format: i32, emu_fwk_format: i32) -> Result<u32> {
            match self.call(Request::CreateColorBufferDma { width, height, rc_alloc_format, emu_fwk_format })? {
                Response::Handle(h) => Ok(h),
                Response::Err(e) => Err(HostChannelError::Rejected(e)),
                _ => Err(HostChannelError::Unavailable("unexpected response".into())),
            }
        }

        fn close_color_buffer(&self, handle: u32) -> Result<()> {
            match self.call(Request::CloseColorBuffer { handle })? {
                Response::Ack => Ok(()),
                Response::Err(e) => Err(HostChannelError::Rejected(e)),
                _ => Err(HostChannelError::Unavailable("unexpected response".into())),
            }
        }

        fn color_buffer_cache_flush(&self, handle: u32) -> Result<i32> {
            match self.call(Request::ColorBufferCacheFlush { handle })? {
                Response::IntResult(v) => Ok(v),
                Response::Err(e) => Err(HostChannelError::Rejected(e)),
                _ => Err(HostChannelError::Unavailable("unexpected response".into())),
            }
        }

        fn read_color_buffer_yuv(&self, handle: u32, width: u32, height: u32, dst: &mut [u8]) -> Result<()> {
            match self.call(Request::ReadColorBufferYuv { handle, width, height, len: dst.len() as u32 })? {
                Response::Data(data) => {
                    let n = data.len().min(dst.len());
                    dst[..n].copy_from_slice(&data[..n]);
                    Ok(())
                }
                Response::Err(e) => Err(HostChannelError::Rejected(e)),
                _ => Err(HostChannelError::Unavailable("unexpected response".into())),
            }
        }

        fn read_color_buffer_dma(&self, handle: u32, width: u32, height: u32, gl_format: i32, gl_type: i32, dst: &mut [u8]) -> Result<()> {
            match self.call(Request::ReadColorBufferDma { handle, width, height, gl_format, gl_type, len: dst.len() as u32 })? {
                Response::Data(data) => {
                    let n = data.len().min(dst.len());
                    dst[..n].copy_from_slice(&data[..n]);
                    Ok(())
                }
                Response::Err(e) => Err(HostChannelError::Rejected(e)),
                _ => Err(HostChannelError::Unavailable("unexpected response".into())),
            }
        }

        fn update_color_buffer_dma(&self, handle: u32, width: u32, height: u32, gl_format: i32, gl_type: i32, src: &[u8]) -> Result<()> {
            match self.call(Request::UpdateColorBufferDma { handle, width, height, gl_format, gl_type, data: src.to_vec() })? {
                Response::Ack => Ok(()),
                Response::Err(e) => Err(HostChannelError::Rejected(e)),
                _ => Err(HostChannelError::Unavailable("unexpected response".into())),
            }
        }

        fn bind_dma_directly(&self, ptr: usize, phys_addr: u64) -> Result<()> {
            match self.call(Request::BindDmaDirectly { ptr: ptr as u64, phys_addr })? {
                Response::Ack => Ok(()),
                Response::Err(e) => Err(HostChannelError::Rejected(e)),
                _ => Err(HostChannelError::Unavailable("unexpected response".into())),
            }
        }
    }
}
