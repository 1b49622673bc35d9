//! The host pipe client (P): opens a named host pipe, used to hold a
//! refcount on a color buffer's `hostHandle`.

use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PipeError {
    #[error("failed to open pipe {name:?}: {reason}")]
    OpenFailed { name: String, reason: String },
    #[error("failed to write to pipe: {0}")]
    WriteFailed(String),
}

pub type Result<T> = std::result::Result<T, PipeError>;

/// A single directional byte-stream to a named host pipe. The allocator
/// opens one refcount pipe per GPU-backed buffer and writes the
/// `hostHandle` down it so the host can tear down the color buffer once
/// every refcount-pipe fd across every process has closed.
pub trait PipeClient: Send + Sync {
    /// Opens `name`, returning an owned fd the caller holds for the
    /// lifetime of the refcount.
    fn open(&self, name: &str) -> Result<i32>;

    /// Writes `payload` to the pipe identified by `fd`.
    fn write(&self, fd: i32, payload: &[u8]) -> Result<()>;

    fn close(&self, fd: i32) -> Result<()>;
}

#[cfg(unix)]
pub use unix::NamedFifoPipeClient;

/// A production [`PipeClient`] over named FIFOs rooted at a directory, the
/// closest portable stand-in for the Android goldfish `QEMU_PIPE_PATH`
/// handshake: each `open` call gets (creating if needed) a FIFO at
/// `root/name` and opens it read-write so closing the returned fd is
/// enough to drop the host's view of the refcount, matching the
/// last-fd-closed-releases-the-color-buffer contract.
#[cfg(unix)]
mod unix {
    use std::ffi::CString;
    use std::path::{Path, PathBuf};

    use super::{PipeError, Result};

    pub struct NamedFifoPipeClient {
        root: PathBuf,
    }

    impl NamedFifoPipeClient {
        pub fn new(root: impl Into<PathBuf>) -> Self {
            Self { root: root.into() }
        }

        fn fifo_path(&self, name: &str) -> PathBuf {
            self.root.join(name)
        }
    }

    impl super::PipeClient for NamedFifoPipeClient {
        fn open(&self, name: &str) -> Result<i32> {
            let path = self.fifo_path(name);
            ensure_fifo(&path).map_err(|e| PipeError::OpenFailed { name: name.into(), reason: e })?;

            let c_path = CString::new(path.as_os_str().to_string_lossy().as_bytes())
                .map_err(|e| PipeError::OpenFailed { name: name.into(), reason: e.to_string() })?;
            let fd = unsafe { libc::open(c_path.as_ptr(), libc::O_RDWR | libc::O_CLOEXEC) };
            if fd < 0 {
                return Err(PipeError::OpenFailed { name: name.into(), reason: "open failed".into() });
            }
            Ok(fd)
        }

        fn write(&self, fd: i32, payload: &[u8]) -> Result<()> {
            let n = unsafe { libc::write(fd, payload.as_ptr() as *const libc::c_void, payload.len()) };
            if n as usize != payload.len() {
                return Err(PipeError::WriteFailed("short write".into()));
            }
            Ok(())
        }

        fn close(&self, fd: i32) -> Result<()> {
            if unsafe { libc::close(fd) } != 0 {
                return Err(PipeError::WriteFailed("close failed".into()));
            }
            Ok(())
        }
    }

    fn ensure_fifo(path: &Path) -> std::result::Result<(), String> {
        let c_path = CString::new(path.as_os_str().to_string_lossy().as_bytes()).map_err(|e| e.to_string())?;
        let rc = unsafe { libc::mkfifo(c_path.as_ptr(), 0o600) };
        if rc != 0 {
            let err = std::io::Error::last_os_error();
            if err.kind() != std::io::ErrorKind::AlreadyExists {
                return Err(err.to_string());
            }
        }
        Ok(())
    }
}
