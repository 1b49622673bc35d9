//! The allocator service binary: owns the `tokio` runtime, the listening
//! Unix-domain socket, `tracing-subscriber` initialization and `clap`
//! argument parsing around `vgfx_allocator::AllocatorEngine`, the same
//! logic-crate/`src/main.rs` split as `aero-storage-server` /
//! `aero-machine-cli`.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{UnixListener, UnixStream};
use tracing::{error, info, instrument};

use vgfx_allocator::protocol::{self, Request, Response};
use vgfx_allocator::AllocatorEngine;
use vgfx_host::{MemfdHostMemoryAllocator, NamedFifoPipeClient, UnixHostChannel};
use vgfx_types::config::DebugLevel;

/// Registered service name (`<descriptor>/default`); also the default
/// Unix-socket filename stem.
const SERVICE_NAME: &str = "android.hardware.graphics.allocator.IAllocator/default";

/// A thread pool of max 4 worker threads by default.
const DEFAULT_WORKER_THREADS: usize = 4;

#[derive(Parser, Debug)]
#[command(name = "vgfx-allocator-service", version, about = "Virtualized graphics buffer allocator service")]
struct Args {
    /// Path of the Unix-domain socket this service listens on.
    #[arg(long, env = "VGFX_ALLOCATOR_SOCKET", default_value = "/tmp/vgfx-allocator.sock")]
    socket: PathBuf,

    /// Path of the Unix-domain socket the host rendering encoder listens on.
    #[arg(long, env = "VGFX_HOST_CHANNEL_SOCKET", default_value = "/tmp/vgfx-host-channel.sock")]
    host_channel_socket: PathBuf,

    /// Directory under which refcount FIFOs are created.
    #[arg(long, env = "VGFX_REFCOUNT_PIPE_ROOT", default_value = "/tmp/vgfx-refcount-pipes")]
    refcount_pipe_root: PathBuf,

    /// Size of the request-handling worker pool.
    #[arg(long, env = "VGFX_ALLOCATOR_WORKERS", default_value_t = DEFAULT_WORKER_THREADS)]
    worker_threads: usize,
}

fn main() -> Result<()> {
    let args = Args::parse();
    init_tracing();

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(args.worker_threads.max(1))
        .enable_all()
        .build()
        .context("failed to build tokio runtime")?;

    runtime.block_on(run(args))
}

fn init_tracing() {
    let debug_level = DebugLevel::from_env();
    let filter = match debug_level {
        DebugLevel::Error => "error",
        DebugLevel::Alloc => "vgfx_allocator=debug,info",
        DebugLevel::Import | DebugLevel::Lock | DebugLevel::Flush => "vgfx_allocator=debug,vgfx_host=debug,info",
        DebugLevel::Metadata => "trace",
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter)),
        )
        .init();
}

async fn run(args: Args) -> Result<()> {
    std::fs::create_dir_all(&args.refcount_pipe_root)
        .with_context(|| format!("creating refcount pipe root {:?}", args.refcount_pipe_root))?;

    let host_channel = UnixHostChannel::connect(&args.host_channel_socket)
        .with_context(|| format!("connecting to host channel at {:?}", args.host_channel_socket))?;
    let host_memory = MemfdHostMemoryAllocator::new();
    let pipe_client = NamedFifoPipeClient::new(args.refcount_pipe_root.clone());

    let engine = Arc::new(AllocatorEngine::new(
        Arc::new(host_channel),
        Arc::new(host_memory),
        Arc::new(pipe_client),
    ));

    if args.socket.exists() {
        std::fs::remove_file(&args.socket)?;
    }
    let listener = UnixListener::bind(&args.socket)
        .with_context(|| format!("binding allocator socket {:?}", args.socket))?;

    info!(service = SERVICE_NAME, socket = ?args.socket, workers = args.worker_threads, "allocator service listening");

    loop {
        let (stream, _addr) = listener.accept().await.context("accept failed")?;
        let engine = Arc::clone(&engine);
        tokio::spawn(async move {
            if let Err(e) = serve_connection(stream, engine).await {
                error!(error = %e, "connection handling failed");
            }
        });
    }
}

async fn serve_connection(mut stream: UnixStream, engine: Arc<AllocatorEngine>) -> Result<()> {
    loop {
        let mut len_buf = [0u8; 4];
        if stream.read_exact(&mut len_buf).await.is_err() {
            return Ok(()); // peer closed the connection
        }
        let len = u32::from_le_bytes(len_buf) as usize;
        let mut body = vec![0u8; len];
        stream.read_exact(&mut body).await.context("short read of request body")?;

        let request = protocol::decode_request(&body).map_err(|_| anyhow::anyhow!("malformed request frame"))?;
        let response = handle_request(&engine, request).await;

        let encoded = protocol::encode_response(&response);
        stream.write_all(&(encoded.len() as u32).to_le_bytes()).await?;
        stream.write_all(&encoded).await?;
    }
}

#[instrument(skip(engine))]
async fn handle_request(engine: &Arc<AllocatorEngine>, request: Request) -> Response {
    let engine = Arc::clone(engine);
    let result = tokio::task::spawn_blocking(move || match request {
        Request::Allocate2 { descriptor, count } => engine
            .allocate(&descriptor, count)
            .map(|(stride, buffers)| Response::Allocation {
                stride,
                buffers: buffers.iter().map(vgfx_types::handle::WireBufferHandle::from_handle).collect(),
            }),
        Request::IsSupported { descriptor } => Ok(Response::Supported(engine.is_supported(&descriptor))),
        Request::GetLibrarySuffix => Ok(Response::LibrarySuffix(engine.library_suffix().to_string())),
        Request::AllocateLegacy { encoded, .. } => engine.allocate_legacy(&encoded).map(|_| unreachable!()),
    })
    .await;

    match result {
        Ok(Ok(response)) => response,
        Ok(Err(err)) => {
            error!(error = %err, "request failed");
            protocol::error_response(&err)
        }
        Err(join_err) => {
            error!(error = %join_err, "worker task panicked");
            Response::Error(vgfx_types::error::StatusCode::NoResources)
        }
    }
}
