//! Transport bindings for the binary: stdio and a Unix socket.

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::net::{UnixListener, UnixStream};

use tabfs_kernel::{Dispatcher, LengthPrefixedReader, LengthPrefixedWriter};

/// Serve length-prefixed records on stdin/stdout until stdin closes.
pub async fn serve_stdio(dispatcher: Arc<Dispatcher>, max_frame: usize) -> Result<()> {
    let reader = LengthPrefixedReader::new(tokio::io::stdin()).with_max_frame(max_frame);
    let writer = LengthPrefixedWriter::new(tokio::io::stdout()).with_max_frame(max_frame);
    tracing::info!("serving on stdio");
    dispatcher.serve(reader, writer).await?;
    tracing::info!("stdin closed, shutting down");
    Ok(())
}

/// Serve on a Unix socket, one connection at a time. Runs until the
/// listener fails.
pub async fn serve_socket(dispatcher: Arc<Dispatcher>, path: &Path, max_frame: usize) -> Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    // Remove stale socket
    if path.exists() {
        tokio::fs::remove_file(path).await?;
    }

    let listener = UnixListener::bind(path)
        .with_context(|| format!("failed to bind {}", path.display()))?;
    tracing::info!(path = %path.display(), "socket listening");

    loop {
        let (stream, _addr) = listener.accept().await?;
        tracing::info!("driver connected");
        if let Err(e) = serve_connection(Arc::clone(&dispatcher), stream, max_frame).await {
            tracing::warn!("connection error: {e}");
        }
        tracing::info!("driver disconnected");
    }
}

async fn serve_connection(dispatcher: Arc<Dispatcher>, stream: UnixStream, max_frame: usize) -> Result<()> {
    let (reader, writer) = stream.into_split();
    let reader = LengthPrefixedReader::new(reader).with_max_frame(max_frame);
    let writer = LengthPrefixedWriter::new(writer).with_max_frame(max_frame);
    dispatcher.serve(reader, writer).await?;
    Ok(())
}
