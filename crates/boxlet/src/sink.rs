//! Shared output sink for relayed box output.
//!
//! Every redirection task writes into one sink. A framed write (prefix,
//! payload, CRLF suffix) is atomic relative to all other writers: the mutex
//! is held for the whole triple, so no other writer's bytes can land between
//! one writer's prefix and suffix. Ordering between completed writes from
//! different tasks is unspecified.

use std::io;

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

const SUFFIX: &[u8] = b"\r\n";

/// Destination for identity-prefixed box output.
#[async_trait]
pub trait OutputSink: Send + Sync {
    /// Write `prefix`, `payload`, CRLF as one atomic unit.
    async fn write_framed(&self, prefix: &[u8], payload: &[u8]) -> io::Result<()>;
}

/// Process stdout behind a mutex.
///
/// Diagnostics must not be written here; tracing goes to stderr so relayed
/// box output stays uncorrupted.
pub struct StdoutSink {
    out: Mutex<tokio::io::Stdout>,
}

impl StdoutSink {
    pub fn new() -> Self {
        Self {
            out: Mutex::new(tokio::io::stdout()),
        }
    }
}

impl Default for StdoutSink {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl OutputSink for StdoutSink {
    async fn write_framed(&self, prefix: &[u8], payload: &[u8]) -> io::Result<()> {
        let mut out = self.out.lock().await;
        out.write_all(prefix).await?;
        out.write_all(payload).await?;
        out.write_all(SUFFIX).await?;
        out.flush().await
    }
}

/// In-memory sink for tests and capture.
#[derive(Default)]
pub struct BufferSink {
    buf: Mutex<Vec<u8>>,
}

impl BufferSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn contents(&self) -> Vec<u8> {
        self.buf.lock().await.clone()
    }
}

#[async_trait]
impl OutputSink for BufferSink {
    async fn write_framed(&self, prefix: &[u8], payload: &[u8]) -> io::Result<()> {
        let mut buf = self.buf.lock().await;
        buf.extend_from_slice(prefix);
        buf.extend_from_slice(payload);
        buf.extend_from_slice(SUFFIX);
        Ok(())
    }
}
