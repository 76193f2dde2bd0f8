//! Box supervisor - launches box subprocesses and relays their output.
//!
//! For each launched box, two independent redirection tasks copy the child's
//! stdout and stderr into the shared sink, one 1024-byte chunk per atomic
//! framed write. Neither stream waits on the other; a failure on one stream
//! ends only that task. The supervisor never terminates boxes it launched.

use std::io;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};

use crate::handshake::BoxId;
use crate::sink::OutputSink;

/// Redirection chunk size. The CRLF suffix follows every chunk, not every
/// line.
const REDIRECT_BUF_SIZE: usize = 1024;

pub const DEFAULT_BOX_MEMORY: &str = "2M";

/// Environment variable carrying the worker memory limit to the child.
/// Passed through verbatim, never validated.
pub const BOX_MEMORY_ENV: &str = "BOXLET_BOX_MEMORY";

#[derive(Debug, thiserror::Error)]
pub enum SpawnError {
    #[error("failed to spawn box process: {0}")]
    Spawn(#[from] io::Error),
    #[error("box process has no captured {0} stream")]
    MissingStream(&'static str),
    #[error("spawn failed: {0}")]
    Other(String),
}

#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    pub box_binary: PathBuf,
    pub controller_port: u16,
    pub box_memory: String,
}

impl SupervisorConfig {
    pub fn new(box_binary: impl Into<PathBuf>, controller_port: u16) -> Self {
        Self {
            box_binary: box_binary.into(),
            controller_port,
            box_memory: DEFAULT_BOX_MEMORY.to_string(),
        }
    }

    pub fn with_box_memory(mut self, limit: impl Into<String>) -> Self {
        self.box_memory = limit.into();
        self
    }
}

/// Extension point for different box launch strategies.
pub trait BoxSpawner: Send + Sync {
    fn spawn(&self, id: BoxId) -> Result<Child, SpawnError>;
}

/// Spawner invoking the box binary with `<id> :<port>` positional arguments.
///
/// The empty host in the address argument means "any local interface". The
/// memory limit rides along in the child environment.
pub struct CommandSpawner {
    config: SupervisorConfig,
}

impl CommandSpawner {
    pub fn new(config: SupervisorConfig) -> Self {
        Self { config }
    }
}

impl BoxSpawner for CommandSpawner {
    fn spawn(&self, id: BoxId) -> Result<Child, SpawnError> {
        let own_address = format!(":{}", self.config.controller_port);
        let child = Command::new(&self.config.box_binary)
            .arg(id.to_string())
            .arg(own_address)
            .env(BOX_MEMORY_ENV, &self.config.box_memory)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()?;
        Ok(child)
    }
}

/// Launches boxes and schedules their output redirection.
pub struct Supervisor {
    spawner: Arc<dyn BoxSpawner>,
    sink: Arc<dyn OutputSink>,
}

impl Supervisor {
    pub fn new(spawner: Arc<dyn BoxSpawner>, sink: Arc<dyn OutputSink>) -> Self {
        Self { spawner, sink }
    }

    /// Launch one box with a fresh id and schedule both redirection tasks.
    pub fn start_box(&self) -> Result<BoxId, SpawnError> {
        let id = BoxId::new();
        tracing::info!(%id, "starting box");

        let mut child = self.spawner.spawn(id)?;
        let stdout = child
            .stdout
            .take()
            .ok_or(SpawnError::MissingStream("stdout"))?;
        let stderr = child
            .stderr
            .take()
            .ok_or(SpawnError::MissingStream("stderr"))?;

        // Two independent tasks: stderr relay must not wait for stdout EOF.
        tokio::spawn(redirect(id, format!("{id}: "), stdout, self.sink.clone()));
        tokio::spawn(redirect(
            id,
            format!("Error in {id}: "),
            stderr,
            self.sink.clone(),
        ));

        tokio::spawn(async move {
            match child.wait().await {
                Ok(status) => tracing::debug!(%id, %status, "box exited"),
                Err(e) => tracing::warn!(%id, error = %e, "failed to wait for box"),
            }
        });

        Ok(id)
    }

    /// Launch `count` boxes sequentially.
    ///
    /// The first spawn failure aborts the whole batch; remaining launches
    /// are never attempted.
    pub fn start_boxes(&self, count: usize) -> Result<Vec<BoxId>, SpawnError> {
        let mut launched = Vec::with_capacity(count);
        for _ in 0..count {
            launched.push(self.start_box()?);
        }
        Ok(launched)
    }
}

/// Copy one child stream into the sink, one framed chunk at a time.
async fn redirect<R: AsyncRead + Unpin>(
    id: BoxId,
    prefix: String,
    mut source: R,
    sink: Arc<dyn OutputSink>,
) {
    let prefix = prefix.into_bytes();
    let mut buf = [0u8; REDIRECT_BUF_SIZE];

    loop {
        match source.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => {
                if let Err(e) = sink.write_framed(&prefix, &buf[..n]).await {
                    tracing::warn!(%id, error = %e, "failed to write relayed output");
                    break;
                }
            }
            Err(e) => {
                tracing::warn!(%id, error = %e, "encountered error while redirecting");
                break;
            }
        }
    }
}
