//! Box client - runs inside the box subprocess.
//!
//! Lifecycle: write the startup marker file, connect to the controller with
//! a bounded timeout, advertise the identity frame, then relay every byte
//! received from the connection to stdout until the peer closes or the run
//! is cancelled. The connection is dropped exactly once on every exit path.

use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use futures::SinkExt;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio_util::codec::FramedWrite;
use tokio_util::sync::CancellationToken;

use crate::handshake::{BoxId, HandshakeCodec};

pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_millis(5000);

/// Relay read chunk size.
const RELAY_BUF_SIZE: usize = 4096;

/// Controller dial target in `host:port` form.
///
/// An empty host means "any local interface"; the box dials loopback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControllerAddr {
    host: String,
    port: u16,
}

impl ControllerAddr {
    pub fn parse(input: &str) -> Result<Self, AddrError> {
        let (host, port) = input
            .rsplit_once(':')
            .ok_or_else(|| AddrError::PortMissing(input.to_string()))?;
        let port = port
            .parse::<u16>()
            .map_err(|_| AddrError::InvalidPort(input.to_string()))?;
        Ok(Self {
            host: host.to_string(),
            port,
        })
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Hostname to dial; loopback when the host part is empty.
    pub fn dial_host(&self) -> &str {
        if self.host.is_empty() {
            "127.0.0.1"
        } else {
            &self.host
        }
    }
}

impl std::fmt::Display for ControllerAddr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AddrError {
    #[error("port missing: {0}")]
    PortMissing(String),
    #[error("invalid port in address: {0}")]
    InvalidPort(String),
}

#[derive(Debug, thiserror::Error)]
pub enum WorkerError {
    #[error("failed to connect to {addr}: {source}")]
    Connect {
        addr: ControllerAddr,
        #[source]
        source: io::Error,
    },
    #[error("timed out connecting to {addr} after {timeout:?}")]
    ConnectTimeout {
        addr: ControllerAddr,
        timeout: Duration,
    },
    #[error(transparent)]
    Io(#[from] io::Error),
}

#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub id: BoxId,
    pub controller: ControllerAddr,
    pub connect_timeout: Duration,
    pub marker_dir: PathBuf,
}

impl WorkerConfig {
    pub fn new(id: BoxId, controller: ControllerAddr) -> Self {
        Self {
            id,
            controller,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            marker_dir: PathBuf::from("."),
        }
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_marker_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.marker_dir = dir.into();
        self
    }
}

/// Run the box: marker file, connect, advertise, relay to stdout.
pub async fn run_worker(config: WorkerConfig, shutdown: CancellationToken) -> Result<(), WorkerError> {
    run(config, tokio::io::stdout(), shutdown).await
}

async fn run<W: AsyncWrite + Unpin>(
    config: WorkerConfig,
    output: W,
    shutdown: CancellationToken,
) -> Result<(), WorkerError> {
    // Discoverability breadcrumb, not part of the protocol. Failure is
    // fatal to the run.
    write_marker_file(&config.id, &config.marker_dir).await?;

    let stream = connect(&config).await?;
    tracing::info!(id = %config.id, controller = %config.controller, "connected to controller");

    let mut framed = FramedWrite::new(stream, HandshakeCodec);
    framed.send(config.id).await?;

    relay(framed.into_inner(), output, shutdown).await?;
    Ok(())
}

/// Write `<id>.box.txt` containing the id's textual form.
pub async fn write_marker_file(id: &BoxId, dir: &Path) -> io::Result<PathBuf> {
    let path = dir.join(format!("{id}.box.txt"));
    tokio::fs::write(&path, id.to_string()).await?;
    Ok(path)
}

async fn connect(config: &WorkerConfig) -> Result<TcpStream, WorkerError> {
    let target = (config.controller.dial_host(), config.controller.port());
    match tokio::time::timeout(config.connect_timeout, TcpStream::connect(target)).await {
        Ok(Ok(stream)) => Ok(stream),
        Ok(Err(source)) => Err(WorkerError::Connect {
            addr: config.controller.clone(),
            source,
        }),
        Err(_) => Err(WorkerError::ConnectTimeout {
            addr: config.controller.clone(),
            timeout: config.connect_timeout,
        }),
    }
}

/// Copy bytes from the connection to `output` until end-of-stream or
/// cancellation. Cancellation is observed between reads, not mid-read.
async fn relay<R, W>(mut conn: R, mut output: W, shutdown: CancellationToken) -> io::Result<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut buf = [0u8; RELAY_BUF_SIZE];
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => {
                tracing::info!("relay cancelled");
                return Ok(());
            }
            read = conn.read(&mut buf) => {
                let n = read?;
                if n == 0 {
                    // Peer closed.
                    return Ok(());
                }
                output.write_all(&buf[..n]).await?;
                output.flush().await?;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controller::{Controller, ControllerConfig};

    #[test]
    fn parse_port_only_address_dials_loopback() {
        let addr = ControllerAddr::parse(":31337").unwrap();
        assert_eq!(addr.port(), 31337);
        assert_eq!(addr.dial_host(), "127.0.0.1");
        assert_eq!(addr.to_string(), ":31337");
    }

    #[test]
    fn parse_host_and_port() {
        let addr = ControllerAddr::parse("example.com:80").unwrap();
        assert_eq!(addr.dial_host(), "example.com");
        assert_eq!(addr.port(), 80);
    }

    #[test]
    fn parse_rejects_missing_separator() {
        assert_eq!(
            ControllerAddr::parse("31337"),
            Err(AddrError::PortMissing("31337".to_string()))
        );
    }

    #[test]
    fn parse_rejects_bad_port() {
        assert!(matches!(
            ControllerAddr::parse("host:notaport"),
            Err(AddrError::InvalidPort(_))
        ));
        assert!(matches!(
            ControllerAddr::parse("host:99999"),
            Err(AddrError::InvalidPort(_))
        ));
    }

    #[test]
    fn worker_config_defaults() {
        let config = WorkerConfig::new(BoxId::new(), ControllerAddr::parse(":1").unwrap());
        assert_eq!(config.connect_timeout, DEFAULT_CONNECT_TIMEOUT);
        assert_eq!(config.marker_dir, PathBuf::from("."));
    }

    #[tokio::test]
    async fn marker_file_contains_id() {
        let dir = tempfile::tempdir().unwrap();
        let id = BoxId::new();

        let path = write_marker_file(&id, dir.path()).await.unwrap();
        assert_eq!(path.file_name().unwrap().to_str().unwrap(), format!("{id}.box.txt"));
        assert_eq!(tokio::fs::read_to_string(&path).await.unwrap(), id.to_string());
    }

    #[tokio::test]
    async fn relay_copies_until_eof() {
        let (mut near, far) = tokio::io::duplex(64);
        let mut out = Vec::new();

        let task = tokio::spawn(async move {
            let mut out = Vec::new();
            relay(far, &mut out, CancellationToken::new()).await.unwrap();
            out
        });

        use tokio::io::AsyncWriteExt as _;
        near.write_all(b"first ").await.unwrap();
        near.write_all(b"second").await.unwrap();
        drop(near);

        out.extend(task.await.unwrap());
        assert_eq!(out, b"first second");
    }

    #[tokio::test]
    async fn relay_exits_on_cancellation() {
        let (_near, far) = tokio::io::duplex(64);
        let shutdown = CancellationToken::new();
        shutdown.cancel();

        let mut out = Vec::new();
        relay(far, &mut out, shutdown).await.unwrap();
        assert!(out.is_empty());
    }

    #[tokio::test]
    async fn connection_refused_is_connect_error() {
        // Bind then drop to get a port with nothing listening.
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let dir = tempfile::tempdir().unwrap();
        let config = WorkerConfig::new(
            BoxId::new(),
            ControllerAddr::parse(&format!("127.0.0.1:{port}")).unwrap(),
        )
        .with_marker_dir(dir.path());

        match run(config, Vec::new(), CancellationToken::new()).await {
            Err(WorkerError::Connect { .. }) | Err(WorkerError::ConnectTimeout { .. }) => {}
            other => panic!("expected connect failure, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn end_to_end_handshake_and_relay() {
        let controller = Controller::bind(&ControllerConfig {
            host: "127.0.0.1".to_string(),
            port: 0,
        })
        .await
        .unwrap();
        let port = controller.local_addr().port();

        let shutdown = CancellationToken::new();
        let serve = tokio::spawn(controller.serve(shutdown.clone()));

        let dir = tempfile::tempdir().unwrap();
        let id = BoxId::parse("00000000-0000-0000-0000-000000000001").unwrap();
        let config = WorkerConfig::new(
            id,
            ControllerAddr::parse(&format!("127.0.0.1:{port}")).unwrap(),
        )
        .with_marker_dir(dir.path());

        let mut received = Vec::new();
        // The controller replies with a name and closes; the relay loop
        // observes end-of-stream and the run terminates on its own.
        run(config, &mut received, CancellationToken::new())
            .await
            .unwrap();

        let payload = String::from_utf8(received).unwrap();
        assert!(payload.contains(' '), "expected a name, got {payload:?}");

        assert!(dir.path().join(format!("{id}.box.txt")).exists());

        shutdown.cancel();
        serve.await.unwrap().unwrap();
    }
}
