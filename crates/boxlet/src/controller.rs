//! Controller listener - accepts box handshake connections.
//!
//! Each accepted connection runs in its own task: read one identity frame,
//! log the id, send a demonstration payload, close. A stalled or failing
//! handler never blocks the accept loop or other connections.

use std::io;
use std::net::SocketAddr;

use futures::StreamExt;
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};
use tokio_util::codec::FramedRead;
use tokio_util::sync::CancellationToken;

use crate::handshake::{HandshakeCodec, MalformedHandshake};

pub const DEFAULT_PORT: u16 = 31337;

#[derive(Debug, Clone)]
pub struct ControllerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: DEFAULT_PORT,
        }
    }
}

impl ControllerConfig {
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }
}

/// Listening controller endpoint.
pub struct Controller {
    listener: TcpListener,
    local_addr: SocketAddr,
}

impl Controller {
    pub async fn bind(config: &ControllerConfig) -> io::Result<Self> {
        let listener = TcpListener::bind((config.host.as_str(), config.port)).await?;
        let local_addr = listener.local_addr()?;
        tracing::info!(%local_addr, "controller listening");
        Ok(Self {
            listener,
            local_addr,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Accept loop. Exits cooperatively when `shutdown` is cancelled.
    pub async fn serve(self, shutdown: CancellationToken) -> io::Result<()> {
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    tracing::info!("controller accept loop stopping");
                    return Ok(());
                }
                accepted = self.listener.accept() => {
                    match accepted {
                        Ok((stream, peer)) => {
                            tokio::spawn(handle_client(stream, peer));
                        }
                        Err(e) => {
                            tracing::warn!(error = %e, "failed to accept connection");
                        }
                    }
                }
            }
        }
    }
}

async fn handle_client(stream: TcpStream, peer: SocketAddr) {
    if let Err(e) = serve_client(stream).await {
        tracing::warn!(%peer, error = %e, "error while serving client");
    }
}

async fn serve_client(mut stream: TcpStream) -> io::Result<()> {
    let (read_half, mut write_half) = stream.split();
    let mut frames = FramedRead::new(read_half, HandshakeCodec);

    let id = match frames.next().await {
        Some(Ok(id)) => id,
        Some(Err(e)) => return Err(e),
        // Peer closed without sending a single byte.
        None => {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                MalformedHandshake { got: 0 },
            ));
        }
    };

    tracing::info!(%id, "accepted client");

    let payload = demo_payload();
    write_half.write_all(payload.as_bytes()).await?;
    write_half.flush().await?;

    // Connection dropped here; the box sees end-of-stream.
    Ok(())
}

const FIRST_NAMES: &[&str] = &[
    "Leonard", "Lionel", "Elton", "Nina", "Art", "Tracy", "Freddy",
];

const LAST_NAMES: &[&str] = &[
    "Cohen", "Richie", "John", "Simone", "Garfunkel", "Chapman", "Mercury",
];

/// A short human name proving two-way communication. Not a task assignment.
fn demo_payload() -> String {
    use rand::seq::SliceRandom;

    let mut rng = rand::thread_rng();
    let first = FIRST_NAMES.choose(&mut rng).expect("non-empty list");
    let last = LAST_NAMES.choose(&mut rng).expect("non-empty list");
    format!("{first} {last}")
}
