//! boxlet: a minimal controller/worker harness.
//!
//! The controller listens on a TCP port, launches box subprocesses, accepts
//! a 16-byte identity handshake from each box, and relays the subprocesses'
//! stdout/stderr to its own stdout with identity prefixes. The box dials the
//! controller, advertises its identity, then copies everything it receives
//! to its own stdout until the peer closes.

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

pub mod controller;
pub mod handshake;
pub mod sink;
pub mod supervisor;
pub mod worker;

pub use controller::{Controller, ControllerConfig};
pub use handshake::{BoxId, HANDSHAKE_LEN, HandshakeCodec, MalformedHandshake};
pub use sink::{BufferSink, OutputSink, StdoutSink};
pub use supervisor::{BoxSpawner, CommandSpawner, SpawnError, Supervisor, SupervisorConfig};
pub use worker::{ControllerAddr, WorkerConfig, WorkerError, run_worker};

/// Initialize tracing with RUST_LOG support.
///
/// Diagnostics go to stderr: stdout belongs to relayed box output.
pub fn init_tracing() {
    let filter = if std::env::var("RUST_LOG").is_ok() {
        EnvFilter::from_default_env()
    } else {
        EnvFilter::new("boxlet=info")
    };

    let subscriber = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr));
    let _ = subscriber.try_init();
}
