//! boxlet-box: dial the controller, advertise the identity, relay bytes.

use std::process;

use tokio_util::sync::CancellationToken;

use boxlet::worker::{ControllerAddr, WorkerConfig, run_worker};
use boxlet::BoxId;

#[tokio::main]
async fn main() {
    boxlet::init_tracing();

    let args: Vec<String> = std::env::args().collect();
    let config = match parse_args(&args) {
        Ok(config) => config,
        Err(msg) => {
            if !msg.is_empty() {
                eprintln!("error: {msg}");
                eprintln!();
            }
            eprintln!("usage: boxlet-box <id> <controller-address>");
            process::exit(2);
        }
    };

    let shutdown = CancellationToken::new();
    tokio::spawn({
        let shutdown = shutdown.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                shutdown.cancel();
            }
        }
    });

    if let Err(e) = run_worker(config, shutdown).await {
        tracing::error!(error = %e, "error occurred while running box");
        process::exit(1);
    }
}

fn parse_args(args: &[String]) -> Result<WorkerConfig, String> {
    if args.len() != 3 {
        return Err(String::new());
    }
    let id = BoxId::parse(&args[1]).map_err(|e| format!("invalid box id: {e}"))?;
    let controller =
        ControllerAddr::parse(&args[2]).map_err(|e| e.to_string())?;
    Ok(WorkerConfig::new(id, controller))
}
