//! boxlet-controller: listen for box connections and launch box subprocesses.
//!
//! All diagnostics go to stderr; stdout carries relayed box output.

use std::process;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use boxlet::{
    CommandSpawner, Controller, ControllerConfig, StdoutSink, Supervisor, SupervisorConfig,
};

const DEFAULT_BOX_COUNT: usize = 3;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    boxlet::init_tracing();

    let args: Vec<String> = std::env::args().collect();
    let (box_binary, box_count) = match parse_args(&args) {
        Ok(v) => v,
        Err(msg) => {
            if !msg.is_empty() {
                eprintln!("error: {msg}");
                eprintln!();
            }
            eprintln!("usage: boxlet-controller <path-to-box-binary> [box-count]");
            process::exit(2);
        }
    };

    let controller = Controller::bind(&ControllerConfig::default()).await?;
    let port = controller.local_addr().port();

    let shutdown = CancellationToken::new();
    let serve = tokio::spawn({
        let shutdown = shutdown.clone();
        async move {
            if let Err(e) = controller.serve(shutdown).await {
                tracing::error!(error = %e, "encountered error in controller");
            }
        }
    });

    let spawner = CommandSpawner::new(SupervisorConfig::new(box_binary, port));
    let supervisor = Supervisor::new(Arc::new(spawner), Arc::new(StdoutSink::new()));
    if let Err(e) = supervisor.start_boxes(box_count) {
        // Batch launch aborts on the first failure; the listener keeps
        // serving whatever already connected.
        tracing::error!(error = %e, "failed to start boxes");
    }

    tokio::signal::ctrl_c().await?;
    tracing::info!("received SIGINT, shutting down");
    shutdown.cancel();
    let _ = serve.await;

    Ok(())
}

fn parse_args(args: &[String]) -> Result<(String, usize), String> {
    let box_binary = args
        .get(1)
        .cloned()
        .ok_or_else(String::new)?;
    let box_count = match args.get(2) {
        Some(raw) => raw
            .parse::<usize>()
            .map_err(|_| format!("invalid box count: {raw}"))?,
        None => DEFAULT_BOX_COUNT,
    };
    if args.len() > 3 {
        return Err(format!("unexpected argument: {}", args[3]));
    }
    Ok((box_binary, box_count))
}
