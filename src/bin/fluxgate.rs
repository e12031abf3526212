//! fluxgate relay binary
//!
//! Starts one relay listener per `[[http]]` configuration entry and runs
//! them until a shutdown signal arrives.

use clap::Parser;
use fluxgate::api;
use fluxgate::cluster::ClusterRouter;
use fluxgate::config::{HttpConfig, RelayConfig};
use std::process::ExitCode;
use std::sync::Arc;
use tokio::signal;
use tokio::sync::watch;
use tracing::{error, info, warn, Level};
use tracing_subscriber::FmtSubscriber;

/// fluxgate relay
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Configuration file to use
    #[arg(long)]
    config: Option<String>,

    /// Log level
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    let log_level = match args.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(true)
        .init();

    let Some(config_path) = args.config else {
        eprintln!("Missing configuration file");
        return ExitCode::from(1);
    };
    let cfg = match RelayConfig::from_file(&config_path) {
        Ok(cfg) => cfg,
        Err(err) => {
            eprintln!("Problem loading config file: {err}");
            return ExitCode::from(1);
        }
    };
    if let Err(err) = cfg.validate() {
        eprintln!("Invalid configuration: {err}");
        return ExitCode::from(1);
    }

    info!("starting relays");

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut servers = Vec::new();
    for http in cfg.http {
        servers.push(tokio::spawn(run_relay(http, shutdown_rx.clone())));
    }

    shutdown_signal().await;
    info!("shutdown signal received");
    let _ = shutdown_tx.send(true);

    for server in servers {
        match server.await {
            Ok(Ok(())) => {}
            Ok(Err(err)) => error!(error = %err, "relay terminated with error"),
            Err(err) => error!(error = %err, "relay task panicked"),
        }
    }

    info!("relays stopped");
    ExitCode::SUCCESS
}

/// Serve one `[[http]]` entry until shutdown, then close its router
async fn run_relay(cfg: HttpConfig, mut shutdown: watch::Receiver<bool>) -> fluxgate::Result<()> {
    if cfg.ssl_combined_pem.is_some() {
        warn!(
            relay = %cfg.name,
            "ssl-combined-pem is set; TLS termination is delegated to the fronting terminator"
        );
    }

    let router = Arc::new(ClusterRouter::new(&cfg)?);
    let app = api::build_router(router.clone(), &cfg);

    let listener = tokio::net::TcpListener::bind(&cfg.bind_addr).await?;
    info!(name = %cfg.name, addr = %cfg.bind_addr, "relay listening");

    let result = axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = shutdown.changed().await;
        })
        .await;

    // in-flight requests have completed; stop probes and drain loops
    router.close();
    result.map_err(Into::into)
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
