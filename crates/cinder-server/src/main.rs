use clap::Parser;
use tokio::net::TcpListener;
use tracing::{error, info};

use cinder_core::Engine;
use cinder_server::{Handler, ServerConfig};

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "cinder=info".into()),
        )
        .init();

    let config = ServerConfig::parse();
    if let Err(e) = config.validate() {
        error!("invalid configuration: {e}");
        std::process::exit(1);
    }
    config.warn_reserved();

    let engine = match Engine::new(config.engine_config()) {
        Ok(engine) => engine,
        Err(e) => {
            error!("engine startup failed: {e}");
            std::process::exit(1);
        }
    };

    let addr = config.addr();
    let listener = match TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(e) => {
            error!("failed to bind {addr}: {e}");
            std::process::exit(1);
        }
    };
    info!("listening on {addr}");

    let handler = Handler::new(engine);
    tokio::select! {
        _ = handler.clone().serve(listener) => {}
        _ = shutdown_signal() => {
            info!("signal received, starting graceful shutdown");
        }
    }
    handler.shutdown().await;
}

/// Resolves on SIGINT, SIGTERM, SIGHUP, or SIGQUIT.
async fn shutdown_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    let mut interrupt = signal(SignalKind::interrupt()).expect("install SIGINT handler");
    let mut terminate = signal(SignalKind::terminate()).expect("install SIGTERM handler");
    let mut hangup = signal(SignalKind::hangup()).expect("install SIGHUP handler");
    let mut quit = signal(SignalKind::quit()).expect("install SIGQUIT handler");

    tokio::select! {
        _ = interrupt.recv() => {}
        _ = terminate.recv() => {}
        _ = hangup.recv() => {}
        _ = quit.recv() => {}
    }
}
