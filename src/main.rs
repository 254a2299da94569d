mod adapter;
mod backend;
mod candidate;
mod config;
mod device;
mod errors;
mod prompt;
mod protocol;
mod registry;
mod server;
mod serverless;

use std::path::Path;
use std::sync::Arc;

use clap::Parser;
use tokio::net::TcpListener;
use tokio::signal;
use tracing::{error, info, warn};

use config::{load_models, Config};
use protocol::ServerlessOutput;
use registry::Registry;

#[tokio::main]
async fn main() {
    let config = Config::parse();

    // Configure logging
    match config.log_format.as_str() {
        "json" => {
            tracing_subscriber::fmt().json().init();
        }
        _ => {
            tracing_subscriber::fmt().init();
        }
    }

    let models = load_models(&config.models).unwrap_or_else(|e| {
        error!(error = %e, "failed to load models");
        std::process::exit(1);
    });
    let registry = Registry::from_models(&models).unwrap_or_else(|e| {
        error!(error = %e, "failed to build models");
        std::process::exit(1);
    });
    if registry.is_empty() {
        warn!(path = %config.models.display(), "no models configured");
    }
    let registry = Arc::new(registry);

    if let Some(event) = &config.event {
        run_event(&registry, event).await;
        return;
    }

    let app = server::build_router(registry.clone());

    let addr = normalize_addr(&config.addr);
    let listener = TcpListener::bind(&addr).await.unwrap_or_else(|e| {
        error!(addr = addr, error = %e, "failed to bind");
        std::process::exit(1);
    });

    info!(addr = addr, models = registry.len(), "server starting");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .unwrap_or_else(|e| {
            error!(error = %e, "server error");
            std::process::exit(1);
        });

    info!("server stopped");
}

/// Handle one serverless event file and print the response JSON to stdout.
async fn run_event(registry: &Registry, path: &Path) {
    let body = std::fs::read_to_string(path).unwrap_or_else(|e| {
        error!(path = %path.display(), error = %e, "failed to read event");
        std::process::exit(1);
    });

    let result = match serverless::parse_event(&body) {
        Ok(event) => serverless::handler(registry, event).await,
        Err(e) => Err(e),
    };
    let output = result.unwrap_or_else(|e| {
        error!(error = %e, "event failed");
        std::process::exit(1);
    });

    match serde_json::to_string(&ServerlessOutput { output }) {
        Ok(json) => println!("{json}"),
        Err(e) => {
            error!(error = %e, "failed to encode response");
            std::process::exit(1);
        }
    }
}

/// Convert Go-style ":8000" to "0.0.0.0:8000".
fn normalize_addr(addr: &str) -> String {
    if addr.starts_with(':') {
        format!("0.0.0.0{addr}")
    } else {
        addr.to_string()
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "failed to listen for ctrl+c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                error!(error = %e, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("received SIGINT, shutting down"),
        _ = terminate => info!("received SIGTERM, shutting down"),
    }
}
