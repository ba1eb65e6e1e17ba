// repolens - resilient content access for Git hosting APIs
// Author: kelexine (https://github.com/kelexine)

use anyhow::Result;
use clap::Parser;
use repolens::cli::Args;
use repolens::config::AppConfig;
use repolens::credentials::CredentialRotator;
use repolens::proxy::ProxyHealthManager;
use repolens::server::create_router;
use repolens::service::{AccessPolicy, ContentService};
use repolens::utils::logging;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    // Parse CLI arguments
    let args = Args::parse();

    // Phase 1: Load configuration
    let config = match &args.config {
        Some(path) => AppConfig::load_from(path)?,
        None => AppConfig::load()?,
    };

    // Phase 2: Initialize logging
    logging::init(&config.logging)?;
    info!("Starting repolens v{}", env!("CARGO_PKG_VERSION"));

    // Phase 3: Build credential pool and proxy manager
    let rotator = Arc::new(CredentialRotator::new(
        config.credentials.tokens.iter().cloned(),
        config.credentials.exhausted_cooldown_secs,
    ));
    let proxies = Arc::new(ProxyHealthManager::new(config.proxies.clone()));

    // The server answers proxy requests itself, so it always calls the API directly
    let policy = AccessPolicy::for_server(rotator.has_credentials());
    let service = ContentService::new(&config, policy, rotator, proxies.clone())?;

    let check_timeout = Duration::from_secs(config.access.check_timeout_secs.max(1));

    // Phase 3.5: Handle --check flag
    if args.check {
        let recovered = proxies
            .check_all(service.client().http(), &config.access.check_target, check_timeout)
            .await;
        info!("Health check finished; {} proxies answered", recovered);
        println!("{}", serde_json::to_string_pretty(&proxies.health_stats())?);
        return Ok(());
    }

    // Phase 4: Background proxy probing
    let check_task = if proxies.is_empty() {
        None
    } else {
        Some(proxies.clone().spawn_check_loop(
            service.client().http().clone(),
            config.access.check_target.clone(),
            Duration::from_secs(config.access.check_interval_secs.max(1)),
            check_timeout,
        ))
    };

    // Phase 5: Build and start HTTP server
    let app = create_router(config.clone(), service)?;
    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port).parse()?;

    info!("Starting server on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;

    // Phase 6: Run server with graceful shutdown
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    if let Some(task) = check_task {
        task.abort();
    }
    info!("Server shut down gracefully");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C signal");
        },
        _ = terminate => {
            info!("Received SIGTERM signal");
        },
    }
}
