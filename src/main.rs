use std::sync::Arc;

use anyhow::Context;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tracing::info;

use storefront_api::cache::create_cache;
use storefront_api::config::{init_tracing, load_config};
use storefront_api::db::establish_connection_from_app_config;
use storefront_api::events::process_events;
use storefront_api::gateway::HttpPaymentGateway;
use storefront_api::{app, AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Arc::new(load_config().context("failed to load configuration")?);
    init_tracing(&config.log_level, config.log_json);

    let db = establish_connection_from_app_config(&config)
        .await
        .context("failed to connect to database")?;
    let cache = create_cache(&config);
    let gateway = Arc::new(HttpPaymentGateway::new(&config));

    let (tx, rx) = mpsc::channel(1024);
    tokio::spawn(process_events(rx));

    let state = AppState::new(
        db,
        config.clone(),
        cache,
        gateway,
        storefront_api::events::EventSender::new(tx),
    );

    let addr = format!("{}:{}", config.host, config.port);
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {}", addr))?;
    info!(addr = %addr, "listening");

    axum::serve(listener, app(state))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to install ctrl-c handler");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => tracing::error!(error = %e, "failed to install sigterm handler"),
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("shutdown signal received");
}
