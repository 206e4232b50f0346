use std::sync::Arc;

use clap::Parser;
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

use signalroom::app_state::AppState;
use signalroom::auth::JwtVerifier;
use signalroom::config::{generate_config_template, Cli, Config};
use signalroom::metrics;
use signalroom::persistence::NullStore;
use signalroom::routes::build_router;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    if cli.generate_config {
        print!("{}", generate_config_template());
        return Ok(());
    }

    let config = Config::load(&cli)?;
    init_tracing(config.json_logs);

    tracing::info!("signalroom v{} starting", env!("CARGO_PKG_VERSION"));

    let prometheus = metrics::install_recorder()?;
    let state = AppState::new(
        Arc::new(JwtVerifier::new(config.jwt_secret.as_bytes())),
        Arc::new(NullStore),
        config.connection_settings(),
    )
    .with_metrics(prometheus);
    let app = build_router(state, config.static_dir.as_deref());

    let addr = config.socket_addr()?;
    let listener = TcpListener::bind(addr).await?;
    tracing::info!(%addr, "Listening");

    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Server stopped");
    Ok(())
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("signalroom=info,tower_http=info"));

    if json {
        tracing_subscriber::fmt().json().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt().pretty().with_env_filter(filter).init();
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
}
