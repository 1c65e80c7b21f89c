//! # Vela Hub
//!
//! Binary entry point.
//!
//! ```text
//! load config ──► open database (migrate) ──► resolve license keys ──► serve
//! ```

use anyhow::Context;
use tokio::net::TcpListener;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use vela_db::{Database, DbConfig};
use vela_hub::{AppState, HubConfig, LicenseKeys};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    info!("Starting Vela hub...");

    let config = HubConfig::load().context("invalid hub configuration")?;
    info!(
        addr = %config.bind_addr,
        database = %config.database_path.display(),
        environment = ?config.environment,
        license_enforcement = config.license.enforcement,
        identity_enforcement = config.identity.enforcement,
        "Configuration loaded"
    );

    let db = Database::new(DbConfig::new(&config.database_path))
        .await
        .context("cannot open hub database")?;
    info!("Database ready");

    let keys = LicenseKeys::from_config(&config.license, config.environment)
        .context("cannot load license signing key")?;
    if !config.license.enforcement {
        warn!("License enforcement disabled: sync routes accept unauthenticated pushes");
    }

    let addr = config.bind_addr;
    let state = AppState::new(config, db.clone(), keys)?;
    let app = vela_hub::app(state);

    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("cannot bind {addr}"))?;
    info!(%addr, "Hub listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    db.close().await;
    info!("Server shutdown complete");
    Ok(())
}

/// `RUST_LOG` filter (default `info`); `LOG_FORMAT=json` for JSON lines.
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let json = std::env::var("LOG_FORMAT").is_ok_and(|v| v.eq_ignore_ascii_case("json"));

    let builder = tracing_subscriber::fmt().with_env_filter(filter).with_target(true);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

/// Graceful shutdown signal handler.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received, starting graceful shutdown...");
}
