/// Veilgate - proxy account provisioning service
///
/// Drives an operator chat through account creation, deletion and extension,
/// keeps the account store authoritative and republishes the xray and
/// hysteria2 config documents from it. Expired accounts are swept in the
/// background.

mod account;
mod api;
mod auth;
mod clock;
mod config;
mod context;
mod conversation;
mod credentials;
mod db;
mod error;
mod jobs;
mod metrics;
mod publish;
mod server;
mod synthesis;

use config::ServerConfig;
use context::AppContext;
use error::VeilResult;
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> VeilResult<()> {
    print_banner();

    let config = ServerConfig::from_env()?;
    init_tracing(&config);

    let ctx = AppContext::new(config).await?;

    // Bring the published documents in line with the store before serving
    for refresh in ctx.config_sync.refresh_all().await {
        info!(
            "Published {} ({} clients) to {}",
            refresh.family,
            refresh.clients,
            refresh.path.display()
        );
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let handles = jobs::JobScheduler::new(ctx.clone(), shutdown_rx).start();

    server::serve(ctx, shutdown_signal()).await?;

    info!("Shutting down background jobs");
    if shutdown_tx.send(true).is_err() {
        warn!("Background jobs already stopped");
    }
    for handle in handles {
        if let Err(e) = handle.await {
            error!("Background job ended abnormally: {}", e);
        }
    }

    Ok(())
}

fn init_tracing(config: &ServerConfig) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        format!("veilgate={},tower_http=info", config.logging.level).into()
    });

    let registry = tracing_subscriber::registry().with(filter);
    if config.logging.format == "json" {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}

fn print_banner() {
    println!(
        r#"
 _    __     _ __              __
| |  / /__  (_) /___ _____ _/ /____
| | / / _ \/ / / __ `/ __ `/ __/ _ \
| |/ /  __/ / / /_/ / /_/ / /_/  __/
|___/\___/_/_/\__, /\__,_/\__/\___/
             /____/
        Proxy account provisioning v{}
        "#,
        env!("CARGO_PKG_VERSION")
    );
}
