use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use api_rest::{AppState, router};
use ssv_core::queue::{self, TaskHandler};
use ssv_core::{ErrorCatalog, SubmissionService, dispatch, open_store, resolve_config};

/// Main entry point for the SSV service
///
/// Resolves the configuration from the environment, starts the validation worker pool and serves
/// the REST API until Ctrl-C. Payloads left unvalidated by an earlier run are re-enqueued at
/// startup. On shutdown, in-flight polls are cancelled, and both their payloads and any still
/// queued are completed with an internal processing error.
///
/// # Environment Variables
/// - `SSV_REST_ADDR`: REST server address (default: "0.0.0.0:3000")
/// - `SSV_*`: core configuration, see `ssv_core::config`
///
/// # Returns
/// * `Ok(())` - If the server ran and shut down cleanly
/// * `Err(anyhow::Error)` - If configuration, startup or serving fails
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::from_default_env().add_directive("ssv=info".parse()?))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let rest_addr = std::env::var("SSV_REST_ADDR").unwrap_or_else(|_| "0.0.0.0:3000".into());

    let cfg = Arc::new(resolve_config(|name| std::env::var(name).ok())?);
    let store = open_store(&cfg)?;
    let backend = dispatch::backend_for(&cfg)?;
    tracing::info!(
        "++ Validation backend: {}, data in {}",
        backend.name(),
        cfg.data_dir().display()
    );

    let (handle, pending) = queue::channel();
    let service = Arc::new(SubmissionService::new(
        cfg.clone(),
        store,
        Arc::new(ErrorCatalog::seeded()),
        backend,
        handle,
    )?);

    let cancel = CancellationToken::new();
    let handler: Arc<dyn TaskHandler> = service.clone();
    let pool = pending.spawn_workers(handler, cfg.workers(), cfg.max_attempts(), cancel.clone());
    let recovered = service.recover_pending()?;
    tracing::info!("++ Recovered {} unfinished payload(s)", recovered.len());

    tracing::info!("++ Starting SSV REST on {}", rest_addr);
    let listener = tokio::net::TcpListener::bind(&rest_addr).await?;
    let served = axum::serve(listener, router(AppState { service }))
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!("Failed to listen for shutdown signal: {:?}", e);
            }
            tracing::info!("-- Shutting down");
        })
        .await;

    pool.shutdown().await;
    served?;

    Ok(())
}
