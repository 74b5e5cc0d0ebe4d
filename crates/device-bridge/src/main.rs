use anyhow::{Context, Result};
use device_bridge::{
    BridgeConfig, BridgeState, DeviceOrchestrator, DeviceRepository, DeviceStoreType,
    HttpIngestWorker, MemoryDeviceRepository, PgDeviceRepository, PlaybackTokenIssuer,
};
use std::sync::Arc;
use stream_probe::ProbeScheduler;
use telemetry::LogConfig;
use tokio::net::TcpListener;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    let _log_guard = telemetry::init_structured_logging(
        LogConfig::new("device-bridge").with_version(env!("CARGO_PKG_VERSION")),
    );

    let config = BridgeConfig::from_env()?;

    let repo: Arc<dyn DeviceRepository> = match config.store_type {
        DeviceStoreType::Postgres => {
            let url = config
                .database_url
                .as_deref()
                .context("DATABASE_URL required for Postgres store")?;
            info!("connecting to database");
            Arc::new(PgDeviceRepository::connect(url).await?)
        }
        DeviceStoreType::Memory => {
            warn!("using in-memory device store, devices are lost on restart");
            Arc::new(MemoryDeviceRepository::new())
        }
    };

    let worker = Arc::new(HttpIngestWorker::new(
        config.ingest_worker_url.clone(),
        config.ingest_timeout,
    )?);
    let orchestrator = Arc::new(DeviceOrchestrator::new(
        repo,
        worker,
        config.ingest_timeout,
    ));

    let tokens = Arc::new(PlaybackTokenIssuer::from_config(
        &config.tokens,
        config.media_base_url.clone(),
    )?);
    let scheduler = Arc::new(ProbeScheduler::from_config(&config.probe)?);
    info!(
        concurrency = scheduler.concurrency(),
        deep_probe_bin = %config.probe.deep_probe_bin,
        ingest_worker = %config.ingest_worker_url,
        "device-bridge configured"
    );

    let state = BridgeState::new(orchestrator.clone(), tokens, scheduler);
    let app = device_bridge::routes::router(state);

    let listener = TcpListener::bind(config.bind_addr).await?;
    info!(addr = %config.bind_addr, "device-bridge listening");

    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    orchestrator.shutdown().await;
    info!("device-bridge stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        if let Ok(mut sigterm) = signal(SignalKind::terminate()) {
            let _ = sigterm.recv().await;
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
