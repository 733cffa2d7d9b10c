use anyhow::{Context, Result};
use camera_hub::{
    AppState, ArtifactCache, FrameCache, IdLocks, MemoryConfigStore, MemoryMediaStore,
    RemotePeerClient, Settings, ShellDaemon, ShellPower, TimelapseTracker,
};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::{fmt, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt().with_env_filter(filter).init();

    let bind_addr: std::net::SocketAddr = std::env::var("CAMERA_HUB_ADDR")
        .unwrap_or_else(|_| "127.0.0.1:8765".to_string())
        .parse()
        .context("invalid bind address")?;

    let enable_reboot = std::env::var("ENABLE_REBOOT")
        .map(|v| v == "true" || v == "1")
        .unwrap_or(false);

    let reboot_settings: Vec<String> = std::env::var("REBOOT_SETTINGS")
        .map(|v| v.split(',').map(str::to_string).collect())
        .unwrap_or_default();

    let remote_timeout_secs: u64 = std::env::var("REMOTE_TIMEOUT_SECS")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(10);

    // LOG_FILES is a comma-separated list of name=path pairs
    let log_files: HashMap<String, PathBuf> = std::env::var("LOG_FILES")
        .map(|v| {
            v.split(',')
                .filter_map(|pair| {
                    let (name, path) = pair.split_once('=')?;
                    Some((name.to_string(), PathBuf::from(path)))
                })
                .collect()
        })
        .unwrap_or_default();

    let daemon_stop_cmd =
        std::env::var("DAEMON_STOP_CMD").unwrap_or_else(|_| "systemctl stop motion".to_string());
    let daemon_start_cmd =
        std::env::var("DAEMON_START_CMD").unwrap_or_else(|_| "systemctl start motion".to_string());
    let reboot_cmd = std::env::var("REBOOT_CMD").unwrap_or_else(|_| "reboot".to_string());
    let shutdown_cmd = std::env::var("SHUTDOWN_CMD").unwrap_or_else(|_| "poweroff".to_string());

    let settings = Settings {
        enable_reboot,
        reboot_settings,
        reboot_delay: Duration::from_secs(2),
        log_files,
        remote_timeout: Duration::from_secs(remote_timeout_secs),
    };

    let peers = RemotePeerClient::new(settings.remote_timeout)
        .context("failed to build peer HTTP client")?;

    let state = AppState {
        store: Arc::new(MemoryConfigStore::default()),
        daemon: Arc::new(ShellDaemon::new(daemon_stop_cmd, daemon_start_cmd)),
        media: MemoryMediaStore::new(),
        power: Arc::new(ShellPower::new(reboot_cmd, shutdown_cmd)),
        mounts: None,
        peers: Arc::new(peers),
        artifacts: Arc::new(ArtifactCache::new(64)),
        frames: Arc::new(FrameCache::new(256)),
        timelapse: Arc::new(TimelapseTracker::new()),
        locks: IdLocks::default(),
        settings: Arc::new(settings),
    };

    let app = camera_hub::build_router(state);

    let listener = TcpListener::bind(bind_addr).await?;
    info!(addr = %bind_addr, "camera-hub listening");

    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

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
