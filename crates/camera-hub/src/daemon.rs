use anyhow::{Context, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::info;

/// Control surface of the local motion-detection daemon. Process lifecycle
/// details live behind this boundary; the core only asks for stop/start
/// around configuration changes and reads per-camera motion state.
#[async_trait]
pub trait DaemonControl: Send + Sync {
    async fn stop(&self) -> Result<()>;
    async fn start(&self) -> Result<()>;
    async fn is_motion_detected(&self, camera_id: u32) -> bool;
    async fn set_motion_detected(&self, camera_id: u32, detected: bool);
}

/// Daemon driven through configurable shell commands.
pub struct ShellDaemon {
    stop_cmd: String,
    start_cmd: String,
    motion: RwLock<HashMap<u32, bool>>,
}

impl ShellDaemon {
    pub fn new(stop_cmd: impl Into<String>, start_cmd: impl Into<String>) -> Self {
        Self {
            stop_cmd: stop_cmd.into(),
            start_cmd: start_cmd.into(),
            motion: RwLock::new(HashMap::new()),
        }
    }

    async fn run(&self, cmd: &str) -> Result<()> {
        let status = tokio::process::Command::new("sh")
            .arg("-c")
            .arg(cmd)
            .status()
            .await
            .with_context(|| format!("failed to spawn `{}`", cmd))?;
        anyhow::ensure!(status.success(), "`{}` exited with {}", cmd, status);
        Ok(())
    }
}

#[async_trait]
impl DaemonControl for ShellDaemon {
    async fn stop(&self) -> Result<()> {
        info!("stopping motion daemon");
        self.run(&self.stop_cmd).await
    }

    async fn start(&self) -> Result<()> {
        info!("starting motion daemon");
        self.run(&self.start_cmd).await
    }

    async fn is_motion_detected(&self, camera_id: u32) -> bool {
        self.motion
            .read()
            .await
            .get(&camera_id)
            .copied()
            .unwrap_or(false)
    }

    async fn set_motion_detected(&self, camera_id: u32, detected: bool) {
        self.motion.write().await.insert(camera_id, detected);
    }
}

/// In-memory daemon double counting lifecycle transitions.
#[derive(Default)]
pub struct MockDaemon {
    stops: AtomicUsize,
    starts: AtomicUsize,
    motion: RwLock<HashMap<u32, bool>>,
}

impl MockDaemon {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn stop_count(&self) -> usize {
        self.stops.load(Ordering::SeqCst)
    }

    pub fn start_count(&self) -> usize {
        self.starts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DaemonControl for MockDaemon {
    async fn stop(&self) -> Result<()> {
        self.stops.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn start(&self) -> Result<()> {
        self.starts.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn is_motion_detected(&self, camera_id: u32) -> bool {
        self.motion
            .read()
            .await
            .get(&camera_id)
            .copied()
            .unwrap_or(false)
    }

    async fn set_motion_detected(&self, camera_id: u32, detected: bool) {
        self.motion.write().await.insert(camera_id, detected);
    }
}
