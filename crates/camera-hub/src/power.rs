use anyhow::{Context, Result};
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::info;

/// Host power control, invoked after a fixed delay from commit
/// finalization so the response can reach the caller first.
#[async_trait]
pub trait PowerControl: Send + Sync {
    async fn reboot(&self) -> Result<()>;
    async fn shutdown(&self) -> Result<()>;
}

/// Power control through configurable shell commands.
pub struct ShellPower {
    reboot_cmd: String,
    shutdown_cmd: String,
}

impl ShellPower {
    pub fn new(reboot_cmd: impl Into<String>, shutdown_cmd: impl Into<String>) -> Self {
        Self {
            reboot_cmd: reboot_cmd.into(),
            shutdown_cmd: shutdown_cmd.into(),
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
impl PowerControl for ShellPower {
    async fn reboot(&self) -> Result<()> {
        info!("rebooting host");
        self.run(&self.reboot_cmd).await
    }

    async fn shutdown(&self) -> Result<()> {
        info!("shutting down host");
        self.run(&self.shutdown_cmd).await
    }
}

/// Power control double recording which action was requested.
#[derive(Default)]
pub struct MockPower {
    rebooted: AtomicBool,
    shut_down: AtomicBool,
}

impl MockPower {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn rebooted(&self) -> bool {
        self.rebooted.load(Ordering::SeqCst)
    }

    pub fn shut_down(&self) -> bool {
        self.shut_down.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PowerControl for MockPower {
    async fn reboot(&self) -> Result<()> {
        self.rebooted.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn shutdown(&self) -> Result<()> {
        self.shut_down.store(true, Ordering::SeqCst);
        Ok(())
    }
}

/// Network-share mount manager. Consulted between daemon stop and start
/// when configuration changes require a restart; it reports whether the
/// daemon should be started again after remounting.
#[async_trait]
pub trait MountManager: Send + Sync {
    async fn update_mounts(&self) -> Result<MountUpdate>;
}

#[derive(Debug, Clone, Copy)]
pub struct MountUpdate {
    pub start_daemon: bool,
}

/// Mount manager double with a fixed answer.
pub struct MockMounts {
    pub start_daemon: bool,
}

#[async_trait]
impl MountManager for MockMounts {
    async fn update_mounts(&self) -> Result<MountUpdate> {
        Ok(MountUpdate {
            start_daemon: self.start_daemon,
        })
    }
}
