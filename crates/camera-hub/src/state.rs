use crate::cache::{ArtifactCache, FrameCache};
use crate::daemon::DaemonControl;
use crate::media::MediaStore;
use crate::power::{MountManager, PowerControl};
use crate::remote::RemotePeerClient;
use crate::store::ConfigStore;
use crate::timelapse::TimelapseTracker;
use common::auth::{CredentialSource, Credentials};
use rand::RngCore;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::error;

/// Deployment-level settings, fixed at startup.
#[derive(Debug, Clone)]
pub struct Settings {
    /// Host reboot/shutdown actions are honored only when set.
    pub enable_reboot: bool,
    /// Keys of the main configuration whose change requires a host reboot.
    pub reboot_settings: Vec<String>,
    /// Grace period before a scheduled power action fires, letting the
    /// response reach the caller first.
    pub reboot_delay: Duration,
    /// Log files downloadable by name through the HTTP surface.
    pub log_files: HashMap<String, PathBuf>,
    pub remote_timeout: Duration,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            enable_reboot: false,
            reboot_settings: Vec::new(),
            reboot_delay: Duration::from_secs(2),
            log_files: HashMap::new(),
            remote_timeout: Duration::from_secs(10),
        }
    }
}

/// Registry of per-camera-id write locks. Config writes and listing-time
/// reconciliation serialize on the camera's lock; reads do not.
#[derive(Default, Clone)]
pub struct IdLocks {
    locks: Arc<Mutex<HashMap<u32, Arc<Mutex<()>>>>>,
}

impl IdLocks {
    pub async fn lock(&self, id: u32) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock().await;
            Arc::clone(locks.entry(id).or_default())
        };
        lock.lock_owned().await
    }
}

/// Shared application state, cheap to clone.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn ConfigStore>,
    pub daemon: Arc<dyn DaemonControl>,
    pub media: Arc<dyn MediaStore>,
    pub power: Arc<dyn PowerControl>,
    pub mounts: Option<Arc<dyn MountManager>>,
    pub peers: Arc<RemotePeerClient>,
    pub artifacts: Arc<ArtifactCache>,
    pub frames: Arc<FrameCache>,
    pub timelapse: Arc<TimelapseTracker>,
    pub locks: IdLocks,
    pub settings: Arc<Settings>,
}

#[async_trait::async_trait]
impl CredentialSource for AppState {
    async fn credentials(&self) -> Credentials {
        match self.store.get_main().await {
            Ok(main) => Credentials {
                admin_username: main.admin_username,
                admin_password: main.admin_password,
                normal_username: main.normal_username,
                normal_password: main.normal_password,
            },
            Err(err) => {
                error!(error = %format!("{:#}", err), "failed to load credentials");
                // unmatchable secrets: deny rather than fall open
                let mut raw = [0u8; 16];
                rand::thread_rng().fill_bytes(&mut raw);
                let nonce: String = raw.iter().map(|b| format!("{:02x}", b)).collect();
                Credentials {
                    admin_username: String::new(),
                    admin_password: nonce.clone(),
                    normal_username: String::new(),
                    normal_password: nonce,
                }
            }
        }
    }
}
