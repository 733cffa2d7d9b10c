use crate::types::{CameraRecord, ImportOutcome, MainConfig};
use anyhow::{Context, Result};
use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use tokio::sync::RwLock;
use tracing::info;

/// Persisted configuration, owned outside this core. The on-disk format is
/// the store's concern; the core only reads records, classifies them and
/// writes back the `enabled` flag and kind-specific fields.
#[async_trait]
pub trait ConfigStore: Send + Sync {
    async fn get_main(&self) -> Result<MainConfig>;
    async fn set_main(&self, main: MainConfig) -> Result<()>;

    async fn list_camera_ids(&self) -> Result<Vec<u32>>;
    async fn get_camera(&self, id: u32) -> Result<Option<CameraRecord>>;
    async fn set_camera(&self, id: u32, record: CameraRecord) -> Result<()>;
    async fn add_camera(&self, details: Value) -> Result<CameraRecord>;
    async fn remove_camera(&self, id: u32) -> Result<Option<CameraRecord>>;

    async fn export(&self) -> Result<Bytes>;
    async fn import(&self, data: Bytes) -> Result<ImportOutcome>;
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct ConfigState {
    main: MainConfig,
    cameras: BTreeMap<u32, CameraRecord>,
}

/// In-memory configuration store. Camera ids are assigned monotonically and
/// never reused within the store's lifetime.
pub struct MemoryConfigStore {
    inner: RwLock<ConfigState>,
}

impl MemoryConfigStore {
    pub fn new(main: MainConfig) -> Self {
        Self {
            inner: RwLock::new(ConfigState {
                main,
                cameras: BTreeMap::new(),
            }),
        }
    }
}

impl Default for MemoryConfigStore {
    fn default() -> Self {
        Self::new(MainConfig {
            enabled: true,
            ..MainConfig::default()
        })
    }
}

#[async_trait]
impl ConfigStore for MemoryConfigStore {
    async fn get_main(&self) -> Result<MainConfig> {
        Ok(self.inner.read().await.main.clone())
    }

    async fn set_main(&self, main: MainConfig) -> Result<()> {
        self.inner.write().await.main = main;
        Ok(())
    }

    async fn list_camera_ids(&self) -> Result<Vec<u32>> {
        Ok(self.inner.read().await.cameras.keys().copied().collect())
    }

    async fn get_camera(&self, id: u32) -> Result<Option<CameraRecord>> {
        Ok(self.inner.read().await.cameras.get(&id).cloned())
    }

    async fn set_camera(&self, id: u32, record: CameraRecord) -> Result<()> {
        let mut state = self.inner.write().await;
        anyhow::ensure!(record.id == id, "record id mismatch");
        state.cameras.insert(id, record);
        Ok(())
    }

    async fn add_camera(&self, details: Value) -> Result<CameraRecord> {
        let Value::Object(mut map) = details else {
            anyhow::bail!("camera details must be an object");
        };

        let mut state = self.inner.write().await;
        let id = state.cameras.keys().max().copied().unwrap_or(0) + 1;
        map.insert("id".into(), Value::from(id));

        let mut record: CameraRecord =
            serde_json::from_value(Value::Object(map)).context("invalid camera details")?;
        if record.name.is_empty() {
            record.name = format!("Camera{}", id);
        }

        info!(camera_id = id, name = %record.name, "camera added");
        state.cameras.insert(id, record.clone());
        Ok(record)
    }

    async fn remove_camera(&self, id: u32) -> Result<Option<CameraRecord>> {
        let removed = self.inner.write().await.cameras.remove(&id);
        if removed.is_some() {
            info!(camera_id = id, "camera removed");
        }
        Ok(removed)
    }

    async fn export(&self) -> Result<Bytes> {
        let state = self.inner.read().await;
        let data = serde_json::to_vec_pretty(&*state).context("failed to serialize config")?;
        Ok(Bytes::from(data))
    }

    async fn import(&self, data: Bytes) -> Result<ImportOutcome> {
        let restored: ConfigState =
            serde_json::from_slice(&data).context("invalid configuration backup")?;

        let mut state = self.inner.write().await;
        let reboot = state.main.admin_password != restored.main.admin_password;
        *state = restored;

        info!(reboot, "configuration restored from backup");
        Ok(ImportOutcome { reboot })
    }
}
