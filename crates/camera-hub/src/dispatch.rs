use crate::error::OpError;
use crate::state::AppState;
use std::sync::Arc;
use crate::types::{CameraKind, CameraRecord, MediaKind, TimelapseStatus};
use async_trait::async_trait;
use bytes::Bytes;
use common::validation::sanitize_filename;
use serde_json::{json, Map, Value};
use tokio::task::JoinSet;
use tracing::{info, warn};

/// Per-camera operation surface. One implementation per execution path;
/// callers never branch on the camera kind again after dispatch. Success
/// and error payloads look the same to callers regardless of path.
#[async_trait]
pub trait CameraOps: Send + Sync {
    fn record(&self) -> &CameraRecord;

    async fn get_config(&self, state: &AppState) -> Result<Map<String, Value>, OpError>;

    /// Apply a configuration payload. Returns whether the local daemon
    /// needs a restart for the change to take effect.
    async fn set_config(&self, state: &AppState, ui: &Map<String, Value>)
        -> Result<bool, OpError>;

    async fn list_media(
        &self,
        state: &AppState,
        kind: MediaKind,
        prefix: Option<&str>,
    ) -> Result<Value, OpError>;

    async fn media_content(
        &self,
        state: &AppState,
        kind: MediaKind,
        filename: &str,
    ) -> Result<Bytes, OpError>;

    /// `None` means "no preview available"; the caller substitutes the
    /// placeholder image.
    async fn media_preview(
        &self,
        state: &AppState,
        kind: MediaKind,
        filename: &str,
        width: Option<u32>,
    ) -> Result<Option<Bytes>, OpError>;

    async fn delete_media(
        &self,
        state: &AppState,
        kind: MediaKind,
        filename: &str,
    ) -> Result<(), OpError>;

    async fn delete_media_group(
        &self,
        state: &AppState,
        kind: MediaKind,
        group: &str,
    ) -> Result<(), OpError>;

    /// Live frame plus the camera's motion-detected flag.
    async fn current_picture(
        &self,
        state: &AppState,
        width: Option<u32>,
        height: Option<u32>,
    ) -> Result<(bool, Option<Bytes>), OpError>;

    /// First step of the two-step archive protocol: build the archive and
    /// return its retrieval key.
    async fn prepare_archive(
        &self,
        state: &AppState,
        kind: MediaKind,
        group: &str,
    ) -> Result<String, OpError>;

    /// Second step: fetch a prepared archive as
    /// `(content type, attachment name, data)`.
    async fn archive_content(
        &self,
        state: &AppState,
        kind: MediaKind,
        group: &str,
        key: &str,
    ) -> Result<(String, String, Bytes), OpError>;

    async fn timelapse_start(
        &self,
        state: &AppState,
        framerate: u32,
        interval: u32,
        group: &str,
    ) -> Result<TimelapseStatus, OpError>;

    async fn timelapse_check(
        &self,
        state: &AppState,
        group: &str,
    ) -> Result<TimelapseStatus, OpError>;

    async fn timelapse_content(
        &self,
        state: &AppState,
        group: &str,
        key: &str,
    ) -> Result<(String, String, Bytes), OpError>;
}

/// Resolve a record to its execution path. Total over every record shape;
/// unsupported records fail here, once, instead of inside each operation.
pub fn dispatch(record: CameraRecord) -> Result<Box<dyn CameraOps>, OpError> {
    match record.kind() {
        CameraKind::Local => Ok(Box::new(LocalCamera { record })),
        CameraKind::Remote => Ok(Box::new(RemoteCamera { record })),
        CameraKind::Unsupported => Err(OpError::Unsupported),
    }
}

fn archive_name(record: &CameraRecord, group: &str, extension: &str) -> String {
    format!(
        "{}_{}.{}",
        sanitize_filename(&record.name),
        sanitize_filename(group),
        extension
    )
}

pub struct LocalCamera {
    record: CameraRecord,
}

#[async_trait]
impl CameraOps for LocalCamera {
    fn record(&self) -> &CameraRecord {
        &self.record
    }

    async fn get_config(&self, _state: &AppState) -> Result<Map<String, Value>, OpError> {
        Ok(self.record.to_ui())
    }

    async fn set_config(
        &self,
        state: &AppState,
        ui: &Map<String, Value>,
    ) -> Result<bool, OpError> {
        let _guard = state.locks.lock(self.record.id).await;

        let mut record = state
            .store
            .get_camera(self.record.id)
            .await?
            .ok_or(OpError::NotFound)?;
        record.apply_ui(ui);
        state.store.set_camera(self.record.id, record).await?;

        info!(camera_id = self.record.id, "camera configuration updated");
        // the daemon re-reads every local camera config on restart, so any
        // change needs one, disabling included
        Ok(true)
    }

    async fn list_media(
        &self,
        state: &AppState,
        kind: MediaKind,
        prefix: Option<&str>,
    ) -> Result<Value, OpError> {
        let entries = state
            .media
            .list(&self.record, kind, prefix)
            .await?
            .ok_or(OpError::NotFound)?;
        Ok(json!({
            "camera_name": self.record.name,
            "entries": entries,
        }))
    }

    async fn media_content(
        &self,
        state: &AppState,
        kind: MediaKind,
        filename: &str,
    ) -> Result<Bytes, OpError> {
        state
            .media
            .content(&self.record, kind, filename)
            .await?
            .ok_or(OpError::NotFound)
    }

    async fn media_preview(
        &self,
        state: &AppState,
        kind: MediaKind,
        filename: &str,
        width: Option<u32>,
    ) -> Result<Option<Bytes>, OpError> {
        Ok(state
            .media
            .preview(&self.record, kind, filename, width)
            .await?)
    }

    async fn delete_media(
        &self,
        state: &AppState,
        kind: MediaKind,
        filename: &str,
    ) -> Result<(), OpError> {
        state
            .media
            .delete(&self.record, kind, filename)
            .await
            .map_err(|e| OpError::LocalIo(format!("{:#}", e)))
    }

    async fn delete_media_group(
        &self,
        state: &AppState,
        kind: MediaKind,
        group: &str,
    ) -> Result<(), OpError> {
        state
            .media
            .delete_group(&self.record, kind, group)
            .await
            .map_err(|e| OpError::LocalIo(format!("{:#}", e)))
    }

    async fn current_picture(
        &self,
        state: &AppState,
        width: Option<u32>,
        height: Option<u32>,
    ) -> Result<(bool, Option<Bytes>), OpError> {
        let motion = state.daemon.is_motion_detected(self.record.id).await;
        let frame = state
            .media
            .current_picture(&self.record, width, height)
            .await?;
        Ok((motion, frame))
    }

    async fn prepare_archive(
        &self,
        state: &AppState,
        kind: MediaKind,
        group: &str,
    ) -> Result<String, OpError> {
        let data = state
            .media
            .build_archive(&self.record, kind, group)
            .await
            .map_err(|e| OpError::LocalIo(format!("{:#}", e)))?;
        Ok(state.artifacts.put(data).await)
    }

    async fn archive_content(
        &self,
        state: &AppState,
        _kind: MediaKind,
        group: &str,
        key: &str,
    ) -> Result<(String, String, Bytes), OpError> {
        let data = state.artifacts.get(key).await.ok_or(OpError::NotFound)?;
        Ok((
            "application/zip".to_string(),
            archive_name(&self.record, group, "zip"),
            data,
        ))
    }

    async fn timelapse_start(
        &self,
        state: &AppState,
        framerate: u32,
        interval: u32,
        group: &str,
    ) -> Result<TimelapseStatus, OpError> {
        Ok(state
            .timelapse
            .start(
                &self.record,
                Arc::clone(&state.media),
                framerate,
                interval,
                group,
            )
            .await)
    }

    async fn timelapse_check(
        &self,
        state: &AppState,
        _group: &str,
    ) -> Result<TimelapseStatus, OpError> {
        state.timelapse.check(self.record.id, &state.artifacts).await
    }

    async fn timelapse_content(
        &self,
        state: &AppState,
        group: &str,
        key: &str,
    ) -> Result<(String, String, Bytes), OpError> {
        let data = state.artifacts.get(key).await.ok_or(OpError::NotFound)?;
        Ok((
            MediaKind::Movie.content_type().to_string(),
            archive_name(&self.record, group, "mpg"),
            data,
        ))
    }
}

pub struct RemoteCamera {
    record: CameraRecord,
}

impl RemoteCamera {
    /// Merge the peer's configuration with the local mirror. Identity comes
    /// from the local record; `enabled` is the conjunction of both sides,
    /// so disabling either side disables the merged view.
    fn merged_config(&self, mut remote_ui: Map<String, Value>) -> Map<String, Value> {
        let remote_enabled = remote_ui
            .get("enabled")
            .and_then(Value::as_bool)
            .unwrap_or(true);

        remote_ui.insert("id".into(), Value::from(self.record.id));
        remote_ui.insert(
            "enabled".into(),
            Value::from(self.record.enabled && remote_enabled),
        );
        if let Some(host) = &self.record.host {
            remote_ui.insert("host".into(), Value::from(host.clone()));
        }
        if let Some(port) = self.record.port {
            remote_ui.insert("port".into(), Value::from(port));
        }
        if let Some(remote_id) = self.record.remote_camera_id {
            remote_ui.insert("remote_camera_id".into(), Value::from(remote_id));
        }
        remote_ui.remove("password");
        remote_ui
    }
}

#[async_trait]
impl CameraOps for RemoteCamera {
    fn record(&self) -> &CameraRecord {
        &self.record
    }

    async fn get_config(&self, state: &AppState) -> Result<Map<String, Value>, OpError> {
        let remote_ui = state.peers.get_config(&self.record).await?;
        Ok(self.merged_config(remote_ui))
    }

    async fn set_config(
        &self,
        state: &AppState,
        ui: &Map<String, Value>,
    ) -> Result<bool, OpError> {
        // The enabled flag is mirrored locally and never pushed as a
        // disable: a peer stays running for its other clients.
        {
            let _guard = state.locks.lock(self.record.id).await;
            let mut record = state
                .store
                .get_camera(self.record.id)
                .await?
                .ok_or(OpError::NotFound)?;
            if let Some(enabled) = ui.get("enabled").and_then(Value::as_bool) {
                record.enabled = enabled;
            }
            state.store.set_camera(self.record.id, record).await?;
        }

        let pushes_more_than_enabled = ui.keys().any(|k| k != "enabled" && k != "id");
        if pushes_more_than_enabled {
            let mut pushed = ui.clone();
            pushed.remove("id");
            pushed.insert("enabled".into(), Value::from(true));
            state.peers.set_config(&self.record, &pushed).await?;
        }

        Ok(false)
    }

    async fn list_media(
        &self,
        state: &AppState,
        kind: MediaKind,
        prefix: Option<&str>,
    ) -> Result<Value, OpError> {
        state.peers.list_media(&self.record, kind, prefix).await
    }

    async fn media_content(
        &self,
        state: &AppState,
        kind: MediaKind,
        filename: &str,
    ) -> Result<Bytes, OpError> {
        state.peers.media_content(&self.record, kind, filename).await
    }

    async fn media_preview(
        &self,
        state: &AppState,
        kind: MediaKind,
        filename: &str,
        width: Option<u32>,
    ) -> Result<Option<Bytes>, OpError> {
        state
            .peers
            .media_preview(&self.record, kind, filename, width)
            .await
    }

    async fn delete_media(
        &self,
        state: &AppState,
        kind: MediaKind,
        filename: &str,
    ) -> Result<(), OpError> {
        state.peers.delete_media(&self.record, kind, filename).await
    }

    async fn delete_media_group(
        &self,
        state: &AppState,
        kind: MediaKind,
        group: &str,
    ) -> Result<(), OpError> {
        state
            .peers
            .delete_media_group(&self.record, kind, group)
            .await
    }

    async fn current_picture(
        &self,
        state: &AppState,
        width: Option<u32>,
        height: Option<u32>,
    ) -> Result<(bool, Option<Bytes>), OpError> {
        state.peers.current_picture(&self.record, width, height).await
    }

    async fn prepare_archive(
        &self,
        state: &AppState,
        kind: MediaKind,
        group: &str,
    ) -> Result<String, OpError> {
        state.peers.prepare_archive(&self.record, kind, group).await
    }

    async fn archive_content(
        &self,
        state: &AppState,
        kind: MediaKind,
        group: &str,
        key: &str,
    ) -> Result<(String, String, Bytes), OpError> {
        let (content_type, filename, data) = state
            .peers
            .archive_content(&self.record, kind, group, key)
            .await?;
        let filename = filename.unwrap_or_else(|| archive_name(&self.record, group, "zip"));
        Ok((content_type, filename, data))
    }

    async fn timelapse_start(
        &self,
        state: &AppState,
        framerate: u32,
        interval: u32,
        group: &str,
    ) -> Result<TimelapseStatus, OpError> {
        state
            .peers
            .timelapse_start(&self.record, framerate, interval, group)
            .await
    }

    async fn timelapse_check(
        &self,
        state: &AppState,
        group: &str,
    ) -> Result<TimelapseStatus, OpError> {
        state.peers.timelapse_check(&self.record, group).await
    }

    async fn timelapse_content(
        &self,
        state: &AppState,
        group: &str,
        key: &str,
    ) -> Result<(String, String, Bytes), OpError> {
        let (content_type, filename, data) = state
            .peers
            .timelapse_content(&self.record, group, key)
            .await?;
        let filename = filename.unwrap_or_else(|| archive_name(&self.record, group, "mpg"));
        Ok((content_type, filename, data))
    }
}

/// Placeholder listing entry for an unreachable peer.
fn unreachable_entry(record: &CameraRecord) -> Map<String, Value> {
    let mut entry = Map::new();
    entry.insert("id".into(), Value::from(record.id));
    entry.insert(
        "name".into(),
        Value::from(format!("<{}>", record.peer_url())),
    );
    entry.insert("enabled".into(), Value::from(false));
    entry.insert("framerate".into(), Value::from(1));
    entry.insert("streaming_framerate".into(), Value::from(1));
    entry
}

/// Build the merged camera listing, fetching every remote camera's
/// configuration concurrently and joining explicitly.
///
/// Reconciliation is asymmetric: a peer reporting its camera disabled gets
/// the local mirror disabled too, while a locally disabled mirror merely
/// suppresses contact with the peer. The peer is never written to.
pub async fn merged_camera_list(state: &AppState) -> Result<Vec<Map<String, Value>>, OpError> {
    let ids = state.store.list_camera_ids().await?;

    let mut tasks: JoinSet<(u32, Map<String, Value>)> = JoinSet::new();
    let mut entries: Vec<(u32, Map<String, Value>)> = Vec::new();

    for id in ids {
        let Some(record) = state.store.get_camera(id).await? else {
            continue;
        };

        match record.kind() {
            CameraKind::Local | CameraKind::Unsupported => {
                entries.push((id, record.to_ui()));
            }
            CameraKind::Remote if !record.enabled => {
                let mut entry = Map::new();
                entry.insert("id".into(), Value::from(record.id));
                entry.insert("name".into(), Value::from(record.name.clone()));
                entry.insert("enabled".into(), Value::from(false));
                entries.push((id, entry));
            }
            CameraKind::Remote => {
                let state = state.clone();
                tasks.spawn(async move {
                    let camera = RemoteCamera {
                        record: record.clone(),
                    };
                    match camera.get_config(&state).await {
                        Ok(merged) => {
                            let remote_enabled = merged
                                .get("enabled")
                                .and_then(Value::as_bool)
                                .unwrap_or(true);
                            if !remote_enabled {
                                reconcile_disabled(&state, record.id).await;
                            }
                            (record.id, merged)
                        }
                        Err(err) => {
                            warn!(
                                camera_id = record.id,
                                error = %err,
                                "peer unreachable, listing placeholder"
                            );
                            (record.id, unreachable_entry(&record))
                        }
                    }
                });
            }
        }
    }

    while let Some(joined) = tasks.join_next().await {
        let (id, entry) = joined.map_err(anyhow::Error::from)?;
        entries.push((id, entry));
    }

    entries.sort_by_key(|(id, _)| *id);
    Ok(entries.into_iter().map(|(_, entry)| entry).collect())
}

/// Mirror a peer-side disable into the local record.
async fn reconcile_disabled(state: &AppState, camera_id: u32) {
    let _guard = state.locks.lock(camera_id).await;
    let record = match state.store.get_camera(camera_id).await {
        Ok(Some(record)) => record,
        Ok(None) => return,
        Err(err) => {
            warn!(camera_id, error = %format!("{:#}", err), "reconciliation read failed");
            return;
        }
    };
    if !record.enabled {
        return;
    }

    let mut record = record;
    record.enabled = false;
    info!(camera_id, "peer reports camera disabled, mirroring locally");
    if let Err(err) = state.store.set_camera(camera_id, record).await {
        warn!(camera_id, error = %format!("{:#}", err), "reconciliation write failed");
    }
}
