use crate::types::{CameraRecord, MediaEntry, MediaKind};
use anyhow::Result;
use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use chrono::Utc;
use std::collections::HashMap;
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

/// Media file access for local cameras. Listing returns `None` when the
/// camera has no media root at all, as opposed to an empty listing.
#[async_trait]
pub trait MediaStore: Send + Sync {
    async fn list(
        &self,
        camera: &CameraRecord,
        kind: MediaKind,
        prefix: Option<&str>,
    ) -> Result<Option<Vec<MediaEntry>>>;

    async fn content(
        &self,
        camera: &CameraRecord,
        kind: MediaKind,
        filename: &str,
    ) -> Result<Option<Bytes>>;

    async fn preview(
        &self,
        camera: &CameraRecord,
        kind: MediaKind,
        filename: &str,
        width: Option<u32>,
    ) -> Result<Option<Bytes>>;

    async fn delete(&self, camera: &CameraRecord, kind: MediaKind, filename: &str) -> Result<()>;

    async fn delete_group(&self, camera: &CameraRecord, kind: MediaKind, group: &str)
        -> Result<()>;

    async fn current_picture(
        &self,
        camera: &CameraRecord,
        width: Option<u32>,
        height: Option<u32>,
    ) -> Result<Option<Bytes>>;

    /// Bundle every file of `group` into one downloadable archive.
    async fn build_archive(
        &self,
        camera: &CameraRecord,
        kind: MediaKind,
        group: &str,
    ) -> Result<Bytes>;

    /// Render a time-lapse movie from the pictures of `group`, reporting
    /// progress (0..=100) through the shared counter as it goes.
    async fn build_timelapse(
        &self,
        camera: &CameraRecord,
        framerate: u32,
        interval: u32,
        group: &str,
        progress: Arc<AtomicI32>,
    ) -> Result<Bytes>;
}

#[derive(Clone)]
struct StoredFile {
    path: String,
    data: Bytes,
    timestamp: chrono::DateTime<Utc>,
}

#[derive(Default)]
struct MediaState {
    files: HashMap<(u32, MediaKind), Vec<StoredFile>>,
    previews: HashMap<(u32, MediaKind, String), Bytes>,
    current: HashMap<u32, Bytes>,
}

/// In-memory media store double. Groups are the directory component of a
/// file path, matching the daemon's date-folder layout.
pub struct MemoryMediaStore {
    state: RwLock<MediaState>,
    timelapse_step: Duration,
}

fn group_of(path: &str) -> &str {
    path.rsplit_once('/').map(|(dir, _)| dir).unwrap_or("")
}

impl MemoryMediaStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            state: RwLock::new(MediaState::default()),
            timelapse_step: Duration::from_millis(5),
        })
    }

    /// Slow the mock render down so tests can observe a running job.
    pub fn with_timelapse_step(step: Duration) -> Arc<Self> {
        Arc::new(Self {
            state: RwLock::new(MediaState::default()),
            timelapse_step: step,
        })
    }

    pub async fn add_file(&self, camera_id: u32, kind: MediaKind, path: &str, data: Bytes) {
        let mut state = self.state.write().await;
        state.files.entry((camera_id, kind)).or_default().push(StoredFile {
            path: path.to_string(),
            data,
            timestamp: Utc::now(),
        });
    }

    pub async fn add_preview(&self, camera_id: u32, kind: MediaKind, path: &str, data: Bytes) {
        let mut state = self.state.write().await;
        state
            .previews
            .insert((camera_id, kind, path.to_string()), data);
    }

    pub async fn set_current(&self, camera_id: u32, data: Bytes) {
        self.state.write().await.current.insert(camera_id, data);
    }
}

#[async_trait]
impl MediaStore for MemoryMediaStore {
    async fn list(
        &self,
        camera: &CameraRecord,
        kind: MediaKind,
        prefix: Option<&str>,
    ) -> Result<Option<Vec<MediaEntry>>> {
        let state = self.state.read().await;
        let Some(files) = state.files.get(&(camera.id, kind)) else {
            return Ok(None);
        };

        let entries = files
            .iter()
            .filter(|f| prefix.map_or(true, |p| group_of(&f.path) == p))
            .map(|f| MediaEntry {
                path: f.path.clone(),
                size: f.data.len() as u64,
                timestamp: f.timestamp,
            })
            .collect();
        Ok(Some(entries))
    }

    async fn content(
        &self,
        camera: &CameraRecord,
        kind: MediaKind,
        filename: &str,
    ) -> Result<Option<Bytes>> {
        let state = self.state.read().await;
        Ok(state
            .files
            .get(&(camera.id, kind))
            .and_then(|files| files.iter().find(|f| f.path == filename))
            .map(|f| f.data.clone()))
    }

    async fn preview(
        &self,
        camera: &CameraRecord,
        kind: MediaKind,
        filename: &str,
        _width: Option<u32>,
    ) -> Result<Option<Bytes>> {
        let state = self.state.read().await;
        Ok(state
            .previews
            .get(&(camera.id, kind, filename.to_string()))
            .cloned())
    }

    async fn delete(&self, camera: &CameraRecord, kind: MediaKind, filename: &str) -> Result<()> {
        let mut state = self.state.write().await;
        let Some(files) = state.files.get_mut(&(camera.id, kind)) else {
            anyhow::bail!("no media for camera {}", camera.id);
        };
        let before = files.len();
        files.retain(|f| f.path != filename);
        anyhow::ensure!(files.len() < before, "no such file: {}", filename);
        Ok(())
    }

    async fn delete_group(
        &self,
        camera: &CameraRecord,
        kind: MediaKind,
        group: &str,
    ) -> Result<()> {
        let mut state = self.state.write().await;
        if let Some(files) = state.files.get_mut(&(camera.id, kind)) {
            files.retain(|f| group_of(&f.path) != group);
        }
        Ok(())
    }

    async fn current_picture(
        &self,
        camera: &CameraRecord,
        _width: Option<u32>,
        _height: Option<u32>,
    ) -> Result<Option<Bytes>> {
        Ok(self.state.read().await.current.get(&camera.id).cloned())
    }

    async fn build_archive(
        &self,
        camera: &CameraRecord,
        kind: MediaKind,
        group: &str,
    ) -> Result<Bytes> {
        let state = self.state.read().await;
        let files = state
            .files
            .get(&(camera.id, kind))
            .map(Vec::as_slice)
            .unwrap_or_default();

        let mut out = BytesMut::new();
        for file in files.iter().filter(|f| group_of(&f.path) == group) {
            out.extend_from_slice(file.path.as_bytes());
            out.extend_from_slice(b"\n");
            out.extend_from_slice(&file.data);
        }
        anyhow::ensure!(!out.is_empty(), "no files in group {}", group);
        Ok(out.freeze())
    }

    async fn build_timelapse(
        &self,
        camera: &CameraRecord,
        _framerate: u32,
        _interval: u32,
        group: &str,
        progress: Arc<AtomicI32>,
    ) -> Result<Bytes> {
        for step in [0, 25, 50, 75] {
            progress.store(step, Ordering::SeqCst);
            tokio::time::sleep(self.timelapse_step).await;
        }

        let state = self.state.read().await;
        let files = state
            .files
            .get(&(camera.id, MediaKind::Picture))
            .map(Vec::as_slice)
            .unwrap_or_default();

        let mut out = BytesMut::new();
        for file in files.iter().filter(|f| group_of(&f.path) == group) {
            out.extend_from_slice(&file.data);
        }
        progress.store(100, Ordering::SeqCst);
        anyhow::ensure!(!out.is_empty(), "no pictures in group {}", group);
        Ok(out.freeze())
    }
}
