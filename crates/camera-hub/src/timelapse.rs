use crate::cache::ArtifactCache;
use crate::error::OpError;
use crate::media::MediaStore;
use crate::types::{CameraRecord, TimelapseStatus};
use bytes::Bytes;
use std::collections::HashMap;
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, warn};

struct Job {
    progress: Arc<AtomicI32>,
    result: Arc<Mutex<Option<Result<Bytes, String>>>>,
}

/// Tracks at most one in-flight time-lapse render per camera.
///
/// A finished render is handed to the artifact cache exactly once, by the
/// first `check` that observes completion; subsequent checks report idle.
#[derive(Default)]
pub struct TimelapseTracker {
    jobs: Mutex<HashMap<u32, Job>>,
}

impl TimelapseTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a render unless one is already running for this camera, in
    /// which case the running job is left untouched and its current
    /// progress is returned.
    pub async fn start(
        &self,
        camera: &CameraRecord,
        media: Arc<dyn MediaStore>,
        framerate: u32,
        interval: u32,
        group: &str,
    ) -> TimelapseStatus {
        let mut jobs = self.jobs.lock().await;

        if let Some(job) = jobs.get(&camera.id) {
            let progress = job.progress.load(Ordering::SeqCst);
            if progress >= 0 {
                debug!(camera_id = camera.id, progress, "time-lapse already running");
                return TimelapseStatus::running(progress);
            }
        }

        let progress = Arc::new(AtomicI32::new(0));
        let result = Arc::new(Mutex::new(None));
        jobs.insert(
            camera.id,
            Job {
                progress: Arc::clone(&progress),
                result: Arc::clone(&result),
            },
        );

        let camera = camera.clone();
        let group = group.to_string();
        tokio::spawn(async move {
            let built = media
                .build_timelapse(&camera, framerate, interval, &group, Arc::clone(&progress))
                .await
                .map_err(|e| format!("{:#}", e));

            if let Err(message) = &built {
                warn!(camera_id = camera.id, error = %message, "time-lapse render failed");
            }

            // Result must be visible before progress flips to idle, so a
            // concurrent check never observes a completed job without it.
            *result.lock().await = Some(built);
            progress.store(-1, Ordering::SeqCst);
        });

        TimelapseStatus::idle()
    }

    /// Poll the camera's job. Observing completion moves the render into
    /// the artifact cache and reports its key; this hand-off is idempotent.
    pub async fn check(
        &self,
        camera_id: u32,
        artifacts: &ArtifactCache,
    ) -> Result<TimelapseStatus, OpError> {
        let mut jobs = self.jobs.lock().await;

        let Some(job) = jobs.get(&camera_id) else {
            return Ok(TimelapseStatus::idle());
        };

        let progress = job.progress.load(Ordering::SeqCst);
        if progress >= 0 {
            return Ok(TimelapseStatus::running(progress));
        }

        let taken = job.result.lock().await.take();
        match taken {
            Some(Ok(data)) => {
                jobs.remove(&camera_id);
                let key = artifacts.put(data).await;
                debug!(camera_id, key = %key, "time-lapse render cached");
                Ok(TimelapseStatus {
                    progress: -1,
                    key: Some(key),
                })
            }
            Some(Err(message)) => {
                jobs.remove(&camera_id);
                Err(OpError::LocalIo(message))
            }
            None => Ok(TimelapseStatus::idle()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::MemoryMediaStore;
    use serde_json::Map;
    use std::time::Duration;

    fn camera(id: u32) -> CameraRecord {
        CameraRecord {
            id,
            name: format!("camera{}", id),
            enabled: true,
            device_uri: Some("/dev/video0".into()),
            host: None,
            port: None,
            remote_camera_id: None,
            username: None,
            password: None,
            settings: Map::new(),
        }
    }

    #[tokio::test]
    async fn second_start_returns_running_progress() {
        let media = MemoryMediaStore::with_timelapse_step(Duration::from_millis(200));
        media
            .add_file(1, crate::types::MediaKind::Picture, "g/a.jpg", Bytes::from("a"))
            .await;

        let tracker = TimelapseTracker::new();
        let cam = camera(1);

        let first = tracker.start(&cam, media.clone(), 25, 60, "g").await;
        assert_eq!(first.progress, -1);

        tokio::time::sleep(Duration::from_millis(50)).await;
        let second = tracker.start(&cam, media.clone(), 25, 60, "g").await;
        assert!(second.progress >= 0, "expected running progress");
    }

    #[tokio::test]
    async fn completion_hands_off_to_cache_exactly_once() {
        let media = MemoryMediaStore::new();
        media
            .add_file(1, crate::types::MediaKind::Picture, "g/a.jpg", Bytes::from("frame"))
            .await;

        let tracker = TimelapseTracker::new();
        let artifacts = ArtifactCache::new(8);
        let cam = camera(1);

        tracker.start(&cam, media.clone(), 25, 60, "g").await;

        let key = loop {
            let status = tracker.check(1, &artifacts).await.unwrap();
            if let Some(key) = status.key {
                assert_eq!(status.progress, -1);
                break key;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        };

        assert_eq!(artifacts.get(&key).await, Some(Bytes::from("frame")));

        // hand-off already happened; re-checking reports idle
        let again = tracker.check(1, &artifacts).await.unwrap();
        assert_eq!(again, TimelapseStatus::idle());
    }

    #[tokio::test]
    async fn failed_render_surfaces_error_once() {
        let media = MemoryMediaStore::new(); // no pictures => render fails
        let tracker = TimelapseTracker::new();
        let artifacts = ArtifactCache::new(8);
        let cam = camera(2);

        tracker.start(&cam, media.clone(), 25, 60, "missing").await;

        let err = loop {
            match tracker.check(2, &artifacts).await {
                Ok(status) if status.progress >= 0 => {
                    tokio::time::sleep(Duration::from_millis(10)).await;
                }
                Ok(status) => {
                    assert_eq!(status, TimelapseStatus::idle());
                    tokio::time::sleep(Duration::from_millis(10)).await;
                }
                Err(err) => break err,
            }
        };
        assert!(matches!(err, OpError::LocalIo(_)));

        let after = tracker.check(2, &artifacts).await.unwrap();
        assert_eq!(after, TimelapseStatus::idle());
    }
}
