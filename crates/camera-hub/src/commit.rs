use crate::dispatch::dispatch;
use crate::error::OpError;
use crate::state::AppState;
use crate::types::{CameraKind, CommitOutcome, MainConfig};
use serde_json::{Map, Value};
use tokio::task::JoinSet;
use tracing::{info, warn};

/// Apply a configuration commit: an optional `main` entry plus any number
/// of per-camera entries, keyed by camera id.
///
/// The main entry is processed to completion before any camera entry runs;
/// camera entries then run concurrently and are joined explicitly. One
/// finalization pass acts on the folded outcome. Sibling failures never
/// abort each other; the first error message is carried in the outcome.
pub async fn commit(
    state: &AppState,
    mut updates: Map<String, Value>,
) -> Result<CommitOutcome, OpError> {
    let mut outcome = CommitOutcome::default();

    if let Some(main_update) = updates.remove("main") {
        let Value::Object(main_ui) = main_update else {
            return Err(OpError::MalformedInput(
                "main configuration must be an object".into(),
            ));
        };
        let main_outcome = apply_main(state, &main_ui).await?;
        outcome.reload |= main_outcome.reload;
        outcome.restart |= main_outcome.restart;
        outcome.reboot |= main_outcome.reboot;
    }

    // validate every entry before spawning any, so one malformed entry
    // cannot tear down its already-running siblings
    let mut entries = Vec::new();
    for (key, value) in updates {
        let parsed = key.parse::<u32>().map_err(|_| ()).and_then(|id| match value {
            Value::Object(ui) => Ok((id, ui)),
            _ => Err(()),
        });
        match parsed {
            Ok(entry) => entries.push(entry),
            Err(()) => {
                warn!(key = %key, "malformed camera configuration entry");
                if outcome.error.is_none() {
                    outcome.error =
                        Some(format!("malformed configuration entry for camera: {}", key));
                }
            }
        }
    }

    let mut tasks: JoinSet<Result<bool, OpError>> = JoinSet::new();
    for (id, ui) in entries {
        let state = state.clone();
        tasks.spawn(async move {
            let record = state.store.get_camera(id).await?.ok_or(OpError::NotFound)?;
            let ops = dispatch(record)?;
            ops.set_config(&state, &ui).await
        });
    }

    while let Some(joined) = tasks.join_next().await {
        match joined.map_err(anyhow::Error::from)? {
            Ok(restart) => outcome.restart |= restart,
            Err(err) => {
                warn!(error = %err, "camera configuration update failed");
                if outcome.error.is_none() {
                    outcome.error = Some(err.to_string());
                }
            }
        }
    }

    finalize(state, outcome).await
}

struct MainOutcome {
    reload: bool,
    restart: bool,
    reboot: bool,
}

/// Fold a caller payload into the main configuration and persist it,
/// deriving the commit consequences from what actually changed.
async fn apply_main(state: &AppState, ui: &Map<String, Value>) -> Result<MainOutcome, OpError> {
    let old = state.store.get_main().await?;

    let mut merged = match serde_json::to_value(&old).map_err(anyhow::Error::from)? {
        Value::Object(map) => map,
        _ => Map::new(),
    };
    for (key, value) in ui {
        merged.insert(key.clone(), value.clone());
    }
    let new: MainConfig =
        serde_json::from_value(Value::Object(merged)).map_err(anyhow::Error::from)?;

    // admin credential change invalidates the caller's own session
    let reload = old.admin_pair() != new.admin_pair();

    let mut restart = false;
    if old.normal_pair() != new.normal_pair() {
        rederive_stream_auth(state, &new).await?;
        restart = true;
    }

    let mut reboot = old.admin_password != new.admin_password;
    for key in &state.settings.reboot_settings {
        if old.extra.get(key) != new.extra.get(key) {
            reboot = true;
        }
    }
    reboot &= state.settings.enable_reboot;

    state.store.set_main(new).await?;
    info!(reload, restart, reboot, "main configuration updated");

    Ok(MainOutcome {
        reload,
        restart,
        reboot,
    })
}

/// The normal credential doubles as the streaming credential of every
/// local camera; rewrite it into each record when it changes.
async fn rederive_stream_auth(state: &AppState, main: &MainConfig) -> Result<(), OpError> {
    for id in state.store.list_camera_ids().await? {
        let _guard = state.locks.lock(id).await;
        let Some(mut record) = state.store.get_camera(id).await? else {
            continue;
        };
        if record.kind() != CameraKind::Local {
            continue;
        }

        record.settings.insert(
            "stream_authentication".into(),
            Value::from(main.normal_pair()),
        );
        state.store.set_camera(id, record).await?;
    }
    Ok(())
}

/// Act once on the folded outcome. A pending reboot supersedes a daemon
/// restart; the power action is delayed so this response can be sent.
async fn finalize(state: &AppState, outcome: CommitOutcome) -> Result<CommitOutcome, OpError> {
    if outcome.reboot {
        schedule_reboot(state);
        return Ok(CommitOutcome {
            reload: false,
            restart: false,
            reboot: true,
            error: None,
        });
    }

    if outcome.restart {
        state.daemon.stop().await?;

        let mut start = true;
        if let Some(mounts) = &state.mounts {
            start = mounts.update_mounts().await?.start_daemon;
        }
        if start {
            state.daemon.start().await?;
        }
    }

    Ok(outcome)
}

/// Spawn a delayed host reboot.
pub fn schedule_reboot(state: &AppState) {
    let power = state.power.clone();
    let delay = state.settings.reboot_delay;
    info!(delay_secs = delay.as_secs(), "host reboot scheduled");
    tokio::spawn(async move {
        tokio::time::sleep(delay).await;
        if let Err(err) = power.reboot().await {
            warn!(error = %format!("{:#}", err), "host reboot failed");
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{ArtifactCache, FrameCache};
    use crate::daemon::MockDaemon;
    use crate::media::MemoryMediaStore;
    use crate::power::{MockMounts, MockPower};
    use crate::remote::RemotePeerClient;
    use crate::state::{IdLocks, Settings};
    use crate::store::{ConfigStore, MemoryConfigStore};
    use crate::timelapse::TimelapseTracker;
    use serde_json::json;
    use std::sync::Arc;
    use std::time::Duration;

    fn test_state(settings: Settings) -> (AppState, Arc<MockDaemon>, Arc<MockPower>) {
        let daemon = MockDaemon::new();
        let power = MockPower::new();
        let state = AppState {
            store: Arc::new(MemoryConfigStore::default()),
            daemon: daemon.clone(),
            media: MemoryMediaStore::new(),
            power: power.clone(),
            mounts: None,
            peers: Arc::new(
                RemotePeerClient::new(Duration::from_millis(250)).expect("client builds"),
            ),
            artifacts: Arc::new(ArtifactCache::new(16)),
            frames: Arc::new(FrameCache::new(16)),
            timelapse: Arc::new(TimelapseTracker::new()),
            locks: IdLocks::default(),
            settings: Arc::new(settings),
        };
        (state, daemon, power)
    }

    fn obj(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => unreachable!(),
        }
    }

    #[tokio::test]
    async fn local_camera_update_restarts_daemon() {
        let (state, daemon, _) = test_state(Settings::default());
        state
            .store
            .add_camera(json!({"device_uri": "/dev/video0"}))
            .await
            .unwrap();

        let outcome = commit(&state, obj(json!({"1": {"framerate": 10}})))
            .await
            .unwrap();

        assert!(outcome.restart);
        assert!(!outcome.reboot);
        assert_eq!(daemon.stop_count(), 1);
        assert_eq!(daemon.start_count(), 1);
    }

    #[tokio::test]
    async fn normal_credential_change_rederives_local_cameras() {
        let (state, daemon, _) = test_state(Settings::default());
        state
            .store
            .add_camera(json!({"device_uri": "/dev/video0"}))
            .await
            .unwrap();

        let outcome = commit(
            &state,
            obj(json!({"main": {"normal_username": "user", "normal_password": "pw"}})),
        )
        .await
        .unwrap();

        assert!(outcome.restart);
        assert!(!outcome.reload);
        assert_eq!(daemon.stop_count(), 1);

        let record = state.store.get_camera(1).await.unwrap().unwrap();
        assert_eq!(
            record.settings.get("stream_authentication"),
            Some(&json!("user:pw"))
        );
    }

    #[tokio::test]
    async fn admin_password_change_reboots_when_enabled() {
        let settings = Settings {
            enable_reboot: true,
            reboot_delay: Duration::from_millis(10),
            ..Settings::default()
        };
        let (state, daemon, power) = test_state(settings);

        let outcome = commit(&state, obj(json!({"main": {"admin_password": "new"}})))
            .await
            .unwrap();

        assert_eq!(
            outcome,
            CommitOutcome {
                reload: false,
                restart: false,
                reboot: true,
                error: None,
            }
        );
        // reboot supersedes restart
        assert_eq!(daemon.stop_count(), 0);

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(power.rebooted());
    }

    #[tokio::test]
    async fn admin_password_change_without_capability_reloads_only() {
        let (state, _, power) = test_state(Settings::default());

        let outcome = commit(&state, obj(json!({"main": {"admin_password": "new"}})))
            .await
            .unwrap();

        assert!(outcome.reload);
        assert!(!outcome.reboot);

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!power.rebooted());
    }

    #[tokio::test]
    async fn sibling_failure_does_not_abort_commit() {
        let (state, _, _) = test_state(Settings::default());
        state
            .store
            .add_camera(json!({"device_uri": "/dev/video0"}))
            .await
            .unwrap();

        let outcome = commit(
            &state,
            obj(json!({
                "1": {"framerate": 5},
                "99": {"framerate": 5},
            })),
        )
        .await
        .unwrap();

        assert!(outcome.restart, "valid sibling still applied");
        assert!(outcome.error.is_some());

        let record = state.store.get_camera(1).await.unwrap().unwrap();
        assert_eq!(record.settings.get("framerate"), Some(&json!(5)));
    }

    #[tokio::test]
    async fn disabling_local_camera_still_restarts_daemon() {
        let (state, daemon, _) = test_state(Settings::default());
        state
            .store
            .add_camera(json!({"device_uri": "/dev/video0"}))
            .await
            .unwrap();

        let outcome = commit(&state, obj(json!({"1": {"enabled": false}})))
            .await
            .unwrap();

        // the daemon must drop the disabled camera from its running config
        assert!(outcome.restart);
        assert_eq!(daemon.stop_count(), 1);
        assert_eq!(daemon.start_count(), 1);

        let record = state.store.get_camera(1).await.unwrap().unwrap();
        assert!(!record.enabled);
    }

    #[tokio::test]
    async fn malformed_entry_is_folded_without_aborting_siblings() {
        let (state, daemon, _) = test_state(Settings::default());
        state
            .store
            .add_camera(json!({"device_uri": "/dev/video0"}))
            .await
            .unwrap();

        let outcome = commit(
            &state,
            obj(json!({
                "1": {"framerate": 7},
                "bogus": {"framerate": 7},
                "2": "not an object",
            })),
        )
        .await
        .unwrap();

        assert!(outcome.restart, "valid sibling still applied");
        assert!(outcome.error.is_some());
        assert_eq!(daemon.stop_count(), 1);

        let record = state.store.get_camera(1).await.unwrap().unwrap();
        assert_eq!(record.settings.get("framerate"), Some(&json!(7)));
    }

    #[tokio::test]
    async fn mount_manager_may_suppress_daemon_start() {
        let (state, daemon, _) = test_state(Settings::default());
        let state = AppState {
            mounts: Some(Arc::new(MockMounts {
                start_daemon: false,
            })),
            ..state
        };
        state
            .store
            .add_camera(json!({"device_uri": "/dev/video0"}))
            .await
            .unwrap();

        commit(&state, obj(json!({"1": {"framerate": 2}})))
            .await
            .unwrap();

        assert_eq!(daemon.stop_count(), 1);
        assert_eq!(daemon.start_count(), 0);
    }
}
