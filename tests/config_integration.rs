mod support;

use axum::http::StatusCode;
use bytes::Bytes;
use camera_hub::{ConfigStore, Settings};
use serde_json::{json, Value};
use std::time::Duration;
use support::{admin_get, admin_post, context, context_with, server};

fn body_bytes(value: &Value) -> Vec<u8> {
    serde_json::to_vec(value).unwrap()
}

#[tokio::test]
async fn add_get_set_camera_round_trip() {
    let ctx = context();
    let server = server(ctx.state);

    let body = body_bytes(&json!({"name": "gate", "device_uri": "/dev/video0"}));
    let response = server
        .post(&admin_post("/config/add", &body))
        .content_type("application/json")
        .bytes(Bytes::from(body.clone()))
        .await;
    assert_eq!(response.status_code(), StatusCode::OK);
    let added: Value = response.json();
    assert_eq!(added.get("id"), Some(&json!(1)));
    assert_eq!(added.get("name"), Some(&json!("gate")));

    // adding a local camera restarts the daemon
    assert_eq!(ctx.daemon.stop_count(), 1);
    assert_eq!(ctx.daemon.start_count(), 1);

    let update = body_bytes(&json!({"framerate": 15}));
    let response = server
        .post(&admin_post("/config/1/set", &update))
        .content_type("application/json")
        .bytes(Bytes::from(update))
        .await;
    let outcome: Value = response.json();
    assert_eq!(outcome.get("restart"), Some(&json!(true)));
    assert_eq!(outcome.get("reboot"), Some(&json!(false)));

    let response = server.get(&admin_get("/config/1/get")).await;
    let ui: Value = response.json();
    assert_eq!(ui.get("framerate"), Some(&json!(15)));
    assert!(ui.get("password").is_none());
}

#[tokio::test]
async fn removing_local_camera_restarts_daemon_remote_does_not() {
    let ctx = context();
    ctx.store
        .add_camera(json!({"device_uri": "/dev/video0"}))
        .await
        .unwrap();
    ctx.store
        .add_camera(json!({"host": "peer.lan", "port": 8765, "remote_camera_id": 1}))
        .await
        .unwrap();
    let server = server(ctx.state);

    let response = server.post(&admin_post("/config/2/rem", b"")).await;
    assert_eq!(response.status_code(), StatusCode::OK);
    assert_eq!(ctx.daemon.stop_count(), 0);

    let response = server.post(&admin_post("/config/1/rem", b"")).await;
    assert_eq!(response.status_code(), StatusCode::OK);
    assert_eq!(ctx.daemon.stop_count(), 1);
    assert_eq!(ctx.daemon.start_count(), 1);

    let response = server.post(&admin_post("/config/1/rem", b"")).await;
    assert_eq!(response.status_code(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn bulk_commit_processes_main_before_cameras() {
    let ctx = context();
    ctx.store
        .add_camera(json!({"device_uri": "/dev/video0"}))
        .await
        .unwrap();
    let server = server(ctx.state);

    // The camera payload also writes the derived streaming credential: if
    // main ran last, its re-derivation would overwrite the camera's value.
    let body = body_bytes(&json!({
        "main": {"normal_username": "viewer", "normal_password": "pw"},
        "1": {"stream_authentication": "custom"},
    }));
    let response = server
        .post(&admin_post("/config/0/set", &body))
        .content_type("application/json")
        .bytes(Bytes::from(body))
        .await;
    let outcome: Value = response.json();
    assert_eq!(outcome.get("restart"), Some(&json!(true)));

    let record = ctx.store.get_camera(1).await.unwrap().unwrap();
    assert_eq!(
        record.settings.get("stream_authentication"),
        Some(&json!("custom"))
    );

    let main = ctx.store.get_main().await.unwrap();
    assert_eq!(main.normal_username, "viewer");
}

#[tokio::test]
async fn bulk_commit_aggregates_sibling_failures() {
    let ctx = context();
    ctx.store
        .add_camera(json!({"device_uri": "/dev/video0"}))
        .await
        .unwrap();
    let server = server(ctx.state);

    let body = body_bytes(&json!({
        "1": {"framerate": 3},
        "42": {"framerate": 3},
    }));
    let response = server
        .post(&admin_post("/config/0/set", &body))
        .content_type("application/json")
        .bytes(Bytes::from(body))
        .await;
    let outcome: Value = response.json();

    assert!(outcome.get("error").and_then(Value::as_str).is_some());
    let record = ctx.store.get_camera(1).await.unwrap().unwrap();
    assert_eq!(record.settings.get("framerate"), Some(&json!(3)));
}

#[tokio::test]
async fn admin_password_change_schedules_reboot_when_enabled() {
    let settings = Settings {
        enable_reboot: true,
        reboot_delay: Duration::from_millis(20),
        ..Settings::default()
    };
    let ctx = context_with(settings);
    let server = server(ctx.state);

    let body = body_bytes(&json!({"admin_password": "rotated"}));
    let response = server
        .post(&admin_post("/config/main/set", &body))
        .content_type("application/json")
        .bytes(Bytes::from(body))
        .await;
    let outcome: Value = response.json();

    assert_eq!(outcome.get("reboot"), Some(&json!(true)));
    assert_eq!(outcome.get("reload"), Some(&json!(false)));

    tokio::time::sleep(Duration::from_millis(150)).await;
    assert!(ctx.power.rebooted());
}

#[tokio::test]
async fn admin_password_change_without_capability_reloads() {
    let ctx = context();
    let server = server(ctx.state);

    let body = body_bytes(&json!({"admin_password": "rotated"}));
    let response = server
        .post(&admin_post("/config/main/set", &body))
        .content_type("application/json")
        .bytes(Bytes::from(body))
        .await;
    let outcome: Value = response.json();

    assert_eq!(outcome.get("reboot"), Some(&json!(false)));
    assert_eq!(outcome.get("reload"), Some(&json!(true)));

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(!ctx.power.rebooted());
}

#[tokio::test]
async fn backup_and_restore_round_trip() {
    let ctx = context();
    ctx.store
        .add_camera(json!({"name": "gate", "device_uri": "/dev/video0"}))
        .await
        .unwrap();
    let server_a = server(ctx.state);

    let response = server_a.get(&admin_get("/config/backup")).await;
    assert_eq!(response.status_code(), StatusCode::OK);
    let disposition = response
        .headers()
        .get("content-disposition")
        .and_then(|v| v.to_str().ok())
        .unwrap()
        .to_string();
    assert!(disposition.contains("config_backup_"));
    let backup = response.as_bytes().to_vec();

    let other = context();
    let server_b = server(other.state);
    let response = server_b
        .post(&admin_post("/config/restore", &backup))
        .content_type("application/json")
        .bytes(Bytes::from(backup))
        .await;
    let body: Value = response.json();
    assert_eq!(body.get("ok"), Some(&json!(true)));

    let restored = other.store.get_camera(1).await.unwrap().unwrap();
    assert_eq!(restored.name, "gate");
}

#[tokio::test]
async fn restore_with_rotated_admin_password_reboots_when_enabled() {
    let ctx = context();
    let backup = ctx.store.export().await.unwrap();

    let settings = Settings {
        enable_reboot: true,
        reboot_delay: Duration::from_millis(20),
        ..Settings::default()
    };
    let other = context_with(settings);
    {
        // make the incoming admin password differ from the running one
        let mut main = other.store.get_main().await.unwrap();
        main.admin_password = "different".into();
        other.store.set_main(main).await.unwrap();
    }
    let server = server(other.state);

    let body = backup.to_vec();
    let path = support::signed("POST", "/config/restore", &body, support::ADMIN_USER, "different");
    let response = server
        .post(&path)
        .content_type("application/json")
        .bytes(Bytes::from(body))
        .await;
    let payload: Value = response.json();
    assert_eq!(payload.get("reboot"), Some(&json!(true)));

    tokio::time::sleep(Duration::from_millis(150)).await;
    assert!(other.power.rebooted());
}

#[tokio::test]
async fn named_log_files_are_downloadable() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("motion.log");
    std::fs::write(&path, b"log line\n").unwrap();

    let settings = Settings {
        log_files: std::collections::HashMap::from([("motion".to_string(), path)]),
        ..Settings::default()
    };
    let ctx = context_with(settings);
    let server = server(ctx.state);

    let response = server.get(&admin_get("/log/motion")).await;
    assert_eq!(response.status_code(), StatusCode::OK);
    assert_eq!(response.as_bytes().as_ref(), b"log line\n");
    let disposition = response
        .headers()
        .get("content-disposition")
        .and_then(|v| v.to_str().ok())
        .unwrap();
    assert!(disposition.contains("motion.log"));

    // only configured names are served
    let response = server.get(&admin_get("/log/secrets")).await;
    assert_eq!(response.status_code(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn power_actions_are_capability_gated_and_delayed() {
    let ctx = context();
    let server_disabled = server(ctx.state);
    let response = server_disabled.post(&admin_post("/power/reboot", b"")).await;
    assert_eq!(response.status_code(), StatusCode::NOT_IMPLEMENTED);

    let settings = Settings {
        enable_reboot: true,
        reboot_delay: Duration::from_millis(20),
        ..Settings::default()
    };
    let ctx = context_with(settings);
    let server = server(ctx.state);

    let response = server.post(&admin_post("/power/shutdown", b"")).await;
    assert_eq!(response.status_code(), StatusCode::OK);
    // the response returns before the action fires
    assert!(!ctx.power.shut_down());
    tokio::time::sleep(Duration::from_millis(150)).await;
    assert!(ctx.power.shut_down());

    let response = server.post(&admin_post("/power/melt", b"")).await;
    assert_eq!(response.status_code(), StatusCode::BAD_REQUEST);
}
