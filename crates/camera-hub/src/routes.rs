use crate::commit::{commit, schedule_reboot};
use crate::dispatch::{dispatch, merged_camera_list, CameraOps};
use crate::error::OpError;
use crate::state::AppState;
use crate::types::{CameraKind, MediaKind};
use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::{header, StatusCode},
    middleware,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use common::auth::{auth_middleware, authorize, ClientAuth, CredentialSource};
use common::validation::{pretty_attachment_name, sanitize_filename};
use serde::Deserialize;
use serde_json::{json, Map, Value};
use std::str::FromStr;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

/// Shown in place of a missing media preview.
const PLACEHOLDER_SVG: &str = r##"<svg xmlns="http://www.w3.org/2000/svg" width="96" height="54"><rect width="96" height="54" fill="#303030"/><circle cx="48" cy="27" r="12" fill="none" stroke="#808080" stroke-width="3"/><circle cx="48" cy="27" r="4" fill="#808080"/></svg>"##;

pub fn build_router(state: AppState) -> Router {
    let creds: Arc<dyn CredentialSource> = Arc::new(state.clone());

    Router::new()
        .route("/health", get(health))
        .route("/login", get(login))
        .route("/config/list", get(config_list))
        .route("/config/main/get", get(main_get))
        .route("/config/main/set", post(main_set))
        .route("/config/add", post(config_add))
        .route("/config/backup", get(config_backup))
        .route("/config/restore", post(config_restore))
        .route("/config/:id/get", get(config_get))
        .route("/config/:id/set", post(config_set))
        .route("/config/:id/rem", post(config_rem))
        .route("/config/:id/_relay_event", post(relay_event))
        .route("/picture/:id/current", get(current_picture))
        .route("/picture/:id/zipped/:group", get(zipped))
        .route("/picture/:id/timelapse/:group", get(timelapse))
        .route("/log/:name", get(log_file))
        .route("/power/:op", post(power_op))
        .route("/:kind/:id/list", get(media_list))
        .route("/:kind/:id/download/*filename", get(media_download))
        .route("/:kind/:id/preview/*filename", get(media_preview))
        .route("/:kind/:id/delete/*filename", post(media_delete))
        .route("/:kind/:id/delete_all/:group", post(media_delete_all))
        .fallback(fallback)
        .layer(middleware::from_fn_with_state(creds, auth_middleware))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn camera_ops(state: &AppState, id: u32) -> Result<Box<dyn CameraOps>, OpError> {
    let record = state.store.get_camera(id).await?.ok_or(OpError::NotFound)?;
    dispatch(record)
}

fn parse_kind(kind: &str) -> Result<MediaKind, Response> {
    MediaKind::from_str(kind).map_err(|_| OpError::NotFound.into_response())
}

fn fail(err: OpError) -> Response {
    err.into_response()
}

fn attachment(content_type: &str, filename: &str, data: Bytes) -> Response {
    (
        [
            (header::CONTENT_TYPE, content_type.to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename={};", filename),
            ),
        ],
        data,
    )
        .into_response()
}

fn expect_object(value: Value, what: &str) -> Result<Map<String, Value>, Response> {
    match value {
        Value::Object(map) => Ok(map),
        _ => Err(fail(OpError::MalformedInput(format!(
            "{} must be an object",
            what
        )))),
    }
}

async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

/// Exercises the authentication guard and nothing else; a client calls it
/// to validate credentials before doing real work.
async fn login(ClientAuth(ctx): ClientAuth) -> Result<Json<Value>, Response> {
    authorize(&ctx, false, true)?;
    Ok(Json(json!({})))
}

async fn fallback() -> Response {
    (StatusCode::NOT_FOUND, Json(json!({ "error": "not found" }))).into_response()
}

async fn config_list(
    State(state): State<AppState>,
    ClientAuth(ctx): ClientAuth,
) -> Result<Json<Value>, Response> {
    authorize(&ctx, false, true)?;
    let cameras = merged_camera_list(&state).await.map_err(fail)?;
    Ok(Json(json!({ "cameras": cameras })))
}

async fn main_get(
    State(state): State<AppState>,
    ClientAuth(ctx): ClientAuth,
) -> Result<Json<Value>, Response> {
    authorize(&ctx, true, true)?;
    let main = state
        .store
        .get_main()
        .await
        .map_err(|e| fail(e.into()))?;
    let value = serde_json::to_value(&main).map_err(|e| fail(anyhow::Error::from(e).into()))?;
    Ok(Json(value))
}

async fn main_set(
    State(state): State<AppState>,
    ClientAuth(ctx): ClientAuth,
    Json(body): Json<Value>,
) -> Result<Json<Value>, Response> {
    authorize(&ctx, true, true)?;
    let main_ui = expect_object(body, "main configuration")?;

    let mut updates = Map::new();
    updates.insert("main".into(), Value::Object(main_ui));
    let outcome = commit(&state, updates).await.map_err(fail)?;
    Ok(Json(serde_json::to_value(&outcome).unwrap_or_default()))
}

async fn config_get(
    State(state): State<AppState>,
    ClientAuth(ctx): ClientAuth,
    Path(id): Path<u32>,
) -> Result<Json<Value>, Response> {
    authorize(&ctx, true, true)?;
    let ops = camera_ops(&state, id).await.map_err(fail)?;
    let ui = ops.get_config(&state).await.map_err(fail)?;
    Ok(Json(Value::Object(ui)))
}

/// Single-camera update, or the bulk form when `id` is 0: the body is then
/// a `{"main" | camera id -> payload}` map committed as one unit.
async fn config_set(
    State(state): State<AppState>,
    ClientAuth(ctx): ClientAuth,
    Path(id): Path<u32>,
    Json(body): Json<Value>,
) -> Result<Json<Value>, Response> {
    authorize(&ctx, true, true)?;

    let updates = if id == 0 {
        expect_object(body, "bulk configuration")?
    } else {
        let ui = expect_object(body, "camera configuration")?;
        let mut updates = Map::new();
        updates.insert(id.to_string(), Value::Object(ui));
        updates
    };

    let outcome = commit(&state, updates).await.map_err(fail)?;
    Ok(Json(serde_json::to_value(&outcome).unwrap_or_default()))
}

async fn config_add(
    State(state): State<AppState>,
    ClientAuth(ctx): ClientAuth,
    Json(body): Json<Value>,
) -> Result<Json<Value>, Response> {
    authorize(&ctx, true, true)?;

    let record = state
        .store
        .add_camera(body)
        .await
        .map_err(|e| fail(OpError::MalformedInput(format!("{:#}", e))))?;

    if record.kind() == CameraKind::Local {
        state.daemon.stop().await.map_err(|e| fail(e.into()))?;
        state.daemon.start().await.map_err(|e| fail(e.into()))?;
    }

    Ok(Json(Value::Object(record.to_ui())))
}

async fn config_rem(
    State(state): State<AppState>,
    ClientAuth(ctx): ClientAuth,
    Path(id): Path<u32>,
) -> Result<Json<Value>, Response> {
    authorize(&ctx, true, true)?;

    let removed = state
        .store
        .remove_camera(id)
        .await
        .map_err(|e| fail(e.into()))?
        .ok_or_else(|| fail(OpError::NotFound))?;

    if removed.kind() == CameraKind::Local {
        state.daemon.stop().await.map_err(|e| fail(e.into()))?;
        state.daemon.start().await.map_err(|e| fail(e.into()))?;
    }

    Ok(Json(json!({})))
}

async fn config_backup(
    State(state): State<AppState>,
    ClientAuth(ctx): ClientAuth,
) -> Result<Response, Response> {
    authorize(&ctx, true, true)?;

    let data = state.store.export().await.map_err(|e| fail(e.into()))?;
    let name = format!("config_backup_{}.json", chrono::Utc::now().format("%Y-%m-%d"));
    Ok(attachment("application/json", &name, data))
}

async fn config_restore(
    State(state): State<AppState>,
    ClientAuth(ctx): ClientAuth,
    body: Bytes,
) -> Result<Json<Value>, Response> {
    authorize(&ctx, true, true)?;

    let outcome = state
        .store
        .import(body)
        .await
        .map_err(|e| fail(OpError::MalformedInput(format!("{:#}", e))))?;

    let reboot = outcome.reboot && state.settings.enable_reboot;
    if reboot {
        schedule_reboot(&state);
    }

    Ok(Json(json!({ "ok": true, "reboot": reboot })))
}

#[derive(Deserialize)]
struct RelayEventQuery {
    event: String,
}

/// Called back by the motion daemon when a camera's motion state flips.
async fn relay_event(
    State(state): State<AppState>,
    ClientAuth(ctx): ClientAuth,
    Path(id): Path<u32>,
    Query(query): Query<RelayEventQuery>,
) -> Result<Json<Value>, Response> {
    authorize(&ctx, true, true)?;

    if state
        .store
        .get_camera(id)
        .await
        .map_err(|e| fail(e.into()))?
        .is_none()
    {
        return Err(fail(OpError::NotFound));
    }

    let detected = match query.event.as_str() {
        "start" => true,
        "stop" => false,
        other => {
            return Err(fail(OpError::MalformedInput(format!(
                "unknown event: {}",
                other
            ))))
        }
    };

    info!(camera_id = id, detected, "motion event relayed");
    state.daemon.set_motion_detected(id, detected).await;
    Ok(Json(json!({})))
}

#[derive(Deserialize)]
struct CurrentPictureQuery {
    seq: Option<u64>,
    width: Option<u32>,
    height: Option<u32>,
}

fn picture_response(motion: bool, frame: Option<Bytes>) -> Response {
    let motion_value = if motion { "true" } else { "false" };
    match frame {
        Some(data) => (
            [
                (header::CONTENT_TYPE, "image/jpeg".to_string()),
                (
                    header::HeaderName::from_static("x-motion-detected"),
                    motion_value.to_string(),
                ),
            ],
            data,
        )
            .into_response(),
        None => (
            StatusCode::NOT_FOUND,
            [(
                header::HeaderName::from_static("x-motion-detected"),
                motion_value.to_string(),
            )],
        )
            .into_response(),
    }
}

/// Live picture. When the client polls with a `seq` number, repeated polls
/// for the same logical frame are served from the frame cache.
async fn current_picture(
    State(state): State<AppState>,
    ClientAuth(ctx): ClientAuth,
    Path(id): Path<u32>,
    Query(query): Query<CurrentPictureQuery>,
) -> Result<Response, Response> {
    authorize(&ctx, false, false)?;

    let key = query.seq.map(|sequence| crate::cache::FrameKey {
        camera_id: id,
        sequence,
        width: query.width,
    });

    if let Some(key) = &key {
        if let Some(cached) = state.frames.get(key).await {
            let motion = state.daemon.is_motion_detected(id).await;
            return Ok(picture_response(motion, Some(cached)));
        }
    }

    let ops = camera_ops(&state, id).await.map_err(fail)?;
    let (motion, frame) = ops
        .current_picture(&state, query.width, query.height)
        .await
        .map_err(fail)?;

    if let (Some(key), Some(data)) = (key, &frame) {
        state.frames.insert(key, data.clone()).await;
    }

    Ok(picture_response(motion, frame))
}

async fn media_list(
    State(state): State<AppState>,
    ClientAuth(ctx): ClientAuth,
    Path((kind, id)): Path<(String, u32)>,
    Query(query): Query<MediaListQuery>,
) -> Result<Json<Value>, Response> {
    authorize(&ctx, false, true)?;
    let kind = parse_kind(&kind)?;

    let ops = camera_ops(&state, id).await.map_err(fail)?;
    let listing = ops
        .list_media(&state, kind, query.prefix.as_deref())
        .await
        .map_err(fail)?;
    Ok(Json(listing))
}

#[derive(Deserialize)]
struct MediaListQuery {
    prefix: Option<String>,
}

async fn media_download(
    State(state): State<AppState>,
    ClientAuth(ctx): ClientAuth,
    Path((kind, id, filename)): Path<(String, u32, String)>,
) -> Result<Response, Response> {
    authorize(&ctx, false, true)?;
    let kind = parse_kind(&kind)?;

    let ops = camera_ops(&state, id).await.map_err(fail)?;
    let data = ops
        .media_content(&state, kind, &filename)
        .await
        .map_err(fail)?;

    let name = pretty_attachment_name(&sanitize_filename(ops.record().name.as_str()), &filename);
    Ok(attachment(kind.content_type(), &name, data))
}

#[derive(Deserialize)]
struct PreviewQuery {
    width: Option<u32>,
}

async fn media_preview(
    State(state): State<AppState>,
    ClientAuth(ctx): ClientAuth,
    Path((kind, id, filename)): Path<(String, u32, String)>,
    Query(query): Query<PreviewQuery>,
) -> Result<Response, Response> {
    authorize(&ctx, false, true)?;
    let kind = parse_kind(&kind)?;

    let ops = camera_ops(&state, id).await.map_err(fail)?;
    let preview = ops
        .media_preview(&state, kind, &filename, query.width)
        .await
        .map_err(fail)?;

    match preview {
        Some(data) => Ok(([(header::CONTENT_TYPE, "image/jpeg")], data).into_response()),
        None => Ok((
            [(header::CONTENT_TYPE, "image/svg+xml")],
            PLACEHOLDER_SVG,
        )
            .into_response()),
    }
}

async fn media_delete(
    State(state): State<AppState>,
    ClientAuth(ctx): ClientAuth,
    Path((kind, id, filename)): Path<(String, u32, String)>,
) -> Result<Json<Value>, Response> {
    authorize(&ctx, true, true)?;
    let kind = parse_kind(&kind)?;

    let ops = camera_ops(&state, id).await.map_err(fail)?;
    ops.delete_media(&state, kind, &filename)
        .await
        .map_err(fail)?;
    Ok(Json(json!({})))
}

async fn media_delete_all(
    State(state): State<AppState>,
    ClientAuth(ctx): ClientAuth,
    Path((kind, id, group)): Path<(String, u32, String)>,
) -> Result<Json<Value>, Response> {
    authorize(&ctx, true, true)?;
    let kind = parse_kind(&kind)?;

    let ops = camera_ops(&state, id).await.map_err(fail)?;
    ops.delete_media_group(&state, kind, &group)
        .await
        .map_err(fail)?;
    Ok(Json(json!({})))
}

#[derive(Deserialize)]
struct ZippedQuery {
    key: Option<String>,
}

/// Two-step archive protocol: without a key the archive is prepared and a
/// retrieval key returned; with one, the prepared archive is downloaded.
async fn zipped(
    State(state): State<AppState>,
    ClientAuth(ctx): ClientAuth,
    Path((id, group)): Path<(u32, String)>,
    Query(query): Query<ZippedQuery>,
) -> Result<Response, Response> {
    authorize(&ctx, false, true)?;

    let ops = camera_ops(&state, id).await.map_err(fail)?;
    match query.key {
        Some(key) => {
            let (content_type, filename, data) = ops
                .archive_content(&state, MediaKind::Picture, &group, &key)
                .await
                .map_err(fail)?;
            Ok(attachment(&content_type, &filename, data))
        }
        None => {
            let key = ops
                .prepare_archive(&state, MediaKind::Picture, &group)
                .await
                .map_err(fail)?;
            Ok(Json(json!({ "key": key })).into_response())
        }
    }
}

#[derive(Deserialize)]
struct TimelapseQuery {
    key: Option<String>,
    check: Option<bool>,
    interval: Option<u32>,
    framerate: Option<u32>,
}

/// Time-lapse protocol: start a render (`interval` + `framerate`), poll it
/// (`check=true`) until the key appears, then download (`key=`).
async fn timelapse(
    State(state): State<AppState>,
    ClientAuth(ctx): ClientAuth,
    Path((id, group)): Path<(u32, String)>,
    Query(query): Query<TimelapseQuery>,
) -> Result<Response, Response> {
    authorize(&ctx, false, true)?;

    let ops = camera_ops(&state, id).await.map_err(fail)?;

    if let Some(key) = query.key {
        let (content_type, filename, data) = ops
            .timelapse_content(&state, &group, &key)
            .await
            .map_err(fail)?;
        return Ok(attachment(&content_type, &filename, data));
    }

    if query.check == Some(true) {
        let status = ops.timelapse_check(&state, &group).await.map_err(fail)?;
        return Ok(Json(serde_json::to_value(&status).unwrap_or_default()).into_response());
    }

    let (Some(interval), Some(framerate)) = (query.interval, query.framerate) else {
        return Err(fail(OpError::MalformedInput(
            "interval and framerate are required".into(),
        )));
    };
    let status = ops
        .timelapse_start(&state, framerate, interval, &group)
        .await
        .map_err(fail)?;
    Ok(Json(serde_json::to_value(&status).unwrap_or_default()).into_response())
}

async fn log_file(
    State(state): State<AppState>,
    ClientAuth(ctx): ClientAuth,
    Path(name): Path<String>,
) -> Result<Response, Response> {
    authorize(&ctx, true, true)?;

    let path = state
        .settings
        .log_files
        .get(&name)
        .ok_or_else(|| fail(OpError::NotFound))?;

    let data = tokio::fs::read(path)
        .await
        .map_err(|e| fail(OpError::LocalIo(format!("cannot read log: {}", e))))?;

    let filename = format!("{}.log", sanitize_filename(&name));
    Ok(attachment("text/plain", &filename, Bytes::from(data)))
}

/// Delayed host power action; the response is sent before it fires.
async fn power_op(
    State(state): State<AppState>,
    ClientAuth(ctx): ClientAuth,
    Path(op): Path<String>,
) -> Result<Json<Value>, Response> {
    authorize(&ctx, true, true)?;

    if !state.settings.enable_reboot {
        return Err(fail(OpError::Unsupported));
    }

    let power = state.power.clone();
    let delay = state.settings.reboot_delay;
    match op.as_str() {
        "reboot" => {
            info!("host reboot requested");
            tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                if let Err(err) = power.reboot().await {
                    tracing::warn!(error = %format!("{:#}", err), "host reboot failed");
                }
            });
        }
        "shutdown" => {
            info!("host shutdown requested");
            tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                if let Err(err) = power.shutdown().await {
                    tracing::warn!(error = %format!("{:#}", err), "host shutdown failed");
                }
            });
        }
        other => {
            return Err(fail(OpError::MalformedInput(format!(
                "unknown power operation: {}",
                other
            ))))
        }
    }

    Ok(Json(json!({})))
}
