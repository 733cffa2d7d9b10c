#![allow(dead_code)]

use axum_test::TestServer;
use camera_hub::{
    AppState, ArtifactCache, FrameCache, IdLocks, MainConfig, MemoryConfigStore, MemoryMediaStore,
    MockDaemon, MockPower, RemotePeerClient, Settings, TimelapseTracker,
};
use common::signature::compute_signature;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

pub const ADMIN_USER: &str = "admin";
pub const ADMIN_PASS: &str = "adminpw";

pub struct TestContext {
    pub state: AppState,
    pub store: Arc<MemoryConfigStore>,
    pub media: Arc<MemoryMediaStore>,
    pub daemon: Arc<MockDaemon>,
    pub power: Arc<MockPower>,
}

/// Hub with an admin credential configured and open access for the normal
/// role (no normal password set).
pub fn context() -> TestContext {
    context_with(Settings::default())
}

pub fn context_with(settings: Settings) -> TestContext {
    let main = MainConfig {
        enabled: true,
        admin_username: ADMIN_USER.to_string(),
        admin_password: ADMIN_PASS.to_string(),
        ..MainConfig::default()
    };

    let store = Arc::new(MemoryConfigStore::new(main));
    let media = MemoryMediaStore::new();
    let daemon = MockDaemon::new();
    let power = MockPower::new();

    let state = AppState {
        store: store.clone(),
        daemon: daemon.clone(),
        media: media.clone(),
        power: power.clone(),
        mounts: None,
        peers: Arc::new(
            RemotePeerClient::new(Duration::from_millis(500)).expect("peer client builds"),
        ),
        artifacts: Arc::new(ArtifactCache::new(32)),
        frames: Arc::new(FrameCache::new(32)),
        timelapse: Arc::new(TimelapseTracker::new()),
        locks: IdLocks::default(),
        settings: Arc::new(settings),
    };

    TestContext {
        state,
        store,
        media,
        daemon,
        power,
    }
}

pub fn server(state: AppState) -> TestServer {
    // Real HTTP transport so the server observes origin-form request
    // targets, matching production and the path-and-query signing scheme.
    TestServer::builder()
        .http_transport()
        .build(camera_hub::build_router(state))
        .expect("test server builds")
}

/// Sign a request path the way a client would: append the username, then
/// the signature computed over the full path-and-query plus the body.
pub fn signed(method: &str, path: &str, body: &[u8], username: &str, password: &str) -> String {
    let sep = if path.contains('?') { '&' } else { '?' };
    let uri = format!("{}{}_username={}", path, sep, username);
    let signature = compute_signature(method, &uri, body, password);
    format!("{}&_signature={}", uri, signature)
}

pub fn admin_get(path: &str) -> String {
    signed("GET", path, b"", ADMIN_USER, ADMIN_PASS)
}

pub fn admin_post(path: &str, body: &[u8]) -> String {
    signed("POST", path, body, ADMIN_USER, ADMIN_PASS)
}

/// Serve the router on an ephemeral port so another instance can reach it
/// as a remote peer over real HTTP.
pub async fn spawn_peer(state: AppState) -> SocketAddr {
    let app = camera_hub::build_router(state);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("ephemeral bind");
    let addr = listener.local_addr().expect("local addr");
    tokio::spawn(async move {
        let _ = axum::serve(listener, app.into_make_service()).await;
    });
    addr
}
