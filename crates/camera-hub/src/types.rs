use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;

/// Execution path for a camera. Every record classifies to exactly one
/// kind; operations on `Unsupported` fail with a "not implemented" error
/// instead of silently doing nothing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CameraKind {
    Local,
    Remote,
    Unsupported,
}

/// A configured camera. Identity is `id`, assigned at creation and stable
/// for the record's lifetime. Device-specific tuning lives in `settings`
/// and is passed through to the local daemon or the remote peer untouched.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CameraRecord {
    pub id: u32,
    #[serde(default)]
    pub name: String,
    #[serde(default = "default_true")]
    pub enabled: bool,

    // Local device fields
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_uri: Option<String>,

    // Remote peer fields
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remote_camera_id: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,

    #[serde(default, flatten)]
    pub settings: Map<String, Value>,
}

impl CameraRecord {
    /// Classify the record; total over every possible record shape.
    pub fn kind(&self) -> CameraKind {
        if self.device_uri.is_some() {
            CameraKind::Local
        } else if self.host.is_some() && self.remote_camera_id.is_some() {
            CameraKind::Remote
        } else {
            CameraKind::Unsupported
        }
    }

    /// Human-readable address of the peer backing a remote camera, used in
    /// error messages surfaced to the caller.
    pub fn peer_url(&self) -> String {
        let host = self.host.as_deref().unwrap_or("?");
        let port = self.port.unwrap_or(80);
        let remote_id = self.remote_camera_id.unwrap_or(0);
        match self.username.as_deref() {
            Some(user) if !user.is_empty() => {
                format!("{}@{}:{}/camera/{}", user, host, port, remote_id)
            }
            _ => format!("{}:{}/camera/{}", host, port, remote_id),
        }
    }

    /// The record as the caller-facing configuration object. The peer
    /// password never leaves the process.
    pub fn to_ui(&self) -> Map<String, Value> {
        match serde_json::to_value(self) {
            Ok(Value::Object(mut map)) => {
                map.remove("password");
                map
            }
            _ => Map::new(),
        }
    }

    /// Fold a caller-supplied configuration payload back into the record.
    /// Structural identity fields are never overwritten from a payload.
    pub fn apply_ui(&mut self, ui: &Map<String, Value>) {
        for (key, value) in ui {
            match key.as_str() {
                "id" | "host" | "port" | "remote_camera_id" | "username" | "password"
                | "device_url" => {}
                "name" => {
                    if let Some(name) = value.as_str() {
                        self.name = name.to_string();
                    }
                }
                "enabled" => {
                    if let Some(enabled) = value.as_bool() {
                        self.enabled = enabled;
                    }
                }
                "device_uri" => {
                    if let Some(uri) = value.as_str() {
                        self.device_uri = Some(uri.to_string());
                    }
                }
                _ => {
                    self.settings.insert(key.clone(), value.clone());
                }
            }
        }
    }
}

/// Process-wide service configuration. `extra` holds additional settings;
/// a configured subset of its keys triggers a host reboot when changed.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MainConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub admin_username: String,
    #[serde(default)]
    pub admin_password: String,
    #[serde(default)]
    pub normal_username: String,
    #[serde(default)]
    pub normal_password: String,
    #[serde(default, flatten)]
    pub extra: Map<String, Value>,
}

fn default_true() -> bool {
    true
}

impl MainConfig {
    pub fn admin_pair(&self) -> String {
        format!("{}:{}", self.admin_username, self.admin_password)
    }

    pub fn normal_pair(&self) -> String {
        format!("{}:{}", self.normal_username, self.normal_password)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Picture,
    Movie,
}

impl MediaKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MediaKind::Picture => "picture",
            MediaKind::Movie => "movie",
        }
    }

    /// Content type of a single downloaded media file.
    pub fn content_type(&self) -> &'static str {
        match self {
            MediaKind::Picture => "image/jpeg",
            MediaKind::Movie => "video/mpeg",
        }
    }
}

impl fmt::Display for MediaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MediaKind {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "picture" => Ok(MediaKind::Picture),
            "movie" => Ok(MediaKind::Movie),
            _ => Err(()),
        }
    }
}

/// One entry in a media listing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MediaEntry {
    pub path: String,
    pub size: u64,
    pub timestamp: DateTime<Utc>,
}

/// Aggregated result of a configuration commit. `restart` is internal
/// (local daemon restart already performed by finalization); `reload`
/// tells the caller's UI to refresh; `reboot` means the host will restart
/// after a short delay.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CommitOutcome {
    pub reload: bool,
    pub restart: bool,
    pub reboot: bool,
    pub error: Option<String>,
}

/// Progress report for a time-lapse render. `-1` means not running; once a
/// finished render has been handed to the artifact cache its key is
/// reported alongside `progress: -1`, exactly once.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimelapseStatus {
    pub progress: i32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
}

impl TimelapseStatus {
    pub fn idle() -> Self {
        Self {
            progress: -1,
            key: None,
        }
    }

    pub fn running(progress: i32) -> Self {
        Self {
            progress,
            key: None,
        }
    }
}

/// Result of importing a configuration backup.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImportOutcome {
    pub reboot: bool,
}
