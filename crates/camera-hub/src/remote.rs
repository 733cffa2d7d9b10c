use crate::error::OpError;
use crate::types::{CameraRecord, MediaKind, TimelapseStatus};
use anyhow::Result;
use bytes::Bytes;
use common::signature::compute_signature;
use serde_json::{Map, Value};
use std::time::Duration;
use tracing::debug;

/// Client for remote peer instances of this service.
///
/// Every call performs one logical operation, signs the request with the
/// peer credential using the shared signature scheme, and resolves exactly
/// once: a payload or an [`OpError::Remote`] carrying the peer address.
/// The underlying HTTP client enforces a finite timeout, so an unreachable
/// peer can never stall a caller indefinitely.
pub struct RemotePeerClient {
    http: reqwest::Client,
}

fn encode_query_value(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for byte in value.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' | b'/' => {
                out.push(byte as char)
            }
            _ => out.push_str(&format!("%{:02X}", byte)),
        }
    }
    out
}

/// Extract `filename=..` from a content-disposition header value.
fn disposition_filename(header: &str) -> Option<String> {
    header.split(';').find_map(|part| {
        let part = part.trim();
        part.strip_prefix("filename=")
            .map(|name| name.trim_matches(|c| c == '"' || c == ';').to_string())
    })
}

impl RemotePeerClient {
    pub fn new(timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { http })
    }

    /// Build the signed request path. The signature covers the method, the
    /// full path-and-query (minus the signature itself) and the body, so
    /// the string sent must be byte-identical to the string signed.
    fn signed_path(
        record: &CameraRecord,
        method: &str,
        path: &str,
        params: &[(&str, String)],
        body: &[u8],
    ) -> String {
        let username = record.username.clone().unwrap_or_default();
        let password = record.password.clone().unwrap_or_default();

        let mut pairs = vec![format!("_username={}", encode_query_value(&username))];
        for (key, value) in params {
            pairs.push(format!("{}={}", key, encode_query_value(value)));
        }
        let uri = format!("{}?{}", path, pairs.join("&"));

        let signature = compute_signature(method, &uri, body, &password);
        format!("{}&_signature={}", uri, signature)
    }

    async fn send(
        &self,
        record: &CameraRecord,
        method: reqwest::Method,
        path: &str,
        params: &[(&str, String)],
        body: Option<Vec<u8>>,
    ) -> Result<reqwest::Response, OpError> {
        let host = record.host.as_deref().unwrap_or_default();
        let port = record.port.unwrap_or(80);
        let body_bytes = body.clone().unwrap_or_default();
        let signed = Self::signed_path(record, method.as_str(), path, params, &body_bytes);
        let url = format!("http://{}:{}{}", host, port, signed);

        debug!(peer = %record.peer_url(), %path, "forwarding operation to peer");

        let mut request = self.http.request(method, &url);
        if let Some(body) = body {
            request = request
                .header("content-type", "application/json")
                .body(body);
        }

        request
            .send()
            .await
            .map_err(|e| OpError::remote(record.peer_url(), e.to_string()))
    }

    async fn send_json(
        &self,
        record: &CameraRecord,
        method: reqwest::Method,
        path: &str,
        params: &[(&str, String)],
        body: Option<Vec<u8>>,
    ) -> Result<Value, OpError> {
        let response = self.send(record, method, path, params, body).await?;
        let status = response.status();
        let value: Value = response
            .json()
            .await
            .map_err(|e| OpError::remote(record.peer_url(), e.to_string()))?;

        if let Some(message) = value.get("error").and_then(Value::as_str) {
            return Err(OpError::remote(record.peer_url(), message));
        }
        if !status.is_success() {
            return Err(OpError::remote(
                record.peer_url(),
                format!("peer returned {}", status),
            ));
        }
        Ok(value)
    }

    /// Binary fetch. A JSON response from the peer is an error payload.
    async fn send_bytes(
        &self,
        record: &CameraRecord,
        path: &str,
        params: &[(&str, String)],
    ) -> Result<(String, Option<String>, Bytes), OpError> {
        let response = self
            .send(record, reqwest::Method::GET, path, params, None)
            .await?;
        let status = response.status();

        let content_type = response
            .headers()
            .get("content-type")
            .and_then(|v| v.to_str().ok())
            .unwrap_or("application/octet-stream")
            .to_string();
        let filename = response
            .headers()
            .get("content-disposition")
            .and_then(|v| v.to_str().ok())
            .and_then(disposition_filename);

        if content_type.starts_with("application/json") {
            let value: Value = response
                .json()
                .await
                .map_err(|e| OpError::remote(record.peer_url(), e.to_string()))?;
            let message = value
                .get("error")
                .and_then(Value::as_str)
                .map(str::to_string)
                .unwrap_or_else(|| format!("peer returned {}", status));
            return Err(OpError::remote(record.peer_url(), message));
        }
        if !status.is_success() {
            return Err(OpError::remote(
                record.peer_url(),
                format!("peer returned {}", status),
            ));
        }

        let data = response
            .bytes()
            .await
            .map_err(|e| OpError::remote(record.peer_url(), e.to_string()))?;
        Ok((content_type, filename, data))
    }

    fn remote_id(record: &CameraRecord) -> u32 {
        record.remote_camera_id.unwrap_or(0)
    }

    pub async fn get_config(&self, record: &CameraRecord) -> Result<Map<String, Value>, OpError> {
        let path = format!("/config/{}/get", Self::remote_id(record));
        match self
            .send_json(record, reqwest::Method::GET, &path, &[], None)
            .await?
        {
            Value::Object(map) => Ok(map),
            other => Err(OpError::remote(
                record.peer_url(),
                format!("unexpected configuration payload: {}", other),
            )),
        }
    }

    pub async fn set_config(
        &self,
        record: &CameraRecord,
        ui: &Map<String, Value>,
    ) -> Result<(), OpError> {
        let path = format!("/config/{}/set", Self::remote_id(record));
        let body = serde_json::to_vec(ui).map_err(anyhow::Error::from)?;
        self.send_json(record, reqwest::Method::POST, &path, &[], Some(body))
            .await?;
        Ok(())
    }

    pub async fn list_media(
        &self,
        record: &CameraRecord,
        kind: MediaKind,
        prefix: Option<&str>,
    ) -> Result<Value, OpError> {
        let path = format!("/{}/{}/list", kind, Self::remote_id(record));
        let mut params = Vec::new();
        if let Some(prefix) = prefix {
            params.push(("prefix", prefix.to_string()));
        }
        self.send_json(record, reqwest::Method::GET, &path, &params, None)
            .await
    }

    pub async fn media_content(
        &self,
        record: &CameraRecord,
        kind: MediaKind,
        filename: &str,
    ) -> Result<Bytes, OpError> {
        let path = format!("/{}/{}/download/{}", kind, Self::remote_id(record), filename);
        let (_, _, data) = self.send_bytes(record, &path, &[]).await?;
        Ok(data)
    }

    /// Fetch a preview image; `None` when the peer substitutes its own
    /// placeholder, so the caller can apply the local placeholder contract.
    pub async fn media_preview(
        &self,
        record: &CameraRecord,
        kind: MediaKind,
        filename: &str,
        width: Option<u32>,
    ) -> Result<Option<Bytes>, OpError> {
        let path = format!("/{}/{}/preview/{}", kind, Self::remote_id(record), filename);
        let mut params = Vec::new();
        if let Some(width) = width {
            params.push(("width", width.to_string()));
        }
        let (content_type, _, data) = self.send_bytes(record, &path, &params).await?;
        if content_type.starts_with("image/svg") {
            return Ok(None);
        }
        Ok(Some(data))
    }

    pub async fn delete_media(
        &self,
        record: &CameraRecord,
        kind: MediaKind,
        filename: &str,
    ) -> Result<(), OpError> {
        let path = format!("/{}/{}/delete/{}", kind, Self::remote_id(record), filename);
        self.send_json(record, reqwest::Method::POST, &path, &[], None)
            .await?;
        Ok(())
    }

    pub async fn delete_media_group(
        &self,
        record: &CameraRecord,
        kind: MediaKind,
        group: &str,
    ) -> Result<(), OpError> {
        let path = format!("/{}/{}/delete_all/{}", kind, Self::remote_id(record), group);
        self.send_json(record, reqwest::Method::POST, &path, &[], None)
            .await?;
        Ok(())
    }

    /// Live picture plus the peer's motion-detected flag.
    pub async fn current_picture(
        &self,
        record: &CameraRecord,
        width: Option<u32>,
        height: Option<u32>,
    ) -> Result<(bool, Option<Bytes>), OpError> {
        let path = format!("/picture/{}/current", Self::remote_id(record));
        let mut params = Vec::new();
        if let Some(width) = width {
            params.push(("width", width.to_string()));
        }
        if let Some(height) = height {
            params.push(("height", height.to_string()));
        }

        let response = self
            .send(record, reqwest::Method::GET, &path, &params, None)
            .await?;
        let motion = response
            .headers()
            .get("x-motion-detected")
            .and_then(|v| v.to_str().ok())
            == Some("true");

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok((motion, None));
        }
        if !response.status().is_success() {
            return Err(OpError::remote(
                record.peer_url(),
                format!("peer returned {}", response.status()),
            ));
        }

        let data = response
            .bytes()
            .await
            .map_err(|e| OpError::remote(record.peer_url(), e.to_string()))?;
        Ok((motion, Some(data)))
    }

    pub async fn prepare_archive(
        &self,
        record: &CameraRecord,
        kind: MediaKind,
        group: &str,
    ) -> Result<String, OpError> {
        let path = format!("/{}/{}/zipped/{}", kind, Self::remote_id(record), group);
        let value = self
            .send_json(record, reqwest::Method::GET, &path, &[], None)
            .await?;
        value
            .get("key")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| OpError::remote(record.peer_url(), "peer returned no archive key"))
    }

    pub async fn archive_content(
        &self,
        record: &CameraRecord,
        kind: MediaKind,
        group: &str,
        key: &str,
    ) -> Result<(String, Option<String>, Bytes), OpError> {
        let path = format!("/{}/{}/zipped/{}", kind, Self::remote_id(record), group);
        self.send_bytes(record, &path, &[("key", key.to_string())])
            .await
    }

    pub async fn timelapse_start(
        &self,
        record: &CameraRecord,
        framerate: u32,
        interval: u32,
        group: &str,
    ) -> Result<TimelapseStatus, OpError> {
        let path = format!("/picture/{}/timelapse/{}", Self::remote_id(record), group);
        let params = [
            ("interval", interval.to_string()),
            ("framerate", framerate.to_string()),
        ];
        let value = self
            .send_json(record, reqwest::Method::GET, &path, &params, None)
            .await?;
        serde_json::from_value(value)
            .map_err(|e| OpError::remote(record.peer_url(), e.to_string()))
    }

    pub async fn timelapse_check(
        &self,
        record: &CameraRecord,
        group: &str,
    ) -> Result<TimelapseStatus, OpError> {
        let path = format!("/picture/{}/timelapse/{}", Self::remote_id(record), group);
        let value = self
            .send_json(
                record,
                reqwest::Method::GET,
                &path,
                &[("check", "true".to_string())],
                None,
            )
            .await?;
        serde_json::from_value(value)
            .map_err(|e| OpError::remote(record.peer_url(), e.to_string()))
    }

    pub async fn timelapse_content(
        &self,
        record: &CameraRecord,
        group: &str,
        key: &str,
    ) -> Result<(String, Option<String>, Bytes), OpError> {
        let path = format!("/picture/{}/timelapse/{}", Self::remote_id(record), group);
        self.send_bytes(record, &path, &[("key", key.to_string())])
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Map;

    fn record() -> CameraRecord {
        CameraRecord {
            id: 3,
            name: "gate".into(),
            enabled: true,
            device_uri: None,
            host: Some("peer.lan".into()),
            port: Some(8765),
            remote_camera_id: Some(1),
            username: Some("admin".into()),
            password: Some("pw".into()),
            settings: Map::new(),
        }
    }

    #[test]
    fn signed_path_verifies_as_received() {
        let record = record();
        let signed = RemotePeerClient::signed_path(
            &record,
            "GET",
            "/config/1/get",
            &[("prefix", "2024-01-02".to_string())],
            b"",
        );

        let signature = signed
            .split("&_signature=")
            .nth(1)
            .expect("signature appended");
        assert!(common::signature::verify_signature(
            "GET", &signed, b"", "pw", signature
        ));
    }

    #[test]
    fn query_values_are_percent_encoded() {
        assert_eq!(encode_query_value("a b&c"), "a%20b%26c");
        assert_eq!(encode_query_value("2024-01-02/x.jpg"), "2024-01-02/x.jpg");
    }

    #[test]
    fn disposition_filename_is_parsed() {
        assert_eq!(
            disposition_filename("attachment; filename=gate_2024.zip;"),
            Some("gate_2024.zip".to_string())
        );
        assert_eq!(disposition_filename("inline"), None);
    }
}
