use axum::{
    body::Body,
    extract::{Query, Request, State},
    http::StatusCode,
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::warn;

use crate::signature::verify_signature;

/// Body size accepted for signature verification. Covers config restore
/// uploads; larger bodies are rejected before any handler runs.
const MAX_SIGNED_BODY: usize = 64 * 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    Normal,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Admin => "admin",
            Role::Normal => "normal",
        }
    }
}

/// Credential pairs configured process-wide. An empty normal password means
/// open access for unauthenticated callers.
#[derive(Debug, Clone, Default)]
pub struct Credentials {
    pub admin_username: String,
    pub admin_password: String,
    pub normal_username: String,
    pub normal_password: String,
}

/// Source of the currently effective credentials. Resolved per request so
/// that credential rotation takes effect without a restart.
#[async_trait::async_trait]
pub trait CredentialSource: Send + Sync {
    async fn credentials(&self) -> Credentials;
}

/// Authentication outcome carried through request extensions.
#[derive(Debug, Clone)]
pub struct AuthContext {
    pub role: Option<Role>,
    /// The caller asked for elevated privilege inline (`_admin=true`).
    pub admin_requested: bool,
}

/// Resolve the caller's role from the signed request metadata.
///
/// Resolution order: admin credential match, then open access when no
/// normal secret is configured and no username was supplied, then normal
/// credential match. Failed explicit login attempts (`_login=true`) are
/// logged with the attempted username; there is no lockout or backoff.
pub fn authenticate(
    creds: &Credentials,
    method: &str,
    uri: &str,
    body: &[u8],
    params: &HashMap<String, String>,
) -> Option<Role> {
    let username = params.get("_username").map(String::as_str);
    let signature = params.get("_signature").map(String::as_str).unwrap_or("");
    let login = params.get("_login").map(String::as_str) == Some("true");

    if username == Some(creds.admin_username.as_str())
        && verify_signature(method, uri, body, &creds.admin_password, signature)
    {
        return Some(Role::Admin);
    }

    if username.is_none() && creds.normal_password.is_empty() {
        // no authentication required for the normal user
        return Some(Role::Normal);
    }

    if username == Some(creds.normal_username.as_str())
        && verify_signature(method, uri, body, &creds.normal_password, signature)
    {
        return Some(Role::Normal);
    }

    if let Some(user) = username {
        if user != "_" && login {
            warn!(user = %user, "authentication failed");
        }
    }

    None
}

/// Middleware resolving the caller's role once per request.
///
/// Buffers the body so the signature can cover it, then restores the
/// request for downstream extractors. Handlers read the outcome through
/// [`ClientAuth`] and decide with [`authorize`].
pub async fn auth_middleware(
    State(source): State<Arc<dyn CredentialSource>>,
    req: Request,
    next: Next,
) -> Result<Response, Response> {
    let (parts, body) = req.into_parts();

    let params: HashMap<String, String> = Query::try_from_uri(&parts.uri)
        .map(|Query(map)| map)
        .unwrap_or_default();

    let bytes = axum::body::to_bytes(body, MAX_SIGNED_BODY)
        .await
        .map_err(|e| {
            (
                StatusCode::BAD_REQUEST,
                Json(serde_json::json!({ "error": format!("unreadable body: {}", e) })),
            )
                .into_response()
        })?;

    let creds = source.credentials().await;
    let uri = parts.uri.to_string();
    let role = authenticate(&creds, parts.method.as_str(), &uri, &bytes, &params);

    let ctx = AuthContext {
        role,
        admin_requested: params.get("_admin").map(String::as_str) == Some("true"),
    };

    let mut req = Request::from_parts(parts, Body::from(bytes));
    req.extensions_mut().insert(ctx);

    Ok(next.run(req).await)
}

/// Axum extractor for the resolved authentication context.
/// Usage: `ClientAuth(ctx): ClientAuth` in route handlers.
pub struct ClientAuth(pub AuthContext);

#[axum::async_trait]
impl<S> axum::extract::FromRequestParts<S> for ClientAuth
where
    S: Send + Sync,
{
    type Rejection = Response;

    async fn from_request_parts(
        parts: &mut axum::http::request::Parts,
        _state: &S,
    ) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<AuthContext>()
            .cloned()
            .map(ClientAuth)
            .ok_or_else(|| {
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(serde_json::json!({ "error": "internal server error" })),
                )
                    .into_response()
            })
    }
}

/// Authorization guard invoked at the top of each handler.
///
/// Rejection is the exact payload `{"error": "unauthorized", "prompt": ..}`
/// with a 200 status; `prompt` tells the client whether to show a login
/// prompt. Inline elevation requests (`_admin=true`) are treated like a
/// hard admin requirement.
pub fn authorize(ctx: &AuthContext, requires_admin: bool, prompt: bool) -> Result<Role, Response> {
    match ctx.role {
        Some(Role::Admin) => Ok(Role::Admin),
        Some(Role::Normal) if !requires_admin && !ctx.admin_requested => Ok(Role::Normal),
        _ => Err((
            StatusCode::OK,
            Json(serde_json::json!({ "error": "unauthorized", "prompt": prompt })),
        )
            .into_response()),
    }
}
