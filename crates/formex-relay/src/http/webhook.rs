//! Change-notification ingress: POST /webhook.
//!
//! The content backend fires a notification on every item create, update or
//! delete. The body shape varies by source and is normalized later; the only
//! thing checked before answering is the optional shared-secret auth from
//! `RelayConfig::webhook_auth`.

use axum::{
    body::Bytes,
    extract::State,
    http::{header::AUTHORIZATION, HeaderMap, StatusCode},
    Json,
};
use formex_core::{RelayConfig, RelayError, WebhookAuthMode};
use hmac::{Hmac, Mac};
use serde_json::{json, Value};
use sha2::Sha256;
use std::sync::Arc;
use tracing::{info, warn};

use crate::app::AppState;
use crate::ingest;

type HmacSha256 = Hmac<Sha256>;

/// POST /webhook
///
/// Answers 202 with an empty body right away; normalization, publish and
/// broadcast run on a detached task the caller never waits for.
/// 401 when webhook auth is configured and the request fails it.
pub async fn webhook_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<StatusCode, (StatusCode, Json<Value>)> {
    authenticate(&state.config, &headers, &body).map_err(|e| auth_error(&e))?;

    info!(bytes = body.len(), "webhook arrived");
    ingest::spawn_detached("webhook", ingest::ingest(Arc::clone(&state), body));

    Ok(StatusCode::ACCEPTED)
}

/// Header carrying `sha256=<hex>` of the raw body, keyed with the secret.
const SIGNATURE_HEADER: &str = "x-hub-signature-256";

fn authenticate(config: &RelayConfig, headers: &HeaderMap, body: &Bytes) -> Result<(), RelayError> {
    if config.webhook_auth == WebhookAuthMode::None {
        return Ok(());
    }
    let secret = config
        .webhook_secret
        .as_deref()
        .filter(|s| !s.is_empty())
        .ok_or_else(|| denied("webhook secret not configured"))?;

    match config.webhook_auth {
        WebhookAuthMode::HmacSha256 => {
            let presented = credential(headers, SIGNATURE_HEADER, "sha256=")?;
            let signature = hex::decode(presented).map_err(|_| denied("signature is not hex"))?;
            keyed(secret)?
                .chain_update(body)
                .verify_slice(&signature)
                .map_err(|_| denied("signature mismatch"))
        }
        WebhookAuthMode::BearerToken => {
            let presented = credential(headers, AUTHORIZATION.as_str(), "Bearer ")?;
            // constant time: both sides are fixed-length digests
            let expected = keyed(secret)?.chain_update(secret).finalize().into_bytes();
            keyed(secret)?
                .chain_update(presented)
                .verify_slice(&expected)
                .map_err(|_| denied("bearer token mismatch"))
        }
        WebhookAuthMode::None => Ok(()),
    }
}

/// Value of `header` after `scheme`, e.g. the token in `Bearer <token>`.
fn credential<'a>(headers: &'a HeaderMap, header: &str, scheme: &str) -> Result<&'a str, RelayError> {
    headers
        .get(header)
        .ok_or_else(|| denied(&format!("missing {header} header")))?
        .to_str()
        .ok()
        .and_then(|v| v.strip_prefix(scheme))
        .ok_or_else(|| denied(&format!("{header} must start with '{scheme}'")))
}

fn keyed(secret: &str) -> Result<HmacSha256, RelayError> {
    HmacSha256::new_from_slice(secret.as_bytes()).map_err(|_| denied("unusable webhook secret"))
}

fn denied(reason: &str) -> RelayError {
    RelayError::AuthFailed(reason.to_string())
}

fn auth_error(err: &RelayError) -> (StatusCode, Json<Value>) {
    warn!(error = %err, "webhook authentication failed");
    (
        StatusCode::UNAUTHORIZED,
        Json(json!({"error": "authentication failed", "code": err.code()})),
    )
}
