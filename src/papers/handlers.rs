use axum::{extract::State, http::HeaderMap, Json};
use serde::{Deserialize, Serialize};
use tracing::{info, instrument, warn};

use crate::shared::{AppError, AppState};

pub const TOKEN_HEADER: &str = "x-papers-token";
pub const TIMESTAMP_HEADER: &str = "x-papers-timestamp";
pub const SIGNATURE_HEADER: &str = "x-papers-signature";

/// Catalog payload as it crosses the edge boundary: encrypted, opaque
#[derive(Debug, Serialize, Deserialize)]
pub struct EncryptedCatalogResponse {
    pub payload: String,
}

fn header_value(headers: &HeaderMap, name: &str) -> Result<String, AppError> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.to_string())
        .ok_or_else(|| AppError::Validation(format!("Missing {name} header")))
}

/// HTTP handler for the signed catalog proxy
///
/// GET /papers/catalog
/// Validation failures respond before any upstream fetch is attempted:
/// missing headers are 400, a bad signature or stale timestamp is 403.
#[instrument(name = "fetch_catalog", skip(state, headers))]
pub async fn fetch_catalog(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<EncryptedCatalogResponse>, AppError> {
    let token = header_value(&headers, TOKEN_HEADER)?;
    let timestamp = header_value(&headers, TIMESTAMP_HEADER)?
        .parse::<i64>()
        .map_err(|_| AppError::Validation(format!("Invalid {TIMESTAMP_HEADER} header")))?;
    let signature = header_value(&headers, SIGNATURE_HEADER)?;

    if !state.papers_signing.validate(&token, timestamp, &signature) {
        warn!("Rejected papers request with invalid signature");
        return Err(AppError::Forbidden("Invalid request signature".to_string()));
    }

    let catalog = state.papers_upstream.fetch_catalog().await?;
    let payload = state.papers_cipher.encrypt_value(&catalog)?;

    info!(payload_length = payload.len(), "Catalog served");
    Ok(Json(EncryptedCatalogResponse { payload }))
}
