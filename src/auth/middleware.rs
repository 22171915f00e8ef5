use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};
use tracing::{instrument, warn};

use super::cookies::{self, ACCESS_COOKIE};
use super::types::TokenKind;
use crate::shared::{AppError, AppState};

/// Authentication middleware - validates the access-token cookie (with an
/// Authorization Bearer fallback) and adds AuthClaims to the request.
/// Usage: .layer(middleware::from_fn_with_state(app_state.clone(), auth::require_auth))
/// Handlers can then extract Extension(claims): Extension<AuthClaims>.
#[instrument(skip(state, req, next))]
pub async fn require_auth(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response, AppError> {
    let token = cookies::get_cookie(req.headers(), ACCESS_COOKIE)
        .or_else(|| {
            req.headers()
                .get("Authorization")
                .and_then(|header| header.to_str().ok())
                .and_then(|header| header.strip_prefix("Bearer "))
                .map(|token| token.to_string())
        })
        .ok_or_else(|| {
            warn!(uri = %req.uri(), "Request without credentials to protected route");
            AppError::Unauthorized("Authentication required".to_string())
        })?;

    let claims = {
        let _guard = state.auth_metrics.verification_guard();
        state
            .token_config
            .verify(&token, TokenKind::Access)
            .map_err(|e| {
                state.auth_metrics.record_verification_failure();
                warn!(uri = %req.uri(), "Token verification failed");
                AppError::from(e)
            })?
    };

    // Make claims available to handlers downstream
    req.extensions_mut().insert(claims);

    Ok(next.run(req).await)
}
