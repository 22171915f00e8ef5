use axum::{
    extract::State,
    http::{header::SET_COOKIE, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use std::sync::Arc;
use tracing::{info, instrument};

use super::cookies::{self, ACCESS_COOKIE, REFRESH_COOKIE};
use super::service::AuthService;
use super::types::{
    AuthResponse, ForgotPasswordRequest, GenericResponse, LoginRequest, MeResponse,
    RegisterRequest, ResetPasswordRequest, VerifyEmailRequest,
};
use crate::shared::{AppError, AppState};

fn auth_service(state: &AppState) -> AuthService {
    AuthService::new(
        Arc::clone(&state.user_repository),
        state.token_config.clone(),
        Arc::clone(&state.mailer),
        Arc::clone(&state.auth_metrics),
        state.require_verification,
    )
}

fn access_token_from(headers: &HeaderMap) -> Option<String> {
    cookies::get_cookie(headers, ACCESS_COOKIE).or_else(|| {
        headers
            .get("Authorization")
            .and_then(|header| header.to_str().ok())
            .and_then(|header| header.strip_prefix("Bearer "))
            .map(|token| token.to_string())
    })
}

/// HTTP handler for account creation
///
/// POST /auth/register
#[instrument(name = "register", skip(state, request))]
pub async fn register(
    State(state): State<AppState>,
    Json(request): Json<RegisterRequest>,
) -> Result<(StatusCode, Json<AuthResponse>), AppError> {
    let user = auth_service(&state).register(request).await?;
    info!(username = %user.username, "Registration completed");
    Ok((StatusCode::CREATED, Json(AuthResponse { user })))
}

/// HTTP handler for login
///
/// POST /auth/login
/// On success sets the access_token and refresh_token cookies
#[instrument(name = "login", skip(state, request))]
pub async fn login(
    State(state): State<AppState>,
    Json(request): Json<LoginRequest>,
) -> Result<Response, AppError> {
    let (user, pair, remember_me) = auth_service(&state).login(request).await?;

    let access_cookie = cookies::auth_cookie(
        ACCESS_COOKIE,
        &pair.access,
        state.token_config.access_max_age_secs(remember_me),
        state.cookie_secure,
    )?;
    let refresh_cookie = cookies::auth_cookie(
        REFRESH_COOKIE,
        &pair.refresh,
        state.token_config.refresh_max_age_secs(),
        state.cookie_secure,
    )?;

    let mut response = (StatusCode::OK, Json(AuthResponse { user })).into_response();
    response.headers_mut().append(SET_COOKIE, access_cookie);
    response.headers_mut().append(SET_COOKIE, refresh_cookie);
    Ok(response)
}

/// HTTP handler for logout
///
/// POST /auth/logout
/// Stateless tokens: logout only clears the cookies
#[instrument(name = "logout", skip_all)]
pub async fn logout() -> Result<Response, AppError> {
    let mut response = (
        StatusCode::OK,
        Json(GenericResponse {
            message: "Logged out".to_string(),
        }),
    )
        .into_response();
    response
        .headers_mut()
        .append(SET_COOKIE, cookies::clear_cookie(ACCESS_COOKIE)?);
    response
        .headers_mut()
        .append(SET_COOKIE, cookies::clear_cookie(REFRESH_COOKIE)?);
    Ok(response)
}

/// HTTP handler for access-token rotation
///
/// POST /auth/refresh
#[instrument(name = "refresh", skip(state, headers))]
pub async fn refresh(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Response, AppError> {
    let refresh_token = cookies::get_cookie(&headers, REFRESH_COOKIE)
        .ok_or_else(|| AppError::Unauthorized("Invalid or expired token".to_string()))?;

    let (user, access) = auth_service(&state).refresh(&refresh_token).await?;

    let access_cookie = cookies::auth_cookie(
        ACCESS_COOKIE,
        &access,
        state.token_config.access_max_age_secs(false),
        state.cookie_secure,
    )?;

    let mut response = (StatusCode::OK, Json(AuthResponse { user })).into_response();
    response.headers_mut().append(SET_COOKIE, access_cookie);
    Ok(response)
}

/// HTTP handler for the current identity
///
/// GET /auth/me
/// Returns `{"user": null}` rather than 401 when unauthenticated
#[instrument(name = "me", skip(state, headers))]
pub async fn me(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<MeResponse>, AppError> {
    let token = access_token_from(&headers);
    let user = auth_service(&state).me(token.as_deref()).await;
    Ok(Json(MeResponse { user }))
}

/// HTTP handler for email verification
///
/// POST /auth/verify
#[instrument(name = "verify_email", skip(state, request))]
pub async fn verify_email(
    State(state): State<AppState>,
    Json(request): Json<VerifyEmailRequest>,
) -> Result<Json<AuthResponse>, AppError> {
    let user = auth_service(&state).verify_email(request).await?;
    Ok(Json(AuthResponse { user }))
}

/// HTTP handler for requesting a password reset
///
/// POST /auth/password/forgot
#[instrument(name = "forgot_password", skip(state, request))]
pub async fn forgot_password(
    State(state): State<AppState>,
    Json(request): Json<ForgotPasswordRequest>,
) -> Result<Json<GenericResponse>, AppError> {
    let response = auth_service(&state).forgot_password(request).await?;
    Ok(Json(response))
}

/// HTTP handler for completing a password reset
///
/// PUT /auth/password/reset
#[instrument(name = "reset_password", skip(state, request))]
pub async fn reset_password(
    State(state): State<AppState>,
    Json(request): Json<ResetPasswordRequest>,
) -> Result<Json<GenericResponse>, AppError> {
    let response = auth_service(&state).reset_password(request).await?;
    Ok(Json(response))
}
