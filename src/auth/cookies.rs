use axum::http::{HeaderMap, HeaderValue};
use tracing::debug;

use crate::shared::AppError;

pub const ACCESS_COOKIE: &str = "access_token";
pub const REFRESH_COOKIE: &str = "refresh_token";

/// Extracts a cookie value by name from the request headers
pub fn get_cookie(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get("cookie")
        .and_then(|v| v.to_str().ok())
        .and_then(|cookies| {
            cookies.split(';').find_map(|cookie| {
                let mut parts = cookie.trim().splitn(2, '=');
                let key = parts.next()?.trim();
                let value = parts.next()?.trim();
                if key == name {
                    Some(value.to_string())
                } else {
                    None
                }
            })
        })
}

/// Builds a `Set-Cookie` value for a session credential.
///
/// Always HttpOnly + SameSite=Lax + Path=/; `Secure` is appended only when
/// the deployment runs behind TLS (COOKIE_SECURE).
pub fn auth_cookie(
    name: &str,
    value: &str,
    max_age_secs: i64,
    secure: bool,
) -> Result<HeaderValue, AppError> {
    let mut cookie = format!("{}={}; Max-Age={}; Path=/; HttpOnly; SameSite=Lax", name, value, max_age_secs);
    if secure {
        cookie.push_str("; Secure");
    }

    debug!(cookie_name = name, max_age_secs, "Setting auth cookie");

    HeaderValue::from_str(&cookie).map_err(|_| AppError::Internal)
}

/// Builds a `Set-Cookie` value that immediately expires the named cookie
pub fn clear_cookie(name: &str) -> Result<HeaderValue, AppError> {
    debug!(cookie_name = name, "Clearing auth cookie");
    HeaderValue::from_str(&format!(
        "{}=; Max-Age=0; Path=/; HttpOnly; SameSite=Lax",
        name
    ))
    .map_err(|_| AppError::Internal)
}
