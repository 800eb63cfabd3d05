// Session cookie carrier

use axum::http::{header, HeaderMap, HeaderValue};
use chrono::{DateTime, Utc};

use crate::core::errors::AppError;

pub const SESSION_COOKIE_NAME: &str = "session";

/// Extract the session credential from the `Cookie` header(s)
pub fn extract_session_cookie(headers: &HeaderMap) -> Option<String> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(name, _)| *name == SESSION_COOKIE_NAME)
        .map(|(_, value)| value.trim_matches('"').to_string())
        .filter(|value| !value.is_empty())
}

/// `Set-Cookie` value carrying a freshly issued session
pub fn session_set_cookie(
    token: &str,
    expires_at: DateTime<Utc>,
    secure: bool,
) -> Result<HeaderValue, AppError> {
    let expires = expires_at.format("%a, %d %b %Y %H:%M:%S GMT");
    build_cookie(format!(
        "{}={}; HttpOnly; SameSite=Strict; Path=/; Expires={}{}",
        SESSION_COOKIE_NAME,
        token,
        expires,
        secure_attr(secure)
    ))
}

/// `Set-Cookie` value that removes the session cookie
pub fn clear_session_cookie(secure: bool) -> Result<HeaderValue, AppError> {
    build_cookie(format!(
        "{}=; HttpOnly; SameSite=Strict; Path=/; Max-Age=0; Expires=Thu, 01 Jan 1970 00:00:00 GMT{}",
        SESSION_COOKIE_NAME,
        secure_attr(secure)
    ))
}

fn secure_attr(secure: bool) -> &'static str {
    if secure {
        "; Secure"
    } else {
        ""
    }
}

fn build_cookie(raw: String) -> Result<HeaderValue, AppError> {
    HeaderValue::from_str(&raw)
        .map_err(|e| AppError::ValidationError(format!("unencodable cookie: {}", e)))
}
