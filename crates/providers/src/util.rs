//! Shared helpers for the HTTP adapter.

use docent_domain::error::{Error, Result};

/// Convert a [`reqwest::Error`] into the domain [`Error`] type.
///
/// Timeout errors map to [`Error::Timeout`]; everything else maps to
/// [`Error::Http`].
pub(crate) fn from_reqwest(e: reqwest::Error) -> Error {
    if e.is_timeout() {
        Error::Timeout(e.to_string())
    } else {
        Error::Http(e.to_string())
    }
}

/// Read the API key from the named environment variable.
pub(crate) fn resolve_api_key(env_var: &str) -> Result<String> {
    match std::env::var(env_var) {
        Ok(v) if !v.trim().is_empty() => Ok(v.trim().to_string()),
        _ => Err(Error::Config(format!(
            "environment variable '{env_var}' not set or empty"
        ))),
    }
}

/// Turn a non-2xx response body into a provider error.
pub(crate) fn http_status_error(provider: &str, status: reqwest::StatusCode, body: &str) -> Error {
    let mut body = body.trim().to_string();
    if body.len() > 500 {
        let mut cut = 500;
        while !body.is_char_boundary(cut) {
            cut -= 1;
        }
        body.truncate(cut);
        body.push('…');
    }
    Error::Provider {
        provider: provider.into(),
        message: format!("HTTP {} - {}", status.as_u16(), body),
    }
}
