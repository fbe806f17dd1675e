//! Error taxonomy surfaced at the controller boundary.
//!
//! Failures never cross the boundary as panics or propagated errors from the
//! worker: they end the session in `Finished` and their message is exposed as
//! `ProgressSnapshot::last_error`. Construction-time failures (missing assets, no
//! audio output) are returned directly.

use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum NarrationError {
    #[error("bundled asset missing: {path:?}")]
    AssetMissing { path: PathBuf },
    #[error("bundled asset {path:?} could not be decoded: {reason}")]
    AssetDecode { path: PathBuf, reason: String },
    #[error("transport error: {0}")]
    Transport(String),
    #[error("{}", .0.user_message())]
    Http(HttpFailure),
    #[error("episode could not be decoded: {0}")]
    EpisodeDecode(String),
    #[error("audio output error: {0}")]
    Audio(String),
    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

/// Closed set of legacy HTTP failures.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HttpFailure {
    BadRequest,
    Unauthorized,
    Forbidden(EntitlementDenial),
    NotFound,
    Server,
    Unknown(u16),
}

/// Sub-reason carried by a 403 response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntitlementDenial {
    /// The app-wide premium entitlement lapsed.
    App,
    /// The subscription to a specific narrator lapsed.
    Persona { persona_id: Option<i64> },
    Other(String),
}

impl HttpFailure {
    /// Map a non-2xx status (plus the body, for 403 sub-reasons).
    pub fn from_status(status: u16, body: &[u8]) -> Self {
        match status {
            400 => HttpFailure::BadRequest,
            401 => HttpFailure::Unauthorized,
            403 => HttpFailure::Forbidden(EntitlementDenial::from_body(body)),
            404 => HttpFailure::NotFound,
            500 => HttpFailure::Server,
            other => HttpFailure::Unknown(other),
        }
    }

    pub fn user_message(&self) -> String {
        match self {
            HttpFailure::BadRequest => "Bad request.".to_string(),
            HttpFailure::Unauthorized => "Unauthorized. Please sign in again.".to_string(),
            HttpFailure::Forbidden(denial) => denial.user_message().to_string(),
            HttpFailure::NotFound => "Not found.".to_string(),
            HttpFailure::Server => "Server error. Please try again later.".to_string(),
            HttpFailure::Unknown(code) => format!("Unexpected response ({code})."),
        }
    }
}

#[derive(serde::Deserialize)]
#[serde(rename_all = "camelCase")]
struct ForbiddenBody {
    entitlement_type: Option<String>,
    persona_id: Option<i64>,
}

impl EntitlementDenial {
    fn from_body(body: &[u8]) -> Self {
        let Ok(parsed) = serde_json::from_slice::<ForbiddenBody>(body) else {
            return EntitlementDenial::Other(String::from_utf8_lossy(body).trim().to_string());
        };
        match parsed.entitlement_type.as_deref() {
            Some("APP") => EntitlementDenial::App,
            Some("PERSONA") => EntitlementDenial::Persona {
                persona_id: parsed.persona_id,
            },
            other => EntitlementDenial::Other(other.unwrap_or_default().to_string()),
        }
    }

    pub fn user_message(&self) -> &'static str {
        match self {
            EntitlementDenial::App => "Premium subscription expired.",
            EntitlementDenial::Persona { .. } => "Subscription to host expired.",
            EntitlementDenial::Other(_) => "Access denied.",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn maps_status_codes() {
        assert_eq!(HttpFailure::from_status(400, b""), HttpFailure::BadRequest);
        assert_eq!(HttpFailure::from_status(401, b""), HttpFailure::Unauthorized);
        assert_eq!(HttpFailure::from_status(404, b""), HttpFailure::NotFound);
        assert_eq!(HttpFailure::from_status(500, b""), HttpFailure::Server);
        assert_eq!(HttpFailure::from_status(502, b""), HttpFailure::Unknown(502));
    }

    #[test]
    fn forbidden_reads_entitlement_type() {
        let app = HttpFailure::from_status(403, br#"{"entitlementType":"APP"}"#);
        assert_eq!(app, HttpFailure::Forbidden(EntitlementDenial::App));
        assert_eq!(app.user_message(), "Premium subscription expired.");

        let persona =
            HttpFailure::from_status(403, br#"{"entitlementType":"PERSONA","personaId":12}"#);
        assert_eq!(
            persona,
            HttpFailure::Forbidden(EntitlementDenial::Persona {
                persona_id: Some(12)
            })
        );
        assert_eq!(persona.user_message(), "Subscription to host expired.");

        let other = HttpFailure::from_status(403, b"nope");
        assert_eq!(other.user_message(), "Access denied.");
    }

    #[test]
    fn http_error_displays_user_message() {
        let err = NarrationError::Http(HttpFailure::NotFound);
        assert_eq!(err.to_string(), "Not found.");
    }
}
