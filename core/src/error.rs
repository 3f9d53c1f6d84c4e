//! Error types for `cup_core`.
//!
//! All Rust-side failures funnel through [`CupError`], which uses
//! `thiserror` for `Display`/`Error` derives, one variant per taxonomy
//! entry (§7). Action execution itself never propagates an `Err` out of
//! the dispatcher -- see [`ActionResult`] -- `CupError` is for capture,
//! initialize, and screen-info calls, which are allowed to fail outright.

use thiserror::Error;

/// Top-level error type for the `cup_core` library.
#[derive(Debug, Error)]
pub enum CupError {
    /// The detected platform has no adapter.
    #[error("platform-unsupported: {0}")]
    PlatformUnsupported(String),

    /// The OS denied access (e.g. macOS Screen Recording / Accessibility).
    #[error("platform-permission: {0}")]
    PlatformPermission(String),

    /// A required native helper is missing (`gdbus`, `swiftc`, `csc`, `xdotool`, Chrome with CDP port).
    #[error("platform-unavailable: {0}")]
    PlatformUnavailable(String),

    /// A subprocess or CDP call exceeded its deadline.
    #[error("platform-timeout: {0}")]
    PlatformTimeout(String),

    /// A native call returned an unrecognized failure; carries the native error text.
    #[error("platform-failure: {0}")]
    PlatformFailure(String),

    /// The dispatcher received an action name outside the canonical action vocabulary.
    #[error("unknown-action: {0}")]
    UnknownAction(String),

    /// The dispatcher received an element id with no entry in the ref map.
    #[error("unknown-element: {0}")]
    UnknownElement(String),

    /// Action parameters were missing or malformed for the given action.
    #[error("invalid-params: {0}")]
    InvalidParams(String),

    /// An element id resolved but its native reference is no longer valid.
    #[error("stale-snapshot: {0}")]
    StaleSnapshot(String),
}

impl CupError {
    /// The taxonomy tag, as used in `ActionResult.error` prefixes and logs.
    pub fn kind(&self) -> &'static str {
        match self {
            CupError::PlatformUnsupported(_) => "platform-unsupported",
            CupError::PlatformPermission(_) => "platform-permission",
            CupError::PlatformUnavailable(_) => "platform-unavailable",
            CupError::PlatformTimeout(_) => "platform-timeout",
            CupError::PlatformFailure(_) => "platform-failure",
            CupError::UnknownAction(_) => "unknown-action",
            CupError::UnknownElement(_) => "unknown-element",
            CupError::InvalidParams(_) => "invalid-params",
            CupError::StaleSnapshot(_) => "stale-snapshot",
        }
    }
}

#[cfg(target_os = "windows")]
impl From<windows::core::Error> for CupError {
    fn from(err: windows::core::Error) -> Self {
        CupError::PlatformFailure(format!("Windows COM error: {err}"))
    }
}

impl From<std::io::Error> for CupError {
    fn from(err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::NotFound => {
                CupError::PlatformUnavailable(format!("native helper not found: {err}"))
            }
            std::io::ErrorKind::TimedOut => CupError::PlatformTimeout(err.to_string()),
            std::io::ErrorKind::PermissionDenied => {
                CupError::PlatformPermission(err.to_string())
            }
            _ => CupError::PlatformFailure(err.to_string()),
        }
    }
}

impl From<tungstenite::Error> for CupError {
    fn from(err: tungstenite::Error) -> Self {
        match err {
            tungstenite::Error::Io(io_err) => CupError::from(io_err),
            other => CupError::PlatformFailure(format!("CDP websocket error: {other}")),
        }
    }
}

/// The result record actions are reported in (§7): never a `Result`, so
/// the dispatcher can report a failed action as ordinary data in a batch.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct ActionResult {
    pub success: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ActionResult {
    pub fn ok(message: impl Into<String>) -> Self {
        ActionResult {
            success: true,
            message: message.into(),
            error: None,
        }
    }

    pub fn fail(error: impl Into<String>) -> Self {
        let error = error.into();
        ActionResult {
            success: false,
            message: String::new(),
            error: Some(error),
        }
    }

    pub fn from_error(err: &CupError) -> Self {
        ActionResult::fail(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_matches_taxonomy_tag() {
        assert_eq!(
            CupError::UnknownAction("fly".into()).kind(),
            "unknown-action"
        );
        assert_eq!(
            CupError::StaleSnapshot("e3".into()).kind(),
            "stale-snapshot"
        );
    }

    #[test]
    fn action_result_fail_has_no_message() {
        let r = ActionResult::fail("not found");
        assert!(!r.success);
        assert_eq!(r.error.as_deref(), Some("not found"));
        assert!(r.message.is_empty());
    }

    #[test]
    fn action_result_ok_has_no_error() {
        let r = ActionResult::ok("Clicked");
        assert!(r.success);
        assert_eq!(r.message, "Clicked");
        assert!(r.error.is_none());
    }
}
