//! Error types for the remote access layer, condition parsing, and local state.

use serde_json::Value;
use thiserror::Error;

/// Failures surfaced by the remote access layer.
///
/// The backend distinguishes authorization failures from plain transport or
/// application errors; everything outside the first three variants folds into
/// `RequestFailed` with the best message the server body offered.
#[derive(Debug, Error)]
pub enum ClientError {
    /// No session, or the session cookie has expired server-side.
    #[error("Unauthorized")]
    Unauthorized,

    /// Authenticated but forbidden for this schema or record.
    #[error("Permission Denied")]
    PermissionDenied,

    /// The requested record identity does not exist.
    #[error("Document not found")]
    NotFound,

    /// Any other transport or application failure, with the message
    /// extracted from the server's structured error envelope when present.
    #[error("{message}")]
    RequestFailed { message: String },
}

impl ClientError {
    /// Returns the exit code for this error type.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Unauthorized | Self::PermissionDenied => 1,
            Self::NotFound => 2,
            Self::RequestFailed { .. } => 3,
        }
    }

    /// Build a `RequestFailed` from a server error body, preferring the
    /// structured `_server_messages` envelope, then `message`, then
    /// `exception`, then the supplied fallback.
    pub(crate) fn request_failed(body: Option<&Value>, fallback: &str) -> Self {
        let message = body
            .and_then(server_error_message)
            .unwrap_or_else(|| fallback.to_string());
        Self::RequestFailed { message }
    }
}

/// Extract a human-readable message from a structured server error body.
///
/// `_server_messages` is a JSON-encoded array of JSON-encoded `{message}`
/// strings; both layers are decoded and the messages joined with `", "`.
/// Falls back to the flat `message` and `exception` fields.
pub(crate) fn server_error_message(body: &Value) -> Option<String> {
    if let Some(raw) = body.get("_server_messages").and_then(Value::as_str) {
        if let Ok(Value::Array(items)) = serde_json::from_str::<Value>(raw) {
            let parts: Vec<String> = items
                .iter()
                .filter_map(|item| {
                    let inner: Value = serde_json::from_str(item.as_str()?).ok()?;
                    inner.get("message")?.as_str().map(String::from)
                })
                .collect();
            if !parts.is_empty() {
                return Some(parts.join(", "));
            }
        }
    }

    for key in ["message", "exception"] {
        match body.get(key) {
            Some(Value::String(s)) if !s.is_empty() => return Some(s.clone()),
            // Non-string messages are surfaced as their JSON encoding.
            Some(other) if !other.is_null() => return Some(other.to_string()),
            _ => {}
        }
    }

    None
}

/// Errors from parsing or evaluating a condition string.
///
/// These never escape the form engine: condition failures resolve to the
/// governed property's default (fail open). The variants exist so the parser
/// and evaluator can be tested directly.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConditionError {
    #[error("unexpected character '{0}' in condition")]
    UnexpectedChar(char),

    #[error("unterminated string literal")]
    UnterminatedString,

    #[error("unexpected token {0}")]
    UnexpectedToken(String),

    #[error("unexpected end of condition")]
    UnexpectedEnd,

    #[error("field '{0}' is not present on the document")]
    UndefinedField(String),

    #[error("right-hand side of 'in' must be a list")]
    NonListMembership,
}

/// Errors persisting the locally cached identity descriptor.
///
/// Load failures are not errors: a missing or corrupt cache reads as
/// logged-out.
#[derive(Debug, Error)]
pub enum IdentityError {
    #[error("cannot write identity cache: {source}")]
    Write {
        #[source]
        source: std::io::Error,
    },

    #[error("cannot encode identity cache: {source}")]
    Encode {
        #[source]
        source: serde_json::Error,
    },
}

/// Single shape violation from boundary validation, with path context.
#[derive(Debug, Clone, serde::Serialize)]
pub struct ShapeViolation {
    /// JSON Pointer (RFC 6901) to the offending field.
    pub path: String,
    /// Human-readable message.
    pub message: String,
}

impl std::fmt::Display for ShapeViolation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.path, self.message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn client_error_display_matches_taxonomy() {
        assert_eq!(ClientError::Unauthorized.to_string(), "Unauthorized");
        assert_eq!(
            ClientError::PermissionDenied.to_string(),
            "Permission Denied"
        );
        assert_eq!(ClientError::NotFound.to_string(), "Document not found");
        let err = ClientError::RequestFailed {
            message: "boom".into(),
        };
        assert_eq!(err.to_string(), "boom");
    }

    #[test]
    fn client_error_exit_codes() {
        assert_eq!(ClientError::Unauthorized.exit_code(), 1);
        assert_eq!(ClientError::PermissionDenied.exit_code(), 1);
        assert_eq!(ClientError::NotFound.exit_code(), 2);
        assert_eq!(
            ClientError::RequestFailed {
                message: "x".into()
            }
            .exit_code(),
            3
        );
    }

    #[test]
    fn server_messages_double_decoded_and_joined() {
        let body = json!({
            "_server_messages":
                "[\"{\\\"message\\\": \\\"Name is required\\\"}\", \"{\\\"message\\\": \\\"Status invalid\\\"}\"]"
        });
        assert_eq!(
            server_error_message(&body).as_deref(),
            Some("Name is required, Status invalid")
        );
    }

    #[test]
    fn server_messages_malformed_falls_back_to_message() {
        let body = json!({
            "_server_messages": "not json at all",
            "message": "fallback text"
        });
        assert_eq!(
            server_error_message(&body).as_deref(),
            Some("fallback text")
        );
    }

    #[test]
    fn exception_used_when_message_absent() {
        let body = json!({ "exception": "backend.exceptions.ValidationError" });
        assert_eq!(
            server_error_message(&body).as_deref(),
            Some("backend.exceptions.ValidationError")
        );
    }

    #[test]
    fn non_string_message_is_json_encoded() {
        let body = json!({ "message": { "code": 17 } });
        assert_eq!(
            server_error_message(&body).as_deref(),
            Some(r#"{"code":17}"#)
        );
    }

    #[test]
    fn empty_body_yields_none() {
        assert_eq!(server_error_message(&json!({})), None);
    }

    #[test]
    fn request_failed_uses_fallback() {
        let err = ClientError::request_failed(None, "Failed to save");
        assert_eq!(err.to_string(), "Failed to save");
    }

    #[test]
    fn shape_violation_display() {
        let v = ShapeViolation {
            path: "/carbon_credits".into(),
            message: "expected integer, got string".into(),
        };
        assert_eq!(
            v.to_string(),
            "/carbon_credits: expected integer, got string"
        );
    }
}
