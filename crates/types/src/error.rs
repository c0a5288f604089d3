// crates/types/src/error.rs
use thiserror::Error;

/// Errors raised while converting network payloads into typed values.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum PayloadError {
    #[error("Unparseable timestamp: {raw}")]
    InvalidTimestamp { raw: String },

    #[error("Non-finite {field} value for reference {reference}")]
    NonFinite { field: &'static str, reference: String },

    #[error("Malformed {what} payload: {message}")]
    Malformed { what: &'static str, message: String },

    #[error("Expected {expected}, got {found}")]
    UnexpectedShape {
        expected: &'static str,
        found: &'static str,
    },

    /// The server answered with a structured `{ "error": ... }` body.
    #[error("{0}")]
    ServerReported(String),

    /// The server answered with a non-200 application status code.
    #[error("Server returned status {status}")]
    Status { status: u16, message: Option<String> },
}

impl PayloadError {
    pub fn malformed(what: &'static str, err: impl std::fmt::Display) -> Self {
        Self::Malformed {
            what,
            message: err.to_string(),
        }
    }

    /// The server-supplied message, if this error carries one verbatim.
    pub fn server_message(&self) -> Option<&str> {
        match self {
            Self::ServerReported(msg) => Some(msg),
            Self::Status {
                message: Some(msg), ..
            } => Some(msg),
            _ => None,
        }
    }
}

/// Short name of a JSON value's kind, for shape errors.
pub(crate) fn json_kind(value: &serde_json::Value) -> &'static str {
    match value {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "boolean",
        serde_json::Value::Number(_) => "number",
        serde_json::Value::String(_) => "string",
        serde_json::Value::Array(_) => "array",
        serde_json::Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_server_message_only_for_server_errors() {
        assert_eq!(
            PayloadError::ServerReported("Coverage file not found".into()).server_message(),
            Some("Coverage file not found")
        );
        assert_eq!(
            PayloadError::Status {
                status: 404,
                message: Some("Couldn't find the analysis".into())
            }
            .server_message(),
            Some("Couldn't find the analysis")
        );
        assert_eq!(
            PayloadError::Status {
                status: 500,
                message: None
            }
            .server_message(),
            None
        );
        assert_eq!(
            PayloadError::malformed("coverage", "missing field").server_message(),
            None
        );
    }

    #[test]
    fn test_display() {
        let err = PayloadError::InvalidTimestamp { raw: "yesterday".into() };
        assert_eq!(err.to_string(), "Unparseable timestamp: yesterday");
    }
}
