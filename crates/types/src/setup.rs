// crates/types/src/setup.rs
//! Responses of the setup-step endpoints (`get_uid`, `validate_locations`).

use serde::Deserialize;
use serde_json::Value;

use crate::error::{json_kind, PayloadError};

/// `get_uid` response.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct UidResponse {
    pub uid: String,
}

#[derive(Debug, Deserialize)]
struct LocationCode {
    code: i64,
    #[serde(default)]
    message: String,
}

/// Outcome of `validate_locations`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocationCheck {
    pub valid: bool,
    pub messages: Vec<String>,
}

/// The server answers with a bare object on success and a list of coded
/// messages on failure.
pub fn parse_location_check(body: Value) -> Result<LocationCheck, PayloadError> {
    let codes: Vec<LocationCode> = match body {
        Value::Array(_) => serde_json::from_value(body)
            .map_err(|e| PayloadError::malformed("location check", e))?,
        Value::Object(_) => vec![serde_json::from_value(body)
            .map_err(|e| PayloadError::malformed("location check", e))?],
        other => {
            return Err(PayloadError::UnexpectedShape {
                expected: "location check object or array",
                found: json_kind(&other),
            })
        }
    };
    Ok(LocationCheck {
        valid: !codes.is_empty() && codes.iter().all(|c| c.code == 0),
        messages: codes.into_iter().map(|c| c.message).collect(),
    })
}
