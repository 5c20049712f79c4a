//! Wire Protocol
//!
//! JSON messages exchanged over text frames.
//!
//! ```text
//! Request:  { "type": "ping"|"dig", "parameters": { ... }, "id"?: string }
//! Response: { "id"?: string, "output": string }
//!           { "id"?: string, "error": string, "field"?: string }
//!           { "id"?: string, "done": "ping"|"dig" }
//! ```
//!
//! Each response carries exactly one of `output`, `error` or `done`. A command
//! produces zero or more `output` responses followed by either one `done`
//! (success) or one `error` (failure).

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ProbeError;
use crate::probe::ProbeKind;

/// A decoded client request.
///
/// Transient: it only lives until the dispatcher has validated it.
#[derive(Debug, Clone, Deserialize)]
pub struct CommandRequest {
    /// Probe kind as sent by the client (`ping`, `dig`)
    #[serde(rename = "type")]
    pub kind: String,

    /// Untyped parameter bag; validated against the schema of `kind`
    #[serde(default)]
    pub parameters: Value,

    /// Optional client-chosen id echoed on every response for this command
    #[serde(default)]
    pub id: Option<String>,
}

impl CommandRequest {
    /// Decode a frame payload
    pub fn decode(payload: &[u8]) -> Result<Self, ProbeError> {
        serde_json::from_slice(payload)
            .map_err(|e| ProbeError::Protocol(format!("invalid request payload: {}", e)))
    }
}

/// Body of a response frame
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseBody {
    /// A chunk of raw probe output
    Output(String),
    /// A failure; terminal for the command it belongs to
    Error(String),
    /// Successful completion marker, carrying the probe kind
    Done(String),
}

/// One outbound frame
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CommandResponse {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    #[serde(flatten)]
    pub body: ResponseBody,

    /// Offending field for validation errors
    #[serde(skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
}

impl CommandResponse {
    pub fn output(id: Option<String>, chunk: String) -> Self {
        Self {
            id,
            body: ResponseBody::Output(chunk),
            field: None,
        }
    }

    pub fn error(id: Option<String>, error: &ProbeError) -> Self {
        Self {
            id,
            field: error.field().map(str::to_string),
            body: ResponseBody::Error(error.to_string()),
        }
    }

    pub fn done(id: Option<String>, kind: ProbeKind) -> Self {
        Self {
            id,
            body: ResponseBody::Done(kind.as_str().to_string()),
            field: None,
        }
    }

    #[cfg(test)]
    pub fn is_error(&self) -> bool {
        matches!(self.body, ResponseBody::Error(_))
    }

    /// Serialize to the text frame payload
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ValidationError;
    use serde_json::json;

    #[test]
    fn test_decode_request() {
        let request = CommandRequest::decode(
            br#"{"type":"ping","parameters":{"target":"127.0.0.1","count":1}}"#,
        )
        .unwrap();

        assert_eq!(request.kind, "ping");
        assert_eq!(request.parameters["count"], 1);
        assert_eq!(request.id, None);
    }

    #[test]
    fn test_decode_ignores_legacy_command_field() {
        let request = CommandRequest::decode(
            br#"{"type":"dig","command":"dig","parameters":{},"id":"q1"}"#,
        )
        .unwrap();

        assert_eq!(request.kind, "dig");
        assert_eq!(request.id.as_deref(), Some("q1"));
    }

    #[test]
    fn test_decode_malformed_is_protocol_error() {
        let payloads: [&[u8]; 3] = [b"not json", br#"{"parameters":{}}"#, br#"[1,2]"#];
        for payload in payloads {
            let err = CommandRequest::decode(payload).unwrap_err();
            assert!(matches!(err, ProbeError::Protocol(_)));
            assert!(err.to_string().starts_with("protocol error:"));
        }
    }

    #[test]
    fn test_output_response_has_single_key() {
        let response = CommandResponse::output(None, "64 bytes from 127.0.0.1\n".into());
        let value: Value = serde_json::from_str(&response.to_json().unwrap()).unwrap();
        assert_eq!(value, json!({"output": "64 bytes from 127.0.0.1\n"}));
    }

    #[test]
    fn test_validation_error_response_carries_field() {
        let err: ProbeError = ValidationError::new("count", "count must be between 1 and 30").into();
        let response = CommandResponse::error(Some("7".into()), &err);
        let value: Value = serde_json::from_str(&response.to_json().unwrap()).unwrap();

        assert!(response.is_error());
        assert_eq!(
            value,
            json!({
                "id": "7",
                "error": "count: count must be between 1 and 30",
                "field": "count"
            })
        );
    }

    #[test]
    fn test_done_response() {
        let response = CommandResponse::done(None, ProbeKind::Dig);
        let value: Value = serde_json::from_str(&response.to_json().unwrap()).unwrap();
        assert_eq!(value, json!({"done": "dig"}));
    }
}
