//! Frame encoding of the remote driver protocol.
//!
//! ```text
//! client -> host   {"id":1,"method":"getBlock","args":["best"]}
//! host -> client    {"id":1,"result":{...}}
//! host -> client    {"id":1,"error":{"message":"...","kind":"closed"}}
//! host -> client    {"method":"head","args":[{...}]}
//! ```
//!
//! Frames sent by the host carry exactly one leading space, so each side can
//! tell a misrouted frame from a malformed one.

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use thiserror::Error;

use crate::driver::DriverError;

/// Prefix of every host -> client frame.
pub const HOST_FRAME_MARKER: char = ' ';

#[derive(Debug, Error)]
pub enum WireError {
    #[error("invalid frame JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("malformed frame: {0}")]
    Malformed(&'static str),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Request {
    pub id: u64,
    pub method: String,
    #[serde(default)]
    pub args: Vec<Value>,
}

/// Error body of a failed response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub message: String,
    pub kind: String,
}

impl From<&DriverError> for ErrorBody {
    fn from(err: &DriverError) -> Self {
        Self { message: err.to_string(), kind: err.kind().to_string() }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Response {
    pub id: u64,
    pub outcome: Result<Value, ErrorBody>,
}

impl Response {
    #[must_use]
    pub fn ok(id: u64, result: Value) -> Self {
        Self { id, outcome: Ok(result) }
    }

    #[must_use]
    pub fn error(id: u64, err: &DriverError) -> Self {
        Self { id, outcome: Err(err.into()) }
    }

    /// Response for a failure of the protocol itself rather than of a driver call.
    #[must_use]
    pub fn protocol_error(id: u64, message: &str) -> Self {
        Self {
            id,
            outcome: Err(ErrorBody { message: message.to_string(), kind: "protocol".to_string() }),
        }
    }

    /// Converts the outcome back into a driver result.
    ///
    /// # Errors
    ///
    /// Returns the error the host reported.
    pub fn into_result(self) -> Result<Value, DriverError> {
        self.outcome.map_err(|body| DriverError::from_remote(&body.kind, body.message))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub method: String,
    #[serde(default)]
    pub args: Vec<Value>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    Request(Request),
    Response(Response),
    Notification(Notification),
}

impl Frame {
    /// Returns `true` for frames travelling host -> client.
    #[must_use]
    pub fn is_from_host(&self) -> bool {
        !matches!(self, Self::Request(_))
    }

    #[must_use]
    pub fn encode(&self) -> String {
        let body = match self {
            Self::Request(request) => json!(request),
            Self::Notification(notification) => json!(notification),
            Self::Response(Response { id, outcome: Ok(result) }) => {
                json!({ "id": id, "result": result })
            }
            Self::Response(Response { id, outcome: Err(error) }) => {
                json!({ "id": id, "error": error })
            }
        };

        if self.is_from_host() { format!("{HOST_FRAME_MARKER}{body}") } else { body.to_string() }
    }

    /// Decodes one frame.
    ///
    /// # Errors
    ///
    /// Returns [`WireError`] for invalid JSON or a frame shape that does not
    /// match its direction marker.
    pub fn decode(text: &str) -> Result<Self, WireError> {
        if let Some(body) = text.strip_prefix(HOST_FRAME_MARKER) {
            let mut object = parse_object(body)?;
            return match object.remove("id") {
                Some(id) => {
                    let id = id.as_u64().ok_or(WireError::Malformed("response id"))?;
                    let outcome = match object.remove("error") {
                        Some(error) => Err(serde_json::from_value(error)?),
                        None => Ok(object.remove("result").unwrap_or(Value::Null)),
                    };
                    Ok(Self::Response(Response { id, outcome }))
                }
                None => Ok(Self::Notification(serde_json::from_value(Value::Object(object))?)),
            };
        }

        let object = parse_object(text)?;
        if !object.contains_key("id") {
            return Err(WireError::Malformed("request without id"));
        }
        Ok(Self::Request(serde_json::from_value(Value::Object(object))?))
    }
}

fn parse_object(text: &str) -> Result<Map<String, Value>, WireError> {
    match serde_json::from_str(text)? {
        Value::Object(object) => Ok(object),
        _ => Err(WireError::Malformed("frame is not an object")),
    }
}
