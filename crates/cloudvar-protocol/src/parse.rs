//! Parsing inbound text frames into requests.

use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use thiserror::Error;

/// Field naming the method of an inbound request.
pub const METHOD_KEY: &str = "method";

/// Errors for frames that do not form a valid request.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    #[error("Malformed JSON: {0}")]
    Malformed(String),

    #[error("Request is not a JSON object")]
    NotAnObject,

    #[error("Request has no 'method' field")]
    MissingMethod,

    #[error("Unknown method: {0}")]
    UnknownMethod(String),

    #[error("Invalid arguments for '{method}': {reason}")]
    InvalidArguments { method: String, reason: String },
}

/// A decoded request: the method name and the remaining fields.
#[derive(Debug, Clone, PartialEq)]
pub struct RawRequest {
    pub method: String,
    pub args: Map<String, Value>,
}

impl RawRequest {
    /// Decodes one text frame.
    ///
    /// The `method` field is removed from the argument map. Whether the
    /// method is known is left to the dispatcher.
    ///
    /// # Errors
    ///
    /// Returns a `ProtocolError` if the frame is not a JSON object with a
    /// string `method` field.
    pub fn parse(text: &str) -> Result<Self, ProtocolError> {
        let value: Value =
            serde_json::from_str(text).map_err(|e| ProtocolError::Malformed(e.to_string()))?;
        Self::from_value(value)
    }

    /// Decodes an already-parsed JSON value.
    ///
    /// # Errors
    ///
    /// Same as [`RawRequest::parse`].
    pub fn from_value(value: Value) -> Result<Self, ProtocolError> {
        let Value::Object(mut args) = value else {
            return Err(ProtocolError::NotAnObject);
        };

        let method = match args.remove(METHOD_KEY) {
            Some(Value::String(method)) => method,
            _ => return Err(ProtocolError::MissingMethod),
        };

        Ok(Self { method, args })
    }

    /// Deserializes the arguments into the method's typed form.
    ///
    /// Unknown fields are ignored.
    ///
    /// # Errors
    ///
    /// Returns `ProtocolError::InvalidArguments` if a required field is
    /// missing or has the wrong type.
    pub fn args<T: DeserializeOwned>(&self) -> Result<T, ProtocolError> {
        serde_json::from_value(Value::Object(self.args.clone())).map_err(|e| {
            ProtocolError::InvalidArguments {
                method: self.method.clone(),
                reason: e.to_string(),
            }
        })
    }
}
