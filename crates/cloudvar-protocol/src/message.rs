//! Protocol message types for cloud variable clients.
//!
//! Inbound requests are JSON objects with a `method` field plus
//! method-specific fields. Field names follow the established cloud
//! protocol (`project_id`, `new_name`, `server`); the longer aliases
//! (`project`, `newName`, `serverEcho`) are accepted as well. The sender's
//! address is never read from the payload.

use std::fmt;
use std::str::FromStr;

use cloudvar_core::{Variable, VariableName};
use serde::{Deserialize, Deserializer, Serialize};

// ============================================================================
// Methods
// ============================================================================

/// Methods a client may invoke.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    Handshake,
    Create,
    Delete,
    Rename,
    Set,
}

impl Method {
    /// Every method, in dispatch-table order.
    pub const ALL: [Method; 5] = [
        Method::Handshake,
        Method::Create,
        Method::Delete,
        Method::Rename,
        Method::Set,
    ];

    /// Wire name of the method.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Handshake => "handshake",
            Self::Create => "create",
            Self::Delete => "delete",
            Self::Rename => "rename",
            Self::Set => "set",
        }
    }

    /// Returns true for methods that mutate the variable store.
    pub const fn is_mutating(self) -> bool {
        !matches!(self, Self::Handshake)
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Method {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|m| m.as_str() == s)
            .ok_or_else(|| s.to_string())
    }
}

// ============================================================================
// Request Arguments
// ============================================================================

/// Arguments for `handshake`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct HandshakeArgs {
    #[serde(alias = "project", deserialize_with = "lenient_string")]
    pub project_id: String,
    #[serde(deserialize_with = "lenient_string")]
    pub user: String,
}

/// Arguments for `create`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct CreateArgs {
    #[serde(alias = "project", deserialize_with = "lenient_string")]
    pub project_id: String,
    #[serde(deserialize_with = "lenient_string")]
    pub user: String,
    pub name: String,
    #[serde(deserialize_with = "lenient_string")]
    pub value: String,
}

/// Arguments for `delete`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct DeleteArgs {
    #[serde(alias = "project", deserialize_with = "lenient_string")]
    pub project_id: String,
    #[serde(deserialize_with = "lenient_string")]
    pub user: String,
    pub name: String,
}

/// Arguments for `rename`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RenameArgs {
    #[serde(alias = "project", deserialize_with = "lenient_string")]
    pub project_id: String,
    #[serde(deserialize_with = "lenient_string")]
    pub user: String,
    pub name: String,
    #[serde(alias = "newName")]
    pub new_name: String,
}

/// Arguments for `set`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SetArgs {
    #[serde(alias = "project", deserialize_with = "lenient_string")]
    pub project_id: String,
    #[serde(deserialize_with = "lenient_string")]
    pub user: String,
    pub name: String,
    #[serde(deserialize_with = "lenient_string")]
    pub value: String,
    /// Marks a server-originated echo; such requests are ignored.
    #[serde(default, alias = "serverEcho")]
    pub server: Option<serde_json::Value>,
}

impl SetArgs {
    /// Returns true if the echo flag is present and truthy.
    ///
    /// Truthiness: `null`, `false`, `0`, `""`, `[]` and `{}` are falsy.
    pub fn is_server_echo(&self) -> bool {
        use serde_json::Value;
        match &self.server {
            None | Some(Value::Null) => false,
            Some(Value::Bool(b)) => *b,
            Some(Value::Number(n)) => n.as_f64().is_some_and(|f| f != 0.0),
            Some(Value::String(s)) => !s.is_empty(),
            Some(Value::Array(a)) => !a.is_empty(),
            Some(Value::Object(o)) => !o.is_empty(),
        }
    }
}

/// Accepts a JSON string, number or boolean and keeps its string form.
///
/// Clients send numeric variable values and project ids unquoted.
fn lenient_string<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    use serde::de::Error;
    use serde_json::Value;

    match Value::deserialize(deserializer)? {
        Value::String(s) => Ok(s),
        Value::Number(n) => Ok(n.to_string()),
        Value::Bool(b) => Ok(b.to_string()),
        other => Err(D::Error::custom(format!(
            "expected a string, number or boolean, got {other}"
        ))),
    }
}

// ============================================================================
// Outbound Messages
// ============================================================================

/// Messages sent from the server to clients.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "method", rename_all = "lowercase")]
pub enum ServerMessage {
    /// A variable now holds `value`.
    Set { name: VariableName, value: String },
}

impl ServerMessage {
    /// Creates a `set` message for a variable.
    pub fn set(variable: &Variable) -> Self {
        Self::Set {
            name: variable.name.clone(),
            value: variable.value.clone(),
        }
    }
}
