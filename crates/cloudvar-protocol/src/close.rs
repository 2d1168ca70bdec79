//! Close codes sent when the server ends a connection.

use std::fmt;

/// Numeric WebSocket close status used by the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CloseCode {
    /// Malformed frame, missing or unknown method, bad arguments.
    ProtocolError,

    /// Handshake denied by policy, or lookup of an unknown variable.
    Forbidden,

    /// Value longer than the configured size limit.
    ValueTooLarge,
}

impl CloseCode {
    /// The numeric status sent in the close frame.
    pub const fn code(self) -> u16 {
        match self {
            Self::ProtocolError => 4000,
            Self::Forbidden => 4003,
            Self::ValueTooLarge => 4004,
        }
    }

    /// Short human-readable reason sent alongside the code.
    pub const fn reason(self) -> &'static str {
        match self {
            Self::ProtocolError => "protocol error",
            Self::Forbidden => "forbidden",
            Self::ValueTooLarge => "value too large",
        }
    }

    /// Maps a numeric status back to a close code.
    pub fn from_code(code: u16) -> Option<Self> {
        match code {
            4000 => Some(Self::ProtocolError),
            4003 => Some(Self::Forbidden),
            4004 => Some(Self::ValueTooLarge),
            _ => None,
        }
    }
}

impl fmt::Display for CloseCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.code(), self.reason())
    }
}

impl From<CloseCode> for u16 {
    fn from(code: CloseCode) -> Self {
        code.code()
    }
}
