//! Messages exchanged between the host and an execution context, as JSON.
//!
//! Host to context: `{"type":"exec","payload":"<script>"}`.
//! Context to host: zero or more `{"type":"log","level":..,"message":..}`
//! followed by exactly one `{"type":"done"}` or `{"type":"error","message":..}`.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Log,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            LogLevel::Log => "log",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum HostMessage {
    Exec { payload: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ContextMessage {
    Log {
        level: LogLevel,
        message: String,
    },
    Done {
        /// Formatted value of a top-level `return`, if any.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        value: Option<String>,
    },
    Error {
        message: String,
    },
}

impl ContextMessage {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, ContextMessage::Log { .. })
    }
}

pub fn encode<T: Serialize>(message: &T) -> String {
    // these enums only hold strings, serialization cannot fail
    serde_json::to_string(message).unwrap_or_default()
}

pub fn decode<'a, T: Deserialize<'a>>(text: &'a str) -> Result<T, serde_json::Error> {
    serde_json::from_str(text)
}

#[cfg(test)]
#[path = "../../../tests/unit/kernel/sandbox/protocol.rs"]
mod tests;
