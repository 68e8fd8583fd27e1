//! Unified error handling for the SNMP transport.
//!
//! Every failure that can surface to a caller or be reported as a
//! per-device error event is expressed through [`Error`]. Payloads are
//! plain strings so the same error can be logged, returned and forwarded
//! downstream without losing information.

/// Unified error type for the SNMP transport.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    /// Invalid or unsupported configuration (protocol version, missing
    /// mapping, missing communication config, invalid address).
    #[error("Configuration error: {0}")]
    Config(String),

    /// Send failures and errors reported by the protocol library.
    #[error("Transport error: {0}")]
    Transport(String),

    /// A read request was not answered before the library timeout.
    #[error("No response from device")]
    NoResponse,

    /// A response was received but carried no usable values.
    #[error("No values in the response")]
    EmptyResponse,

    /// A raw value could not be cast to its declared datatype.
    #[error("Type cast error: {0}")]
    TypeCast(String),

    /// Device, session or profile lookups that came back empty.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Serialization/deserialization errors.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Failures inside collaborators or the runtime.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Whether the error is a configuration error, fatal to the operation
    /// that raised it and never retried.
    pub fn is_config(&self) -> bool {
        matches!(self, Self::Config(_))
    }
}

/// Result type alias for convenience.
pub type Result<T> = std::result::Result<T, Error>;

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

impl From<toml::de::Error> for Error {
    fn from(err: toml::de::Error) -> Self {
        Self::Config(err.to_string())
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Self::Internal(err.to_string())
    }
}

/// Convenience macros for creating errors.
#[macro_export]
macro_rules! config_err {
    ($msg:expr) => {
        $crate::error::Error::Config($msg.into())
    };
    ($fmt:expr, $($arg:tt)*) => {
        $crate::error::Error::Config(format!($fmt, $($arg)*))
    };
}

#[macro_export]
macro_rules! transport_err {
    ($msg:expr) => {
        $crate::error::Error::Transport($msg.into())
    };
    ($fmt:expr, $($arg:tt)*) => {
        $crate::error::Error::Transport(format!($fmt, $($arg)*))
    };
}
