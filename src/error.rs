//! Unified error type for controller and settings operations.
//!
//! `AppError` is the single error type returned by every user-facing operation.
//! It serializes as `{ "kind": "...", "message": "..." }` so a front end can
//! programmatically distinguish error categories.

use serde::ser::SerializeStruct;

use crate::settings::ConfigError;

/// Application-level error returned by controller and settings operations.
///
/// Each variant maps to a distinct failure domain. A front end receives a JSON
/// object with `kind` (variant name) and `message` (human-readable description).
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    /// Settings could not be read, validated, or written.
    #[error("{0}")]
    Config(String),

    /// I/O and OS-level errors (filesystem, thread spawning).
    #[error("{0}")]
    Io(String),

    /// Invalid or missing user input.
    #[error("{0}")]
    InvalidInput(String),

    /// The operation is not allowed in the current lifecycle state.
    #[error("{0}")]
    InvalidState(String),

    /// The worker did not exit within the shutdown bound after a stop request.
    #[error("{0}")]
    UnresponsiveShutdown(String),
}

impl AppError {
    /// Returns the error kind as a string matching the variant name.
    pub fn kind(&self) -> &'static str {
        match self {
            AppError::Config(_) => "Config",
            AppError::Io(_) => "Io",
            AppError::InvalidInput(_) => "InvalidInput",
            AppError::InvalidState(_) => "InvalidState",
            AppError::UnresponsiveShutdown(_) => "UnresponsiveShutdown",
        }
    }
}

/// Custom Serialize: produces `{ "kind": "Variant", "message": "..." }` for the front end.
impl serde::Serialize for AppError {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        let mut s = serializer.serialize_struct("AppError", 2)?;
        s.serialize_field("kind", self.kind())?;
        s.serialize_field("message", &self.to_string())?;
        s.end()
    }
}

// ---- From implementations for ergonomic error conversion ----

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        AppError::Io(err.to_string())
    }
}

impl From<ConfigError> for AppError {
    fn from(err: ConfigError) -> Self {
        match err {
            ConfigError::Io(e) => AppError::Io(e.to_string()),
            ConfigError::InvalidField { .. } => AppError::InvalidInput(err.to_string()),
            other => AppError::Config(other.to_string()),
        }
    }
}
