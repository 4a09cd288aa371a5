//! Error types for Parley.

use crate::stage::{GateKey, Stage};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Details of a stage transition that could not happen.
///
/// A blocked transition always names what is missing: the caller's own
/// unsatisfied gates and/or the fact that the partner has not completed
/// the same stage. The partner's gate map is never included.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StageBlocked {
    pub stage: Stage,
    pub unsatisfied_gates: Vec<GateKey>,
    pub partner_completed: bool,
}

impl std::fmt::Display for StageBlocked {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "stage {} blocked", self.stage.ordinal())?;
        if !self.unsatisfied_gates.is_empty() {
            let keys: Vec<String> = self.unsatisfied_gates.iter().map(|k| k.to_string()).collect();
            write!(f, "; unsatisfied gates: {}", keys.join(", "))?;
        }
        if !self.partner_completed {
            write!(f, "; partner has not completed this stage")?;
        }
        Ok(())
    }
}

/// The shared error type for the Parley workspace.
#[derive(Error, Debug, Clone, Serialize)]
pub enum ParleyError {
    /// Malformed input (unknown gate key, empty content, ...). User-correctable.
    #[error("Validation error: {0}")]
    Validation(String),

    /// No such entity, or the caller is not a member of the session.
    #[error("Entity not found: {entity_type} '{id}'")]
    NotFound {
        entity_type: &'static str,
        id: String,
    },

    /// The action is invalid for the entity's current state.
    #[error("Conflict: {message} (current state: {current_state})")]
    Conflict {
        message: String,
        current_state: String,
    },

    /// A stage transition was requested before its conditions hold.
    #[error("{0}")]
    StageBlocked(StageBlocked),

    /// An external capability (judgment, delivery) failed.
    #[error("Dependency error: {0}")]
    Dependency(String),

    /// Repository/storage layer error
    #[error("Data access error: {0}")]
    DataAccess(String),

    /// Serialization/deserialization error
    #[error("Serialization error: {format} - {message}")]
    Serialization { format: String, message: String },

    /// IO error (file system operations)
    #[error("IO error: {message}")]
    Io { message: String },

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Internal error (should not happen in normal operation)
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Transport-facing classification of a [`ParleyError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Validation,
    NotFound,
    Conflict,
    Dependency,
    Internal,
}

impl ParleyError {
    // ============================================================================
    // Constructor helpers
    // ============================================================================

    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub fn not_found(entity_type: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound {
            entity_type,
            id: id.into(),
        }
    }

    pub fn conflict(message: impl Into<String>, current_state: impl ToString) -> Self {
        Self::Conflict {
            message: message.into(),
            current_state: current_state.to_string(),
        }
    }

    pub fn dependency(message: impl Into<String>) -> Self {
        Self::Dependency(message.into())
    }

    pub fn data_access(message: impl Into<String>) -> Self {
        Self::DataAccess(message.into())
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    // ============================================================================
    // Classification
    // ============================================================================

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Validation(_) => ErrorKind::Validation,
            Self::NotFound { .. } => ErrorKind::NotFound,
            Self::Conflict { .. } | Self::StageBlocked(_) => ErrorKind::Conflict,
            Self::Dependency(_) => ErrorKind::Dependency,
            Self::DataAccess(_)
            | Self::Serialization { .. }
            | Self::Io { .. }
            | Self::Config(_)
            | Self::Internal(_) => ErrorKind::Internal,
        }
    }

    /// HTTP-style status code for whatever transport sits in front of the core.
    pub fn status_code(&self) -> u16 {
        match self.kind() {
            ErrorKind::Validation => 400,
            ErrorKind::NotFound => 404,
            ErrorKind::Conflict => 409,
            ErrorKind::Dependency => 503,
            ErrorKind::Internal => 500,
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict { .. } | Self::StageBlocked(_))
    }

    pub fn is_validation(&self) -> bool {
        matches!(self, Self::Validation(_))
    }
}

// ============================================================================
// From implementations for automatic conversion
// ============================================================================

impl From<std::io::Error> for ParleyError {
    fn from(err: std::io::Error) -> Self {
        Self::Io {
            message: format!("{} (kind: {:?})", err, err.kind()),
        }
    }
}

impl From<serde_json::Error> for ParleyError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization {
            format: "JSON".to_string(),
            message: err.to_string(),
        }
    }
}

impl From<toml::de::Error> for ParleyError {
    fn from(err: toml::de::Error) -> Self {
        Self::Serialization {
            format: "TOML".to_string(),
            message: err.to_string(),
        }
    }
}

impl From<toml::ser::Error> for ParleyError {
    fn from(err: toml::ser::Error) -> Self {
        Self::Serialization {
            format: "TOML".to_string(),
            message: err.to_string(),
        }
    }
}

impl From<StageBlocked> for ParleyError {
    fn from(blocked: StageBlocked) -> Self {
        Self::StageBlocked(blocked)
    }
}

/// A type alias for `Result<T, ParleyError>`.
pub type Result<T> = std::result::Result<T, ParleyError>;
