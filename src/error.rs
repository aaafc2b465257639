//! Error handling module for procrunner
//!
//! Two error families live here:
//!
//! - [`ProcedureError`]: the domain taxonomy carried by results while a
//!   procedure runs (abort, stop, constraint violations, unexpected faults).
//! - [`ProcrunnerError`]: crate-level failures outside a run (reading
//!   definition files, writing reports).

use serde::{Deserialize, Serialize};
use serde_json::Value;
use strum::{Display, EnumIter, EnumString};
use thiserror::Error;

use crate::constraint::ConstraintSnapshot;

/// Renders an optional path stack as ` at a.b.c`, or nothing.
fn at_path(path_stack: &Option<Vec<String>>) -> String {
    match path_stack {
        Some(path) if !path.is_empty() => format!(" at {}", path.join(".")),
        _ => String::new(),
    }
}

/// Kind of a [`ProcedureError`], without its payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, EnumIter)]
#[strum(serialize_all = "snake_case")]
pub enum ErrorKind {
    Abort,
    Stop,
    ChildFailed,
    ConstraintViolation,
    MissingUi,
    Unexpected,
}

/// Errors attached to results during a procedure run.
///
/// Abort and Stop are "hard": they bubble unchanged through every enclosing
/// level until the root. Every other kind stays local to the step or level
/// that produced it.
#[derive(Error, Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ProcedureError {
    /// Operator-requested termination of the whole run
    #[error("Procedure aborted{}", at_path(.path_stack))]
    Abort {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        path_stack: Option<Vec<String>>,
    },

    /// A critical step failed; the whole run must stop
    #[error("Procedure stopped{}", at_path(.path_stack))]
    Stop {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        path_stack: Option<Vec<String>>,
    },

    /// A child level failed. Never raised by the engine itself.
    #[error("One of child item failed{}", at_path(.path_stack))]
    ChildFailed {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        path_stack: Option<Vec<String>>,
    },

    /// A measured value did not satisfy its constraint
    #[error("Value {value} does not satisfy constraint {constraint} at {}", .path_stack.join("."))]
    ConstraintViolation {
        constraint: ConstraintSnapshot,
        value: Value,
        path_stack: Vec<String>,
    },

    /// An interactive collaborator could not supply a required value
    #[error("Missing user interface: {message}{}", at_path(.path_stack))]
    MissingUi {
        message: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        path_stack: Option<Vec<String>>,
    },

    /// Anything else: programming errors, missing stored values, bad definitions
    #[error("{message}")]
    Unexpected {
        message: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        path_stack: Option<Vec<String>>,
    },
}

/// An empty path stack is stored as no path at all.
fn snapshot(path: &[String]) -> Option<Vec<String>> {
    if path.is_empty() { None } else { Some(path.to_vec()) }
}

impl ProcedureError {
    /// Create an abort error raised at `path`
    pub fn abort(path: &[String]) -> Self {
        Self::Abort { path_stack: snapshot(path) }
    }

    /// Create a stop error raised at `path`
    pub fn stop(path: &[String]) -> Self {
        Self::Stop { path_stack: snapshot(path) }
    }

    /// Create a child-failed error raised at `path`
    pub fn child_failed(path: &[String]) -> Self {
        Self::ChildFailed { path_stack: snapshot(path) }
    }

    /// Create a constraint violation for `value` measured at `path`
    pub fn constraint_violation(constraint: ConstraintSnapshot, value: Value, path: &[String]) -> Self {
        Self::ConstraintViolation {
            constraint,
            value,
            path_stack: path.to_vec(),
        }
    }

    /// Create a missing-UI error raised at `path`
    pub fn missing_ui(message: impl Into<String>, path: &[String]) -> Self {
        Self::MissingUi {
            message: message.into(),
            path_stack: snapshot(path),
        }
    }

    /// Create an unexpected error raised at `path`
    pub fn unexpected(message: impl Into<String>, path: &[String]) -> Self {
        Self::Unexpected {
            message: message.into(),
            path_stack: snapshot(path),
        }
    }

    /// Classify an error coming out of user code.
    ///
    /// Domain errors raised by a step body (e.g. `Err(ProcedureError::abort(..).into())`)
    /// are recovered unchanged; anything else becomes `Unexpected` with the
    /// full context chain as message.
    pub fn from_anyhow(err: anyhow::Error, path: &[String]) -> Self {
        match err.downcast::<ProcedureError>() {
            Ok(domain) => domain,
            Err(other) => Self::unexpected(format!("{other:#}"), path),
        }
    }

    /// Returns the kind of this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Abort { .. } => ErrorKind::Abort,
            Self::Stop { .. } => ErrorKind::Stop,
            Self::ChildFailed { .. } => ErrorKind::ChildFailed,
            Self::ConstraintViolation { .. } => ErrorKind::ConstraintViolation,
            Self::MissingUi { .. } => ErrorKind::MissingUi,
            Self::Unexpected { .. } => ErrorKind::Unexpected,
        }
    }

    /// Returns true for errors that terminate the whole run (Abort, Stop)
    #[inline]
    pub fn is_hard(&self) -> bool {
        matches!(self, Self::Abort { .. } | Self::Stop { .. })
    }

    /// Returns true for every kind except `Unexpected`
    #[inline]
    pub fn is_domain(&self) -> bool {
        !matches!(self, Self::Unexpected { .. })
    }

    /// Path stack at which the error was raised, if recorded
    pub fn path_stack(&self) -> Option<&[String]> {
        match self {
            Self::Abort { path_stack }
            | Self::Stop { path_stack }
            | Self::ChildFailed { path_stack }
            | Self::MissingUi { path_stack, .. }
            | Self::Unexpected { path_stack, .. } => path_stack.as_deref(),
            Self::ConstraintViolation { path_stack, .. } => Some(path_stack),
        }
    }
}

/// Crate-level error type for everything outside a procedure run
#[derive(Error, Debug)]
pub enum ProcrunnerError {
    /// IO errors (definition files, report files)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Procedure definition problems (shape, unknown step types, duplicate ids)
    #[error("Definition error: {0}")]
    Definition(String),

    /// Report generation errors
    #[error("Report error: {0}")]
    Report(String),
}

/// Result type alias for crate-level operations
pub type Result<T> = std::result::Result<T, ProcrunnerError>;

impl ProcrunnerError {
    /// Create a definition error
    pub fn definition(msg: impl Into<String>) -> Self {
        Self::Definition(msg.into())
    }

    /// Create a report error
    pub fn report(msg: impl Into<String>) -> Self {
        Self::Report(msg.into())
    }
}
