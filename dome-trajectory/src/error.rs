//! Error types for configuration and operator commands.

use std::path::PathBuf;

use strum::Display;
use thiserror::Error;

use crate::controller::{LifecycleCommand, SummaryState};

/// Coarse classification of a [`ConfigurationError`], reported to operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
pub enum ConfigErrorKind {
    NotFound,
    Malformed,
    UnknownAlgorithm,
    InvalidParameter,
    Io,
}

/// Reasons a configuration cannot be loaded or validated.
///
/// All of these are recoverable: the controller stays in Standby and the
/// operator may retry `start` with a corrected selector.
#[derive(Error, Debug)]
pub enum ConfigurationError {
    /// No document with this selector exists in the configuration store.
    #[error("configuration {selector:?} not found in {}", dir.display())]
    NotFound { selector: String, dir: PathBuf },

    /// The document could not be parsed or has the wrong shape.
    #[error("malformed configuration: {0}")]
    Malformed(String),

    /// The document names an algorithm that is not registered.
    #[error("unknown algorithm {name:?}; registered algorithms: {known}")]
    UnknownAlgorithm { name: String, known: String },

    /// The algorithm rejected its parameters.
    #[error("invalid parameters for algorithm {algorithm:?}: {message}")]
    InvalidParameter { algorithm: String, message: String },

    /// The document exists but could not be read.
    #[error("failed to read configuration {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl ConfigurationError {
    pub fn kind(&self) -> ConfigErrorKind {
        match self {
            Self::NotFound { .. } => ConfigErrorKind::NotFound,
            Self::Malformed(_) => ConfigErrorKind::Malformed,
            Self::UnknownAlgorithm { .. } => ConfigErrorKind::UnknownAlgorithm,
            Self::InvalidParameter { .. } => ConfigErrorKind::InvalidParameter,
            Self::Io { .. } => ConfigErrorKind::Io,
        }
    }
}

/// Failure of an operator command.
#[derive(Error, Debug)]
pub enum CommandError {
    /// The command is not legal in the current summary state.
    #[error("{command} is not allowed in state {state}")]
    InvalidTransition {
        command: LifecycleCommand,
        state: SummaryState,
    },

    /// `start` was given a configuration that could not be used.
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),

    /// The controller has exited control, or its task has stopped.
    #[error("controller is offline")]
    Offline,

    /// Internal consistency failure; the controller has gone to Fault.
    #[error("invariant violation: {0}")]
    InvariantViolation(String),
}

impl CommandError {
    /// Configuration error kind, if this is a configuration failure.
    pub fn config_kind(&self) -> Option<ConfigErrorKind> {
        match self {
            Self::Configuration(e) => Some(e.kind()),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_kind() {
        let err = CommandError::from(ConfigurationError::UnknownAlgorithm {
            name: "lead".to_string(),
            known: "simple".to_string(),
        });
        assert_eq!(err.config_kind(), Some(ConfigErrorKind::UnknownAlgorithm));
        assert!(err.to_string().contains("lead"));

        assert_eq!(CommandError::Offline.config_kind(), None);
    }

    #[test]
    fn test_invalid_transition_message() {
        let err = CommandError::InvalidTransition {
            command: LifecycleCommand::Enable,
            state: SummaryState::Standby,
        };
        assert_eq!(err.to_string(), "enable is not allowed in state Standby");
    }
}
