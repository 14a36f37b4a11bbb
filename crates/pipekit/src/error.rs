//! Error types for Pipekit
//!
//! This module provides error types for the execution engine with the
//! following design goals:
//! - Human-readable messages that always name the offending path, signal,
//!   or option
//! - Clear categorization for programmatic handling
//! - A hard line between engine errors and ordinary command failure:
//!   a child that exits non-zero, dies on a signal, or cannot be spawned
//!   is a *status* (126/127/128+N), never an `Error`.

use thiserror::Error;

/// Result type alias using Pipekit's Error.
pub type Result<T> = std::result::Result<T, Error>;

/// Pipekit error types.
#[derive(Error, Debug)]
pub enum Error {
    /// A redirection target could not be opened.
    #[error("redirection error: {0}")]
    Redirection(#[from] RedirectionError),

    /// Trap registration or signal spec parsing failed.
    #[error("trap error: {0}")]
    Trap(#[from] TrapError),

    /// Shell option lookup failed.
    #[error("option error: {0}")]
    Option(#[from] OptionError),

    /// A command line could not be parsed into pipelines.
    #[error("parse error: {0}")]
    Parse(String),

    /// I/O error outside redirection resolution (e.g. a failed wait).
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Redirection resolution failures.
///
/// Raised while opening redirection targets, before any process in the
/// pipeline is spawned. Classification trusts the OS open result; there
/// is no pre-validation of paths.
#[derive(Error, Debug)]
pub enum RedirectionError {
    /// Input target does not exist.
    #[error("{path}: no such file or directory")]
    NotFound { path: String },

    /// Target exists but the session lacks access.
    #[error("{path}: permission denied")]
    PermissionDenied { path: String },

    /// Output target is a directory.
    #[error("{path}: is a directory")]
    IsADirectory { path: String },

    /// Open failed for a reason outside the taxonomy above.
    #[error("{path}: {source}")]
    Open {
        path: String,
        source: std::io::Error,
    },
}

impl RedirectionError {
    /// Classify an open failure, qualified by the target path.
    pub fn classify(path: &str, err: std::io::Error) -> Self {
        let path = path.to_string();
        match err.kind() {
            std::io::ErrorKind::NotFound => Self::NotFound { path },
            std::io::ErrorKind::PermissionDenied => Self::PermissionDenied { path },
            std::io::ErrorKind::IsADirectory => Self::IsADirectory { path },
            _ => Self::Open { path, source: err },
        }
    }
}

/// Trap registration failures.
#[derive(Error, Debug)]
pub enum TrapError {
    /// The spec named no known signal, or a number outside the platform
    /// range.
    #[error("{0}: invalid signal specification")]
    InvalidSignal(String),

    /// KILL and STOP cannot have their dispositions changed.
    #[error("cannot trap {0}")]
    UncatchableSignal(String),

    /// The runtime owns this signal's disposition (child reaping).
    #[error("{0}: signal is reserved by the runtime")]
    ReservedSignal(String),

    /// A handler is already registered for this signal.
    #[error("trap already exists for {0}")]
    DuplicateTrap(String),

    /// Registering an empty handler string; clearing goes through the
    /// dedicated clear operation instead.
    #[error("empty trap command")]
    EmptyCommand,

    /// The OS rejected the handler installation.
    #[error("{spec}: cannot install handler: {source}")]
    InstallFailed {
        spec: String,
        source: std::io::Error,
    },
}

/// Shell option failures.
#[derive(Error, Debug)]
pub enum OptionError {
    /// Not one of errexit, xtrace, pipefail.
    #[error("{0}: invalid option name")]
    InvalidOptionName(String),
}
