use std::path::PathBuf;

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::types::Command;

/// An [`Action`](crate::Action) whose arguments do not fit its command.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ActionError {
    #[error("{command} takes {expected} argument(s), got {actual}")]
    Arity {
        command: Command,
        expected: usize,
        actual: usize,
    },

    #[error("{command}: invalid argument `{argument}`")]
    InvalidArgument { command: Command, argument: String },
}

/// A malformed schedule document. Always fatal to the whole parse.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    /// Fewer than two comma-separated fields.
    #[error("line {line}: command missing from `{content}`")]
    MissingCommand { line: usize, content: String },

    #[error("line {line}: invalid timestamp `{value}`: {reason}")]
    InvalidTimestamp {
        line: usize,
        value: String,
        reason: String,
    },

    #[error("line {line}: unknown command `{value}`")]
    UnknownCommand { line: usize, value: String },

    #[error("line {line}: {source}")]
    Action {
        line: usize,
        #[source]
        source: ActionError,
    },

    #[error("line {line}: timestamps must be strictly increasing: {timestamp} is not after {previous}")]
    NotIncreasing {
        line: usize,
        timestamp: DateTime<Utc>,
        previous: DateTime<Utc>,
    },
}

impl ParseError {
    /// 1-based line number of the offending entry.
    pub fn line(&self) -> usize {
        match self {
            ParseError::MissingCommand { line, .. }
            | ParseError::InvalidTimestamp { line, .. }
            | ParseError::UnknownCommand { line, .. }
            | ParseError::Action { line, .. }
            | ParseError::NotIncreasing { line, .. } => *line,
        }
    }
}

/// Errors raised while loading, saving or fetching a schedule document.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid schedule document: {0}")]
    Parse(#[from] ParseError),

    #[error("Download failed: {0}")]
    Http(#[from] reqwest::Error),
}

pub type Result<T> = std::result::Result<T, StorageError>;
