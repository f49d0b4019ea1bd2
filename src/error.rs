use std::io;
use std::path::PathBuf;
use thiserror::Error;

use crate::streaming::protocol::Command;

/// Failures of the byte-stream underneath the engine.
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("timed out waiting for data")]
    Timeout,

    #[error("transport returned {actual} bytes, but {expected} were requested")]
    ShortRead { expected: usize, actual: usize },

    #[error("serial port error: {0}")]
    Serial(#[from] serialport::Error),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("transport is closed")]
    Closed,
}

#[derive(Error, Debug)]
pub enum NbfError {
    #[error("malformed record: expected {expected} bytes, got {actual}")]
    MalformedRecord { expected: usize, actual: usize },

    #[error("{}nbf command \"{line}\" malformed, {reason}", line_prefix(.line_number))]
    Parse {
        line: String,
        line_number: Option<usize>,
        reason: String,
    },

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("unexpected reply: {sent} -> {reply}")]
    ReplyViolation { sent: Command, reply: Command },

    #[error("operation interrupted")]
    Interrupted,

    #[error("failed to access {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to write target output: {0}")]
    Output(#[source] io::Error),

    #[error("invalid configuration: {0}")]
    Config(String),
}

fn line_prefix(line_number: &Option<usize>) -> String {
    match line_number {
        Some(n) => format!("line {}: ", n),
        None => String::new(),
    }
}

impl NbfError {
    pub fn parse(line: &str, reason: impl Into<String>) -> Self {
        NbfError::Parse {
            line: line.to_string(),
            line_number: None,
            reason: reason.into(),
        }
    }

    /// Attach a 1-based line number to a parse error; other variants pass through.
    pub fn at_line(self, number: usize) -> Self {
        match self {
            NbfError::Parse { line, reason, .. } => NbfError::Parse {
                line,
                line_number: Some(number),
                reason,
            },
            other => other,
        }
    }

    pub fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        NbfError::Io {
            path: path.into(),
            source,
        }
    }

    pub fn is_parse(&self) -> bool {
        matches!(self, NbfError::Parse { .. })
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, NbfError::Transport(TransportError::Timeout))
    }
}

pub type Result<T> = std::result::Result<T, NbfError>;
