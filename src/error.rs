//! Error types for doc_jail.
//!
//! Errors fall into four groups:
//! - [`Violation`]: a caller-supplied path could not be contained in the session root
//! - [`ExecError`]: the external compiler could not be run to a clean exit
//! - [`ExecFailure`]: an [`ExecError`] plus the output captured before it
//! - [`BuildError`]: anything that aborts one build session
//! - [`BuildFailure`]: a [`BuildError`] plus whatever the compiler printed

use serde::{Serialize, Serializer};
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// A path that cannot be safely resolved inside a session root.
///
/// All error messages are safe to log and to return to the caller.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum Violation {
    /// Path is empty, or normalizes to the session root itself
    #[error("path is empty")]
    EmptyPath,

    /// Path contains a NUL byte
    #[error("path contains a NUL byte: {path:?}")]
    NulByte { path: String },

    /// Resolved path does not lie under the session root
    #[error("path escapes the session root: {path}")]
    EscapesRoot { path: String },

    /// Document name would be read by the compiler as an option
    #[error("document name looks like an option: {path}")]
    OptionLike { path: String },
}

/// Which captured stream an error refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stream {
    Stdout,
    Stderr,
}

impl std::fmt::Display for Stream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Stream::Stdout => write!(f, "stdout"),
            Stream::Stderr => write!(f, "stderr"),
        }
    }
}

/// Failure to run the external compiler to a successful exit.
#[derive(Debug, Error)]
pub enum ExecError {
    /// Process exceeded its wall-clock budget and was killed
    #[error("process timed out after {elapsed:?} (limit: {limit:?})")]
    Timeout { limit: Duration, elapsed: Duration },

    /// Process exceeded the stdout limit and was killed
    #[error("stdout limit exceeded: {limit} bytes")]
    StdoutLimitExceeded { limit: usize },

    /// Process exceeded the stderr limit and was killed
    #[error("stderr limit exceeded: {limit} bytes")]
    StderrLimitExceeded { limit: usize },

    /// Failed to spawn or wait for the process
    #[error("failed to spawn process: {reason}")]
    SpawnFailed { reason: String },

    /// Process exited unsuccessfully. `None` means it was killed by a signal.
    #[error("process exited with {}", exit_label(.code))]
    NonZeroExit { code: Option<i32> },
}

fn exit_label(code: &Option<i32>) -> String {
    match code {
        Some(code) => format!("code {}", code),
        None => "a signal".to_string(),
    }
}

impl ExecError {
    pub(crate) fn limit_exceeded(stream: Stream, limit: usize) -> Self {
        match stream {
            Stream::Stdout => ExecError::StdoutLimitExceeded { limit },
            Stream::Stderr => ExecError::StderrLimitExceeded { limit },
        }
    }

    /// True when the process was stopped because it ran out of time.
    pub fn is_timeout(&self) -> bool {
        matches!(self, ExecError::Timeout { .. })
    }
}

/// An [`ExecError`] together with the output captured before it happened.
#[derive(Debug, Error)]
#[error("{error}")]
pub struct ExecFailure {
    #[source]
    pub error: ExecError,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
}

impl ExecFailure {
    pub(crate) fn before_output(error: ExecError) -> Self {
        Self {
            error,
            stdout: Vec::new(),
            stderr: Vec::new(),
        }
    }

    /// Get stdout as a string (lossy UTF-8 conversion).
    pub fn stdout_string(&self) -> String {
        String::from_utf8_lossy(&self.stdout).into_owned()
    }

    /// Get stderr as a string (lossy UTF-8 conversion).
    pub fn stderr_string(&self) -> String {
        String::from_utf8_lossy(&self.stderr).into_owned()
    }
}

/// Anything that aborts a build session.
#[derive(Debug, Error)]
pub enum BuildError {
    #[error(transparent)]
    Sandbox(#[from] Violation),

    /// An input file declared as base64 did not decode
    #[error("cannot decode {path}: {reason}")]
    Decode { path: String, reason: String },

    #[error("i/o error on {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A generated file is larger than `limits.file_size`
    #[error("generated file too large: {path} ({size} bytes, limit {limit})")]
    FileTooLarge { path: String, size: u64, limit: u64 },

    #[error(transparent)]
    Exec(#[from] ExecError),
}

impl BuildError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        BuildError::Io {
            path: path.into(),
            source,
        }
    }
}

/// A failed build, with the compiler's captured output attached.
///
/// `stdout` and `stderr` are empty when the session failed before the
/// compiler was started.
#[derive(Debug, Error, Serialize)]
#[error("{error}")]
pub struct BuildFailure {
    #[source]
    #[serde(serialize_with = "serialize_display")]
    pub error: BuildError,
    pub stdout: String,
    pub stderr: String,
}

impl BuildFailure {
    /// A failure that happened before any process output existed.
    pub fn without_output(error: impl Into<BuildError>) -> Self {
        Self {
            error: error.into(),
            stdout: String::new(),
            stderr: String::new(),
        }
    }

    pub fn with_output(error: impl Into<BuildError>, stdout: String, stderr: String) -> Self {
        Self {
            error: error.into(),
            stdout,
            stderr,
        }
    }
}

fn serialize_display<S: Serializer>(error: &BuildError, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.collect_str(error)
}

/// Configuration could not be loaded.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config syntax: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}
