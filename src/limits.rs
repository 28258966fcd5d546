//! Resource limits for a build session.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Limits applied to one build session.
///
/// Durations are configured in milliseconds. When a process limit is
/// exceeded the compiler's process group is killed with SIGKILL and the
/// output captured so far is kept.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResourceLimits {
    /// Largest generated file that will be read back, in bytes.
    ///
    /// Default: 10 MB.
    pub file_size: u64,

    /// Wall-clock budget for a full (PDF) build.
    ///
    /// Default: 60 seconds.
    pub timeout_pdf_ms: u64,

    /// Wall-clock budget for a math-only build.
    ///
    /// Default: 20 seconds.
    pub timeout_math_ms: u64,

    /// Grace delay before a finished session directory is removed.
    ///
    /// Default: 10 seconds.
    pub cleanup_delay_ms: u64,

    /// Maximum bytes to capture from stdout.
    ///
    /// Default: 512 KB.
    pub max_stdout: usize,

    /// Maximum bytes to capture from stderr.
    ///
    /// Default: 512 KB.
    pub max_stderr: usize,
}

impl Default for ResourceLimits {
    fn default() -> Self {
        Self {
            file_size: 10 * 1024 * 1024, // 10 MB
            timeout_pdf_ms: 60_000,
            timeout_math_ms: 20_000,
            cleanup_delay_ms: 10_000,
            max_stdout: 512 * 1024, // 512 KB
            max_stderr: 512 * 1024, // 512 KB
        }
    }
}

impl ResourceLimits {
    /// Timeout for the given build mode.
    pub fn timeout(&self, pdf: bool) -> Duration {
        if pdf {
            Duration::from_millis(self.timeout_pdf_ms)
        } else {
            Duration::from_millis(self.timeout_math_ms)
        }
    }

    pub fn cleanup_delay(&self) -> Duration {
        Duration::from_millis(self.cleanup_delay_ms)
    }

    /// Set the maximum generated file size.
    pub fn with_file_size(mut self, bytes: u64) -> Self {
        self.file_size = bytes;
        self
    }

    /// Set both build timeouts.
    pub fn with_timeouts(mut self, math: Duration, pdf: Duration) -> Self {
        self.timeout_math_ms = millis(math);
        self.timeout_pdf_ms = millis(pdf);
        self
    }

    /// Set the cleanup grace delay.
    pub fn with_cleanup_delay(mut self, delay: Duration) -> Self {
        self.cleanup_delay_ms = millis(delay);
        self
    }

    /// Set maximum stdout bytes.
    pub fn with_max_stdout(mut self, max: usize) -> Self {
        self.max_stdout = max;
        self
    }

    /// Set maximum stderr bytes.
    pub fn with_max_stderr(mut self, max: usize) -> Self {
        self.max_stderr = max;
        self
    }
}

/// Whole milliseconds, saturating at `u64::MAX`.
pub(crate) fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
