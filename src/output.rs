//! Captured compiler output.

use std::process::ExitStatus;

/// Output of a compiler run that exited successfully.
#[derive(Debug, Clone)]
pub struct Output {
    /// Standard output bytes.
    pub stdout: Vec<u8>,

    /// Standard error bytes.
    pub stderr: Vec<u8>,

    /// Exit status of the process.
    pub status: ExitStatus,
}

impl Output {
    /// Get stdout as a string (lossy UTF-8 conversion).
    pub fn stdout_string(&self) -> String {
        String::from_utf8_lossy(&self.stdout).into_owned()
    }

    /// Get stderr as a string (lossy UTF-8 conversion).
    pub fn stderr_string(&self) -> String {
        String::from_utf8_lossy(&self.stderr).into_owned()
    }

    /// Both streams, each terminated by a newline, for log discovery.
    pub fn combined_text(&self) -> String {
        format!("{}\n{}\n", self.stdout_string(), self.stderr_string())
    }
}
