//! Build configuration.
//!
//! Everything the original tool kept as process-wide constants (output
//! directory, standard flags, mode flags) is configuration here, so several
//! configurations can serve builds side by side.

use crate::error::ConfigError;
use crate::limits::ResourceLimits;
use crate::sandbox::{normalize, ESCAPE_SENTINEL};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Configuration for one [`BuildService`](crate::BuildService).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BuildConfig {
    /// Absolute path of the compiler (or of its interpreter).
    pub executable: PathBuf,

    /// Arguments placed before the mode flags, e.g. the compiler script
    /// when `executable` is an interpreter.
    pub executable_args: Vec<String>,

    /// Parent directory of all session directories.
    pub session_root_dir: PathBuf,

    /// Output directory, relative to the session root, passed as `--odir`.
    pub out_dir: String,

    /// Flag that switches the compiler into its own sandbox mode.
    pub sandbox_flag: String,

    /// Flags for a math-only build.
    pub math_flags: Vec<String>,

    /// Flags for a full build producing the final artifact.
    pub pdf_flags: Vec<String>,

    /// Host environment variables forwarded to the compiler.
    pub env_passthrough: Vec<String>,

    pub limits: ResourceLimits,
}

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self {
            executable: PathBuf::from("/usr/local/bin/madoko"),
            executable_args: Vec::new(),
            session_root_dir: std::env::temp_dir().join("doc_jail"),
            out_dir: "out".to_string(),
            sandbox_flag: "--sandbox".to_string(),
            math_flags: strings(&["-vv", "--verbose-max=0", "-mmath-embed:512", "-membed:0"]),
            pdf_flags: strings(&[
                "-vv",
                "--verbose-max=0",
                "-mmath-embed:512",
                "-membed:512",
                "--pdf",
            ]),
            env_passthrough: strings(&["PATH", "HOME", "LANG", "LC_ALL", "TMPDIR"]),
            limits: ResourceLimits::default(),
        }
    }
}

impl BuildConfig {
    /// Parse and validate a TOML document.
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: BuildConfig = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse, and validate a TOML file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&text)
    }

    /// Flags for the requested build mode.
    pub fn mode_flags(&self, pdf: bool) -> &[String] {
        if pdf {
            &self.pdf_flags
        } else {
            &self.math_flags
        }
    }

    /// Flags passed on every run: the output directory and sandbox mode.
    pub fn standard_flags(&self) -> Vec<String> {
        vec![format!("--odir={}", self.out_dir), self.sandbox_flag.clone()]
    }

    /// Check the configuration for values that would break containment.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.executable.is_absolute() {
            return Err(ConfigError::Invalid(format!(
                "executable must be an absolute path: {}",
                self.executable.display()
            )));
        }
        if self.session_root_dir.as_os_str().is_empty() {
            return Err(ConfigError::Invalid("session_root_dir is empty".to_string()));
        }

        let out_dir = normalize(&self.out_dir)
            .map_err(|e| ConfigError::Invalid(format!("out_dir: {}", e)))?;
        if self.out_dir.starts_with('/')
            || out_dir != self.out_dir
            || out_dir.split('/').any(|part| part == ESCAPE_SENTINEL)
        {
            return Err(ConfigError::Invalid(format!(
                "out_dir must be a plain relative path: {}",
                self.out_dir
            )));
        }

        if self.limits.timeout_math_ms == 0 || self.limits.timeout_pdf_ms == 0 {
            return Err(ConfigError::Invalid("timeouts must be non-zero".to_string()));
        }
        if self.limits.file_size == 0 {
            return Err(ConfigError::Invalid("limits.file_size must be non-zero".to_string()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_valid() {
        BuildConfig::default().validate().unwrap();
    }

    #[test]
    fn test_from_toml() {
        let config = BuildConfig::from_toml_str(
            r#"
            executable = "/usr/bin/node"
            executable_args = ["/opt/madoko/lib/cli.js"]
            session_root_dir = "/var/lib/doc_jail/runs"

            [limits]
            file_size = 2048
            timeout_math_ms = 5000
            "#,
        )
        .unwrap();

        assert_eq!(config.executable, PathBuf::from("/usr/bin/node"));
        assert_eq!(config.executable_args, vec!["/opt/madoko/lib/cli.js"]);
        assert_eq!(config.limits.file_size, 2048);
        assert_eq!(config.limits.timeout_math_ms, 5000);
        assert_eq!(config.limits.timeout_pdf_ms, 60_000);
        assert_eq!(config.out_dir, "out");
    }

    #[test]
    fn test_standard_and_mode_flags() {
        let config = BuildConfig::default();
        assert_eq!(config.standard_flags(), vec!["--odir=out", "--sandbox"]);
        assert!(config.mode_flags(true).contains(&"--pdf".to_string()));
        assert!(!config.mode_flags(false).contains(&"--pdf".to_string()));
    }

    #[test]
    fn test_relative_executable_rejected() {
        let result = BuildConfig::from_toml_str(r#"executable = "madoko""#);
        assert!(matches!(result, Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_escaping_out_dir_rejected() {
        for out_dir in ["../out", "/tmp/out", "a/../../b", "", "out//x"] {
            let config = BuildConfig {
                out_dir: out_dir.to_string(),
                ..BuildConfig::default()
            };
            assert!(config.validate().is_err(), "out_dir {:?}", out_dir);
        }
    }

    #[test]
    fn test_zero_timeout_rejected() {
        let mut config = BuildConfig::default();
        config.limits.timeout_pdf_ms = 0;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_syntax_error() {
        let result = BuildConfig::from_toml_str("executable = ");
        assert!(matches!(result, Err(ConfigError::Parse(_))));
    }
}
