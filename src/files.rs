//! Virtual input files and their materialization into a session directory.

use crate::error::BuildError;
use crate::sandbox::contained_path;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use futures::future::try_join_all;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::debug;

/// Transfer encoding of file content.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Encoding {
    #[default]
    Utf8,
    Base64,
}

impl Encoding {
    /// Decode transferred content to raw bytes.
    pub fn decode(self, content: &str) -> Result<Vec<u8>, base64::DecodeError> {
        match self {
            Encoding::Utf8 => Ok(content.as_bytes().to_vec()),
            Encoding::Base64 => STANDARD.decode(content.trim()),
        }
    }

    /// Encode raw bytes for transfer. Invalid UTF-8 is replaced, not rejected.
    pub fn encode(self, bytes: &[u8]) -> String {
        match self {
            Encoding::Utf8 => String::from_utf8_lossy(bytes).into_owned(),
            Encoding::Base64 => STANDARD.encode(bytes),
        }
    }
}

impl std::fmt::Display for Encoding {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Encoding::Utf8 => write!(f, "utf8"),
            Encoding::Base64 => write!(f, "base64"),
        }
    }
}

/// A caller-supplied file, written relative to the session root.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VirtualFile {
    /// Sandbox-relative path; `..` segments are folded, never followed.
    pub path: String,

    pub content: String,

    #[serde(default)]
    pub encoding: Encoding,
}

impl VirtualFile {
    pub fn utf8(path: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            content: content.into(),
            encoding: Encoding::Utf8,
        }
    }

    pub fn base64(path: impl Into<String>, bytes: &[u8]) -> Self {
        Self {
            path: path.into(),
            content: STANDARD.encode(bytes),
            encoding: Encoding::Base64,
        }
    }
}

/// Write every file under `root`, creating parent directories as needed.
///
/// All targets are resolved before anything is written, so a path violation
/// leaves the session untouched. Writes then run concurrently; the first
/// failure fails the whole operation and already-written files stay behind
/// for session teardown to remove.
pub async fn materialize(root: &Path, files: &[VirtualFile]) -> Result<(), BuildError> {
    let mut targets = Vec::with_capacity(files.len());
    for file in files {
        let target = contained_path(root, &file.path)?;
        let bytes = file.encoding.decode(&file.content).map_err(|e| BuildError::Decode {
            path: file.path.clone(),
            reason: e.to_string(),
        })?;
        targets.push((target, bytes, file.encoding));
    }

    try_join_all(targets.into_iter().map(|(target, bytes, encoding)| async move {
        debug!(path = %target.display(), %encoding, "writing file");
        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| BuildError::io(parent, e))?;
        }
        tokio::fs::write(&target, bytes)
            .await
            .map_err(|e| BuildError::io(&target, e))
    }))
    .await?;

    Ok(())
}
