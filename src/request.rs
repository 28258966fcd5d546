//! Invocation input and output.

use crate::files::VirtualFile;
use crate::harvest::OutputFile;
use serde::{Deserialize, Serialize};

/// Document compiled when the request names none.
pub const DEFAULT_DOC_NAME: &str = "document.mdk";

/// One build request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildRequest {
    /// Document to compile, relative to the session root.
    #[serde(rename = "docname", default, skip_serializing_if = "Option::is_none")]
    pub doc_name: Option<String>,

    /// Files to place in the session before compiling.
    #[serde(default)]
    pub files: Vec<VirtualFile>,

    /// Full build: also produce the final artifact and its rendered source.
    #[serde(default)]
    pub pdf: bool,
}

impl BuildRequest {
    pub fn new(doc_name: impl Into<String>, files: Vec<VirtualFile>) -> Self {
        Self {
            doc_name: Some(doc_name.into()),
            files,
            pdf: false,
        }
    }

    /// Request a full build.
    pub fn with_pdf(mut self, pdf: bool) -> Self {
        self.pdf = pdf;
        self
    }

    /// The document name, falling back to [`DEFAULT_DOC_NAME`] when unset or empty.
    pub fn doc_name(&self) -> &str {
        match self.doc_name.as_deref() {
            Some(name) if !name.is_empty() => name,
            _ => DEFAULT_DOC_NAME,
        }
    }
}

/// A successful build.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildOutput {
    /// Generated files with content; missing and empty files are omitted.
    pub files: Vec<OutputFile>,
    pub stdout: String,
    pub stderr: String,
}
