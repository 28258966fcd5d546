//! # doc_jail
//!
//! Sandboxed build sessions for an external document compiler.
//!
//! `doc_jail` takes a set of caller-supplied files, writes them into a fresh
//! session directory, runs the compiler there under a timeout and output
//! caps, reads back a fixed set of generated files, and removes the session
//! after a grace delay.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use doc_jail::{BuildConfig, BuildRequest, BuildService, VirtualFile};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = BuildConfig::load("doc_jail.toml".as_ref())?;
//! let service = BuildService::builder(config).build()?;
//!
//! let request = BuildRequest::new(
//!     "doc.mdk",
//!     vec![VirtualFile::utf8("doc.mdk", "# Title")],
//! );
//!
//! match service.run(request).await {
//!     Ok(output) => {
//!         for file in &output.files {
//!             println!("{} ({}, {} chars)", file.path, file.mime, file.content.len());
//!         }
//!     }
//!     Err(failure) => eprintln!("build failed: {}\n{}", failure, failure.stderr),
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ## Containment
//!
//! - **Lexical path folding**: every path is normalized against the session
//!   root; `..` that would climb out becomes a literal `.parent` segment
//! - **No shell**: the compiler is executed argv-style with a cleared environment
//! - **Bounded**: wall-clock timeout, stdout/stderr caps, per-file read limit
//! - **Fixed outputs**: only files named by convention (plus one announced log)
//!   are read back
//!
//! ## Platform Support
//!
//! Unix only (Linux, macOS). The runner relies on process groups to kill
//! everything the compiler started.

#[cfg(windows)]
compile_error!("doc_jail does not support Windows: the runner relies on Unix process groups.");

mod cleanup;
mod config;
mod env;
mod error;
mod files;
mod harvest;
mod limits;
mod mime;
mod output;
mod request;
mod runner;
mod sandbox;
mod session;

// Public API
pub use cleanup::{remove_session_dir, CleanupHandle, CleanupScheduler, TokioCleanup};
pub use config::BuildConfig;
pub use env::NEVER_FORWARD;
pub use error::{BuildError, BuildFailure, ConfigError, ExecError, ExecFailure, Stream, Violation};
pub use files::{materialize, Encoding, VirtualFile};
pub use harvest::{
    candidate_names, document_stem, find_last_log, harvest, OutputFile, ARTIFACT_SUFFIXES,
    FULL_BUILD_SUFFIXES,
};
pub use limits::ResourceLimits;
pub use mime::{encoding_for_mime, GuessMime, MimeLookup};
pub use output::Output;
pub use request::{BuildOutput, BuildRequest, DEFAULT_DOC_NAME};
pub use runner::CompilerCommand;
pub use sandbox::{contained_path, normalize, ESCAPE_SENTINEL};
pub use session::{new_session_id, BuildService, BuildServiceBuilder};
