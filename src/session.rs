//! Build sessions.
//!
//! `BuildService` is the entry point: it creates one directory per request,
//! materializes the inputs, runs the compiler, harvests the outputs, and
//! schedules removal of the directory whatever the outcome.

use crate::cleanup::{CleanupHandle, CleanupScheduler, TokioCleanup};
use crate::config::BuildConfig;
use crate::error::{BuildError, BuildFailure, ConfigError};
use crate::files::materialize;
use crate::harvest::harvest;
use crate::limits::millis;
use crate::mime::{GuessMime, MimeLookup};
use crate::request::{BuildOutput, BuildRequest};
use crate::runner::CompilerCommand;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

static SEQUENCE: AtomicU64 = AtomicU64::new(0);

/// A fresh session directory name:
/// `YYYY-MM-DD-<millis hex>-<pid hex>-<sequence hex>`.
///
/// The sequence is process-wide and the pid separates worker processes that
/// share a session root, so two requests in the same millisecond still get
/// distinct names.
pub fn new_session_id() -> String {
    let now = chrono::Utc::now();
    let seq = SEQUENCE.fetch_add(1, Ordering::Relaxed);
    format!(
        "{}-{:X}-{:X}-{:X}",
        now.format("%Y-%m-%d"),
        now.timestamp_millis(),
        std::process::id(),
        seq
    )
}

/// Owns the removal of one session directory.
///
/// Removal is scheduled exactly once: by [`SessionGuard::finish`] when the
/// run completes, or on drop when the run future is abandoned midway.
struct SessionGuard {
    dir: Option<PathBuf>,
    cleanup: Arc<dyn CleanupScheduler>,
    delay: Duration,
}

impl SessionGuard {
    fn finish(mut self) -> CleanupHandle {
        self.schedule()
    }

    fn schedule(&mut self) -> CleanupHandle {
        match self.dir.take() {
            Some(dir) => self.cleanup.schedule(dir, self.delay),
            None => CleanupHandle::detached(),
        }
    }
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        if let Some(dir) = &self.dir {
            warn!(session = %dir.display(), "build abandoned before completion");
            self.schedule();
        }
    }
}

/// Runs build requests against one configuration.
///
/// Cheap to clone; clones share the configuration and collaborators.
#[derive(Debug, Clone)]
pub struct BuildService {
    config: Arc<BuildConfig>,
    mime: Arc<dyn MimeLookup>,
    cleanup: Arc<dyn CleanupScheduler>,
}

impl BuildService {
    /// Create a service builder.
    pub fn builder(config: BuildConfig) -> BuildServiceBuilder {
        BuildServiceBuilder::new(config)
    }

    pub fn config(&self) -> &BuildConfig {
        &self.config
    }

    /// Run one build. Removal of the session directory is left running in
    /// the background.
    pub async fn run(&self, request: BuildRequest) -> Result<BuildOutput, BuildFailure> {
        let (result, _cleanup) = self.run_tracked(request).await;
        result
    }

    /// Run one build and return the handle of its scheduled cleanup.
    pub async fn run_tracked(
        &self,
        request: BuildRequest,
    ) -> (Result<BuildOutput, BuildFailure>, CleanupHandle) {
        let session_dir = self.config.session_root_dir.join(new_session_id());
        info!(session = %session_dir.display(), "build session");

        if let Err(e) = tokio::fs::create_dir_all(&session_dir).await {
            let failure = BuildFailure::without_output(BuildError::io(&session_dir, e));
            return (Err(failure), CleanupHandle::detached());
        }

        let guard = SessionGuard {
            dir: Some(session_dir.clone()),
            cleanup: Arc::clone(&self.cleanup),
            delay: self.config.limits.cleanup_delay(),
        };

        let result = self.run_in(&session_dir, &request).await;
        (result, guard.finish())
    }

    async fn run_in(
        &self,
        session_dir: &Path,
        request: &BuildRequest,
    ) -> Result<BuildOutput, BuildFailure> {
        let doc_name = request.doc_name();

        materialize(session_dir, &request.files)
            .await
            .map_err(BuildFailure::without_output)?;
        let command = CompilerCommand::new(&self.config, session_dir, doc_name, request.pdf)
            .map_err(BuildFailure::without_output)?;

        info!(command = %command.command_line(), "running compiler");
        let start = Instant::now();
        let output = match command.spawn().await {
            Ok(output) => output,
            Err(failure) => {
                let stdout = failure.stdout_string();
                let stderr = failure.stderr_string();
                info!(error = %failure.error, %stdout, %stderr, "compiler failed");
                return Err(BuildFailure::with_output(failure.error, stdout, stderr));
            }
        };
        info!(
            elapsed_ms = millis(start.elapsed()),
            "compiler finished"
        );

        let stdout = output.stdout_string();
        let stderr = output.stderr_string();
        let combined = output.combined_text();
        debug!(output = %combined, "compiler output");

        match harvest(
            &self.config,
            self.mime.as_ref(),
            session_dir,
            doc_name,
            request.pdf,
            &combined,
        )
        .await
        {
            Ok(files) => Ok(BuildOutput {
                files,
                stdout,
                stderr,
            }),
            Err(error) => Err(BuildFailure::with_output(error, stdout, stderr)),
        }
    }
}

/// Builder for `BuildService`.
#[derive(Debug)]
pub struct BuildServiceBuilder {
    config: BuildConfig,
    mime: Arc<dyn MimeLookup>,
    cleanup: Arc<dyn CleanupScheduler>,
}

impl BuildServiceBuilder {
    /// Create a builder with `mime_guess` lookup and tokio-timer cleanup.
    pub fn new(config: BuildConfig) -> Self {
        Self {
            config,
            mime: Arc::new(GuessMime),
            cleanup: Arc::new(TokioCleanup),
        }
    }

    /// Set the MIME lookup.
    pub fn mime_lookup(mut self, mime: Arc<dyn MimeLookup>) -> Self {
        self.mime = mime;
        self
    }

    /// Set the cleanup scheduler.
    pub fn cleanup(mut self, cleanup: Arc<dyn CleanupScheduler>) -> Self {
        self.cleanup = cleanup;
        self
    }

    /// Build the service.
    ///
    /// # Errors
    ///
    /// Returns a `ConfigError` if the configuration fails validation.
    pub fn build(self) -> Result<BuildService, ConfigError> {
        self.config.validate()?;
        Ok(BuildService {
            config: Arc::new(self.config),
            mime: self.mime,
            cleanup: self.cleanup,
        })
    }
}
