//! Running the external compiler inside a session directory.
//!
//! A [`CompilerCommand`] can only be built through [`CompilerCommand::new`],
//! which checks that the document name stays inside the session root. The
//! command is executed argv-style (no shell), with the session root as its
//! working directory, a cleared environment, and its own process group so
//! nothing the compiler started outlives the run.

use crate::config::BuildConfig;
use crate::env::forwarded_env;
use crate::error::{ExecError, ExecFailure, Stream, Violation};
use crate::output::Output;
use crate::sandbox::contained_path;
use std::collections::HashMap;
use std::os::unix::process::CommandExt;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::{Duration, Instant};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tokio::time::timeout;
use tracing::debug;

/// A validated compiler invocation, ready to run.
#[derive(Debug, Clone)]
pub struct CompilerCommand {
    pub(crate) bin: PathBuf,
    pub(crate) argv: Vec<String>,
    pub(crate) env: HashMap<String, String>,
    pub(crate) cwd: PathBuf,
    pub(crate) timeout: Duration,
    pub(crate) max_stdout: usize,
    pub(crate) max_stderr: usize,
}

impl CompilerCommand {
    /// Compose the invocation for `doc_name` in `session_root`.
    ///
    /// The argument order is: executable args, mode flags, standard flags
    /// (`--odir=<out_dir>` and the sandbox flag), then the document name.
    ///
    /// # Errors
    ///
    /// A [`Violation`] if `doc_name` cannot be contained in `session_root`,
    /// or if it starts with `-` and would be parsed as a compiler option.
    pub fn new(
        config: &BuildConfig,
        session_root: &Path,
        doc_name: &str,
        pdf: bool,
    ) -> Result<Self, Violation> {
        contained_path(session_root, doc_name)?;
        if doc_name.starts_with('-') {
            return Err(Violation::OptionLike {
                path: doc_name.to_string(),
            });
        }

        let mut argv = config.executable_args.clone();
        argv.extend(config.mode_flags(pdf).iter().cloned());
        argv.extend(config.standard_flags());
        argv.push(doc_name.to_string());

        Ok(Self {
            bin: config.executable.clone(),
            argv,
            env: forwarded_env(&config.env_passthrough, std::env::vars()),
            cwd: session_root.to_path_buf(),
            timeout: config.limits.timeout(pdf),
            max_stdout: config.limits.max_stdout,
            max_stderr: config.limits.max_stderr,
        })
    }

    /// Human-readable command line, for logs only.
    pub fn command_line(&self) -> String {
        let mut line = self.bin.display().to_string();
        if let Some((doc_name, flags)) = self.argv.split_last() {
            for flag in flags {
                line.push(' ');
                line.push_str(flag);
            }
            line.push_str(&format!(" \"{}\"", doc_name));
        }
        line
    }

    /// Run the compiler to completion.
    ///
    /// # Errors
    ///
    /// An [`ExecFailure`] carrying the output captured so far:
    /// - `ExecError::SpawnFailed` if the process couldn't be started
    /// - `ExecError::Timeout` if the process exceeded the timeout
    /// - `ExecError::StdoutLimitExceeded` if stdout exceeded the limit
    /// - `ExecError::StderrLimitExceeded` if stderr exceeded the limit
    /// - `ExecError::NonZeroExit` if the process exited unsuccessfully
    pub async fn spawn(self) -> Result<Output, ExecFailure> {
        let start = Instant::now();
        debug!(command = %self.command_line(), cwd = %self.cwd.display(), "spawning compiler");

        let mut std_cmd = std::process::Command::new(&self.bin);
        std_cmd
            .args(&self.argv)
            .current_dir(&self.cwd)
            .env_clear()
            .envs(&self.env)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .process_group(0);
        let mut cmd = Command::from(std_cmd);
        cmd.kill_on_drop(true);

        let mut child = cmd.spawn().map_err(|e| {
            ExecFailure::before_output(ExecError::SpawnFailed {
                reason: e.to_string(),
            })
        })?;
        // Dropped on every exit path, including cancellation of this future.
        let group = ProcessGroup::led_by(&child);

        let (Some(mut stdout), Some(mut stderr)) = (child.stdout.take(), child.stderr.take())
        else {
            let _ = child.kill().await;
            return Err(ExecFailure::before_output(ExecError::SpawnFailed {
                reason: "output pipes were not captured".to_string(),
            }));
        };

        let mut stdout_buf = Vec::new();
        let mut stderr_buf = Vec::new();

        let outcome = timeout(self.timeout, async {
            tokio::try_join!(
                read_capped(&mut stdout, &mut stdout_buf, self.max_stdout, Stream::Stdout),
                read_capped(&mut stderr, &mut stderr_buf, self.max_stderr, Stream::Stderr),
            )?;
            child.wait().await.map_err(|e| ExecError::SpawnFailed {
                reason: format!("wait error: {}", e),
            })
        })
        .await;

        let error = match outcome {
            Ok(Ok(status)) if status.success() => {
                return Ok(Output {
                    stdout: stdout_buf,
                    stderr: stderr_buf,
                    status,
                });
            }
            Ok(Ok(status)) => ExecError::NonZeroExit {
                code: status.code(),
            },
            Ok(Err(error)) => {
                group.kill();
                let _ = child.kill().await;
                error
            }
            Err(_) => {
                group.kill();
                let _ = child.kill().await;
                ExecError::Timeout {
                    limit: self.timeout,
                    elapsed: start.elapsed(),
                }
            }
        };

        Err(ExecFailure {
            error,
            stdout: stdout_buf,
            stderr: stderr_buf,
        })
    }

    /// Get the binary path.
    pub fn bin(&self) -> &Path {
        &self.bin
    }

    /// Get the arguments.
    pub fn argv(&self) -> &[String] {
        &self.argv
    }

    /// Get the environment.
    pub fn env(&self) -> &HashMap<String, String> {
        &self.env
    }

    /// Get the working directory.
    pub fn cwd(&self) -> &Path {
        &self.cwd
    }

    /// Get the wall-clock budget.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }
}

/// Read `reader` to EOF into `buf`, failing once more than `limit` bytes arrive.
async fn read_capped<R>(
    reader: &mut R,
    buf: &mut Vec<u8>,
    limit: usize,
    stream: Stream,
) -> Result<(), ExecError>
where
    R: AsyncRead + Unpin,
{
    let mut chunk = [0u8; 8192];
    loop {
        let n = reader
            .read(&mut chunk)
            .await
            .map_err(|e| ExecError::SpawnFailed {
                reason: format!("{} read error: {}", stream, e),
            })?;
        if n == 0 {
            return Ok(());
        }
        if buf.len() + n > limit {
            let remaining = limit.saturating_sub(buf.len());
            buf.extend_from_slice(&chunk[..remaining]);
            return Err(ExecError::limit_exceeded(stream, limit));
        }
        buf.extend_from_slice(&chunk[..n]);
    }
}

/// The process group a spawned compiler leads.
///
/// Dropping it SIGKILLs the whole group, so nothing the compiler started
/// outlives the run, whether it exited cleanly, failed, timed out, or the
/// caller stopped waiting.
#[derive(Debug)]
struct ProcessGroup {
    pgid: Option<libc::pid_t>,
}

impl ProcessGroup {
    /// Record the group id while the leader is still unreaped.
    fn led_by(child: &Child) -> Self {
        Self {
            pgid: child.id().and_then(|pid| libc::pid_t::try_from(pid).ok()),
        }
    }

    fn kill(&self) {
        if let Some(pgid) = self.pgid.filter(|pgid| *pgid > 0) {
            // SAFETY: kill(2) has no memory-safety preconditions; a negative
            // pid addresses the process group. ESRCH once the group is empty
            // is expected and ignored.
            unsafe {
                libc::kill(-pgid, libc::SIGKILL);
            }
        }
    }
}

impl Drop for ProcessGroup {
    fn drop(&mut self) {
        self.kill();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::limits::ResourceLimits;
    use tempfile::TempDir;

    /// A config that runs `script` through /bin/sh.
    fn sh_config(tmp: &TempDir, script: &str) -> BuildConfig {
        let script_path = tmp.path().join("compiler.sh");
        std::fs::write(&script_path, script).unwrap();
        BuildConfig {
            executable: PathBuf::from("/bin/sh"),
            executable_args: vec![script_path.display().to_string()],
            limits: ResourceLimits::default()
                .with_timeouts(Duration::from_secs(5), Duration::from_secs(5)),
            ..BuildConfig::default()
        }
    }

    fn session(tmp: &TempDir) -> PathBuf {
        let root = tmp.path().join("session");
        std::fs::create_dir(&root).unwrap();
        root
    }

    #[test]
    fn test_argv_order() {
        let config = BuildConfig {
            executable: PathBuf::from("/usr/bin/node"),
            executable_args: vec!["cli.js".to_string()],
            ..BuildConfig::default()
        };
        let cmd = CompilerCommand::new(&config, Path::new("/tmp/s1"), "doc.mdk", false).unwrap();

        assert_eq!(
            cmd.argv(),
            [
                "cli.js",
                "-vv",
                "--verbose-max=0",
                "-mmath-embed:512",
                "-membed:0",
                "--odir=out",
                "--sandbox",
                "doc.mdk"
            ]
        );
        assert_eq!(cmd.cwd(), Path::new("/tmp/s1"));
        assert_eq!(cmd.timeout(), config.limits.timeout(false));
    }

    #[test]
    fn test_command_line_quotes_doc_name() {
        let config = BuildConfig::default();
        let cmd = CompilerCommand::new(&config, Path::new("/tmp/s1"), "my doc.mdk", true).unwrap();
        let line = cmd.command_line();
        assert!(line.starts_with("/usr/local/bin/madoko -vv"));
        assert!(line.ends_with("--odir=out --sandbox \"my doc.mdk\""));
    }

    #[test]
    fn test_option_like_doc_name_rejected() {
        let config = BuildConfig::default();
        for name in ["--odir=/tmp/elsewhere", "-vv", "-"] {
            let err = CompilerCommand::new(&config, Path::new("/tmp/s1"), name, false).unwrap_err();
            assert!(matches!(err, Violation::OptionLike { .. }), "{}", name);
        }

        // a dash inside the name is an ordinary file name
        assert!(CompilerCommand::new(&config, Path::new("/tmp/s1"), "a/-b.mdk", false).is_ok());
        assert!(CompilerCommand::new(&config, Path::new("/tmp/s1"), "doc-v2.mdk", false).is_ok());
    }

    #[test]
    fn test_empty_doc_name_rejected() {
        let config = BuildConfig::default();
        let result = CompilerCommand::new(&config, Path::new("/tmp/s1"), "", false);
        assert!(matches!(result, Err(Violation::EmptyPath)));
    }

    #[tokio::test]
    async fn test_runs_in_session_root_with_args() {
        let tmp = TempDir::new().unwrap();
        let root = session(&tmp);
        let config = sh_config(&tmp, "pwd\necho \"$@\"\n");

        let cmd = CompilerCommand::new(&config, &root, "doc.mdk", false).unwrap();
        let output = cmd.spawn().await.unwrap();

        let stdout = output.stdout_string();
        let mut lines = stdout.lines();
        let cwd = PathBuf::from(lines.next().unwrap());
        assert_eq!(
            std::fs::canonicalize(cwd).unwrap(),
            std::fs::canonicalize(&root).unwrap()
        );
        assert!(lines.next().unwrap().ends_with("--odir=out --sandbox doc.mdk"));
    }

    #[tokio::test]
    async fn test_environment_is_cleared() {
        let tmp = TempDir::new().unwrap();
        let root = session(&tmp);
        let mut config = sh_config(&tmp, "echo \"secret=${DOC_JAIL_TEST_SECRET:-unset}\"\n");
        config.env_passthrough = vec!["PATH".to_string()];
        std::env::set_var("DOC_JAIL_TEST_SECRET", "leaked");

        let cmd = CompilerCommand::new(&config, &root, "doc.mdk", false).unwrap();
        assert!(!cmd.env().contains_key("DOC_JAIL_TEST_SECRET"));
        let output = cmd.spawn().await.unwrap();

        assert_eq!(output.stdout_string().trim(), "secret=unset");
    }

    #[tokio::test]
    async fn test_non_zero_exit_keeps_output() {
        let tmp = TempDir::new().unwrap();
        let root = session(&tmp);
        let config = sh_config(&tmp, "echo working\necho broken >&2\nexit 3\n");

        let cmd = CompilerCommand::new(&config, &root, "doc.mdk", false).unwrap();
        let failure = cmd.spawn().await.unwrap_err();

        assert!(matches!(failure.error, ExecError::NonZeroExit { code: Some(3) }));
        assert_eq!(failure.stdout_string(), "working\n");
        assert_eq!(failure.stderr_string(), "broken\n");
    }

    #[tokio::test]
    async fn test_timeout_kills_process_group() {
        let tmp = TempDir::new().unwrap();
        let root = session(&tmp);
        // the sleep is a grandchild holding the pipes open
        let mut config = sh_config(&tmp, "echo partial\nsleep 30\necho never\n");
        config.limits = config
            .limits
            .with_timeouts(Duration::from_millis(300), Duration::from_millis(300));

        let start = Instant::now();
        let cmd = CompilerCommand::new(&config, &root, "doc.mdk", false).unwrap();
        let failure = cmd.spawn().await.unwrap_err();

        assert!(failure.error.is_timeout());
        assert_eq!(failure.stdout_string(), "partial\n");
        assert!(start.elapsed() < Duration::from_secs(10));
    }

    #[tokio::test]
    async fn test_clean_exit_kills_background_children() {
        let tmp = TempDir::new().unwrap();
        let root = session(&tmp);
        let config = sh_config(
            &tmp,
            "(sleep 1; touch late) >/dev/null 2>&1 &\necho done\nexit 0\n",
        );

        let cmd = CompilerCommand::new(&config, &root, "doc.mdk", false).unwrap();
        let output = cmd.spawn().await.unwrap();
        assert_eq!(output.stdout_string(), "done\n");

        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert!(!root.join("late").exists());
    }

    #[tokio::test]
    async fn test_failed_exit_kills_background_children() {
        let tmp = TempDir::new().unwrap();
        let root = session(&tmp);
        let config = sh_config(&tmp, "(sleep 1; touch late) >/dev/null 2>&1 &\nexit 3\n");

        let cmd = CompilerCommand::new(&config, &root, "doc.mdk", false).unwrap();
        let failure = cmd.spawn().await.unwrap_err();
        assert!(matches!(failure.error, ExecError::NonZeroExit { code: Some(3) }));

        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert!(!root.join("late").exists());
    }

    #[tokio::test]
    async fn test_stdout_limit() {
        let tmp = TempDir::new().unwrap();
        let root = session(&tmp);
        let mut config = sh_config(&tmp, "while true; do echo 0123456789; done\n");
        config.limits = config.limits.with_max_stdout(1000);

        let cmd = CompilerCommand::new(&config, &root, "doc.mdk", false).unwrap();
        let failure = cmd.spawn().await.unwrap_err();

        assert!(matches!(
            failure.error,
            ExecError::StdoutLimitExceeded { limit: 1000 }
        ));
        assert_eq!(failure.stdout.len(), 1000);
    }

    #[tokio::test]
    async fn test_missing_binary() {
        let tmp = TempDir::new().unwrap();
        let root = session(&tmp);
        let config = BuildConfig {
            executable: PathBuf::from("/nonexistent/compiler"),
            ..BuildConfig::default()
        };

        let cmd = CompilerCommand::new(&config, &root, "doc.mdk", false).unwrap();
        let failure = cmd.spawn().await.unwrap_err();
        assert!(matches!(failure.error, ExecError::SpawnFailed { .. }));
        assert!(failure.stdout.is_empty());
    }
}
