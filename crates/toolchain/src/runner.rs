//! External process execution
//!
//! Every invocation runs with an explicit working directory and a fully
//! constructed environment (nothing is inherited implicitly), and its
//! combined stdout/stderr is appended to a per-stage log file. The log
//! line preceding any output is the shell-quoted command, so a failing
//! build can be replayed by hand from the log alone.

use kiln_errors::{BuildError, Error, Result};
use kiln_events::{Event, EventSink};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

/// Quote one argument for a POSIX shell
fn shell_quote(arg: &str) -> String {
    let plain = !arg.is_empty()
        && arg
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b"_@%+=:,./-".contains(&b));
    if plain {
        arg.to_string()
    } else {
        format!("'{}'", arg.replace('\'', "'\\''"))
    }
}

/// Render a full command line, shell-quoted
#[must_use]
pub fn shell_quote_command(program: &str, args: &[String]) -> String {
    let mut line = shell_quote(program);
    for arg in args {
        line.push(' ');
        line.push_str(&shell_quote(arg));
    }
    line
}

/// Per-stage log file, opened lazily on first use
#[derive(Debug)]
pub struct StageLog {
    path: PathBuf,
    file: Option<tokio::fs::File>,
}

impl StageLog {
    /// A log that will be created at `path` when first written
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            file: None,
        }
    }

    /// The log file location
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn file(&mut self) -> Result<&mut tokio::fs::File> {
        let file = match self.file.take() {
            Some(file) => file,
            None => {
                if let Some(parent) = self.path.parent() {
                    tokio::fs::create_dir_all(parent)
                        .await
                        .map_err(|e| Error::io_with_path(&e, parent))?;
                }
                tokio::fs::OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(&self.path)
                    .await
                    .map_err(|e| Error::io_with_path(&e, &self.path))?
            }
        };
        Ok(self.file.insert(file))
    }

    /// Append one line to the log
    ///
    /// # Errors
    ///
    /// Returns an error if the log file cannot be opened or written.
    pub async fn write_line(&mut self, line: &str) -> Result<()> {
        let path = self.path.clone();
        let file = self.file().await?;
        file.write_all(line.as_bytes())
            .await
            .map_err(|e| Error::io_with_path(&e, &path))?;
        file.write_all(b"\n")
            .await
            .map_err(|e| Error::io_with_path(&e, &path))?;
        file.flush()
            .await
            .map_err(|e| Error::io_with_path(&e, path))?;
        Ok(())
    }

    /// Two handles to the open log suitable for a child's stdout/stderr
    async fn stdio_pair(&mut self) -> Result<(Stdio, Stdio)> {
        let path = self.path.clone();
        let file = self.file().await?;
        let out = file
            .try_clone()
            .await
            .map_err(|e| Error::io_with_path(&e, &path))?
            .into_std()
            .await;
        let err = file
            .try_clone()
            .await
            .map_err(|e| Error::io_with_path(&e, path))?
            .into_std()
            .await;
        Ok((Stdio::from(out), Stdio::from(err)))
    }
}

/// Result of a captured invocation
#[derive(Debug)]
pub struct CaptureResult {
    /// Whether the process exited zero
    pub success: bool,
    /// Captured stdout, lossily decoded
    pub stdout: String,
}

/// Executes external commands for one package's stages
#[derive(Debug, Clone)]
pub struct ProcessRunner {
    package: String,
    env: HashMap<String, String>,
    sink: EventSink,
}

impl ProcessRunner {
    /// A runner for the named package with a prepared child environment
    #[must_use]
    pub fn new(package: impl Into<String>, env: HashMap<String, String>, sink: EventSink) -> Self {
        Self {
            package: package.into(),
            env,
            sink,
        }
    }

    fn command(&self, program: &str, args: &[String], cwd: &Path) -> Command {
        let mut cmd = Command::new(program);
        cmd.args(args)
            .current_dir(cwd)
            .env_clear()
            .envs(&self.env)
            .stdin(Stdio::null())
            .kill_on_drop(true);
        cmd
    }

    /// Run a command to completion, streaming combined output to `log`
    ///
    /// # Errors
    ///
    /// Returns [`BuildError::SpawnFailed`] if the process cannot start,
    /// [`BuildError::ProcessFailed`] on a non-zero exit, and
    /// [`BuildError::ProcessKilled`] when the child died to a signal.
    pub async fn run(
        &self,
        program: &str,
        args: &[String],
        cwd: &Path,
        log: &mut StageLog,
    ) -> Result<()> {
        self.run_with_deadline(program, args, cwd, log, None).await
    }

    /// Like [`run`](Self::run), but the child is killed once the
    /// wall-clock budget expires
    ///
    /// # Errors
    ///
    /// As [`run`](Self::run), plus [`BuildError::Timeout`] on expiry.
    pub async fn run_with_timeout(
        &self,
        program: &str,
        args: &[String],
        cwd: &Path,
        log: &mut StageLog,
        budget: Duration,
    ) -> Result<()> {
        self.run_with_deadline(program, args, cwd, log, Some(budget))
            .await
    }

    async fn run_with_deadline(
        &self,
        program: &str,
        args: &[String],
        cwd: &Path,
        log: &mut StageLog,
        budget: Option<Duration>,
    ) -> Result<()> {
        let rendered = shell_quote_command(program, args);
        tracing::debug!(package = %self.package, command = %rendered, "running");
        log.write_line(&rendered).await?;
        self.sink.emit(Event::CommandStarted {
            package: self.package.clone(),
            command: rendered.clone(),
        });

        let (stdout, stderr) = log.stdio_pair().await?;
        let mut cmd = self.command(program, args, cwd);
        cmd.stdout(stdout).stderr(stderr);

        let mut child = cmd.spawn().map_err(|e| BuildError::SpawnFailed {
            command: rendered.clone(),
            message: e.to_string(),
        })?;

        let status = if let Some(budget) = budget {
            match tokio::time::timeout(budget, child.wait()).await {
                Ok(status) => status,
                Err(_) => {
                    // Reap the child before reporting; kill_on_drop alone
                    // would leave the wait status unknown.
                    let _ = child.start_kill();
                    let _ = child.wait().await;
                    return Err(BuildError::Timeout {
                        command: rendered,
                        seconds: budget.as_secs(),
                    }
                    .into());
                }
            }
        } else {
            child.wait().await
        };

        let status = status.map_err(|e| BuildError::SpawnFailed {
            command: rendered.clone(),
            message: e.to_string(),
        })?;

        if status.success() {
            Ok(())
        } else if let Some(code) = status.code() {
            Err(BuildError::ProcessFailed {
                command: rendered,
                code,
            }
            .into())
        } else {
            Err(BuildError::ProcessKilled { command: rendered }.into())
        }
    }

    /// Run a command and capture its stdout instead of logging it
    ///
    /// A non-zero exit is reported in the result, not as an error, so
    /// callers can use this for probes.
    ///
    /// # Errors
    ///
    /// Returns [`BuildError::SpawnFailed`] if the process cannot start.
    pub async fn run_capture(
        &self,
        program: &str,
        args: &[String],
        cwd: Option<&Path>,
    ) -> Result<CaptureResult> {
        let rendered = shell_quote_command(program, args);
        tracing::debug!(package = %self.package, command = %rendered, "capturing");

        let mut cmd = Command::new(program);
        cmd.args(args)
            .env_clear()
            .envs(&self.env)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true);
        if let Some(dir) = cwd {
            cmd.current_dir(dir);
        }

        let output = cmd.output().await.map_err(|e| BuildError::SpawnFailed {
            command: rendered,
            message: e.to_string(),
        })?;

        Ok(CaptureResult {
            success: output.status.success(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn runner() -> ProcessRunner {
        let env = std::env::vars().collect();
        ProcessRunner::new("demo", env, EventSink::discard())
    }

    #[test]
    fn quoting_leaves_plain_words_alone() {
        assert_eq!(shell_quote("--flags=-foo"), "--flags=-foo");
        assert_eq!(shell_quote("a b"), "'a b'");
        assert_eq!(shell_quote("it's"), "'it'\\''s'");
        assert_eq!(shell_quote(""), "''");
    }

    #[test]
    fn command_line_rendering() {
        let line = shell_quote_command(
            "runghc",
            &["-clear-package-db".to_string(), "Setup configure".to_string()],
        );
        assert_eq!(line, "runghc -clear-package-db 'Setup configure'");
    }

    #[tokio::test]
    async fn output_lands_in_the_stage_log_after_the_command_line() {
        let dir = tempdir().unwrap();
        let mut log = StageLog::new(dir.path().join("logs/build.out"));
        runner()
            .run(
                "sh",
                &["-c".to_string(), "echo out; echo err 1>&2".to_string()],
                dir.path(),
                &mut log,
            )
            .await
            .unwrap();

        let body = std::fs::read_to_string(log.path()).unwrap();
        let mut lines = body.lines();
        assert!(lines.next().unwrap().starts_with("sh -c"));
        assert!(body.contains("out"));
        assert!(body.contains("err"));
    }

    #[tokio::test]
    async fn nonzero_exit_maps_to_process_failed() {
        let dir = tempdir().unwrap();
        let mut log = StageLog::new(dir.path().join("build.out"));
        let err = runner()
            .run("sh", &["-c".to_string(), "exit 3".to_string()], dir.path(), &mut log)
            .await
            .unwrap_err();
        match err {
            kiln_errors::Error::Build(BuildError::ProcessFailed { code, .. }) => {
                assert_eq!(code, 3);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn timeout_kills_the_child() {
        let dir = tempdir().unwrap();
        let mut log = StageLog::new(dir.path().join("test.out"));
        let started = std::time::Instant::now();
        let err = runner()
            .run_with_timeout(
                "sh",
                &["-c".to_string(), "sleep 30".to_string()],
                dir.path(),
                &mut log,
                Duration::from_millis(200),
            )
            .await
            .unwrap_err();
        assert!(started.elapsed() < Duration::from_secs(10));
        assert!(matches!(
            err,
            kiln_errors::Error::Build(BuildError::Timeout { .. })
        ));
    }

    #[tokio::test]
    async fn capture_returns_stdout_and_status() {
        let dir = tempdir().unwrap();
        let ok = runner()
            .run_capture("sh", &["-c".to_string(), "echo hello".to_string()], Some(dir.path()))
            .await
            .unwrap();
        assert!(ok.success);
        assert_eq!(ok.stdout.trim(), "hello");

        let bad = runner()
            .run_capture("sh", &["-c".to_string(), "exit 1".to_string()], Some(dir.path()))
            .await
            .unwrap();
        assert!(!bad.success);
    }
}
