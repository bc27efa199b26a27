//! Host command execution.
//!
//! Mount utilities, `curl`, `rpm2cpio`, `cpio` and `depmod` are all driven
//! through [`Cmd`], a small builder that captures output and turns a non-zero
//! exit into an error carrying the caller's hint.

use anyhow::{bail, Context, Result};
use std::ffi::{OsStr, OsString};
use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Command, ExitStatus, Stdio};
use std::thread;
use tracing::debug;

/// Captured result of a finished command.
#[derive(Debug)]
pub struct CommandResult {
    pub status: ExitStatus,
    pub stdout: String,
    pub stderr: String,
}

impl CommandResult {
    pub fn success(&self) -> bool {
        self.status.success()
    }
}

/// Builder for a host command invocation.
#[derive(Debug, Clone)]
pub struct Cmd {
    program: OsString,
    args: Vec<OsString>,
    cwd: Option<PathBuf>,
    error_msg: Option<String>,
    allow_fail: bool,
}

impl Cmd {
    pub fn new(program: impl AsRef<OsStr>) -> Self {
        Self {
            program: program.as_ref().to_os_string(),
            args: Vec::new(),
            cwd: None,
            error_msg: None,
            allow_fail: false,
        }
    }

    pub fn arg(mut self, arg: impl AsRef<OsStr>) -> Self {
        self.args.push(arg.as_ref().to_os_string());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        self.args
            .extend(args.into_iter().map(|a| a.as_ref().to_os_string()));
        self
    }

    pub fn arg_path(self, path: &Path) -> Self {
        self.arg(path.as_os_str())
    }

    pub fn current_dir(mut self, dir: &Path) -> Self {
        self.cwd = Some(dir.to_path_buf());
        self
    }

    /// Message prefixed to the failure when the command exits non-zero.
    pub fn error_msg(mut self, msg: impl Into<String>) -> Self {
        self.error_msg = Some(msg.into());
        self
    }

    /// Return the result even on non-zero exit instead of failing.
    pub fn allow_fail(mut self) -> Self {
        self.allow_fail = true;
        self
    }

    fn display(&self) -> String {
        let mut parts = vec![self.program.to_string_lossy().into_owned()];
        parts.extend(self.args.iter().map(|a| a.to_string_lossy().into_owned()));
        parts.join(" ")
    }

    fn command(&self) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args);
        if let Some(dir) = &self.cwd {
            cmd.current_dir(dir);
        }
        cmd
    }

    pub fn run(self) -> Result<CommandResult> {
        debug!(command = %self.display(), "running host command");
        let output = self
            .command()
            .stdin(Stdio::null())
            .output()
            .with_context(|| format!("failed to spawn '{}'", self.program.to_string_lossy()))?;

        let result = CommandResult {
            status: output.status,
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        };
        self.check(result)
    }

    /// Run `self | next`, capturing the output of `next`. The source's
    /// stderr is drained on its own thread so a chatty source cannot fill
    /// the pipe and stall the pipeline.
    pub fn pipe_into(self, next: Cmd) -> Result<CommandResult> {
        debug!(command = %format!("{} | {}", self.display(), next.display()), "running host pipeline");
        let mut first = self
            .command()
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .with_context(|| format!("failed to spawn '{}'", self.program.to_string_lossy()))?;
        let first_stdout = first
            .stdout
            .take()
            .context("pipeline source has no stdout handle")?;
        let mut first_stderr = first
            .stderr
            .take()
            .context("pipeline source has no stderr handle")?;
        let stderr_reader = thread::spawn(move || {
            let mut buf = Vec::new();
            let _ = first_stderr.read_to_end(&mut buf);
            buf
        });

        let output = next
            .command()
            .stdin(Stdio::from(first_stdout))
            .output();
        let status = first
            .wait()
            .with_context(|| format!("waiting for '{}'", self.program.to_string_lossy()));
        let first_stderr = stderr_reader.join().unwrap_or_default();
        let output =
            output.with_context(|| format!("failed to spawn '{}'", next.program.to_string_lossy()))?;

        let first_result = CommandResult {
            status: status?,
            stdout: String::new(),
            stderr: String::from_utf8_lossy(&first_stderr).into_owned(),
        };
        self.check(first_result)?;

        let result = CommandResult {
            status: output.status,
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        };
        next.check(result)
    }

    fn check(&self, result: CommandResult) -> Result<CommandResult> {
        if result.success() || self.allow_fail {
            return Ok(result);
        }
        let hint = self
            .error_msg
            .clone()
            .unwrap_or_else(|| format!("'{}' failed", self.display()));
        bail!(
            "{} ({}): {}",
            hint,
            result.status,
            result.stderr.trim()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_captures_stdout() {
        let result = Cmd::new("echo").arg("hello").run().unwrap();
        assert!(result.success());
        assert_eq!(result.stdout.trim(), "hello");
    }

    #[test]
    fn failure_carries_error_msg() {
        let err = Cmd::new("false")
            .error_msg("mount refused")
            .run()
            .unwrap_err();
        assert!(err.to_string().contains("mount refused"));
    }

    #[test]
    fn allow_fail_returns_result() {
        let result = Cmd::new("false").allow_fail().run().unwrap();
        assert!(!result.success());
    }

    #[test]
    fn pipe_into_feeds_second_command() {
        let result = Cmd::new("printf")
            .arg("a\nb\nc\n")
            .pipe_into(Cmd::new("wc").arg("-l"))
            .unwrap();
        assert_eq!(result.stdout.trim(), "3");
    }

    #[test]
    fn pipe_into_survives_noisy_source_stderr() {
        // Well past a pipe buffer of stderr before the source closes stdout.
        let result = Cmd::new("sh")
            .args(["-c", "head -c 300000 /dev/zero >&2; echo done"])
            .pipe_into(Cmd::new("cat"))
            .unwrap();
        assert_eq!(result.stdout.trim(), "done");
    }

    #[test]
    fn pipe_into_reports_failing_source() {
        let err = Cmd::new("sh")
            .args(["-c", "echo broken package >&2; exit 3"])
            .error_msg("rpm2cpio failed")
            .pipe_into(Cmd::new("cat"))
            .unwrap_err();
        let message = err.to_string();
        assert!(message.contains("rpm2cpio failed"));
        assert!(message.contains("broken package"));
    }

    #[test]
    fn current_dir_is_honored() {
        let temp = tempfile::TempDir::new().unwrap();
        let result = Cmd::new("pwd").current_dir(temp.path()).run().unwrap();
        let reported = std::fs::canonicalize(result.stdout.trim()).unwrap();
        assert_eq!(reported, std::fs::canonicalize(temp.path()).unwrap());
    }
}
