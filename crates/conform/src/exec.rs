use std::borrow::Cow;
use std::fmt;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use anyhow::{Context, Result};
use tracing::debug;

/// Captured result of one external command. Output is kept whole; nothing is streamed
/// or truncated.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StageResult {
    /// `None` when the process was terminated by a signal.
    pub exit_status: Option<i32>,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
}

impl StageResult {
    pub fn success(&self) -> bool {
        self.exit_status == Some(0)
    }

    pub fn stdout_text(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.stdout)
    }

    pub fn stderr_text(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.stderr)
    }

    /// Best text to show for a failed stage: stderr, else stdout, else the exit status.
    pub fn diagnostic(&self) -> String {
        if self.stderr.is_empty() && !self.stdout.is_empty() {
            return self.stdout_text().into_owned();
        }
        self.stderr_or_status()
    }

    pub fn stderr_or_status(&self) -> String {
        if !self.stderr.is_empty() {
            return self.stderr_text().into_owned();
        }
        match self.exit_status {
            Some(code) => format!("exited with status {code}"),
            None => "terminated by signal".to_string(),
        }
    }
}

/// A fully expanded command line. No shell is involved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub program: String,
    pub args: Vec<String>,
}

impl Invocation {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn for_path(path: &Path) -> Self {
        Self::new(path.display().to_string())
    }
}

impl fmt::Display for Invocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.program)?;
        for a in &self.args {
            if a.is_empty() || a.contains(char::is_whitespace) {
                write!(f, " {a:?}")?;
            } else {
                write!(f, " {a}")?;
            }
        }
        Ok(())
    }
}

/// Boundary to the external tools. Every call blocks until the command exits.
pub trait CommandRunner {
    /// Returns `Err` only when the command could not be run at all.
    fn run(&mut self, invocation: &Invocation) -> Result<StageResult>;
}

#[derive(Debug, Clone)]
pub struct ProcessRunner {
    cwd: PathBuf,
}

impl ProcessRunner {
    pub fn new(cwd: impl Into<PathBuf>) -> Self {
        Self { cwd: cwd.into() }
    }
}

impl CommandRunner for ProcessRunner {
    fn run(&mut self, invocation: &Invocation) -> Result<StageResult> {
        debug!(command = %invocation, cwd = %self.cwd.display(), "spawning");
        let out = Command::new(&invocation.program)
            .args(&invocation.args)
            .current_dir(&self.cwd)
            .stdin(Stdio::null())
            .output()
            .with_context(|| format!("[CONFORM_SPAWN] run command: {invocation}"))?;

        #[cfg(unix)]
        {
            use std::os::unix::process::ExitStatusExt as _;
            if let Some(signal) = out.status.signal() {
                debug!(command = %invocation, signal, "terminated by signal");
            }
        }

        debug!(
            command = %invocation,
            exit_status = ?out.status.code(),
            stdout_bytes = out.stdout.len(),
            stderr_bytes = out.stderr.len(),
            "finished"
        );
        Ok(StageResult {
            exit_status: out.status.code(),
            stdout: out.stdout,
            stderr: out.stderr,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn diagnostic_prefers_stderr_then_stdout() {
        let mut r = StageResult {
            exit_status: Some(1),
            stdout: b"out".to_vec(),
            stderr: b"err".to_vec(),
        };
        assert_eq!(r.diagnostic(), "err");
        r.stderr.clear();
        assert_eq!(r.diagnostic(), "out");
        r.stdout.clear();
        assert_eq!(r.diagnostic(), "exited with status 1");
        r.exit_status = None;
        assert_eq!(r.diagnostic(), "terminated by signal");
    }

    #[test]
    fn invocation_display_quotes_awkward_args() {
        let inv = Invocation::new("clang")
            .arg("fib.ll")
            .arg("my runtime.c")
            .arg("-o")
            .arg("fib");
        assert_eq!(inv.to_string(), "clang fib.ll \"my runtime.c\" -o fib");
    }

    #[cfg(unix)]
    #[test]
    fn process_runner_captures_both_streams() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut runner = ProcessRunner::new(dir.path());
        let inv = Invocation::new("sh")
            .arg("-c")
            .arg("printf 'a\\n'; printf 'b' >&2; exit 3");
        let r = runner.run(&inv).expect("run sh");
        assert_eq!(r.stdout, b"a\n");
        assert_eq!(r.stderr, b"b");
        assert_eq!(r.exit_status, Some(3));
        assert!(!r.success());
    }

    #[test]
    fn process_runner_reports_spawn_failure_as_err() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut runner = ProcessRunner::new(dir.path());
        let err = runner
            .run(&Invocation::new("conform-definitely-not-a-real-tool"))
            .expect_err("spawn must fail");
        assert!(format!("{err:#}").contains("[CONFORM_SPAWN]"));
    }
}
