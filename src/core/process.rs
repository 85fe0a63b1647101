//! core::process
//!
//! The single doorway for spawning external tools (container engine,
//! compose, proxy reload, certificate issuer, socket table queries).
//!
//! Output is treated opaquely: callers receive the exit code and the raw
//! text, and only the container listing is ever parsed further.

use std::io::{BufRead, BufReader, Read};
use std::path::Path;
use std::process::{Child, Command, Stdio};
use std::sync::mpsc;
use std::thread;

use thiserror::Error;
use tracing::{debug, instrument};

/// Errors from spawning a process.
#[derive(Debug, Error)]
pub enum ProcessError {
    /// The program is not on `PATH`.
    #[error("'{0}' not found on PATH")]
    NotFound(String),

    /// The program exists but may not be executed.
    #[error("permission denied running '{0}'")]
    PermissionDenied(String),

    /// Any other spawn or pipe failure.
    #[error("failed to run '{program}': {source}")]
    Io {
        program: String,
        #[source]
        source: std::io::Error,
    },
}

impl ProcessError {
    fn from_spawn(program: &str, err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::NotFound => ProcessError::NotFound(program.to_string()),
            std::io::ErrorKind::PermissionDenied => {
                ProcessError::PermissionDenied(program.to_string())
            }
            _ => ProcessError::Io {
                program: program.to_string(),
                source: err,
            },
        }
    }
}

/// Captured result of a finished process.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProcessOutput {
    /// Exit code; `None` when terminated by a signal.
    pub code: Option<i32>,
    /// Captured standard output.
    pub stdout: String,
    /// Captured standard error.
    pub stderr: String,
}

impl ProcessOutput {
    /// True when the process exited with code 0.
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }

    /// Stdout and stderr joined, for diagnostics.
    pub fn combined(&self) -> String {
        match (self.stdout.trim().is_empty(), self.stderr.trim().is_empty()) {
            (true, true) => String::new(),
            (false, true) => self.stdout.trim_end().to_string(),
            (true, false) => self.stderr.trim_end().to_string(),
            (false, false) => format!("{}\n{}", self.stdout.trim_end(), self.stderr.trim_end()),
        }
    }
}

/// Run a program to completion and capture its output.
#[instrument(level = "debug", skip(args), fields(args = ?args))]
pub fn run(program: &str, args: &[&str], cwd: Option<&Path>) -> Result<ProcessOutput, ProcessError> {
    let mut cmd = Command::new(program);
    cmd.args(args).stdin(Stdio::null());
    if let Some(dir) = cwd {
        cmd.current_dir(dir);
    }

    let output = cmd.output().map_err(|e| ProcessError::from_spawn(program, e))?;
    let result = ProcessOutput {
        code: output.status.code(),
        stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
        stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
    };
    debug!(code = ?result.code, "process finished");
    Ok(result)
}

/// Run a program, forwarding every output line to `sink` as it arrives.
///
/// Stdout and stderr are both forwarded. The returned output holds the
/// full text of each stream for error reporting.
#[instrument(level = "debug", skip(args, sink), fields(args = ?args))]
pub fn run_streaming(
    program: &str,
    args: &[&str],
    cwd: Option<&Path>,
    sink: &mut dyn FnMut(&str),
) -> Result<ProcessOutput, ProcessError> {
    let mut cmd = Command::new(program);
    cmd.args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    if let Some(dir) = cwd {
        cmd.current_dir(dir);
    }

    let mut child = cmd.spawn().map_err(|e| ProcessError::from_spawn(program, e))?;
    let pipe_err = |source| ProcessError::Io {
        program: program.to_string(),
        source,
    };

    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| pipe_err(std::io::Error::other("stdout not captured")))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| pipe_err(std::io::Error::other("stderr not captured")))?;

    let (tx, rx) = mpsc::channel::<(bool, String)>();
    let tx_err = tx.clone();
    let out_reader = thread::spawn(move || forward_lines(stdout, false, tx));
    let err_reader = thread::spawn(move || forward_lines(stderr, true, tx_err));

    let mut result = ProcessOutput::default();
    for (is_err, line) in rx {
        sink(&line);
        let target = if is_err {
            &mut result.stderr
        } else {
            &mut result.stdout
        };
        target.push_str(&line);
        target.push('\n');
    }

    let _ = out_reader.join();
    let _ = err_reader.join();
    let status = child.wait().map_err(pipe_err)?;
    result.code = status.code();
    debug!(code = ?result.code, "streamed process finished");
    Ok(result)
}

fn forward_lines(stream: impl Read, is_err: bool, tx: mpsc::Sender<(bool, String)>) {
    for line in BufReader::new(stream).lines() {
        let Ok(line) = line else { break };
        if tx.send((is_err, line)).is_err() {
            break;
        }
    }
}

/// A process left running while the caller does other work.
///
/// The child is killed when the handle is dropped without being waited on.
#[derive(Debug)]
pub struct BackgroundProcess {
    program: String,
    child: Option<Child>,
}

impl BackgroundProcess {
    /// Exit code if the process has already exited.
    pub fn try_exit(&mut self) -> Result<Option<Option<i32>>, ProcessError> {
        let Some(child) = self.child.as_mut() else {
            return Ok(None);
        };
        child
            .try_wait()
            .map(|status| status.map(|s| s.code()))
            .map_err(|source| ProcessError::Io {
                program: self.program.clone(),
                source,
            })
    }

    /// Block until the process exits.
    pub fn wait(mut self) -> Result<Option<i32>, ProcessError> {
        let Some(mut child) = self.child.take() else {
            return Ok(None);
        };
        let status = child.wait().map_err(|source| ProcessError::Io {
            program: self.program.clone(),
            source,
        })?;
        Ok(status.code())
    }

    /// Terminate the process.
    pub fn kill(mut self) {
        if let Some(mut child) = self.child.take() {
            let _ = child.kill();
            let _ = child.wait();
        }
    }
}

impl Drop for BackgroundProcess {
    fn drop(&mut self) {
        if let Some(mut child) = self.child.take() {
            debug!(program = %self.program, "killing background process");
            let _ = child.kill();
            let _ = child.wait();
        }
    }
}

/// Start a program without waiting for it. Its output is discarded.
#[instrument(level = "debug", skip(args), fields(args = ?args))]
pub fn spawn_background(program: &str, args: &[&str]) -> Result<BackgroundProcess, ProcessError> {
    let child = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .map_err(|e| ProcessError::from_spawn(program, e))?;
    Ok(BackgroundProcess {
        program: program.to_string(),
        child: Some(child),
    })
}

/// Check whether a program can be found on `PATH`.
pub fn which(program: &str) -> bool {
    let Some(path_var) = std::env::var_os("PATH") else {
        return false;
    };
    std::env::split_paths(&path_var).any(|dir| {
        let candidate = dir.join(program);
        if candidate.is_file() {
            return true;
        }
        cfg!(windows) && dir.join(format!("{}.exe", program)).is_file()
    })
}
