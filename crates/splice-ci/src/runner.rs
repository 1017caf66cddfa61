//! External process execution with a hard timeout.

use std::path::Path;
use std::process::Stdio;
use std::time::{Duration, Instant};

use tokio::process::Command;
use tracing::debug;

use crate::toolchain::ToolchainError;

/// Captured result of one finished process.
#[derive(Debug, Clone)]
pub struct ProcessOutput {
    /// Exit code; `-1` when the process was terminated by a signal.
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
    pub duration_ms: u64,
}

impl ProcessOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    /// stderr followed by stdout, the way compiler diagnostics are read.
    pub fn combined(&self) -> String {
        match (self.stderr.is_empty(), self.stdout.is_empty()) {
            (true, _) => self.stdout.clone(),
            (false, true) => self.stderr.clone(),
            (false, false) => format!("{}\n{}", self.stderr, self.stdout),
        }
    }
}

/// Runs one argv to completion, killing the child when the timeout elapses
/// or the future is dropped.
pub struct ProcessRunner;

impl ProcessRunner {
    pub async fn run(
        argv: &[String],
        working_dir: Option<&Path>,
        timeout: Duration,
    ) -> Result<ProcessOutput, ToolchainError> {
        let start = Instant::now();
        let (exe, args) = argv.split_first().ok_or(ToolchainError::EmptyCommand)?;

        let mut command = Command::new(exe);
        command
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = working_dir {
            command.current_dir(dir);
        }

        debug!(program = %exe, args = ?args, "spawning process");
        let child = command.spawn().map_err(|source| ToolchainError::Spawn {
            program: exe.clone(),
            source,
        })?;

        let output = tokio::time::timeout(timeout, child.wait_with_output())
            .await
            .map_err(|_| ToolchainError::Timeout {
                program: exe.clone(),
                secs: timeout.as_secs(),
            })?
            .map_err(|source| ToolchainError::Spawn {
                program: exe.clone(),
                source,
            })?;

        Ok(ProcessOutput {
            exit_code: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
            duration_ms: start.elapsed().as_millis() as u64,
        })
    }
}
