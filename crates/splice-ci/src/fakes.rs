//! Scripted toolchain for tests that must not depend on an installed compiler.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::toolchain::{BuildContext, CompileOutput, Toolchain, ToolchainError};

/// Replays queued compile results; the last one repeats once the queue drains.
///
/// Each call records the text it was asked to compile.
pub struct ScriptedToolchain {
    replies: Mutex<VecDeque<Result<(i32, String), String>>>,
    last: Mutex<Option<Result<(i32, String), String>>>,
    inputs: Mutex<Vec<String>>,
    calls: AtomicUsize,
}

impl ScriptedToolchain {
    /// Each reply is `Ok((exit_code, stderr))` or `Err(message)` for a spawn failure.
    pub fn new(replies: Vec<Result<(i32, String), String>>) -> Self {
        Self {
            replies: Mutex::new(replies.into()),
            last: Mutex::new(None),
            inputs: Mutex::new(Vec::new()),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn succeeding() -> Self {
        Self::new(vec![Ok((0, String::new()))])
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn inputs(&self) -> Vec<String> {
        self.inputs.lock().unwrap().clone()
    }
}

#[async_trait]
impl Toolchain for ScriptedToolchain {
    async fn compile(
        &self,
        input: &Path,
        ctx: &BuildContext,
    ) -> Result<CompileOutput, ToolchainError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let text = std::fs::read_to_string(input).unwrap_or_default();
        self.inputs.lock().unwrap().push(text);

        let reply = {
            let mut queue = self.replies.lock().unwrap();
            let mut last = self.last.lock().unwrap();
            match queue.pop_front() {
                Some(r) => {
                    *last = Some(r.clone());
                    r
                }
                None => last.clone().unwrap_or(Ok((0, String::new()))),
            }
        };

        match reply {
            Ok((exit_code, stderr)) => {
                let executable: Option<PathBuf> = (exit_code == 0).then(|| ctx.output.clone());
                Ok(CompileOutput {
                    exit_code,
                    stdout: String::new(),
                    stderr,
                    executable,
                    duration_ms: 0,
                })
            }
            Err(message) => Err(ToolchainError::Spawn {
                program: "scripted".to_string(),
                source: std::io::Error::new(std::io::ErrorKind::NotFound, message),
            }),
        }
    }
}
