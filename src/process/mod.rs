//! Long-lived interactive shell process (startup/IO/health).

use std::{
    ffi::OsStr,
    path::Path,
    process::Stdio,
};

use futures::FutureExt as _;
use regex::Regex;
use tempfile::TempPath;
use tokio::{
    io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader},
    process::{Child, ChildStdin, ChildStdout, Command},
};
use tracing::{debug, trace};

use crate::error::SandboxError;

pub mod grunt;

/// Text produced by one batch of commands, prompts stripped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionOutput {
    /// One entry per submitted command, in order.
    pub segments: Vec<String>,
}

impl SessionOutput {
    /// Output of the last command that printed anything.
    pub fn last_fragment(&self) -> &str {
        self.segments
            .iter()
            .rev()
            .map(|s| s.trim())
            .find(|s| !s.is_empty())
            .unwrap_or("")
    }
}

pub struct ProcessHandle {
    pub child: Child,
    pub stdin: ChildStdin,
    pub stdout: ChildStdout,
}

pub struct InteractiveSession {
    handle: ProcessHandle,
    prompt: Regex,
    // Files the child reads for its whole lifetime.
    held: Vec<TempPath>,
}

impl InteractiveSession {
    /// Spawns `program` and waits for its first prompt.
    pub async fn spawn<I, S>(
        program: &Path,
        args: I,
        env: &[(String, String)],
        cwd: &Path,
        prompt: Regex,
    ) -> Result<Self, SandboxError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        let mut cmd = Command::new(program);
        cmd.args(args)
            .envs(env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .current_dir(cwd)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = cmd
            .spawn()
            .map_err(|e| SandboxError::io(format!("starting {}", program.display()), e))?;
        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| SandboxError::io("no stdin", std::io::ErrorKind::BrokenPipe.into()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| SandboxError::io("no stdout", std::io::ErrorKind::BrokenPipe.into()))?;
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    debug!(target: "pigpen::session", "{line}");
                }
            });
        }

        let mut session = Self { handle: ProcessHandle { child, stdin, stdout }, prompt, held: Vec::new() };
        session.read_until_prompt(1).await?;
        debug!(program = %program.display(), "interactive session ready");
        Ok(session)
    }

    /// Writes each command on its own line, then reads until the shell is
    /// idle at a prompt again.
    pub async fn send<S: AsRef<str>>(&mut self, commands: &[S]) -> Result<SessionOutput, SandboxError> {
        if commands.is_empty() {
            return Ok(SessionOutput { segments: Vec::new() });
        }
        for command in commands {
            let line = format!("{}\n", command.as_ref());
            trace!(command = command.as_ref(), "session <-");
            if self.handle.stdin.write_all(line.as_bytes()).await.is_err() {
                return Err(SandboxError::SessionTerminated);
            }
        }
        if self.handle.stdin.flush().await.is_err() {
            return Err(SandboxError::SessionTerminated);
        }
        self.read_until_prompt(commands.len()).await
    }

    /// Accumulates output until the shell is idle at a prompt. A read that
    /// would block means "nothing more yet": if the trailing fragment is a
    /// prompt and at least `expected` prompts have been seen, the batch is
    /// done; otherwise wait for readiness, yielding to the runtime.
    async fn read_until_prompt(&mut self, expected: usize) -> Result<SessionOutput, SandboxError> {
        let mut raw = String::new();
        let mut pending: Vec<u8> = Vec::new();
        let mut buf = [0u8; 4096];

        loop {
            let n = match self.handle.stdout.read(&mut buf).now_or_never() {
                Some(res) => res.map_err(|_| SandboxError::SessionTerminated)?,
                None => {
                    if self.at_prompt(&raw, expected) {
                        break;
                    }
                    self.handle
                        .stdout
                        .read(&mut buf)
                        .await
                        .map_err(|_| SandboxError::SessionTerminated)?
                }
            };
            if n == 0 {
                return Err(SandboxError::SessionTerminated);
            }
            pending.extend_from_slice(&buf[..n]);
            drain_utf8(&mut pending, &mut raw);
        }

        // One segment per prompt; the piece after the final prompt is empty.
        let mut segments: Vec<String> = self.prompt.split(&raw).map(str::to_string).collect();
        segments.pop();
        trace!(segments = segments.len(), "session ->");
        Ok(SessionOutput { segments })
    }

    fn at_prompt(&self, raw: &str, expected: usize) -> bool {
        let fragment = raw.rsplit('\n').next().unwrap_or("");
        let ends_in_prompt = self
            .prompt
            .find_iter(fragment)
            .last()
            .is_some_and(|m| m.end() == fragment.len());
        ends_in_prompt && self.prompt.find_iter(raw).count() >= expected
    }

    /// Keeps `path` on disk until the session is dropped.
    pub fn hold(&mut self, path: TempPath) {
        self.held.push(path);
    }

    pub fn is_alive(&mut self) -> bool {
        matches!(self.handle.child.try_wait(), Ok(None))
    }

    pub async fn kill(mut self) {
        if let Err(e) = self.handle.child.kill().await {
            debug!(error = %e, "session already gone");
        }
    }
}

/// Moves the decodable prefix of `pending` into `out`, keeping an incomplete
/// trailing multi-byte sequence for the next read.
fn drain_utf8(pending: &mut Vec<u8>, out: &mut String) {
    let valid = match std::str::from_utf8(pending) {
        Ok(_) => pending.len(),
        Err(e) if e.error_len().is_none() => e.valid_up_to(),
        Err(_) => {
            out.push_str(&String::from_utf8_lossy(pending));
            pending.clear();
            return;
        }
    };
    out.push_str(std::str::from_utf8(&pending[..valid]).unwrap_or_default());
    pending.drain(..valid);
}
