//! Text-generation collaborators.
//!
//! Generation happens outside this crate: either an external command that
//! reads the prompt on stdin and prints its continuation, or a file of
//! generations recorded by an earlier run.

use std::collections::HashMap;
use std::fs;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::sync::mpsc::{self, Receiver};
use std::thread;
use std::time::{Duration, Instant};

use serde::Deserialize;
use tracing::warn;

use crate::dataset::QuestionId;
use crate::error::{EvalError, GenerationError, Result};
use crate::prompt::PromptMode;

pub const DEFAULT_MAX_NEW_TOKENS: usize = 50;

const POLL_INTERVAL: Duration = Duration::from_millis(20);

#[derive(Debug, Clone)]
pub struct GenerationRequest<'a> {
    pub question_id: &'a QuestionId,
    pub mode: PromptMode,
    pub prompt: &'a str,
    pub max_new_tokens: usize,
}

pub trait TextGenerator: Send + Sync {
    fn generate(&self, request: &GenerationRequest<'_>) -> std::result::Result<String, GenerationError>;
}

impl TextGenerator for Box<dyn TextGenerator> {
    fn generate(&self, request: &GenerationRequest<'_>) -> std::result::Result<String, GenerationError> {
        (**self).generate(request)
    }
}

/// Runs an external program per prompt.
///
/// Arguments may contain `{max_new_tokens}`, `{mode}` and `{checkpoint}`
/// placeholders. The prompt goes to stdin and stdout is the generation.
#[derive(Debug, Clone)]
pub struct CommandGenerator {
    argv: Vec<String>,
    checkpoint: Option<PathBuf>,
    timeout: Option<Duration>,
}

impl CommandGenerator {
    pub fn parse(command_line: &str) -> Result<Self> {
        let argv = shell_words::split(command_line)
            .map_err(|e| EvalError::InvalidArg(format!("generator command: {e}")))?;
        if argv.is_empty() {
            return Err(EvalError::InvalidArg(
                "generator command is empty".to_string(),
            ));
        }
        Ok(Self {
            argv,
            checkpoint: None,
            timeout: None,
        })
    }

    pub fn with_checkpoint(mut self, checkpoint: impl Into<PathBuf>) -> Self {
        self.checkpoint = Some(checkpoint.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    fn expand_args(&self, request: &GenerationRequest<'_>) -> Vec<String> {
        let checkpoint = self
            .checkpoint
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_default();
        self.argv
            .iter()
            .map(|arg| {
                arg.replace("{max_new_tokens}", &request.max_new_tokens.to_string())
                    .replace("{mode}", request.mode.name())
                    .replace("{checkpoint}", &checkpoint)
            })
            .collect()
    }

    fn wait_until(
        &self,
        child: &mut Child,
        deadline: Option<Instant>,
    ) -> std::result::Result<std::process::ExitStatus, GenerationError> {
        loop {
            if let Some(status) = child.try_wait().map_err(unavailable)? {
                return Ok(status);
            }
            if deadline.is_some_and(|d| Instant::now() >= d) {
                if let Err(err) = child.kill() {
                    warn!(error = %err, "failed to kill timed out generator");
                }
                let _ = child.wait();
                return Err(self.timed_out());
            }
            thread::sleep(POLL_INTERVAL);
        }
    }

    fn timed_out(&self) -> GenerationError {
        let limit = self.timeout.unwrap_or_default();
        GenerationError::Unavailable(format!(
            "generator timed out after {}",
            humantime::format_duration(limit)
        ))
    }
}

/// Waits for a pipe reader, giving up at `deadline`. A process the
/// generator left behind can hold the pipe open after the child exits.
fn collect<T>(rx: &Receiver<T>, deadline: Option<Instant>) -> Option<T> {
    match deadline {
        Some(d) => rx.recv_timeout(d.saturating_duration_since(Instant::now())).ok(),
        None => rx.recv().ok(),
    }
}

fn spawn_reader<R, T, F>(pipe: Option<R>, read: F) -> Option<Receiver<T>>
where
    R: Read + Send + 'static,
    T: Send + 'static,
    F: FnOnce(R) -> T + Send + 'static,
{
    pipe.map(|pipe| {
        let (tx, rx) = mpsc::channel();
        thread::spawn(move || {
            let _ = tx.send(read(pipe));
        });
        rx
    })
}

impl TextGenerator for CommandGenerator {
    fn generate(&self, request: &GenerationRequest<'_>) -> std::result::Result<String, GenerationError> {
        let args = self.expand_args(request);
        let mut cmd = Command::new(&args[0]);
        cmd.args(&args[1..]);
        cmd.stdin(Stdio::piped());
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());

        let deadline = self.timeout.map(|t| Instant::now() + t);
        let mut child = cmd
            .spawn()
            .map_err(|e| GenerationError::Unavailable(format!("spawn {}: {e}", args[0])))?;

        // Pipes are serviced on their own threads so a chatty child cannot
        // block on a full buffer while we poll for exit.
        if let Some(mut stdin) = child.stdin.take() {
            let prompt = request.prompt.to_string();
            thread::spawn(move || {
                // A generator may exit without reading its input.
                let _ = stdin.write_all(prompt.as_bytes());
            });
        }
        let stdout_rx = spawn_reader(child.stdout.take(), |mut out| {
            let mut buf = Vec::new();
            out.read_to_end(&mut buf).map(|_| buf)
        });
        let stderr_rx = spawn_reader(child.stderr.take(), |mut err| {
            let mut buf = String::new();
            let _ = err.read_to_string(&mut buf);
            buf
        });

        let status = self.wait_until(&mut child, deadline)?;
        let stdout = match &stdout_rx {
            Some(rx) => match collect(rx, deadline) {
                Some(read) => read.map_err(unavailable)?,
                None if deadline.is_some() => {
                    return Err(self.timed_out());
                }
                None => {
                    return Err(GenerationError::Unavailable(
                        "stdout reader stopped".to_string(),
                    ));
                }
            },
            None => Vec::new(),
        };

        if !status.success() {
            let stderr = stderr_rx
                .as_ref()
                .and_then(|rx| collect(rx, deadline))
                .unwrap_or_default();
            return Err(GenerationError::Unavailable(format!(
                "{} exited with {}: {}",
                args[0],
                status.code().map_or("signal".to_string(), |c| c.to_string()),
                stderr.trim()
            )));
        }

        Ok(String::from_utf8_lossy(&stdout).into_owned())
    }
}

fn unavailable(err: std::io::Error) -> GenerationError {
    GenerationError::Unavailable(err.to_string())
}

#[derive(Debug, Deserialize)]
struct RecordedLine {
    id: QuestionId,
    mode: PromptMode,
    text: String,
}

/// Replays generations saved as JSON Lines of `{"id", "mode", "text"}`.
///
/// Ids match on their text form, so `1` and `"1"` name the same question.
#[derive(Debug, Clone, Default)]
pub struct RecordedGenerator {
    texts: HashMap<(String, PromptMode), String>,
}

impl RecordedGenerator {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path)?;
        Self::parse(&raw)
    }

    pub fn parse(raw: &str) -> Result<Self> {
        let mut texts = HashMap::new();
        for (n, line) in raw.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            let rec: RecordedLine = serde_json::from_str(line).map_err(|e| {
                EvalError::InvalidArg(format!("recorded generation line {}: {e}", n + 1))
            })?;
            if texts.insert((rec.id.to_string(), rec.mode), rec.text).is_some() {
                warn!(id = %rec.id, mode = %rec.mode, "duplicate recorded generation, keeping the last");
            }
        }
        Ok(Self { texts })
    }

    pub fn insert(&mut self, id: QuestionId, mode: PromptMode, text: impl Into<String>) {
        self.texts.insert((id.to_string(), mode), text.into());
    }

    pub fn len(&self) -> usize {
        self.texts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.texts.is_empty()
    }
}

impl TextGenerator for RecordedGenerator {
    fn generate(&self, request: &GenerationRequest<'_>) -> std::result::Result<String, GenerationError> {
        self.texts
            .get(&(request.question_id.to_string(), request.mode))
            .cloned()
            .ok_or_else(|| {
                GenerationError::Unavailable(format!(
                    "no recorded {} generation for question {}",
                    request.mode, request.question_id
                ))
            })
    }
}
