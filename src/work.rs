//! Shell-command work function.
//!
//! The CLI does not know how to transcode or transcribe anything; each stage
//! is a user-configured command run once per item. The command receives the
//! item payload as JSON on stdin and identifying details in the environment.
//! A non-zero exit is a failure whose message carries the command's stderr.
use crate::cache::ResourceCache;
use crate::item::WorkItem;
use anyhow::{anyhow, Context, Result};
use std::io::Write;
use std::path::PathBuf;
use std::process::{Child, Command, Stdio};

pub const ENV_ITEM_KEY: &str = "STAGERUN_ITEM_KEY";
pub const ENV_STAGE: &str = "STAGERUN_STAGE";
pub const ENV_ITEM_PATH: &str = "STAGERUN_ITEM_PATH";

const MAX_CAPTURED_BYTES: usize = 2048;

pub struct CommandWork<'a> {
    program: String,
    args: Vec<String>,
    stage: String,
    resolved: &'a ResourceCache<String, PathBuf>,
}

impl<'a> CommandWork<'a> {
    pub fn new(
        command_line: &str,
        stage: &str,
        resolved: &'a ResourceCache<String, PathBuf>,
    ) -> Result<Self> {
        let mut parts = shell_words::split(command_line)
            .with_context(|| format!("parse command {command_line:?}"))?
            .into_iter();
        let program = parts
            .next()
            .ok_or_else(|| anyhow!("work command must not be empty"))?;
        Ok(Self {
            program,
            args: parts.collect(),
            stage: stage.to_string(),
            resolved,
        })
    }

    /// Run the command for one item and return its trimmed stdout.
    pub fn run(&self, item: &WorkItem) -> Result<String> {
        let program = self.resolved.get_or_load(&self.program, |program| {
            which::which(program).with_context(|| format!("resolve command {program:?}"))
        })?;
        let payload =
            serde_json::to_vec(&item.payload).context("serialize item payload")?;

        let mut command = Command::new(&program);
        command
            .args(&self.args)
            .env(ENV_ITEM_KEY, &item.key)
            .env(ENV_STAGE, &self.stage)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        if let Some(path) = item.path() {
            command.env(ENV_ITEM_PATH, path);
        }
        let mut child = command
            .spawn()
            .with_context(|| format!("spawn {}", program.display()))?;
        if let Some(mut stdin) = child.stdin.take() {
            // A command that ignores stdin may exit before reading it.
            if let Err(err) = stdin.write_all(&payload) {
                if err.kind() != std::io::ErrorKind::BrokenPipe {
                    drop(stdin);
                    kill_and_reap(&mut child);
                    return Err(err).context("write item payload to stdin");
                }
            }
        }
        let output = child
            .wait_with_output()
            .with_context(|| format!("wait for {}", program.display()))?;

        if !output.status.success() {
            let stderr = clip_output(&output.stderr, MAX_CAPTURED_BYTES);
            let stderr = stderr.trim();
            let code = output
                .status
                .code()
                .map(|code| code.to_string())
                .unwrap_or_else(|| "signal".to_string());
            if stderr.is_empty() {
                return Err(anyhow!("{} exited with {code}", self.program));
            }
            return Err(anyhow!("{} exited with {code}: {stderr}", self.program));
        }
        Ok(clip_output(&output.stdout, MAX_CAPTURED_BYTES)
            .trim()
            .to_string())
    }
}

/// Stop a child we are abandoning so it does not linger as a zombie.
fn kill_and_reap(child: &mut Child) {
    if let Err(err) = child.kill() {
        tracing::debug!(pid = child.id(), error = %err, "kill abandoned command");
    }
    if let Err(err) = child.wait() {
        tracing::warn!(pid = child.id(), error = %err, "reap abandoned command");
    }
}

/// Lossy UTF-8 view of captured output, cut at a char boundary.
fn clip_output(bytes: &[u8], max_bytes: usize) -> String {
    let text = String::from_utf8_lossy(bytes);
    if text.len() <= max_bytes {
        return text.into_owned();
    }
    let mut end = max_bytes;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &text[..end])
}
