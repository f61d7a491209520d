//! Agent session protocol reader
//!
//! Spawns the external agent once per turn, feeds it the command plus
//! the capability allow-list and the optional continuation token, and
//! parses its stdout incrementally. Events are yielded as each record
//! completes; the reader never waits for process exit before yielding.
//! The subprocess runs under kill_on_drop so shutdown can never leave
//! an orphan behind.

use crate::capability::{CapabilityError, CapabilitySet};
use crate::event::{RecordCursor, StreamEvent, TurnErrorKind};
use std::path::PathBuf;
use std::process::Stdio;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::process::Command as TokioCommand;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

#[derive(Error, Debug)]
pub enum RunnerError {
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Failed to start agent: {0}")]
    DispatchFailed(String),

    #[error(transparent)]
    Capability(#[from] CapabilityError),
}

/// Agent dispatch configuration
#[derive(Debug, Clone)]
pub struct RunnerConfig {
    /// Agent executable; bare names are resolved through PATH
    pub binary: PathBuf,

    /// Working directory the agent operates in
    pub working_dir: Option<PathBuf>,

    /// Instructions appended to the agent's system prompt
    pub system_prompt: Option<String>,

    /// Model override passed through to the agent
    pub model: Option<String>,

    /// Capabilities granted to the agent
    pub capabilities: CapabilitySet,

    /// Tool-invocation cap; the reader kills the process beyond it
    pub max_turns: usize,

    /// Events buffered toward the consumer
    pub channel_capacity: usize,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            binary: PathBuf::from("claude"),
            working_dir: None,
            system_prompt: None,
            model: None,
            capabilities: CapabilitySet::with_default_capabilities(),
            max_turns: 25,
            channel_capacity: 64,
        }
    }
}

impl RunnerConfig {
    /// Validate configuration
    pub fn validate(&self) -> Result<(), RunnerError> {
        if self.binary.as_os_str().is_empty() {
            return Err(RunnerError::InvalidConfig(
                "agent binary must be set".to_string(),
            ));
        }

        if self.max_turns == 0 {
            return Err(RunnerError::InvalidConfig(
                "max_turns must be greater than 0".to_string(),
            ));
        }

        if self.capabilities.is_empty() {
            return Err(RunnerError::InvalidConfig(
                "capability list must not be empty".to_string(),
            ));
        }

        if self.channel_capacity == 0 {
            return Err(RunnerError::InvalidConfig(
                "channel_capacity must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }
}

/// The in-order event stream of one turn.
///
/// Finite and not restartable. Dropping the stream cancels the turn and
/// kills the subprocess.
pub struct TurnStream {
    events: mpsc::Receiver<StreamEvent>,
    cancel: CancellationToken,
}

impl TurnStream {
    /// Pull the next event. Returns None after StreamEnd was consumed.
    pub async fn next_event(&mut self) -> Option<StreamEvent> {
        self.events.recv().await
    }

    /// Token that aborts this turn when cancelled
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Abandon the turn and kill the agent process.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }
}

impl Drop for TurnStream {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Dispatches commands to the external agent, one subprocess per turn.
pub struct AgentRunner {
    config: RunnerConfig,
    resolved_binary: PathBuf,
}

impl AgentRunner {
    pub fn new(config: RunnerConfig) -> Result<Self, RunnerError> {
        config.validate()?;

        let resolved_binary = resolve_binary(&config.binary);
        debug!("Agent binary: {:?}", resolved_binary);

        Ok(Self {
            config,
            resolved_binary,
        })
    }

    pub fn config(&self) -> &RunnerConfig {
        &self.config
    }

    /// Build the full argument list for one dispatch
    fn build_args(&self, prompt: &str, resume: Option<&str>) -> Result<Vec<String>, RunnerError> {
        let mut args = vec![
            "-p".to_string(),
            prompt.to_string(),
            "--output-format".to_string(),
            "stream-json".to_string(),
            "--verbose".to_string(),
            "--include-partial-messages".to_string(),
            "--allowedTools".to_string(),
            self.config.capabilities.to_flag_value()?,
            "--max-turns".to_string(),
            self.config.max_turns.to_string(),
        ];

        if let Some(ref system_prompt) = self.config.system_prompt {
            args.push("--append-system-prompt".to_string());
            args.push(system_prompt.clone());
        }

        if let Some(ref model) = self.config.model {
            args.push("--model".to_string());
            args.push(model.clone());
        }

        if let Some(token) = resume {
            args.push("--resume".to_string());
            args.push(token.to_string());
        }

        Ok(args)
    }

    /// Start the agent for one turn and stream its events.
    ///
    /// Fails immediately if the process cannot be spawned; this is the
    /// dispatch-time error path, before any event is produced.
    pub async fn dispatch(
        &self,
        prompt: &str,
        resume: Option<&str>,
    ) -> Result<TurnStream, RunnerError> {
        let args = self.build_args(prompt, resume)?;

        info!(
            "Dispatching to agent (resume: {})",
            resume
                .map(|t| t.get(..12).unwrap_or(t))
                .unwrap_or("none")
        );

        let mut command = TokioCommand::new(&self.resolved_binary);
        command
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        if let Some(ref dir) = self.config.working_dir {
            command.current_dir(dir);
        }

        let mut child = command
            .spawn()
            .map_err(|e| RunnerError::DispatchFailed(format!("{:?}: {}", self.resolved_binary, e)))?;

        let stdout = child.stdout.take().ok_or_else(|| {
            RunnerError::DispatchFailed("failed to capture agent stdout".to_string())
        })?;
        let stderr = child.stderr.take().ok_or_else(|| {
            RunnerError::DispatchFailed("failed to capture agent stderr".to_string())
        })?;

        // Stderr is drained concurrently so the child never blocks on a
        // full pipe; only error-looking output is surfaced
        tokio::spawn(async move {
            let mut buf = String::new();
            let mut reader = BufReader::new(stderr);
            if reader.read_to_string(&mut buf).await.is_ok() {
                let lower = buf.to_lowercase();
                if ["error", "failed", "exception"].iter().any(|w| lower.contains(w)) {
                    warn!("Agent stderr: {}", buf.chars().take(500).collect::<String>());
                }
            }
        });

        let (tx, rx) = mpsc::channel(self.config.channel_capacity);
        let cancel = CancellationToken::new();
        let reader_cancel = cancel.clone();
        let max_turns = self.config.max_turns;

        tokio::spawn(async move {
            read_event_stream(child, stdout, tx, reader_cancel, max_turns).await;
        });

        Ok(TurnStream { events: rx, cancel })
    }
}

/// Reader task body: one turn's stdout → ordered events.
async fn read_event_stream(
    mut child: tokio::process::Child,
    stdout: tokio::process::ChildStdout,
    tx: mpsc::Sender<StreamEvent>,
    cancel: CancellationToken,
    max_turns: usize,
) {
    let mut cursor = RecordCursor::new();
    let mut lines = BufReader::new(stdout).lines();

    loop {
        let next = tokio::select! {
            _ = cancel.cancelled() => {
                debug!("Turn cancelled, killing agent process");
                let _ = child.kill().await;
                let _ = tx.send(StreamEvent::StreamEnd).await;
                return;
            }
            line = lines.next_line() => line,
        };

        match next {
            Ok(Some(line)) => {
                for event in cursor.feed_line(&line) {
                    // Enforce the invocation cap before forwarding the
                    // excess invocation
                    if matches!(event, StreamEvent::ToolInvocation { .. })
                        && cursor.tool_invocations() > max_turns
                    {
                        warn!("Agent exceeded {} tool invocations, terminating", max_turns);
                        let _ = child.kill().await;
                        let _ = tx
                            .send(StreamEvent::Error {
                                kind: TurnErrorKind::TurnCapExceeded,
                                message: "I hit the turn limit on that task.".to_string(),
                            })
                            .await;
                        let _ = tx.send(StreamEvent::StreamEnd).await;
                        return;
                    }

                    let is_protocol_error = matches!(
                        event,
                        StreamEvent::Error {
                            kind: TurnErrorKind::Protocol,
                            ..
                        }
                    );

                    if tx.send(event).await.is_err() {
                        debug!("Turn consumer gone, killing agent process");
                        let _ = child.kill().await;
                        return;
                    }

                    if is_protocol_error {
                        let _ = child.kill().await;
                        let _ = tx.send(StreamEvent::StreamEnd).await;
                        return;
                    }
                }
            }
            Ok(None) => break,
            Err(e) => {
                warn!("Agent stdout read failed: {}", e);
                break;
            }
        }
    }

    // Stdout closed: the process is exiting
    match child.wait().await {
        Ok(status) => debug!("Agent exited with {}", status),
        Err(e) => warn!("Agent wait failed: {}", e),
    }

    if !cursor.saw_final() {
        // Exit without a final record is an error, not a silent success
        let _ = tx
            .send(StreamEvent::Error {
                kind: TurnErrorKind::NoResponse,
                message: "The agent stopped without answering.".to_string(),
            })
            .await;
    }

    let _ = tx.send(StreamEvent::StreamEnd).await;
}

/// Resolve the agent binary through PATH; absolute paths pass through.
fn resolve_binary(binary: &PathBuf) -> PathBuf {
    if binary.is_absolute() {
        return binary.clone();
    }

    match which::which(binary) {
        Ok(path) => path,
        // Let spawn produce the real error message
        Err(_) => binary.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn runner() -> AgentRunner {
        AgentRunner::new(RunnerConfig::default()).unwrap()
    }

    #[test]
    fn test_config_validation() {
        let mut config = RunnerConfig::default();
        config.max_turns = 0;
        assert!(config.validate().is_err());

        let mut config = RunnerConfig::default();
        config.binary = PathBuf::new();
        assert!(config.validate().is_err());

        let mut config = RunnerConfig::default();
        config.capabilities = CapabilitySet::new();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_build_args_without_resume() {
        let args = runner().build_args("list files", None).unwrap();

        assert_eq!(args[0], "-p");
        assert_eq!(args[1], "list files");
        assert!(args.contains(&"--output-format".to_string()));
        assert!(args.contains(&"stream-json".to_string()));
        assert!(args.contains(&"--allowedTools".to_string()));
        assert!(args.contains(&"Bash,Read,Write,Edit,Grep,Glob".to_string()));
        assert!(!args.contains(&"--resume".to_string()));
    }

    #[test]
    fn test_build_args_with_resume_and_model() {
        let mut config = RunnerConfig::default();
        config.model = Some("fast-model".to_string());
        config.system_prompt = Some("speak briefly".to_string());
        let runner = AgentRunner::new(config).unwrap();

        let args = runner.build_args("continue", Some("abc123")).unwrap();

        let resume_idx = args.iter().position(|a| a == "--resume").unwrap();
        assert_eq!(args[resume_idx + 1], "abc123");

        let model_idx = args.iter().position(|a| a == "--model").unwrap();
        assert_eq!(args[model_idx + 1], "fast-model");

        let sp_idx = args.iter().position(|a| a == "--append-system-prompt").unwrap();
        assert_eq!(args[sp_idx + 1], "speak briefly");
    }

    #[test]
    fn test_max_turns_flag_forwarded() {
        let mut config = RunnerConfig::default();
        config.max_turns = 7;
        let runner = AgentRunner::new(config).unwrap();

        let args = runner.build_args("x", None).unwrap();
        let idx = args.iter().position(|a| a == "--max-turns").unwrap();
        assert_eq!(args[idx + 1], "7");
    }

    #[tokio::test]
    async fn test_missing_binary_is_dispatch_failure() {
        let config = RunnerConfig {
            binary: PathBuf::from("/nonexistent/agent-binary"),
            ..Default::default()
        };
        let runner = AgentRunner::new(config).unwrap();

        let result = runner.dispatch("hello", None).await;
        assert!(matches!(result, Err(RunnerError::DispatchFailed(_))));
    }
}
