//! Speech synthesis adapter
//!
//! Wraps the platform `say` binary. Playback is blocking from the
//! controller's perspective: `speak` resolves when the audio finished.
//! Device unavailability is non-fatal; the caller falls back to
//! terminal-only output and keeps advancing state.

use async_trait::async_trait;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tokio::process::Command as TokioCommand;
use tracing::{debug, warn};

#[derive(Error, Debug)]
pub enum SpeechError {
    #[error("Speech synthesizer unavailable: {0}")]
    Unavailable(String),

    #[error("Playback failed: {0}")]
    PlaybackFailed(String),
}

/// Voice and speaking rate for one utterance
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VoiceStyle {
    /// Synthesizer voice name (Samantha, Alex, Daniel, ...)
    pub voice: String,

    /// Words per minute
    pub rate: u32,
}

impl Default for VoiceStyle {
    fn default() -> Self {
        Self {
            voice: "Samantha".to_string(),
            rate: 185,
        }
    }
}

/// Speech output contract.
#[async_trait]
pub trait Speaker: Send + Sync {
    /// Speak and wait for playback to finish.
    async fn speak(&self, text: &str, style: &VoiceStyle) -> Result<(), SpeechError>;

    /// Speak without waiting; used for short acknowledgements while the
    /// microphone is already open for the next utterance.
    fn speak_background(&self, text: &str, style: &VoiceStyle);
}

/// `say`-backed speaker.
pub struct SaySpeaker {
    binary: PathBuf,
    available: bool,
}

impl SaySpeaker {
    pub fn new() -> Self {
        Self::with_binary(PathBuf::from("say"))
    }

    pub fn with_binary(binary: PathBuf) -> Self {
        let available = binary.is_absolute() || which::which(&binary).is_ok();
        if !available {
            warn!(
                "Speech binary {:?} not found; falling back to terminal-only output",
                binary
            );
        }

        Self { binary, available }
    }

    fn build_command(&self, text: &str, style: &VoiceStyle) -> TokioCommand {
        let mut command = TokioCommand::new(&self.binary);
        command
            .arg("-v")
            .arg(&style.voice)
            .arg("-r")
            .arg(style.rate.to_string())
            .arg(text)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null());
        command
    }
}

impl Default for SaySpeaker {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Speaker for SaySpeaker {
    async fn speak(&self, text: &str, style: &VoiceStyle) -> Result<(), SpeechError> {
        let text = text.trim();
        if text.is_empty() {
            return Ok(());
        }

        if !self.available {
            return Err(SpeechError::Unavailable(format!("{:?}", self.binary)));
        }

        debug!("Speaking ({} wpm): {}", style.rate, text);

        let status = self
            .build_command(text, style)
            .status()
            .await
            .map_err(|e| SpeechError::PlaybackFailed(e.to_string()))?;

        if !status.success() {
            return Err(SpeechError::PlaybackFailed(format!(
                "synthesizer exited with {}",
                status
            )));
        }

        Ok(())
    }

    fn speak_background(&self, text: &str, style: &VoiceStyle) {
        let text = text.trim();
        if text.is_empty() || !self.available {
            return;
        }

        let mut command = self.build_command(text, style);
        match command.spawn() {
            Ok(mut child) => {
                tokio::spawn(async move {
                    let _ = child.wait().await;
                });
            }
            Err(e) => warn!("Background speech failed to start: {}", e),
        }
    }
}

/// Speaker that records everything in call order; used by tests to
/// assert flush ordering, and usable as a silent speaker.
#[derive(Default, Clone)]
pub struct RecordingSpeaker {
    spoken: Arc<Mutex<Vec<String>>>,
}

impl RecordingSpeaker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Everything spoken so far, in order
    pub fn spoken(&self) -> Vec<String> {
        self.spoken.lock().unwrap().clone()
    }
}

#[async_trait]
impl Speaker for RecordingSpeaker {
    async fn speak(&self, text: &str, _style: &VoiceStyle) -> Result<(), SpeechError> {
        self.spoken.lock().unwrap().push(text.to_string());
        Ok(())
    }

    fn speak_background(&self, text: &str, _style: &VoiceStyle) {
        self.spoken.lock().unwrap().push(text.to_string());
    }
}
