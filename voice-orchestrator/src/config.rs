//! Configuration surface
//!
//! A YAML config file provides the durable settings, environment
//! variables override the model paths, and CLI flags override the rest.
//! Everything is read and validated once at startup; the core treats
//! the result as constant for process lifetime.

use crate::controller::{ControllerConfig, ControllerError};
use crate::speech::VoiceStyle;
use agent_runner::{CapabilityError, CapabilitySet, RunnerConfig, RunnerError};
use clap::Parser;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tracing::warn;
use voice_listener::{
    CaptureConfig, CaptureError, SegmenterConfig, SegmenterError, SttError, WakeConfig, WakeError,
    WakePhrase, WhisperConfig,
};

/// Fallback instructions when no system prompt file is present
const DEFAULT_SYSTEM_PROMPT: &str = "You are a voice assistant. Wrap your final spoken response \
     in <SPEAK>...</SPEAK> tags. Use <STATUS>brief phrase</STATUS> before each tool call. \
     Be concise - responses are spoken aloud.";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse config file: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),

    #[error(transparent)]
    Wake(#[from] WakeError),

    #[error(transparent)]
    Capture(#[from] CaptureError),

    #[error(transparent)]
    Segmenter(#[from] SegmenterError),

    #[error(transparent)]
    Stt(#[from] SttError),

    #[error(transparent)]
    Runner(#[from] RunnerError),

    #[error(transparent)]
    Capability(#[from] CapabilityError),

    #[error(transparent)]
    Controller(#[from] ControllerError),
}

/// Command-line flags; each overrides its config-file counterpart
#[derive(Parser, Debug, Default)]
#[command(
    name = "voice-orchestrator",
    about = "Voice-driven agent orchestrator",
    version
)]
pub struct Cli {
    /// Config file path
    #[arg(long, default_value = "config.yaml")]
    pub config: PathBuf,

    /// Working directory the agent operates in
    #[arg(long)]
    pub cwd: Option<PathBuf>,

    /// Synthesizer voice (Samantha, Alex, Daniel, ...)
    #[arg(long)]
    pub voice: Option<String>,

    /// Speech rate in words per minute
    #[arg(long)]
    pub rate: Option<u32>,

    /// Agent model override for profiles without an explicit model
    #[arg(long)]
    pub model: Option<String>,

    /// Input device name substring
    #[arg(long)]
    pub device: Option<String>,

    /// List input devices and exit
    #[arg(long)]
    pub list_devices: bool,
}

// ── YAML file sections ──────────────────────────────────────────────

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default, deny_unknown_fields)]
pub struct FileConfig {
    pub audio: AudioSection,
    pub stt: SttSection,
    pub wake: WakeSection,
    pub session: SessionSection,
    pub tts: TtsSection,
    pub agent: AgentSection,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AudioSection {
    pub device: String,

    /// Trailing silence (seconds) that seals an utterance
    pub silence_threshold: f32,

    /// Hard cap (seconds) on command recording
    pub max_recording_duration: f32,

    /// When set, sealed utterances are dumped here as WAV files
    pub debug_dump_dir: Option<PathBuf>,
}

impl Default for AudioSection {
    fn default() -> Self {
        Self {
            device: "default".to_string(),
            silence_threshold: 1.5,
            max_recording_duration: 30.0,
            debug_dump_dir: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SttSection {
    pub wake_model: PathBuf,
    pub command_model: PathBuf,
    pub language: String,
    pub threads: Option<usize>,
}

impl Default for SttSection {
    fn default() -> Self {
        let defaults = WhisperConfig::default();
        Self {
            wake_model: defaults.wake_model_path,
            command_model: defaults.command_model_path,
            language: defaults.language,
            threads: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct WakeSection {
    /// Phrases in priority order; the first entry is the primary phrase
    pub phrases: Vec<WakePhrase>,
    pub fuzzy_match: bool,
    pub fuzzy_threshold: f32,
}

impl Default for WakeSection {
    fn default() -> Self {
        let defaults = WakeConfig::default();
        Self {
            phrases: defaults.phrases,
            fuzzy_match: defaults.fuzzy_match,
            fuzzy_threshold: defaults.fuzzy_threshold,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SessionSection {
    /// Follow-up window in seconds
    pub timeout: f32,
}

impl Default for SessionSection {
    fn default() -> Self {
        Self { timeout: 30.0 }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TtsSection {
    pub voice: String,
    pub rate: u32,
}

impl Default for TtsSection {
    fn default() -> Self {
        let style = VoiceStyle::default();
        Self {
            voice: style.voice,
            rate: style.rate,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AgentSection {
    pub binary: PathBuf,
    pub cwd: Option<PathBuf>,
    pub system_prompt_path: PathBuf,

    /// Tool-invocation cap per turn
    pub max_turns: usize,

    /// Capability names granted on dispatch; empty grants the default set
    pub capabilities: Vec<String>,

    /// Per-profile overrides, keyed by the profile name wake phrases
    /// reference
    pub profiles: HashMap<String, ProfileSection>,
}

impl Default for AgentSection {
    fn default() -> Self {
        let defaults = RunnerConfig::default();
        Self {
            binary: defaults.binary,
            cwd: None,
            system_prompt_path: PathBuf::from("prompts/system.md"),
            max_turns: defaults.max_turns,
            capabilities: Vec::new(),
            profiles: HashMap::new(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default, deny_unknown_fields)]
pub struct ProfileSection {
    pub model: Option<String>,
    pub voice: Option<String>,
    pub rate: Option<u32>,
}

// ── Resolved configuration ──────────────────────────────────────────

/// One execution profile, fully resolved
#[derive(Debug, Clone)]
pub struct ProfileConfig {
    pub name: String,
    pub runner: RunnerConfig,
    pub style: VoiceStyle,
    pub status_style: VoiceStyle,
}

/// Everything the orchestrator needs, validated once at startup.
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    pub capture: CaptureConfig,
    pub wake_segmenter: SegmenterConfig,
    pub command_segmenter: SegmenterConfig,
    pub whisper: WhisperConfig,
    pub wake: WakeConfig,
    pub controller: ControllerConfig,
    pub session_timeout: Duration,
    pub base_style: VoiceStyle,
    pub profiles: Vec<ProfileConfig>,
    pub debug_dump_dir: Option<PathBuf>,
}

impl OrchestratorConfig {
    /// Read the config file, apply env and CLI overrides, validate.
    pub fn load(cli: &Cli) -> Result<Self, ConfigError> {
        let mut file = read_file_config(&cli.config)?;
        apply_env_overrides(&mut file);
        Self::build(file, cli)
    }

    fn build(file: FileConfig, cli: &Cli) -> Result<Self, ConfigError> {
        let capture = CaptureConfig {
            device: cli.device.clone().unwrap_or(file.audio.device),
            ..Default::default()
        };
        capture.validate()?;

        let silence_threshold = positive_secs("audio.silence_threshold", file.audio.silence_threshold)?;
        let max_recording = positive_secs(
            "audio.max_recording_duration",
            file.audio.max_recording_duration,
        )?;

        let wake_segmenter = SegmenterConfig {
            silence_threshold,
            ..Default::default()
        };
        wake_segmenter.validate()?;

        let command_segmenter = SegmenterConfig {
            silence_threshold,
            max_duration: max_recording,
            ..SegmenterConfig::command_window()
        };
        command_segmenter.validate()?;

        let mut whisper = WhisperConfig {
            wake_model_path: file.stt.wake_model,
            command_model_path: file.stt.command_model,
            language: file.stt.language,
            ..Default::default()
        };
        if let Some(threads) = file.stt.threads {
            whisper.num_threads = threads;
        }
        whisper.validate()?;

        let wake = WakeConfig {
            phrases: file.wake.phrases,
            fuzzy_match: file.wake.fuzzy_match,
            fuzzy_threshold: file.wake.fuzzy_threshold,
        };
        wake.validate()?;

        let controller = ControllerConfig::default();
        controller.validate()?;

        let session_timeout = positive_secs("session.timeout", file.session.timeout)?;

        let base_style = VoiceStyle {
            voice: cli.voice.clone().unwrap_or(file.tts.voice),
            rate: cli.rate.unwrap_or(file.tts.rate),
        };

        let capabilities = if file.agent.capabilities.is_empty() {
            CapabilitySet::with_default_capabilities()
        } else {
            // Unknown names fail here, at startup, not at dispatch time
            CapabilitySet::with_default_capabilities().subset(&file.agent.capabilities)?
        };

        let system_prompt = load_system_prompt(&file.agent.system_prompt_path);
        let working_dir = cli.cwd.clone().or(file.agent.cwd);

        let mut profiles = Vec::new();
        for wp in &wake.phrases {
            if profiles.iter().any(|p: &ProfileConfig| p.name == wp.profile) {
                continue;
            }

            let section = file
                .agent
                .profiles
                .get(&wp.profile)
                .cloned()
                .unwrap_or_default();

            let runner = RunnerConfig {
                binary: file.agent.binary.clone(),
                working_dir: working_dir.clone(),
                system_prompt: Some(system_prompt.clone()),
                model: section.model.or_else(|| cli.model.clone()),
                capabilities: capabilities.clone(),
                max_turns: file.agent.max_turns,
                ..Default::default()
            };
            runner.validate()?;

            let style = VoiceStyle {
                voice: section.voice.unwrap_or_else(|| base_style.voice.clone()),
                rate: section.rate.unwrap_or(base_style.rate),
            };
            let status_style = VoiceStyle {
                rate: style.rate + 20,
                ..style.clone()
            };

            profiles.push(ProfileConfig {
                name: wp.profile.clone(),
                runner,
                style,
                status_style,
            });
        }

        Ok(Self {
            capture,
            wake_segmenter,
            command_segmenter,
            whisper,
            wake,
            controller,
            session_timeout,
            base_style,
            profiles,
            debug_dump_dir: file.audio.debug_dump_dir,
        })
    }
}

fn positive_secs(field: &str, value: f32) -> Result<Duration, ConfigError> {
    if !value.is_finite() || value <= 0.0 {
        return Err(ConfigError::Invalid(format!(
            "{} must be a positive number of seconds",
            field
        )));
    }
    Ok(Duration::from_secs_f32(value))
}

/// Parse the YAML config file; a missing file means defaults.
fn read_file_config(path: &Path) -> Result<FileConfig, ConfigError> {
    if !path.exists() {
        warn!("Config file {:?} not found, using defaults", path);
        return Ok(FileConfig::default());
    }

    let text = std::fs::read_to_string(path)?;
    Ok(serde_yaml::from_str(&text)?)
}

/// Model paths are the settings most often machine-specific; they can
/// be overridden without editing the config file.
fn apply_env_overrides(file: &mut FileConfig) {
    if let Ok(path) = std::env::var("STT_WAKE_MODEL") {
        file.stt.wake_model = PathBuf::from(path);
    }
    if let Ok(path) = std::env::var("STT_COMMAND_MODEL") {
        file.stt.command_model = PathBuf::from(path);
    }
    if let Ok(binary) = std::env::var("AGENT_BINARY") {
        file.agent.binary = PathBuf::from(binary);
    }
}

fn load_system_prompt(path: &Path) -> String {
    match std::fs::read_to_string(path) {
        Ok(text) => text.trim().to_string(),
        Err(_) => {
            warn!(
                "System prompt not found at {:?}, using built-in default",
                path
            );
            DEFAULT_SYSTEM_PROMPT.to_string()
        }
    }
}
