//! Voice orchestrator - the turn-controller core
//!
//! Ties the listener and the agent runner together: wake-gated command
//! capture, per-turn dispatch, in-order response streaming to the log
//! and speech sinks, and the follow-up session window.

pub mod config;
pub mod controller;
pub mod log_sink;
pub mod session;
pub mod speech;

pub use config::{Cli, ConfigError, OrchestratorConfig, ProfileConfig};
pub use controller::{
    transition, Action, ControllerConfig, ControllerError, ControllerState, Input, ListenWindow,
    Phase, ProfileRuntime, Step, TurnController,
};
pub use log_sink::{LogKind, LogSink, MemoryLog, StdoutLog};
pub use session::Session;
pub use speech::{RecordingSpeaker, SaySpeaker, Speaker, SpeechError, VoiceStyle};

/// Current version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
