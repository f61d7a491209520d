//! Turn controller
//!
//! The orchestration core: a state machine over
//! idle listening → wake → command capture → dispatch → response →
//! follow-up session. Transitions are a pure function of
//! (state, input) → (next state, actions), so the whole flow is unit
//! testable without audio or subprocesses; a thin async interpreter
//! executes the actions against the collaborators and drives the
//! per-turn event stream.

use crate::log_sink::{LogKind, LogSink};
use crate::session::Session;
use crate::speech::{Speaker, VoiceStyle};
use agent_runner::{AgentRunner, StreamEvent, Turn};
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};
use voice_listener::{ModelProfile, Transcriber, Transcript, Utterance, WakeMatch, WakeSpotter};

const FAREWELL: &str = "Goodbye!";
const APOLOGY: &str = "Something went wrong. Try again.";

#[derive(Error, Debug)]
pub enum ControllerError {
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Wake phrase references unknown profile '{0}'")]
    UnknownProfile(String),
}

/// Controller tuning, constant for process lifetime
#[derive(Debug, Clone)]
pub struct ControllerConfig {
    /// Command transcripts below this confidence are treated as a false
    /// wake
    pub min_command_confidence: f32,

    /// Short spoken acknowledgement after a wake match
    pub wake_ack: String,

    /// Commands that end the conversation immediately
    pub goodbye_phrases: Vec<String>,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            min_command_confidence: 0.2,
            wake_ack: "Mmhm.".to_string(),
            goodbye_phrases: vec![
                "goodbye".to_string(),
                "stop listening".to_string(),
                "exit".to_string(),
                "quit".to_string(),
            ],
        }
    }
}

impl ControllerConfig {
    /// Validate configuration parameters
    pub fn validate(&self) -> Result<(), ControllerError> {
        if !(0.0..=1.0).contains(&self.min_command_confidence) {
            return Err(ControllerError::InvalidConfig(
                "min_command_confidence must be between 0.0 and 1.0".to_string(),
            ));
        }

        if self.goodbye_phrases.iter().any(|p| p.trim().is_empty()) {
            return Err(ControllerError::InvalidConfig(
                "goodbye phrases must not be empty".to_string(),
            ));
        }

        Ok(())
    }
}

/// Published controller phase, readable by logging/UI observers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    IdleListening,
    WakeConfirmed,
    CapturingCommand,
    Dispatching,
    AwaitingResponse,
    Speaking,
    SessionOpen,
}

/// Full machine state, including the per-turn context each phase needs.
#[derive(Debug, Clone, PartialEq)]
pub enum ControllerState {
    IdleListening,
    WakeConfirmed {
        profile: String,
    },
    CapturingCommand {
        profile: String,
    },
    Dispatching {
        profile: String,
        prompt: String,
    },
    AwaitingResponse {
        profile: String,
    },
    Speaking {
        profile: String,
        failed: bool,
        session_id: Option<String>,
    },
    SessionOpen {
        profile: String,
    },
}

impl ControllerState {
    pub fn phase(&self) -> Phase {
        match self {
            ControllerState::IdleListening => Phase::IdleListening,
            ControllerState::WakeConfirmed { .. } => Phase::WakeConfirmed,
            ControllerState::CapturingCommand { .. } => Phase::CapturingCommand,
            ControllerState::Dispatching { .. } => Phase::Dispatching,
            ControllerState::AwaitingResponse { .. } => Phase::AwaitingResponse,
            ControllerState::Speaking { .. } => Phase::Speaking,
            ControllerState::SessionOpen { .. } => Phase::SessionOpen,
        }
    }

    /// Execution profile of the active turn or session, if any
    pub fn profile(&self) -> Option<&str> {
        match self {
            ControllerState::IdleListening => None,
            ControllerState::WakeConfirmed { profile }
            | ControllerState::CapturingCommand { profile }
            | ControllerState::Dispatching { profile, .. }
            | ControllerState::AwaitingResponse { profile }
            | ControllerState::Speaking { profile, .. }
            | ControllerState::SessionOpen { profile } => Some(profile),
        }
    }
}

/// One occurrence the machine reacts to
#[derive(Debug, Clone)]
pub enum Input {
    /// A wake phrase was spotted while idle
    WakeDetected(WakeMatch),

    /// The command capture window opened after a wake acknowledgement
    CaptureStarted,

    /// The command window sealed and transcribed
    CommandCaptured(Transcript),

    /// The agent subprocess started and its stream is live
    Dispatched,

    /// The agent subprocess could not be started
    DispatchFailed { message: String, session_live: bool },

    /// One event from the live turn stream, in arrival order
    AgentEvent(StreamEvent),

    /// A follow-up utterance transcribed inside the session window
    FollowUpCaptured(Transcript),

    /// The follow-up deadline passed
    SessionExpired,

    /// The turn's event stream ended
    TurnClosed { session_live: bool },
}

/// Side effect the interpreter must perform, in order
#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    Log(LogKind, String),

    /// Speak without blocking; the microphone stays open
    SpeakAck(String),

    /// Speak and wait for playback in the response voice
    Speak(String),

    /// Speak and wait for playback in the status voice
    SpeakStatus(String),

    /// Hand the prompt to the protocol reader
    Dispatch { prompt: String, profile: String },

    /// Refresh the follow-up deadline, storing the token if present
    RefreshSession { token: Option<String> },

    /// Tear the session down and discard the continuation token
    TearDownSession,
}

/// Result of one transition
#[derive(Debug)]
pub struct Step {
    pub next: ControllerState,
    pub actions: Vec<Action>,
}

impl Step {
    fn to(next: ControllerState, actions: Vec<Action>) -> Self {
        Self { next, actions }
    }

    fn stay(state: ControllerState) -> Self {
        Self {
            next: state,
            actions: vec![],
        }
    }
}

/// The pure transition function.
///
/// Total over (state, input): pairs with no defined transition keep the
/// state and perform nothing.
pub fn transition(cfg: &ControllerConfig, state: ControllerState, input: Input) -> Step {
    use ControllerState::*;

    match (state, input) {
        (IdleListening, Input::WakeDetected(m)) => {
            let mut actions = vec![
                Action::Log(
                    LogKind::Wake,
                    format!(
                        "'{}' (confidence {:.2}, profile {})",
                        m.phrase, m.confidence, m.profile
                    ),
                ),
                Action::SpeakAck(cfg.wake_ack.clone()),
            ];

            let remainder = m.remainder.trim().to_string();
            if remainder.is_empty() {
                // Wake phrase alone: open a command window
                Step::to(WakeConfirmed { profile: m.profile }, actions)
            } else if is_goodbye(&cfg.goodbye_phrases, &remainder) {
                actions.push(Action::Log(LogKind::You, remainder));
                actions.push(Action::Speak(FAREWELL.to_string()));
                actions.push(Action::TearDownSession);
                Step::to(IdleListening, actions)
            } else {
                // The command rode in on the wake utterance: skip capture
                actions.push(Action::Log(LogKind::You, remainder.clone()));
                actions.push(Action::Dispatch {
                    prompt: remainder.clone(),
                    profile: m.profile.clone(),
                });
                Step::to(
                    Dispatching {
                        profile: m.profile,
                        prompt: remainder,
                    },
                    actions,
                )
            }
        }

        (WakeConfirmed { profile }, Input::CaptureStarted) => Step::to(
            CapturingCommand { profile },
            vec![Action::Log(
                LogKind::Wake,
                "wake phrase only, listening for a command".to_string(),
            )],
        ),

        (CapturingCommand { profile }, Input::CommandCaptured(t)) => {
            if t.is_empty() || t.confidence < cfg.min_command_confidence {
                // False wake: logged, not spoken
                return Step::to(
                    IdleListening,
                    vec![Action::Log(
                        LogKind::Wake,
                        "no intelligible command, returning to idle".to_string(),
                    )],
                );
            }

            let prompt = t.text.trim().to_string();
            if is_goodbye(&cfg.goodbye_phrases, &prompt) {
                return Step::to(
                    IdleListening,
                    vec![
                        Action::Log(LogKind::You, prompt),
                        Action::Speak(FAREWELL.to_string()),
                        Action::TearDownSession,
                    ],
                );
            }

            Step::to(
                Dispatching {
                    profile: profile.clone(),
                    prompt: prompt.clone(),
                },
                vec![
                    Action::Log(LogKind::You, prompt.clone()),
                    Action::Dispatch { prompt, profile },
                ],
            )
        }

        (Dispatching { profile, .. }, Input::Dispatched) => {
            Step::to(AwaitingResponse { profile }, vec![])
        }

        (
            Dispatching { profile, .. },
            Input::DispatchFailed {
                message,
                session_live,
            },
        ) => {
            let actions = vec![
                Action::Log(LogKind::Error, message),
                Action::Speak(APOLOGY.to_string()),
            ];
            // The session is not advanced by a dispatch failure
            let next = if session_live {
                SessionOpen { profile }
            } else {
                IdleListening
            };
            Step::to(next, actions)
        }

        (AwaitingResponse { profile }, Input::AgentEvent(event)) => match event {
            StreamEvent::SessionInit {
                session_id,
                tool_count,
            } => Step::to(
                AwaitingResponse { profile },
                vec![Action::Log(
                    LogKind::Init,
                    format!("agent session {} ({} tools)", session_id, tool_count),
                )],
            ),

            // Status markers flush to both sinks before any later event
            // of the turn is processed
            StreamEvent::Status(text) => Step::to(
                AwaitingResponse { profile },
                vec![
                    Action::Log(LogKind::Status, text.clone()),
                    Action::SpeakStatus(text),
                ],
            ),

            StreamEvent::ToolInvocation { name, preview } => Step::to(
                AwaitingResponse { profile },
                vec![Action::Log(LogKind::Tool, format!("{}: {}", name, preview))],
            ),

            StreamEvent::ToolResult { preview, is_error } => {
                let kind = if is_error {
                    LogKind::ResultErr
                } else {
                    LogKind::ResultOk
                };
                Step::to(
                    AwaitingResponse { profile },
                    vec![Action::Log(kind, preview)],
                )
            }

            StreamEvent::FinalResponse(text) => Step::to(
                Speaking {
                    profile,
                    failed: false,
                    session_id: None,
                },
                vec![
                    Action::Log(LogKind::Speak, text.clone()),
                    Action::Speak(text),
                ],
            ),

            // An error still produces a spoken explanation
            StreamEvent::Error { message, .. } => Step::to(
                Speaking {
                    profile,
                    failed: true,
                    session_id: None,
                },
                vec![
                    Action::Log(LogKind::Error, message.clone()),
                    Action::Speak(message),
                ],
            ),

            StreamEvent::PartialResponse(_) | StreamEvent::SessionId(_) | StreamEvent::StreamEnd => {
                Step::stay(AwaitingResponse { profile })
            }
        },

        // The stream closed with neither a final response nor an error
        // record; the reader normally synthesizes one first
        (AwaitingResponse { profile }, Input::TurnClosed { session_live }) => {
            let next = if session_live {
                SessionOpen { profile }
            } else {
                IdleListening
            };
            Step::to(
                next,
                vec![Action::Log(
                    LogKind::Error,
                    "turn ended without a response".to_string(),
                )],
            )
        }

        (
            Speaking {
                profile, failed, ..
            },
            Input::AgentEvent(StreamEvent::SessionId(id)),
        ) => Step::stay(Speaking {
            profile,
            failed,
            session_id: Some(id),
        }),

        (state @ Speaking { .. }, Input::AgentEvent(_)) => Step::stay(state),

        (
            Speaking {
                profile,
                failed,
                session_id,
            },
            Input::TurnClosed { session_live },
        ) => {
            if failed && !session_live {
                // The failure happened before any session existed
                Step::to(
                    IdleListening,
                    vec![Action::Log(
                        LogKind::Session,
                        "turn failed, wake phrase required".to_string(),
                    )],
                )
            } else {
                // A failed turn still counts as a completed interaction
                // once a session exists
                Step::to(
                    SessionOpen { profile },
                    vec![
                        Action::RefreshSession { token: session_id },
                        Action::Log(LogKind::Session, "open for follow-ups".to_string()),
                    ],
                )
            }
        }

        (SessionOpen { profile }, Input::FollowUpCaptured(t)) => {
            if t.is_empty() {
                return Step::stay(SessionOpen { profile });
            }

            let prompt = t.text.trim().to_string();
            if is_goodbye(&cfg.goodbye_phrases, &prompt) {
                return Step::to(
                    IdleListening,
                    vec![
                        Action::Log(LogKind::You, prompt),
                        Action::Speak(FAREWELL.to_string()),
                        Action::TearDownSession,
                        Action::Log(LogKind::Session, "conversation ended".to_string()),
                    ],
                );
            }

            Step::to(
                Dispatching {
                    profile: profile.clone(),
                    prompt: prompt.clone(),
                },
                vec![
                    Action::Log(LogKind::You, prompt.clone()),
                    Action::Dispatch { prompt, profile },
                ],
            )
        }

        (SessionOpen { .. }, Input::SessionExpired) => Step::to(
            IdleListening,
            vec![
                Action::TearDownSession,
                Action::Log(
                    LogKind::Session,
                    "timed out, wake phrase required".to_string(),
                ),
            ],
        ),

        (state, input) => {
            trace!("No transition for {:?} in {:?}", input, state.phase());
            Step::stay(state)
        }
    }
}

/// Whether the command is an explicit end-of-conversation request.
///
/// Matched on word boundaries so "quit" does not fire inside "quite".
fn is_goodbye(phrases: &[String], text: &str) -> bool {
    let words = normalize_words(text);
    phrases.iter().any(|phrase| {
        let target = normalize_words(phrase);
        !target.is_empty() && words.windows(target.len()).any(|w| w == target.as_slice())
    })
}

fn normalize_words(text: &str) -> Vec<String> {
    text.to_lowercase()
        .split_whitespace()
        .map(|w| w.chars().filter(|c| c.is_alphanumeric()).collect::<String>())
        .filter(|w| !w.is_empty())
        .collect()
}

/// Per-profile execution context, built once from configuration
pub struct ProfileRuntime {
    /// Dispatches turns with this profile's model override
    pub runner: Arc<AgentRunner>,

    /// Response voice
    pub style: VoiceStyle,

    /// Status-update voice, slightly faster than the response voice
    pub status_style: VoiceStyle,
}

/// Async interpreter: owns the collaborators, executes actions, drives
/// the per-turn event stream.
pub struct TurnController {
    cfg: ControllerConfig,
    machine: ControllerState,
    spotter: WakeSpotter,
    transcriber: Arc<dyn Transcriber>,
    speaker: Arc<dyn Speaker>,
    log: Arc<dyn LogSink>,
    session: Session,
    profiles: HashMap<String, ProfileRuntime>,
    active_style: VoiceStyle,
    active_status_style: VoiceStyle,
    pending_dispatch: Option<(String, String)>,
    last_turn: Option<Turn>,
    turns_run: u64,
    shutdown: CancellationToken,
    phase_tx: watch::Sender<Phase>,
    phase_rx: watch::Receiver<Phase>,
}

/// Which segmentation window the frame loop should run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListenWindow {
    /// Short windows transcribed with the fast model
    Wake,

    /// Full command windows transcribed with the accurate model
    Command,
}

impl TurnController {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        cfg: ControllerConfig,
        spotter: WakeSpotter,
        transcriber: Arc<dyn Transcriber>,
        speaker: Arc<dyn Speaker>,
        log: Arc<dyn LogSink>,
        session: Session,
        profiles: HashMap<String, ProfileRuntime>,
        base_style: VoiceStyle,
        shutdown: CancellationToken,
    ) -> Result<Self, ControllerError> {
        cfg.validate()?;

        for wp in &spotter.config().phrases {
            if !profiles.contains_key(&wp.profile) {
                return Err(ControllerError::UnknownProfile(wp.profile.clone()));
            }
        }

        let (phase_tx, phase_rx) = watch::channel(Phase::IdleListening);
        let status_style = VoiceStyle {
            rate: base_style.rate + 20,
            ..base_style.clone()
        };

        Ok(Self {
            cfg,
            machine: ControllerState::IdleListening,
            spotter,
            transcriber,
            speaker,
            log,
            session,
            profiles,
            active_style: base_style,
            active_status_style: status_style,
            pending_dispatch: None,
            last_turn: None,
            turns_run: 0,
            shutdown,
            phase_tx,
            phase_rx,
        })
    }

    pub fn phase(&self) -> Phase {
        self.machine.phase()
    }

    /// Snapshot channel for observers; never written by anyone else
    pub fn phase_watch(&self) -> watch::Receiver<Phase> {
        self.phase_rx.clone()
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    /// Record of the most recently closed turn
    pub fn last_turn(&self) -> Option<&Turn> {
        self.last_turn.as_ref()
    }

    pub fn turns_run(&self) -> u64 {
        self.turns_run
    }

    /// Segmentation window the frame loop should feed, or None while a
    /// turn is in flight (no barge-in: frames are drained and discarded).
    pub fn listen_window(&self) -> Option<ListenWindow> {
        match self.machine.phase() {
            Phase::IdleListening => Some(ListenWindow::Wake),
            Phase::CapturingCommand | Phase::SessionOpen => Some(ListenWindow::Command),
            _ => None,
        }
    }

    /// Compare the session deadline against now; called periodically so
    /// an idle session falls back to wake-phrase listening on time.
    pub async fn poll_session(&mut self) {
        if self.machine.phase() == Phase::SessionOpen && !self.session.is_live() {
            self.apply(Input::SessionExpired).await;
        }
    }

    /// Handle one sealed utterance according to the current phase.
    ///
    /// All per-turn failures are absorbed here; nothing propagates to
    /// the frame loop.
    pub async fn on_utterance(&mut self, utterance: Utterance) {
        match self.machine.phase() {
            Phase::IdleListening => self.spot_wake(utterance).await,

            Phase::CapturingCommand => {
                let transcript = self.transcribe(&utterance, ModelProfile::Command).await;
                self.apply(Input::CommandCaptured(transcript)).await;
                self.maybe_run_turn().await;
            }

            Phase::SessionOpen => {
                if !self.session.is_live() {
                    // Deadline passed while we were listening: this
                    // utterance re-enters wake spotting instead
                    self.apply(Input::SessionExpired).await;
                    self.spot_wake(utterance).await;
                } else {
                    let transcript = self.transcribe(&utterance, ModelProfile::Command).await;
                    self.apply(Input::FollowUpCaptured(transcript)).await;
                    self.maybe_run_turn().await;
                }
            }

            phase => trace!("Discarding utterance while {:?}", phase),
        }
    }

    async fn spot_wake(&mut self, utterance: Utterance) {
        let transcript = self.transcribe(&utterance, ModelProfile::Wake).await;
        if transcript.is_empty() {
            return;
        }

        let Some(wake) = self.spotter.spot(&transcript) else {
            debug!("No wake phrase in {:?}", transcript.text);
            return;
        };

        self.apply(Input::WakeDetected(wake)).await;
        if self.machine.phase() == Phase::WakeConfirmed {
            self.apply(Input::CaptureStarted).await;
        }
        self.maybe_run_turn().await;
    }

    async fn transcribe(&self, utterance: &Utterance, profile: ModelProfile) -> Transcript {
        match self.transcriber.transcribe(utterance, profile).await {
            Ok(t) => t,
            Err(e) => {
                // Decoder failure degrades to "nothing intelligible"
                warn!("Transcription failed: {}", e);
                Transcript::empty()
            }
        }
    }

    /// Run one transition and execute its actions in order.
    async fn apply(&mut self, input: Input) {
        let state = std::mem::replace(&mut self.machine, ControllerState::IdleListening);
        let step = transition(&self.cfg, state, input);
        self.machine = step.next;
        self.phase_tx.send_replace(self.machine.phase());

        if let Some(profile) = self.machine.profile() {
            if let Some(p) = self.profiles.get(profile) {
                self.active_style = p.style.clone();
                self.active_status_style = p.status_style.clone();
            }
        }

        for action in step.actions {
            self.execute(action).await;
        }
    }

    async fn execute(&mut self, action: Action) {
        match action {
            Action::Log(kind, text) => self.log.line(kind, &text),

            Action::SpeakAck(text) => {
                self.speaker.speak_background(&text, &self.active_style);
            }

            Action::Speak(text) => {
                let style = self.active_style.clone();
                self.speak_blocking(&text, &style).await;
            }

            Action::SpeakStatus(text) => {
                let style = self.active_status_style.clone();
                self.speak_blocking(&text, &style).await;
            }

            Action::Dispatch { prompt, profile } => {
                self.pending_dispatch = Some((prompt, profile));
            }

            Action::RefreshSession { token } => self.session.refresh(token),

            Action::TearDownSession => self.session.expire(),
        }
    }

    /// Synthesis failure is non-fatal: the text already reached the log
    /// sink, and state advances regardless.
    async fn speak_blocking(&self, text: &str, style: &VoiceStyle) {
        if let Err(e) = self.speaker.speak(text, style).await {
            warn!("Speech synthesis failed ({}), continuing with terminal output", e);
        }
    }

    async fn maybe_run_turn(&mut self) {
        if let Some((prompt, profile)) = self.pending_dispatch.take() {
            self.run_turn(prompt, profile).await;
        }
    }

    /// Dispatch one command and drive its event stream to completion.
    async fn run_turn(&mut self, prompt: String, profile_name: String) {
        // Profiles are validated at construction
        let Some(runner) = self.profiles.get(&profile_name).map(|p| p.runner.clone()) else {
            warn!("Unknown profile '{}', dropping turn", profile_name);
            self.apply(Input::DispatchFailed {
                message: format!("no profile named '{}'", profile_name),
                session_live: self.session.is_live(),
            })
            .await;
            return;
        };

        let token = self.session.token().map(str::to_string);
        let mut turn = Turn::new(prompt.clone());

        match runner.dispatch(&prompt, token.as_deref()).await {
            Ok(mut stream) => {
                self.apply(Input::Dispatched).await;

                loop {
                    let event = tokio::select! {
                        _ = self.shutdown.cancelled() => {
                            debug!("Shutdown during turn, abandoning");
                            stream.cancel();
                            turn.cancel();
                            break;
                        }
                        event = stream.next_event() => match event {
                            Some(e) => e,
                            None => break,
                        },
                    };

                    turn.record(&event);
                    let closed = event == StreamEvent::StreamEnd;
                    let input = if closed {
                        Input::TurnClosed {
                            session_live: self.session.is_live(),
                        }
                    } else {
                        Input::AgentEvent(event)
                    };

                    self.apply(input).await;
                    if closed {
                        break;
                    }
                }
            }

            Err(e) => {
                turn.cancel();
                self.apply(Input::DispatchFailed {
                    message: e.to_string(),
                    session_live: self.session.is_live(),
                })
                .await;
            }
        }

        self.turns_run += 1;
        self.last_turn = Some(turn);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use agent_runner::TurnErrorKind;

    fn cfg() -> ControllerConfig {
        ControllerConfig::default()
    }

    fn wake(remainder: &str) -> WakeMatch {
        WakeMatch {
            phrase: "hey claude".to_string(),
            profile: "default".to_string(),
            confidence: 1.0,
            remainder: remainder.to_string(),
        }
    }

    fn transcript(text: &str) -> Transcript {
        Transcript {
            text: text.to_string(),
            confidence: 0.9,
        }
    }

    fn awaiting() -> ControllerState {
        ControllerState::AwaitingResponse {
            profile: "default".to_string(),
        }
    }

    #[test]
    fn test_wake_alone_opens_command_window() {
        let step = transition(
            &cfg(),
            ControllerState::IdleListening,
            Input::WakeDetected(wake("")),
        );

        assert_eq!(step.next.phase(), Phase::WakeConfirmed);
        assert!(step
            .actions
            .iter()
            .any(|a| matches!(a, Action::SpeakAck(_))));
        assert!(!step.actions.iter().any(|a| matches!(a, Action::Dispatch { .. })));

        let step = transition(&cfg(), step.next, Input::CaptureStarted);
        assert_eq!(step.next.phase(), Phase::CapturingCommand);
    }

    #[test]
    fn test_wake_with_remainder_skips_capture() {
        let step = transition(
            &cfg(),
            ControllerState::IdleListening,
            Input::WakeDetected(wake("list the files here")),
        );

        assert_eq!(step.next.phase(), Phase::Dispatching);
        assert!(step.actions.contains(&Action::Dispatch {
            prompt: "list the files here".to_string(),
            profile: "default".to_string(),
        }));
    }

    #[test]
    fn test_empty_command_is_logged_not_spoken() {
        let state = ControllerState::CapturingCommand {
            profile: "default".to_string(),
        };
        let step = transition(&cfg(), state, Input::CommandCaptured(Transcript::empty()));

        assert_eq!(step.next.phase(), Phase::IdleListening);
        assert!(step.actions.iter().any(|a| matches!(a, Action::Log(..))));
        assert!(!step.actions.iter().any(|a| matches!(
            a,
            Action::Speak(_) | Action::SpeakAck(_) | Action::SpeakStatus(_)
        )));
    }

    #[test]
    fn test_low_confidence_command_treated_as_false_wake() {
        let state = ControllerState::CapturingCommand {
            profile: "default".to_string(),
        };
        let low = Transcript {
            text: "mumble".to_string(),
            confidence: 0.05,
        };
        let step = transition(&cfg(), state, Input::CommandCaptured(low));

        assert_eq!(step.next.phase(), Phase::IdleListening);
    }

    #[test]
    fn test_command_dispatches() {
        let state = ControllerState::CapturingCommand {
            profile: "default".to_string(),
        };
        let step = transition(
            &cfg(),
            state,
            Input::CommandCaptured(transcript("list the files")),
        );

        assert_eq!(step.next.phase(), Phase::Dispatching);
        assert_eq!(
            step.actions,
            vec![
                Action::Log(LogKind::You, "list the files".to_string()),
                Action::Dispatch {
                    prompt: "list the files".to_string(),
                    profile: "default".to_string(),
                },
            ]
        );
    }

    #[test]
    fn test_status_flushes_to_both_sinks_immediately() {
        let step = transition(
            &cfg(),
            awaiting(),
            Input::AgentEvent(StreamEvent::Status("listing directory".to_string())),
        );

        assert_eq!(step.next.phase(), Phase::AwaitingResponse);
        assert_eq!(
            step.actions,
            vec![
                Action::Log(LogKind::Status, "listing directory".to_string()),
                Action::SpeakStatus("listing directory".to_string()),
            ]
        );
    }

    #[test]
    fn test_final_response_enters_speaking() {
        let step = transition(
            &cfg(),
            awaiting(),
            Input::AgentEvent(StreamEvent::FinalResponse(
                "there are nine items".to_string(),
            )),
        );

        assert_eq!(step.next.phase(), Phase::Speaking);
        assert!(step
            .actions
            .contains(&Action::Speak("there are nine items".to_string())));
    }

    #[test]
    fn test_turn_error_is_spoken() {
        let step = transition(
            &cfg(),
            awaiting(),
            Input::AgentEvent(StreamEvent::Error {
                kind: TurnErrorKind::NoResponse,
                message: "The agent stopped without answering.".to_string(),
            }),
        );

        assert_eq!(step.next.phase(), Phase::Speaking);
        assert!(step.actions.iter().any(|a| matches!(a, Action::Speak(_))));
        if let ControllerState::Speaking { failed, .. } = step.next {
            assert!(failed);
        } else {
            panic!("expected Speaking");
        }
    }

    #[test]
    fn test_session_id_recorded_while_speaking() {
        let state = ControllerState::Speaking {
            profile: "default".to_string(),
            failed: false,
            session_id: None,
        };
        let step = transition(
            &cfg(),
            state,
            Input::AgentEvent(StreamEvent::SessionId("abc123".to_string())),
        );

        assert_eq!(
            step.next,
            ControllerState::Speaking {
                profile: "default".to_string(),
                failed: false,
                session_id: Some("abc123".to_string()),
            }
        );
    }

    #[test]
    fn test_completed_turn_opens_session_with_token() {
        let state = ControllerState::Speaking {
            profile: "default".to_string(),
            failed: false,
            session_id: Some("abc123".to_string()),
        };
        let step = transition(&cfg(), state, Input::TurnClosed { session_live: false });

        assert_eq!(step.next.phase(), Phase::SessionOpen);
        assert!(step.actions.contains(&Action::RefreshSession {
            token: Some("abc123".to_string()),
        }));
    }

    #[test]
    fn test_failed_turn_without_session_returns_to_idle() {
        let state = ControllerState::Speaking {
            profile: "default".to_string(),
            failed: true,
            session_id: None,
        };
        let step = transition(&cfg(), state, Input::TurnClosed { session_live: false });

        assert_eq!(step.next.phase(), Phase::IdleListening);
        assert!(!step
            .actions
            .iter()
            .any(|a| matches!(a, Action::RefreshSession { .. })));
    }

    #[test]
    fn test_failed_turn_with_live_session_stays_open() {
        let state = ControllerState::Speaking {
            profile: "default".to_string(),
            failed: true,
            session_id: None,
        };
        let step = transition(&cfg(), state, Input::TurnClosed { session_live: true });

        assert_eq!(step.next.phase(), Phase::SessionOpen);
        assert!(step
            .actions
            .contains(&Action::RefreshSession { token: None }));
    }

    #[test]
    fn test_dispatch_failure_speaks_apology() {
        let state = ControllerState::Dispatching {
            profile: "default".to_string(),
            prompt: "list files".to_string(),
        };
        let step = transition(
            &cfg(),
            state,
            Input::DispatchFailed {
                message: "executable missing".to_string(),
                session_live: false,
            },
        );

        assert_eq!(step.next.phase(), Phase::IdleListening);
        assert!(step.actions.contains(&Action::Speak(APOLOGY.to_string())));
        assert!(!step
            .actions
            .iter()
            .any(|a| matches!(a, Action::RefreshSession { .. })));
    }

    #[test]
    fn test_follow_up_dispatches_without_wake() {
        let state = ControllerState::SessionOpen {
            profile: "default".to_string(),
        };
        let step = transition(
            &cfg(),
            state,
            Input::FollowUpCaptured(transcript("and how many are hidden")),
        );

        assert_eq!(step.next.phase(), Phase::Dispatching);
        assert!(step.actions.iter().any(|a| matches!(a, Action::Dispatch { .. })));
    }

    #[test]
    fn test_goodbye_tears_down_immediately() {
        let state = ControllerState::SessionOpen {
            profile: "default".to_string(),
        };
        let step = transition(&cfg(), state, Input::FollowUpCaptured(transcript("goodbye")));

        assert_eq!(step.next.phase(), Phase::IdleListening);
        assert!(step.actions.contains(&Action::TearDownSession));
        assert!(step.actions.contains(&Action::Speak(FAREWELL.to_string())));
    }

    #[test]
    fn test_session_expiry_requires_wake_again() {
        let state = ControllerState::SessionOpen {
            profile: "default".to_string(),
        };
        let step = transition(&cfg(), state, Input::SessionExpired);

        assert_eq!(step.next.phase(), Phase::IdleListening);
        assert!(step.actions.contains(&Action::TearDownSession));
    }

    #[test]
    fn test_unrelated_inputs_keep_state() {
        let step = transition(&cfg(), ControllerState::IdleListening, Input::Dispatched);
        assert_eq!(step.next, ControllerState::IdleListening);
        assert!(step.actions.is_empty());

        let step = transition(
            &cfg(),
            awaiting(),
            Input::WakeDetected(wake("")),
        );
        assert_eq!(step.next.phase(), Phase::AwaitingResponse);
        assert!(step.actions.is_empty());
    }

    #[test]
    fn test_goodbye_word_boundaries() {
        let phrases = ControllerConfig::default().goodbye_phrases;

        assert!(is_goodbye(&phrases, "goodbye"));
        assert!(is_goodbye(&phrases, "okay goodbye now"));
        assert!(is_goodbye(&phrases, "please stop listening"));
        assert!(is_goodbye(&phrases, "Quit."));

        assert!(!is_goodbye(&phrases, "that was quite good"));
        assert!(!is_goodbye(&phrases, "stop the music and keep listening"));
        assert!(!is_goodbye(&phrases, "list the files"));
    }

    #[test]
    fn test_config_validation() {
        let mut config = ControllerConfig::default();
        config.min_command_confidence = 1.5;
        assert!(config.validate().is_err());

        let mut config = ControllerConfig::default();
        config.goodbye_phrases = vec!["  ".to_string()];
        assert!(config.validate().is_err());
    }
}
