//! End-to-end turn flow tests
//!
//! The controller is driven with a scripted transcriber, a recording
//! speaker, a memory log sink and a scripted fake agent (a shell script
//! printing newline-delimited records), so every path through
//! wake → capture → dispatch → response → session runs without a
//! microphone or a real agent.

#![cfg(unix)]

use agent_runner::{AgentRunner, RunnerConfig, TurnStatus};
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::os::unix::fs::PermissionsExt;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;
use voice_listener::{
    Frame, ModelProfile, SttError, Transcriber, Transcript, Utterance, WakeConfig, WakeSpotter,
    FRAME_SAMPLES,
};
use voice_orchestrator::{
    ControllerConfig, ListenWindow, LogKind, MemoryLog, Phase, ProfileRuntime, RecordingSpeaker,
    Session, TurnController, VoiceStyle,
};

const INIT: &str =
    r#"{"type":"system","subtype":"init","session_id":"abc123","tools":["Bash","Read"]}"#;
const STATUS_ONE: &str = r#"{"type":"assistant","message":{"content":[{"type":"text","text":"<STATUS>listing directory</STATUS>"}]}}"#;
const STATUS_TWO: &str = r#"{"type":"assistant","message":{"content":[{"type":"text","text":"<STATUS>counting items</STATUS>"}]}}"#;
const FINAL: &str = r#"{"type":"result","subtype":"success","session_id":"abc123","result":"<SPEAK>there are nine items</SPEAK>"}"#;

/// Write an executable script that logs its arguments and prints the
/// given records.
fn fake_agent(dir: &TempDir, records: &[&str]) -> PathBuf {
    let path = dir.path().join("fake-agent.sh");
    let args_log = dir.path().join("args.log");

    let mut script = format!("#!/bin/sh\necho \"$@\" >> '{}'\n", args_log.display());
    for record in records {
        script.push_str("printf '%s\\n' '");
        script.push_str(record);
        script.push_str("'\n");
    }

    std::fs::write(&path, script).unwrap();
    let mut perms = std::fs::metadata(&path).unwrap().permissions();
    perms.set_mode(0o755);
    std::fs::set_permissions(&path, perms).unwrap();

    path
}

fn dispatch_args(dir: &TempDir) -> Vec<String> {
    std::fs::read_to_string(dir.path().join("args.log"))
        .unwrap_or_default()
        .lines()
        .map(str::to_string)
        .collect()
}

/// Transcriber that replays a scripted sequence of transcripts
struct ScriptedTranscriber {
    replies: Mutex<VecDeque<Transcript>>,
}

impl ScriptedTranscriber {
    fn new(texts: &[&str]) -> Self {
        Self {
            replies: Mutex::new(
                texts
                    .iter()
                    .map(|t| Transcript {
                        text: t.to_string(),
                        confidence: 0.9,
                    })
                    .collect(),
            ),
        }
    }
}

#[async_trait]
impl Transcriber for ScriptedTranscriber {
    async fn transcribe(
        &self,
        _utterance: &Utterance,
        _profile: ModelProfile,
    ) -> Result<Transcript, SttError> {
        Ok(self
            .replies
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(Transcript::empty))
    }
}

struct Harness {
    controller: TurnController,
    speaker: RecordingSpeaker,
    log: MemoryLog,
}

fn harness(agent_binary: PathBuf, transcripts: &[&str], timeout: Duration) -> Harness {
    let speaker = RecordingSpeaker::new();
    let log = MemoryLog::new();

    let runner_config = RunnerConfig {
        binary: agent_binary,
        ..Default::default()
    };
    let mut profiles = HashMap::new();
    profiles.insert(
        "default".to_string(),
        ProfileRuntime {
            runner: Arc::new(AgentRunner::new(runner_config).unwrap()),
            style: VoiceStyle::default(),
            status_style: VoiceStyle {
                rate: 205,
                ..VoiceStyle::default()
            },
        },
    );

    let controller = TurnController::new(
        ControllerConfig::default(),
        WakeSpotter::new(WakeConfig::default()).unwrap(),
        Arc::new(ScriptedTranscriber::new(transcripts)),
        Arc::new(speaker.clone()),
        Arc::new(log.clone()),
        Session::new(timeout),
        profiles,
        VoiceStyle::default(),
        CancellationToken::new(),
    )
    .unwrap();

    Harness {
        controller,
        speaker,
        log,
    }
}

fn utterance() -> Utterance {
    let frames: Vec<Frame> = (0..10)
        .map(|i| Frame::new(vec![0; FRAME_SAMPLES], i).unwrap())
        .collect();
    Utterance::new(frames)
}

#[tokio::test]
async fn wake_with_command_runs_a_full_turn() {
    let dir = TempDir::new().unwrap();
    let agent = fake_agent(&dir, &[INIT, STATUS_ONE, STATUS_TWO, FINAL]);
    let mut h = harness(agent, &["hey claude list the files here"], Duration::from_secs(30));

    assert_eq!(h.controller.phase(), Phase::IdleListening);
    h.controller.on_utterance(utterance()).await;

    // Acknowledgement, then each status as it arrived, then the final
    // response, in that exact order
    assert_eq!(
        h.speaker.spoken(),
        vec![
            "Mmhm.",
            "listing directory",
            "counting items",
            "there are nine items",
        ]
    );

    assert_eq!(h.controller.phase(), Phase::SessionOpen);
    assert!(h.controller.session().is_live());
    assert_eq!(h.controller.session().token(), Some("abc123"));

    let turn = h.controller.last_turn().unwrap();
    assert_eq!(turn.status(), TurnStatus::Completed);
    assert_eq!(turn.prompt(), "list the files here");
    assert_eq!(turn.spoken_text(), Some("there are nine items"));
}

#[tokio::test]
async fn statuses_flush_before_the_final_response() {
    let dir = TempDir::new().unwrap();
    let agent = fake_agent(&dir, &[INIT, STATUS_ONE, STATUS_TWO, FINAL]);
    let mut h = harness(agent, &["hey claude list the files"], Duration::from_secs(30));

    h.controller.on_utterance(utterance()).await;

    let lines = h.log.lines();
    let status_positions: Vec<usize> = lines
        .iter()
        .enumerate()
        .filter_map(|(i, (k, _))| (*k == LogKind::Status).then_some(i))
        .collect();
    let final_position = lines
        .iter()
        .position(|(k, _)| *k == LogKind::Speak)
        .expect("final response logged");

    assert_eq!(status_positions.len(), 2);
    assert!(status_positions.iter().all(|&p| p < final_position));
    assert_eq!(
        h.log.of_kind(LogKind::Status),
        vec!["listing directory", "counting items"]
    );
}

#[tokio::test]
async fn wake_only_then_separate_command() {
    let dir = TempDir::new().unwrap();
    let agent = fake_agent(&dir, &[INIT, FINAL]);
    let mut h = harness(
        agent,
        &["hey claude", "list the files here"],
        Duration::from_secs(30),
    );

    // Wake phrase alone opens the command window
    h.controller.on_utterance(utterance()).await;
    assert_eq!(h.controller.phase(), Phase::CapturingCommand);
    assert_eq!(
        h.controller.listen_window(),
        Some(ListenWindow::Command)
    );
    assert_eq!(h.controller.turns_run(), 0);

    // The next utterance is the command
    h.controller.on_utterance(utterance()).await;
    assert_eq!(h.controller.phase(), Phase::SessionOpen);
    assert_eq!(h.controller.turns_run(), 1);
}

#[tokio::test]
async fn follow_up_resumes_with_the_continuation_token() {
    let dir = TempDir::new().unwrap();
    let agent = fake_agent(&dir, &[INIT, FINAL]);
    let mut h = harness(
        agent,
        &["hey claude list the files", "and how many are hidden"],
        Duration::from_secs(30),
    );

    h.controller.on_utterance(utterance()).await;
    assert_eq!(h.controller.session().token(), Some("abc123"));

    // Follow-up inside the window: no wake phrase required
    h.controller.on_utterance(utterance()).await;
    assert_eq!(h.controller.turns_run(), 2);

    let args = dispatch_args(&dir);
    assert_eq!(args.len(), 2);
    assert!(!args[0].contains("--resume"));
    assert!(args[1].contains("--resume abc123"));
}

#[tokio::test]
async fn expired_session_requires_the_wake_phrase_again() {
    let dir = TempDir::new().unwrap();
    let agent = fake_agent(&dir, &[INIT, FINAL]);
    let mut h = harness(
        agent,
        &[
            "hey claude list the files",
            "count them",
            "hey claude count them",
        ],
        Duration::from_millis(200),
    );

    h.controller.on_utterance(utterance()).await;
    assert_eq!(h.controller.phase(), Phase::SessionOpen);

    tokio::time::sleep(Duration::from_millis(250)).await;

    // Wake-free speech after the deadline is ignored
    h.controller.on_utterance(utterance()).await;
    assert_eq!(h.controller.phase(), Phase::IdleListening);
    assert_eq!(h.controller.turns_run(), 1);
    assert!(h.controller.session().token().is_none());

    // With the wake phrase, a fresh token-less turn starts
    h.controller.on_utterance(utterance()).await;
    assert_eq!(h.controller.turns_run(), 2);

    let args = dispatch_args(&dir);
    assert!(!args[1].contains("--resume"));
}

#[tokio::test]
async fn session_poll_expires_without_an_utterance() {
    let dir = TempDir::new().unwrap();
    let agent = fake_agent(&dir, &[INIT, FINAL]);
    let mut h = harness(
        agent,
        &["hey claude list the files"],
        Duration::from_millis(100),
    );

    h.controller.on_utterance(utterance()).await;
    assert_eq!(h.controller.phase(), Phase::SessionOpen);

    tokio::time::sleep(Duration::from_millis(150)).await;
    h.controller.poll_session().await;

    assert_eq!(h.controller.phase(), Phase::IdleListening);
    assert_eq!(h.controller.listen_window(), Some(ListenWindow::Wake));
}

#[tokio::test]
async fn empty_command_is_a_silent_false_wake() {
    let dir = TempDir::new().unwrap();
    let agent = fake_agent(&dir, &[INIT, FINAL]);
    let mut h = harness(agent, &["hey claude", ""], Duration::from_secs(30));

    h.controller.on_utterance(utterance()).await;
    assert_eq!(h.controller.phase(), Phase::CapturingCommand);

    h.controller.on_utterance(utterance()).await;
    assert_eq!(h.controller.phase(), Phase::IdleListening);
    assert_eq!(h.controller.turns_run(), 0);

    // Only the wake acknowledgement was spoken
    assert_eq!(h.speaker.spoken(), vec!["Mmhm."]);
}

#[tokio::test]
async fn goodbye_tears_the_session_down() {
    let dir = TempDir::new().unwrap();
    let agent = fake_agent(&dir, &[INIT, FINAL]);
    let mut h = harness(
        agent,
        &["hey claude list the files", "goodbye"],
        Duration::from_secs(30),
    );

    h.controller.on_utterance(utterance()).await;
    assert!(h.controller.session().is_live());

    h.controller.on_utterance(utterance()).await;
    assert_eq!(h.controller.phase(), Phase::IdleListening);
    assert!(!h.controller.session().is_live());
    assert!(h.controller.session().token().is_none());
    assert!(h.speaker.spoken().contains(&"Goodbye!".to_string()));
    assert_eq!(h.controller.turns_run(), 1);
}

#[tokio::test]
async fn dispatch_failure_speaks_an_apology() {
    let mut h = harness(
        PathBuf::from("/nonexistent/agent-binary"),
        &["hey claude list the files"],
        Duration::from_secs(30),
    );

    h.controller.on_utterance(utterance()).await;

    // No session existed, so the failure returns to idle
    assert_eq!(h.controller.phase(), Phase::IdleListening);
    assert!(!h.controller.session().is_live());
    assert!(h
        .speaker
        .spoken()
        .contains(&"Something went wrong. Try again.".to_string()));

    let turn = h.controller.last_turn().unwrap();
    assert_eq!(turn.status(), TurnStatus::Cancelled);
}

#[tokio::test]
async fn agent_error_is_spoken_and_session_continues() {
    let dir = TempDir::new().unwrap();
    let error_result = r#"{"type":"result","subtype":"error_during_execution","session_id":"abc123","error":"tool crashed"}"#;

    // First turn succeeds, second fails
    let good = fake_agent(&dir, &[INIT, FINAL]);
    let mut h = harness(
        good.clone(),
        &["hey claude list the files", "now break"],
        Duration::from_secs(30),
    );

    h.controller.on_utterance(utterance()).await;
    assert!(h.controller.session().is_live());

    let failing = fake_agent(&dir, &[INIT, error_result]);
    assert_eq!(failing, good); // same script path, rewritten in place

    h.controller.on_utterance(utterance()).await;

    // The failed turn is spoken and still counts as an interaction
    assert_eq!(h.controller.phase(), Phase::SessionOpen);
    assert!(h.controller.session().is_live());
    assert!(h
        .speaker
        .spoken()
        .iter()
        .any(|s| s.contains("tool crashed")));

    let turn = h.controller.last_turn().unwrap();
    assert!(matches!(turn.status(), TurnStatus::Failed(_)));
}

#[tokio::test]
async fn no_wake_phrase_means_no_turn() {
    let dir = TempDir::new().unwrap();
    let agent = fake_agent(&dir, &[INIT, FINAL]);
    let mut h = harness(
        agent,
        &["what time is it", "nothing to see here"],
        Duration::from_secs(30),
    );

    h.controller.on_utterance(utterance()).await;
    h.controller.on_utterance(utterance()).await;

    assert_eq!(h.controller.phase(), Phase::IdleListening);
    assert_eq!(h.controller.turns_run(), 0);
    assert!(h.speaker.spoken().is_empty());
    assert!(dispatch_args(&dir).is_empty());
}

#[tokio::test]
async fn phase_snapshots_are_published() {
    let dir = TempDir::new().unwrap();
    let agent = fake_agent(&dir, &[INIT, FINAL]);
    let mut h = harness(agent, &["hey claude list the files"], Duration::from_secs(30));

    let watch = h.controller.phase_watch();
    assert_eq!(*watch.borrow(), Phase::IdleListening);

    h.controller.on_utterance(utterance()).await;
    assert_eq!(*watch.borrow(), Phase::SessionOpen);
}
