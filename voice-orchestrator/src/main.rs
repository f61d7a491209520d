//! Voice orchestrator binary
//!
//! Wires the full loop: microphone frames → segmentation → wake
//! spotting / command capture → agent dispatch → spoken response →
//! follow-up session. Ctrl-c (or SIGTERM) releases the device and any
//! live agent subprocess before exit.

use anyhow::Context;
use clap::Parser;
use std::collections::HashMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use voice_listener::{
    FrameSource, SegmenterSignal, Utterance, UtteranceSegmenter, WakeSpotter, WhisperTranscriber,
};
use voice_orchestrator::{
    Cli, ListenWindow, OrchestratorConfig, ProfileRuntime, SaySpeaker, Session, StdoutLog,
    TurnController,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("voice_orchestrator=info".parse()?)
                .add_directive("voice_listener=info".parse()?)
                .add_directive("agent_runner=info".parse()?),
        )
        .init();

    let cli = Cli::parse();

    if cli.list_devices {
        for device in voice_listener::list_input_devices() {
            println!("{}", device);
        }
        return Ok(());
    }

    let config = OrchestratorConfig::load(&cli).context("configuration")?;
    run(config).await
}

async fn run(config: OrchestratorConfig) -> anyhow::Result<()> {
    let shutdown = CancellationToken::new();
    {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("Shutdown requested");
                shutdown.cancel();
            }
        });
    }

    info!("Loading transcription models");
    let transcriber = Arc::new(
        WhisperTranscriber::new(config.whisper.clone()).context("transcriber")?,
    );

    let mut source = FrameSource::start(config.capture.clone()).context("frame source")?;

    let spotter = WakeSpotter::new(config.wake.clone()).context("wake spotter")?;
    let session = Session::new(config.session_timeout);

    let mut profiles = HashMap::new();
    for profile in &config.profiles {
        profiles.insert(
            profile.name.clone(),
            ProfileRuntime {
                runner: Arc::new(
                    agent_runner::AgentRunner::new(profile.runner.clone())
                        .context("agent runner")?,
                ),
                style: profile.style.clone(),
                status_style: profile.status_style.clone(),
            },
        );
    }

    let mut controller = TurnController::new(
        config.controller.clone(),
        spotter,
        transcriber,
        Arc::new(SaySpeaker::new()),
        Arc::new(StdoutLog::new()),
        session,
        profiles,
        config.base_style.clone(),
        shutdown.clone(),
    )
    .context("controller")?;

    let mut wake_segmenter =
        UtteranceSegmenter::new(config.wake_segmenter.clone()).context("wake segmenter")?;
    let mut command_segmenter =
        UtteranceSegmenter::new(config.command_segmenter.clone()).context("command segmenter")?;

    for wp in &config.wake.phrases {
        info!("'{}' -> profile {}", wp.phrase, wp.profile);
    }
    info!(
        "Listening (session window {}s, ctrl-c to quit)",
        config.session_timeout.as_secs()
    );

    let mut poll = tokio::time::interval(std::time::Duration::from_secs(1));
    let mut last_window: Option<ListenWindow> = None;
    let mut dumped: u64 = 0;

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,

            _ = poll.tick() => controller.poll_session().await,

            maybe_frame = source.recv() => {
                let Some(frame) = maybe_frame else {
                    warn!("Frame source ended unexpectedly");
                    break;
                };

                let window = controller.listen_window();
                if window != last_window {
                    // Window switched: stale partial buffers must not
                    // leak into the new mode
                    wake_segmenter.reset();
                    command_segmenter.reset();
                    last_window = window;
                }

                let signal = match window {
                    Some(ListenWindow::Wake) => wake_segmenter.observe(frame),
                    Some(ListenWindow::Command) => command_segmenter.observe(frame),
                    // No barge-in: drained, discarded
                    None => continue,
                };

                if let SegmenterSignal::UtteranceReady(utterance) = signal {
                    maybe_dump(&config, &utterance, &mut dumped);
                    controller.on_utterance(utterance).await;

                    // A turn may have run for a while; frames queued in
                    // the meantime are stale audio, not new speech
                    let stale = source.drain();
                    if stale > 0 {
                        debug!("Discarded {} stale frames after turn", stale);
                    }
                    wake_segmenter.reset();
                    command_segmenter.reset();
                    last_window = controller.listen_window();
                }
            }
        }
    }

    source.stop();
    info!("Stopped after {} turns", controller.turns_run());
    Ok(())
}

/// Dump sealed utterances as WAV files when capture debugging is on
fn maybe_dump(config: &OrchestratorConfig, utterance: &Utterance, dumped: &mut u64) {
    let Some(ref dir) = config.debug_dump_dir else {
        return;
    };

    let path = dir.join(format!("utterance-{:04}.wav", dumped));
    match utterance.write_wav(&path) {
        Ok(()) => *dumped += 1,
        Err(e) => warn!("WAV dump failed: {}", e),
    }
}
