/// Listener service binary
///
/// Standalone microphone bring-up loop: capture frames, segment
/// utterances, transcribe wake windows and report wake-phrase matches.
/// Useful for checking device selection and VAD thresholds before
/// running the full orchestrator.

use std::sync::Arc;
use tracing::{error, info};
use voice_listener::{
    CaptureConfig, FrameSource, ModelProfile, SegmenterConfig, SegmenterSignal, Transcriber,
    UtteranceSegmenter, WakeConfig, WakeSpotter, WhisperConfig, WhisperTranscriber,
};

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("voice_listener=debug".parse().unwrap()),
        )
        .init();

    info!("Starting listener service");

    let devices = voice_listener::list_input_devices();
    info!("Input devices: {:?}", devices);

    let capture_config = load_capture_config();

    let mut source = match FrameSource::start(capture_config) {
        Ok(s) => s,
        Err(e) => {
            error!("Failed to open frame source: {}", e);
            std::process::exit(1);
        }
    };

    let transcriber: Arc<dyn Transcriber> =
        match WhisperTranscriber::new(WhisperConfig::default()) {
            Ok(t) => Arc::new(t),
            Err(e) => {
                error!("Failed to initialize transcriber: {}", e);
                std::process::exit(1);
            }
        };

    let mut segmenter = match UtteranceSegmenter::new(SegmenterConfig::default()) {
        Ok(s) => s,
        Err(e) => {
            error!("Invalid segmenter configuration: {}", e);
            std::process::exit(1);
        }
    };

    let spotter = match WakeSpotter::new(WakeConfig::default()) {
        Ok(s) => s,
        Err(e) => {
            error!("Invalid wake configuration: {}", e);
            std::process::exit(1);
        }
    };

    info!("Listening; say the wake phrase (ctrl-c to quit)");

    loop {
        tokio::select! {
            maybe_frame = source.recv() => {
                let Some(frame) = maybe_frame else {
                    error!("Frame source ended unexpectedly");
                    break;
                };

                if let SegmenterSignal::UtteranceReady(utterance) = segmenter.observe(frame) {
                    match transcriber.transcribe(&utterance, ModelProfile::Wake).await {
                        Ok(transcript) => {
                            info!("Heard: {:?} (confidence {:.2})", transcript.text, transcript.confidence);
                            if let Some(m) = spotter.spot(&transcript) {
                                info!(
                                    "Wake phrase '{}' matched (confidence {:.2}, profile {})",
                                    m.phrase, m.confidence, m.profile
                                );
                            }
                        }
                        Err(e) => error!("Transcription failed: {}", e),
                    }
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Shutting down");
                break;
            }
        }
    }

    source.stop();
    info!("Listener service stopped");
}

/// Load capture configuration from the environment
fn load_capture_config() -> CaptureConfig {
    let device =
        std::env::var("LISTENER_DEVICE").unwrap_or_else(|_| "default".to_string());

    CaptureConfig {
        device,
        ..Default::default()
    }
}
