/// Speech-to-text collaborator
///
/// The orchestrator only depends on the `Transcriber` trait; the default
/// backend binds whisper.cpp through whisper-rs when the `whisper`
/// feature is enabled and falls back to a deterministic mock otherwise.
/// Two models are kept loaded: a fast one for wake windows and a more
/// accurate one for full command transcription.

use crate::frame::Utterance;
use async_trait::async_trait;
use std::path::PathBuf;
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Error, Debug)]
pub enum SttError {
    #[error("Model loading failed: {0}")]
    ModelLoad(String),

    #[error("Model file not found: {0}")]
    ModelNotFound(PathBuf),

    #[error("Transcription failed: {0}")]
    TranscriptionFailed(String),

    #[error("Invalid audio: {0}")]
    InvalidAudio(String),
}

/// Which loaded model to run an utterance through
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelProfile {
    /// Fast, cheap model for short wake windows
    Wake,

    /// Accurate model for full command transcription
    Command,
}

/// Transcription output. Empty text is a valid outcome, not an error.
#[derive(Debug, Clone, PartialEq)]
pub struct Transcript {
    pub text: String,
    pub confidence: f32,
}

impl Transcript {
    pub fn empty() -> Self {
        Self {
            text: String::new(),
            confidence: 0.0,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.text.trim().is_empty()
    }
}

/// External speech-to-text contract.
///
/// Bounded by utterance duration: implementations must not block
/// indefinitely.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Transcriber: Send + Sync {
    async fn transcribe(
        &self,
        utterance: &Utterance,
        profile: ModelProfile,
    ) -> Result<Transcript, SttError>;
}

/// Whisper backend configuration
#[derive(Debug, Clone)]
pub struct WhisperConfig {
    /// Model file for wake windows (.bin)
    pub wake_model_path: PathBuf,

    /// Model file for command transcription (.bin)
    pub command_model_path: PathBuf,

    /// Language code ("en"); fixing the language speeds up inference
    pub language: String,

    /// Number of inference threads
    pub num_threads: usize,
}

impl Default for WhisperConfig {
    fn default() -> Self {
        Self {
            wake_model_path: PathBuf::from("models/ggml-tiny.en.bin"),
            command_model_path: PathBuf::from("models/ggml-small.en.bin"),
            language: "en".to_string(),
            num_threads: num_cpus::get(),
        }
    }
}

impl WhisperConfig {
    /// Validate configuration
    pub fn validate(&self) -> Result<(), SttError> {
        #[cfg(feature = "whisper")]
        {
            if !self.wake_model_path.exists() {
                return Err(SttError::ModelNotFound(self.wake_model_path.clone()));
            }
            if !self.command_model_path.exists() {
                return Err(SttError::ModelNotFound(self.command_model_path.clone()));
            }
        }

        if self.num_threads == 0 {
            return Err(SttError::ModelLoad("num_threads must be > 0".to_string()));
        }

        if self.language.trim().is_empty() {
            return Err(SttError::ModelLoad("language must be set".to_string()));
        }

        Ok(())
    }
}

/// Confidence heuristic for decoded text.
///
/// Whisper does not report a usable confidence directly; repeated
/// characters, very short segments, and the well-known hallucination
/// strings all lower the estimate.
pub fn estimate_confidence(text: &str) -> f32 {
    let trimmed = text.trim();

    if trimmed.is_empty() {
        return 0.0;
    }

    let mut confidence: f32 = 0.8;

    let chars: Vec<char> = trimmed.chars().collect();
    let mut repeated_count = 0;
    for window in chars.windows(3) {
        if window[0] == window[1] && window[1] == window[2] {
            repeated_count += 1;
        }
    }
    if repeated_count > 2 {
        confidence -= 0.3;
    }

    if trimmed.len() < 3 {
        confidence -= 0.2;
    }

    let hallucinations = ["[BLANK_AUDIO]", "Thank you.", "Thanks for watching!"];
    for hallucination in &hallucinations {
        if trimmed.contains(hallucination) {
            confidence -= 0.4;
        }
    }

    confidence.clamp(0.0, 1.0)
}

// Real Whisper implementation
#[cfg(feature = "whisper")]
mod real_impl {
    use super::*;
    use parking_lot::Mutex;
    use std::sync::Arc;
    use whisper_rs::{FullParams, SamplingStrategy, WhisperContext, WhisperContextParameters};

    /// Whisper-backed transcriber holding both model contexts
    pub struct WhisperTranscriber {
        wake_context: Arc<Mutex<WhisperContext>>,
        command_context: Arc<Mutex<WhisperContext>>,
        config: WhisperConfig,
    }

    impl WhisperTranscriber {
        /// Load both models up front so the first utterance has no lag.
        pub fn new(config: WhisperConfig) -> Result<Self, SttError> {
            config.validate()?;

            info!("Loading wake model: {:?}", config.wake_model_path);
            let wake_context = Self::load_context(&config.wake_model_path)?;

            info!("Loading command model: {:?}", config.command_model_path);
            let command_context = Self::load_context(&config.command_model_path)?;

            info!("Whisper models loaded ({} threads)", config.num_threads);

            Ok(Self {
                wake_context: Arc::new(Mutex::new(wake_context)),
                command_context: Arc::new(Mutex::new(command_context)),
                config,
            })
        }

        fn load_context(path: &std::path::Path) -> Result<WhisperContext, SttError> {
            let ctx_params = WhisperContextParameters::default();

            WhisperContext::new_with_params(
                path.to_str()
                    .ok_or_else(|| SttError::ModelLoad("non-UTF8 model path".to_string()))?,
                ctx_params,
            )
            .map_err(|e| SttError::ModelLoad(e.to_string()))
        }

        fn run_inference(
            context: &Mutex<WhisperContext>,
            audio: &[f32],
            language: &str,
            num_threads: usize,
        ) -> Result<Transcript, SttError> {
            let mut params = FullParams::new(SamplingStrategy::Greedy { best_of: 1 });
            params.set_language(Some(language));
            params.set_translate(false);
            params.set_print_progress(false);
            params.set_print_special(false);
            params.set_print_realtime(false);
            params.set_n_threads(num_threads as i32);

            let mut ctx = context.lock();

            ctx.full(params, audio)
                .map_err(|e| SttError::TranscriptionFailed(e.to_string()))?;

            let num_segments = ctx
                .full_n_segments()
                .map_err(|e| SttError::TranscriptionFailed(e.to_string()))?;

            let mut full_text = String::new();
            for i in 0..num_segments {
                let segment_text = ctx
                    .full_get_segment_text(i)
                    .map_err(|e| SttError::TranscriptionFailed(e.to_string()))?;
                full_text.push_str(&segment_text);
            }

            let text = full_text.trim().to_string();
            let confidence = estimate_confidence(&text);

            Ok(Transcript { text, confidence })
        }
    }

    #[async_trait]
    impl Transcriber for WhisperTranscriber {
        async fn transcribe(
            &self,
            utterance: &Utterance,
            profile: ModelProfile,
        ) -> Result<Transcript, SttError> {
            if utterance.is_empty() {
                return Err(SttError::InvalidAudio("empty utterance".to_string()));
            }

            let audio = utterance.pcm_f32();
            let context = match profile {
                ModelProfile::Wake => self.wake_context.clone(),
                ModelProfile::Command => self.command_context.clone(),
            };
            let language = self.config.language.clone();
            let num_threads = self.config.num_threads;

            debug!(
                "Transcribing {:.1}s utterance ({:?} profile)",
                utterance.duration().as_secs_f32(),
                profile
            );

            // Inference is CPU-bound and can take hundreds of ms; keep it
            // off the async workers
            let start = std::time::Instant::now();
            let transcript = tokio::task::spawn_blocking(move || {
                Self::run_inference(&context, &audio, &language, num_threads)
            })
            .await
            .map_err(|e| SttError::TranscriptionFailed(e.to_string()))??;

            debug!(
                "Transcription done in {}ms: {:?} (confidence {:.2})",
                start.elapsed().as_millis(),
                transcript.text,
                transcript.confidence
            );

            Ok(transcript)
        }
    }
}

// Mock implementation for development and tests without Whisper
#[cfg(not(feature = "whisper"))]
mod mock_impl {
    use super::*;

    /// Stand-in transcriber used when the `whisper` feature is off.
    ///
    /// Deterministic: reports the utterance duration instead of real text
    /// so the surrounding plumbing can be exercised end to end.
    pub struct WhisperTranscriber {
        config: WhisperConfig,
    }

    impl WhisperTranscriber {
        pub fn new(config: WhisperConfig) -> Result<Self, SttError> {
            config.validate()?;

            warn!("Using MOCK transcriber (whisper feature not enabled)");
            info!("Mock wake model path: {:?}", config.wake_model_path);

            Ok(Self { config })
        }

        pub fn config(&self) -> &WhisperConfig {
            &self.config
        }
    }

    #[async_trait]
    impl Transcriber for WhisperTranscriber {
        async fn transcribe(
            &self,
            utterance: &Utterance,
            profile: ModelProfile,
        ) -> Result<Transcript, SttError> {
            if utterance.is_empty() {
                return Err(SttError::InvalidAudio("empty utterance".to_string()));
            }

            debug!(
                "MOCK transcribing {:.1}s utterance ({:?} profile)",
                utterance.duration().as_secs_f32(),
                profile
            );

            let text = format!(
                "mock transcript of {:.1} second utterance",
                utterance.duration().as_secs_f32()
            );

            Ok(Transcript {
                confidence: estimate_confidence(&text),
                text,
            })
        }
    }
}

#[cfg(feature = "whisper")]
pub use real_impl::WhisperTranscriber;

#[cfg(not(feature = "whisper"))]
pub use mock_impl::WhisperTranscriber;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::{Frame, FRAME_SAMPLES};

    #[test]
    fn test_whisper_config_default() {
        let config = WhisperConfig::default();
        assert_eq!(config.language, "en");
        assert!(config.num_threads > 0);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_whisper_config_validation() {
        let mut config = WhisperConfig::default();
        config.num_threads = 0;
        assert!(config.validate().is_err());

        let mut config = WhisperConfig::default();
        config.language = " ".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_empty_transcript_is_valid() {
        let t = Transcript::empty();
        assert!(t.is_empty());

        let t = Transcript {
            text: "   ".to_string(),
            confidence: 0.5,
        };
        assert!(t.is_empty());
    }

    #[test]
    fn test_confidence_heuristic() {
        assert_eq!(estimate_confidence(""), 0.0);
        assert!(estimate_confidence("list the files in this directory") > 0.7);

        // Hallucination markers are penalized
        assert!(estimate_confidence("Thanks for watching!") < 0.5);

        // Repeated runs are penalized
        assert!(estimate_confidence("aaaaaaaaaaaa") < 0.6);

        // Very short output is penalized
        assert!(estimate_confidence("a") < 0.7);
    }

    #[cfg(not(feature = "whisper"))]
    #[tokio::test]
    async fn test_mock_transcriber() {
        let transcriber = WhisperTranscriber::new(WhisperConfig::default()).unwrap();

        let frames: Vec<Frame> = (0..10)
            .map(|i| Frame::new(vec![100; FRAME_SAMPLES], i).unwrap())
            .collect();
        let utterance = Utterance::new(frames);

        let transcript = transcriber
            .transcribe(&utterance, ModelProfile::Command)
            .await
            .unwrap();

        assert!(!transcript.is_empty());
        assert!(transcript.confidence > 0.0);
    }

    #[cfg(not(feature = "whisper"))]
    #[tokio::test]
    async fn test_empty_utterance_rejected() {
        let transcriber = WhisperTranscriber::new(WhisperConfig::default()).unwrap();
        let utterance = Utterance::new(vec![]);

        let result = transcriber
            .transcribe(&utterance, ModelProfile::Wake)
            .await;
        assert!(matches!(result, Err(SttError::InvalidAudio(_))));
    }

    #[tokio::test]
    async fn test_mockall_transcriber_contract() {
        let mut mock = MockTranscriber::new();
        mock.expect_transcribe().returning(|_, _| {
            Ok(Transcript {
                text: "hey claude".to_string(),
                confidence: 0.9,
            })
        });

        let frames: Vec<Frame> = (0..5)
            .map(|i| Frame::new(vec![0; FRAME_SAMPLES], i).unwrap())
            .collect();
        let utterance = Utterance::new(frames);

        let transcript = mock
            .transcribe(&utterance, ModelProfile::Wake)
            .await
            .unwrap();
        assert_eq!(transcript.text, "hey claude");
    }
}
