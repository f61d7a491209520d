/// Voice listener library
///
/// Microphone frame capture, voice-activity classification, utterance
/// segmentation, wake-phrase spotting, and the speech-to-text
/// collaborator contract.

pub mod capture;
pub mod frame;
pub mod sample_buffer;
pub mod segmenter;
pub mod stt;
pub mod vad;
pub mod wake;

// Re-export main types
pub use capture::{list_input_devices, CaptureConfig, CaptureError, FrameSource};
pub use frame::{AudioSample, Frame, FrameError, Utterance, FRAME_MS, FRAME_SAMPLES, SAMPLE_RATE};
pub use sample_buffer::PcmRing;
pub use segmenter::{SegmenterConfig, SegmenterError, SegmenterSignal, UtteranceSegmenter};
pub use stt::{
    estimate_confidence, ModelProfile, SttError, Transcriber, Transcript, WhisperConfig,
    WhisperTranscriber,
};
pub use vad::{VadConfig, VadError, VoiceActivityClassifier};
pub use wake::{WakeConfig, WakeError, WakeMatch, WakePhrase, WakeSpotter};
