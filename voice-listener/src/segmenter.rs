/// Utterance segmentation
///
/// Consumes frames plus per-frame VAD decisions, buffers speech, and
/// seals an utterance when trailing silence exceeds the configured
/// threshold or the hard duration cap fires. One instance is used per
/// listening window: wake windows and command windows run the same
/// segmenter with different thresholds.

use crate::frame::{Frame, Utterance, FRAME_MS};
use crate::vad::{VadConfig, VadError, VoiceActivityClassifier};
use std::collections::VecDeque;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, trace};

#[derive(Error, Debug)]
pub enum SegmenterError {
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error(transparent)]
    Vad(#[from] VadError),
}

/// Segmenter configuration parameters
#[derive(Debug, Clone)]
pub struct SegmenterConfig {
    /// Trailing silence that seals an utterance
    pub silence_threshold: Duration,

    /// Hard cap on utterance length; prevents runaway capture when the
    /// classifier misfires
    pub max_duration: Duration,

    /// Speech shorter than this is discarded as noise (coughs, bumps)
    pub min_speech_duration: Duration,

    /// Audio kept from before speech onset so the first syllable is not
    /// clipped
    pub pre_roll: Duration,
}

impl Default for SegmenterConfig {
    fn default() -> Self {
        Self {
            silence_threshold: Duration::from_millis(1500),
            max_duration: Duration::from_secs(60),
            min_speech_duration: Duration::from_millis(240),
            pre_roll: Duration::from_millis(300),
        }
    }
}

impl SegmenterConfig {
    /// Command-capture window: bounded at 30s, same trailing silence
    pub fn command_window() -> Self {
        Self {
            max_duration: Duration::from_secs(30),
            ..Default::default()
        }
    }

    /// Validate configuration parameters
    pub fn validate(&self) -> Result<(), SegmenterError> {
        if self.silence_threshold < Duration::from_millis(FRAME_MS as u64) {
            return Err(SegmenterError::InvalidConfig(
                "silence_threshold must cover at least one frame".to_string(),
            ));
        }

        if self.max_duration <= self.silence_threshold {
            return Err(SegmenterError::InvalidConfig(
                "max_duration must exceed silence_threshold".to_string(),
            ));
        }

        if self.min_speech_duration >= self.max_duration {
            return Err(SegmenterError::InvalidConfig(
                "min_speech_duration must be below max_duration".to_string(),
            ));
        }

        Ok(())
    }

    fn silence_frames_required(&self) -> usize {
        (self.silence_threshold.as_millis() / FRAME_MS as u128) as usize
    }

    fn pre_roll_frames(&self) -> usize {
        (self.pre_roll.as_millis() / FRAME_MS as u128) as usize
    }
}

/// Outcome of observing one frame
#[derive(Debug)]
pub enum SegmenterSignal {
    /// No speech in progress
    Idle,

    /// Speech in progress, utterance not yet sealed
    Accumulating,

    /// Utterance sealed and ready for transcription
    UtteranceReady(Utterance),
}

/// Buffers frames into utterances using per-frame VAD decisions.
pub struct UtteranceSegmenter {
    vad: VoiceActivityClassifier,
    config: SegmenterConfig,
    pre_roll: VecDeque<Frame>,
    buffered: Vec<Frame>,
    speech_started: bool,
    speech_frames: usize,
    silence_frames: usize,
}

impl UtteranceSegmenter {
    pub fn new(config: SegmenterConfig) -> Result<Self, SegmenterError> {
        Self::with_vad(config, VadConfig::default())
    }

    pub fn with_vad(config: SegmenterConfig, vad_config: VadConfig) -> Result<Self, SegmenterError> {
        config.validate()?;
        vad_config.validate()?;

        debug!(
            "Segmenter: silence={}ms, cap={}s, min={}ms, pre-roll={}ms",
            config.silence_threshold.as_millis(),
            config.max_duration.as_secs(),
            config.min_speech_duration.as_millis(),
            config.pre_roll.as_millis(),
        );

        Ok(Self {
            vad: VoiceActivityClassifier::with_config(vad_config),
            config,
            pre_roll: VecDeque::new(),
            buffered: Vec::new(),
            speech_started: false,
            speech_frames: 0,
            silence_frames: 0,
        })
    }

    /// Observe one frame and report the segmentation outcome.
    pub fn observe(&mut self, frame: Frame) -> SegmenterSignal {
        let is_speech = self.vad.classify(frame.samples());

        if !self.speech_started {
            if is_speech {
                // Speech onset: prepend the pre-roll so the first
                // syllable survives
                self.speech_started = true;
                self.speech_frames = 1;
                self.silence_frames = 0;
                self.buffered = self.pre_roll.drain(..).collect();
                self.buffered.push(frame);
                trace!("Speech onset at frame {}", self.buffered.last().map(|f| f.seq()).unwrap_or(0));
                return SegmenterSignal::Accumulating;
            }

            self.pre_roll.push_back(frame);
            while self.pre_roll.len() > self.config.pre_roll_frames() {
                self.pre_roll.pop_front();
            }
            return SegmenterSignal::Idle;
        }

        self.buffered.push(frame);
        if is_speech {
            self.speech_frames += 1;
            self.silence_frames = 0;
        } else {
            self.silence_frames += 1;
        }

        let total = Duration::from_millis(self.buffered.len() as u64 * FRAME_MS as u64);

        if self.silence_frames >= self.config.silence_frames_required() {
            return self.seal("trailing silence");
        }

        if total >= self.config.max_duration {
            return self.seal("duration cap");
        }

        SegmenterSignal::Accumulating
    }

    fn seal(&mut self, reason: &str) -> SegmenterSignal {
        let speech = Duration::from_millis(self.speech_frames as u64 * FRAME_MS as u64);
        let frames = std::mem::take(&mut self.buffered);
        self.reset_window();

        if speech < self.config.min_speech_duration {
            // A cough, not an utterance. Not an error: the buffer is
            // discarded and listening continues.
            debug!("Discarding {}ms of speech below minimum", speech.as_millis());
            return SegmenterSignal::Idle;
        }

        let utterance = Utterance::new(frames);
        debug!(
            "Sealed {:.1}s utterance ({})",
            utterance.duration().as_secs_f32(),
            reason
        );
        SegmenterSignal::UtteranceReady(utterance)
    }

    fn reset_window(&mut self) {
        self.speech_started = false;
        self.speech_frames = 0;
        self.silence_frames = 0;
        self.pre_roll.clear();
    }

    /// Drop any in-progress buffer and return to idle listening.
    pub fn reset(&mut self) {
        self.buffered.clear();
        self.reset_window();
        debug!("Segmenter reset");
    }

    pub fn is_accumulating(&self) -> bool {
        self.speech_started
    }

    pub fn config(&self) -> &SegmenterConfig {
        &self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::FRAME_SAMPLES;

    fn speech_frame(seq: u64) -> Frame {
        // 2kHz tone: high zero-crossing rate and energy
        let samples: Vec<i16> = (0..FRAME_SAMPLES)
            .map(|i| {
                let t = i as f32 / 16000.0;
                (0.3 * (2.0 * std::f32::consts::PI * 2000.0 * t).sin() * i16::MAX as f32) as i16
            })
            .collect();
        Frame::new(samples, seq).unwrap()
    }

    fn silence_frame(seq: u64) -> Frame {
        Frame::new(vec![0; FRAME_SAMPLES], seq).unwrap()
    }

    fn test_config() -> SegmenterConfig {
        SegmenterConfig {
            silence_threshold: Duration::from_millis(300), // 10 frames
            max_duration: Duration::from_secs(5),
            min_speech_duration: Duration::from_millis(240), // 8 frames
            pre_roll: Duration::from_millis(90), // 3 frames
        }
    }

    fn feed(segmenter: &mut UtteranceSegmenter, frames: Vec<Frame>) -> Vec<SegmenterSignal> {
        frames.into_iter().map(|f| segmenter.observe(f)).collect()
    }

    #[test]
    fn test_silence_never_emits() {
        let mut segmenter = UtteranceSegmenter::new(test_config()).unwrap();

        // 5 seconds of pure silence
        for seq in 0..167 {
            let signal = segmenter.observe(silence_frame(seq));
            assert!(matches!(signal, SegmenterSignal::Idle));
        }
    }

    #[test]
    fn test_speech_then_silence_seals() {
        let mut segmenter = UtteranceSegmenter::new(test_config()).unwrap();

        let mut frames: Vec<Frame> = (0..20).map(speech_frame).collect();
        frames.extend((20..40).map(silence_frame));

        let signals = feed(&mut segmenter, frames);

        let ready: Vec<_> = signals
            .iter()
            .filter(|s| matches!(s, SegmenterSignal::UtteranceReady(_)))
            .collect();
        assert_eq!(ready.len(), 1);

        // Sealed at speech + 10 silence frames
        if let SegmenterSignal::UtteranceReady(utt) = &signals[29] {
            assert_eq!(utt.frames().len(), 30);
        } else {
            panic!("Expected utterance at frame 29");
        }
    }

    #[test]
    fn test_short_burst_discarded() {
        let mut segmenter = UtteranceSegmenter::new(test_config()).unwrap();

        // 4 speech frames (120ms) is below the 240ms minimum
        let mut frames: Vec<Frame> = (0..4).map(speech_frame).collect();
        frames.extend((4..20).map(silence_frame));

        let signals = feed(&mut segmenter, frames);

        assert!(!signals
            .iter()
            .any(|s| matches!(s, SegmenterSignal::UtteranceReady(_))));

        // Back to idle, ready for the next window
        assert!(!segmenter.is_accumulating());
    }

    #[test]
    fn test_duration_cap_seals() {
        let config = SegmenterConfig {
            max_duration: Duration::from_millis(900), // 30 frames
            ..test_config()
        };
        let mut segmenter = UtteranceSegmenter::new(config).unwrap();

        // Continuous speech, no trailing silence: the cap must fire
        let signals = feed(&mut segmenter, (0..35).map(speech_frame).collect());

        assert!(signals
            .iter()
            .any(|s| matches!(s, SegmenterSignal::UtteranceReady(_))));
    }

    #[test]
    fn test_pre_roll_included() {
        let mut segmenter = UtteranceSegmenter::new(test_config()).unwrap();

        // Silence before onset fills the pre-roll ring
        let mut frames: Vec<Frame> = (0..6).map(silence_frame).collect();
        frames.extend((6..26).map(speech_frame));
        frames.extend((26..40).map(silence_frame));

        let signals = feed(&mut segmenter, frames);

        let utterance = signals
            .into_iter()
            .find_map(|s| match s {
                SegmenterSignal::UtteranceReady(u) => Some(u),
                _ => None,
            })
            .expect("utterance sealed");

        // The three pre-roll frames (seq 3..6) precede the onset frame
        assert_eq!(utterance.frames()[0].seq(), 3);
        assert_eq!(utterance.frames()[3].seq(), 6);
    }

    #[test]
    fn test_reset_drops_partial_buffer() {
        let mut segmenter = UtteranceSegmenter::new(test_config()).unwrap();

        for seq in 0..5 {
            segmenter.observe(speech_frame(seq));
        }
        assert!(segmenter.is_accumulating());

        segmenter.reset();
        assert!(!segmenter.is_accumulating());

        // Silence after reset stays idle
        let signal = segmenter.observe(silence_frame(100));
        assert!(matches!(signal, SegmenterSignal::Idle));
    }

    #[test]
    fn test_config_validation() {
        let mut config = test_config();
        config.max_duration = Duration::from_millis(100);
        assert!(config.validate().is_err());

        let mut config = test_config();
        config.silence_threshold = Duration::from_millis(5);
        assert!(config.validate().is_err());
    }
}
