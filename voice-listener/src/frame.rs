/// Audio frame and utterance types
///
/// A Frame is one fixed-duration block of 16-bit PCM from the capture
/// device; an Utterance is an ordered run of frames judged to be one
/// spoken unit by the segmenter.

use std::path::Path;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::debug;

/// Audio sample format (16-bit PCM)
pub type AudioSample = i16;

/// Sample rate required by the transcription models
pub const SAMPLE_RATE: u32 = 16_000;

/// Frame duration accepted by the classifier (30ms)
pub const FRAME_MS: u32 = 30;

/// Samples per frame: 30ms at 16kHz
pub const FRAME_SAMPLES: usize = (SAMPLE_RATE as usize * FRAME_MS as usize) / 1000;

#[derive(Error, Debug)]
pub enum FrameError {
    #[error("Frame must hold {expected} samples, got {got}")]
    WrongLength { expected: usize, got: usize },

    #[error("WAV write failed: {0}")]
    WavWrite(#[from] hound::Error),
}

/// One fixed-duration block of captured audio.
///
/// Immutable once produced; sequence numbers are monotonic per frame
/// source and restart only with the process.
#[derive(Debug, Clone)]
pub struct Frame {
    samples: Vec<AudioSample>,
    seq: u64,
    captured_at: Instant,
}

impl Frame {
    pub fn new(samples: Vec<AudioSample>, seq: u64) -> Result<Self, FrameError> {
        if samples.len() != FRAME_SAMPLES {
            return Err(FrameError::WrongLength {
                expected: FRAME_SAMPLES,
                got: samples.len(),
            });
        }

        Ok(Self {
            samples,
            seq,
            captured_at: Instant::now(),
        })
    }

    pub fn samples(&self) -> &[AudioSample] {
        &self.samples
    }

    pub fn seq(&self) -> u64 {
        self.seq
    }

    pub fn captured_at(&self) -> Instant {
        self.captured_at
    }

    pub fn duration(&self) -> Duration {
        Duration::from_millis(FRAME_MS as u64)
    }
}

/// An ordered run of frames sealed by the segmenter.
///
/// Consumed exactly once by the transcriber, then discarded.
#[derive(Debug, Clone)]
pub struct Utterance {
    frames: Vec<Frame>,
    sample_rate: u32,
}

impl Utterance {
    pub fn new(frames: Vec<Frame>) -> Self {
        Self {
            frames,
            sample_rate: SAMPLE_RATE,
        }
    }

    pub fn frames(&self) -> &[Frame] {
        &self.frames
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    /// Total duration across all frames
    pub fn duration(&self) -> Duration {
        Duration::from_millis(self.frames.len() as u64 * FRAME_MS as u64)
    }

    /// Flatten to a contiguous PCM buffer for the transcriber
    pub fn pcm(&self) -> Vec<AudioSample> {
        let mut out = Vec::with_capacity(self.frames.len() * FRAME_SAMPLES);
        for frame in &self.frames {
            out.extend_from_slice(frame.samples());
        }
        out
    }

    /// PCM converted to normalized f32, the format Whisper consumes
    pub fn pcm_f32(&self) -> Vec<f32> {
        self.frames
            .iter()
            .flat_map(|f| f.samples().iter().map(|&s| s as f32 / i16::MAX as f32))
            .collect()
    }

    /// Dump the utterance to a mono WAV file for capture debugging
    pub fn write_wav(&self, path: &Path) -> Result<(), FrameError> {
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate: self.sample_rate,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };

        let mut writer = hound::WavWriter::create(path, spec)?;
        for frame in &self.frames {
            for &sample in frame.samples() {
                writer.write_sample(sample)?;
            }
        }
        writer.finalize()?;

        debug!("Wrote {:.1}s utterance to {:?}", self.duration().as_secs_f32(), path);
        Ok(())
    }
}
