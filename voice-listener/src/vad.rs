/// Per-frame voice activity classification
///
/// One frame in, one speech/silence decision out. The classifier keeps
/// no history: onset confirmation and trailing-silence tracking live in
/// the segmenter, which owns all cross-frame state.

use crate::frame::AudioSample;
use thiserror::Error;
use tracing::trace;

#[derive(Error, Debug)]
pub enum VadError {
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

/// Decision thresholds.
///
/// A frame counts as speech only when it clears both bars: the energy
/// floor rejects quiet room noise, the zero-crossing floor rejects
/// low-frequency rumble (fans, desk bumps) that carries energy but no
/// voice-band content.
#[derive(Debug, Clone)]
pub struct VadConfig {
    /// Normalized RMS floor (0.0 - 1.0)
    pub energy_threshold: f32,

    /// Sign-change rate floor (0.0 - 1.0)
    pub zcr_threshold: f32,
}

impl Default for VadConfig {
    fn default() -> Self {
        Self {
            energy_threshold: 0.02,
            zcr_threshold: 0.15,
        }
    }
}

impl VadConfig {
    /// Validate configuration parameters
    pub fn validate(&self) -> Result<(), VadError> {
        for (name, value) in [
            ("energy_threshold", self.energy_threshold),
            ("zcr_threshold", self.zcr_threshold),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(VadError::InvalidConfig(format!(
                    "{} must be between 0.0 and 1.0",
                    name
                )));
            }
        }
        Ok(())
    }
}

/// Stateless speech/silence classifier.
#[derive(Debug, Clone, Default)]
pub struct VoiceActivityClassifier {
    config: VadConfig,
}

impl VoiceActivityClassifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: VadConfig) -> Self {
        Self { config }
    }

    /// Classify one frame. Pure: the same samples always give the same
    /// answer.
    pub fn classify(&self, samples: &[AudioSample]) -> bool {
        let energy = rms_energy(samples);
        if energy <= self.config.energy_threshold {
            return false;
        }

        let zcr = zero_crossing_rate(samples);
        trace!("Frame analysis: energy={:.4}, zcr={:.4}", energy, zcr);

        zcr > self.config.zcr_threshold
    }

    pub fn config(&self) -> &VadConfig {
        &self.config
    }
}

/// Root-mean-square amplitude, normalized to [0, 1].
pub fn rms_energy(samples: &[AudioSample]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }

    let sum_squares: f64 = samples.iter().map(|&s| s as f64 * s as f64).sum();
    (((sum_squares / samples.len() as f64).sqrt()) / i16::MAX as f64) as f32
}

/// Fraction of adjacent sample pairs whose signs differ.
pub fn zero_crossing_rate(samples: &[AudioSample]) -> f32 {
    if samples.len() < 2 {
        return 0.0;
    }

    // The xor of two samples is negative exactly when their sign bits
    // differ
    let crossings = samples.windows(2).filter(|w| (w[0] ^ w[1]) < 0).count();
    crossings as f32 / (samples.len() - 1) as f32
}
