//! # Audio Conditioner
//!
//! Turns raw client PCM into a normalized buffer the translation engine handles
//! well, and applies a lightweight safety limiter to audio coming back from the
//! engine.
//!
//! ## Pipeline (each stage toggleable through [`AudioConfig`]):
//! 1. **High-pass** (first order, zero phase) to suppress rumble below ~80 Hz
//! 2. **Automatic gain control** using a centered sliding RMS window
//! 3. **Band-pass** (second order) to bound the signal to the speech band
//! 4. **Peak normalization** to a fixed fraction of full scale
//!
//! ## Failure Semantics:
//! A failing stage never drops the chunk. The conditioner stops at the first
//! failure and hands back the last good buffer together with a
//! [`ConditionError`] the caller is expected to log.

use crate::audio::filters::{zero_phase, BandPass, FilterError, OnePoleHighPass};
use crate::audio::pcm::{self, PcmError};
use crate::config::AudioConfig;
use std::fmt;
use thiserror::Error;

/// One step of the conditioning pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    HighPass,
    GainControl,
    BandPass,
    Normalize,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::HighPass => "high_pass",
            Stage::GainControl => "gain_control",
            Stage::BandPass => "band_pass",
            Stage::Normalize => "normalize",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConditionError {
    #[error("cannot decode PCM payload: {0}")]
    Decode(#[from] PcmError),

    #[error("{stage} stage misconfigured: {source}")]
    Filter {
        stage: Stage,
        #[source]
        source: FilterError,
    },

    #[error("{stage} stage produced non-finite samples")]
    NonFinite { stage: Stage },
}

impl ConditionError {
    /// Stage the failure happened in, `None` when the payload never decoded.
    pub fn stage(&self) -> Option<Stage> {
        match self {
            ConditionError::Decode(_) => None,
            ConditionError::Filter { stage, .. } | ConditionError::NonFinite { stage } => {
                Some(*stage)
            }
        }
    }
}

/// Result of [`AudioConditioner::condition`].
#[derive(Debug, Clone)]
pub struct Conditioned {
    /// 16-bit little-endian PCM ready for dispatch.
    pub pcm: Vec<u8>,
    /// Set when a stage failed and `pcm` is the pre-failure buffer.
    pub degradation: Option<ConditionError>,
}

/// Stateless conditioning pipeline shared by every session.
#[derive(Debug, Clone)]
pub struct AudioConditioner {
    config: AudioConfig,
}

impl AudioConditioner {
    pub fn new(config: AudioConfig) -> Self {
        Self { config }
    }

    /// Run the enabled stages over a raw PCM payload.
    pub fn condition(&self, raw: &[u8]) -> Conditioned {
        let mut samples = match pcm::decode(raw) {
            Ok(samples) => samples,
            Err(e) => {
                return Conditioned {
                    pcm: raw.to_vec(),
                    degradation: Some(e.into()),
                }
            }
        };

        let stages = [
            (Stage::HighPass, self.config.highpass_enabled),
            (Stage::GainControl, self.config.agc_enabled),
            (Stage::BandPass, self.config.bandpass_enabled),
            (Stage::Normalize, self.config.normalize_enabled),
        ];

        let mut degradation = None;
        for (stage, enabled) in stages {
            if !enabled {
                continue;
            }
            match self.apply(stage, &samples) {
                Ok(next) => samples = next,
                Err(e) => {
                    degradation = Some(e);
                    break;
                }
            }
        }

        Conditioned {
            pcm: pcm::encode(&samples),
            degradation,
        }
    }

    /// Scale engine output down to the safety peak when it exceeds it.
    ///
    /// Buffers already at or below the threshold (and payloads that are not
    /// whole 16-bit samples) are returned byte-for-byte, which makes the pass
    /// idempotent.
    pub fn safety_limit(&self, pcm_bytes: &[u8]) -> Vec<u8> {
        let samples = match pcm::decode(pcm_bytes) {
            Ok(samples) => samples,
            Err(_) => return pcm_bytes.to_vec(),
        };

        let limit = self.config.safety_peak;
        let peak = pcm::peak(&samples);
        if peak <= limit {
            return pcm_bytes.to_vec();
        }

        let scale = limit / peak;
        let limited: Vec<f32> = samples.iter().map(|s| s * scale).collect();
        pcm::encode(&limited)
    }

    fn apply(&self, stage: Stage, samples: &[f32]) -> Result<Vec<f32>, ConditionError> {
        let output = match stage {
            Stage::HighPass => {
                let hp = OnePoleHighPass::new(self.config.highpass_cutoff_hz, self.config.sample_rate)
                    .map_err(|source| ConditionError::Filter { stage, source })?;
                zero_phase(samples, |s| hp.process(s))
            }
            Stage::GainControl => automatic_gain_control(
                samples,
                self.config.agc_window,
                self.config.agc_target_level,
                self.config.agc_max_gain,
            ),
            Stage::BandPass => {
                let bp = BandPass::new(
                    self.config.bandpass_low_hz,
                    self.config.bandpass_high_hz,
                    self.config.sample_rate,
                )
                .map_err(|source| ConditionError::Filter { stage, source })?;
                zero_phase(samples, |s| bp.process(s))
            }
            Stage::Normalize => normalize_peak(samples, self.config.normalize_peak),
        };

        if output.iter().any(|s| !s.is_finite()) {
            return Err(ConditionError::NonFinite { stage });
        }
        Ok(output)
    }
}

/// Per-sample gain toward `target` from the RMS of a centered window.
///
/// Window sums come from a prefix sum of squares, so the whole pass is linear
/// in the buffer length. A silent window gets unit gain.
pub fn automatic_gain_control(samples: &[f32], window: usize, target: f32, max_gain: f32) -> Vec<f32> {
    let half = (window / 2).max(1);
    let mut prefix = Vec::with_capacity(samples.len() + 1);
    prefix.push(0.0f64);
    let mut acc = 0.0f64;
    for &s in samples {
        acc += (s as f64) * (s as f64);
        prefix.push(acc);
    }

    samples
        .iter()
        .enumerate()
        .map(|(i, &s)| {
            let start = i.saturating_sub(half);
            let end = (i + half).min(samples.len());
            let energy = (prefix[end] - prefix[start]).max(0.0);
            let rms = (energy / (end - start) as f64).sqrt() as f32;
            let gain = if rms > 0.0 {
                (target / rms).min(max_gain)
            } else {
                1.0
            };
            s * gain
        })
        .collect()
}

/// Scale so the largest magnitude equals `target`; silence is left alone.
pub fn normalize_peak(samples: &[f32], target: f32) -> Vec<f32> {
    let peak = pcm::peak(samples);
    if peak == 0.0 {
        return samples.to_vec();
    }
    let scale = target / peak;
    samples.iter().map(|s| s * scale).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn speech_like(len: usize) -> Vec<u8> {
        let samples: Vec<f32> = (0..len)
            .map(|i| {
                let t = i as f32 / 16_000.0;
                0.3 * (2.0 * std::f32::consts::PI * 440.0 * t).sin()
                    + 0.1 * (2.0 * std::f32::consts::PI * 1_800.0 * t).sin()
            })
            .collect();
        pcm::encode(&samples)
    }

    fn loud(len: usize, amplitude: f32) -> Vec<u8> {
        let samples: Vec<f32> = (0..len)
            .map(|i| amplitude * (i as f32 * 0.05).sin())
            .collect();
        pcm::encode(&samples)
    }

    fn max_magnitude(bytes: &[u8]) -> f32 {
        pcm::peak(&pcm::decode(bytes).unwrap())
    }

    #[test]
    fn test_normalization_caps_peak() {
        let conditioner = AudioConditioner::new(AudioConfig::default());
        let result = conditioner.condition(&speech_like(16_000));
        assert!(result.degradation.is_none());
        let peak = max_magnitude(&result.pcm);
        assert!(peak <= 0.8, "peak {} exceeds normalization target", peak);
        assert!(peak > 0.79);
    }

    #[test]
    fn test_silence_is_returned_unchanged() {
        let conditioner = AudioConditioner::new(AudioConfig::default());
        let silence = vec![0u8; 3_200];
        let result = conditioner.condition(&silence);
        assert!(result.degradation.is_none());
        assert_eq!(result.pcm, silence);
    }

    #[test]
    fn test_agc_gives_unit_gain_on_silence_and_clamps_gain() {
        let silent = vec![0.0f32; 64];
        assert_eq!(automatic_gain_control(&silent, 16, 0.7, 3.0), silent);

        let quiet = vec![0.01f32; 64];
        let boosted = automatic_gain_control(&quiet, 16, 0.7, 3.0);
        assert!(boosted.iter().all(|s| (s - 0.03).abs() < 1e-6));
    }

    #[test]
    fn test_stage_failure_returns_pre_failure_buffer() {
        let config = AudioConfig {
            highpass_enabled: false,
            agc_enabled: false,
            normalize_enabled: true,
            bandpass_low_hz: 4_000.0,
            bandpass_high_hz: 100.0,
            ..AudioConfig::default()
        };
        let conditioner = AudioConditioner::new(config);
        let input = speech_like(1_600);
        let result = conditioner.condition(&input);

        let degradation = result.degradation.clone().expect("band-pass should fail");
        assert_eq!(degradation.stage(), Some(Stage::BandPass));
        // Nothing ran before the failing stage, so the payload round-trips.
        let before = pcm::decode(&input).unwrap();
        let after = pcm::decode(&result.pcm).unwrap();
        assert_eq!(before.len(), after.len());
        for (a, b) in before.iter().zip(after.iter()) {
            assert!((a - b).abs() < 1e-3);
        }
    }

    #[test]
    fn test_undecodable_payload_is_forwarded_verbatim() {
        let conditioner = AudioConditioner::new(AudioConfig::default());
        let result = conditioner.condition(&[1, 2, 3]);
        assert_eq!(result.pcm, vec![1, 2, 3]);
        assert!(matches!(result.degradation, Some(ConditionError::Decode(_))));
    }

    #[test]
    fn test_safety_limit_caps_and_is_idempotent() {
        let conditioner = AudioConditioner::new(AudioConfig::default());
        let hot = loud(2_000, 1.0);
        let once = conditioner.safety_limit(&hot);
        assert!(max_magnitude(&once) <= 0.95);
        assert!(max_magnitude(&once) > 0.94);

        let twice = conditioner.safety_limit(&once);
        assert_eq!(once, twice);
    }

    #[test]
    fn test_safety_limit_leaves_quiet_audio_untouched() {
        let conditioner = AudioConditioner::new(AudioConfig::default());
        let quiet = loud(2_000, 0.5);
        assert_eq!(conditioner.safety_limit(&quiet), quiet);
    }
}
