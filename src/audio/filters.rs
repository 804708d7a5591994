//! # Speech-Band Filters
//!
//! Small IIR building blocks for the conditioning pipeline:
//! - [`OnePoleHighPass`]: first-order RC high-pass used to strip rumble and DC
//! - [`Biquad`]: second-order section (RBJ cookbook coefficients)
//! - [`BandPass`]: a high-pass biquad followed by an optional low-pass biquad
//!
//! All filters run forward then backward ([`zero_phase`]) so speech
//! transients are not smeared in time.

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum FilterError {
    #[error("cutoff {cutoff_hz} Hz is outside (0, {nyquist_hz}) for this sample rate")]
    CutoffOutOfRange { cutoff_hz: f32, nyquist_hz: f32 },

    #[error("band edges are inverted: low {low_hz} Hz >= high {high_hz} Hz")]
    InvertedBand { low_hz: f32, high_hz: f32 },

    #[error("sample rate must be greater than zero")]
    ZeroSampleRate,
}

fn nyquist(sample_rate: u32) -> Result<f32, FilterError> {
    if sample_rate == 0 {
        return Err(FilterError::ZeroSampleRate);
    }
    Ok(sample_rate as f32 / 2.0)
}

fn check_cutoff(cutoff_hz: f32, sample_rate: u32) -> Result<(), FilterError> {
    let nyquist_hz = nyquist(sample_rate)?;
    if !(cutoff_hz > 0.0 && cutoff_hz < nyquist_hz) {
        return Err(FilterError::CutoffOutOfRange { cutoff_hz, nyquist_hz });
    }
    Ok(())
}

/// Run `filter` forward, then over the reversed output, and restore order.
///
/// This cancels the phase shift of a causal IIR filter and squares its
/// magnitude response.
pub fn zero_phase<F>(samples: &[f32], filter: F) -> Vec<f32>
where
    F: Fn(&[f32]) -> Vec<f32>,
{
    let mut forward = filter(samples);
    forward.reverse();
    let mut backward = filter(&forward);
    backward.reverse();
    backward
}

/// First-order RC high-pass filter.
#[derive(Debug, Clone, Copy)]
pub struct OnePoleHighPass {
    alpha: f32,
}

impl OnePoleHighPass {
    pub fn new(cutoff_hz: f32, sample_rate: u32) -> Result<Self, FilterError> {
        check_cutoff(cutoff_hz, sample_rate)?;
        let rc = 1.0 / (2.0 * std::f32::consts::PI * cutoff_hz);
        let dt = 1.0 / sample_rate as f32;
        Ok(Self { alpha: rc / (rc + dt) })
    }

    /// `y[n] = α · (y[n-1] + x[n] - x[n-1])`, starting from rest at `x[0]`.
    pub fn process(&self, samples: &[f32]) -> Vec<f32> {
        let mut output = Vec::with_capacity(samples.len());
        let mut prev_in = samples.first().copied().unwrap_or(0.0);
        let mut prev_out = 0.0f32;
        for &x in samples {
            let y = self.alpha * (prev_out + x - prev_in);
            output.push(y);
            prev_in = x;
            prev_out = y;
        }
        output
    }
}

/// Normalised second-order IIR section (`a0 == 1`).
#[derive(Debug, Clone, Copy)]
pub struct Biquad {
    b0: f32,
    b1: f32,
    b2: f32,
    a1: f32,
    a2: f32,
}

/// Butterworth quality factor for a single second-order section.
const BUTTERWORTH_Q: f32 = std::f32::consts::FRAC_1_SQRT_2;

impl Biquad {
    pub fn high_pass(cutoff_hz: f32, sample_rate: u32) -> Result<Self, FilterError> {
        check_cutoff(cutoff_hz, sample_rate)?;
        let (cos_w, alpha) = Self::prewarp(cutoff_hz, sample_rate);
        let a0 = 1.0 + alpha;
        Ok(Self {
            b0: (1.0 + cos_w) / 2.0 / a0,
            b1: -(1.0 + cos_w) / a0,
            b2: (1.0 + cos_w) / 2.0 / a0,
            a1: -2.0 * cos_w / a0,
            a2: (1.0 - alpha) / a0,
        })
    }

    pub fn low_pass(cutoff_hz: f32, sample_rate: u32) -> Result<Self, FilterError> {
        check_cutoff(cutoff_hz, sample_rate)?;
        let (cos_w, alpha) = Self::prewarp(cutoff_hz, sample_rate);
        let a0 = 1.0 + alpha;
        Ok(Self {
            b0: (1.0 - cos_w) / 2.0 / a0,
            b1: (1.0 - cos_w) / a0,
            b2: (1.0 - cos_w) / 2.0 / a0,
            a1: -2.0 * cos_w / a0,
            a2: (1.0 - alpha) / a0,
        })
    }

    fn prewarp(cutoff_hz: f32, sample_rate: u32) -> (f32, f32) {
        let w0 = 2.0 * std::f32::consts::PI * cutoff_hz / sample_rate as f32;
        (w0.cos(), w0.sin() / (2.0 * BUTTERWORTH_Q))
    }

    /// Direct form I, zero initial state.
    pub fn process(&self, samples: &[f32]) -> Vec<f32> {
        let (mut x1, mut x2, mut y1, mut y2) = (0.0f32, 0.0f32, 0.0f32, 0.0f32);
        samples
            .iter()
            .map(|&x| {
                let y = self.b0 * x + self.b1 * x1 + self.b2 * x2 - self.a1 * y1 - self.a2 * y2;
                x2 = x1;
                x1 = x;
                y2 = y1;
                y1 = y;
                y
            })
            .collect()
    }
}

/// Speech band-pass: high-pass at `low_hz`, low-pass at `high_hz`.
///
/// When `high_hz` reaches Nyquist the low-pass section is dropped, since the
/// sample rate already bounds the band from above.
#[derive(Debug, Clone, Copy)]
pub struct BandPass {
    high_pass: Biquad,
    low_pass: Option<Biquad>,
}

impl BandPass {
    pub fn new(low_hz: f32, high_hz: f32, sample_rate: u32) -> Result<Self, FilterError> {
        if low_hz >= high_hz {
            return Err(FilterError::InvertedBand { low_hz, high_hz });
        }
        let nyquist_hz = nyquist(sample_rate)?;
        let high_pass = Biquad::high_pass(low_hz, sample_rate)?;
        let low_pass = if high_hz < nyquist_hz {
            Some(Biquad::low_pass(high_hz, sample_rate)?)
        } else {
            None
        };
        Ok(Self { high_pass, low_pass })
    }

    pub fn has_low_pass(&self) -> bool {
        self.low_pass.is_some()
    }

    pub fn process(&self, samples: &[f32]) -> Vec<f32> {
        let filtered = self.high_pass.process(samples);
        match &self.low_pass {
            Some(low_pass) => low_pass.process(&filtered),
            None => filtered,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sine(freq_hz: f32, sample_rate: u32, len: usize, amplitude: f32) -> Vec<f32> {
        (0..len)
            .map(|i| {
                amplitude
                    * (2.0 * std::f32::consts::PI * freq_hz * i as f32 / sample_rate as f32).sin()
            })
            .collect()
    }

    fn rms(samples: &[f32]) -> f32 {
        (samples.iter().map(|s| s * s).sum::<f32>() / samples.len() as f32).sqrt()
    }

    #[test]
    fn test_high_pass_removes_dc_offset() {
        let hp = OnePoleHighPass::new(80.0, 16_000).unwrap();
        let input = vec![0.5f32; 4_000];
        let output = zero_phase(&input, |s| hp.process(s));
        let tail = &output[1_000..3_000];
        assert!(tail.iter().all(|s| s.abs() < 1e-3), "DC should be filtered out");
    }

    #[test]
    fn test_high_pass_keeps_speech_frequencies() {
        let hp = OnePoleHighPass::new(80.0, 16_000).unwrap();
        let input = sine(1_000.0, 16_000, 8_000, 0.5);
        let output = zero_phase(&input, |s| hp.process(s));
        let ratio = rms(&output[2_000..6_000]) / rms(&input[2_000..6_000]);
        assert!(ratio > 0.95, "1 kHz passband attenuated to {}", ratio);
    }

    #[test]
    fn test_band_pass_attenuates_out_of_band_tone() {
        let bp = BandPass::new(80.0, 4_000.0, 16_000).unwrap();
        assert!(bp.has_low_pass());
        let input = sine(7_000.0, 16_000, 8_000, 0.5);
        let output = zero_phase(&input, |s| bp.process(s));
        assert!(rms(&output[2_000..6_000]) < 0.1 * rms(&input[2_000..6_000]));
    }

    #[test]
    fn test_band_pass_skips_low_pass_at_nyquist() {
        let bp = BandPass::new(80.0, 8_000.0, 16_000).unwrap();
        assert!(!bp.has_low_pass());
    }

    #[test]
    fn test_invalid_designs_are_rejected() {
        assert!(matches!(
            OnePoleHighPass::new(9_000.0, 16_000),
            Err(FilterError::CutoffOutOfRange { .. })
        ));
        assert!(matches!(
            BandPass::new(4_000.0, 80.0, 16_000),
            Err(FilterError::InvertedBand { .. })
        ));
        assert_eq!(
            Biquad::low_pass(100.0, 0).unwrap_err(),
            FilterError::ZeroSampleRate
        );
    }
}
