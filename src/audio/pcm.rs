//! # PCM Wire Format
//!
//! Conversion between the wire representation (16-bit signed little-endian
//! mono PCM) and the `f32` working buffers used by the conditioning stages.

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::io::Cursor;
use thiserror::Error;

/// Full-scale multiplier used when writing samples back to the wire.
const WRITE_SCALE: f32 = 32767.0;

/// Divisor used when reading samples off the wire.
const READ_SCALE: f32 = 32768.0;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum PcmError {
    #[error("PCM payload has odd length {0}; expected whole 16-bit samples")]
    OddLength(usize),
}

/// Decode little-endian 16-bit PCM into samples in `[-1.0, 1.0)`.
pub fn decode(bytes: &[u8]) -> Result<Vec<f32>, PcmError> {
    if bytes.len() % 2 != 0 {
        return Err(PcmError::OddLength(bytes.len()));
    }

    let mut cursor = Cursor::new(bytes);
    let mut samples = Vec::with_capacity(bytes.len() / 2);
    while let Ok(sample) = cursor.read_i16::<LittleEndian>() {
        samples.push(sample as f32 / READ_SCALE);
    }
    Ok(samples)
}

/// Encode samples back to little-endian 16-bit PCM, clipping to the valid range.
pub fn encode(samples: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(samples.len() * 2);
    for &sample in samples {
        let scaled = (sample * WRITE_SCALE).clamp(-32768.0, 32767.0) as i16;
        // Writing into a Vec cannot fail.
        let _ = bytes.write_i16::<LittleEndian>(scaled);
    }
    bytes
}

/// Largest absolute sample value in the buffer, `0.0` for an empty buffer.
pub fn peak(samples: &[f32]) -> f32 {
    samples.iter().fold(0.0f32, |max, s| max.max(s.abs()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_rejects_partial_sample() {
        assert_eq!(decode(&[0u8; 3]), Err(PcmError::OddLength(3)));
    }

    #[test]
    fn test_encode_clips_out_of_range_samples() {
        let bytes = encode(&[2.0, -2.0, 0.0]);
        let back: Vec<i16> = bytes
            .chunks_exact(2)
            .map(|c| i16::from_le_bytes([c[0], c[1]]))
            .collect();
        assert_eq!(back, vec![32767, -32768, 0]);
    }

    #[test]
    fn test_conversion_accuracy() {
        let original = vec![0i16, 16384, -16384, 32767, -32768];
        let bytes: Vec<u8> = original.iter().flat_map(|s| s.to_le_bytes()).collect();
        let samples = decode(&bytes).unwrap();
        let converted: Vec<i16> = encode(&samples)
            .chunks_exact(2)
            .map(|c| i16::from_le_bytes([c[0], c[1]]))
            .collect();

        for (a, b) in original.iter().zip(converted.iter()) {
            assert!((*a as i32 - *b as i32).abs() <= 1, "{} vs {}", a, b);
        }
    }
}
