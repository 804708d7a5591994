//! # Audio Module
//!
//! Everything the relay does to raw sample data before and after the
//! translation engine sees it.
//!
//! ## Audio Format Requirements:
//! - **Sample Rate**: 16kHz by default (configurable)
//! - **Bit Depth**: 16-bit PCM
//! - **Channels**: Mono
//! - **Encoding**: Little-endian signed integers, base64 on the wire

pub mod conditioner; // Conditioning pipeline and safety limiter
pub mod filters;     // High-pass / band-pass IIR sections
pub mod pcm;         // Wire format conversion

pub use conditioner::{AudioConditioner, ConditionError, Conditioned};
