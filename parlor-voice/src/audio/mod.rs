//! Audio payload handling
//!
//! Decoding of synthesized audio payloads into stereo PCM.

pub mod decode;

pub use decode::{decode_payload, sniff_format, AudioFormat, DecodedAudio};
