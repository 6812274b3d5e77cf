//! # Audio Module
//!
//! Converts uploaded audio files into model input.
//!
//! ## Audio Format Requirements (model side):
//! - **Sample Rate**: 16kHz
//! - **Channels**: Mono
//! - **Samples**: 32-bit float in `[-1.0, 1.0]`
//!
//! Input files may be any container/codec symphonia understands; the decoder
//! downmixes and resamples as needed.

pub mod decoder;

pub use decoder::decode_file;
