//! Audio format conversion utilities.
//!
//! - Sample format conversion (f32 ↔ i16) for devices and WAV files
//! - Channel adaptation of playback data (mono ↔ multichannel)

mod convert;

pub use convert::{adapt_channels, downmix_to_mono, f32_to_i16, i16_to_f32, upmix_mono};
