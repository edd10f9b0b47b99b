//! Sample formats, volumes and conversion.
//!
//! This module provides:
//! - Sample specs and encodings ([`SampleSpec`], [`SampleFormat`])
//! - Per-channel gain ([`Volume`]) and mixing helpers
//! - Encoding conversion, including G.711 A-law / µ-law
//! - Spec-to-spec conversion ([`Resampler`])

mod convert;
mod resample;
mod spec;
mod volume;

pub use convert::{
    alaw_to_linear, decode_into, decode_sample, encode_into, encode_sample, encode_to_vec,
    f32_to_i16, i16_to_f32, linear_to_alaw, linear_to_ulaw, remix_into, ulaw_to_linear,
};
pub use resample::{resample, Resampler};
pub use spec::{SampleFormat, SampleSpec, CHANNELS_MAX, RATE_MAX};
pub use volume::{apply_volume, mix_into, Volume};
