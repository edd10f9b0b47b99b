//! Per-channel volume and mixing primitives.

use super::spec::CHANNELS_MAX;
use crate::CoreError;

/// Linear per-channel gain.
///
/// Stored inline with a fixed capacity of [`CHANNELS_MAX`] so it can be copied
/// into messages and applied on the IO path without allocating.
///
/// # Example
///
/// ```
/// use stream_core::Volume;
///
/// let volume = Volume::uniform(2, 0.5);
/// assert_eq!(volume.get(1), 0.5);
/// assert!(!volume.is_norm());
/// ```
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Volume {
    channels: u8,
    values: [f32; CHANNELS_MAX],
}

impl Volume {
    /// Unity gain.
    pub const NORM: f32 = 1.0;
    /// Silence.
    pub const MUTED: f32 = 0.0;

    /// Unity gain on every channel.
    pub fn norm(channels: u8) -> Self {
        Self::uniform(channels, Self::NORM)
    }

    /// Zero gain on every channel.
    pub fn muted(channels: u8) -> Self {
        Self::uniform(channels, Self::MUTED)
    }

    /// The same gain on every channel. Negative gains are clamped to zero.
    pub fn uniform(channels: u8, gain: f32) -> Self {
        let channels = channels.clamp(1, CHANNELS_MAX as u8);
        Self {
            channels,
            values: [gain.max(0.0); CHANNELS_MAX],
        }
    }

    /// Builds a volume from explicit per-channel gains.
    pub fn from_gains(gains: &[f32]) -> Result<Self, CoreError> {
        if gains.is_empty() || gains.len() > CHANNELS_MAX {
            return Err(CoreError::InvalidVolume {
                expected: CHANNELS_MAX as u8,
                got: gains.len().min(usize::from(u8::MAX)) as u8,
            });
        }
        let mut values = [Self::NORM; CHANNELS_MAX];
        for (slot, gain) in values.iter_mut().zip(gains) {
            *slot = gain.max(0.0);
        }
        Ok(Self {
            channels: gains.len() as u8,
            values,
        })
    }

    /// Number of channels.
    pub fn channels(&self) -> u8 {
        self.channels
    }

    /// Gain of channel `channel`, or unity if out of range.
    pub fn get(&self, channel: usize) -> f32 {
        if channel < usize::from(self.channels) {
            self.values[channel]
        } else {
            Self::NORM
        }
    }

    /// The active gains.
    pub fn gains(&self) -> &[f32] {
        &self.values[..usize::from(self.channels)]
    }

    /// Average gain over all channels.
    pub fn average(&self) -> f32 {
        self.gains().iter().sum::<f32>() / f32::from(self.channels)
    }

    /// Returns `true` if every channel is at unity gain.
    pub fn is_norm(&self) -> bool {
        self.gains().iter().all(|&g| (g - Self::NORM).abs() < f32::EPSILON)
    }

    /// Returns `true` if every channel is silent.
    pub fn is_muted(&self) -> bool {
        self.gains().iter().all(|&g| g <= Self::MUTED)
    }

    /// Maps this volume onto a different channel count.
    ///
    /// Identical counts are returned unchanged; otherwise every output channel
    /// gets the average gain.
    #[must_use]
    pub fn remap(&self, channels: u8) -> Self {
        if channels == self.channels {
            *self
        } else {
            Self::uniform(channels, self.average())
        }
    }

    /// Channel-wise product, remapping `other` if the channel counts differ.
    #[must_use]
    pub fn multiply(&self, other: &Volume) -> Self {
        let other = other.remap(self.channels);
        let mut out = *self;
        for (gain, factor) in out.values.iter_mut().zip(other.gains()) {
            *gain *= factor;
        }
        out
    }
}

/// Multiplies interleaved samples by `volume` in place.
pub fn apply_volume(samples: &mut [f32], volume: &Volume) {
    let channels = usize::from(volume.channels());
    for frame in samples.chunks_mut(channels) {
        for (sample, gain) in frame.iter_mut().zip(volume.gains()) {
            *sample *= gain;
        }
    }
}

/// Adds `input * volume` onto `acc`, sample by sample.
pub fn mix_into(acc: &mut [f32], input: &[f32], volume: &Volume) {
    let channels = usize::from(volume.channels());
    for (acc_frame, in_frame) in acc.chunks_mut(channels).zip(input.chunks(channels)) {
        for ((out, sample), gain) in acc_frame.iter_mut().zip(in_frame).zip(volume.gains()) {
            *out += sample * gain;
        }
    }
}
