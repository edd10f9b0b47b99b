//! Sample formats and sample specs.

use std::fmt;
use std::time::Duration;

use crate::CoreError;

/// Maximum number of channels in a sample spec or volume.
pub const CHANNELS_MAX: usize = 32;

/// Highest accepted sample rate in Hz.
pub const RATE_MAX: u32 = 48_000 * 8;

/// Encoding of a single sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SampleFormat {
    /// Unsigned 8-bit PCM, silence at 0x80.
    U8,
    /// 8-bit G.711 A-law.
    ALaw,
    /// 8-bit G.711 µ-law.
    ULaw,
    /// Signed 16-bit PCM, little endian.
    S16Le,
    /// Signed 16-bit PCM, big endian.
    S16Be,
    /// Signed 32-bit PCM, little endian.
    S32Le,
    /// Signed 32-bit PCM, big endian.
    S32Be,
    /// 32-bit IEEE float in [-1.0, 1.0], little endian.
    F32Le,
    /// 32-bit IEEE float in [-1.0, 1.0], big endian.
    F32Be,
}

impl SampleFormat {
    /// Signed 16-bit PCM in native byte order.
    #[cfg(target_endian = "little")]
    pub const S16NE: Self = Self::S16Le;
    /// Signed 16-bit PCM in native byte order.
    #[cfg(target_endian = "big")]
    pub const S16NE: Self = Self::S16Be;
    /// Signed 32-bit PCM in native byte order.
    #[cfg(target_endian = "little")]
    pub const S32NE: Self = Self::S32Le;
    /// Signed 32-bit PCM in native byte order.
    #[cfg(target_endian = "big")]
    pub const S32NE: Self = Self::S32Be;
    /// 32-bit float in native byte order.
    #[cfg(target_endian = "little")]
    pub const F32NE: Self = Self::F32Le;
    /// 32-bit float in native byte order.
    #[cfg(target_endian = "big")]
    pub const F32NE: Self = Self::F32Be;

    /// Size of one sample in bytes.
    #[must_use]
    pub fn sample_size(self) -> usize {
        match self {
            Self::U8 | Self::ALaw | Self::ULaw => 1,
            Self::S16Le | Self::S16Be => 2,
            Self::S32Le | Self::S32Be | Self::F32Le | Self::F32Be => 4,
        }
    }

    /// Byte value that encodes silence.
    #[must_use]
    pub fn silence_byte(self) -> u8 {
        match self {
            Self::U8 => 0x80,
            Self::ALaw => 0xd5,
            Self::ULaw => 0xff,
            _ => 0,
        }
    }
}

impl fmt::Display for SampleFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::U8 => "u8",
            Self::ALaw => "aLaw",
            Self::ULaw => "uLaw",
            Self::S16Le => "s16le",
            Self::S16Be => "s16be",
            Self::S32Le => "s32le",
            Self::S32Be => "s32be",
            Self::F32Le => "float32le",
            Self::F32Be => "float32be",
        };
        f.write_str(name)
    }
}

/// Format, rate and channel count of a PCM stream.
///
/// # Example
///
/// ```
/// use stream_core::{SampleFormat, SampleSpec};
/// use std::time::Duration;
///
/// let spec = SampleSpec::new(SampleFormat::S16Le, 44100, 2).unwrap();
/// assert_eq!(spec.frame_size(), 4);
/// assert_eq!(spec.duration_to_bytes(Duration::from_millis(10)), 1764);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SampleSpec {
    /// Sample encoding.
    pub format: SampleFormat,
    /// Frames per second.
    pub rate: u32,
    /// Interleaved channels per frame.
    pub channels: u8,
}

impl SampleSpec {
    /// Creates a validated sample spec.
    pub fn new(format: SampleFormat, rate: u32, channels: u8) -> Result<Self, CoreError> {
        let spec = Self {
            format,
            rate,
            channels,
        };
        spec.validate()?;
        Ok(spec)
    }

    /// Returns `true` if rate and channel count are within range.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.rate > 0
            && self.rate <= RATE_MAX
            && self.channels > 0
            && usize::from(self.channels) <= CHANNELS_MAX
    }

    /// Fails with [`CoreError::InvalidSampleSpec`] unless [`is_valid`](Self::is_valid).
    pub fn validate(&self) -> Result<(), CoreError> {
        if self.is_valid() {
            Ok(())
        } else {
            Err(CoreError::InvalidSampleSpec {
                rate: self.rate,
                channels: self.channels,
            })
        }
    }

    /// Size of one frame (one sample per channel) in bytes.
    #[must_use]
    pub fn frame_size(&self) -> usize {
        self.format.sample_size() * usize::from(self.channels)
    }

    /// Bytes of audio per second.
    #[must_use]
    pub fn bytes_per_second(&self) -> usize {
        self.frame_size() * self.rate as usize
    }

    /// Playback time of `bytes` bytes (partial frames are ignored).
    #[must_use]
    pub fn bytes_to_duration(&self, bytes: usize) -> Duration {
        if self.rate == 0 || self.frame_size() == 0 {
            return Duration::ZERO;
        }
        let frames = (bytes / self.frame_size()) as u64;
        Duration::from_nanos(frames * 1_000_000_000 / u64::from(self.rate))
    }

    /// Number of bytes covering `duration`, rounded down to a whole frame.
    #[must_use]
    pub fn duration_to_bytes(&self, duration: Duration) -> usize {
        let frames = duration.as_nanos() * u128::from(self.rate) / 1_000_000_000;
        frames as usize * self.frame_size()
    }

    /// Rounds `bytes` down to a whole number of frames.
    #[must_use]
    pub fn frame_align(&self, bytes: usize) -> usize {
        let frame = self.frame_size().max(1);
        bytes - bytes % frame
    }

    /// Converts a byte count of this spec into the byte count covering the
    /// same number of frames (scaled by rate) in `other`.
    #[must_use]
    pub fn convert_bytes(&self, bytes: usize, other: &SampleSpec) -> usize {
        if self == other {
            return bytes;
        }
        let frames = (bytes / self.frame_size().max(1)) as u64;
        let frames = frames * u64::from(other.rate) / u64::from(self.rate.max(1));
        frames as usize * other.frame_size()
    }
}

impl fmt::Display for SampleSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}ch {}Hz", self.format, self.channels, self.rate)
    }
}

impl Default for SampleSpec {
    fn default() -> Self {
        Self {
            format: SampleFormat::S16NE,
            rate: 44100,
            channels: 2,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_size() {
        let spec = SampleSpec::new(SampleFormat::F32Le, 48000, 2).unwrap();
        assert_eq!(spec.frame_size(), 8);
        assert_eq!(spec.bytes_per_second(), 384_000);

        let spec = SampleSpec::new(SampleFormat::ULaw, 8000, 1).unwrap();
        assert_eq!(spec.frame_size(), 1);
    }

    #[test]
    fn test_validation() {
        assert!(SampleSpec::new(SampleFormat::S16Le, 0, 2).is_err());
        assert!(SampleSpec::new(SampleFormat::S16Le, 44100, 0).is_err());
        assert!(SampleSpec::new(SampleFormat::S16Le, 44100, 33).is_err());
        assert!(SampleSpec::new(SampleFormat::S16Le, RATE_MAX + 1, 2).is_err());
        assert!(SampleSpec::new(SampleFormat::S16Le, RATE_MAX, 32).is_ok());
    }

    #[test]
    fn test_duration_conversion() {
        let spec = SampleSpec::new(SampleFormat::S16Le, 16000, 1).unwrap();
        assert_eq!(spec.duration_to_bytes(Duration::from_millis(100)), 3200);
        assert_eq!(spec.bytes_to_duration(3200), Duration::from_millis(100));
        // partial frame ignored
        assert_eq!(spec.bytes_to_duration(3201), Duration::from_millis(100));
    }

    #[test]
    fn test_frame_align() {
        let spec = SampleSpec::default();
        assert_eq!(spec.frame_align(4097), 4096);
        assert_eq!(spec.frame_align(3), 0);
    }

    #[test]
    fn test_convert_bytes_across_specs() {
        let from = SampleSpec::new(SampleFormat::S16Le, 48000, 2).unwrap();
        let to = SampleSpec::new(SampleFormat::F32Le, 16000, 1).unwrap();
        // 480 frames at 48kHz -> 160 frames at 16kHz, 4 bytes each
        assert_eq!(from.convert_bytes(1920, &to), 640);
        assert_eq!(from.convert_bytes(1920, &from), 1920);
    }

    #[test]
    fn test_silence_bytes() {
        assert_eq!(SampleFormat::U8.silence_byte(), 0x80);
        assert_eq!(SampleFormat::ALaw.silence_byte(), 0xd5);
        assert_eq!(SampleFormat::ULaw.silence_byte(), 0xff);
        assert_eq!(SampleFormat::S16Le.silence_byte(), 0);
    }

    #[test]
    fn test_display() {
        let spec = SampleSpec::new(SampleFormat::S16Le, 44100, 2).unwrap();
        assert_eq!(spec.to_string(), "s16le 2ch 44100Hz");
    }
}
