//! Sample rate, channel and encoding conversion between two sample specs.
//!
//! Rate conversion uses linear interpolation, which is fast but may introduce
//! artifacts for large rate changes.

use super::convert::{decode_into, encode_into, remix_into};
use super::SampleSpec;
use crate::chunk::AudioChunk;
use crate::state::EndpointFlags;
use crate::CoreError;

/// Resamples interleaved frames from one rate to another into `out`.
///
/// The output holds `ceil(frames * to_rate / from_rate)` frames. Positions
/// past the last input frame repeat the last frame.
pub fn resample(samples: &[f32], channels: usize, from_rate: u32, to_rate: u32, out: &mut Vec<f32>) {
    out.clear();
    if from_rate == to_rate || samples.is_empty() || channels == 0 {
        out.extend_from_slice(samples);
        return;
    }

    let frames_in = samples.len() / channels;
    if frames_in == 0 {
        return;
    }
    let frames_out = output_frames(frames_in, from_rate, to_rate);
    let step = f64::from(from_rate) / f64::from(to_rate);

    for i in 0..frames_out {
        let src_pos = i as f64 * step;
        let src_idx = (src_pos.floor() as usize).min(frames_in - 1);
        let frac = (src_pos - src_idx as f64) as f32;

        for c in 0..channels {
            let s1 = samples[src_idx * channels + c];
            let sample = if src_idx + 1 < frames_in {
                // Linear interpolation between two frames
                let s2 = samples[(src_idx + 1) * channels + c];
                s1 + (s2 - s1) * frac
            } else {
                s1
            };
            out.push(sample);
        }
    }
}

fn output_frames(frames_in: usize, from_rate: u32, to_rate: u32) -> usize {
    let from = u64::from(from_rate.max(1));
    ((frames_in as u64 * u64::from(to_rate) + from - 1) / from) as usize
}

/// Converts chunks from one sample spec to another.
///
/// Holds scratch buffers that are reused between calls.
#[derive(Debug)]
pub struct Resampler {
    from: SampleSpec,
    to: SampleSpec,
    decoded: Vec<f32>,
    remixed: Vec<f32>,
    resampled: Vec<f32>,
}

impl Resampler {
    /// Creates a resampler, honouring the endpoint's conversion flags.
    pub fn new(from: SampleSpec, to: SampleSpec, flags: EndpointFlags) -> Result<Self, CoreError> {
        Self::check(&from, &to, flags)?;
        Ok(Self {
            from,
            to,
            decoded: Vec::new(),
            remixed: Vec::new(),
            resampled: Vec::new(),
        })
    }

    /// Returns a resampler only if the specs differ.
    pub fn between(
        from: SampleSpec,
        to: SampleSpec,
        flags: EndpointFlags,
    ) -> Result<Option<Self>, CoreError> {
        if from == to {
            Ok(None)
        } else {
            Self::new(from, to, flags).map(Some)
        }
    }

    /// Fails with [`CoreError::IncompatibleFormat`] if converting `from` into
    /// `to` needs a step that `flags` forbid.
    pub fn check(from: &SampleSpec, to: &SampleSpec, flags: EndpointFlags) -> Result<(), CoreError> {
        let remix = from.channels != to.channels && flags.contains(EndpointFlags::NO_REMIX);
        let rate = from.rate != to.rate && flags.contains(EndpointFlags::NO_RESAMPLE);
        if remix || rate {
            return Err(CoreError::IncompatibleFormat {
                stream: from.to_string(),
                device: to.to_string(),
            });
        }
        Ok(())
    }

    /// Input spec.
    pub fn from_spec(&self) -> &SampleSpec {
        &self.from
    }

    /// Output spec.
    pub fn to_spec(&self) -> &SampleSpec {
        &self.to
    }

    /// Input bytes needed to produce at least `out_bytes` output bytes.
    ///
    /// Never less than one input frame.
    pub fn request(&self, out_bytes: usize) -> usize {
        let frames_out = (out_bytes / self.to.frame_size()) as u64;
        let to = u64::from(self.to.rate);
        let frames_in = (frames_out * u64::from(self.from.rate) + to - 1) / to;
        frames_in.max(1) as usize * self.from.frame_size()
    }

    /// Output bytes produced from `in_bytes` input bytes.
    pub fn result(&self, in_bytes: usize) -> usize {
        let frames_in = in_bytes / self.from.frame_size();
        output_frames(frames_in, self.from.rate, self.to.rate) * self.to.frame_size()
    }

    /// Converts one chunk. The output is a newly allocated block.
    pub fn run(&mut self, chunk: &AudioChunk) -> AudioChunk {
        if self.from == self.to {
            return chunk.clone();
        }
        decode_into(self.from.format, chunk.bytes(), &mut self.decoded);
        remix_into(
            &self.decoded,
            usize::from(self.from.channels),
            usize::from(self.to.channels),
            &mut self.remixed,
        );
        resample(
            &self.remixed,
            usize::from(self.to.channels),
            self.from.rate,
            self.to.rate,
            &mut self.resampled,
        );
        let mut bytes = vec![0u8; self.resampled.len() * self.to.format.sample_size()];
        encode_into(self.to.format, &self.resampled, &mut bytes);
        AudioChunk::new(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::SampleFormat;

    fn run(samples: &[f32], channels: usize, from: u32, to: u32) -> Vec<f32> {
        let mut out = Vec::new();
        resample(samples, channels, from, to, &mut out);
        out
    }

    #[test]
    fn test_resample_same_rate() {
        let samples = vec![0.1f32, 0.2, 0.3];
        assert_eq!(run(&samples, 1, 16000, 16000), samples);
    }

    #[test]
    fn test_resample_empty() {
        assert!(run(&[], 1, 16000, 8000).is_empty());
    }

    #[test]
    fn test_resample_downsample() {
        // 48kHz to 16kHz = 3:1 ratio
        let samples: Vec<f32> = (0..480).map(|i| i as f32 / 480.0).collect();
        assert_eq!(run(&samples, 1, 48000, 16000).len(), 160);
    }

    #[test]
    fn test_resample_upsample() {
        let samples = vec![0.0f32, 0.1, 0.2, 0.3];
        let resampled = run(&samples, 1, 16000, 48000);
        assert_eq!(resampled.len(), 12);
        assert_eq!(resampled[0], 0.0);
    }

    #[test]
    fn test_resample_interpolation() {
        let resampled = run(&[0.0, 1.0], 1, 1, 2);
        assert_eq!(resampled.len(), 4);
        assert!((resampled[1] - 0.5).abs() < 1e-6);
        // beyond the input the last frame repeats
        assert_eq!(resampled[3], 1.0);
    }

    #[test]
    fn test_resample_stereo_keeps_channels_apart() {
        let samples = vec![0.0f32, 1.0, 0.5, 1.0];
        let resampled = run(&samples, 2, 1, 2);
        assert_eq!(resampled.len(), 8);
        assert!((resampled[2] - 0.25).abs() < 1e-6);
        assert!((resampled[3] - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_resample_precision_boundary() {
        let samples = vec![0.0f32, 0.1, 0.2, 0.3];
        let result = run(&samples, 1, 1, 2);
        assert_eq!(result[0], 0.0);
        assert!((result[2] - 0.1).abs() < 1e-6);
        assert!((result[4] - 0.2).abs() < 1e-6);
        assert!((result[6] - 0.3).abs() < 1e-6);
    }

    #[test]
    fn test_resampler_converts_format_channels_and_rate() {
        let from = SampleSpec::new(SampleFormat::S16Le, 8000, 1).unwrap();
        let to = SampleSpec::new(SampleFormat::F32Le, 16000, 2).unwrap();
        let mut resampler = Resampler::new(from, to, EndpointFlags::empty()).unwrap();

        let input: Vec<u8> = [16384i16, 16384].iter().flat_map(|s| s.to_le_bytes()).collect();
        let output = resampler.run(&AudioChunk::new(input));

        assert_eq!(output.len(), resampler.result(4));
        assert_eq!(output.len(), 4 * 8);
        let first = f32::from_le_bytes(output.bytes()[..4].try_into().unwrap());
        assert!((first - 0.5).abs() < 1e-3);
    }

    #[test]
    fn test_request_and_result() {
        let from = SampleSpec::new(SampleFormat::S16Le, 44100, 2).unwrap();
        let to = SampleSpec::new(SampleFormat::S16Le, 48000, 2).unwrap();
        let resampler = Resampler::new(from, to, EndpointFlags::empty()).unwrap();
        assert_eq!(resampler.request(480 * 4), 441 * 4);
        assert_eq!(resampler.result(441 * 4), 480 * 4);
        assert_eq!(resampler.request(0), 4);
    }

    #[test]
    fn test_flags_reject_conversion() {
        let stereo = SampleSpec::new(SampleFormat::S16Le, 44100, 2).unwrap();
        let mono = SampleSpec::new(SampleFormat::S16Le, 44100, 1).unwrap();
        let fast = SampleSpec::new(SampleFormat::S16Le, 48000, 2).unwrap();

        assert!(matches!(
            Resampler::new(stereo, mono, EndpointFlags::NO_REMIX),
            Err(CoreError::IncompatibleFormat { .. })
        ));
        assert!(Resampler::new(stereo, fast, EndpointFlags::NO_REMIX).is_ok());
        assert!(Resampler::new(stereo, fast, EndpointFlags::NO_RESAMPLE).is_err());
        assert!(Resampler::between(stereo, stereo, EndpointFlags::all())
            .unwrap()
            .is_none());
    }
}
