//! Sample format conversion.
//!
//! Every format is decoded to and encoded from `f32` in [-1.0, 1.0]; mixing
//! and volume happen in that domain.

use super::SampleFormat;

/// Converts f32 samples to i16.
///
/// Input should be in the range [-1.0, 1.0].
/// Values outside this range are clamped.
///
/// Scales by 32768 and rounds, the inverse of [`i16_to_f32`], so every
/// 16-bit value survives a round trip unchanged. +1.0 clamps to 32767.
#[inline]
pub fn f32_to_i16(sample: f32) -> i16 {
    (sample * 32768.0).round().clamp(-32768.0, 32767.0) as i16
}

/// Converts i16 samples to f32.
///
/// Output will be in the range [-1.0, 1.0].
#[inline]
pub fn i16_to_f32(sample: i16) -> f32 {
    f32::from(sample) / 32768.0
}

#[inline]
fn f32_to_i32(sample: f32) -> i32 {
    (f64::from(sample) * 2_147_483_648.0)
        .round()
        .clamp(-2_147_483_648.0, 2_147_483_647.0) as i32
}

#[inline]
fn i32_to_f32(sample: i32) -> f32 {
    (f64::from(sample) / 2_147_483_648.0) as f32
}

const ULAW_BIAS: i32 = 0x84;
const ULAW_CLIP: i32 = 32635;

/// Encodes a linear 16-bit sample as G.711 µ-law.
pub fn linear_to_ulaw(sample: i16) -> u8 {
    let mut pcm = i32::from(sample);
    let sign = if pcm < 0 {
        pcm = -pcm;
        0x80
    } else {
        0
    };
    pcm = pcm.min(ULAW_CLIP) + ULAW_BIAS;

    let mut exponent = 7;
    let mut mask = 0x4000;
    while exponent > 0 && pcm & mask == 0 {
        exponent -= 1;
        mask >>= 1;
    }
    let mantissa = (pcm >> (exponent + 3)) & 0x0f;
    !((sign | (exponent << 4) | mantissa) as u8)
}

/// Decodes a G.711 µ-law byte to a linear 16-bit sample.
pub fn ulaw_to_linear(value: u8) -> i16 {
    let value = !value;
    let exponent = i32::from((value >> 4) & 0x07);
    let mantissa = i32::from(value & 0x0f);
    let magnitude = (((mantissa << 3) + ULAW_BIAS) << exponent) - ULAW_BIAS;
    if value & 0x80 == 0 {
        magnitude as i16
    } else {
        (-magnitude) as i16
    }
}

const ALAW_SEGMENT_END: [i32; 8] = [0x1f, 0x3f, 0x7f, 0xff, 0x1ff, 0x3ff, 0x7ff, 0xfff];

/// Encodes a linear 16-bit sample as G.711 A-law.
pub fn linear_to_alaw(sample: i16) -> u8 {
    let mut pcm = i32::from(sample) >> 3;
    let mask = if pcm >= 0 {
        0xd5
    } else {
        pcm = -pcm - 1;
        0x55
    };

    let Some(segment) = ALAW_SEGMENT_END.iter().position(|&end| pcm <= end) else {
        return 0x7f ^ mask;
    };
    let quantized = if segment < 2 {
        (pcm >> 1) & 0x0f
    } else {
        (pcm >> segment) & 0x0f
    };
    (((segment as i32) << 4) | quantized) as u8 ^ mask
}

/// Decodes a G.711 A-law byte to a linear 16-bit sample.
pub fn alaw_to_linear(value: u8) -> i16 {
    let value = value ^ 0x55;
    let mut magnitude = i32::from(value & 0x0f) << 4;
    let segment = i32::from((value & 0x70) >> 4);
    match segment {
        0 => magnitude += 8,
        1 => magnitude += 0x108,
        _ => {
            magnitude += 0x108;
            magnitude <<= segment - 1;
        }
    }
    if value & 0x80 == 0 {
        (-magnitude) as i16
    } else {
        magnitude as i16
    }
}

/// Decodes one sample starting at `bytes[0]`.
///
/// `bytes` must hold at least `format.sample_size()` bytes.
#[inline]
pub fn decode_sample(format: SampleFormat, bytes: &[u8]) -> f32 {
    match format {
        SampleFormat::U8 => (f32::from(bytes[0]) - 128.0) / 128.0,
        SampleFormat::ALaw => i16_to_f32(alaw_to_linear(bytes[0])),
        SampleFormat::ULaw => i16_to_f32(ulaw_to_linear(bytes[0])),
        SampleFormat::S16Le => i16_to_f32(i16::from_le_bytes([bytes[0], bytes[1]])),
        SampleFormat::S16Be => i16_to_f32(i16::from_be_bytes([bytes[0], bytes[1]])),
        SampleFormat::S32Le => {
            i32_to_f32(i32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
        }
        SampleFormat::S32Be => {
            i32_to_f32(i32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
        }
        SampleFormat::F32Le => f32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]),
        SampleFormat::F32Be => f32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]),
    }
}

/// Encodes one sample into `out[..format.sample_size()]`, clamping to range.
#[inline]
pub fn encode_sample(format: SampleFormat, sample: f32, out: &mut [u8]) {
    let sample = sample.clamp(-1.0, 1.0);
    match format {
        SampleFormat::U8 => out[0] = (sample * 128.0 + 128.0).round().clamp(0.0, 255.0) as u8,
        SampleFormat::ALaw => out[0] = linear_to_alaw(f32_to_i16(sample)),
        SampleFormat::ULaw => out[0] = linear_to_ulaw(f32_to_i16(sample)),
        SampleFormat::S16Le => out[..2].copy_from_slice(&f32_to_i16(sample).to_le_bytes()),
        SampleFormat::S16Be => out[..2].copy_from_slice(&f32_to_i16(sample).to_be_bytes()),
        SampleFormat::S32Le => out[..4].copy_from_slice(&f32_to_i32(sample).to_le_bytes()),
        SampleFormat::S32Be => out[..4].copy_from_slice(&f32_to_i32(sample).to_be_bytes()),
        SampleFormat::F32Le => out[..4].copy_from_slice(&sample.to_le_bytes()),
        SampleFormat::F32Be => out[..4].copy_from_slice(&sample.to_be_bytes()),
    }
}

/// Decodes a byte buffer into `out`, replacing its contents.
///
/// Trailing bytes that don't form a whole sample are ignored. `out` keeps its
/// capacity, so a reused buffer does not reallocate once warmed up.
pub fn decode_into(format: SampleFormat, bytes: &[u8], out: &mut Vec<f32>) {
    out.clear();
    out.extend(
        bytes
            .chunks_exact(format.sample_size())
            .map(|sample| decode_sample(format, sample)),
    );
}

/// Encodes `samples` into `out`, which must hold `samples.len() * sample_size` bytes.
pub fn encode_into(format: SampleFormat, samples: &[f32], out: &mut [u8]) {
    for (sample, slot) in samples
        .iter()
        .zip(out.chunks_exact_mut(format.sample_size()))
    {
        encode_sample(format, *sample, slot);
    }
}

/// Encodes `samples` into a freshly allocated byte vector.
pub fn encode_to_vec(format: SampleFormat, samples: &[f32]) -> Vec<u8> {
    let mut out = vec![0u8; samples.len() * format.sample_size()];
    encode_into(format, samples, &mut out);
    out
}

/// Remixes interleaved frames from `from` channels to `to` channels.
///
/// Down-mixing to mono averages all channels, up-mixing from mono duplicates
/// it. Other layouts map output channel `c` to input channel `c % from`.
pub fn remix_into(samples: &[f32], from: usize, to: usize, out: &mut Vec<f32>) {
    out.clear();
    if from == to {
        out.extend_from_slice(samples);
        return;
    }
    for frame in samples.chunks_exact(from) {
        if to == 1 {
            out.push(frame.iter().sum::<f32>() / from as f32);
        } else if from == 1 {
            out.extend(std::iter::repeat(frame[0]).take(to));
        } else {
            out.extend((0..to).map(|c| frame[c % from]));
        }
    }
}
