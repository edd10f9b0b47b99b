//! Mock stream driver for testing without real media.

use std::sync::Arc;

use parking_lot::Mutex;

use super::{CaptureDriver, PlaybackDriver, StreamContext, StreamDriver};
use crate::chunk::AudioChunk;
use crate::format::{encode_to_vec, SampleSpec};
use crate::pipeline::{RewindableQueue, QUEUE_MAX_LENGTH};
use crate::state::EndpointState;

/// What a [`MockStream`] observed, shared with the test that built it.
#[derive(Debug, Clone, Default)]
pub struct MockStats {
    /// Calls to `pop`.
    pub pops: u64,
    /// Bytes handed to the device, replays included.
    pub bytes_produced: u64,
    /// Calls to `process_rewind`.
    pub rewinds: u64,
    /// Sum of all rewind requests, in bytes.
    pub rewound: usize,
    /// Last `max_rewind` reported to the driver.
    pub max_rewind: usize,
    /// Every state the endpoint moved into.
    pub states: Vec<EndpointState>,
    /// Bytes received as a capture driver.
    pub captured: Vec<u8>,
    /// Whether an unlink was posted.
    pub unlinked: bool,
}

enum Waveform {
    Constant(u8),
    Sine { frequency: f64, frame: u64 },
    Noise { amplitude: f32, seed: u32 },
    Data { data: AudioChunk, position: usize },
}

/// A stream driver producing synthetic audio.
///
/// As a playback driver it generates audio on demand and keeps what it
/// produced so rewinds replay exactly the same bytes. As a capture driver
/// it records everything it receives into [`MockStats::captured`].
///
/// Every callback locks the shared [`MockStats`], so the driver is not
/// real-time safe: a test reading the stats can stall the IO thread. Use it
/// for tests and examples only.
///
/// # Example
///
/// ```
/// use stream_core::{MockStream, SampleSpec};
///
/// let spec = SampleSpec::default();
///
/// // 100ms of a 440Hz sine wave, then the stream unlinks itself
/// let frames = spec.rate as usize / 10;
/// let mock = MockStream::sine(spec, 440.0)
///     .with_limit(frames)
///     .unlink_when_done();
/// let stats = mock.stats();
/// ```
pub struct MockStream {
    spec: SampleSpec,
    waveform: Waveform,
    history: RewindableQueue,
    remaining: Option<usize>,
    unlink_when_done: bool,
    stats: Arc<Mutex<MockStats>>,
}

impl MockStream {
    fn new(spec: SampleSpec, waveform: Waveform) -> Self {
        Self {
            spec,
            waveform,
            history: RewindableQueue::new(spec.frame_size(), QUEUE_MAX_LENGTH, 0),
            remaining: None,
            unlink_when_done: false,
            stats: Arc::default(),
        }
    }

    /// Endless silence.
    pub fn silence(spec: SampleSpec) -> Self {
        Self::constant(spec, spec.format.silence_byte())
    }

    /// Endless repetitions of one byte.
    pub fn constant(spec: SampleSpec, value: u8) -> Self {
        Self::new(spec, Waveform::Constant(value))
    }

    /// An endless sine wave at `frequency` Hz, the same on every channel.
    pub fn sine(spec: SampleSpec, frequency: f64) -> Self {
        Self::new(spec, Waveform::Sine { frequency, frame: 0 })
    }

    /// Deterministic white noise with peak `amplitude` in [0.0, 1.0].
    pub fn noise(spec: SampleSpec, amplitude: f32) -> Self {
        Self::new(
            spec,
            Waveform::Noise {
                amplitude: amplitude.clamp(0.0, 1.0),
                seed: 12345,
            },
        )
    }

    /// Plays `data` once. A trailing partial frame is ignored.
    pub fn from_bytes(spec: SampleSpec, data: Vec<u8>) -> Self {
        let length = spec.frame_align(data.len());
        let data = AudioChunk::new(data).slice(0, length);
        Self::new(spec, Waveform::Data { data, position: 0 })
    }

    /// Stops producing after `frames` frames.
    #[must_use]
    pub fn with_limit(mut self, frames: usize) -> Self {
        self.remaining = Some(frames);
        self
    }

    /// Posts an unlink once everything produced has been played.
    #[must_use]
    pub fn unlink_when_done(mut self) -> Self {
        self.unlink_when_done = true;
        self
    }

    /// Shared statistics, readable while the driver is attached.
    pub fn stats(&self) -> Arc<Mutex<MockStats>> {
        self.stats.clone()
    }

    fn generate(&mut self, frames: usize) -> Option<AudioChunk> {
        let frames = self.remaining.map_or(frames, |left| left.min(frames));
        if frames == 0 {
            return None;
        }
        let channels = usize::from(self.spec.channels);
        let frame_size = self.spec.frame_size();

        let chunk = match &mut self.waveform {
            Waveform::Constant(value) => AudioChunk::new(vec![*value; frames * frame_size]),
            Waveform::Sine { frequency, frame } => {
                let rate = f64::from(self.spec.rate);
                let mut samples = Vec::with_capacity(frames * channels);
                for i in 0..frames as u64 {
                    let t = (*frame + i) as f64 / rate;
                    let value = (2.0 * std::f64::consts::PI * *frequency * t).sin() as f32;
                    samples.extend(std::iter::repeat(value).take(channels));
                }
                *frame += frames as u64;
                AudioChunk::new(encode_to_vec(self.spec.format, &samples))
            }
            Waveform::Noise { amplitude, seed } => {
                // LCG for deterministic "random" noise
                let mut samples = Vec::with_capacity(frames * channels);
                for _ in 0..frames * channels {
                    *seed = seed.wrapping_mul(1_103_515_245).wrapping_add(12345);
                    let random = f32::from((*seed >> 16) as u16) / 32768.0 - 1.0;
                    samples.push(random * *amplitude);
                }
                AudioChunk::new(encode_to_vec(self.spec.format, &samples))
            }
            Waveform::Data { data, position } => {
                let chunk = data.slice(*position, frames * frame_size);
                *position += chunk.len();
                chunk
            }
        };

        if chunk.is_empty() {
            return None;
        }
        if let Some(left) = self.remaining.as_mut() {
            *left -= chunk.len() / frame_size;
        }
        Some(chunk)
    }
}

impl StreamDriver for MockStream {
    fn state_change(&mut self, _ctx: &mut StreamContext<'_>, state: EndpointState) {
        self.stats.lock().states.push(state);
    }

    fn process_rewind(&mut self, _ctx: &mut StreamContext<'_>, nbytes: usize) {
        self.history.rewind(nbytes);
        let mut stats = self.stats.lock();
        stats.rewinds += 1;
        stats.rewound += nbytes;
    }

    fn update_max_rewind(&mut self, _ctx: &mut StreamContext<'_>, nbytes: usize) {
        self.history.set_max_rewind(nbytes);
        self.stats.lock().max_rewind = nbytes;
    }
}

impl PlaybackDriver for MockStream {
    // Locks the stats, see the type docs.
    fn pop(&mut self, ctx: &mut StreamContext<'_>, length: usize) -> Option<AudioChunk> {
        self.stats.lock().pops += 1;

        if self.history.is_empty() {
            let frames = length / self.spec.frame_size();
            if let Some(chunk) = self.generate(frames) {
                if let Err(e) = self.history.push(chunk) {
                    tracing::warn!(error = %e, "mock stream dropped audio");
                }
            }
        }

        if let Some(chunk) = self.history.peek() {
            let chunk = chunk.slice(0, length);
            self.history.drop(chunk.len());
            self.stats.lock().bytes_produced += chunk.len() as u64;
            return Some(chunk);
        }

        if self.unlink_when_done && ctx.safe_to_remove() {
            let mut stats = self.stats.lock();
            if !stats.unlinked {
                stats.unlinked = true;
                ctx.post_unlink();
            }
        }
        None
    }
}

impl CaptureDriver for MockStream {
    fn push(&mut self, _ctx: &mut StreamContext<'_>, chunk: &AudioChunk) {
        self.stats.lock().captured.extend_from_slice(chunk.bytes());
    }
}
