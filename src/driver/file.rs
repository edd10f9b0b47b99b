//! File playback driver.

use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};

use super::{PlaybackDriver, StreamContext, StreamDriver};
use crate::builder::{EndpointBuilder, PROP_MEDIA_FILENAME, PROP_MEDIA_NAME};
use crate::chunk::AudioChunk;
use crate::core::Core;
use crate::format::{SampleFormat, SampleSpec, Volume};
use crate::id::{DeviceId, EndpointId};
use crate::pipeline::{RewindableQueue, QUEUE_MAX_LENGTH};
use crate::state::EndpointState;
use crate::CoreError;

type Samples<S> = hound::WavIntoSamples<BufReader<File>, S>;

/// Decoder for the sample encodings the pipeline can carry.
enum SampleReader {
    /// 8 and 16 bit integers, widened to 16 bit.
    I16 { samples: Samples<i16>, shift: u32 },
    /// 17 to 32 bit integers, widened to 32 bit.
    I32 { samples: Samples<i32>, shift: u32 },
    F32(Samples<f32>),
}

/// Outcome of one decode call.
enum Decoded {
    /// Bytes decoded; the reader may have more.
    More(Vec<u8>),
    /// Bytes decoded, then the file ended (or failed).
    Last(Vec<u8>),
}

impl SampleReader {
    fn decode(&mut self, samples: usize) -> Result<Decoded, hound::Error> {
        let mut out = Vec::new();
        let mut read = 0;
        match self {
            Self::I16 { samples: it, shift } => {
                out.reserve(samples * 2);
                for sample in it.by_ref().take(samples) {
                    out.extend_from_slice(&(sample? << *shift).to_ne_bytes());
                    read += 1;
                }
            }
            Self::I32 { samples: it, shift } => {
                out.reserve(samples * 4);
                for sample in it.by_ref().take(samples) {
                    out.extend_from_slice(&(sample? << *shift).to_ne_bytes());
                    read += 1;
                }
            }
            Self::F32(it) => {
                out.reserve(samples * 4);
                for sample in it.by_ref().take(samples) {
                    out.extend_from_slice(&sample?.to_ne_bytes());
                    read += 1;
                }
            }
        }
        Ok(if read < samples {
            Decoded::Last(out)
        } else {
            Decoded::More(out)
        })
    }
}

/// Plays a WAV file, unlinking its endpoint once everything was heard.
///
/// Decoded audio goes through a private rewindable queue, so rewinds are
/// served from what was already decoded instead of seeking the file.
///
/// # Example
///
/// ```no_run
/// use stream_core::{Core, EndpointBuilder, FileStream};
///
/// let mut core = Core::default();
/// let stream = FileStream::open("bell.wav")?;
/// let spec = stream.spec();
/// let id = core.create_endpoint(EndpointBuilder::playback(spec, stream))?;
/// core.put_endpoint(id)?;
/// # Ok::<(), stream_core::CoreError>(())
/// ```
pub struct FileStream {
    path: PathBuf,
    spec: SampleSpec,
    reader: Option<SampleReader>,
    /// Released once playback is over.
    queue: Option<RewindableQueue>,
}

impl FileStream {
    /// Opens a WAV file and maps its encoding onto a pipeline sample spec.
    ///
    /// 8 and 16 bit integer files play as S16, 24 and 32 bit ones as S32
    /// and 32 bit float ones as F32, all native endian.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, CoreError> {
        let path = path.as_ref();
        let reader = hound::WavReader::open(path).map_err(|e| CoreError::file_open(path, e))?;
        let wav = reader.spec();

        let (format, reader) = match (wav.sample_format, wav.bits_per_sample) {
            (hound::SampleFormat::Int, bits @ 1..=16) => (
                SampleFormat::S16NE,
                SampleReader::I16 {
                    samples: reader.into_samples(),
                    shift: 16 - u32::from(bits),
                },
            ),
            (hound::SampleFormat::Int, bits @ 17..=32) => (
                SampleFormat::S32NE,
                SampleReader::I32 {
                    samples: reader.into_samples(),
                    shift: 32 - u32::from(bits),
                },
            ),
            (hound::SampleFormat::Float, 32) => {
                (SampleFormat::F32NE, SampleReader::F32(reader.into_samples()))
            }
            (sample_format, bits) => {
                return Err(CoreError::unsupported_format(format!(
                    "{bits}-bit {sample_format:?} WAV"
                )))
            }
        };

        let channels = u8::try_from(wav.channels).unwrap_or(0);
        let spec = SampleSpec::new(format, wav.sample_rate, channels).map_err(|_| {
            CoreError::unsupported_format(format!(
                "{} channels at {}Hz",
                wav.channels, wav.sample_rate
            ))
        })?;

        tracing::debug!(path = %path.display(), %spec, "opened file");
        Ok(Self {
            path: path.to_path_buf(),
            spec,
            reader: Some(reader),
            queue: Some(RewindableQueue::new(spec.frame_size(), QUEUE_MAX_LENGTH, 0)),
        })
    }

    /// The spec the file plays at.
    pub fn spec(&self) -> SampleSpec {
        self.spec
    }

    /// The file being played.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Decodes up to `length` bytes. Closes the reader at the end of the file.
    fn decode(&mut self, length: usize) -> Option<AudioChunk> {
        let reader = self.reader.as_mut()?;
        let frames = (length / self.spec.frame_size()).max(1);
        let samples = frames * usize::from(self.spec.channels);

        let bytes = match reader.decode(samples) {
            Ok(Decoded::More(bytes)) => bytes,
            Ok(Decoded::Last(bytes)) => {
                tracing::debug!(path = %self.path.display(), "end of file");
                self.reader = None;
                bytes
            }
            Err(e) => {
                tracing::warn!(path = %self.path.display(), error = %e, "decode failed, stopping");
                self.reader = None;
                return None;
            }
        };

        let aligned = self.spec.frame_align(bytes.len());
        let chunk = AudioChunk::new(bytes).slice(0, aligned);
        (!chunk.is_empty()).then_some(chunk)
    }
}

impl StreamDriver for FileStream {
    fn state_change(&mut self, ctx: &mut StreamContext<'_>, state: EndpointState) {
        // be heard at once instead of after what the device already buffered
        if ctx.state() == EndpointState::Init && state.is_linked() {
            ctx.request_rewind(0, false, true);
        }
    }

    fn process_rewind(&mut self, _ctx: &mut StreamContext<'_>, nbytes: usize) {
        if let Some(queue) = self.queue.as_mut() {
            queue.rewind(nbytes);
        }
    }

    fn update_max_rewind(&mut self, _ctx: &mut StreamContext<'_>, nbytes: usize) {
        if let Some(queue) = self.queue.as_mut() {
            queue.set_max_rewind(nbytes);
        }
    }
}

impl PlaybackDriver for FileStream {
    fn pop(&mut self, ctx: &mut StreamContext<'_>, length: usize) -> Option<AudioChunk> {
        if self.queue.as_ref().is_some_and(RewindableQueue::is_empty) {
            if let Some(chunk) = self.decode(length) {
                if let Some(Err(e)) = self.queue.as_mut().map(|q| q.push(chunk)) {
                    tracing::warn!(path = %self.path.display(), error = %e, "dropping decoded audio");
                }
            }
        }

        let queue = self.queue.as_mut()?;
        if let Some(chunk) = queue.peek() {
            let chunk = chunk.slice(0, length);
            queue.drop(chunk.len());
            return Some(chunk);
        }

        if self.reader.is_none() && ctx.safe_to_remove() {
            tracing::debug!(path = %self.path.display(), endpoint = %ctx.endpoint(), "file playback finished");
            self.queue = None;
            ctx.post_unlink();
        }
        None
    }
}

/// Plays a WAV file on `device` (or the default playback device).
///
/// The endpoint unlinks itself once the whole file was played. Nothing is
/// left registered if opening or attaching fails.
pub fn play_file(
    core: &mut Core,
    device: Option<DeviceId>,
    path: impl AsRef<Path>,
    volume: Option<Volume>,
) -> Result<EndpointId, CoreError> {
    let path = path.as_ref();
    let stream = FileStream::open(path)?;
    let spec = stream.spec();

    let name = path
        .file_name()
        .map_or_else(|| path.display().to_string(), |n| n.to_string_lossy().into_owned());
    let mut builder = EndpointBuilder::playback(spec, stream)
        .device_opt(device)
        .property(PROP_MEDIA_NAME, name)
        .property(PROP_MEDIA_FILENAME, path.display().to_string());
    if let Some(volume) = volume {
        builder = builder.volume(volume);
    }

    let id = core.create_endpoint(builder)?;
    if let Err(e) = core.put_endpoint(id) {
        core.unlink_endpoint(id);
        return Err(e);
    }
    tracing::info!(endpoint = %id, path = %path.display(), "playing file");
    Ok(id)
}
