//! Recording into WAV files.

use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;

use super::RecordSink;
use crate::format::{alaw_to_linear, ulaw_to_linear, SampleFormat, SampleSpec};
use crate::{AudioChunk, SinkError};

type Writer = hound::WavWriter<BufWriter<File>>;

/// Writes the recording to a WAV file through `hound`.
///
/// The file is created by `on_start` once the recording's spec is known
/// and its header is completed by `on_stop`. Samples are stored without
/// loss: 8-bit PCM stays 8-bit, A-law and µ-law are expanded to 16-bit,
/// 16 and 32-bit PCM and 32-bit float are kept as they are.
///
/// ```no_run
/// use stream_core::record::FileSink;
///
/// let sink = FileSink::wav("recording.wav");
/// ```
pub struct FileSink {
    name: String,
    path: Arc<PathBuf>,
    file: Arc<Mutex<WavFile>>,
}

/// The open file and what is known about its contents.
#[derive(Default)]
struct WavFile {
    writer: Option<Writer>,
    format: Option<SampleFormat>,
    channels: u16,
    frames: u64,
}

impl WavFile {
    fn append(&mut self, path: &Path, bytes: &[u8]) -> Result<(), SinkError> {
        let (Some(writer), Some(format)) = (self.writer.as_mut(), self.format) else {
            return Err(SinkError::NotInitialized);
        };

        let size = format.sample_size();
        for s in bytes.chunks_exact(size) {
            let written = match format {
                SampleFormat::U8 => writer.write_sample((i16::from(s[0]) - 128) as i8),
                SampleFormat::ALaw => writer.write_sample(alaw_to_linear(s[0])),
                SampleFormat::ULaw => writer.write_sample(ulaw_to_linear(s[0])),
                SampleFormat::S16Le => writer.write_sample(i16::from_le_bytes([s[0], s[1]])),
                SampleFormat::S16Be => writer.write_sample(i16::from_be_bytes([s[0], s[1]])),
                SampleFormat::S32Le => {
                    writer.write_sample(i32::from_le_bytes([s[0], s[1], s[2], s[3]]))
                }
                SampleFormat::S32Be => {
                    writer.write_sample(i32::from_be_bytes([s[0], s[1], s[2], s[3]]))
                }
                SampleFormat::F32Le => {
                    writer.write_sample(f32::from_le_bytes([s[0], s[1], s[2], s[3]]))
                }
                SampleFormat::F32Be => {
                    writer.write_sample(f32::from_be_bytes([s[0], s[1], s[2], s[3]]))
                }
            };
            written.map_err(|e| wav_error(path, e))?;
        }

        self.frames += (bytes.len() / (size * usize::from(self.channels.max(1)))) as u64;
        Ok(())
    }
}

fn wav_spec(spec: &SampleSpec) -> hound::WavSpec {
    let (bits_per_sample, sample_format) = match spec.format {
        SampleFormat::U8 => (8, hound::SampleFormat::Int),
        SampleFormat::ALaw | SampleFormat::ULaw | SampleFormat::S16Le | SampleFormat::S16Be => {
            (16, hound::SampleFormat::Int)
        }
        SampleFormat::S32Le | SampleFormat::S32Be => (32, hound::SampleFormat::Int),
        SampleFormat::F32Le | SampleFormat::F32Be => (32, hound::SampleFormat::Float),
    };
    hound::WavSpec {
        channels: u16::from(spec.channels),
        sample_rate: spec.rate,
        bits_per_sample,
        sample_format,
    }
}

fn wav_error(path: &Path, error: hound::Error) -> SinkError {
    match error {
        hound::Error::IoError(e) => SinkError::file_error(path, e),
        other => SinkError::write_failed(other.to_string()),
    }
}

impl FileSink {
    /// A sink writing a WAV file at `path`. Nothing is created before the
    /// recording starts.
    pub fn wav(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref().to_path_buf();
        Self {
            name: format!("file:{}", path.display()),
            path: Arc::new(path),
            file: Arc::default(),
        }
    }

    /// Path of the WAV file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Frames written so far.
    pub async fn frames_written(&self) -> u64 {
        self.file.lock().await.frames
    }

    /// Flushes buffered samples and updates the header, so the file is
    /// playable while the recording goes on.
    pub async fn flush(&self) -> Result<(), SinkError> {
        self.blocking("flush", |file, path| match file.writer.as_mut() {
            Some(writer) => writer.flush().map_err(|e| wav_error(path, e)),
            None => Ok(()),
        })
        .await
    }

    /// Runs `op` on the file from the blocking thread pool.
    async fn blocking<T, F>(&self, what: &'static str, op: F) -> Result<T, SinkError>
    where
        T: Send + 'static,
        F: FnOnce(&mut WavFile, &Path) -> Result<T, SinkError> + Send + 'static,
    {
        let file = Arc::clone(&self.file);
        let path = Arc::clone(&self.path);
        tokio::task::spawn_blocking(move || op(&mut file.blocking_lock(), &path))
            .await
            .map_err(|e| SinkError::custom(format!("{what} task failed: {e}")))?
    }
}

#[async_trait]
impl RecordSink for FileSink {
    fn name(&self) -> &str {
        &self.name
    }

    async fn on_start(&self, spec: &SampleSpec) -> Result<(), SinkError> {
        let wav = wav_spec(spec);
        let format = spec.format;
        self.blocking("create", move |file, path| {
            let writer = hound::WavWriter::create(path, wav).map_err(|e| wav_error(path, e))?;
            *file = WavFile {
                writer: Some(writer),
                format: Some(format),
                channels: wav.channels,
                frames: 0,
            };
            Ok(())
        })
        .await
    }

    async fn write(&self, chunk: &AudioChunk) -> Result<(), SinkError> {
        tracing::trace!(sink = %self.name, bytes = chunk.len(), "writing chunk");
        let chunk = chunk.clone();
        self.blocking("write", move |file, path| file.append(path, chunk.bytes()))
            .await
    }

    async fn on_stop(&self) -> Result<(), SinkError> {
        self.blocking("finalize", |file, path| match file.writer.take() {
            Some(writer) => writer.finalize().map_err(|e| wav_error(path, e)),
            None => Ok(()),
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_file_sink_writes_s16() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.wav");
        let spec = SampleSpec::new(SampleFormat::S16Le, 16000, 1).unwrap();

        let sink = FileSink::wav(&path);
        sink.on_start(&spec).await.unwrap();

        let bytes: Vec<u8> = [100i16, 200, 300, -100]
            .iter()
            .flat_map(|s| s.to_le_bytes())
            .collect();
        sink.write(&AudioChunk::new(bytes)).await.unwrap();
        assert_eq!(sink.frames_written().await, 4);
        sink.on_stop().await.unwrap();

        let mut reader = hound::WavReader::open(&path).unwrap();
        assert_eq!(reader.spec().sample_rate, 16000);
        assert_eq!(reader.spec().channels, 1);
        assert_eq!(reader.spec().bits_per_sample, 16);
        let samples: Vec<i16> = reader.samples::<i16>().map(|s| s.unwrap()).collect();
        assert_eq!(samples, vec![100, 200, 300, -100]);
    }

    #[tokio::test]
    async fn test_file_sink_writes_float_stereo() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("float.wav");
        let spec = SampleSpec::new(SampleFormat::F32Le, 48000, 2).unwrap();

        let sink = FileSink::wav(&path);
        sink.on_start(&spec).await.unwrap();
        let bytes: Vec<u8> = [0.5f32, -0.5, 0.25, -0.25]
            .iter()
            .flat_map(|s| s.to_le_bytes())
            .collect();
        sink.write(&AudioChunk::new(bytes)).await.unwrap();
        assert_eq!(sink.frames_written().await, 2);
        sink.on_stop().await.unwrap();

        let mut reader = hound::WavReader::open(&path).unwrap();
        assert_eq!(reader.spec().sample_format, hound::SampleFormat::Float);
        let samples: Vec<f32> = reader.samples::<f32>().map(|s| s.unwrap()).collect();
        assert_eq!(samples, vec![0.5, -0.5, 0.25, -0.25]);
    }

    #[tokio::test]
    async fn test_file_sink_expands_ulaw() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("ulaw.wav");
        let spec = SampleSpec::new(SampleFormat::ULaw, 8000, 1).unwrap();

        let sink = FileSink::wav(&path);
        sink.on_start(&spec).await.unwrap();
        sink.write(&AudioChunk::new(vec![0xff, 0x00])).await.unwrap();
        sink.on_stop().await.unwrap();

        let mut reader = hound::WavReader::open(&path).unwrap();
        assert_eq!(reader.spec().bits_per_sample, 16);
        let samples: Vec<i16> = reader.samples::<i16>().map(|s| s.unwrap()).collect();
        assert_eq!(samples, vec![ulaw_to_linear(0xff), ulaw_to_linear(0x00)]);
    }

    #[tokio::test]
    async fn test_file_sink_requires_start() {
        let dir = tempdir().unwrap();
        let sink = FileSink::wav(dir.path().join("never.wav"));

        let result = sink.write(&AudioChunk::new(vec![0; 2])).await;
        assert!(matches!(result, Err(SinkError::NotInitialized)));
        // Stopping a sink that never started is fine
        sink.on_stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_file_sink_bad_path() {
        let dir = tempdir().unwrap();
        let sink = FileSink::wav(dir.path().join("missing").join("out.wav"));

        let result = sink.on_start(&SampleSpec::default()).await;
        assert!(matches!(result, Err(SinkError::FileError { .. })));
    }

    #[test]
    fn test_file_sink_name() {
        let sink = FileSink::wav("/tmp/test.wav");
        assert_eq!(sink.name(), "file:/tmp/test.wav");
        assert_eq!(sink.path(), Path::new("/tmp/test.wav"));
    }
}
