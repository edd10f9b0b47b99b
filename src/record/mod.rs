//! Recording: captured audio fanned out to async sinks.
//!
//! ```text
//! capture device ─post─▶ RecordStream ─▶ ring buffer ─▶ bridge task ─▶ Router ─▶ sinks
//! ```
//!
//! The capture endpoint only copies bytes into a lock-free ring buffer on
//! the IO thread. A tokio task cuts the buffered audio into fixed-length
//! chunks and hands them to the router, which writes to every sink
//! concurrently and retries failed writes.

mod channel;
mod file;
mod router;
mod session;
mod stream;

use async_trait::async_trait;

pub use channel::ChannelSink;
pub use file::FileSink;
pub use session::{RecordBuilder, RecordStats, Recording};

use crate::chunk::AudioChunk;
use crate::format::SampleSpec;
use crate::SinkError;

/// A destination for recorded audio.
///
/// Sinks receive audio chunks from the router and process them
/// (write to file, send over channel, etc.).
///
/// # Implementing a Custom Sink
///
/// ```
/// use stream_core::{AudioChunk, SampleSpec, SinkError};
/// use stream_core::record::RecordSink;
/// use async_trait::async_trait;
///
/// struct MySink {
///     name: String,
/// }
///
/// #[async_trait]
/// impl RecordSink for MySink {
///     fn name(&self) -> &str {
///         &self.name
///     }
///
///     async fn write(&self, chunk: &AudioChunk) -> Result<(), SinkError> {
///         // Process the chunk...
///         Ok(())
///     }
/// }
/// ```
#[async_trait]
pub trait RecordSink: Send + Sync {
    /// Returns the name of this sink for logging and events.
    fn name(&self) -> &str;

    /// Called once before the first write with the recorded spec.
    ///
    /// Default implementation does nothing.
    async fn on_start(&self, _spec: &SampleSpec) -> Result<(), SinkError> {
        Ok(())
    }

    /// Writes one chunk of recorded audio.
    ///
    /// Chunks hold whole frames in the spec given to
    /// [`on_start`](Self::on_start).
    async fn write(&self, chunk: &AudioChunk) -> Result<(), SinkError>;

    /// Called when the recording stops.
    ///
    /// Use this to flush buffers, close files, etc.
    /// Default implementation does nothing.
    async fn on_stop(&self) -> Result<(), SinkError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingSink {
        count: AtomicUsize,
    }

    #[async_trait]
    impl RecordSink for CountingSink {
        fn name(&self) -> &str {
            "counting"
        }

        async fn write(&self, _chunk: &AudioChunk) -> Result<(), SinkError> {
            self.count.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_sink_default_hooks() {
        let sink = CountingSink {
            count: AtomicUsize::new(0),
        };
        sink.on_start(&SampleSpec::default()).await.unwrap();
        sink.write(&AudioChunk::new(vec![0; 4])).await.unwrap();
        sink.write(&AudioChunk::new(vec![0; 4])).await.unwrap();
        sink.on_stop().await.unwrap();

        assert_eq!(sink.count.load(Ordering::SeqCst), 2);
    }
}
