//! Recording builder and session handle.

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use ringbuf::traits::Split;
use ringbuf::HeapRb;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use super::router::{Router, RouterCommand};
use super::stream::{Bridge, RecordState, RecordStream};
use super::RecordSink;
use crate::builder::EndpointBuilder;
use crate::core::Core;
use crate::format::SampleSpec;
use crate::id::{DeviceId, EndpointId};
use crate::state::Direction;
use crate::{CoreError, EventCallback, RecordConfig};

/// Capacity of the channel between the bridge and the router, in chunks.
const CHUNK_CHANNEL_CAPACITY: usize = 32;

/// Statistics about a recording.
#[derive(Debug, Clone, Default)]
pub struct RecordStats {
    /// Chunks handed to the sinks.
    pub chunks_processed: u64,
    /// Bytes taken from the capture device.
    pub bytes_captured: u64,
    /// Times the ring buffer was full and audio was dropped.
    pub buffer_overflows: u64,
}

/// Builder for a [`Recording`].
///
/// # Example
///
/// ```no_run
/// use stream_core::record::{FileSink, RecordBuilder};
/// use stream_core::Core;
///
/// # async fn example(core: &mut Core) -> Result<(), stream_core::CoreError> {
/// let recording = RecordBuilder::new()
///     .add_sink(FileSink::wav("capture.wav"))
///     .start(core)
///     .await?;
///
/// // Recording runs in background...
/// tokio::time::sleep(std::time::Duration::from_secs(10)).await;
///
/// recording.stop(core).await?;
/// # Ok(())
/// # }
/// ```
#[must_use]
pub struct RecordBuilder {
    device: Option<DeviceId>,
    spec: Option<SampleSpec>,
    sinks: Vec<Arc<dyn RecordSink>>,
    event_callback: Option<EventCallback>,
    config: RecordConfig,
}

impl Default for RecordBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl RecordBuilder {
    /// Creates a builder recording from the default capture device.
    pub fn new() -> Self {
        Self {
            device: None,
            spec: None,
            sinks: Vec::new(),
            event_callback: None,
            config: RecordConfig::default(),
        }
    }

    /// Records from `device` instead of the default capture device.
    pub fn device(mut self, device: DeviceId) -> Self {
        self.device = Some(device);
        self
    }

    /// Records in `spec`, converting from the device's.
    ///
    /// Defaults to the device's own spec.
    pub fn spec(mut self, spec: SampleSpec) -> Self {
        self.spec = Some(spec);
        self
    }

    /// Adds a sink that receives every recorded chunk.
    pub fn add_sink<S: RecordSink + 'static>(mut self, sink: S) -> Self {
        self.sinks.push(Arc::new(sink));
        self
    }

    /// Adds a sink that is shared with the caller.
    pub fn add_shared_sink(mut self, sink: Arc<dyn RecordSink>) -> Self {
        self.sinks.push(sink);
        self
    }

    /// Registers a callback for sink errors and overflows.
    pub fn on_event(mut self, callback: EventCallback) -> Self {
        self.event_callback = Some(callback);
        self
    }

    /// Sets the recording configuration.
    pub fn config(mut self, config: RecordConfig) -> Self {
        self.config = config;
        self
    }

    /// Starts every sink, links a capture endpoint and spawns the
    /// background tasks.
    ///
    /// Must be called within a tokio runtime. Nothing is left running or
    /// registered on failure.
    pub async fn start(self, core: &mut Core) -> Result<Recording, CoreError> {
        let device = match self.device {
            Some(device) => device,
            None => core
                .default_device(Direction::Capture)
                .ok_or(CoreError::NoDefaultDevice {
                    direction: Direction::Capture,
                })?,
        };
        let spec = match self.spec {
            Some(spec) => spec,
            None => core.device_spec(device)?,
        };
        spec.validate()?;

        let frame_size = spec.frame_size();
        let chunk_length = spec
            .frame_align(spec.duration_to_bytes(self.config.chunk_duration))
            .max(frame_size);
        let capacity = spec
            .frame_align(spec.duration_to_bytes(self.config.ring_buffer_duration))
            .max(chunk_length);

        let router = Router::new(self.sinks, self.config.clone())
            .with_event_callback(self.event_callback.clone());
        router.start_sinks(&spec).await?;

        let state = Arc::new(RecordState::new());
        let (producer, consumer) = HeapRb::<u8>::new(capacity).split();
        let driver = RecordStream::new(producer, &spec, state.clone());

        let endpoint = match core
            .create_endpoint(EndpointBuilder::capture(spec, driver).device(device).name("record"))
            .and_then(|id| match core.put_endpoint(id) {
                Ok(()) => Ok(id),
                Err(e) => {
                    core.unlink_endpoint(id);
                    Err(e)
                }
            }) {
            Ok(id) => id,
            Err(e) => {
                router.stop_sinks().await;
                return Err(e);
            }
        };

        let (chunk_tx, chunk_rx) = mpsc::channel(CHUNK_CHANNEL_CAPACITY);
        let (router_cmd_tx, router_cmd_rx) = mpsc::channel(1);
        let router_handle = tokio::spawn(router.run(chunk_rx, router_cmd_rx));

        let bridge = Bridge {
            consumer,
            spec,
            chunk_length,
            poll_interval: (self.config.chunk_duration / 4).max(Duration::from_millis(1)),
            state: state.clone(),
            chunk_tx,
            event_callback: self.event_callback,
        };
        let bridge_handle = tokio::spawn(bridge.run());

        tracing::info!(%device, %endpoint, %spec, "recording started");
        Ok(Recording {
            endpoint,
            state,
            router_cmd_tx,
            router_handle: Some(router_handle),
            bridge_handle: Some(bridge_handle),
        })
    }
}

/// Handle to a running recording.
///
/// Audio flows to the sinks in background tasks until
/// [`stop()`](Recording::stop) is called or the `Recording` is dropped.
///
/// # Lifecycle
///
/// 1. Created by [`RecordBuilder::start()`]
/// 2. Captured audio is chunked and written to every sink
/// 3. Call [`stop()`](Recording::stop) for graceful shutdown
/// 4. Dropping the `Recording` also stops it; the capture endpoint then
///    unlinks itself on the device's next cycle
pub struct Recording {
    endpoint: EndpointId,
    state: Arc<RecordState>,
    router_cmd_tx: mpsc::Sender<RouterCommand>,
    router_handle: Option<JoinHandle<()>>,
    bridge_handle: Option<JoinHandle<()>>,
}

impl Recording {
    /// The capture endpoint feeding this recording.
    pub fn endpoint(&self) -> EndpointId {
        self.endpoint
    }

    /// Returns `true` if the recording is still running.
    pub fn is_running(&self) -> bool {
        self.state.running.load(Ordering::SeqCst)
    }

    /// Returns current recording statistics.
    pub fn stats(&self) -> RecordStats {
        RecordStats {
            chunks_processed: self.state.chunks_processed.load(Ordering::SeqCst),
            bytes_captured: self.state.bytes_captured.load(Ordering::SeqCst),
            buffer_overflows: self.state.buffer_overflows.load(Ordering::SeqCst),
        }
    }

    /// Gracefully stops the recording.
    ///
    /// This will:
    /// 1. Unlink the capture endpoint
    /// 2. Drain any remaining audio in the buffer to sinks
    /// 3. Call `on_stop()` on all sinks
    /// 4. Wait for background tasks to complete
    pub async fn stop(mut self, core: &mut Core) -> Result<(), CoreError> {
        core.unlink_endpoint(self.endpoint);
        self.stop_internal().await;
        Ok(())
    }

    async fn stop_internal(&mut self) {
        if !self.state.running.swap(false, Ordering::SeqCst) {
            // Already stopped
            return;
        }

        if let Some(handle) = self.bridge_handle.take() {
            if let Err(e) = handle.await {
                tracing::error!(error = %e, "record bridge task failed");
            }
        }

        // A send error means the router already finished
        let _ = self.router_cmd_tx.send(RouterCommand::Stop).await;

        if let Some(handle) = self.router_handle.take() {
            if let Err(e) = handle.await {
                tracing::error!(error = %e, "record router task failed");
            }
        }
        tracing::info!(endpoint = %self.endpoint, "recording stopped");
    }
}

impl Drop for Recording {
    fn drop(&mut self) {
        if self.state.running.load(Ordering::SeqCst) {
            // Dropped without explicit stop(): the bridge flushes and exits,
            // the router drains once told to stop
            self.state.running.store(false, Ordering::SeqCst);
            let _ = self.router_cmd_tx.try_send(RouterCommand::Stop);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::DeviceBuilder;
    use crate::chunk::AudioChunk;
    use crate::format::SampleFormat;
    use crate::record::ChannelSink;

    fn spec() -> SampleSpec {
        SampleSpec::new(SampleFormat::S16Le, 8000, 1).unwrap()
    }

    #[test]
    fn test_record_stats_default() {
        let stats = RecordStats::default();
        assert_eq!(stats.chunks_processed, 0);
        assert_eq!(stats.bytes_captured, 0);
        assert_eq!(stats.buffer_overflows, 0);
    }

    #[tokio::test]
    async fn test_record_without_capture_device() {
        let mut core = Core::default();
        let (tx, _rx) = mpsc::channel(4);
        let result = RecordBuilder::new()
            .add_sink(ChannelSink::new(tx))
            .start(&mut core)
            .await;
        assert!(matches!(result, Err(CoreError::NoDefaultDevice { .. })));
    }

    #[tokio::test]
    async fn test_record_chunks_captured_audio() {
        let mut core = Core::default();
        let (source, mut io) = core
            .create_device(DeviceBuilder::capture("mic").spec(spec()))
            .unwrap();
        core.put_device(source).unwrap();

        let (tx, mut rx) = mpsc::channel(16);
        let recording = RecordBuilder::new()
            .add_sink(ChannelSink::new(tx))
            .config(RecordConfig {
                chunk_duration: Duration::from_millis(10),
                ..Default::default()
            })
            .start(&mut core)
            .await
            .unwrap();
        assert!(recording.is_running());

        // 10ms at 8kHz mono S16 is 160 bytes; post 2.5 chunks
        io.post(&AudioChunk::new(vec![3; 400]));

        let first = rx.recv().await.unwrap();
        let second = rx.recv().await.unwrap();
        assert_eq!(first.len(), 160);
        assert_eq!(second.len(), 160);

        recording.stop(&mut core).await.unwrap();
        let rest = rx.recv().await.unwrap();
        assert_eq!(rest.len(), 80);
        assert!(rest.bytes().iter().all(|&b| b == 3));
        assert!(core.endpoints().is_empty());
    }
}
