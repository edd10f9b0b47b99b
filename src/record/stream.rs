//! Capture side of a recording: the IO-thread driver and the bridge task.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use ringbuf::traits::{Consumer, Observer, Producer};
use ringbuf::{HeapCons, HeapProd};
use tokio::sync::mpsc;

use crate::chunk::AudioChunk;
use crate::driver::{CaptureDriver, StreamContext, StreamDriver};
use crate::event::{CoreEvent, EventCallback};
use crate::format::SampleSpec;

/// State shared between a [`Recording`](super::Recording), its capture
/// driver and its bridge task.
#[derive(Debug)]
pub(crate) struct RecordState {
    pub(crate) running: AtomicBool,
    pub(crate) chunks_processed: AtomicU64,
    pub(crate) bytes_captured: AtomicU64,
    pub(crate) buffer_overflows: AtomicU64,
    /// Bytes dropped since the bridge last reported an overflow.
    pub(crate) pending_dropped: AtomicU64,
}

impl RecordState {
    pub(crate) fn new() -> Self {
        Self {
            running: AtomicBool::new(true),
            chunks_processed: AtomicU64::new(0),
            bytes_captured: AtomicU64::new(0),
            buffer_overflows: AtomicU64::new(0),
            pending_dropped: AtomicU64::new(0),
        }
    }
}

/// Capture driver copying everything it receives into the ring buffer.
///
/// Never blocks: when the buffer is full the newest audio is dropped and
/// accounted for. Posts an unlink once the recording stopped.
pub(crate) struct RecordStream {
    producer: HeapProd<u8>,
    frame_size: usize,
    state: Arc<RecordState>,
    unlinked: bool,
}

impl RecordStream {
    pub(crate) fn new(producer: HeapProd<u8>, spec: &SampleSpec, state: Arc<RecordState>) -> Self {
        Self {
            producer,
            frame_size: spec.frame_size(),
            state,
            unlinked: false,
        }
    }
}

impl StreamDriver for RecordStream {}

impl CaptureDriver for RecordStream {
    fn push(&mut self, ctx: &mut StreamContext<'_>, chunk: &AudioChunk) {
        if !self.state.running.load(Ordering::Acquire) {
            if !self.unlinked {
                self.unlinked = true;
                ctx.post_unlink();
            }
            return;
        }

        let room = self.producer.vacant_len();
        let room = room - room % self.frame_size;
        let length = chunk.len().min(room);
        let written = self.producer.push_slice(&chunk.bytes()[..length]);
        self.state
            .bytes_captured
            .fetch_add(written as u64, Ordering::Relaxed);

        let dropped = chunk.len() - written;
        if dropped > 0 {
            self.state.buffer_overflows.fetch_add(1, Ordering::Relaxed);
            self.state
                .pending_dropped
                .fetch_add(dropped as u64, Ordering::Relaxed);
        }
    }
}

/// Cuts buffered audio into fixed-length chunks for the router.
pub(crate) struct Bridge {
    pub(crate) consumer: HeapCons<u8>,
    pub(crate) spec: SampleSpec,
    pub(crate) chunk_length: usize,
    pub(crate) poll_interval: Duration,
    pub(crate) state: Arc<RecordState>,
    pub(crate) chunk_tx: mpsc::Sender<AudioChunk>,
    pub(crate) event_callback: Option<EventCallback>,
}

impl Bridge {
    /// Runs until the recording stops, then flushes what is left as one
    /// final, possibly shorter, chunk.
    pub(crate) async fn run(mut self) {
        loop {
            let running = self.state.running.load(Ordering::Acquire);
            self.report_overflow();

            while self.consumer.occupied_len() >= self.chunk_length {
                if !self.forward(self.chunk_length).await {
                    return;
                }
            }

            if !running {
                let rest = self.spec.frame_align(self.consumer.occupied_len());
                if rest > 0 {
                    self.forward(rest).await;
                }
                break;
            }

            tokio::time::sleep(self.poll_interval).await;
        }
        tracing::debug!("record bridge stopped");
    }

    /// Sends `length` buffered bytes. Returns `false` if the router is gone.
    async fn forward(&mut self, length: usize) -> bool {
        let mut bytes = vec![0u8; length];
        let read = self.consumer.pop_slice(&mut bytes);
        bytes.truncate(read);

        if self.chunk_tx.send(AudioChunk::new(bytes)).await.is_err() {
            tracing::warn!("record router gone, stopping bridge");
            return false;
        }
        self.state.chunks_processed.fetch_add(1, Ordering::Relaxed);
        true
    }

    fn report_overflow(&self) {
        let dropped = self.state.pending_dropped.swap(0, Ordering::Relaxed);
        if dropped == 0 {
            return;
        }
        let dropped = usize::try_from(dropped).unwrap_or(usize::MAX);
        let dropped_ms = u64::try_from(self.spec.bytes_to_duration(dropped).as_millis())
            .unwrap_or(u64::MAX);
        tracing::warn!(dropped_ms, "recording buffer overflow, audio dropped");
        if let Some(ref callback) = self.event_callback {
            callback(CoreEvent::RecordOverflow { dropped_ms });
        }
    }
}
