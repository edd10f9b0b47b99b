//! Loopback: forwards what a capture device records into a playback device.
//!
//! ```text
//! capture device ─post─▶ LoopbackInput ─▶ ring buffer ─▶ LoopbackOutput ─pop─▶ playback device
//! ```
//!
//! Both endpoints run at the playback device's spec; the capture endpoint
//! converts whatever the capture device delivers. The ring buffer absorbs
//! the jitter between the two IO threads.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use ringbuf::traits::{Consumer, Observer, Producer, Split};
use ringbuf::{HeapCons, HeapProd, HeapRb};

use super::{CaptureDriver, PlaybackDriver, StreamContext, StreamDriver};
use crate::builder::EndpointBuilder;
use crate::chunk::AudioChunk;
use crate::core::Core;
use crate::format::SampleSpec;
use crate::id::{DeviceId, EndpointId};
use crate::CoreError;

/// Default amount of audio the loopback buffers.
pub const DEFAULT_LOOPBACK_BUFFER: Duration = Duration::from_millis(200);

#[derive(Debug, Default)]
struct LoopbackShared {
    /// The capture side is gone.
    closed: AtomicBool,
    /// Bytes dropped because the playback side fell behind.
    dropped: AtomicU64,
}

/// Capture half: writes recorded audio into the ring buffer.
pub struct LoopbackInput {
    producer: HeapProd<u8>,
    frame_size: usize,
    shared: Arc<LoopbackShared>,
}

impl StreamDriver for LoopbackInput {}

impl CaptureDriver for LoopbackInput {
    fn push(&mut self, _ctx: &mut StreamContext<'_>, chunk: &AudioChunk) {
        let room = self.producer.vacant_len();
        let room = room - room % self.frame_size;
        let length = chunk.len().min(room);
        let written = self.producer.push_slice(&chunk.bytes()[..length]);
        let dropped = chunk.len() - written;
        if dropped > 0 {
            self.shared
                .dropped
                .fetch_add(dropped as u64, Ordering::Relaxed);
            tracing::trace!(dropped, "loopback overrun");
        }
    }
}

impl Drop for LoopbackInput {
    fn drop(&mut self) {
        self.shared.closed.store(true, Ordering::Release);
    }
}

/// Playback half: plays whatever the capture half buffered.
///
/// Unlinks itself once the capture half is gone and the buffer ran dry.
pub struct LoopbackOutput {
    consumer: HeapCons<u8>,
    frame_size: usize,
    shared: Arc<LoopbackShared>,
    unlinked: bool,
}

impl StreamDriver for LoopbackOutput {}

impl PlaybackDriver for LoopbackOutput {
    fn pop(&mut self, ctx: &mut StreamContext<'_>, length: usize) -> Option<AudioChunk> {
        let available = self.consumer.occupied_len();
        let length = length.min(available - available % self.frame_size);
        if length == 0 {
            if self.shared.closed.load(Ordering::Acquire) && !self.unlinked && ctx.safe_to_remove()
            {
                self.unlinked = true;
                ctx.post_unlink();
            }
            return None;
        }

        let mut bytes = vec![0u8; length];
        let read = self.consumer.pop_slice(&mut bytes);
        bytes.truncate(read);
        Some(AudioChunk::new(bytes))
    }
}

/// Creates the two drivers of a loopback carrying `spec` audio through a
/// buffer of `buffer` duration.
pub fn loopback_pair(spec: &SampleSpec, buffer: Duration) -> (LoopbackInput, LoopbackOutput) {
    let frame_size = spec.frame_size();
    let capacity = spec.duration_to_bytes(buffer).max(frame_size);
    let (producer, consumer) = HeapRb::<u8>::new(capacity).split();
    let shared = Arc::new(LoopbackShared::default());
    (
        LoopbackInput {
            producer,
            frame_size,
            shared: shared.clone(),
        },
        LoopbackOutput {
            consumer,
            frame_size,
            shared,
            unlinked: false,
        },
    )
}

/// The endpoints of a running loopback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Loopback {
    /// Records from the capture device.
    pub capture: EndpointId,
    /// Plays into the playback device.
    pub playback: EndpointId,
}

/// Forwards `source` into `sink`.
///
/// Unlinking the capture endpoint ends the loopback once the buffered
/// audio was played. Nothing is left registered on failure.
pub fn loopback(
    core: &mut Core,
    source: DeviceId,
    sink: DeviceId,
    buffer: Duration,
) -> Result<Loopback, CoreError> {
    let spec = core.device_spec(sink)?;
    let (input, output) = loopback_pair(&spec, buffer);

    let capture = core.create_endpoint(
        EndpointBuilder::capture(spec, input)
            .device(source)
            .name("loopback"),
    )?;
    let playback = match core.create_endpoint(
        EndpointBuilder::playback(spec, output)
            .device(sink)
            .name("loopback"),
    ) {
        Ok(id) => id,
        Err(e) => {
            core.unlink_endpoint(capture);
            return Err(e);
        }
    };

    if let Err(e) = core
        .put_endpoint(playback)
        .and_then(|()| core.put_endpoint(capture))
    {
        core.unlink_endpoint(capture);
        core.unlink_endpoint(playback);
        return Err(e);
    }

    tracing::info!(%source, %sink, "loopback started");
    Ok(Loopback { capture, playback })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::SampleFormat;
    use crate::pipeline::control_channel;
    use crate::state::EndpointState;

    fn spec() -> SampleSpec {
        SampleSpec::new(SampleFormat::S16NE, 8000, 1).unwrap()
    }

    #[test]
    fn test_pair_forwards_bytes() {
        let spec = spec();
        let (control, _rx) = control_channel();
        let mut ctx = StreamContext::new(EndpointId(0), &spec, EndpointState::Running, true, &control);
        let (mut input, mut output) = loopback_pair(&spec, Duration::from_millis(10));

        input.push(&mut ctx, &AudioChunk::new(vec![1, 2, 3, 4]));
        let chunk = output.pop(&mut ctx, 100).unwrap();
        assert_eq!(chunk.bytes(), &[1, 2, 3, 4]);
        assert!(output.pop(&mut ctx, 100).is_none());
    }

    #[test]
    fn test_overrun_keeps_frames_whole() {
        let spec = spec();
        let (control, _rx) = control_channel();
        let mut ctx = StreamContext::new(EndpointId(0), &spec, EndpointState::Running, true, &control);
        // 1ms at 8kHz mono S16 is 16 bytes
        let (mut input, mut output) = loopback_pair(&spec, Duration::from_millis(1));

        input.push(&mut ctx, &AudioChunk::new(vec![7; 21]));
        let chunk = output.pop(&mut ctx, 100).unwrap();
        assert_eq!(chunk.len(), 16);
        assert_eq!(input.shared.dropped.load(Ordering::Relaxed), 5);
    }

    #[test]
    fn test_output_unlinks_after_input_dropped() {
        let spec = spec();
        let (control, mut rx) = control_channel();
        let mut ctx = StreamContext::new(EndpointId(3), &spec, EndpointState::Running, true, &control);
        let (input, mut output) = loopback_pair(&spec, Duration::from_millis(10));

        assert!(output.pop(&mut ctx, 16).is_none());
        assert!(rx.try_recv().is_none());

        drop(input);
        assert!(output.pop(&mut ctx, 16).is_none());
        assert!(output.pop(&mut ctx, 16).is_none());
        assert!(rx.try_recv().is_some());
        assert!(rx.try_recv().is_none());
    }
}
