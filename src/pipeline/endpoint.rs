//! IO-side half of a stream endpoint.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use super::message::{ControlMessage, ControlSender};
use super::queue::{RewindableQueue, QUEUE_MAX_LENGTH};
use crate::chunk::AudioChunk;
use crate::driver::{DriverSlot, RewindRequest, StreamContext};
use crate::format::{apply_volume, decode_into, encode_to_vec, Resampler, SampleSpec, Volume};
use crate::id::EndpointId;
use crate::state::{Direction, EndpointFlags, EndpointState};
use crate::CoreError;

/// State the IO side publishes for the control plane without locking.
#[derive(Debug, Default)]
pub(crate) struct EndpointShared {
    /// Set when the driver had nothing to give, cleared when it produces again.
    pub(crate) drained: AtomicBool,
    /// Unread bytes in the render queue, in the device's spec.
    pub(crate) buffered: AtomicUsize,
}

/// The IO thread's copy of a stream endpoint.
///
/// Owned by exactly one device at a time. It travels between the control
/// plane and devices inside messages and is never shared.
pub(crate) struct EndpointIo {
    id: EndpointId,
    driver: DriverSlot,
    flags: EndpointFlags,
    state: EndpointState,
    spec: SampleSpec,
    device_spec: SampleSpec,
    resampler: Option<Resampler>,
    /// Endpoint volume in the endpoint's channel layout.
    volume: Volume,
    /// `volume` remapped to the device's channel layout.
    mix_volume: Volume,
    muted: bool,
    /// Rendered audio in the device's spec. History is what the device
    /// already played and may be asked to replay.
    render_queue: RewindableQueue,
    rewrite_nbytes: usize,
    ignore_rewind: bool,
    requested_latency: Option<Duration>,
    /// The driver returned nothing during the current cycle.
    exhausted: bool,
    deferred_rewind: Option<RewindRequest>,
    scratch: Vec<f32>,
    shared: Arc<EndpointShared>,
    control: ControlSender,
}

impl EndpointIo {
    pub(crate) fn new(
        id: EndpointId,
        driver: DriverSlot,
        spec: SampleSpec,
        flags: EndpointFlags,
        shared: Arc<EndpointShared>,
        control: ControlSender,
    ) -> Self {
        Self {
            id,
            driver,
            flags,
            state: EndpointState::Init,
            spec,
            device_spec: spec,
            resampler: None,
            volume: Volume::norm(spec.channels),
            mix_volume: Volume::norm(spec.channels),
            muted: false,
            render_queue: RewindableQueue::new(spec.frame_size(), QUEUE_MAX_LENGTH, 0),
            rewrite_nbytes: 0,
            ignore_rewind: false,
            requested_latency: None,
            exhausted: false,
            deferred_rewind: None,
            scratch: Vec::new(),
            shared,
            control,
        }
    }

    pub(crate) fn id(&self) -> EndpointId {
        self.id
    }

    pub(crate) fn direction(&self) -> Direction {
        self.driver.direction()
    }

    pub(crate) fn state(&self) -> EndpointState {
        self.state
    }

    pub(crate) fn is_running(&self) -> bool {
        self.state == EndpointState::Running
    }

    pub(crate) fn requested_latency(&self) -> Option<Duration> {
        self.requested_latency
    }

    /// Points the endpoint at a device with `device_spec`.
    ///
    /// Unread rendered audio is carried over when the device spec is
    /// unchanged and `keep_buffered` is set. Otherwise the driver is asked
    /// to produce it again.
    pub(crate) fn retarget(
        &mut self,
        device_spec: SampleSpec,
        keep_buffered: bool,
    ) -> Result<(), CoreError> {
        let resampler = match self.direction() {
            Direction::Playback => Resampler::between(self.spec, device_spec, self.flags)?,
            Direction::Capture => Resampler::between(device_spec, self.spec, self.flags)?,
        };
        let mut queue = RewindableQueue::new(device_spec.frame_size(), QUEUE_MAX_LENGTH, 0);

        if keep_buffered && device_spec == self.device_spec {
            while let Some(chunk) = self.render_queue.peek() {
                self.render_queue.drop(chunk.len());
                if queue.push(chunk).is_err() {
                    break;
                }
            }
        } else {
            let unread = self.render_queue.discard_unread();
            if unread > 0 {
                let nbytes = self.device_spec.convert_bytes(unread, &self.spec);
                let mut ctx =
                    StreamContext::new(self.id, &self.spec, self.state, true, &self.control);
                self.driver.process_rewind(&mut ctx, nbytes);
                self.deferred_rewind = ctx.take_rewind().or(self.deferred_rewind);
            }
        }

        self.render_queue = queue;
        self.device_spec = device_spec;
        self.resampler = resampler;
        self.mix_volume = self.volume.remap(device_spec.channels);
        self.rewrite_nbytes = 0;
        self.ignore_rewind = false;
        self.publish_buffered();
        Ok(())
    }

    /// Copies control-side settings into the IO copy before an attach.
    pub(crate) fn sync(&mut self, volume: Volume, muted: bool, latency: Option<Duration>) {
        self.set_volume(volume);
        self.muted = muted;
        self.requested_latency = latency;
    }

    pub(crate) fn attach(&mut self, max_rewind: usize) {
        self.render_queue.set_max_rewind(max_rewind);
        let nbytes = self.device_spec.convert_bytes(max_rewind, &self.spec);
        let safe_to_remove = self.safe_to_remove();
        let mut ctx =
            StreamContext::new(self.id, &self.spec, self.state, safe_to_remove, &self.control);
        self.driver.attach(&mut ctx);
        self.driver.update_max_rewind(&mut ctx, nbytes);
        let request = ctx.take_rewind();
        self.defer(request);
    }

    pub(crate) fn detach(&mut self) {
        let safe_to_remove = self.safe_to_remove();
        let mut ctx =
            StreamContext::new(self.id, &self.spec, self.state, safe_to_remove, &self.control);
        self.driver.detach(&mut ctx);
    }

    pub(crate) fn set_state(&mut self, state: EndpointState) {
        if state == self.state {
            return;
        }
        let safe_to_remove = self.safe_to_remove();
        let mut ctx =
            StreamContext::new(self.id, &self.spec, self.state, safe_to_remove, &self.control);
        self.driver.state_change(&mut ctx, state);
        let request = ctx.take_rewind();
        self.defer(request);

        self.state = state;
        if state != EndpointState::Running {
            self.shared.drained.store(false, Ordering::Release);
        }
    }

    pub(crate) fn set_volume(&mut self, volume: Volume) {
        self.volume = volume;
        self.mix_volume = volume.remap(self.device_spec.channels);
    }

    pub(crate) fn set_mute(&mut self, muted: bool) {
        self.muted = muted;
    }

    pub(crate) fn set_requested_latency(&mut self, latency: Option<Duration>) {
        self.requested_latency = latency;
    }

    /// Gain to mix with, in the device's channel layout. `None` when muted.
    pub(crate) fn mix_volume(&self) -> Option<&Volume> {
        if self.muted || self.mix_volume.is_muted() {
            None
        } else {
            Some(&self.mix_volume)
        }
    }

    /// Starts a new render cycle.
    pub(crate) fn begin_cycle(&mut self) {
        self.exhausted = false;
    }

    /// Returns up to `length` bytes of rendered audio in the device's spec.
    ///
    /// Pulls from the driver only when the render queue is empty. A driver
    /// that has nothing is not asked again until the next cycle.
    pub(crate) fn peek(&mut self, length: usize) -> Option<AudioChunk> {
        if !self.is_running() || length == 0 {
            return None;
        }

        if self.render_queue.is_empty() {
            if self.exhausted {
                return None;
            }
            let chunk = self.pull(length)?;
            if let Err(e) = self.render_queue.push(chunk) {
                tracing::warn!(endpoint = %self.id, error = %e, "dropping rendered audio");
                self.exhausted = true;
                return None;
            }
        }

        let chunk = self.render_queue.peek()?;
        Some(chunk.slice(0, length))
    }

    fn pull(&mut self, length: usize) -> Option<AudioChunk> {
        let request = match &self.resampler {
            Some(resampler) => resampler.request(length),
            None => length,
        };
        let request = self.spec.frame_align(request).max(self.spec.frame_size());

        let safe_to_remove = self.safe_to_remove();
        let mut ctx =
            StreamContext::new(self.id, &self.spec, self.state, safe_to_remove, &self.control);
        let popped = match &mut self.driver {
            DriverSlot::Playback(driver) => driver.pop(&mut ctx, request),
            DriverSlot::Capture(_) => None,
        };
        let deferred = ctx.take_rewind();
        self.defer(deferred);

        let chunk = popped
            .map(|chunk| chunk.slice(0, self.spec.frame_align(chunk.len())))
            .filter(|chunk| !chunk.is_empty());

        let Some(chunk) = chunk else {
            self.exhausted = true;
            if !self.shared.drained.swap(true, Ordering::AcqRel) {
                self.control
                    .send(ControlMessage::EndpointDrained { endpoint: self.id });
            }
            return None;
        };

        self.shared.drained.store(false, Ordering::Release);
        Some(match &mut self.resampler {
            Some(resampler) => resampler.run(&chunk),
            None => chunk,
        })
    }

    /// Consumes `length` bytes the device has played.
    pub(crate) fn consume(&mut self, length: usize) {
        self.render_queue.drop(length);
        self.publish_buffered();
    }

    /// Records a rewind request. Returns the device-side bytes the device
    /// should rewind, clamped to `max_rewind`.
    pub(crate) fn request_rewind(&mut self, request: RewindRequest, max_rewind: usize) -> usize {
        if self.state == EndpointState::Corked {
            return 0;
        }
        let nbytes = if request.nbytes == 0 {
            max_rewind
        } else {
            self.spec
                .convert_bytes(request.nbytes, &self.device_spec)
                .min(max_rewind)
        };
        if request.ignore_current_rewind {
            self.ignore_rewind = true;
        }
        if !request.not_here {
            self.rewrite_nbytes = self.rewrite_nbytes.max(nbytes);
        }
        nbytes
    }

    /// The device rewound `nbytes` bytes of already played audio.
    pub(crate) fn process_rewind(&mut self, nbytes: usize) {
        let rewrite = std::mem::take(&mut self.rewrite_nbytes);
        let ignore = std::mem::take(&mut self.ignore_rewind);

        if nbytes > 0 && !ignore {
            let rewound = self.render_queue.rewind(nbytes);
            tracing::trace!(endpoint = %self.id, rewound, "replaying render history");
        }

        if rewrite > 0 || ignore {
            // a rewrite only replaces the newest `rewrite` bytes, stale data goes entirely
            let discarded = if ignore {
                self.render_queue.discard_unread()
            } else {
                self.render_queue.truncate(rewrite)
            };
            if rewrite > 0 && discarded > 0 {
                let nbytes = self.device_spec.convert_bytes(discarded, &self.spec);
                tracing::trace!(endpoint = %self.id, discarded, "rewriting render queue");
                let safe_to_remove = self.safe_to_remove();
                let mut ctx = StreamContext::new(
                    self.id,
                    &self.spec,
                    self.state,
                    safe_to_remove,
                    &self.control,
                );
                self.driver.process_rewind(&mut ctx, nbytes);
                let request = ctx.take_rewind();
                self.defer(request);
            }
        }
        self.publish_buffered();
    }

    /// The device can now rewind at most `nbytes` bytes.
    pub(crate) fn update_max_rewind(&mut self, nbytes: usize) {
        self.render_queue.set_max_rewind(nbytes);
        let converted = self.device_spec.convert_bytes(nbytes, &self.spec);
        let safe_to_remove = self.safe_to_remove();
        let mut ctx =
            StreamContext::new(self.id, &self.spec, self.state, safe_to_remove, &self.control);
        self.driver.update_max_rewind(&mut ctx, converted);
    }

    /// Delivers captured audio (device spec) to the driver.
    pub(crate) fn push(&mut self, chunk: &AudioChunk, device_volume: Option<&Volume>) {
        if !self.is_running() {
            return;
        }

        let gain = match (device_volume, self.mix_volume()) {
            (Some(device), Some(own)) => Some(own.multiply(device)),
            _ => None,
        };
        let scaled = match gain {
            None => AudioChunk::silence(&self.device_spec, chunk.len()),
            Some(gain) if gain.is_norm() => chunk.clone(),
            Some(gain) => {
                decode_into(self.device_spec.format, chunk.bytes(), &mut self.scratch);
                apply_volume(&mut self.scratch, &gain);
                AudioChunk::new(encode_to_vec(self.device_spec.format, &self.scratch))
            }
        };
        let converted = match &mut self.resampler {
            Some(resampler) => resampler.run(&scaled),
            None => scaled,
        };

        let mut ctx = StreamContext::new(self.id, &self.spec, self.state, true, &self.control);
        if let DriverSlot::Capture(driver) = &mut self.driver {
            driver.push(&mut ctx, &converted);
        }
    }

    /// Returns `true` if unlinking now would lose no rendered audio.
    pub(crate) fn safe_to_remove(&self) -> bool {
        self.render_queue.is_empty() && self.rewrite_nbytes == 0
    }

    pub(crate) fn take_deferred_rewind(&mut self) -> Option<RewindRequest> {
        self.deferred_rewind.take()
    }

    fn defer(&mut self, request: Option<RewindRequest>) {
        if request.is_some() {
            self.deferred_rewind = request;
        }
    }

    fn publish_buffered(&self) {
        self.shared
            .buffered
            .store(self.render_queue.length(), Ordering::Release);
    }
}
