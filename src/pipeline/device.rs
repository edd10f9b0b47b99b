//! IO-side half of a device.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use super::endpoint::EndpointIo;
use super::message::{ControlMessage, ControlSender, DeviceMessage, IoReceiver, ReleaseReason};
use crate::chunk::AudioChunk;
use crate::format::{apply_volume, decode_into, encode_into, mix_into, SampleSpec, Volume};
use crate::id::{DeviceId, EndpointId};
use crate::state::{DeviceState, Direction};

/// State the IO side publishes for the control plane without locking.
#[derive(Debug, Default)]
pub(crate) struct DeviceShared {
    pub(crate) latency_ns: AtomicU64,
    /// Zero when no endpoint asked for a latency.
    pub(crate) requested_latency_ns: AtomicU64,
    pub(crate) processed_bytes: AtomicU64,
    pub(crate) max_rewind: AtomicUsize,
}

/// Static properties a device's IO half starts with.
#[derive(Debug, Clone)]
pub(crate) struct DeviceParams {
    pub(crate) direction: Direction,
    pub(crate) spec: SampleSpec,
    pub(crate) volume: Volume,
    pub(crate) muted: bool,
    pub(crate) min_latency: Duration,
    pub(crate) max_latency: Duration,
    pub(crate) max_rewind: usize,
}

/// The IO thread's half of a device.
///
/// A backend owns it on its real-time thread and calls
/// [`render_into`](Self::render_into) (playback) or [`post`](Self::post)
/// (capture) once per hardware cycle. Control-plane changes arrive as
/// messages that are applied at the start of each cycle, so a cycle always
/// sees one consistent snapshot of volumes and attached streams.
///
/// Nothing here blocks or takes a lock.
pub struct DeviceIo {
    id: DeviceId,
    direction: Direction,
    spec: SampleSpec,
    state: DeviceState,
    endpoints: Vec<Box<EndpointIo>>,
    soft_volume: Volume,
    soft_muted: bool,
    max_rewind: usize,
    rewind_nbytes: usize,
    min_latency: Duration,
    max_latency: Duration,
    requested_latency: Option<Duration>,
    inbox: IoReceiver,
    control: ControlSender,
    shared: Arc<DeviceShared>,
    active: Vec<(usize, AudioChunk)>,
    mix: Vec<f32>,
    decoded: Vec<f32>,
}

impl DeviceIo {
    pub(crate) fn new(
        id: DeviceId,
        params: &DeviceParams,
        max_endpoints: usize,
        inbox: IoReceiver,
        control: ControlSender,
        shared: Arc<DeviceShared>,
    ) -> Self {
        shared.max_rewind.store(params.max_rewind, Ordering::Release);
        Self {
            id,
            direction: params.direction,
            spec: params.spec,
            state: DeviceState::Init,
            endpoints: Vec::with_capacity(max_endpoints),
            soft_volume: params.volume,
            soft_muted: params.muted,
            max_rewind: params.max_rewind,
            rewind_nbytes: 0,
            min_latency: params.min_latency,
            max_latency: params.max_latency,
            requested_latency: None,
            inbox,
            control,
            shared,
            active: Vec::with_capacity(max_endpoints),
            mix: Vec::new(),
            decoded: Vec::new(),
        }
    }

    /// The device this half belongs to.
    pub fn id(&self) -> DeviceId {
        self.id
    }

    /// Playback or capture.
    pub fn direction(&self) -> Direction {
        self.direction
    }

    /// The device's sample spec.
    pub fn spec(&self) -> &SampleSpec {
        &self.spec
    }

    /// The IO-side state.
    pub fn state(&self) -> DeviceState {
        self.state
    }

    /// Number of attached endpoints, corked ones included.
    pub fn endpoint_count(&self) -> usize {
        self.endpoints.len()
    }

    /// How far back the hardware can currently rewind, in bytes.
    pub fn max_rewind(&self) -> usize {
        self.max_rewind
    }

    /// The latency attached endpoints asked for, clamped to the device limits.
    pub fn requested_latency(&self) -> Option<Duration> {
        self.requested_latency
    }

    /// Applies every pending control message. Returns how many were applied.
    ///
    /// Called automatically at the start of [`render_into`](Self::render_into)
    /// and [`post`](Self::post).
    pub fn process_messages(&mut self) -> usize {
        let mut handled = 0;
        while let Some(message) = self.inbox.try_recv() {
            self.handle_message(message);
            handled += 1;
        }
        if handled > 0 {
            self.collect_rewind_requests();
        }
        handled
    }

    /// Renders exactly `length` bytes.
    pub fn render(&mut self, length: usize) -> AudioChunk {
        let mut bytes = vec![0u8; length];
        self.render_into(&mut bytes);
        AudioChunk::new(bytes)
    }

    /// Mixes every running endpoint into `out`, filling all of it.
    ///
    /// Endpoints with nothing to give contribute silence. A trailing partial
    /// frame and everything rendered while the device is not opened is
    /// silence.
    pub fn render_into(&mut self, out: &mut [u8]) {
        self.process_messages();

        let frame_size = self.spec.frame_size();
        let silence = self.spec.format.silence_byte();
        let aligned = out.len() - out.len() % frame_size;

        if !self.state.is_opened() || self.direction != Direction::Playback {
            out.fill(silence);
            return;
        }

        for endpoint in &mut self.endpoints {
            endpoint.begin_cycle();
        }

        let mut offset = 0;
        while offset < aligned {
            let want = aligned - offset;
            self.active.clear();
            for (index, endpoint) in self.endpoints.iter_mut().enumerate() {
                if let Some(chunk) = endpoint.peek(want) {
                    self.active.push((index, chunk));
                }
            }

            let length = self
                .active
                .iter()
                .map(|(_, chunk)| chunk.len())
                .min()
                .unwrap_or(0);
            let length = length - length % frame_size;
            if length == 0 {
                break;
            }

            self.mix(&mut out[offset..offset + length]);
            for (index, _) in &self.active {
                self.endpoints[*index].consume(length);
            }
            offset += length;
        }
        out[offset..].fill(silence);

        self.active.clear();
        self.collect_rewind_requests();
        self.shared
            .processed_bytes
            .fetch_add(out.len() as u64, Ordering::Relaxed);
    }

    /// Delivers one captured chunk to every running capture endpoint.
    pub fn post(&mut self, chunk: &AudioChunk) {
        self.process_messages();
        if !self.state.is_opened() || self.direction != Direction::Capture {
            return;
        }

        let gain = if self.soft_muted {
            None
        } else {
            Some(self.soft_volume)
        };
        for endpoint in &mut self.endpoints {
            endpoint.push(chunk, gain.as_ref());
        }

        self.collect_rewind_requests();
        self.shared
            .processed_bytes
            .fetch_add(chunk.len() as u64, Ordering::Relaxed);
    }

    /// Takes the rewind accumulated during this cycle, clamped to `max_rewind`.
    pub fn take_rewind_request(&mut self) -> usize {
        std::mem::take(&mut self.rewind_nbytes)
    }

    /// The hardware rewound `nbytes` bytes; every attached endpoint replays
    /// or rewrites its share exactly once.
    pub fn process_rewind(&mut self, nbytes: usize) {
        self.rewind_nbytes = 0;
        tracing::trace!(device = %self.id, nbytes, "processing rewind");
        for endpoint in &mut self.endpoints {
            endpoint.process_rewind(nbytes);
        }
        self.collect_rewind_requests();
    }

    /// Services the pending rewind request in full, as a virtual device
    /// whose output can always be taken back. Returns the bytes rewound.
    pub fn service_rewind(&mut self) -> usize {
        let nbytes = self.take_rewind_request();
        if nbytes > 0 {
            self.process_rewind(nbytes);
        }
        nbytes
    }

    /// Sets how far back the hardware can rewind and tells every endpoint.
    pub fn set_max_rewind(&mut self, nbytes: usize) {
        let nbytes = self.spec.frame_align(nbytes);
        if nbytes == self.max_rewind {
            return;
        }
        self.max_rewind = nbytes;
        self.rewind_nbytes = self.rewind_nbytes.min(nbytes);
        self.shared.max_rewind.store(nbytes, Ordering::Release);
        for endpoint in &mut self.endpoints {
            endpoint.update_max_rewind(nbytes);
        }
    }

    /// Publishes the current hardware latency for the control plane.
    pub fn set_latency(&self, latency: Duration) {
        let nanos = u64::try_from(latency.as_nanos()).unwrap_or(u64::MAX);
        self.shared.latency_ns.store(nanos, Ordering::Release);
    }

    fn request_rewind(&mut self, nbytes: usize) {
        if !self.state.is_opened() || nbytes == 0 {
            return;
        }
        self.rewind_nbytes = self.rewind_nbytes.max(nbytes).min(self.max_rewind);
    }

    fn collect_rewind_requests(&mut self) {
        let max_rewind = self.max_rewind;
        let mut wanted = 0;
        for endpoint in &mut self.endpoints {
            if let Some(request) = endpoint.take_deferred_rewind() {
                wanted = wanted.max(endpoint.request_rewind(request, max_rewind));
            }
        }
        self.request_rewind(wanted);
    }

    fn endpoint_mut(&mut self, id: EndpointId) -> Option<&mut EndpointIo> {
        self.endpoints
            .iter_mut()
            .find(|endpoint| endpoint.id() == id)
            .map(|endpoint| &mut **endpoint)
    }

    fn handle_message(&mut self, message: DeviceMessage) {
        match message {
            DeviceMessage::AddEndpoint {
                mut endpoint,
                state,
            } => {
                if endpoint.direction() != self.direction {
                    tracing::error!(device = %self.id, endpoint = %endpoint.id(), "endpoint direction mismatch");
                    self.release(endpoint, ReleaseReason::Unlink);
                    return;
                }
                endpoint.attach(self.max_rewind);
                endpoint.set_state(state);
                self.endpoints.push(endpoint);
                self.update_requested_latency();
            }
            DeviceMessage::RemoveEndpoint { endpoint, reason } => {
                if let Some(pos) = self.endpoints.iter().position(|e| e.id() == endpoint) {
                    let mut removed = self.endpoints.swap_remove(pos);
                    removed.detach();
                    self.release(removed, reason);
                    self.update_requested_latency();
                }
            }
            DeviceMessage::SetEndpointState { endpoint, state } => {
                if let Some(e) = self.endpoint_mut(endpoint) {
                    e.set_state(state);
                }
            }
            DeviceMessage::SetEndpointVolume { endpoint, volume } => {
                if let Some(e) = self.endpoint_mut(endpoint) {
                    e.set_volume(volume);
                }
            }
            DeviceMessage::SetEndpointMute { endpoint, muted } => {
                if let Some(e) = self.endpoint_mut(endpoint) {
                    e.set_mute(muted);
                }
            }
            DeviceMessage::SetEndpointLatency { endpoint, latency } => {
                if let Some(e) = self.endpoint_mut(endpoint) {
                    e.set_requested_latency(latency);
                    self.update_requested_latency();
                }
            }
            DeviceMessage::RequestRewind {
                endpoint,
                nbytes,
                ignore_current_rewind,
                not_here,
            } => {
                let max_rewind = self.max_rewind;
                let request = crate::driver::RewindRequest {
                    nbytes,
                    ignore_current_rewind,
                    not_here,
                };
                if let Some(e) = self.endpoint_mut(endpoint) {
                    let wanted = e.request_rewind(request, max_rewind);
                    self.request_rewind(wanted);
                }
            }
            DeviceMessage::SetVolume(volume) => self.soft_volume = volume,
            DeviceMessage::SetMute(muted) => self.soft_muted = muted,
            DeviceMessage::SetState(state) => self.set_state(state),
        }
    }

    fn set_state(&mut self, state: DeviceState) {
        self.state = state;
        match state {
            DeviceState::Suspended => {
                self.rewind_nbytes = 0;
                self.shared.latency_ns.store(0, Ordering::Release);
            }
            DeviceState::Unlinked => {
                for mut endpoint in std::mem::take(&mut self.endpoints) {
                    endpoint.detach();
                    self.release(endpoint, ReleaseReason::Unlink);
                }
            }
            _ => {}
        }
    }

    fn release(&self, endpoint: Box<EndpointIo>, reason: ReleaseReason) {
        self.control.send(ControlMessage::EndpointReleased {
            device: self.id,
            endpoint,
            reason,
        });
    }

    fn update_requested_latency(&mut self) {
        let latency = self
            .endpoints
            .iter()
            .filter_map(|endpoint| endpoint.requested_latency())
            .min()
            .map(|latency| latency.clamp(self.min_latency, self.max_latency));
        if latency == self.requested_latency {
            return;
        }
        self.requested_latency = latency;
        let nanos = latency.map_or(0, |l| u64::try_from(l.as_nanos()).unwrap_or(u64::MAX));
        self.shared
            .requested_latency_ns
            .store(nanos, Ordering::Release);
        self.control.send(ControlMessage::LatencyChanged {
            device: self.id,
            latency,
        });
    }

    fn mix(&mut self, out: &mut [u8]) {
        let length = out.len();
        let device_gain = if self.soft_muted {
            None
        } else {
            Some(self.soft_volume)
        };

        if let [(index, chunk)] = self.active.as_slice() {
            let stream_norm = self.endpoints[*index]
                .mix_volume()
                .is_some_and(Volume::is_norm);
            if stream_norm && device_gain.is_some_and(|gain| gain.is_norm()) {
                out.copy_from_slice(&chunk.bytes()[..length]);
                return;
            }
        }

        let Some(device_gain) = device_gain else {
            out.fill(self.spec.format.silence_byte());
            return;
        };

        self.mix.clear();
        self.mix.resize(length / self.spec.format.sample_size(), 0.0);
        for (index, chunk) in &self.active {
            let Some(volume) = self.endpoints[*index].mix_volume() else {
                continue;
            };
            decode_into(self.spec.format, &chunk.bytes()[..length], &mut self.decoded);
            mix_into(&mut self.mix, &self.decoded, volume);
        }
        apply_volume(&mut self.mix, &device_gain);
        encode_into(self.spec.format, &self.mix, out);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::SampleFormat;
    use crate::pipeline::message::{control_channel, io_channel};

    fn device(state: DeviceState) -> (DeviceIo, crate::pipeline::message::IoSender) {
        let spec = SampleSpec::new(SampleFormat::U8, 8000, 1).unwrap();
        let params = DeviceParams {
            direction: Direction::Playback,
            spec,
            volume: Volume::norm(1),
            muted: false,
            min_latency: Duration::from_millis(1),
            max_latency: Duration::from_secs(2),
            max_rewind: 64,
        };
        let (mut tx, rx) = io_channel(DeviceId(0), 8);
        let (control, _) = control_channel();
        let io = DeviceIo::new(DeviceId(0), &params, 4, rx, control, Arc::default());
        tx.send(DeviceMessage::SetState(state)).unwrap();
        (io, tx)
    }

    #[test]
    fn test_render_without_endpoints_is_silence() {
        let (mut io, _tx) = device(DeviceState::Idle);
        let chunk = io.render(100);
        assert_eq!(chunk.len(), 100);
        assert!(chunk.bytes().iter().all(|&b| b == 0x80));
        assert_eq!(io.state(), DeviceState::Idle);
    }

    #[test]
    fn test_render_while_suspended_is_silence() {
        let (mut io, _tx) = device(DeviceState::Suspended);
        let mut out = [1u8; 10];
        io.render_into(&mut out);
        assert_eq!(out, [0x80; 10]);
    }

    #[test]
    fn test_max_rewind_is_frame_aligned() {
        let (mut io, _tx) = device(DeviceState::Idle);
        io.process_messages();
        io.set_max_rewind(4096);
        assert_eq!(io.max_rewind(), 4096);
        assert_eq!(io.shared.max_rewind.load(Ordering::Acquire), 4096);
    }

    #[test]
    fn test_rewind_requests_ignored_when_not_opened() {
        let (mut io, _tx) = device(DeviceState::Suspended);
        io.process_messages();
        io.request_rewind(32);
        assert_eq!(io.take_rewind_request(), 0);
    }

    #[test]
    fn test_rewind_request_clamped_to_max_rewind() {
        let (mut io, _tx) = device(DeviceState::Idle);
        io.process_messages();
        io.request_rewind(1000);
        assert_eq!(io.take_rewind_request(), 64);
        assert_eq!(io.take_rewind_request(), 0);
    }
}
