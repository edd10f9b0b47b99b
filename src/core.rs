//! The control plane.

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use crate::builder::{DeviceBuilder, EndpointBuilder};
use crate::config::{CoreConfig, MAX_ENDPOINTS_PER_DEVICE};
use crate::driver::{DeviceControl, StreamControl};
use crate::event::{CoreEvent, EventCallback, VolumeTarget};
use crate::format::{Resampler, SampleSpec, Volume};
use crate::id::{DeviceId, EndpointId};
use crate::pipeline::{
    control_channel, io_channel, ControlMessage, ControlReceiver, ControlSender, DeviceIo,
    DeviceMessage, DeviceParams, DeviceShared, EndpointIo, EndpointShared, IoSender,
    ReleaseReason,
};
use crate::state::{DeviceState, Direction, EndpointFlags, EndpointState};
use crate::CoreError;

/// Snapshot of a device's control-side state.
#[derive(Debug, Clone)]
pub struct DeviceInfo {
    /// The device.
    pub id: DeviceId,
    /// Unique name.
    pub name: String,
    /// Human readable description.
    pub description: String,
    /// Playback or capture.
    pub direction: Direction,
    /// Sample spec.
    pub spec: SampleSpec,
    /// Control-side state.
    pub state: DeviceState,
    /// Current volume.
    pub volume: Volume,
    /// Current mute flag.
    pub muted: bool,
    /// Linked endpoints.
    pub endpoints: Vec<EndpointId>,
}

/// Control copy of a device.
struct DeviceHandle {
    name: String,
    description: String,
    direction: Direction,
    spec: SampleSpec,
    state: DeviceState,
    volume: Volume,
    muted: bool,
    endpoints: BTreeSet<EndpointId>,
    io: IoSender,
    /// Structural messages that did not fit in the ring yet.
    backlog: VecDeque<DeviceMessage>,
    shared: Arc<DeviceShared>,
    control: Option<Box<dyn DeviceControl>>,
}

impl DeviceHandle {
    /// Sends a message that may fail with [`CoreError::IoQueueFull`].
    fn send(&mut self, message: DeviceMessage) -> Result<(), CoreError> {
        self.flush();
        if self.backlog.is_empty() {
            self.io.send(message)
        } else {
            Err(CoreError::IoQueueFull {
                device: self.io_device(),
            })
        }
    }

    /// Sends a message that must arrive, parking it until the ring has room.
    fn post(&mut self, message: DeviceMessage) {
        self.flush();
        if !self.backlog.is_empty() {
            self.backlog.push_back(message);
            return;
        }
        if let Err(message) = self.io.try_send(message) {
            tracing::warn!(device = %self.io_device(), "message queue full, deferring");
            self.backlog.push_back(message);
        }
    }

    fn flush(&mut self) {
        while let Some(message) = self.backlog.pop_front() {
            if let Err(message) = self.io.try_send(message) {
                self.backlog.push_front(message);
                break;
            }
        }
    }

    fn io_device(&self) -> DeviceId {
        self.io.device()
    }
}

/// Control copy of a stream endpoint.
struct EndpointHandle {
    device: DeviceId,
    direction: Direction,
    spec: SampleSpec,
    flags: EndpointFlags,
    state: EndpointState,
    volume: Volume,
    muted: bool,
    requested_latency: Option<Duration>,
    properties: BTreeMap<String, String>,
    shared: Arc<EndpointShared>,
    control: Option<Box<dyn StreamControl>>,
    /// The IO half until the endpoint is put.
    io: Option<Box<EndpointIo>>,
}

/// Registry of devices and stream endpoints.
///
/// `Core` is the single owner of all control copies. Every method runs in
/// the control context and never waits on an IO thread: changes reach a
/// device's IO half as messages, and whatever the IO side reports back is
/// applied by [`dispatch_pending`](Self::dispatch_pending) or
/// [`process_next`](Self::process_next).
///
/// # Example
///
/// ```
/// use stream_core::{Core, DeviceBuilder, EndpointBuilder, MockStream, SampleSpec};
///
/// let mut core = Core::default();
/// let (sink, mut io) = core.create_device(DeviceBuilder::playback("out"))?;
/// core.put_device(sink)?;
///
/// let spec = SampleSpec::default();
/// let stream = core.create_endpoint(EndpointBuilder::playback(spec, MockStream::sine(spec, 440.0)))?;
/// core.put_endpoint(stream)?;
///
/// // On the device's IO thread:
/// let chunk = io.render(4096);
/// assert_eq!(chunk.len(), 4096);
/// # Ok::<(), stream_core::CoreError>(())
/// ```
pub struct Core {
    config: CoreConfig,
    devices: BTreeMap<DeviceId, DeviceHandle>,
    /// Unlinked devices whose final messages are still parked.
    closing: Vec<DeviceHandle>,
    endpoints: BTreeMap<EndpointId, EndpointHandle>,
    next_device: u32,
    next_endpoint: u32,
    default_sink: Option<DeviceId>,
    default_source: Option<DeviceId>,
    control_tx: ControlSender,
    control_rx: ControlReceiver,
    event_callback: Option<EventCallback>,
}

impl Default for Core {
    fn default() -> Self {
        Self::new(CoreConfig::default())
    }
}

impl Core {
    /// Creates an empty core.
    pub fn new(config: CoreConfig) -> Self {
        let (control_tx, control_rx) = control_channel();
        Self {
            config,
            devices: BTreeMap::new(),
            closing: Vec::new(),
            endpoints: BTreeMap::new(),
            next_device: 0,
            next_endpoint: 0,
            default_sink: None,
            default_source: None,
            control_tx,
            control_rx,
            event_callback: None,
        }
    }

    /// The configuration this core was created with.
    pub fn config(&self) -> &CoreConfig {
        &self.config
    }

    /// Registers a callback for [`CoreEvent`]s, replacing any previous one.
    pub fn on_event(&mut self, callback: EventCallback) {
        self.event_callback = Some(callback);
    }

    fn emit(&self, event: CoreEvent) {
        if let Some(callback) = &self.event_callback {
            callback(event);
        }
    }

    // ---------------------------------------------------------------------
    // Devices
    // ---------------------------------------------------------------------

    /// Registers a device and returns its IO half for the backend to drive.
    ///
    /// The device stays invisible to streams until [`put_device`](Self::put_device).
    pub fn create_device(
        &mut self,
        builder: DeviceBuilder,
    ) -> Result<(DeviceId, DeviceIo), CoreError> {
        if self.devices.values().any(|d| d.name == builder.name) {
            return Err(CoreError::DeviceNameTaken { name: builder.name });
        }

        let spec = builder.spec.unwrap_or(self.config.default_spec);
        spec.validate()?;
        let volume = builder.volume.unwrap_or_else(|| Volume::norm(spec.channels));
        check_volume(&volume, &spec)?;

        let (min_latency, max_latency) = builder
            .latency_range
            .unwrap_or((self.config.min_latency, self.config.max_latency));
        let max_rewind = spec.frame_align(
            builder
                .max_rewind
                .unwrap_or_else(|| spec.duration_to_bytes(self.config.max_rewind)),
        );

        let mut control = builder.control;
        let hw_volume = control.as_mut().is_some_and(|c| c.set_volume(&volume));
        let hw_mute = control.as_mut().is_some_and(|c| c.set_mute(builder.muted));

        let id = DeviceId(self.next_device);
        self.next_device += 1;

        let params = DeviceParams {
            direction: builder.direction,
            spec,
            volume: if hw_volume { Volume::norm(spec.channels) } else { volume },
            muted: builder.muted && !hw_mute,
            min_latency,
            max_latency,
            max_rewind,
        };
        let (io_tx, io_rx) = io_channel(id, self.config.io_queue_capacity);
        let shared = Arc::new(DeviceShared::default());
        let io = DeviceIo::new(
            id,
            &params,
            MAX_ENDPOINTS_PER_DEVICE,
            io_rx,
            self.control_tx.clone(),
            shared.clone(),
        );

        let description = builder.description.unwrap_or_else(|| builder.name.clone());
        tracing::debug!(device = %id, name = %builder.name, %spec, "created device");
        self.devices.insert(
            id,
            DeviceHandle {
                name: builder.name,
                description,
                direction: builder.direction,
                spec,
                state: DeviceState::Init,
                volume,
                muted: builder.muted,
                endpoints: BTreeSet::new(),
                io: io_tx,
                backlog: VecDeque::new(),
                shared,
                control,
            },
        );
        Ok((id, io))
    }

    /// Makes a created device visible and starts it idle.
    ///
    /// The first device of a direction becomes its default.
    pub fn put_device(&mut self, id: DeviceId) -> Result<(), CoreError> {
        let device = self.device_mut(id)?;
        if device.state != DeviceState::Init {
            return Ok(());
        }
        let direction = device.direction;
        if let Some(control) = device.control.as_mut() {
            control
                .set_state(DeviceState::Idle)
                .map_err(|reason| CoreError::StateChangeRefused { device: id, reason })?;
        }
        device.state = DeviceState::Idle;
        device.post(DeviceMessage::SetState(DeviceState::Idle));
        tracing::info!(device = %id, name = %device.name, %direction, "device linked");

        self.emit(CoreEvent::DeviceAdded {
            device: id,
            direction,
        });
        if self.default_device(direction).is_none() {
            self.update_default(direction, Some(id));
        }
        Ok(())
    }

    /// Removes a device, unlinking every stream endpoint that targets it.
    ///
    /// Returns `false` if the device was already gone.
    pub fn unlink_device(&mut self, id: DeviceId) -> bool {
        if !self.devices.contains_key(&id) {
            return false;
        }

        let doomed: Vec<EndpointId> = self
            .endpoints
            .iter()
            .filter(|(_, e)| e.device == id)
            .map(|(endpoint, _)| *endpoint)
            .collect();
        for endpoint in doomed {
            self.kill_endpoint(endpoint);
        }

        let Some(mut device) = self.devices.remove(&id) else {
            return false;
        };
        if let Some(control) = device.control.as_mut() {
            if let Err(reason) = control.set_state(DeviceState::Unlinked) {
                tracing::warn!(device = %id, %reason, "backend objected to unlink");
            }
        }
        device.post(DeviceMessage::SetState(DeviceState::Unlinked));
        tracing::info!(device = %id, name = %device.name, "device unlinked");

        let direction = device.direction;
        if !device.backlog.is_empty() {
            tracing::debug!(device = %id, parked = device.backlog.len(), "keeping unlinked device until its queue drains");
            self.closing.push(device);
        }

        if self.default_device(direction) == Some(id) {
            let next = self
                .devices
                .iter()
                .find(|(_, d)| d.direction == direction && d.state.is_linked())
                .map(|(next, _)| *next);
            self.update_default(direction, next);
        }
        self.emit(CoreEvent::DeviceRemoved { device: id });
        true
    }

    /// Ids of all registered devices.
    pub fn devices(&self) -> Vec<DeviceId> {
        self.devices.keys().copied().collect()
    }

    /// Looks up a device by name.
    pub fn find_device(&self, name: &str) -> Option<DeviceId> {
        self.devices
            .iter()
            .find(|(_, d)| d.name == name)
            .map(|(id, _)| *id)
    }

    /// Snapshot of a device.
    pub fn device_info(&self, id: DeviceId) -> Result<DeviceInfo, CoreError> {
        let device = self.device(id)?;
        Ok(DeviceInfo {
            id,
            name: device.name.clone(),
            description: device.description.clone(),
            direction: device.direction,
            spec: device.spec,
            state: device.state,
            volume: device.volume,
            muted: device.muted,
            endpoints: device.endpoints.iter().copied().collect(),
        })
    }

    /// Control-side state of a device.
    pub fn device_state(&self, id: DeviceId) -> Result<DeviceState, CoreError> {
        Ok(self.device(id)?.state)
    }

    /// Sample spec of a device.
    pub fn device_spec(&self, id: DeviceId) -> Result<SampleSpec, CoreError> {
        Ok(self.device(id)?.spec)
    }

    /// Sets a device's volume. Applied in hardware if the backend supports it.
    pub fn set_device_volume(&mut self, id: DeviceId, volume: Volume) -> Result<(), CoreError> {
        let device = self.device_mut(id)?;
        check_volume(&volume, &device.spec)?;
        let channels = device.spec.channels;
        let in_hardware = device
            .control
            .as_mut()
            .is_some_and(|c| c.set_volume(&volume));
        let soft = if in_hardware {
            Volume::norm(channels)
        } else {
            volume
        };
        device.send(DeviceMessage::SetVolume(soft))?;
        device.volume = volume;
        let muted = device.muted;
        self.emit(CoreEvent::VolumeChanged {
            target: VolumeTarget::Device(id),
            volume,
            muted,
        });
        Ok(())
    }

    /// A device's volume as last set.
    pub fn device_volume(&self, id: DeviceId) -> Result<Volume, CoreError> {
        Ok(self.device(id)?.volume)
    }

    /// Mutes or unmutes a device.
    pub fn set_device_mute(&mut self, id: DeviceId, muted: bool) -> Result<(), CoreError> {
        let device = self.device_mut(id)?;
        let in_hardware = device.control.as_mut().is_some_and(|c| c.set_mute(muted));
        device.send(DeviceMessage::SetMute(muted && !in_hardware))?;
        device.muted = muted;
        let volume = device.volume;
        self.emit(CoreEvent::VolumeChanged {
            target: VolumeTarget::Device(id),
            volume,
            muted,
        });
        Ok(())
    }

    /// A device's mute flag as last set.
    pub fn device_muted(&self, id: DeviceId) -> Result<bool, CoreError> {
        Ok(self.device(id)?.muted)
    }

    /// Suspends or resumes a device.
    ///
    /// Refused with [`CoreError::Busy`] when a running stream cannot
    /// tolerate a pause, or with [`CoreError::StateChangeRefused`] when the
    /// backend vetoes it.
    pub fn suspend_device(&mut self, id: DeviceId, suspend: bool) -> Result<(), CoreError> {
        let device = self.device(id)?;
        if !device.state.is_linked() {
            return Err(CoreError::DeviceNotLinked { device: id });
        }
        if (device.state == DeviceState::Suspended) == suspend {
            return Ok(());
        }

        let members: Vec<EndpointId> = device.endpoints.iter().copied().collect();
        let target = if suspend {
            for endpoint in &members {
                let Some(handle) = self.endpoints.get(endpoint) else {
                    continue;
                };
                let refuses = handle.state == EndpointState::Running
                    && handle.control.as_ref().is_some_and(|c| !c.can_suspend());
                if refuses {
                    return Err(CoreError::Busy {
                        device: id,
                        endpoint: *endpoint,
                    });
                }
            }
            DeviceState::Suspended
        } else if self.used_by(id)? > 0 {
            DeviceState::Running
        } else {
            DeviceState::Idle
        };

        self.change_device_state(id, target)?;
        for endpoint in members {
            if let Some(control) = self
                .endpoints
                .get_mut(&endpoint)
                .and_then(|e| e.control.as_mut())
            {
                control.suspend(suspend);
            }
        }
        Ok(())
    }

    /// Suspends or resumes every linked device. Returns the first refusal,
    /// after trying all of them.
    pub fn suspend_all(&mut self, suspend: bool) -> Result<(), CoreError> {
        let ids = self.devices();
        let mut first_error = None;
        for id in ids {
            if let Err(e) = self.suspend_device(id, suspend) {
                tracing::warn!(device = %id, error = %e, "failed to change suspend state");
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    /// The latency the device currently runs at.
    pub fn device_latency(&self, id: DeviceId) -> Result<Duration, CoreError> {
        let device = self.device(id)?;
        if let Some(latency) = device.control.as_ref().and_then(|c| c.latency()) {
            return Ok(latency);
        }
        Ok(Duration::from_nanos(
            device.shared.latency_ns.load(Ordering::Acquire),
        ))
    }

    /// The smallest latency the device's endpoints ask for, clamped to the
    /// device's range. `None` if no endpoint asked.
    pub fn device_requested_latency(&self, id: DeviceId) -> Result<Option<Duration>, CoreError> {
        let nanos = self
            .device(id)?
            .shared
            .requested_latency_ns
            .load(Ordering::Acquire);
        Ok((nanos > 0).then(|| Duration::from_nanos(nanos)))
    }

    /// Number of endpoints attached to the device, corked ones included.
    pub fn linked_by(&self, id: DeviceId) -> Result<usize, CoreError> {
        Ok(self.device(id)?.endpoints.len())
    }

    /// Number of uncorked endpoints attached to the device.
    pub fn used_by(&self, id: DeviceId) -> Result<usize, CoreError> {
        let device = self.device(id)?;
        Ok(device
            .endpoints
            .iter()
            .filter_map(|e| self.endpoints.get(e))
            .filter(|e| e.state == EndpointState::Running)
            .count())
    }

    /// The default device of a direction.
    pub fn default_device(&self, direction: Direction) -> Option<DeviceId> {
        match direction {
            Direction::Playback => self.default_sink,
            Direction::Capture => self.default_source,
        }
    }

    /// Makes a linked device the default of its direction.
    pub fn set_default_device(&mut self, id: DeviceId) -> Result<(), CoreError> {
        let device = self.device(id)?;
        if !device.state.is_linked() {
            return Err(CoreError::DeviceNotLinked { device: id });
        }
        let direction = device.direction;
        if self.default_device(direction) != Some(id) {
            self.update_default(direction, Some(id));
        }
        Ok(())
    }

    fn update_default(&mut self, direction: Direction, device: Option<DeviceId>) {
        match direction {
            Direction::Playback => self.default_sink = device,
            Direction::Capture => self.default_source = device,
        }
        tracing::debug!(%direction, ?device, "default device changed");
        self.emit(CoreEvent::DefaultDeviceChanged { direction, device });
    }

    fn change_device_state(&mut self, id: DeviceId, state: DeviceState) -> Result<(), CoreError> {
        let device = self.device_mut(id)?;
        if device.state == state {
            return Ok(());
        }
        if let Some(control) = device.control.as_mut() {
            control
                .set_state(state)
                .map_err(|reason| CoreError::StateChangeRefused { device: id, reason })?;
        }
        device.post(DeviceMessage::SetState(state));
        device.state = state;
        tracing::debug!(device = %id, ?state, "device state changed");
        self.emit(CoreEvent::DeviceStateChanged { device: id, state });
        Ok(())
    }

    /// Running while at least one endpoint is uncorked, idle otherwise.
    fn update_device_status(&mut self, id: DeviceId) {
        let Ok(state) = self.device_state(id) else {
            return;
        };
        if !state.is_opened() {
            return;
        }
        let used = self.used_by(id).unwrap_or(0);
        let target = if used > 0 {
            DeviceState::Running
        } else {
            DeviceState::Idle
        };
        if let Err(e) = self.change_device_state(id, target) {
            tracing::warn!(device = %id, error = %e, "device status not updated");
        }
    }

    fn device(&self, id: DeviceId) -> Result<&DeviceHandle, CoreError> {
        self.devices
            .get(&id)
            .ok_or_else(|| CoreError::device_not_found(id))
    }

    fn device_mut(&mut self, id: DeviceId) -> Result<&mut DeviceHandle, CoreError> {
        self.devices
            .get_mut(&id)
            .ok_or_else(|| CoreError::device_not_found(id))
    }

    // ---------------------------------------------------------------------
    // Stream endpoints
    // ---------------------------------------------------------------------

    /// Registers a stream endpoint without attaching it.
    ///
    /// Fails without registering anything if the endpoint cannot play to
    /// (or record from) its device.
    pub fn create_endpoint(&mut self, builder: EndpointBuilder) -> Result<EndpointId, CoreError> {
        builder.spec.validate()?;
        let direction = builder.driver.direction();
        let device_id = builder
            .device
            .or_else(|| self.default_device(direction))
            .ok_or(CoreError::NoDefaultDevice { direction })?;

        let device = self.device(device_id)?;
        if !device.state.is_linked() {
            return Err(CoreError::DeviceNotLinked { device: device_id });
        }
        if device.direction != direction {
            return Err(CoreError::DirectionMismatch {
                expected: direction,
            });
        }
        if device.endpoints.len() >= MAX_ENDPOINTS_PER_DEVICE {
            return Err(CoreError::TooManyEndpoints {
                device: device_id,
                max: MAX_ENDPOINTS_PER_DEVICE,
            });
        }
        Resampler::check(&builder.spec, &device.spec, builder.flags)?;

        let volume = builder
            .volume
            .unwrap_or_else(|| Volume::norm(builder.spec.channels));
        check_volume(&volume, &builder.spec)?;

        let id = EndpointId(self.next_endpoint);
        self.next_endpoint += 1;

        let shared = Arc::new(EndpointShared::default());
        let io = EndpointIo::new(
            id,
            builder.driver,
            builder.spec,
            builder.flags,
            shared.clone(),
            self.control_tx.clone(),
        );

        tracing::debug!(endpoint = %id, device = %device_id, spec = %builder.spec, "created endpoint");
        self.endpoints.insert(
            id,
            EndpointHandle {
                device: device_id,
                direction,
                spec: builder.spec,
                flags: builder.flags,
                state: EndpointState::Init,
                volume,
                muted: builder.muted,
                requested_latency: builder.latency,
                properties: builder.properties,
                shared,
                control: builder.control,
                io: Some(Box::new(io)),
            },
        );
        Ok(id)
    }

    /// Attaches a created endpoint to its device, corked if it was built
    /// with [`EndpointFlags::START_CORKED`].
    pub fn put_endpoint(&mut self, id: EndpointId) -> Result<(), CoreError> {
        let handle = self.endpoint(id)?;
        if handle.state != EndpointState::Init {
            return Ok(());
        }
        let device_id = handle.device;
        let device = self.device(device_id)?;
        if !device.state.is_linked() {
            return Err(CoreError::DeviceNotLinked { device: device_id });
        }
        if device.endpoints.len() >= MAX_ENDPOINTS_PER_DEVICE {
            return Err(CoreError::TooManyEndpoints {
                device: device_id,
                max: MAX_ENDPOINTS_PER_DEVICE,
            });
        }
        let device_spec = device.spec;

        let handle = self.endpoint_mut(id)?;
        let state = if handle.flags.contains(EndpointFlags::START_CORKED) {
            EndpointState::Corked
        } else {
            EndpointState::Running
        };
        let Some(mut io) = handle.io.take() else {
            return Err(CoreError::EndpointNotLinked { endpoint: id });
        };
        io.sync(handle.volume, handle.muted, handle.requested_latency);
        if let Err(e) = io.retarget(device_spec, false) {
            handle.io = Some(io);
            return Err(e);
        }
        handle.state = state;

        let device = self.device_mut(device_id)?;
        device.post(DeviceMessage::AddEndpoint {
            endpoint: io,
            state,
        });
        device.endpoints.insert(id);

        tracing::info!(endpoint = %id, device = %device_id, ?state, "endpoint linked");
        self.emit(CoreEvent::EndpointAdded {
            endpoint: id,
            device: device_id,
        });
        self.update_device_status(device_id);
        Ok(())
    }

    /// Unlinks an endpoint. Idempotent: returns `false` if it was already gone.
    ///
    /// The endpoint disappears from the control plane at once; its device
    /// lets go of the IO half at its next cycle.
    pub fn unlink_endpoint(&mut self, id: EndpointId) -> bool {
        let Some(handle) = self.endpoints.remove(&id) else {
            return false;
        };
        let device_id = handle.device;
        if let Some(device) = self.devices.get_mut(&device_id) {
            if device.endpoints.remove(&id) {
                device.post(DeviceMessage::RemoveEndpoint {
                    endpoint: id,
                    reason: ReleaseReason::Unlink,
                });
            }
        }
        tracing::info!(endpoint = %id, device = %device_id, "endpoint unlinked");
        self.emit(CoreEvent::EndpointRemoved { endpoint: id });
        self.update_device_status(device_id);
        true
    }

    /// Runs the endpoint's `kill` hook and unlinks it. Idempotent.
    pub fn kill_endpoint(&mut self, id: EndpointId) -> bool {
        let Some(handle) = self.endpoints.get_mut(&id) else {
            return false;
        };
        if let Some(control) = handle.control.as_mut() {
            control.kill();
        }
        self.unlink_endpoint(id)
    }

    /// Ids of all registered endpoints.
    pub fn endpoints(&self) -> Vec<EndpointId> {
        self.endpoints.keys().copied().collect()
    }

    /// State of an endpoint as seen from the control plane.
    ///
    /// A running endpoint whose driver ran dry reports
    /// [`EndpointState::Drained`].
    pub fn endpoint_state(&self, id: EndpointId) -> Result<EndpointState, CoreError> {
        let handle = self.endpoint(id)?;
        if handle.state == EndpointState::Running && handle.shared.drained.load(Ordering::Acquire)
        {
            return Ok(EndpointState::Drained);
        }
        Ok(handle.state)
    }

    /// The device an endpoint plays to or records from.
    pub fn endpoint_device(&self, id: EndpointId) -> Result<DeviceId, CoreError> {
        Ok(self.endpoint(id)?.device)
    }

    /// Sample spec of an endpoint.
    pub fn endpoint_spec(&self, id: EndpointId) -> Result<SampleSpec, CoreError> {
        Ok(self.endpoint(id)?.spec)
    }

    /// Flags the endpoint was created with.
    pub fn endpoint_flags(&self, id: EndpointId) -> Result<EndpointFlags, CoreError> {
        Ok(self.endpoint(id)?.flags)
    }

    /// A free-form property of an endpoint.
    pub fn endpoint_property(&self, id: EndpointId, key: &str) -> Result<Option<String>, CoreError> {
        Ok(self.endpoint(id)?.properties.get(key).cloned())
    }

    /// Corks (pauses) or uncorks an endpoint.
    pub fn cork_endpoint(&mut self, id: EndpointId, cork: bool) -> Result<(), CoreError> {
        let handle = self.linked_endpoint(id)?;
        let state = if cork {
            EndpointState::Corked
        } else {
            EndpointState::Running
        };
        if handle.state == state {
            return Ok(());
        }
        let device_id = handle.device;
        self.device_mut(device_id)?
            .send(DeviceMessage::SetEndpointState {
                endpoint: id,
                state,
            })?;
        self.endpoint_mut(id)?.state = state;

        tracing::debug!(endpoint = %id, corked = cork, "endpoint cork changed");
        self.emit(CoreEvent::EndpointStateChanged {
            endpoint: id,
            state,
        });
        self.update_device_status(device_id);
        Ok(())
    }

    /// Sets an endpoint's volume. Must match the endpoint's channel count.
    pub fn set_endpoint_volume(&mut self, id: EndpointId, volume: Volume) -> Result<(), CoreError> {
        let handle = self.endpoint(id)?;
        check_volume(&volume, &handle.spec)?;
        self.send_if_linked(
            id,
            DeviceMessage::SetEndpointVolume {
                endpoint: id,
                volume,
            },
        )?;
        let handle = self.endpoint_mut(id)?;
        handle.volume = volume;
        let muted = handle.muted;
        self.emit(CoreEvent::VolumeChanged {
            target: VolumeTarget::Endpoint(id),
            volume,
            muted,
        });
        Ok(())
    }

    /// An endpoint's volume as last set.
    pub fn endpoint_volume(&self, id: EndpointId) -> Result<Volume, CoreError> {
        Ok(self.endpoint(id)?.volume)
    }

    /// Mutes or unmutes an endpoint. Muted audio is still consumed.
    pub fn set_endpoint_mute(&mut self, id: EndpointId, muted: bool) -> Result<(), CoreError> {
        self.send_if_linked(
            id,
            DeviceMessage::SetEndpointMute {
                endpoint: id,
                muted,
            },
        )?;
        let handle = self.endpoint_mut(id)?;
        handle.muted = muted;
        let volume = handle.volume;
        self.emit(CoreEvent::VolumeChanged {
            target: VolumeTarget::Endpoint(id),
            volume,
            muted,
        });
        Ok(())
    }

    /// An endpoint's mute flag as last set.
    pub fn endpoint_muted(&self, id: EndpointId) -> Result<bool, CoreError> {
        Ok(self.endpoint(id)?.muted)
    }

    /// Asks the endpoint's device to rewind.
    ///
    /// `nbytes` is in the endpoint's spec, `0` meaning as much as the device
    /// can. With `ignore_current_rewind` the already rendered audio is
    /// thrown away instead of replayed. With `not_here` only the device
    /// side rewinds and the driver is left alone.
    pub fn request_rewind(
        &mut self,
        id: EndpointId,
        nbytes: usize,
        ignore_current_rewind: bool,
        not_here: bool,
    ) -> Result<(), CoreError> {
        let device = self.linked_endpoint(id)?.device;
        self.device_mut(device)?.send(DeviceMessage::RequestRewind {
            endpoint: id,
            nbytes,
            ignore_current_rewind,
            not_here,
        })
    }

    /// Moves an endpoint to another device of the same direction.
    ///
    /// Returns once the move is validated; the transfer itself completes
    /// when the old device releases the stream and
    /// [`dispatch_pending`](Self::dispatch_pending) runs. Buffered audio is
    /// carried over unless `immediately` is set or the device specs differ.
    pub fn move_endpoint(
        &mut self,
        id: EndpointId,
        destination: DeviceId,
        immediately: bool,
    ) -> Result<(), CoreError> {
        let handle = self.endpoint(id)?;
        if handle.flags.contains(EndpointFlags::DONT_MOVE) {
            return Err(CoreError::MoveForbidden { endpoint: id });
        }
        let source = handle.device;
        if source == destination {
            return Ok(());
        }
        let (direction, spec, flags) = (handle.direction, handle.spec, handle.flags);
        let put = handle.state.is_linked();

        let dest = self.device(destination)?;
        if !dest.state.is_linked() {
            return Err(CoreError::DeviceNotLinked {
                device: destination,
            });
        }
        if dest.direction != direction {
            return Err(CoreError::DirectionMismatch {
                expected: direction,
            });
        }
        if dest.endpoints.len() >= MAX_ENDPOINTS_PER_DEVICE {
            return Err(CoreError::TooManyEndpoints {
                device: destination,
                max: MAX_ENDPOINTS_PER_DEVICE,
            });
        }
        Resampler::check(&spec, &dest.spec, flags)?;

        if put {
            let old = self.device_mut(source)?;
            old.post(DeviceMessage::RemoveEndpoint {
                endpoint: id,
                reason: ReleaseReason::Move { immediately },
            });
            old.endpoints.remove(&id);
            self.device_mut(destination)?.endpoints.insert(id);
        }
        self.endpoint_mut(id)?.device = destination;

        tracing::info!(endpoint = %id, from = %source, to = %destination, immediately, "moving endpoint");
        if put {
            self.update_device_status(source);
            self.update_device_status(destination);
        }
        Ok(())
    }

    /// Sets the latency an endpoint asks its device for.
    pub fn set_requested_latency(
        &mut self,
        id: EndpointId,
        latency: Option<Duration>,
    ) -> Result<(), CoreError> {
        self.send_if_linked(
            id,
            DeviceMessage::SetEndpointLatency {
                endpoint: id,
                latency,
            },
        )?;
        self.endpoint_mut(id)?.requested_latency = latency;
        Ok(())
    }

    /// How long audio written by the endpoint's driver now takes to be heard
    /// (playback) or how old captured audio is when delivered (capture).
    pub fn endpoint_latency(&self, id: EndpointId) -> Result<Duration, CoreError> {
        let handle = self.endpoint(id)?;
        let device = self.device(handle.device)?;
        let buffered = device
            .spec
            .bytes_to_duration(handle.shared.buffered.load(Ordering::Acquire));
        let own = handle
            .control
            .as_ref()
            .and_then(|c| c.latency())
            .unwrap_or_default();
        Ok(buffered + own + self.device_latency(handle.device)?)
    }

    fn send_if_linked(&mut self, id: EndpointId, message: DeviceMessage) -> Result<(), CoreError> {
        let handle = self.endpoint(id)?;
        if !handle.state.is_linked() {
            // applied on put
            return Ok(());
        }
        let device = handle.device;
        self.device_mut(device)?.send(message)
    }

    fn endpoint(&self, id: EndpointId) -> Result<&EndpointHandle, CoreError> {
        self.endpoints
            .get(&id)
            .ok_or(CoreError::EndpointNotFound { endpoint: id })
    }

    fn endpoint_mut(&mut self, id: EndpointId) -> Result<&mut EndpointHandle, CoreError> {
        self.endpoints
            .get_mut(&id)
            .ok_or(CoreError::EndpointNotFound { endpoint: id })
    }

    fn linked_endpoint(&self, id: EndpointId) -> Result<&EndpointHandle, CoreError> {
        let handle = self.endpoint(id)?;
        if !handle.state.is_linked() {
            return Err(CoreError::EndpointNotLinked { endpoint: id });
        }
        Ok(handle)
    }

    pub(crate) fn control_sender(&self) -> ControlSender {
        self.control_tx.clone()
    }

    // ---------------------------------------------------------------------
    // IO -> control
    // ---------------------------------------------------------------------

    /// Applies everything the IO side reported so far. Returns how many
    /// messages were handled.
    pub fn dispatch_pending(&mut self) -> usize {
        self.flush_backlogs();
        let mut handled = 0;
        while let Some(message) = self.control_rx.try_recv() {
            self.handle_control_message(message);
            handled += 1;
        }
        handled
    }

    /// Waits for the next IO report and applies it.
    ///
    /// Returns `false` if the channel closed.
    pub async fn process_next(&mut self) -> bool {
        let Some(message) = self.control_rx.recv().await else {
            return false;
        };
        self.flush_backlogs();
        self.handle_control_message(message);
        true
    }

    fn flush_backlogs(&mut self) {
        for device in self.devices.values_mut() {
            device.flush();
        }
        self.closing.retain_mut(|device| {
            device.flush();
            !device.backlog.is_empty()
        });
    }

    fn handle_control_message(&mut self, message: ControlMessage) {
        match message {
            ControlMessage::UnlinkEndpoint { endpoint } => {
                tracing::debug!(%endpoint, "driver asked for unlink");
                self.unlink_endpoint(endpoint);
            }
            ControlMessage::EndpointReleased {
                device,
                endpoint,
                reason,
            } => match reason {
                ReleaseReason::Unlink => {
                    tracing::trace!(endpoint = %endpoint.id(), %device, "released endpoint dropped");
                }
                ReleaseReason::Move { immediately } => {
                    self.finish_move(device, endpoint, immediately);
                }
            },
            ControlMessage::EndpointDrained { endpoint } => {
                let running = self
                    .endpoints
                    .get(&endpoint)
                    .is_some_and(|e| e.state == EndpointState::Running);
                if running {
                    tracing::debug!(%endpoint, "endpoint drained");
                    self.emit(CoreEvent::EndpointDrained { endpoint });
                }
            }
            ControlMessage::LatencyChanged { device, latency } => {
                self.emit(CoreEvent::LatencyChanged { device, latency });
            }
        }
    }

    fn finish_move(&mut self, from: DeviceId, mut io: Box<EndpointIo>, immediately: bool) {
        let id = io.id();
        let Some(handle) = self.endpoints.get(&id) else {
            tracing::debug!(endpoint = %id, "moved endpoint is gone, dropping");
            return;
        };
        let to = handle.device;
        let Some(device_spec) = self.devices.get(&to).map(|d| d.spec) else {
            tracing::warn!(endpoint = %id, device = %to, "move target vanished");
            self.kill_endpoint(id);
            return;
        };

        io.sync(handle.volume, handle.muted, handle.requested_latency);
        let state = handle.state;
        if let Err(e) = io.retarget(device_spec, !immediately) {
            tracing::error!(endpoint = %id, error = %e, "cannot attach moved endpoint");
            self.kill_endpoint(id);
            return;
        }
        if let Some(device) = self.devices.get_mut(&to) {
            device.post(DeviceMessage::AddEndpoint {
                endpoint: io,
                state,
            });
        }
        if let Some(control) = self.endpoints.get_mut(&id).and_then(|e| e.control.as_mut()) {
            control.moved(to);
        }
        tracing::info!(endpoint = %id, %from, %to, "endpoint moved");
        self.emit(CoreEvent::EndpointMoved {
            endpoint: id,
            from,
            to,
        });
    }
}

fn check_volume(volume: &Volume, spec: &SampleSpec) -> Result<(), CoreError> {
    if volume.channels() == spec.channels {
        Ok(())
    } else {
        Err(CoreError::InvalidVolume {
            expected: spec.channels,
            got: volume.channels(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::{MockStream, StreamControl};
    use crate::format::SampleFormat;
    use parking_lot::Mutex;

    fn u8_mono() -> SampleSpec {
        SampleSpec::new(SampleFormat::U8, 8000, 1).unwrap()
    }

    fn setup() -> (Core, DeviceId, DeviceIo) {
        let mut core = Core::default();
        let (id, io) = core
            .create_device(DeviceBuilder::playback("out").spec(u8_mono()))
            .unwrap();
        core.put_device(id).unwrap();
        (core, id, io)
    }

    fn constant(value: u8) -> MockStream {
        MockStream::constant(u8_mono(), value)
    }

    fn recorder() -> (EventCallback, Arc<Mutex<Vec<CoreEvent>>>) {
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = events.clone();
        let callback = crate::event_callback(move |event| sink.lock().push(event));
        (callback, events)
    }

    #[test]
    fn test_first_device_becomes_default() {
        let (core, id, _io) = setup();
        assert_eq!(core.default_device(Direction::Playback), Some(id));
        assert_eq!(core.default_device(Direction::Capture), None);
        assert_eq!(core.device_state(id).unwrap(), DeviceState::Idle);
    }

    #[test]
    fn test_duplicate_device_name() {
        let (mut core, _id, _io) = setup();
        let err = core
            .create_device(DeviceBuilder::playback("out"))
            .err()
            .unwrap();
        assert!(matches!(err, CoreError::DeviceNameTaken { .. }));
    }

    #[test]
    fn test_create_endpoint_without_default_device() {
        let mut core = Core::default();
        let spec = SampleSpec::default();
        let err = core
            .create_endpoint(EndpointBuilder::playback(spec, MockStream::silence(spec)))
            .unwrap_err();
        assert!(matches!(
            err,
            CoreError::NoDefaultDevice {
                direction: Direction::Playback
            }
        ));
        assert!(core.endpoints().is_empty());
    }

    #[test]
    fn test_incompatible_format_leaves_nothing_registered() {
        let (mut core, _id, _io) = setup();
        let spec = SampleSpec::new(SampleFormat::U8, 8000, 2).unwrap();
        let err = core
            .create_endpoint(
                EndpointBuilder::playback(spec, MockStream::silence(spec))
                    .flags(EndpointFlags::NO_REMIX),
            )
            .unwrap_err();
        assert!(matches!(err, CoreError::IncompatibleFormat { .. }));
        assert!(core.endpoints().is_empty());
    }

    #[test]
    fn test_put_endpoint_runs_device() {
        let (mut core, dev, mut io) = setup();
        let ep = core
            .create_endpoint(EndpointBuilder::playback(u8_mono(), constant(0x90)))
            .unwrap();
        assert_eq!(core.endpoint_state(ep).unwrap(), EndpointState::Init);
        core.put_endpoint(ep).unwrap();

        assert_eq!(core.endpoint_state(ep).unwrap(), EndpointState::Running);
        assert_eq!(core.device_state(dev).unwrap(), DeviceState::Running);
        assert_eq!(core.linked_by(dev).unwrap(), 1);
        assert_eq!(core.used_by(dev).unwrap(), 1);

        let chunk = io.render(16);
        assert_eq!(chunk.bytes(), &[0x90; 16]);
    }

    #[test]
    fn test_start_corked() {
        let (mut core, dev, mut io) = setup();
        let ep = core
            .create_endpoint(
                EndpointBuilder::playback(u8_mono(), constant(0x90))
                    .flags(EndpointFlags::START_CORKED),
            )
            .unwrap();
        core.put_endpoint(ep).unwrap();
        assert_eq!(core.endpoint_state(ep).unwrap(), EndpointState::Corked);
        assert_eq!(core.linked_by(dev).unwrap(), 1);
        assert_eq!(core.used_by(dev).unwrap(), 0);
        assert_eq!(core.device_state(dev).unwrap(), DeviceState::Idle);
        assert_eq!(io.render(8).bytes(), &[0x80; 8]);

        core.cork_endpoint(ep, false).unwrap();
        assert_eq!(core.device_state(dev).unwrap(), DeviceState::Running);
        assert_eq!(io.render(8).bytes(), &[0x90; 8]);
    }

    #[test]
    fn test_kill_twice() {
        let (mut core, dev, mut io) = setup();
        let (callback, events) = recorder();
        core.on_event(callback);

        let ep = core
            .create_endpoint(EndpointBuilder::playback(u8_mono(), constant(0x90)))
            .unwrap();
        core.put_endpoint(ep).unwrap();
        io.render(8);

        assert!(core.kill_endpoint(ep));
        assert!(!core.kill_endpoint(ep));
        assert!(!core.unlink_endpoint(ep));

        let removed = events
            .lock()
            .iter()
            .filter(|e| matches!(e, CoreEvent::EndpointRemoved { .. }))
            .count();
        assert_eq!(removed, 1);
        assert_eq!(core.linked_by(dev).unwrap(), 0);

        assert_eq!(io.render(8).bytes(), &[0x80; 8]);
        assert_eq!(io.endpoint_count(), 0);
        core.dispatch_pending();
    }

    #[test]
    fn test_unlink_before_put_drops_locally() {
        let (mut core, dev, mut io) = setup();
        let ep = core
            .create_endpoint(EndpointBuilder::playback(u8_mono(), constant(0x90)))
            .unwrap();
        assert!(core.unlink_endpoint(ep));
        io.process_messages();
        assert_eq!(io.endpoint_count(), 0);
        assert_eq!(core.linked_by(dev).unwrap(), 0);
    }

    #[test]
    fn test_invalid_volume() {
        let (mut core, _dev, _io) = setup();
        let ep = core
            .create_endpoint(EndpointBuilder::playback(u8_mono(), constant(0x90)))
            .unwrap();
        let err = core.set_endpoint_volume(ep, Volume::norm(2)).unwrap_err();
        assert!(matches!(err, CoreError::InvalidVolume { expected: 1, got: 2 }));
    }

    #[test]
    fn test_latest_volume_wins() {
        let spec = SampleSpec::new(SampleFormat::S16NE, 8000, 1).unwrap();
        let mut core = Core::default();
        let (dev, mut io) = core
            .create_device(DeviceBuilder::playback("out").spec(spec))
            .unwrap();
        core.put_device(dev).unwrap();
        let ep = core
            .create_endpoint(EndpointBuilder::playback(spec, MockStream::constant(spec, 0x40)))
            .unwrap();
        core.put_endpoint(ep).unwrap();

        core.set_endpoint_volume(ep, Volume::uniform(1, 0.25)).unwrap();
        core.set_endpoint_volume(ep, Volume::uniform(1, 0.5)).unwrap();
        assert_eq!(core.endpoint_volume(ep).unwrap(), Volume::uniform(1, 0.5));

        let chunk = io.render(8);
        let expected = i16::from_ne_bytes([0x40, 0x40]) / 2;
        for sample in chunk.bytes().chunks_exact(2) {
            let value = i16::from_ne_bytes([sample[0], sample[1]]);
            assert!((value - expected).abs() <= 1, "{value} vs {expected}");
        }
    }

    #[test]
    fn test_muted_endpoint_still_consumes() {
        let (mut core, _dev, mut io) = setup();
        let stream = constant(0x90).with_limit(8);
        let ep = core
            .create_endpoint(EndpointBuilder::playback(u8_mono(), stream).muted(true))
            .unwrap();
        core.put_endpoint(ep).unwrap();

        assert_eq!(io.render(8).bytes(), &[0x80; 8]);
        core.set_endpoint_mute(ep, false).unwrap();
        // the 8 frames are gone
        assert_eq!(io.render(8).bytes(), &[0x80; 8]);
    }

    #[test]
    fn test_drained_reported_once() {
        let (mut core, _dev, mut io) = setup();
        let (callback, events) = recorder();
        core.on_event(callback);

        let ep = core
            .create_endpoint(EndpointBuilder::playback(u8_mono(), constant(0x90).with_limit(4)))
            .unwrap();
        core.put_endpoint(ep).unwrap();

        io.render(8);
        io.render(8);
        core.dispatch_pending();
        assert_eq!(core.endpoint_state(ep).unwrap(), EndpointState::Drained);
        let drained = events
            .lock()
            .iter()
            .filter(|e| matches!(e, CoreEvent::EndpointDrained { .. }))
            .count();
        assert_eq!(drained, 1);
    }

    #[test]
    fn test_move_between_devices() {
        let (mut core, a, mut io_a) = setup();
        let (b, mut io_b) = core
            .create_device(DeviceBuilder::playback("other").spec(u8_mono()))
            .unwrap();
        core.put_device(b).unwrap();

        let ep = core
            .create_endpoint(EndpointBuilder::playback(u8_mono(), constant(0x90)))
            .unwrap();
        core.put_endpoint(ep).unwrap();
        io_a.render(8);

        core.move_endpoint(ep, b, false).unwrap();
        assert_eq!(core.endpoint_device(ep).unwrap(), b);
        assert_eq!(core.linked_by(a).unwrap(), 0);
        assert_eq!(core.linked_by(b).unwrap(), 1);

        // old device releases on its next cycle
        assert_eq!(io_a.render(8).bytes(), &[0x80; 8]);
        core.dispatch_pending();
        assert_eq!(io_b.render(8).bytes(), &[0x90; 8]);
        assert_eq!(io_b.endpoint_count(), 1);
    }

    #[test]
    fn test_move_forbidden_and_direction() {
        let (mut core, _a, _io) = setup();
        let (mic, _mic_io) = core
            .create_device(DeviceBuilder::capture("mic").spec(u8_mono()))
            .unwrap();
        core.put_device(mic).unwrap();

        let pinned = core
            .create_endpoint(
                EndpointBuilder::playback(u8_mono(), constant(0x90))
                    .flags(EndpointFlags::DONT_MOVE),
            )
            .unwrap();
        assert!(matches!(
            core.move_endpoint(pinned, mic, false),
            Err(CoreError::MoveForbidden { .. })
        ));

        let free = core
            .create_endpoint(EndpointBuilder::playback(u8_mono(), constant(0x90)))
            .unwrap();
        assert!(matches!(
            core.move_endpoint(free, mic, false),
            Err(CoreError::DirectionMismatch {
                expected: Direction::Playback
            })
        ));
    }

    struct Pinned;

    impl StreamControl for Pinned {
        fn can_suspend(&self) -> bool {
            false
        }
    }

    #[test]
    fn test_suspend_refused_while_pinned_stream_runs() {
        let (mut core, dev, mut io) = setup();
        let ep = core
            .create_endpoint(EndpointBuilder::playback(u8_mono(), constant(0x90)).control(Pinned))
            .unwrap();
        core.put_endpoint(ep).unwrap();

        assert!(matches!(
            core.suspend_device(dev, true),
            Err(CoreError::Busy { .. })
        ));

        core.cork_endpoint(ep, true).unwrap();
        core.suspend_device(dev, true).unwrap();
        assert_eq!(core.device_state(dev).unwrap(), DeviceState::Suspended);
        assert_eq!(io.render(4).bytes(), &[0x80; 4]);

        core.suspend_device(dev, false).unwrap();
        assert_eq!(core.device_state(dev).unwrap(), DeviceState::Idle);
    }

    #[test]
    fn test_unlink_device_kills_endpoints() {
        let (mut core, dev, _io) = setup();
        let ep = core
            .create_endpoint(EndpointBuilder::playback(u8_mono(), constant(0x90)))
            .unwrap();
        core.put_endpoint(ep).unwrap();

        assert!(core.unlink_device(dev));
        assert!(!core.unlink_device(dev));
        assert!(matches!(
            core.endpoint_state(ep),
            Err(CoreError::EndpointNotFound { .. })
        ));
        assert_eq!(core.default_device(Direction::Playback), None);
    }

    #[test]
    fn test_requested_latency_reported() {
        let (mut core, dev, mut io) = setup();
        let (callback, events) = recorder();
        core.on_event(callback);

        let ep = core
            .create_endpoint(
                EndpointBuilder::playback(u8_mono(), constant(0x90))
                    .latency(Duration::from_millis(40)),
            )
            .unwrap();
        core.put_endpoint(ep).unwrap();
        io.process_messages();
        core.dispatch_pending();

        assert_eq!(
            core.device_requested_latency(dev).unwrap(),
            Some(Duration::from_millis(40))
        );
        assert!(events
            .lock()
            .iter()
            .any(|e| matches!(e, CoreEvent::LatencyChanged { latency: Some(_), .. })));
    }

    #[test]
    fn test_rewind_of_4096_bytes() {
        let mut core = Core::default();
        let (dev, mut io) = core
            .create_device(
                DeviceBuilder::playback("out")
                    .spec(u8_mono())
                    .max_rewind(4096),
            )
            .unwrap();
        core.put_device(dev).unwrap();

        let stream = MockStream::constant(u8_mono(), 0x90);
        let stats = stream.stats();
        let ep = core
            .create_endpoint(EndpointBuilder::playback(u8_mono(), stream))
            .unwrap();
        core.put_endpoint(ep).unwrap();

        io.render(8000);
        core.request_rewind(ep, 5000, false, false).unwrap();
        io.process_messages();
        assert_eq!(io.service_rewind(), 4096);
        assert_eq!(stats.lock().rewound, 4096);
    }

    fn ramp(len: u8) -> MockStream {
        MockStream::from_bytes(u8_mono(), (0..len).collect())
    }

    /// Renders 8 bytes of a ramp, rewinds 4 with the given flags and
    /// returns the next 8 bytes along with what the driver rewound.
    fn render_after_rewind(ignore_current_rewind: bool, not_here: bool) -> (Vec<u8>, usize) {
        let (mut core, _dev, mut io) = setup();
        let stream = ramp(32);
        let stats = stream.stats();
        let ep = core
            .create_endpoint(EndpointBuilder::playback(u8_mono(), stream))
            .unwrap();
        core.put_endpoint(ep).unwrap();
        assert_eq!(io.render(8).bytes(), &[0, 1, 2, 3, 4, 5, 6, 7]);

        core.request_rewind(ep, 4, ignore_current_rewind, not_here).unwrap();
        io.process_messages();
        assert_eq!(io.service_rewind(), 4);

        let rewound = stats.lock().rewound;
        (io.render(8).bytes().to_vec(), rewound)
    }

    #[test]
    fn test_rewind_replays_and_rewrites() {
        let (bytes, rewound) = render_after_rewind(false, false);
        assert_eq!(bytes, (4..12).collect::<Vec<u8>>());
        assert_eq!(rewound, 4);
    }

    #[test]
    fn test_rewind_ignoring_current_audio() {
        let (bytes, rewound) = render_after_rewind(true, false);
        assert_eq!(bytes, (8..16).collect::<Vec<u8>>());
        assert_eq!(rewound, 0);
    }

    #[test]
    fn test_rewind_not_here_leaves_driver_alone() {
        // the render history is replayed, the driver keeps its position
        let (bytes, rewound) = render_after_rewind(false, true);
        assert_eq!(bytes, (4..12).collect::<Vec<u8>>());
        assert_eq!(rewound, 0);

        let (bytes, rewound) = render_after_rewind(true, true);
        assert_eq!(bytes, (8..16).collect::<Vec<u8>>());
        assert_eq!(rewound, 0);
    }

    #[test]
    fn test_rewrite_limited_to_requested_bytes() {
        let (mut core, _dev, mut io) = setup();
        let stream = ramp(32);
        let stats = stream.stats();
        let ep = core
            .create_endpoint(EndpointBuilder::playback(u8_mono(), stream))
            .unwrap();
        core.put_endpoint(ep).unwrap();
        io.render(8);

        // the device goes back 8 bytes, the driver only rewrites the last 4
        core.request_rewind(ep, 8, false, true).unwrap();
        core.request_rewind(ep, 4, false, false).unwrap();
        io.process_messages();
        assert_eq!(io.service_rewind(), 8);
        assert_eq!(stats.lock().rewound, 4);

        assert_eq!(io.render(8).bytes(), &[0, 1, 2, 3, 4, 5, 6, 7]);
    }

    #[test]
    fn test_move_carries_buffered_audio() {
        let (mut core, _a, mut io_a) = setup();
        let (b, mut io_b) = core
            .create_device(DeviceBuilder::playback("other").spec(u8_mono()))
            .unwrap();
        core.put_device(b).unwrap();

        let stream = ramp(32);
        let stats = stream.stats();
        let ep = core
            .create_endpoint(EndpointBuilder::playback(u8_mono(), stream))
            .unwrap();
        core.put_endpoint(ep).unwrap();
        io_a.render(8);

        // leaves 4 replayed bytes unread in the render queue
        core.request_rewind(ep, 4, false, true).unwrap();
        io_a.process_messages();
        io_a.service_rewind();

        core.move_endpoint(ep, b, false).unwrap();
        assert_eq!(io_a.render(4).bytes(), &[0x80; 4]);
        core.dispatch_pending();

        assert_eq!(io_b.render(8).bytes(), (4..12).collect::<Vec<u8>>().as_slice());
        assert_eq!(stats.lock().rewound, 0);
    }

    #[test]
    fn test_move_to_other_spec_rerequests_buffered_audio() {
        let (mut core, _a, mut io_a) = setup();
        let stereo = SampleSpec::new(SampleFormat::U8, 8000, 2).unwrap();
        let (b, _io_b) = core
            .create_device(DeviceBuilder::playback("stereo").spec(stereo))
            .unwrap();
        core.put_device(b).unwrap();

        let stream = ramp(32);
        let stats = stream.stats();
        let ep = core
            .create_endpoint(EndpointBuilder::playback(u8_mono(), stream))
            .unwrap();
        core.put_endpoint(ep).unwrap();
        io_a.render(8);
        core.request_rewind(ep, 4, false, true).unwrap();
        io_a.process_messages();
        io_a.service_rewind();

        core.move_endpoint(ep, b, false).unwrap();
        io_a.render(4);
        core.dispatch_pending();
        assert_eq!(stats.lock().rewound, 4);
    }

    #[test]
    fn test_full_io_queue_parks_structural_messages() {
        let mut core = Core::new(CoreConfig {
            io_queue_capacity: 1,
            ..Default::default()
        });
        let (dev, mut io) = core
            .create_device(DeviceBuilder::playback("out").spec(u8_mono()))
            .unwrap();
        core.put_device(dev).unwrap();
        let ep = core
            .create_endpoint(EndpointBuilder::playback(u8_mono(), constant(0x90)))
            .unwrap();
        core.put_endpoint(ep).unwrap();

        // the ring still holds the device's first state change
        assert!(matches!(
            core.set_endpoint_volume(ep, Volume::uniform(1, 0.5)),
            Err(CoreError::IoQueueFull { device }) if device == dev
        ));
        assert_eq!(core.endpoint_volume(ep).unwrap(), Volume::norm(1));

        for _ in 0..8 {
            io.process_messages();
            core.dispatch_pending();
        }
        assert_eq!(io.endpoint_count(), 1);
        assert_eq!(io.state(), DeviceState::Running);

        core.set_endpoint_volume(ep, Volume::uniform(1, 0.5)).unwrap();
        assert_eq!(io.render(4).bytes(), &[0x88; 4]);
    }

    #[test]
    fn test_unlink_reaches_io_through_full_queue() {
        let mut core = Core::new(CoreConfig {
            io_queue_capacity: 1,
            ..Default::default()
        });
        let (dev, mut io) = core
            .create_device(DeviceBuilder::playback("out").spec(u8_mono()))
            .unwrap();
        core.put_device(dev).unwrap();
        let ep = core
            .create_endpoint(EndpointBuilder::playback(u8_mono(), constant(0x90)))
            .unwrap();
        core.put_endpoint(ep).unwrap();

        assert!(core.unlink_device(dev));
        assert!(core.devices().is_empty());

        for _ in 0..8 {
            io.render(4);
            core.dispatch_pending();
        }
        assert_eq!(io.state(), DeviceState::Unlinked);
        assert_eq!(io.endpoint_count(), 0);
        assert!(core.closing.is_empty());
    }
}
