//! Pluggable stream and device drivers.
//!
//! A stream endpoint is a generic shell; its behaviour comes from a driver:
//!
//! - [`PlaybackDriver`]: produces audio for a playback device (`pop`)
//! - [`CaptureDriver`]: consumes audio posted by a capture device (`push`)
//! - [`StreamControl`]: optional control-plane hooks (kill, moved, suspend)
//! - [`DeviceControl`]: optional control-plane hooks of a device backend
//!
//! IO hooks run on the device's IO thread and must never block. They get a
//! [`StreamContext`] for talking back to the pipeline.
//!
//! Built-in drivers:
//!
//! - [`FileStream`]: plays a WAV file and unlinks itself at the end
//! - [`MockStream`]: synthetic audio for tests and demos
//! - [`loopback`]: forwards a capture device into a playback device

mod file;
pub mod loopback;
mod mock;

pub use file::{play_file, FileStream};
pub use mock::{MockStats, MockStream};

use std::time::Duration;

use crate::chunk::AudioChunk;
use crate::format::{SampleSpec, Volume};
use crate::id::{DeviceId, EndpointId};
use crate::pipeline::{ControlMessage, ControlSender};
use crate::state::{DeviceState, EndpointState};

/// A rewind requested from inside a driver hook.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RewindRequest {
    /// Bytes in the endpoint's spec; `0` asks for as much as possible.
    pub nbytes: usize,
    /// Don't replay already rendered audio on the resulting rewind.
    pub ignore_current_rewind: bool,
    /// Rewind only the hardware side and leave this driver untouched.
    pub not_here: bool,
}

/// Handle passed to driver hooks on the IO thread.
pub struct StreamContext<'a> {
    endpoint: EndpointId,
    spec: &'a SampleSpec,
    state: EndpointState,
    safe_to_remove: bool,
    control: &'a ControlSender,
    rewind: Option<RewindRequest>,
}

impl<'a> StreamContext<'a> {
    pub(crate) fn new(
        endpoint: EndpointId,
        spec: &'a SampleSpec,
        state: EndpointState,
        safe_to_remove: bool,
        control: &'a ControlSender,
    ) -> Self {
        Self {
            endpoint,
            spec,
            state,
            safe_to_remove,
            control,
            rewind: None,
        }
    }

    /// The endpoint this driver belongs to.
    pub fn endpoint(&self) -> EndpointId {
        self.endpoint
    }

    /// The endpoint's sample spec. Byte counts given to hooks use it.
    pub fn spec(&self) -> &SampleSpec {
        self.spec
    }

    /// The endpoint's IO-side state.
    pub fn state(&self) -> EndpointState {
        self.state
    }

    /// Returns `true` if no rendered audio of this endpoint is still waiting
    /// to be played or rewritten, so unlinking loses nothing.
    pub fn safe_to_remove(&self) -> bool {
        self.safe_to_remove
    }

    /// Asks the control plane to unlink this endpoint.
    ///
    /// Asynchronous: the endpoint keeps being polled until the control
    /// plane handles the request.
    pub fn post_unlink(&self) {
        self.control.send(ControlMessage::UnlinkEndpoint {
            endpoint: self.endpoint,
        });
    }

    /// Requests a rewind of this endpoint, applied once the hook returns.
    pub fn request_rewind(&mut self, nbytes: usize, ignore_current_rewind: bool, not_here: bool) {
        self.rewind = Some(RewindRequest {
            nbytes,
            ignore_current_rewind,
            not_here,
        });
    }

    pub(crate) fn take_rewind(&mut self) -> Option<RewindRequest> {
        self.rewind.take()
    }
}

/// IO-thread hooks shared by playback and capture drivers.
///
/// Every hook has a no-op default.
pub trait StreamDriver: Send {
    /// The endpoint was attached to a device's IO context.
    fn attach(&mut self, _ctx: &mut StreamContext<'_>) {}

    /// The endpoint is about to leave a device's IO context.
    fn detach(&mut self, _ctx: &mut StreamContext<'_>) {}

    /// The IO-side state changed to `state`; `ctx.state()` still holds the old one.
    fn state_change(&mut self, _ctx: &mut StreamContext<'_>, _state: EndpointState) {}

    /// Rewrite the last `nbytes` bytes: the next pops must start that far back.
    fn process_rewind(&mut self, _ctx: &mut StreamContext<'_>, _nbytes: usize) {}

    /// The device can now rewind at most `nbytes` bytes of this stream.
    fn update_max_rewind(&mut self, _ctx: &mut StreamContext<'_>, _nbytes: usize) {}
}

/// A producer of audio for a playback device.
pub trait PlaybackDriver: StreamDriver {
    /// Returns the next audio of up to roughly `length` bytes.
    ///
    /// Must not block. May return less than requested, or more if a
    /// whole block is already at hand. `None` means nothing is available
    /// this cycle; the device plays silence for this stream.
    fn pop(&mut self, ctx: &mut StreamContext<'_>, length: usize) -> Option<AudioChunk>;
}

/// A consumer of audio posted by a capture device.
pub trait CaptureDriver: StreamDriver {
    /// Receives one chunk in the endpoint's spec. Must not block.
    fn push(&mut self, ctx: &mut StreamContext<'_>, chunk: &AudioChunk);
}

/// Control-plane hooks of a stream endpoint.
pub trait StreamControl: Send {
    /// The endpoint is being killed; release external resources.
    fn kill(&mut self) {}

    /// The endpoint was moved to `device`.
    fn moved(&mut self, _device: DeviceId) {}

    /// The endpoint's device was suspended or resumed.
    fn suspend(&mut self, _suspended: bool) {}

    /// Returns `false` if the stream cannot tolerate its device pausing.
    fn can_suspend(&self) -> bool {
        true
    }

    /// Extra latency the driver adds on top of the pipeline.
    fn latency(&self) -> Option<Duration> {
        None
    }
}

/// Control-plane hooks of a device backend.
pub trait DeviceControl: Send {
    /// Called before the device changes state. An error vetoes the change.
    fn set_state(&mut self, _state: DeviceState) -> Result<(), String> {
        Ok(())
    }

    /// Applies volume in hardware. Returns `false` to fall back to software volume.
    fn set_volume(&mut self, _volume: &Volume) -> bool {
        false
    }

    /// Applies mute in hardware. Returns `false` to fall back to software mute.
    fn set_mute(&mut self, _muted: bool) -> bool {
        false
    }

    /// Current hardware latency, if the backend measures it.
    fn latency(&self) -> Option<Duration> {
        None
    }
}

/// Either kind of IO driver, boxed for storage in a device.
pub(crate) enum DriverSlot {
    Playback(Box<dyn PlaybackDriver>),
    Capture(Box<dyn CaptureDriver>),
}

impl DriverSlot {
    pub(crate) fn direction(&self) -> crate::state::Direction {
        match self {
            Self::Playback(_) => crate::state::Direction::Playback,
            Self::Capture(_) => crate::state::Direction::Capture,
        }
    }

    pub(crate) fn attach(&mut self, ctx: &mut StreamContext<'_>) {
        match self {
            Self::Playback(d) => d.attach(ctx),
            Self::Capture(d) => d.attach(ctx),
        }
    }

    pub(crate) fn detach(&mut self, ctx: &mut StreamContext<'_>) {
        match self {
            Self::Playback(d) => d.detach(ctx),
            Self::Capture(d) => d.detach(ctx),
        }
    }

    pub(crate) fn state_change(&mut self, ctx: &mut StreamContext<'_>, state: EndpointState) {
        match self {
            Self::Playback(d) => d.state_change(ctx, state),
            Self::Capture(d) => d.state_change(ctx, state),
        }
    }

    pub(crate) fn process_rewind(&mut self, ctx: &mut StreamContext<'_>, nbytes: usize) {
        match self {
            Self::Playback(d) => d.process_rewind(ctx, nbytes),
            Self::Capture(d) => d.process_rewind(ctx, nbytes),
        }
    }

    pub(crate) fn update_max_rewind(&mut self, ctx: &mut StreamContext<'_>, nbytes: usize) {
        match self {
            Self::Playback(d) => d.update_max_rewind(ctx, nbytes),
            Self::Capture(d) => d.update_max_rewind(ctx, nbytes),
        }
    }
}
