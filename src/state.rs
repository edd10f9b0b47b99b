//! Lifecycle states, directions and endpoint flags.

use std::fmt;

/// Which way audio flows through a device or endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    /// Audio is rendered towards hardware (sink / sink-input).
    Playback,
    /// Audio is captured from hardware (source / source-output).
    Capture,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Playback => f.write_str("playback"),
            Self::Capture => f.write_str("capture"),
        }
    }
}

/// Lifecycle state of a device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeviceState {
    /// Created but not yet linked.
    Init,
    /// Linked, opened and used by at least one uncorked endpoint.
    Running,
    /// Linked but closed; renders silence without consuming endpoint data.
    Suspended,
    /// Linked and opened, no uncorked endpoint.
    Idle,
    /// Removed. Terminal.
    Unlinked,
}

impl DeviceState {
    /// Returns `true` while the device is processing audio.
    #[must_use]
    pub fn is_opened(self) -> bool {
        matches!(self, Self::Running | Self::Idle)
    }

    /// Returns `true` between put and unlink.
    #[must_use]
    pub fn is_linked(self) -> bool {
        matches!(self, Self::Running | Self::Idle | Self::Suspended)
    }
}

/// Lifecycle state of a stream endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EndpointState {
    /// Created but not yet attached to its device.
    Init,
    /// Attached and running, but the driver had nothing to give last cycle.
    Drained,
    /// Attached and pulling (or receiving) audio.
    Running,
    /// Attached but paused.
    Corked,
    /// Removed. Terminal.
    Unlinked,
}

impl EndpointState {
    /// Returns `true` between put and unlink.
    #[must_use]
    pub fn is_linked(self) -> bool {
        matches!(self, Self::Drained | Self::Running | Self::Corked)
    }
}

bitflags::bitflags! {
    /// Behaviour flags of a stream endpoint.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct EndpointFlags: u32 {
        /// The endpoint refuses to be moved to another device.
        const DONT_MOVE = 1 << 0;
        /// The endpoint starts corked when put.
        const START_CORKED = 1 << 1;
        /// The endpoint must not be attached where its channel count would be remixed.
        const NO_REMIX = 1 << 2;
        /// The endpoint must not be attached where its rate would be converted.
        const NO_RESAMPLE = 1 << 3;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_device_state_predicates() {
        assert!(DeviceState::Running.is_opened());
        assert!(DeviceState::Idle.is_opened());
        assert!(!DeviceState::Suspended.is_opened());
        assert!(DeviceState::Suspended.is_linked());
        assert!(!DeviceState::Init.is_linked());
        assert!(!DeviceState::Unlinked.is_linked());
    }

    #[test]
    fn test_endpoint_state_predicates() {
        assert!(EndpointState::Drained.is_linked());
        assert!(EndpointState::Corked.is_linked());
        assert!(!EndpointState::Init.is_linked());
        assert!(!EndpointState::Unlinked.is_linked());
    }

    #[test]
    fn test_flags_combine() {
        let flags = EndpointFlags::DONT_MOVE | EndpointFlags::START_CORKED;
        assert!(flags.contains(EndpointFlags::DONT_MOVE));
        assert!(!flags.contains(EndpointFlags::NO_REMIX));
    }
}
