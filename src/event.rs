//! Control-plane events for monitoring the pipeline.
//!
//! Events are notifications, not errors. They are emitted from the control
//! context after the change they describe has been applied, so a callback
//! may query [`Core`](crate::Core) state but must not call back into it.

use std::sync::Arc;
use std::time::Duration;

use crate::format::Volume;
use crate::id::{DeviceId, EndpointId};
use crate::state::{DeviceState, Direction, EndpointState};

/// What a volume or mute change applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VolumeTarget {
    /// A device.
    Device(DeviceId),
    /// A stream endpoint.
    Endpoint(EndpointId),
}

/// Events emitted by the control plane and by recordings.
///
/// # Example
///
/// ```
/// use stream_core::CoreEvent;
///
/// fn handle_event(event: CoreEvent) {
///     match event {
///         CoreEvent::EndpointDrained { endpoint } => {
///             eprintln!("{} ran dry", endpoint);
///         }
///         CoreEvent::EndpointMoved { endpoint, from, to } => {
///             eprintln!("{} moved from {} to {}", endpoint, from, to);
///         }
///         CoreEvent::RecordSinkError { sink_name, error } => {
///             eprintln!("Sink '{}' error: {}", sink_name, error);
///         }
///         other => eprintln!("{:?}", other),
///     }
/// }
/// ```
#[derive(Debug, Clone)]
pub enum CoreEvent {
    /// A device was put and is now visible.
    DeviceAdded {
        /// The new device.
        device: DeviceId,
        /// Playback or capture.
        direction: Direction,
    },

    /// A device was unlinked.
    DeviceRemoved {
        /// The removed device.
        device: DeviceId,
    },

    /// A device changed state (e.g. Idle to Running, or suspended).
    DeviceStateChanged {
        /// The device.
        device: DeviceId,
        /// Its new state.
        state: DeviceState,
    },

    /// A stream endpoint was put on a device.
    EndpointAdded {
        /// The new endpoint.
        endpoint: EndpointId,
        /// The device it plays to or records from.
        device: DeviceId,
    },

    /// A stream endpoint was unlinked.
    EndpointRemoved {
        /// The removed endpoint.
        endpoint: EndpointId,
    },

    /// A stream endpoint was corked or uncorked.
    EndpointStateChanged {
        /// The endpoint.
        endpoint: EndpointId,
        /// Its new control-side state.
        state: EndpointState,
    },

    /// A stream endpoint now plays to (or records from) another device.
    EndpointMoved {
        /// The endpoint.
        endpoint: EndpointId,
        /// The device it left.
        from: DeviceId,
        /// The device it joined.
        to: DeviceId,
    },

    /// A running playback endpoint had nothing to play.
    ///
    /// Emitted once per underrun; the flag clears when data flows again.
    EndpointDrained {
        /// The endpoint.
        endpoint: EndpointId,
    },

    /// Volume or mute of a device or endpoint changed.
    VolumeChanged {
        /// What changed.
        target: VolumeTarget,
        /// The new volume.
        volume: Volume,
        /// The new mute flag.
        muted: bool,
    },

    /// The latency a device's endpoints ask for changed.
    LatencyChanged {
        /// The device.
        device: DeviceId,
        /// Smallest requested latency, clamped to the device's range.
        latency: Option<Duration>,
    },

    /// The default device of a direction changed.
    DefaultDeviceChanged {
        /// Playback or capture.
        direction: Direction,
        /// The new default, `None` if none is left.
        device: Option<DeviceId>,
    },

    /// A recording sink failed a write.
    ///
    /// The router retries according to
    /// [`RecordConfig`](crate::RecordConfig) before giving up on the chunk.
    RecordSinkError {
        /// Name of the sink that errored.
        sink_name: String,
        /// Description of the error.
        error: String,
    },

    /// A recording's ring buffer dropped audio because sinks couldn't keep up.
    RecordOverflow {
        /// Approximate duration of audio that was dropped.
        dropped_ms: u64,
    },
}

/// Callback type for receiving [`CoreEvent`]s.
///
/// Register it with [`Core::on_event`](crate::Core::on_event) or
/// [`RecordBuilder::on_event`](crate::record::RecordBuilder::on_event).
pub type EventCallback = Arc<dyn Fn(CoreEvent) + Send + Sync>;

/// Creates an [`EventCallback`] from a closure.
///
/// # Example
///
/// ```
/// use stream_core::{event_callback, CoreEvent};
///
/// let callback = event_callback(|event| {
///     println!("Got event: {:?}", event);
/// });
/// ```
pub fn event_callback<F>(f: F) -> EventCallback
where
    F: Fn(CoreEvent) + Send + Sync + 'static,
{
    Arc::new(f)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_core_event_debug() {
        let event = CoreEvent::RecordOverflow { dropped_ms: 100 };
        let debug = format!("{:?}", event);
        assert!(debug.contains("RecordOverflow"));
        assert!(debug.contains("100"));
    }

    #[test]
    fn test_core_event_clone() {
        let event = CoreEvent::EndpointMoved {
            endpoint: EndpointId(1),
            from: DeviceId(0),
            to: DeviceId(2),
        };
        let cloned = event.clone();
        if let CoreEvent::EndpointMoved { endpoint, from, to } = cloned {
            assert_eq!(endpoint, EndpointId(1));
            assert_eq!(from, DeviceId(0));
            assert_eq!(to, DeviceId(2));
        } else {
            panic!("Expected EndpointMoved variant");
        }
    }

    #[test]
    fn test_event_callback_helper() {
        use std::sync::atomic::{AtomicBool, Ordering};

        let called = Arc::new(AtomicBool::new(false));
        let called_clone = called.clone();

        let callback = event_callback(move |_| {
            called_clone.store(true, Ordering::SeqCst);
        });

        callback(CoreEvent::DeviceRemoved {
            device: DeviceId(0),
        });
        assert!(called.load(Ordering::SeqCst));
    }
}
