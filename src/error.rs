//! Error types for stream-core.
//!
//! Errors are split into three categories:
//! - **Control errors** ([`CoreError`]): a control-plane operation was refused.
//!   Configuration errors leave nothing registered.
//! - **Queue errors** ([`QueueError`]): a [`RewindableQueue`](crate::RewindableQueue)
//!   rejected a push.
//! - **Sink errors** ([`SinkError`]): a recording sink failed; recoverable and
//!   surfaced via [`EventCallback`](crate::EventCallback).
//!
//! The IO path never returns errors. Missing audio becomes silence.

use std::path::PathBuf;

use crate::id::{DeviceId, EndpointId};
use crate::state::Direction;

/// Errors returned by control-plane operations.
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    /// The sample spec has a zero or out-of-range rate or channel count.
    #[error("invalid sample spec: {rate}Hz, {channels} channels")]
    InvalidSampleSpec {
        /// Requested sample rate.
        rate: u32,
        /// Requested channel count.
        channels: u8,
    },

    /// The sample encoding cannot be handled.
    #[error("unsupported sample format: {format}")]
    UnsupportedFormat {
        /// Description of the format that wasn't supported.
        format: String,
    },

    /// A media file could not be opened or read.
    #[error("failed to open {path}: {reason}")]
    FileOpen {
        /// Path to the file.
        path: PathBuf,
        /// Why opening failed.
        reason: String,
    },

    /// The requested device was not found.
    #[error("device not found: {name}")]
    DeviceNotFound {
        /// Name or id of the device that wasn't found.
        name: String,
    },

    /// No default device is configured for this direction.
    #[error("no default {direction} device configured")]
    NoDefaultDevice {
        /// Direction that was looked up.
        direction: Direction,
    },

    /// A device with this name is already registered.
    #[error("device name already in use: {name}")]
    DeviceNameTaken {
        /// The duplicated name.
        name: String,
    },

    /// The device exists but is not linked.
    #[error("{device} is not linked")]
    DeviceNotLinked {
        /// The device.
        device: DeviceId,
    },

    /// The requested stream endpoint was not found.
    #[error("{endpoint} not found")]
    EndpointNotFound {
        /// The endpoint.
        endpoint: EndpointId,
    },

    /// The endpoint exists but is not linked.
    #[error("{endpoint} is not linked")]
    EndpointNotLinked {
        /// The endpoint.
        endpoint: EndpointId,
    },

    /// Endpoint and device sample specs cannot be reconciled.
    #[error("incompatible format: stream {stream} cannot feed device {device}")]
    IncompatibleFormat {
        /// Endpoint sample spec.
        stream: String,
        /// Device sample spec.
        device: String,
    },

    /// The endpoint carries the `DONT_MOVE` flag.
    #[error("{endpoint} may not be moved")]
    MoveForbidden {
        /// The endpoint.
        endpoint: EndpointId,
    },

    /// An endpoint was attached to a device of the other direction.
    #[error("direction mismatch: expected a {expected} device")]
    DirectionMismatch {
        /// The direction the endpoint needs.
        expected: Direction,
    },

    /// The device already carries the maximum number of endpoints.
    #[error("{device} already has {max} streams attached")]
    TooManyEndpoints {
        /// The device.
        device: DeviceId,
        /// The per-device limit.
        max: usize,
    },

    /// A volume's channel count does not match the target's sample spec.
    #[error("volume has {got} channels, expected {expected}")]
    InvalidVolume {
        /// Channel count of the target.
        expected: u8,
        /// Channel count of the provided volume.
        got: u8,
    },

    /// The device backend refused a state change.
    #[error("{device} refused state change: {reason}")]
    StateChangeRefused {
        /// The device.
        device: DeviceId,
        /// Reason given by the backend.
        reason: String,
    },

    /// The device cannot be suspended while this endpoint is running.
    #[error("{device} is busy: {endpoint} cannot be paused")]
    Busy {
        /// The device.
        device: DeviceId,
        /// The endpoint that cannot tolerate a pause.
        endpoint: EndpointId,
    },

    /// The control-to-IO message queue of a device is full.
    #[error("message queue of {device} is full")]
    IoQueueFull {
        /// The device.
        device: DeviceId,
    },

    /// A notification backend is already registered.
    #[error("a notification backend is already registered")]
    BackendAlreadyRegistered,

    /// No notification backend is registered.
    #[error("no notification backend is registered")]
    NoBackend,

    /// A card probe found no usable profile.
    #[error("card {card}: failed to find a working profile")]
    NoProfiles {
        /// Card name.
        card: String,
    },

    /// The named card profile does not exist.
    #[error("unknown profile: {name}")]
    UnknownProfile {
        /// The requested profile name.
        name: String,
    },

    /// A recording sink failed during initialization.
    #[error("sink '{sink_name}' failed to start: {reason}")]
    SinkStartFailed {
        /// Name of the sink that failed.
        sink_name: String,
        /// Why the sink failed to start.
        reason: String,
    },

    /// An error from the underlying audio library.
    #[error("audio backend error: {0}")]
    BackendError(String),
}

impl CoreError {
    /// Creates an unsupported format error.
    pub fn unsupported_format(format: impl Into<String>) -> Self {
        Self::UnsupportedFormat {
            format: format.into(),
        }
    }

    /// Creates a file open error for the given path.
    pub fn file_open(path: impl Into<PathBuf>, reason: impl ToString) -> Self {
        Self::FileOpen {
            path: path.into(),
            reason: reason.to_string(),
        }
    }

    /// Creates a device-not-found error from an id.
    pub fn device_not_found(device: DeviceId) -> Self {
        Self::DeviceNotFound {
            name: device.to_string(),
        }
    }
}

/// Errors returned by [`RewindableQueue::push`](crate::RewindableQueue::push).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum QueueError {
    /// Unread data plus the pushed chunk would exceed the queue's maximum length.
    #[error("queue full: {requested} bytes pushed, {available} bytes available")]
    CapacityExceeded {
        /// Length of the rejected chunk.
        requested: usize,
        /// Room left for unread data.
        available: usize,
    },

    /// The chunk length is not a whole number of frames.
    #[error("chunk of {length} bytes is not aligned to {frame_size}-byte frames")]
    Unaligned {
        /// Length of the rejected chunk.
        length: usize,
        /// Frame size of the queue.
        frame_size: usize,
    },
}

/// Errors that can occur within a [`RecordSink`](crate::RecordSink) implementation.
///
/// Sink errors are recoverable - the router will emit a
/// [`CoreEvent::RecordSinkError`](crate::CoreEvent::RecordSinkError) and may
/// retry the operation.
#[derive(Debug, thiserror::Error)]
pub enum SinkError {
    /// A write operation failed.
    #[error("write failed: {reason}")]
    WriteFailed {
        /// Description of what went wrong.
        reason: String,
    },

    /// File I/O error.
    #[error("file error: {path}: {source}")]
    FileError {
        /// Path to the file.
        path: PathBuf,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The sink cannot store this sample format.
    #[error("unsupported format for sink: {0}")]
    UnsupportedFormat(String),

    /// The receiving channel was closed.
    #[error("channel closed")]
    ChannelClosed,

    /// The sink was used before initialization.
    #[error("sink not initialized (call on_start first)")]
    NotInitialized,

    /// Custom error for user-implemented sinks.
    #[error("{0}")]
    Custom(String),
}

impl SinkError {
    /// Creates a custom sink error with the given message.
    pub fn custom(msg: impl Into<String>) -> Self {
        Self::Custom(msg.into())
    }

    /// Creates a write failed error with the given reason.
    pub fn write_failed(reason: impl Into<String>) -> Self {
        Self::WriteFailed {
            reason: reason.into(),
        }
    }

    /// Creates a file error for the given path.
    pub fn file_error(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::FileError {
            path: path.into(),
            source,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_core_error_display() {
        let err = CoreError::DeviceNotFound {
            name: "USB Headset".to_string(),
        };
        assert_eq!(err.to_string(), "device not found: USB Headset");

        let err = CoreError::MoveForbidden {
            endpoint: EndpointId(4),
        };
        assert_eq!(err.to_string(), "stream#4 may not be moved");
    }

    #[test]
    fn test_notification_errors_display() {
        assert_eq!(
            CoreError::BackendAlreadyRegistered.to_string(),
            "a notification backend is already registered"
        );
        assert_eq!(
            CoreError::NoBackend.to_string(),
            "no notification backend is registered"
        );
    }

    #[test]
    fn test_file_open_error() {
        let err = CoreError::file_open("/tmp/missing.wav", "No such file");
        assert!(err.to_string().contains("/tmp/missing.wav"));
        assert!(err.to_string().contains("No such file"));
    }

    #[test]
    fn test_queue_error_display() {
        let err = QueueError::Unaligned {
            length: 3,
            frame_size: 4,
        };
        assert_eq!(
            err.to_string(),
            "chunk of 3 bytes is not aligned to 4-byte frames"
        );
    }

    #[test]
    fn test_sink_error_custom() {
        let err = SinkError::custom("something went wrong");
        assert_eq!(err.to_string(), "something went wrong");
    }

    #[test]
    fn test_sink_error_write_failed() {
        let err = SinkError::write_failed("buffer full");
        assert_eq!(err.to_string(), "write failed: buffer full");
    }

    #[test]
    fn test_sink_error_file_error() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err = SinkError::file_error("/tmp/test.wav", io_err);
        assert!(err.to_string().contains("/tmp/test.wav"));
    }
}
