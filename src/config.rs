//! Configuration types for the core and for recordings.

use std::time::Duration;

use crate::format::SampleSpec;

/// Most endpoints a single device accepts.
pub const MAX_ENDPOINTS_PER_DEVICE: usize = 32;

/// Configuration of a [`Core`](crate::Core).
///
/// Use [`CoreConfig::default()`] for sensible defaults, or customize as needed.
///
/// # Example
///
/// ```
/// use stream_core::CoreConfig;
/// use std::time::Duration;
///
/// let config = CoreConfig {
///     fragment_duration: Duration::from_millis(10),
///     ..Default::default()
/// };
/// ```
#[derive(Debug, Clone)]
pub struct CoreConfig {
    /// Spec for devices built without one.
    ///
    /// Default: S16 native endian, 44100 Hz, stereo
    pub default_spec: SampleSpec,

    /// Length of one device cycle. Virtual devices render this much per tick.
    ///
    /// Default: 25ms
    pub fragment_duration: Duration,

    /// Capacity of each device's control-to-IO message ring.
    ///
    /// Control calls fail with
    /// [`CoreError::IoQueueFull`](crate::CoreError::IoQueueFull) when a
    /// device stops draining it.
    /// Default: 128
    pub io_queue_capacity: usize,

    /// How much played audio devices keep for rewinds.
    ///
    /// Default: 2 seconds
    pub max_rewind: Duration,

    /// Lower bound for the latency a device can be asked to run at.
    ///
    /// Default: 5ms
    pub min_latency: Duration,

    /// Upper bound for the latency a device can be asked to run at.
    ///
    /// Default: 2 seconds
    pub max_latency: Duration,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            default_spec: SampleSpec::default(),
            fragment_duration: Duration::from_millis(25),
            io_queue_capacity: 128,
            max_rewind: Duration::from_secs(2),
            min_latency: Duration::from_millis(5),
            max_latency: Duration::from_secs(2),
        }
    }
}

/// Configuration of a recording.
///
/// # Example
///
/// ```
/// use stream_core::RecordConfig;
/// use std::time::Duration;
///
/// let config = RecordConfig {
///     chunk_duration: Duration::from_millis(50),
///     ..Default::default()
/// };
/// ```
#[derive(Debug, Clone)]
pub struct RecordConfig {
    /// Duration of each audio chunk sent to sinks.
    ///
    /// Smaller values reduce latency but increase overhead.
    /// Default: 100ms
    pub chunk_duration: Duration,

    /// Size of the ring buffer between the capture device and the sinks.
    ///
    /// If it fills, the newest audio is dropped and a
    /// [`CoreEvent::RecordOverflow`](crate::CoreEvent::RecordOverflow) is emitted.
    /// Default: 30 seconds
    pub ring_buffer_duration: Duration,

    /// Number of retry attempts for failed sink writes.
    ///
    /// Default: 3
    pub sink_retry_attempts: u32,

    /// Initial delay between sink retry attempts.
    ///
    /// Uses exponential backoff (delay doubles each attempt).
    /// Default: 100ms
    pub sink_retry_delay: Duration,
}

impl Default for RecordConfig {
    fn default() -> Self {
        Self {
            chunk_duration: Duration::from_millis(100),
            ring_buffer_duration: Duration::from_secs(30),
            sink_retry_attempts: 3,
            sink_retry_delay: Duration::from_millis(100),
        }
    }
}
