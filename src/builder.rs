//! Builders for devices and stream endpoints.

use std::collections::BTreeMap;
use std::time::Duration;

use crate::driver::{CaptureDriver, DeviceControl, DriverSlot, PlaybackDriver, StreamControl};
use crate::format::{SampleSpec, Volume};
use crate::id::DeviceId;
use crate::state::{Direction, EndpointFlags};

/// Property key for a human readable stream name.
pub const PROP_MEDIA_NAME: &str = "media.name";
/// Property key for the file a stream plays.
pub const PROP_MEDIA_FILENAME: &str = "media.filename";
/// Property key for the application owning a stream.
pub const PROP_APPLICATION_NAME: &str = "application.name";

/// Describes a device to register with [`Core::create_device`](crate::Core::create_device).
///
/// # Example
///
/// ```
/// use stream_core::{DeviceBuilder, SampleFormat, SampleSpec};
///
/// let spec = SampleSpec::new(SampleFormat::S16NE, 48000, 2)?;
/// let builder = DeviceBuilder::playback("speakers")
///     .description("Built-in Speakers")
///     .spec(spec);
/// # Ok::<(), stream_core::CoreError>(())
/// ```
#[must_use]
pub struct DeviceBuilder {
    pub(crate) name: String,
    pub(crate) description: Option<String>,
    pub(crate) direction: Direction,
    pub(crate) spec: Option<SampleSpec>,
    pub(crate) volume: Option<Volume>,
    pub(crate) muted: bool,
    pub(crate) latency_range: Option<(Duration, Duration)>,
    pub(crate) max_rewind: Option<usize>,
    pub(crate) control: Option<Box<dyn DeviceControl>>,
}

impl DeviceBuilder {
    fn new(name: impl Into<String>, direction: Direction) -> Self {
        Self {
            name: name.into(),
            description: None,
            direction,
            spec: None,
            volume: None,
            muted: false,
            latency_range: None,
            max_rewind: None,
            control: None,
        }
    }

    /// A playback device (sink) with a unique name.
    pub fn playback(name: impl Into<String>) -> Self {
        Self::new(name, Direction::Playback)
    }

    /// A capture device (source) with a unique name.
    pub fn capture(name: impl Into<String>) -> Self {
        Self::new(name, Direction::Capture)
    }

    /// Human readable description. Defaults to the name.
    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Sample spec. Defaults to [`CoreConfig::default_spec`](crate::CoreConfig::default_spec).
    pub fn spec(mut self, spec: SampleSpec) -> Self {
        self.spec = Some(spec);
        self
    }

    /// Initial volume. Must have as many channels as the spec.
    pub fn volume(mut self, volume: Volume) -> Self {
        self.volume = Some(volume);
        self
    }

    /// Start muted.
    pub fn muted(mut self, muted: bool) -> Self {
        self.muted = muted;
        self
    }

    /// Range the requested latency is clamped to.
    pub fn latency_range(mut self, min: Duration, max: Duration) -> Self {
        self.latency_range = Some((min.min(max), max.max(min)));
        self
    }

    /// How many bytes of played audio the device can take back.
    ///
    /// Defaults to [`CoreConfig::max_rewind`](crate::CoreConfig::max_rewind)
    /// worth of bytes.
    pub fn max_rewind(mut self, nbytes: usize) -> Self {
        self.max_rewind = Some(nbytes);
        self
    }

    /// Control-plane hooks of the backend driving this device.
    pub fn control(mut self, control: impl DeviceControl + 'static) -> Self {
        self.control = Some(Box::new(control));
        self
    }
}

/// Describes a stream endpoint to register with
/// [`Core::create_endpoint`](crate::Core::create_endpoint).
///
/// # Example
///
/// ```
/// use stream_core::{EndpointBuilder, EndpointFlags, MockStream, SampleSpec};
///
/// let spec = SampleSpec::default();
/// let builder = EndpointBuilder::playback(spec, MockStream::sine(spec, 440.0))
///     .name("beep")
///     .flags(EndpointFlags::DONT_MOVE);
/// ```
#[must_use]
pub struct EndpointBuilder {
    pub(crate) driver: DriverSlot,
    pub(crate) spec: SampleSpec,
    pub(crate) device: Option<DeviceId>,
    pub(crate) flags: EndpointFlags,
    pub(crate) volume: Option<Volume>,
    pub(crate) muted: bool,
    pub(crate) latency: Option<Duration>,
    pub(crate) properties: BTreeMap<String, String>,
    pub(crate) control: Option<Box<dyn StreamControl>>,
}

impl EndpointBuilder {
    fn new(spec: SampleSpec, driver: DriverSlot) -> Self {
        Self {
            driver,
            spec,
            device: None,
            flags: EndpointFlags::empty(),
            volume: None,
            muted: false,
            latency: None,
            properties: BTreeMap::new(),
            control: None,
        }
    }

    /// A playback endpoint (sink input) fed by `driver`, producing `spec` audio.
    pub fn playback<D: PlaybackDriver + 'static>(spec: SampleSpec, driver: D) -> Self {
        Self::new(spec, DriverSlot::Playback(Box::new(driver)))
    }

    /// A capture endpoint (source output) delivering `spec` audio to `driver`.
    pub fn capture<D: CaptureDriver + 'static>(spec: SampleSpec, driver: D) -> Self {
        Self::new(spec, DriverSlot::Capture(Box::new(driver)))
    }

    /// Device to attach to. Defaults to the default device of the direction.
    pub fn device(mut self, device: DeviceId) -> Self {
        self.device = Some(device);
        self
    }

    /// Same as [`device`](Self::device), taking an optional id.
    pub fn device_opt(mut self, device: Option<DeviceId>) -> Self {
        self.device = device;
        self
    }

    /// Behaviour flags.
    pub fn flags(mut self, flags: EndpointFlags) -> Self {
        self.flags = flags;
        self
    }

    /// Initial volume. Must have as many channels as the spec.
    pub fn volume(mut self, volume: Volume) -> Self {
        self.volume = Some(volume);
        self
    }

    /// Start muted.
    pub fn muted(mut self, muted: bool) -> Self {
        self.muted = muted;
        self
    }

    /// Latency to ask the device for.
    pub fn latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Sets a free-form property.
    pub fn property(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }

    /// Shorthand for the [`PROP_MEDIA_NAME`] property.
    pub fn name(self, name: impl Into<String>) -> Self {
        self.property(PROP_MEDIA_NAME, name)
    }

    /// Control-plane hooks of the stream.
    pub fn control(mut self, control: impl StreamControl + 'static) -> Self {
        self.control = Some(Box::new(control));
        self
    }
}
