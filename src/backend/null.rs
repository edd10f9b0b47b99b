//! Virtual device driven by a timer thread.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crate::builder::DeviceBuilder;
use crate::chunk::AudioChunk;
use crate::config::CoreConfig;
use crate::core::Core;
use crate::driver::DeviceControl;
use crate::id::DeviceId;
use crate::pipeline::DeviceIo;
use crate::state::Direction;
use crate::CoreError;

/// Configuration of a [`NullDevice`].
#[derive(Debug, Clone)]
pub struct NullDeviceConfig {
    /// Audio processed per tick.
    ///
    /// Default: 25ms
    pub fragment: Duration,

    /// Sleep between ticks to run at real-time speed. When `false` the
    /// thread runs as fast as it can, which is handy for offline rendering.
    ///
    /// Default: true
    pub realtime: bool,
}

impl Default for NullDeviceConfig {
    fn default() -> Self {
        Self {
            fragment: Duration::from_millis(25),
            realtime: true,
        }
    }
}

impl From<&CoreConfig> for NullDeviceConfig {
    fn from(config: &CoreConfig) -> Self {
        Self {
            fragment: config.fragment_duration,
            ..Self::default()
        }
    }
}

/// Reports the tick length as the device latency.
struct NullControl {
    latency: Duration,
}

impl DeviceControl for NullControl {
    fn latency(&self) -> Option<Duration> {
        Some(self.latency)
    }
}

/// A device whose IO thread renders into nothing (playback) or records
/// silence (capture), at real-time pace.
///
/// Rewinds are always serviced in full. The IO thread stops when the
/// `NullDevice` is dropped.
///
/// # Example
///
/// ```no_run
/// use stream_core::{Core, DeviceBuilder, NullDevice, NullDeviceConfig};
///
/// let mut core = Core::default();
/// let config = NullDeviceConfig::from(core.config());
/// let (sink, device) = NullDevice::start(&mut core, DeviceBuilder::playback("null"), config)?;
/// # Ok::<(), stream_core::CoreError>(())
/// ```
pub struct NullDevice {
    id: DeviceId,
    running: Arc<AtomicBool>,
    processed: Arc<AtomicU64>,
    thread: Option<JoinHandle<()>>,
}

impl NullDevice {
    /// Creates, links and starts driving a device.
    pub fn start(
        core: &mut Core,
        mut builder: DeviceBuilder,
        config: NullDeviceConfig,
    ) -> Result<(DeviceId, Self), CoreError> {
        if builder.control.is_none() {
            builder = builder.control(NullControl {
                latency: config.fragment,
            });
        }
        let (id, io) = core.create_device(builder)?;
        let device = match Self::spawn(io, config) {
            Ok(device) => device,
            Err(e) => {
                core.unlink_device(id);
                return Err(e);
            }
        };
        if let Err(e) = core.put_device(id) {
            // dropping `device` joins the IO thread
            core.unlink_device(id);
            return Err(e);
        }
        Ok((id, device))
    }

    /// Starts a thread driving an already created device.
    pub fn spawn(mut io: DeviceIo, config: NullDeviceConfig) -> Result<Self, CoreError> {
        let id = io.id();
        let running = Arc::new(AtomicBool::new(true));
        let processed = Arc::new(AtomicU64::new(0));

        let thread = {
            let running = running.clone();
            let processed = processed.clone();
            std::thread::Builder::new()
                .name(format!("null-{id}"))
                .spawn(move || run(&mut io, &config, &running, &processed))
                .map_err(|e| CoreError::BackendError(e.to_string()))?
        };

        tracing::debug!(device = %id, "null device started");
        Ok(Self {
            id,
            running,
            processed,
            thread: Some(thread),
        })
    }

    /// The device this backend drives.
    pub fn id(&self) -> DeviceId {
        self.id
    }

    /// Bytes rendered or posted so far.
    pub fn bytes_processed(&self) -> u64 {
        self.processed.load(Ordering::Relaxed)
    }

    /// Stops the IO thread and waits for it.
    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        self.running.store(false, Ordering::Release);
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                tracing::error!(device = %self.id, "null device thread panicked");
            }
        }
    }
}

impl Drop for NullDevice {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn run(io: &mut DeviceIo, config: &NullDeviceConfig, running: &AtomicBool, processed: &AtomicU64) {
    let spec = *io.spec();
    let length = spec
        .frame_align(spec.duration_to_bytes(config.fragment))
        .max(spec.frame_size());
    let fragment = spec.bytes_to_duration(length);
    let mut buffer = vec![0u8; length];
    io.set_latency(fragment);

    let mut next = Instant::now();
    while running.load(Ordering::Acquire) {
        match io.direction() {
            Direction::Playback => {
                io.process_messages();
                io.service_rewind();
                io.render_into(&mut buffer);
            }
            Direction::Capture => {
                io.post(&AudioChunk::silence(&spec, length));
            }
        }
        processed.fetch_add(length as u64, Ordering::Relaxed);

        if config.realtime {
            next += fragment;
            let now = Instant::now();
            if next > now {
                std::thread::sleep(next - now);
            } else {
                // fell behind; don't try to catch up
                next = now;
            }
        } else {
            std::thread::yield_now();
        }
    }
    tracing::debug!(device = %io.id(), "null device stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::EndpointBuilder;
    use crate::driver::MockStream;
    use crate::format::{SampleFormat, SampleSpec};
    use crate::state::DeviceState;

    fn spec() -> SampleSpec {
        SampleSpec::new(SampleFormat::S16NE, 8000, 1).unwrap()
    }

    fn fast() -> NullDeviceConfig {
        NullDeviceConfig {
            fragment: Duration::from_millis(5),
            realtime: true,
        }
    }

    #[test]
    fn test_null_config_defaults() {
        let config = NullDeviceConfig::default();
        assert_eq!(config.fragment, Duration::from_millis(25));
        assert!(config.realtime);
    }

    #[test]
    fn test_null_config_follows_core_fragment() {
        let core = CoreConfig {
            fragment_duration: Duration::from_millis(10),
            ..Default::default()
        };
        let config = NullDeviceConfig::from(&core);
        assert_eq!(config.fragment, Duration::from_millis(10));
    }

    struct Refusing;

    impl DeviceControl for Refusing {
        fn set_state(&mut self, _state: DeviceState) -> Result<(), String> {
            Err("device is busy".to_string())
        }
    }

    #[test]
    fn test_refused_start_leaves_nothing_registered() {
        let mut core = Core::default();
        let result = NullDevice::start(
            &mut core,
            DeviceBuilder::playback("null").spec(spec()).control(Refusing),
            fast(),
        );
        assert!(matches!(result, Err(CoreError::StateChangeRefused { .. })));
        assert!(core.devices().is_empty());
        assert_eq!(core.find_device("null"), None);
        assert_eq!(core.default_device(Direction::Playback), None);

        // the name is free again
        let (_, device) =
            NullDevice::start(&mut core, DeviceBuilder::playback("null").spec(spec()), fast())
                .unwrap();
        device.stop();
    }

    #[test]
    fn test_null_sink_pulls_streams() {
        let mut core = Core::default();
        let (sink, device) =
            NullDevice::start(&mut core, DeviceBuilder::playback("null").spec(spec()), fast())
                .unwrap();
        assert_eq!(core.device_state(sink).unwrap(), DeviceState::Idle);
        assert_eq!(core.device_latency(sink).unwrap(), Duration::from_millis(5));

        let stream = MockStream::sine(spec(), 440.0);
        let stats = stream.stats();
        let ep = core
            .create_endpoint(EndpointBuilder::playback(spec(), stream))
            .unwrap();
        core.put_endpoint(ep).unwrap();

        let deadline = Instant::now() + Duration::from_secs(5);
        while stats.lock().bytes_produced == 0 && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(5));
        }
        assert!(stats.lock().bytes_produced > 0);
        assert!(device.bytes_processed() > 0);

        device.stop();
    }

    #[test]
    fn test_null_source_posts_silence() {
        let mut core = Core::default();
        let (source, _device) =
            NullDevice::start(&mut core, DeviceBuilder::capture("null-in").spec(spec()), fast())
                .unwrap();

        let recorder = MockStream::silence(spec());
        let stats = recorder.stats();
        let ep = core
            .create_endpoint(EndpointBuilder::capture(spec(), recorder).device(source))
            .unwrap();
        core.put_endpoint(ep).unwrap();

        let deadline = Instant::now() + Duration::from_secs(5);
        while stats.lock().captured.is_empty() && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(5));
        }
        let stats = stats.lock();
        assert!(!stats.captured.is_empty());
        assert!(stats.captured.iter().all(|&b| b == 0));
    }
}
