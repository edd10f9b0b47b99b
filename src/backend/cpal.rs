//! Hardware devices through CPAL.

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleFormat as CpalFormat, Stream, StreamConfig as CpalStreamConfig};

use crate::builder::DeviceBuilder;
use crate::chunk::AudioChunk;
use crate::core::Core;
use crate::format::{SampleFormat, SampleSpec};
use crate::id::DeviceId;
use crate::pipeline::DeviceIo;
use crate::state::Direction;
use crate::CoreError;

/// Names of the host's output devices.
pub fn list_output_devices() -> Result<Vec<String>, CoreError> {
    let host = cpal::default_host();
    let devices = host
        .output_devices()
        .map_err(|e| CoreError::BackendError(e.to_string()))?;
    Ok(devices.filter_map(|d| d.name().ok()).collect())
}

/// Names of the host's input devices.
pub fn list_input_devices() -> Result<Vec<String>, CoreError> {
    let host = cpal::default_host();
    let devices = host
        .input_devices()
        .map_err(|e| CoreError::BackendError(e.to_string()))?;
    Ok(devices.filter_map(|d| d.name().ok()).collect())
}

fn find_device(direction: Direction, name: Option<&str>) -> Result<cpal::Device, CoreError> {
    let host = cpal::default_host();
    let Some(name) = name else {
        let device = match direction {
            Direction::Playback => host.default_output_device(),
            Direction::Capture => host.default_input_device(),
        };
        return device.ok_or(CoreError::NoDefaultDevice { direction });
    };

    let devices = match direction {
        Direction::Playback => host.output_devices(),
        Direction::Capture => host.input_devices(),
    }
    .map_err(|e| CoreError::BackendError(e.to_string()))?;

    for device in devices {
        if let Ok(device_name) = device.name() {
            if device_name == name {
                return Ok(device);
            }
        }
    }

    Err(CoreError::DeviceNotFound {
        name: name.to_string(),
    })
}

fn sample_spec(format: CpalFormat, config: &CpalStreamConfig) -> Result<SampleSpec, CoreError> {
    let format = match format {
        CpalFormat::F32 => SampleFormat::F32NE,
        CpalFormat::I16 => SampleFormat::S16NE,
        format => return Err(CoreError::unsupported_format(format!("{format:?}"))),
    };
    let channels = u8::try_from(config.channels)
        .map_err(|_| CoreError::unsupported_format(format!("{} channels", config.channels)))?;
    SampleSpec::new(format, config.sample_rate.0, channels)
}

/// A hardware device driven by the CPAL audio callback.
///
/// The callback is the device's IO context. Hardware buffers cannot be
/// taken back, so these devices report a `max_rewind` of zero and rewind
/// requests only rewrite what endpoints have not yet handed over.
///
/// The stream runs while this value exists and stops when it is dropped.
pub struct CpalDevice {
    id: DeviceId,
    name: String,
    _stream: Stream,
}

impl CpalDevice {
    /// Opens an output device, the host default when `name` is `None`.
    pub fn open_output(core: &mut Core, name: Option<&str>) -> Result<(DeviceId, Self), CoreError> {
        Self::open(core, Direction::Playback, name)
    }

    /// Opens an input device, the host default when `name` is `None`.
    pub fn open_input(core: &mut Core, name: Option<&str>) -> Result<(DeviceId, Self), CoreError> {
        Self::open(core, Direction::Capture, name)
    }

    /// The device this backend drives.
    pub fn id(&self) -> DeviceId {
        self.id
    }

    /// The hardware device name.
    pub fn name(&self) -> &str {
        &self.name
    }

    fn open(
        core: &mut Core,
        direction: Direction,
        name: Option<&str>,
    ) -> Result<(DeviceId, Self), CoreError> {
        let device = find_device(direction, name)?;
        let device_name = device.name().unwrap_or_else(|_| "unknown".to_string());

        let supported = match direction {
            Direction::Playback => device.default_output_config(),
            Direction::Capture => device.default_input_config(),
        }
        .map_err(|e| CoreError::BackendError(e.to_string()))?;
        let format = supported.sample_format();
        let config: CpalStreamConfig = supported.into();
        let spec = sample_spec(format, &config)?;

        let builder = match direction {
            Direction::Playback => DeviceBuilder::playback(&device_name),
            Direction::Capture => DeviceBuilder::capture(&device_name),
        };
        let (id, io) = core.create_device(builder.description(&device_name).spec(spec).max_rewind(0))?;

        let stream = match direction {
            Direction::Playback => build_output_stream(&device, &config, format, io),
            Direction::Capture => build_input_stream(&device, &config, format, io),
        }
        .and_then(|stream| {
            stream
                .play()
                .map_err(|e| CoreError::BackendError(e.to_string()))?;
            Ok(stream)
        });
        let stream = match stream {
            Ok(stream) => stream,
            Err(e) => {
                core.unlink_device(id);
                return Err(e);
            }
        };
        core.put_device(id)?;

        tracing::info!(device = %id, name = %device_name, %spec, "hardware device opened");
        Ok((
            id,
            Self {
                id,
                name: device_name,
                _stream: stream,
            },
        ))
    }
}

fn build_output_stream(
    device: &cpal::Device,
    config: &CpalStreamConfig,
    format: CpalFormat,
    mut io: DeviceIo,
) -> Result<Stream, CoreError> {
    let mut scratch: Vec<u8> = Vec::new();
    let error = |err: cpal::StreamError| tracing::error!("Audio stream error: {}", err);

    let stream = match format {
        CpalFormat::F32 => device.build_output_stream(
            config,
            move |data: &mut [f32], info: &cpal::OutputCallbackInfo| {
                report_latency(&io, info);
                scratch.resize(data.len() * 4, 0);
                render(&mut io, &mut scratch);
                for (sample, bytes) in data.iter_mut().zip(scratch.chunks_exact(4)) {
                    *sample = f32::from_ne_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
                }
            },
            error,
            None,
        ),
        CpalFormat::I16 => device.build_output_stream(
            config,
            move |data: &mut [i16], info: &cpal::OutputCallbackInfo| {
                report_latency(&io, info);
                scratch.resize(data.len() * 2, 0);
                render(&mut io, &mut scratch);
                for (sample, bytes) in data.iter_mut().zip(scratch.chunks_exact(2)) {
                    *sample = i16::from_ne_bytes([bytes[0], bytes[1]]);
                }
            },
            error,
            None,
        ),
        format => return Err(CoreError::unsupported_format(format!("{format:?}"))),
    };
    stream.map_err(|e| CoreError::BackendError(e.to_string()))
}

fn build_input_stream(
    device: &cpal::Device,
    config: &CpalStreamConfig,
    format: CpalFormat,
    mut io: DeviceIo,
) -> Result<Stream, CoreError> {
    let error = |err: cpal::StreamError| tracing::error!("Audio stream error: {}", err);

    let stream = match format {
        CpalFormat::F32 => device.build_input_stream(
            config,
            move |data: &[f32], _: &cpal::InputCallbackInfo| {
                let bytes = data.iter().flat_map(|s| s.to_ne_bytes()).collect();
                io.post(&AudioChunk::new(bytes));
            },
            error,
            None,
        ),
        CpalFormat::I16 => device.build_input_stream(
            config,
            move |data: &[i16], _: &cpal::InputCallbackInfo| {
                let bytes = data.iter().flat_map(|s| s.to_ne_bytes()).collect();
                io.post(&AudioChunk::new(bytes));
            },
            error,
            None,
        ),
        format => return Err(CoreError::unsupported_format(format!("{format:?}"))),
    };
    stream.map_err(|e| CoreError::BackendError(e.to_string()))
}

/// One hardware cycle: apply control messages, let endpoints rewrite what
/// they asked for, then mix.
fn render(io: &mut DeviceIo, out: &mut [u8]) {
    io.process_messages();
    let rewind = io.take_rewind_request();
    if rewind > 0 {
        io.process_rewind(rewind);
    }
    io.render_into(out);
}

fn report_latency(io: &DeviceIo, info: &cpal::OutputCallbackInfo) {
    let timestamp = info.timestamp();
    if let Some(latency) = timestamp.playback.duration_since(&timestamp.callback) {
        io.set_latency(latency);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sample_spec_mapping() {
        let config = CpalStreamConfig {
            channels: 2,
            sample_rate: cpal::SampleRate(48000),
            buffer_size: cpal::BufferSize::Default,
        };
        let spec = sample_spec(CpalFormat::F32, &config).unwrap();
        assert_eq!(spec.format, SampleFormat::F32NE);
        assert_eq!(spec.rate, 48000);
        assert_eq!(spec.channels, 2);

        let spec = sample_spec(CpalFormat::I16, &config).unwrap();
        assert_eq!(spec.format, SampleFormat::S16NE);

        assert!(matches!(
            sample_spec(CpalFormat::U16, &config),
            Err(CoreError::UnsupportedFormat { .. })
        ));
    }

    // Note: Device tests require actual audio hardware and are skipped in CI
    #[test]
    #[ignore = "requires audio hardware"]
    fn test_list_devices() {
        let outputs = list_output_devices().unwrap();
        println!("Output devices: {outputs:?}");
    }

    #[test]
    #[ignore = "requires audio hardware"]
    fn test_open_default_output() {
        let mut core = Core::default();
        let (id, device) = CpalDevice::open_output(&mut core, None).unwrap();
        println!("Opened {} as {}", device.name(), id);
        assert!(core.device_state(id).unwrap().is_opened());
    }
}
