//! Device backends: what drives a device's IO half.
//!
//! A backend owns a [`DeviceIo`](crate::DeviceIo) on its own thread and
//! calls `render_into` (playback) or `post` (capture) once per cycle.
//!
//! - [`NullDevice`]: timer-driven virtual device, discards or produces silence
//! - `CpalDevice`: hardware device through CPAL (feature `hardware`)

#[cfg(feature = "hardware")]
mod cpal;
mod null;

#[cfg(feature = "hardware")]
pub use self::cpal::{list_input_devices, list_output_devices, CpalDevice};
pub use null::{NullDevice, NullDeviceConfig};
