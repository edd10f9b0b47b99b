//! # stream-core
//!
//! **Note:** This crate is under active development. The API may change before 1.0.
//!
//! Real-time audio stream routing with rewindable buffers.
//!
//! `stream-core` moves PCM audio between producers (files, synthetic
//! streams, capture devices) and consumers (playback devices, recorders).
//! Streams attach to devices as endpoints; each device mixes its endpoints
//! on its own IO thread and can take back ("rewind") audio it already
//! rendered when something changes, so volume changes and new streams are
//! heard at once instead of after the hardware buffer drains.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use stream_core::{Core, DeviceBuilder, NullDevice, NullDeviceConfig, play_file};
//!
//! let mut core = Core::default();
//! core.on_event(stream_core::event_callback(|e| tracing::info!(?e, "core event")));
//!
//! // A virtual sound card rendering in real time
//! let config = NullDeviceConfig::from(core.config());
//! let (sink, _device) = NullDevice::start(&mut core, DeviceBuilder::playback("null"), config)?;
//!
//! // Plays to the default sink and unlinks itself at the end of the file
//! let stream = play_file(&mut core, None, "ding.wav", None)?;
//!
//! // Service requests coming back from the IO thread
//! while core.endpoints().contains(&stream) {
//!     core.dispatch_pending();
//!     std::thread::sleep(std::time::Duration::from_millis(10));
//! }
//! # let _ = sink;
//! # Ok::<(), stream_core::CoreError>(())
//! ```
//!
//! ## Architecture
//!
//! The crate maintains a strict thread boundary:
//!
//! - **Control context**: [`Core`] owns the authoritative copy of every
//!   device and endpoint. Configuration calls validate, update it and post
//!   a message; they never wait for the IO side.
//! - **IO context**: one per device. [`DeviceIo`] drains its message ring
//!   at the start of each cycle, mixes or fans out audio and services
//!   rewinds. It never blocks and never locks.
//! - **Back channel**: the IO side asks the control side for things it may
//!   not do itself (unlinking a finished stream, reporting an underrun)
//!   through an unbounded channel drained by [`Core::dispatch_pending`].
//!
//! Around that core:
//!
//! - [`driver`]: what a stream does ([`FileStream`], [`MockStream`], loopback)
//! - [`backend`]: what drives a device ([`NullDevice`], CPAL with `hardware`)
//! - [`record`]: captured audio fanned out to async sinks
//! - [`card`]: devices grouped under selectable profiles
//! - [`notify`]: desktop notifications and the new-card prompt

#![warn(missing_docs)]
// Audio code requires intentional numeric casts between sample formats
#![allow(
    clippy::cast_precision_loss,
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::cast_possible_wrap,
    clippy::cast_lossless
)]
// unwrap/expect allowed in tests only
#![cfg_attr(test, allow(clippy::unwrap_used, clippy::expect_used))]
// These doc lints are too strict for internal implementation details
#![allow(clippy::missing_panics_doc, clippy::missing_errors_doc)]

pub mod backend;
mod builder;
pub mod card;
mod chunk;
mod config;
mod core;
pub mod driver;
mod error;
mod event;
pub mod format;
mod id;
pub mod notify;
mod pipeline;
pub mod record;
mod state;

pub use crate::core::{Core, DeviceInfo};
pub use backend::{NullDevice, NullDeviceConfig};
pub use builder::{
    DeviceBuilder, EndpointBuilder, PROP_APPLICATION_NAME, PROP_MEDIA_FILENAME, PROP_MEDIA_NAME,
};
pub use chunk::AudioChunk;
pub use config::{CoreConfig, RecordConfig, MAX_ENDPOINTS_PER_DEVICE};
pub use driver::{
    play_file, CaptureDriver, DeviceControl, FileStream, MockStats, MockStream, PlaybackDriver,
    RewindRequest, StreamContext, StreamControl, StreamDriver,
};
pub use error::{CoreError, QueueError, SinkError};
pub use event::{event_callback, CoreEvent, EventCallback, VolumeTarget};
pub use format::{SampleFormat, SampleSpec, Volume};
pub use id::{DeviceId, EndpointId};
pub use pipeline::{DeviceIo, RewindableQueue, QUEUE_MAX_LENGTH};
pub use record::RecordSink;
pub use state::{DeviceState, Direction, EndpointFlags, EndpointState};
