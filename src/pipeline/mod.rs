//! The real-time half of the pipeline.
//!
//! ```text
//!             Core (control context)
//!      DeviceMessage │          ▲ ControlMessage
//!       (SPSC ring)  ▼          │ (mpsc)
//!   driver ─pop─▶ EndpointIo ─peek/drop─▶ DeviceIo ─render─▶ backend
//!                 render queue ◀─rewind── DeviceIo ◀─rewind── backend
//! ```
//!
//! - **Queue**: rewindable byte queue keeping already played audio as history
//! - **Endpoint**: IO copy of a stream; owns the driver and a render queue
//! - **Device**: IO copy of a device; mixes, fans out and routes rewinds
//!
//! Nothing in here blocks. The control plane only reaches the IO copies
//! through messages applied at the start of a device cycle.

mod device;
pub(crate) mod endpoint;
pub(crate) mod message;
mod queue;

pub(crate) use device::{DeviceParams, DeviceShared};
pub use device::DeviceIo;
pub(crate) use endpoint::{EndpointIo, EndpointShared};
pub(crate) use message::{
    control_channel, io_channel, ControlMessage, ControlReceiver, ControlSender, DeviceMessage,
    IoSender, ReleaseReason,
};
pub use queue::{RewindableQueue, QUEUE_MAX_LENGTH};
