//! Messages crossing the control/IO boundary.
//!
//! ```text
//! Core ──DeviceMessage (SPSC ring, per device)──▶ DeviceIo
//! Core ◀──ControlMessage (unbounded mpsc, shared)── DeviceIo / drivers
//! ```
//!
//! The ring never blocks the IO thread and the IO side only ever pops from
//! it at the start of a cycle.

use std::time::Duration;

use ringbuf::traits::{Consumer, Observer, Producer, Split};
use ringbuf::{HeapCons, HeapProd, HeapRb};
use tokio::sync::mpsc;

use super::endpoint::EndpointIo;
use crate::format::Volume;
use crate::id::{DeviceId, EndpointId};
use crate::state::{DeviceState, EndpointState};
use crate::CoreError;

/// Why a device hands an endpoint back to the control plane.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ReleaseReason {
    /// The endpoint was unlinked; control drops it.
    Unlink,
    /// The endpoint is moving; control attaches it to its new device.
    Move {
        /// Drop buffered audio instead of carrying it over.
        immediately: bool,
    },
}

/// Control → IO.
pub(crate) enum DeviceMessage {
    AddEndpoint {
        endpoint: Box<EndpointIo>,
        state: EndpointState,
    },
    RemoveEndpoint {
        endpoint: EndpointId,
        reason: ReleaseReason,
    },
    SetEndpointState {
        endpoint: EndpointId,
        state: EndpointState,
    },
    SetEndpointVolume {
        endpoint: EndpointId,
        volume: Volume,
    },
    SetEndpointMute {
        endpoint: EndpointId,
        muted: bool,
    },
    SetEndpointLatency {
        endpoint: EndpointId,
        latency: Option<Duration>,
    },
    RequestRewind {
        endpoint: EndpointId,
        nbytes: usize,
        ignore_current_rewind: bool,
        not_here: bool,
    },
    SetVolume(Volume),
    SetMute(bool),
    SetState(DeviceState),
}

/// IO → control.
pub(crate) enum ControlMessage {
    /// A driver can never produce data again.
    UnlinkEndpoint { endpoint: EndpointId },
    /// A device detached an endpoint and hands it back.
    EndpointReleased {
        device: DeviceId,
        endpoint: Box<EndpointIo>,
        reason: ReleaseReason,
    },
    /// A running endpoint had nothing to play.
    EndpointDrained { endpoint: EndpointId },
    /// The latency a device should run at changed.
    LatencyChanged {
        device: DeviceId,
        latency: Option<Duration>,
    },
}

/// Control-side end of a device's message ring.
pub(crate) struct IoSender {
    device: DeviceId,
    producer: HeapProd<DeviceMessage>,
}

impl IoSender {
    /// Queues a message without blocking.
    pub(crate) fn send(&mut self, message: DeviceMessage) -> Result<(), CoreError> {
        self.try_send(message).map_err(|_| CoreError::IoQueueFull {
            device: self.device,
        })
    }

    /// Like [`send`](Self::send), but hands the message back when the ring is full.
    pub(crate) fn try_send(&mut self, message: DeviceMessage) -> Result<(), DeviceMessage> {
        self.producer.try_push(message)
    }

    pub(crate) fn device(&self) -> DeviceId {
        self.device
    }

    /// Messages the IO side has not drained yet.
    pub(crate) fn pending(&self) -> usize {
        self.producer.occupied_len()
    }
}

/// IO-side end of a device's message ring.
pub(crate) struct IoReceiver {
    consumer: HeapCons<DeviceMessage>,
}

impl IoReceiver {
    pub(crate) fn try_recv(&mut self) -> Option<DeviceMessage> {
        self.consumer.try_pop()
    }
}

/// Creates the message ring of one device.
pub(crate) fn io_channel(device: DeviceId, capacity: usize) -> (IoSender, IoReceiver) {
    let (producer, consumer) = HeapRb::<DeviceMessage>::new(capacity.max(1)).split();
    (IoSender { device, producer }, IoReceiver { consumer })
}

/// Sending end of the IO → control channel.
#[derive(Clone)]
pub(crate) struct ControlSender {
    tx: mpsc::UnboundedSender<ControlMessage>,
}

impl ControlSender {
    /// Sends without blocking. If the control plane is gone the message is dropped.
    pub(crate) fn send(&self, message: ControlMessage) {
        if self.tx.send(message).is_err() {
            tracing::trace!("control plane gone, dropping IO message");
        }
    }
}

/// Receiving end of the IO → control channel.
pub(crate) struct ControlReceiver {
    rx: mpsc::UnboundedReceiver<ControlMessage>,
}

impl ControlReceiver {
    pub(crate) fn try_recv(&mut self) -> Option<ControlMessage> {
        self.rx.try_recv().ok()
    }

    pub(crate) async fn recv(&mut self) -> Option<ControlMessage> {
        self.rx.recv().await
    }
}

/// Creates the IO → control channel.
pub(crate) fn control_channel() -> (ControlSender, ControlReceiver) {
    let (tx, rx) = mpsc::unbounded_channel();
    (ControlSender { tx }, ControlReceiver { rx })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_io_channel_preserves_order() {
        let (mut tx, mut rx) = io_channel(DeviceId(0), 4);
        tx.send(DeviceMessage::SetMute(true)).unwrap();
        tx.send(DeviceMessage::SetMute(false)).unwrap();
        assert_eq!(tx.pending(), 2);

        assert!(matches!(rx.try_recv(), Some(DeviceMessage::SetMute(true))));
        assert!(matches!(rx.try_recv(), Some(DeviceMessage::SetMute(false))));
        assert!(rx.try_recv().is_none());
    }

    #[test]
    fn test_io_channel_full() {
        let (mut tx, _rx) = io_channel(DeviceId(5), 1);
        tx.send(DeviceMessage::SetMute(true)).unwrap();
        let err = tx.send(DeviceMessage::SetMute(false)).unwrap_err();
        assert!(matches!(err, CoreError::IoQueueFull { device } if device == DeviceId(5)));
    }

    #[test]
    fn test_control_channel_survives_closed_receiver() {
        let (tx, rx) = control_channel();
        drop(rx);
        // must not panic
        tx.send(ControlMessage::EndpointDrained {
            endpoint: EndpointId(1),
        });
    }

    #[test]
    fn test_control_channel_delivers() {
        let (tx, mut rx) = control_channel();
        tx.send(ControlMessage::UnlinkEndpoint {
            endpoint: EndpointId(9),
        });
        assert!(matches!(
            rx.try_recv(),
            Some(ControlMessage::UnlinkEndpoint { endpoint }) if endpoint == EndpointId(9)
        ));
    }
}
