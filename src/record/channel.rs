//! Hands recorded chunks to a tokio channel.

use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

use super::RecordSink;
use crate::{AudioChunk, SinkError};

/// Forwards every chunk into an `mpsc` channel, for consumers that process
/// audio as it arrives.
///
/// ```
/// use stream_core::AudioChunk;
/// use stream_core::record::ChannelSink;
/// use tokio::sync::mpsc;
///
/// let (tx, mut rx) = mpsc::channel::<AudioChunk>(100);
/// let sink = ChannelSink::new(tx);
/// // add it to a RecordBuilder, then `rx.recv().await` the chunks
/// ```
pub struct ChannelSink {
    name: String,
    sender: mpsc::Sender<AudioChunk>,
    lossy: bool,
    dropped: AtomicU64,
}

impl ChannelSink {
    /// A sink that waits while the channel is full.
    ///
    /// Waiting holds up the other sinks of the recording, so size the
    /// channel for the slowest expected consumer.
    pub fn new(sender: mpsc::Sender<AudioChunk>) -> Self {
        Self::with_name("channel", sender)
    }

    /// Like [`new`](Self::new) with a custom name.
    pub fn with_name(name: impl Into<String>, sender: mpsc::Sender<AudioChunk>) -> Self {
        Self {
            name: name.into(),
            sender,
            lossy: false,
            dropped: AtomicU64::new(0),
        }
    }

    /// A sink that drops chunks instead of waiting when the channel is full.
    pub fn lossy(sender: mpsc::Sender<AudioChunk>) -> Self {
        Self {
            lossy: true,
            ..Self::with_name("channel", sender)
        }
    }

    /// Chunks a lossy sink dropped so far.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl RecordSink for ChannelSink {
    fn name(&self) -> &str {
        &self.name
    }

    async fn write(&self, chunk: &AudioChunk) -> Result<(), SinkError> {
        if !self.lossy {
            return self
                .sender
                .send(chunk.clone())
                .await
                .map_err(|_| SinkError::ChannelClosed);
        }

        match self.sender.try_send(chunk.clone()) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => {
                let dropped = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                tracing::trace!(sink = %self.name, dropped, "channel full, chunk dropped");
                Ok(())
            }
            Err(TrySendError::Closed(_)) => Err(SinkError::ChannelClosed),
        }
    }
}
