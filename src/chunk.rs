//! Shared, immutable views of audio bytes.

use std::sync::Arc;
use std::time::Duration;

use crate::format::SampleSpec;

/// A view into a reference-counted block of PCM bytes.
///
/// `AudioChunk` is the unit of audio passed through the pipeline. Cloning and
/// slicing never copy sample data; the block is freed when the last view is
/// dropped. The view always stays inside its block.
///
/// # Example
///
/// ```
/// use stream_core::AudioChunk;
///
/// let chunk = AudioChunk::new(vec![1, 2, 3, 4, 5, 6]);
/// let tail = chunk.slice(2, 4);
/// assert_eq!(tail.bytes(), &[3, 4, 5, 6]);
/// assert!(tail.shares_block(&chunk));
/// ```
#[derive(Debug, Clone)]
pub struct AudioChunk {
    block: Arc<Vec<u8>>,
    offset: usize,
    length: usize,
}

impl AudioChunk {
    /// Wraps a byte vector in a new block, viewing all of it.
    pub fn new(bytes: Vec<u8>) -> Self {
        let length = bytes.len();
        Self {
            block: Arc::new(bytes),
            offset: 0,
            length,
        }
    }

    /// Creates a view into an existing block, clamped to the block's bounds.
    pub fn from_arc(block: Arc<Vec<u8>>, offset: usize, length: usize) -> Self {
        let offset = offset.min(block.len());
        let length = length.min(block.len() - offset);
        Self {
            block,
            offset,
            length,
        }
    }

    /// A newly allocated chunk of `length` bytes of silence for `spec`.
    pub fn silence(spec: &SampleSpec, length: usize) -> Self {
        Self::new(vec![spec.format.silence_byte(); length])
    }

    /// The viewed bytes.
    pub fn bytes(&self) -> &[u8] {
        &self.block[self.offset..self.offset + self.length]
    }

    /// Length of the view in bytes.
    pub fn len(&self) -> usize {
        self.length
    }

    /// Returns `true` if the view is empty.
    pub fn is_empty(&self) -> bool {
        self.length == 0
    }

    /// Offset of the view inside its block.
    pub fn offset(&self) -> usize {
        self.offset
    }

    /// A sub-view starting `offset` bytes into this view, clamped to it.
    #[must_use]
    pub fn slice(&self, offset: usize, length: usize) -> Self {
        let offset = offset.min(self.length);
        let length = length.min(self.length - offset);
        Self {
            block: Arc::clone(&self.block),
            offset: self.offset + offset,
            length,
        }
    }

    /// Returns `true` if both views point into the same block.
    pub fn shares_block(&self, other: &AudioChunk) -> bool {
        Arc::ptr_eq(&self.block, &other.block)
    }

    /// Number of whole frames in this chunk.
    pub fn frame_count(&self, spec: &SampleSpec) -> usize {
        self.length / spec.frame_size().max(1)
    }

    /// Playback time of this chunk.
    pub fn duration(&self, spec: &SampleSpec) -> Duration {
        spec.bytes_to_duration(self.length)
    }
}
