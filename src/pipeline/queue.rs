//! Rewindable queue of audio chunks.

use std::collections::VecDeque;

use crate::chunk::AudioChunk;
use crate::error::QueueError;

/// Maximum length of a stream's private queue (16 MiB).
pub const QUEUE_MAX_LENGTH: usize = 16 * 1024 * 1024;

/// A FIFO of audio chunks whose read pointer can move backwards.
///
/// Data behind the read pointer is kept as history, up to `max_rewind`
/// bytes, so that already consumed audio can be replayed after a rewind.
/// Indices are absolute byte positions that only grow, which keeps
/// `base <= read <= write` easy to reason about.
///
/// Single owner, no locking. Peeking and slicing never copy sample data.
///
/// # Example
///
/// ```
/// use stream_core::{AudioChunk, RewindableQueue};
///
/// let mut queue = RewindableQueue::new(4, 1024, 64);
/// queue.push(AudioChunk::new(vec![0; 32])).unwrap();
///
/// assert_eq!(queue.drop(16), 16);
/// assert_eq!(queue.rewind(100), 16); // clamped to the retained history
/// assert_eq!(queue.length(), 32);
/// ```
#[derive(Debug)]
pub struct RewindableQueue {
    chunks: VecDeque<AudioChunk>,
    base_index: u64,
    read_index: u64,
    write_index: u64,
    /// Chunk holding `read_index`, or `chunks.len()` when fully read.
    cursor: usize,
    cursor_start: u64,
    frame_size: usize,
    max_length: usize,
    max_rewind: usize,
}

impl RewindableQueue {
    /// Creates an empty queue.
    ///
    /// `max_length` bounds history plus unread data, `max_rewind` bounds the
    /// history alone. Both are in bytes.
    pub fn new(frame_size: usize, max_length: usize, max_rewind: usize) -> Self {
        Self {
            chunks: VecDeque::new(),
            base_index: 0,
            read_index: 0,
            write_index: 0,
            cursor: 0,
            cursor_start: 0,
            frame_size: frame_size.max(1),
            max_length,
            max_rewind,
        }
    }

    /// Appends a chunk without copying it.
    ///
    /// History is discarded oldest-first to make room. The push is rejected,
    /// leaving the queue unchanged, if the unread data alone would exceed the
    /// maximum length.
    pub fn push(&mut self, chunk: AudioChunk) -> Result<(), QueueError> {
        let length = chunk.len();
        if length % self.frame_size != 0 {
            return Err(QueueError::Unaligned {
                length,
                frame_size: self.frame_size,
            });
        }
        if length == 0 {
            return Ok(());
        }

        let available = self.max_length.saturating_sub(self.length());
        if length > available {
            return Err(QueueError::CapacityExceeded {
                requested: length,
                available,
            });
        }

        self.trim_history((available - length).min(self.max_rewind));
        self.chunks.push_back(chunk);
        self.write_index += length as u64;
        Ok(())
    }

    /// Returns the next unread contiguous chunk, or `None` if nothing is unread.
    pub fn peek(&self) -> Option<AudioChunk> {
        if self.read_index >= self.write_index {
            return None;
        }
        let chunk = self.chunks.get(self.cursor)?;
        let offset = (self.read_index - self.cursor_start) as usize;
        Some(chunk.slice(offset, chunk.len() - offset))
    }

    /// Advances the read pointer by up to `length` bytes.
    ///
    /// Returns the number of bytes dropped, which is clamped to the unread
    /// length and rounded down to a whole frame.
    pub fn drop(&mut self, length: usize) -> usize {
        let n = self.align(length.min(self.length()));
        self.read_index += n as u64;

        while let Some(chunk) = self.chunks.get(self.cursor) {
            let end = self.cursor_start + chunk.len() as u64;
            if self.read_index < end {
                break;
            }
            self.cursor_start = end;
            self.cursor += 1;
        }

        self.trim_history(self.max_rewind);
        n
    }

    /// Moves the read pointer back by up to `length` bytes.
    ///
    /// Returns the number of bytes rewound, clamped to the retained history.
    pub fn rewind(&mut self, length: usize) -> usize {
        let n = self.align(length.min(self.history()));
        self.read_index -= n as u64;

        while self.read_index < self.cursor_start && self.cursor > 0 {
            self.cursor -= 1;
            self.cursor_start -= self.chunks[self.cursor].len() as u64;
        }
        n
    }

    /// Removes up to `length` unread bytes from the tail, newest first.
    ///
    /// Returns the number of bytes removed, clamped to the unread length and
    /// rounded down to a whole frame. History is left alone.
    pub fn truncate(&mut self, length: usize) -> usize {
        let n = self.align(length.min(self.length()));
        if n == 0 {
            return 0;
        }

        let target = self.write_index - n as u64;
        let mut end = self.write_index;
        while let Some(last) = self.chunks.back_mut() {
            let start = end - last.len() as u64;
            if start < target {
                *last = last.slice(0, (target - start) as usize);
                break;
            }
            self.chunks.pop_back();
            end = start;
            if end == target {
                break;
            }
        }
        self.write_index = target;

        // the chunk under the cursor may now end at the read pointer
        while let Some(chunk) = self.chunks.get(self.cursor) {
            let end = self.cursor_start + chunk.len() as u64;
            if self.read_index < end {
                break;
            }
            self.cursor_start = end;
            self.cursor += 1;
        }
        n
    }

    /// Drops all unread data from the tail. Returns the number of bytes removed.
    pub fn discard_unread(&mut self) -> usize {
        self.truncate(self.length())
    }

    /// Drops all unread data through the read pointer, keeping it as history.
    pub fn flush(&mut self) -> usize {
        self.drop(self.length())
    }

    /// Changes how much history is kept. Shrinking discards history at once.
    pub fn set_max_rewind(&mut self, max_rewind: usize) {
        self.max_rewind = max_rewind;
        self.trim_history(max_rewind);
    }

    /// Changes the maximum of history plus unread data.
    pub fn set_max_length(&mut self, max_length: usize) {
        self.max_length = max_length;
        let room = max_length.saturating_sub(self.length());
        self.trim_history(room.min(self.max_rewind));
    }

    /// Unread bytes.
    pub fn length(&self) -> usize {
        (self.write_index - self.read_index) as usize
    }

    /// Retained bytes behind the read pointer.
    pub fn history(&self) -> usize {
        (self.read_index - self.base_index) as usize
    }

    /// Returns `true` if there is nothing left to read.
    pub fn is_empty(&self) -> bool {
        self.read_index == self.write_index
    }

    /// Absolute read position in bytes.
    pub fn read_index(&self) -> u64 {
        self.read_index
    }

    /// Absolute write position in bytes.
    pub fn write_index(&self) -> u64 {
        self.write_index
    }

    /// Current history bound.
    pub fn max_rewind(&self) -> usize {
        self.max_rewind
    }

    /// Current length bound.
    pub fn max_length(&self) -> usize {
        self.max_length
    }

    /// Frame size the queue aligns to.
    pub fn frame_size(&self) -> usize {
        self.frame_size
    }

    fn align(&self, length: usize) -> usize {
        length - length % self.frame_size
    }

    fn trim_history(&mut self, keep: usize) {
        let target = self.read_index.saturating_sub(self.align(keep) as u64);

        while self.base_index < target {
            let Some(front) = self.chunks.front() else {
                break;
            };
            let end = self.base_index + front.len() as u64;
            if end <= target {
                // the cursor is past this chunk since it ends at or before the read index
                self.chunks.pop_front();
                self.base_index = end;
                self.cursor = self.cursor.saturating_sub(1);
            } else {
                let cut = (target - self.base_index) as usize;
                let trimmed = front.slice(cut, front.len() - cut);
                self.chunks[0] = trimmed;
                if self.cursor == 0 {
                    self.cursor_start = target;
                }
                self.base_index = target;
            }
        }
    }
}
