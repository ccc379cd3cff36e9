//! Outbound queue for updates made while disconnected.
//!
//! Frames are replayed in submission order when the connection opens. A key
//! that is queued again keeps its original position but carries the newest
//! frame, so a fader dragged while offline replays as one update.

use indexmap::IndexMap;
use std::time::{Duration, Instant};

/// Result of [`OutboundQueue::enqueue`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Enqueued {
    /// New key appended at the back.
    Added,
    /// Pending frame for the same key overwritten in place.
    Replaced,
    /// Capacity reached; the frame was not stored.
    Full,
}

#[derive(Debug, Clone)]
struct QueuedFrame {
    frame: String,
    queued_at: Instant,
}

/// Bounded FIFO of encoded frames, coalesced per key.
///
/// Insertion order is the replay order; lookups by key are O(1).
#[derive(Debug)]
pub struct OutboundQueue {
    frames: IndexMap<String, QueuedFrame>,
    max_size: usize,
}

impl OutboundQueue {
    pub fn new(max_size: usize) -> Self {
        Self {
            frames: IndexMap::with_capacity(max_size.min(1024)),
            max_size,
        }
    }

    /// Queue `frame` for `key`.
    pub fn enqueue(&mut self, key: &str, frame: String) -> Enqueued {
        if let Some(pending) = self.frames.get_mut(key) {
            pending.frame = frame;
            return Enqueued::Replaced;
        }
        if self.frames.len() >= self.max_size {
            return Enqueued::Full;
        }
        self.frames.insert(
            key.to_string(),
            QueuedFrame {
                frame,
                queued_at: Instant::now(),
            },
        );
        Enqueued::Added
    }

    /// Take every queued frame, oldest first.
    pub fn drain(&mut self) -> Vec<String> {
        self.frames.drain(..).map(|(_, queued)| queued.frame).collect()
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.max_size
    }

    pub fn clear(&mut self) {
        self.frames.clear();
    }

    /// Total bytes queued.
    pub fn total_bytes(&self) -> usize {
        self.frames.values().map(|queued| queued.frame.len()).sum()
    }

    /// How long the oldest pending frame has been waiting.
    pub fn oldest_age(&self) -> Option<Duration> {
        self.frames.first().map(|(_, queued)| queued.queued_at.elapsed())
    }
}
