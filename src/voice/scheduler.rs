//! Gapless playback scheduling for model audio
//!
//! Every segment is placed on a single output timeline at
//! `max(cursor, now)` and the cursor advances by the segment's duration, so
//! segments play back-to-back in delivery order without overlapping.
//! Interruption stops everything that is scheduled and rewinds the cursor to
//! the output clock.

use std::collections::HashMap;

use tokio::sync::mpsc;

use super::pcm::{AudioSegment, decode_segment};
use crate::Result;

/// Handle identifying one scheduled segment
pub type SourceId = u64;

/// Completion notice handed to the output device with every source
///
/// The device calls [`SourceEnded::notify`] when the source finishes on its
/// own. Stopped sources are never notified.
#[derive(Debug)]
pub struct SourceEnded {
    id: SourceId,
    tx: mpsc::UnboundedSender<SourceId>,
}

impl SourceEnded {
    pub(crate) const fn new(id: SourceId, tx: mpsc::UnboundedSender<SourceId>) -> Self {
        Self { id, tx }
    }

    /// Source this notice belongs to
    #[must_use]
    pub const fn id(&self) -> SourceId {
        self.id
    }

    /// Report natural completion to the scheduler
    pub fn notify(self) {
        // Receiver is gone only after the scheduler itself was dropped
        let _ = self.tx.send(self.id);
    }
}

/// Audio output timeline driven by the scheduler
pub trait OutputDevice {
    /// Current output clock in seconds
    fn now(&self) -> f64;

    /// Start `segment` at timeline position `start_at` (seconds)
    fn start_source(&mut self, segment: AudioSegment, start_at: f64, ended: SourceEnded);

    /// Stop a source immediately, whether or not it has started
    fn stop_source(&mut self, id: SourceId);

    /// Release the device
    fn shutdown(&mut self) {}
}

/// Placement of a segment on the timeline
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScheduledSegment {
    /// Source handle
    pub id: SourceId,
    /// Scheduled start in output clock seconds
    pub start: f64,
    /// Duration in seconds
    pub duration: f64,
}

impl ScheduledSegment {
    /// Scheduled end in output clock seconds
    #[must_use]
    pub fn end(&self) -> f64 {
        self.start + self.duration
    }
}

/// Decodes model audio and places it on the output timeline
pub struct PlaybackScheduler {
    output: Box<dyn OutputDevice>,
    sample_rate: u32,
    channels: u16,
    cursor: f64,
    active: HashMap<SourceId, ScheduledSegment>,
    next_id: SourceId,
    ended_tx: mpsc::UnboundedSender<SourceId>,
    ended_rx: mpsc::UnboundedReceiver<SourceId>,
}

impl PlaybackScheduler {
    /// Create a scheduler for audio at `sample_rate` / `channels`
    #[must_use]
    pub fn new(output: Box<dyn OutputDevice>, sample_rate: u32, channels: u16) -> Self {
        let (ended_tx, ended_rx) = mpsc::unbounded_channel();
        let cursor = output.now();

        Self {
            output,
            sample_rate,
            channels,
            cursor,
            active: HashMap::new(),
            next_id: 1,
            ended_tx,
            ended_rx,
        }
    }

    /// Decode a base64 PCM16 payload and schedule it
    ///
    /// # Errors
    ///
    /// Returns `Error::Decode` for malformed payloads; nothing is scheduled
    /// and the timeline is left untouched
    pub fn enqueue(&mut self, payload: &str) -> Result<ScheduledSegment> {
        let segment = decode_segment(payload, self.sample_rate, self.channels)?;
        Ok(self.schedule(segment))
    }

    /// Schedule an already decoded segment
    pub fn schedule(&mut self, segment: AudioSegment) -> ScheduledSegment {
        let start = self.cursor.max(self.output.now());
        let duration = segment.duration();
        let id = self.next_id;
        self.next_id += 1;

        let placed = ScheduledSegment {
            id,
            start,
            duration,
        };

        self.output
            .start_source(segment, start, SourceEnded::new(id, self.ended_tx.clone()));
        self.cursor = start + duration;
        self.active.insert(id, placed);

        tracing::trace!(id, start, duration, active = self.active.len(), "segment scheduled");
        placed
    }

    /// Stop every active source and rewind the cursor to the output clock
    ///
    /// Returns the number of sources stopped.
    pub fn interrupt(&mut self) -> usize {
        let stopped = self.active.len();
        for id in self.active.keys() {
            self.output.stop_source(*id);
        }
        self.active.clear();
        self.cursor = self.output.now();

        // Ends reported before the stop took effect refer to dead sources
        while self.ended_rx.try_recv().is_ok() {}

        if stopped > 0 {
            tracing::debug!(stopped, "playback interrupted");
        }
        stopped
    }

    /// Remove a source that finished on its own
    ///
    /// Returns `false` for sources that are no longer active.
    pub fn finish(&mut self, id: SourceId) -> bool {
        self.active.remove(&id).is_some()
    }

    /// Apply every completion reported so far without waiting
    pub fn reap_finished(&mut self) -> usize {
        let mut reaped = 0;
        while let Ok(id) = self.ended_rx.try_recv() {
            if self.finish(id) {
                reaped += 1;
            }
        }
        reaped
    }

    /// Wait for the next natural completion
    ///
    /// Cancel safe. Pair with [`PlaybackScheduler::finish`].
    pub async fn next_ended(&mut self) -> Option<SourceId> {
        self.ended_rx.recv().await
    }

    /// Stop playback and release the output device
    pub fn shutdown(&mut self) {
        self.interrupt();
        self.output.shutdown();
    }

    /// Number of scheduled sources that have not finished
    #[must_use]
    pub fn active_count(&self) -> usize {
        self.active.len()
    }

    /// Whether any source is scheduled or playing
    #[must_use]
    pub fn is_playing(&self) -> bool {
        !self.active.is_empty()
    }

    /// Timeline position where the next segment would start at the earliest
    #[must_use]
    pub const fn cursor(&self) -> f64 {
        self.cursor
    }

    /// Current output clock
    #[must_use]
    pub fn now(&self) -> f64 {
        self.output.now()
    }
}
