//! Per-source cursor over a [`SampleSource`]
//!
//! A `SourceBuffer` turns a stream of timestamped chunks into one sample per
//! mix position. It hides excluded sources entirely, converts the source's
//! channel layout to the mix layout on the fly, and refuses to deliver a
//! sample whose timestamp is too far from the position being mixed.

use super::MixTarget;
use crate::domain::audio::{SampleClock, SampleSource, SourceId, Ticks};
use crate::domain::mixer::pcm;
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, trace, warn};

/// Lifecycle of a source buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferState {
    /// Nothing pulled yet
    Empty,
    /// Holding a chunk from a non-excluded source
    Filled,
    /// The source returned no more data; permanent
    Exhausted,
}

/// Sample-addressable view of one upstream source
pub struct SourceBuffer {
    source: Box<dyn SampleSource>,
    excluded: Arc<BTreeSet<SourceId>>,
    state: BufferState,

    bytes_per_sample: usize,
    target_channels: u16,
    clock: SampleClock,
    tolerance: Ticks,

    chunk: Vec<u8>,
    cursor: usize,
    chunk_timestamp: Ticks,
    chunk_source: Option<SourceId>,
    source_channels: u16,
    /// Mix positions delivered from the current chunk
    positions_emitted: u64,

    /// Decoded samples of the current source frame
    frame: Vec<i64>,
    frame_ready: bool,
    /// Next mix channel to deliver from `frame`
    out_channel: u16,

    skipped_chunks: u64,
    discarded_bytes: u64,
}

impl SourceBuffer {
    pub fn new(
        source: Box<dyn SampleSource>,
        target: &MixTarget,
        excluded: Arc<BTreeSet<SourceId>>,
        tolerance: Ticks,
    ) -> Self {
        Self {
            source,
            excluded,
            state: BufferState::Empty,
            bytes_per_sample: target.bytes_per_sample(),
            target_channels: target.channels.max(1),
            clock: target.clock(),
            tolerance: tolerance.max(0),
            chunk: Vec::new(),
            cursor: 0,
            chunk_timestamp: 0,
            chunk_source: None,
            source_channels: 1,
            positions_emitted: 0,
            frame: Vec::new(),
            frame_ready: false,
            out_channel: 0,
            skipped_chunks: 0,
            discarded_bytes: 0,
        }
    }

    pub fn state(&self) -> BufferState {
        self.state
    }

    pub fn is_exhausted(&self) -> bool {
        self.state == BufferState::Exhausted
    }

    /// Source id of the chunk currently being read
    pub fn current_source_id(&self) -> Option<&SourceId> {
        match self.state {
            BufferState::Filled => self.chunk_source.as_ref(),
            _ => None,
        }
    }

    pub fn source_channels(&self) -> u16 {
        self.source_channels
    }

    /// Chunks dropped because their source was excluded
    pub fn skipped_chunks(&self) -> u64 {
        self.skipped_chunks
    }

    /// Fractional bytes dropped at chunk ends
    pub fn discarded_bytes(&self) -> u64 {
        self.discarded_bytes
    }

    /// Timestamp of the next sample, refilling if needed
    ///
    /// Returns `None` once the source is exhausted.
    pub fn next_timestamp(&mut self) -> Option<Ticks> {
        if !self.ensure_frame() {
            return None;
        }
        Some(self.chunk_timestamp + self.clock.offset(self.positions_emitted))
    }

    /// Deliver the sample for mix channel `channel` of the position at `target`
    ///
    /// Exhausted buffers and buffers whose next sample lies outside the
    /// tolerance window contribute silence; in the latter case the sample is
    /// kept for the next position. A new source frame only starts on mix
    /// channel 0, so a buffer that comes into range mid-frame stays silent
    /// until the next frame boundary instead of shifting its channels.
    pub fn read_sample(&mut self, target: Ticks, channel: u16) -> i64 {
        let Some(timestamp) = self.next_timestamp() else {
            return 0;
        };

        if self.out_channel == 0 {
            if channel != 0 || (timestamp - target).abs() > self.tolerance {
                return 0;
            }
        } else if channel != self.out_channel {
            return 0;
        }

        let value = self.mapped_sample(self.out_channel);
        self.out_channel += 1;
        self.positions_emitted += 1;

        if self.out_channel >= self.target_channels {
            self.out_channel = 0;
            self.frame_ready = false;
        }

        value
    }

    /// Value of mix channel `channel` for the current source frame
    fn mapped_sample(&self, channel: u16) -> i64 {
        let source = usize::from(self.source_channels);
        let target = usize::from(self.target_channels);
        let channel = usize::from(channel);

        if source == target {
            self.frame[channel]
        } else if target == 1 {
            // Downmix to mono: average the whole frame
            self.frame.iter().sum::<i64>() / source as i64
        } else if source < target {
            self.frame[channel % source]
        } else {
            self.frame[channel]
        }
    }

    /// Make sure a decoded frame is available, pulling chunks as needed
    fn ensure_frame(&mut self) -> bool {
        if self.frame_ready {
            return true;
        }

        loop {
            if self.state == BufferState::Exhausted {
                return false;
            }

            if self.state == BufferState::Filled {
                let frame_bytes = self.bytes_per_sample * usize::from(self.source_channels);
                let remaining = self.chunk.len() - self.cursor;

                if remaining >= frame_bytes {
                    self.decode_frame(frame_bytes);
                    return true;
                }

                if remaining > 0 {
                    warn!(
                        source = ?self.chunk_source.as_ref().map(SourceId::as_str),
                        bytes = remaining,
                        "Discarding fractional sample data at end of chunk"
                    );
                    self.discarded_bytes += remaining as u64;
                }
            }

            self.refill();
        }
    }

    fn decode_frame(&mut self, frame_bytes: usize) {
        let bytes = &self.chunk[self.cursor..self.cursor + frame_bytes];
        self.frame.clear();
        self.frame.extend(
            bytes
                .chunks_exact(self.bytes_per_sample)
                .map(pcm::decode_sample),
        );
        self.cursor += frame_bytes;
        self.frame_ready = true;
        self.out_channel = 0;
    }

    /// Pull the next chunk from a non-excluded source, or become exhausted
    fn refill(&mut self) {
        loop {
            match self.source.pull() {
                Ok(Some(chunk)) => {
                    if self.excluded.contains(&chunk.source_id) {
                        self.skipped_chunks += 1;
                        trace!(
                            source = %chunk.source_id,
                            timestamp = chunk.timestamp,
                            "Skipping chunk from excluded source"
                        );
                        continue;
                    }

                    if chunk.data.is_empty() {
                        trace!(source = %chunk.source_id, "Skipping empty chunk");
                        continue;
                    }

                    let channels = self.source.current_channel_count().max(1);
                    if channels != self.source_channels || self.chunk_source.as_ref() != Some(&chunk.source_id) {
                        debug!(
                            source = %chunk.source_id,
                            channels,
                            target_channels = self.target_channels,
                            timestamp = chunk.timestamp,
                            "Buffer switched source"
                        );
                    }

                    self.source_channels = channels;
                    self.chunk_timestamp = chunk.timestamp;
                    self.chunk_source = Some(chunk.source_id);
                    self.chunk = chunk.data;
                    self.cursor = 0;
                    self.positions_emitted = 0;
                    self.state = BufferState::Filled;
                    return;
                }
                Ok(None) => {
                    debug!(
                        source = ?self.chunk_source.as_ref().map(SourceId::as_str),
                        skipped = self.skipped_chunks,
                        "Source exhausted"
                    );
                    self.exhaust();
                    return;
                }
                Err(e) => {
                    warn!(
                        source = ?self.chunk_source.as_ref().map(SourceId::as_str),
                        error = %e,
                        "Sample source failed, treating it as exhausted"
                    );
                    self.exhaust();
                    return;
                }
            }
        }
    }

    fn exhaust(&mut self) {
        self.state = BufferState::Exhausted;
        self.chunk = Vec::new();
        self.cursor = 0;
        self.frame_ready = false;
    }
}

impl std::fmt::Debug for SourceBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SourceBuffer")
            .field("state", &self.state)
            .field("chunk_source", &self.chunk_source)
            .field("chunk_timestamp", &self.chunk_timestamp)
            .field("positions_emitted", &self.positions_emitted)
            .field("source_channels", &self.source_channels)
            .finish()
    }
}
