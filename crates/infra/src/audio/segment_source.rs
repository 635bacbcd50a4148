//! [`SampleSource`] over the recorded segments of one stream
//!
//! A stream is a sequence of WAV files, each placed on the timeline at its
//! own start time. Segments are opened lazily and read in chunks of a fixed
//! duration; every chunk carries the absolute timestamp of its first sample
//! and the id of the segment's source.

use super::wav::WavReader;
use recast_core::domain::audio::{
    AudioError, Result, SampleClock, SampleSource, SourceChunk, SourceId, Ticks,
};
use recast_core::domain::config::{SegmentSpec, StreamSpec};
use std::collections::VecDeque;
use std::path::PathBuf;
use tracing::{debug, info};

/// A recorded segment placed on the timeline
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segment {
    pub path: PathBuf,
    pub source_id: SourceId,
    pub start: Ticks,
}

impl From<&SegmentSpec> for Segment {
    fn from(spec: &SegmentSpec) -> Self {
        Self {
            path: spec.path.clone(),
            source_id: SourceId::new(spec.source_id.as_str()),
            start: spec.start_ticks(),
        }
    }
}

struct OpenSegment {
    reader: WavReader,
    source_id: SourceId,
    start: Ticks,
    channels: u16,
    bytes_per_sample: u64,
    clock: SampleClock,
    chunk_bytes: usize,
    /// Packet bytes not yet handed out
    pending: Vec<u8>,
    finished: bool,
    bytes_read: u64,
}

impl OpenSegment {
    fn open(segment: Segment, chunk_ms: u64) -> Result<Self> {
        let reader = WavReader::open(&segment.path).map_err(|e| {
            AudioError::SourceError(format!("cannot open {}: {e}", segment.path.display()))
        })?;

        let format = reader.info().format.clone();
        let frames = (u64::from(format.sample_rate) * chunk_ms / 1000).max(1);
        let chunk_bytes = (frames as usize * format.block_align()).max(1);

        info!(
            path = %segment.path.display(),
            source = %segment.source_id,
            %format,
            frames = reader.info().frames,
            "Opened segment"
        );

        Ok(Self {
            reader,
            source_id: segment.source_id,
            start: segment.start,
            channels: format.channel_count,
            bytes_per_sample: format.bytes_per_sample().max(1) as u64,
            clock: SampleClock::new(format.sample_rate, format.channel_count),
            chunk_bytes,
            pending: Vec::new(),
            finished: false,
            bytes_read: 0,
        })
    }

    /// Next chunk of at most `chunk_bytes`, regrouped from the reader's packets
    fn read_chunk(&mut self) -> Result<Option<SourceChunk>> {
        while !self.finished && self.pending.len() < self.chunk_bytes {
            match self.reader.next_samples() {
                Ok(Some(samples)) => self.pending.extend_from_slice(&samples),
                Ok(None) => self.finished = true,
                Err(e) => {
                    return Err(AudioError::SourceError(format!(
                        "read failed in segment {}: {e}",
                        self.source_id
                    )))
                }
            }
        }

        let len = self.pending.len().min(self.chunk_bytes);
        if len == 0 {
            return Ok(None);
        }

        let rest = self.pending.split_off(len);
        let data = std::mem::replace(&mut self.pending, rest);

        let timestamp = self.start + self.clock.offset(self.bytes_read / self.bytes_per_sample);
        self.bytes_read += len as u64;

        Ok(Some(SourceChunk::new(self.source_id.clone(), timestamp, data)))
    }
}

/// Sequential reader over the segments of one stream
pub struct SegmentedSource {
    pending: VecDeque<Segment>,
    current: Option<OpenSegment>,
    chunk_ms: u64,
    current_channels: u16,
    chunks_read: u64,
}

impl SegmentedSource {
    /// Segments are read in the given order
    pub fn new(segments: Vec<Segment>, chunk_ms: u64) -> Self {
        Self {
            pending: segments.into(),
            current: None,
            chunk_ms: chunk_ms.max(1),
            current_channels: 1,
            chunks_read: 0,
        }
    }

    pub fn from_stream(stream: &StreamSpec, chunk_ms: u64) -> Self {
        Self::new(stream.segments.iter().map(Segment::from).collect(), chunk_ms)
    }

    pub fn chunks_read(&self) -> u64 {
        self.chunks_read
    }

    pub fn pending_segments(&self) -> usize {
        self.pending.len()
    }
}

impl SampleSource for SegmentedSource {
    fn pull(&mut self) -> Result<Option<SourceChunk>> {
        loop {
            if self.current.is_none() {
                let Some(segment) = self.pending.pop_front() else {
                    return Ok(None);
                };
                self.current = Some(OpenSegment::open(segment, self.chunk_ms)?);
            }

            let Some(open) = self.current.as_mut() else {
                continue;
            };

            match open.read_chunk()? {
                Some(chunk) => {
                    self.current_channels = open.channels;
                    self.chunks_read += 1;
                    return Ok(Some(chunk));
                }
                None => {
                    debug!(source = %open.source_id, bytes = open.bytes_read, "Segment finished");
                    self.current = None;
                }
            }
        }
    }

    fn current_channel_count(&self) -> u16 {
        self.current_channels
    }
}
