//! Audio format descriptors, time units and the sample source contract
//!
//! This module defines the vocabulary shared by the voter, the source buffers
//! and the mixing engine. Concrete sources (WAV segments, network captures)
//! live in the `infra` crate and only need to implement [`SampleSource`].
//!
//! All timestamps and durations are expressed in ticks, where one second is
//! [`TICKS_PER_SECOND`] ticks. All byte layouts are little-endian.

use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;
use thiserror::Error;

/// Errors that can occur in the audio subsystem
#[derive(Debug, Error)]
pub enum AudioError {
    /// Format descriptor cannot be mixed (unsupported width, zero rate...)
    #[error("Invalid format: {0}")]
    InvalidFormat(String),

    /// Invalid configuration for a mix session
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// Upstream sample source failed
    #[error("Source error: {0}")]
    SourceError(String),

    /// Downstream block sink failed
    #[error("Sink error: {0}")]
    SinkError(String),

    /// Input/Output error at the OS level
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, AudioError>;

/// Absolute time or duration, in 100 ns units
pub type Ticks = i64;

pub const TICKS_PER_SECOND: Ticks = 10_000_000;
pub const TICKS_PER_MILLISECOND: Ticks = 10_000;

/// Convert fractional seconds to ticks (rounded to the nearest tick)
pub fn ticks_from_secs_f64(secs: f64) -> Ticks {
    (secs * TICKS_PER_SECOND as f64).round() as Ticks
}

pub fn ticks_from_millis(ms: u64) -> Ticks {
    ms as Ticks * TICKS_PER_MILLISECOND
}

pub fn ticks_to_secs_f64(ticks: Ticks) -> f64 {
    ticks as f64 / TICKS_PER_SECOND as f64
}

/// Unique identifier for a recorded source
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SourceId(String);

impl SourceId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

pub const MAJOR_TYPE_AUDIO: &str = "audio";
pub const SUBTYPE_PCM: &str = "pcm";

/// Description of an uncompressed audio format
///
/// Format compatibility is decided by [`AudioFormatDescriptor::is_compatible`],
/// which deliberately ignores `channel_count`: channel mismatches are resolved
/// by conversion in the source buffer, not by exclusion.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AudioFormatDescriptor {
    pub major_type: String,
    pub sub_type: String,
    pub sample_rate: u32,
    pub bits_per_sample: u16,
    pub channel_count: u16,
}

impl AudioFormatDescriptor {
    /// Integer PCM descriptor
    pub fn pcm(sample_rate: u32, bits_per_sample: u16, channel_count: u16) -> Self {
        Self {
            major_type: MAJOR_TYPE_AUDIO.to_string(),
            sub_type: SUBTYPE_PCM.to_string(),
            sample_rate,
            bits_per_sample,
            channel_count,
        }
    }

    /// Two descriptors are compatible when type, subtype, rate and depth match
    pub fn is_compatible(&self, other: &Self) -> bool {
        self.major_type == other.major_type
            && self.sub_type == other.sub_type
            && self.sample_rate == other.sample_rate
            && self.bits_per_sample == other.bits_per_sample
    }

    /// Compatibility where an unset descriptor acts as a wildcard
    pub fn compatible(a: Option<&Self>, b: Option<&Self>) -> bool {
        match (a, b) {
            (Some(a), Some(b)) => a.is_compatible(b),
            _ => true,
        }
    }

    pub fn bytes_per_sample(&self) -> usize {
        usize::from(self.bits_per_sample / 8)
    }

    pub fn block_align(&self) -> usize {
        self.bytes_per_sample() * usize::from(self.channel_count)
    }

    pub fn bytes_per_second(&self) -> u64 {
        u64::from(self.sample_rate) * self.block_align() as u64
    }

    /// Duration covered by `bytes` of interleaved data in this format
    pub fn duration_of(&self, bytes: u64) -> Ticks {
        let rate = self.bytes_per_second();
        if rate == 0 {
            return 0;
        }
        (i128::from(bytes) * i128::from(TICKS_PER_SECOND) / i128::from(rate)) as Ticks
    }

    /// Check that the engine can decode and mix this format
    pub fn validate_pcm(&self) -> Result<()> {
        if self.sub_type != SUBTYPE_PCM {
            return Err(AudioError::InvalidFormat(format!(
                "unsupported subtype '{}'",
                self.sub_type
            )));
        }
        if !matches!(self.bits_per_sample, 8 | 16 | 24 | 32) {
            return Err(AudioError::InvalidFormat(format!(
                "unsupported sample width {} bits",
                self.bits_per_sample
            )));
        }
        if self.sample_rate == 0 || self.channel_count == 0 {
            return Err(AudioError::InvalidFormat(format!(
                "degenerate format {self}"
            )));
        }
        Ok(())
    }
}

impl fmt::Display for AudioFormatDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{} {}Hz {}-bit {}ch",
            self.major_type, self.sub_type, self.sample_rate, self.bits_per_sample, self.channel_count
        )
    }
}

/// Maps interleaved sample positions to tick offsets
///
/// Offsets are computed from the absolute position count rather than by
/// repeatedly adding a rounded per-sample step, so rates that do not divide
/// [`TICKS_PER_SECOND`] evenly never drift.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SampleClock {
    positions_per_second: u64,
}

impl SampleClock {
    pub fn new(sample_rate: u32, channels: u16) -> Self {
        Self {
            positions_per_second: (u64::from(sample_rate) * u64::from(channels)).max(1),
        }
    }

    pub fn positions_per_second(&self) -> u64 {
        self.positions_per_second
    }

    /// Tick offset of interleaved position `positions` from the clock origin
    pub fn offset(&self, positions: u64) -> Ticks {
        (i128::from(positions) * i128::from(TICKS_PER_SECOND)
            / i128::from(self.positions_per_second)) as Ticks
    }

    /// Number of whole positions that fit in `ticks`
    pub fn positions_in(&self, ticks: Ticks) -> u64 {
        if ticks <= 0 {
            return 0;
        }
        (i128::from(ticks) * i128::from(self.positions_per_second)
            / i128::from(TICKS_PER_SECOND)) as u64
    }

    pub fn ticks_per_sample(&self) -> f64 {
        TICKS_PER_SECOND as f64 / self.positions_per_second as f64
    }
}

/// A chunk of raw interleaved PCM pulled from a source
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceChunk {
    pub data: Vec<u8>,
    /// Absolute timestamp of the first sample in `data`
    pub timestamp: Ticks,
    /// Recorded source the chunk belongs to
    pub source_id: SourceId,
}

impl SourceChunk {
    pub fn new(source_id: SourceId, timestamp: Ticks, data: Vec<u8>) -> Self {
        Self {
            data,
            timestamp,
            source_id,
        }
    }
}

/// Pull-based provider of timestamped PCM chunks
///
/// Implemented by stream-reconstruction collaborators. A single source may
/// interleave chunks from several recorded sources over time; every chunk
/// carries the id of the source it was recorded from.
pub trait SampleSource: Send {
    /// Pull the next chunk; `Ok(None)` means the source is exhausted
    fn pull(&mut self) -> Result<Option<SourceChunk>>;

    /// Channel count of the most recently pulled chunk
    fn current_channel_count(&self) -> u16;
}

impl<S: SampleSource + ?Sized> SampleSource for Box<S> {
    fn pull(&mut self) -> Result<Option<SourceChunk>> {
        (**self).pull()
    }

    fn current_channel_count(&self) -> u16 {
        (**self).current_channel_count()
    }
}

/// In-memory [`SampleSource`] replaying a fixed list of chunks
#[derive(Debug, Clone, Default)]
pub struct ChunkQueue {
    chunks: VecDeque<(SourceChunk, u16)>,
    current_channels: u16,
}

impl ChunkQueue {
    pub fn new(channels: u16) -> Self {
        Self {
            chunks: VecDeque::new(),
            current_channels: channels,
        }
    }

    /// Queue a chunk using the queue's initial channel count
    pub fn push(&mut self, chunk: SourceChunk) {
        let channels = self.current_channels;
        self.chunks.push_back((chunk, channels));
    }

    pub fn push_with_channels(&mut self, chunk: SourceChunk, channels: u16) {
        self.chunks.push_back((chunk, channels));
    }

    /// Queue 16-bit samples as one chunk
    pub fn push_i16(&mut self, source_id: &SourceId, timestamp: Ticks, samples: &[i16]) {
        let data = samples.iter().flat_map(|s| s.to_le_bytes()).collect();
        self.push(SourceChunk::new(source_id.clone(), timestamp, data));
    }

    pub fn with_chunk(mut self, chunk: SourceChunk) -> Self {
        self.push(chunk);
        self
    }

    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }
}

impl SampleSource for ChunkQueue {
    fn pull(&mut self) -> Result<Option<SourceChunk>> {
        Ok(self.chunks.pop_front().map(|(chunk, channels)| {
            self.current_channels = channels;
            chunk
        }))
    }

    fn current_channel_count(&self) -> u16 {
        self.current_channels
    }
}
