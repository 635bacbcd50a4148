//! Mixing engine for reconstructed audio timelines
//!
//! The engine drives a set of [`SourceBuffer`]s in lock-step and produces
//! fixed-size blocks of interleaved little-endian PCM. Every output position
//! is the saturated sum of the samples the buffers deliver for that instant;
//! buffers that are exhausted or out of alignment contribute silence.

pub mod buffer;
pub mod pcm;

pub use buffer::{BufferState, SourceBuffer};

use crate::domain::audio::{
    AudioError, AudioFormatDescriptor, Result, SampleClock, SampleSource, SourceId, Ticks,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, trace};

/// Output layout of a mix session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MixTarget {
    pub sample_rate: u32,
    pub bits_per_sample: u16,
    pub channels: u16,
}

impl MixTarget {
    pub fn new(sample_rate: u32, bits_per_sample: u16, channels: u16) -> Self {
        Self {
            sample_rate,
            bits_per_sample,
            channels,
        }
    }

    /// Target for a voted format, optionally forcing the channel count
    pub fn from_format(format: &AudioFormatDescriptor, channels: Option<u16>) -> Result<Self> {
        format.validate_pcm()?;
        let target = Self::new(
            format.sample_rate,
            format.bits_per_sample,
            channels.unwrap_or(format.channel_count),
        );
        target.validate()?;
        Ok(target)
    }

    pub fn validate(&self) -> Result<()> {
        self.format().validate_pcm()
    }

    pub fn format(&self) -> AudioFormatDescriptor {
        AudioFormatDescriptor::pcm(self.sample_rate, self.bits_per_sample, self.channels)
    }

    pub fn bytes_per_sample(&self) -> usize {
        usize::from(self.bits_per_sample / 8)
    }

    pub fn block_align(&self) -> usize {
        self.bytes_per_sample() * usize::from(self.channels)
    }

    /// Clock over interleaved output positions
    pub fn clock(&self) -> SampleClock {
        SampleClock::new(self.sample_rate, self.channels)
    }

    pub fn clip_limit(&self) -> i64 {
        pcm::clip_limit(self.bits_per_sample)
    }
}

/// One block of mixed output
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MixedBlock {
    pub data: Vec<u8>,
    /// Timestamp of the first position in the block
    pub timestamp: Ticks,
    /// Interleaved sample positions in `data`
    pub positions: usize,
}

impl MixedBlock {
    /// Timestamp just past the last position of the block
    pub fn end_timestamp(&self, clock: &SampleClock) -> Ticks {
        self.timestamp + clock.offset(self.positions as u64)
    }
}

/// Lock-step mixer over the buffers of one session
pub struct MixingEngine {
    buffers: Vec<SourceBuffer>,
    excluded: Arc<BTreeSet<SourceId>>,
    target: MixTarget,
    clock: SampleClock,
    tolerance: Ticks,
    bytes_per_sample: usize,
    clip_limit: i64,

    blocks_emitted: u64,
    clipped_samples: u64,
    last_block_end: Option<Ticks>,
}

impl MixingEngine {
    /// Create an engine mixing into `target`
    ///
    /// Chunks from `excluded` sources are skipped by every buffer.
    pub fn new(target: MixTarget, tolerance: Ticks, excluded: BTreeSet<SourceId>) -> Result<Self> {
        target.validate()?;
        if tolerance < 0 {
            return Err(AudioError::InvalidConfiguration(format!(
                "negative alignment tolerance {tolerance}"
            )));
        }

        debug!(
            sample_rate = target.sample_rate,
            bits = target.bits_per_sample,
            channels = target.channels,
            tolerance,
            excluded = excluded.len(),
            ticks_per_sample = target.clock().ticks_per_sample(),
            "Creating mixing engine"
        );

        Ok(Self {
            buffers: Vec::new(),
            excluded: Arc::new(excluded),
            target,
            clock: target.clock(),
            tolerance,
            bytes_per_sample: target.bytes_per_sample(),
            clip_limit: target.clip_limit(),
            blocks_emitted: 0,
            clipped_samples: 0,
            last_block_end: None,
        })
    }

    /// Add a source to the mix
    pub fn add_source(&mut self, source: Box<dyn SampleSource>) {
        self.buffers.push(SourceBuffer::new(
            source,
            &self.target,
            Arc::clone(&self.excluded),
            self.tolerance,
        ));
    }

    pub fn with_source(mut self, source: Box<dyn SampleSource>) -> Self {
        self.add_source(source);
        self
    }

    pub fn target(&self) -> &MixTarget {
        &self.target
    }

    pub fn buffers(&self) -> &[SourceBuffer] {
        &self.buffers
    }

    /// Source ids currently being read by non-exhausted buffers
    pub fn live_source_ids(&self) -> BTreeSet<SourceId> {
        self.buffers
            .iter()
            .filter_map(|b| b.current_source_id().cloned())
            .collect()
    }

    pub fn blocks_emitted(&self) -> u64 {
        self.blocks_emitted
    }

    /// Output samples that hit the clip limit so far
    pub fn clipped_samples(&self) -> u64 {
        self.clipped_samples
    }

    /// Mix the next block of `block_bytes` bytes
    ///
    /// The block starts at the earliest pending sample of any live buffer.
    /// Returns `None` once every buffer is exhausted.
    pub fn next_block(&mut self, block_bytes: usize) -> Option<MixedBlock> {
        let channels = usize::from(self.target.channels);
        let positions = block_bytes / self.target.block_align() * channels;
        if positions == 0 {
            debug!(block_bytes, "Block smaller than one frame, nothing to mix");
            return None;
        }

        let Some(start) = self
            .buffers
            .iter_mut()
            .filter_map(SourceBuffer::next_timestamp)
            .min()
        else {
            debug!(blocks = self.blocks_emitted, "All sources exhausted");
            return None;
        };

        if let Some(end) = self.last_block_end {
            if start < end {
                debug!(start, previous_end = end, "Block starts before the previous block ended");
            } else if start > end {
                trace!(gap = start - end, "Skipping gap with no live samples");
            }
        }

        let mut data = vec![0u8; positions * self.bytes_per_sample];
        for (k, out) in data.chunks_exact_mut(self.bytes_per_sample).enumerate() {
            let at = start + self.clock.offset(k as u64);
            let channel = (k % channels) as u16;
            let sum: i64 = self
                .buffers
                .iter_mut()
                .map(|b| b.read_sample(at, channel))
                .sum();
            let value = pcm::clip(sum, self.clip_limit);
            if value != sum {
                self.clipped_samples += 1;
            }
            pcm::encode_sample(value, out);
        }

        let block = MixedBlock {
            data,
            timestamp: start,
            positions,
        };

        self.blocks_emitted += 1;
        self.last_block_end = Some(block.end_timestamp(&self.clock));
        trace!(timestamp = start, positions, "Mixed block");

        Some(block)
    }
}

impl std::fmt::Debug for MixingEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MixingEngine")
            .field("target", &self.target)
            .field("buffers", &self.buffers.len())
            .field("excluded", &self.excluded)
            .field("blocks_emitted", &self.blocks_emitted)
            .finish()
    }
}
