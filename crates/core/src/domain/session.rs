//! Mix session driver and the contracts of downstream collaborators
//!
//! A session owns one [`MixingEngine`] for one audio segment and pushes its
//! blocks into a [`BlockSink`] until the sources run dry or the caller
//! cancels. Cancellation is cooperative and checked between blocks, so a
//! partial block is never written.

use crate::domain::audio::{AudioError, AudioFormatDescriptor, Result, SampleSource, SourceId, Ticks};
use crate::domain::config::MixSettings;
use crate::domain::mixer::{MixTarget, MixedBlock, MixingEngine};
use crate::domain::voting::VotingResult;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

/// Cooperative cancellation flag shared between the caller and a session
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Consumer of mixed blocks (file writer, encoder, network...)
pub trait BlockSink {
    fn write_block(&mut self, block: &MixedBlock) -> Result<()>;

    /// Called once after the last block of a completed session
    fn finish(&mut self) -> Result<()>;
}

/// Collects blocks in memory
impl BlockSink for Vec<MixedBlock> {
    fn write_block(&mut self, block: &MixedBlock) -> Result<()> {
        self.push(block.clone());
        Ok(())
    }

    fn finish(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Encoder settings derived from the vote
///
/// The compatible source is a member of the dominant format group; encoders
/// that reuse a source's native profile pick their settings from it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EncodeProfile {
    pub compatible_source_id: SourceId,
    pub format: AudioFormatDescriptor,
}

impl EncodeProfile {
    /// Profile for the dominant group, if the vote produced a concrete format
    pub fn from_vote(result: &VotingResult) -> Option<Self> {
        Some(Self {
            compatible_source_id: result.representative_source_id.clone()?,
            format: result.dominant_format.clone()?,
        })
    }
}

/// Re-encodes mixed PCM into a final media file
///
/// Implementations own any temporary resources they acquire and must
/// release them when the returned sink is dropped, whether or not it was
/// finished.
pub trait RecompressionBridge {
    fn open(&mut self, profile: &EncodeProfile, target: &MixTarget) -> Result<Box<dyn BlockSink>>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum MixStatus {
    Completed,
    Cancelled,
}

/// Summary of a finished or cancelled session
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MixOutcome {
    pub status: MixStatus,
    pub blocks: u64,
    pub bytes: u64,
    pub first_timestamp: Option<Ticks>,
    /// Timestamp just past the end of the last block
    pub end_timestamp: Option<Ticks>,
    pub clipped_samples: u64,
}

impl MixOutcome {
    fn new() -> Self {
        Self {
            status: MixStatus::Completed,
            blocks: 0,
            bytes: 0,
            first_timestamp: None,
            end_timestamp: None,
            clipped_samples: 0,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.status == MixStatus::Cancelled
    }
}

/// One mix run over one segment
pub struct MixSession {
    engine: MixingEngine,
    block_bytes: usize,
    cancel: CancelFlag,
}

impl MixSession {
    /// Wrap an engine; `block_bytes` must be a whole number of frames
    pub fn new(engine: MixingEngine, block_bytes: usize, cancel: CancelFlag) -> Result<Self> {
        let align = engine.target().block_align();
        if block_bytes == 0 || block_bytes % align != 0 {
            return Err(AudioError::InvalidConfiguration(format!(
                "block size {block_bytes} is not a multiple of the {align}-byte frame"
            )));
        }

        Ok(Self {
            engine,
            block_bytes,
            cancel,
        })
    }

    /// Build a session from a finished vote
    ///
    /// The target is the dominant format (or the configured fallback when no
    /// concrete format was observed) with the configured channel override.
    /// The block size is rounded down to whole frames.
    pub fn plan(
        vote: &VotingResult,
        settings: &MixSettings,
        sources: Vec<Box<dyn SampleSource>>,
        cancel: CancelFlag,
    ) -> Result<Self> {
        let target = match &vote.dominant_format {
            Some(format) => MixTarget::from_format(format, settings.target_channels)?,
            None => {
                warn!("No concrete source format observed, mixing with the fallback format");
                let mut fallback = settings.fallback_target;
                if let Some(channels) = settings.target_channels {
                    fallback.channels = channels;
                }
                fallback.validate()?;
                fallback
            }
        };

        let mut engine = MixingEngine::new(
            target,
            settings.tolerance_ticks(),
            vote.excluded_source_ids.clone(),
        )?;
        for source in sources {
            engine.add_source(source);
        }

        let align = target.block_align();
        let block_bytes = (settings.block_bytes / align).max(1) * align;
        Self::new(engine, block_bytes, cancel)
    }

    pub fn engine(&self) -> &MixingEngine {
        &self.engine
    }

    pub fn target(&self) -> &MixTarget {
        self.engine.target()
    }

    pub fn block_bytes(&self) -> usize {
        self.block_bytes
    }

    /// Mix until the sources are exhausted or the session is cancelled
    ///
    /// The sink is finished only when the mix completes.
    #[instrument(skip_all, fields(block_bytes = self.block_bytes))]
    pub fn run(&mut self, sink: &mut dyn BlockSink) -> Result<MixOutcome> {
        let mut outcome = MixOutcome::new();
        let clock = self.engine.target().clock();

        loop {
            if self.cancel.is_cancelled() {
                outcome.status = MixStatus::Cancelled;
                info!(blocks = outcome.blocks, "Mix cancelled");
                break;
            }

            let Some(block) = self.engine.next_block(self.block_bytes) else {
                break;
            };

            sink.write_block(&block)?;

            outcome.blocks += 1;
            outcome.bytes += block.data.len() as u64;
            outcome.first_timestamp.get_or_insert(block.timestamp);
            outcome.end_timestamp = Some(block.end_timestamp(&clock));
        }

        outcome.clipped_samples = self.engine.clipped_samples();

        if outcome.status == MixStatus::Completed {
            sink.finish()?;
            info!(
                blocks = outcome.blocks,
                bytes = outcome.bytes,
                clipped = outcome.clipped_samples,
                "Mix completed"
            );
        } else {
            debug!(bytes = outcome.bytes, "Sink left unfinished after cancellation");
        }

        Ok(outcome)
    }
}
