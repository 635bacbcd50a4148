//! Job pipeline: inspect segments, vote on the format, mix into a sink
//!
//! `JobPipeline` coordinates the collaborators around the core engine. It
//! reads every segment header once, feeds the observations to the
//! [`CompatibilityVoter`], and on request builds one [`SegmentedSource`] per
//! stream and runs a [`MixSession`] into a sink opened by a
//! [`RecompressionBridge`].

use super::segment_source::SegmentedSource;
use super::wav::{self, WavInfo};
use anyhow::{bail, Context, Result};
use recast_core::domain::audio::{SampleSource, SourceId, Ticks, ticks_to_secs_f64};
use recast_core::domain::config::{JobConfig, MixSettings, SegmentSpec};
use recast_core::domain::session::{CancelFlag, EncodeProfile, MixOutcome, MixSession, RecompressionBridge};
use recast_core::domain::voting::{CompatibilityVoter, VotingResult};
use serde::Serialize;
use std::path::PathBuf;
use tracing::{info, instrument, warn};

/// Header information gathered for one segment
#[derive(Debug, Clone)]
pub struct SegmentInfo {
    pub stream: String,
    pub segment: SegmentSpec,
    /// `None` when the header could not be read; the segment then votes as
    /// an unknown format with no duration
    pub info: Option<WavInfo>,
}

impl SegmentInfo {
    pub fn duration(&self) -> Ticks {
        self.info.as_ref().map_or(0, WavInfo::duration)
    }
}

/// Per-segment line of a [`VoteReport`]
#[derive(Debug, Clone, Serialize)]
pub struct SegmentReport {
    pub stream: String,
    pub source_id: String,
    pub path: PathBuf,
    pub format: Option<String>,
    pub start_secs: f64,
    pub duration_secs: f64,
    pub excluded: bool,
}

/// Serializable summary of the segment headers and the vote
#[derive(Debug, Clone, Serialize)]
pub struct VoteReport {
    pub job: String,
    pub result: VotingResult,
    pub segments: Vec<SegmentReport>,
}

/// An inspected and voted job, ready to mix
pub struct JobPipeline {
    job: JobConfig,
    settings: MixSettings,
    segments: Vec<SegmentInfo>,
    vote: VotingResult,
}

impl JobPipeline {
    /// Read every segment header of `job` and run the compatibility vote
    ///
    /// `cancel` is checked between segments; a cancelled preparation fails.
    #[instrument(skip_all, fields(job = %job.name))]
    pub fn prepare(job: JobConfig, defaults: &MixSettings, cancel: &CancelFlag) -> Result<Self> {
        job.validate().context("invalid job")?;
        let settings = job.effective_mix(defaults);
        settings.validate().context("invalid mix settings")?;

        let segments = inspect_segments(&job, cancel)?;
        let vote = vote_on(&segments);

        info!(
            segments = segments.len(),
            groups = vote.group_count,
            dominant = ?vote.dominant_format.as_ref().map(ToString::to_string),
            excluded = vote.excluded_source_ids.len(),
            "Format vote finished"
        );
        if !vote.warning_text.is_empty() {
            warn!("Sources excluded from the mix:\n{}", vote.warning_text);
        }

        Ok(Self {
            job,
            settings,
            segments,
            vote,
        })
    }

    pub fn job(&self) -> &JobConfig {
        &self.job
    }

    pub fn settings(&self) -> &MixSettings {
        &self.settings
    }

    pub fn segments(&self) -> &[SegmentInfo] {
        &self.segments
    }

    pub fn vote(&self) -> &VotingResult {
        &self.vote
    }

    pub fn report(&self) -> VoteReport {
        let segments = self
            .segments
            .iter()
            .map(|seen| SegmentReport {
                stream: seen.stream.clone(),
                source_id: seen.segment.source_id.clone(),
                path: seen.segment.path.clone(),
                format: seen.info.as_ref().map(|i| i.format.to_string()),
                start_secs: seen.segment.start_secs,
                duration_secs: ticks_to_secs_f64(seen.duration()),
                excluded: self
                    .vote
                    .is_excluded(&SourceId::new(seen.segment.source_id.as_str())),
            })
            .collect();

        VoteReport {
            job: self.job.name.clone(),
            result: self.vote.clone(),
            segments,
        }
    }

    /// Encode profile for the bridge
    ///
    /// Falls back to the mix target and the first segment when the vote saw
    /// no concrete format.
    fn encode_profile(&self, session: &MixSession) -> EncodeProfile {
        EncodeProfile::from_vote(&self.vote).unwrap_or_else(|| EncodeProfile {
            compatible_source_id: self
                .segments
                .first()
                .map(|p| SourceId::new(p.segment.source_id.as_str()))
                .unwrap_or_else(|| SourceId::new(self.job.name.as_str())),
            format: session.target().format(),
        })
    }

    /// Mix every stream into a sink opened by `bridge`
    ///
    /// Blocking; callers on an async runtime should use `spawn_blocking`.
    #[instrument(skip_all, fields(job = %self.job.name))]
    pub fn run(&self, bridge: &mut dyn RecompressionBridge, cancel: CancelFlag) -> Result<MixOutcome> {
        let sources: Vec<Box<dyn SampleSource>> = self
            .job
            .streams
            .iter()
            .map(|stream| {
                Box::new(SegmentedSource::from_stream(stream, self.settings.chunk_ms))
                    as Box<dyn SampleSource>
            })
            .collect();

        let mut session = MixSession::plan(&self.vote, &self.settings, sources, cancel)
            .context("cannot plan mix session")?;
        info!(
            target = %session.target().format(),
            block_bytes = session.block_bytes(),
            streams = self.job.streams.len(),
            "Starting mix"
        );

        let profile = self.encode_profile(&session);
        let mut sink = bridge
            .open(&profile, session.target())
            .context("cannot open output")?;

        let outcome = session.run(sink.as_mut()).context("mix failed")?;
        Ok(outcome)
    }
}

fn inspect_segments(job: &JobConfig, cancel: &CancelFlag) -> Result<Vec<SegmentInfo>> {
    let mut segments = Vec::new();
    for stream in &job.streams {
        for segment in &stream.segments {
            if cancel.is_cancelled() {
                info!(inspected = segments.len(), "Cancelled while reading segment headers");
                bail!("cancelled while reading segment headers");
            }

            let info = match wav::read_info(&segment.path) {
                Ok(info) => Some(info),
                Err(e) => {
                    warn!(
                        path = %segment.path.display(),
                        error = %e,
                        "Cannot read segment header, treating its format as unknown"
                    );
                    None
                }
            };
            segments.push(SegmentInfo {
                stream: stream.name.clone(),
                segment: segment.clone(),
                info,
            });
        }
    }
    Ok(segments)
}

fn vote_on(segments: &[SegmentInfo]) -> VotingResult {
    let mut voter = CompatibilityVoter::new();
    for seen in segments {
        voter.observe(
            seen.info.as_ref().map(|i| &i.format),
            seen.duration(),
            SourceId::new(seen.segment.source_id.as_str()),
            seen.segment.display_name.as_str(),
            seen.segment.start_ticks(),
        );
    }
    voter.finalize()
}
