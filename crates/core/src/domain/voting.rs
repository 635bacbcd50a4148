//! Duration-weighted voting over the formats of recorded sources
//!
//! Every discovered source segment is observed once with its format and
//! duration. Observations with compatible formats are grouped; the group
//! backed by the most audio wins and every source outside it is excluded
//! from the mix. Minority formats are dropped rather than converted since
//! the engine does not resample.

use crate::domain::audio::{AudioFormatDescriptor, SourceId, Ticks};
use serde::Serialize;
use std::collections::BTreeSet;
use tracing::{debug, trace};

/// A source that contributed to a format group
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SourceRecord {
    pub source_id: SourceId,
    pub display_name: String,
    pub start_time: Ticks,
    pub duration: Ticks,
}

impl SourceRecord {
    /// Display name, or the id when no name was recorded
    pub fn label(&self) -> &str {
        if self.display_name.is_empty() {
            self.source_id.as_str()
        } else {
            &self.display_name
        }
    }
}

/// Sources sharing one compatible format, with their cumulative duration
#[derive(Debug, Clone, Serialize)]
pub struct FormatGroup {
    format: Option<AudioFormatDescriptor>,
    total_duration: Ticks,
    members: Vec<SourceRecord>,
}

impl FormatGroup {
    fn new(format: Option<&AudioFormatDescriptor>, record: SourceRecord) -> Self {
        Self {
            format: format.cloned(),
            total_duration: record.duration,
            members: vec![record],
        }
    }

    /// Group format; `None` while only unset formats have been observed
    pub fn format(&self) -> Option<&AudioFormatDescriptor> {
        self.format.as_ref()
    }

    pub fn total_duration(&self) -> Ticks {
        self.total_duration
    }

    pub fn members(&self) -> &[SourceRecord] {
        &self.members
    }

    pub fn contains(&self, source_id: &SourceId) -> bool {
        self.members.iter().any(|m| &m.source_id == source_id)
    }

    fn accepts(&self, format: Option<&AudioFormatDescriptor>) -> bool {
        AudioFormatDescriptor::compatible(self.format.as_ref(), format)
    }

    fn record(&mut self, format: Option<&AudioFormatDescriptor>, record: SourceRecord) {
        // A wildcard group takes on the first concrete format it accepts
        if self.format.is_none() {
            self.format = format.cloned();
        }

        self.total_duration += record.duration;

        match self
            .members
            .iter_mut()
            .find(|m| m.source_id == record.source_id)
        {
            Some(existing) => existing.duration += record.duration,
            None => self.members.push(record),
        }
    }
}

/// Outcome of a vote, computed once after every source was observed
#[derive(Debug, Clone, Default, Serialize)]
pub struct VotingResult {
    /// Format of the group with the largest cumulative duration
    pub dominant_format: Option<AudioFormatDescriptor>,
    /// Members of every non-dominant group
    pub excluded_source_ids: BTreeSet<SourceId>,
    /// One line per excluded source, empty when nothing was excluded
    pub warning_text: String,
    /// First member of the dominant group, used to pick an encoder profile
    pub representative_source_id: Option<SourceId>,
    pub group_count: usize,
}

impl VotingResult {
    pub fn is_excluded(&self, source_id: &SourceId) -> bool {
        self.excluded_source_ids.contains(source_id)
    }

    pub fn has_exclusions(&self) -> bool {
        !self.excluded_source_ids.is_empty()
    }
}

/// Groups observed formats and elects the dominant one
#[derive(Debug, Default)]
pub struct CompatibilityVoter {
    groups: Vec<FormatGroup>,
}

impl CompatibilityVoter {
    pub fn new() -> Self {
        Self { groups: Vec::new() }
    }

    /// Record one source segment
    ///
    /// `format` may be `None` when upstream could not determine it; such an
    /// observation matches any group. Durations are additive per call, while
    /// membership is stored once per distinct source id. Negative durations
    /// count as zero.
    pub fn observe(
        &mut self,
        format: Option<&AudioFormatDescriptor>,
        duration: Ticks,
        source_id: SourceId,
        display_name: impl Into<String>,
        start_time: Ticks,
    ) {
        let record = SourceRecord {
            source_id,
            display_name: display_name.into(),
            start_time,
            duration: duration.max(0),
        };

        match self.groups.iter_mut().position(|g| g.accepts(format)) {
            Some(index) => {
                trace!(
                    source = %record.source_id,
                    group = index,
                    duration = record.duration,
                    "Observation joins existing format group"
                );
                self.groups[index].record(format, record);
            }
            None => {
                debug!(
                    source = %record.source_id,
                    format = ?format.map(ToString::to_string),
                    group = self.groups.len(),
                    "New format group"
                );
                self.groups.push(FormatGroup::new(format, record));
            }
        }
    }

    pub fn groups(&self) -> &[FormatGroup] {
        &self.groups
    }

    /// Elect the dominant group and compute the excluded sources
    ///
    /// Ties on cumulative duration go to the group created first.
    pub fn finalize(self) -> VotingResult {
        let mut dominant: Option<&FormatGroup> = None;
        for group in &self.groups {
            match dominant {
                Some(best) if group.total_duration <= best.total_duration => {}
                _ => dominant = Some(group),
            }
        }

        let Some(dominant) = dominant else {
            debug!("No sources observed, vote is empty");
            return VotingResult::default();
        };

        let mut excluded_source_ids = BTreeSet::new();
        let mut lines = Vec::new();

        for group in self.groups.iter().filter(|g| !std::ptr::eq(*g, dominant)) {
            for member in &group.members {
                if dominant.contains(&member.source_id) {
                    continue;
                }
                if excluded_source_ids.insert(member.source_id.clone()) {
                    lines.push(format!("{} start={}", member.label(), member.start_time));
                }
            }
        }

        debug!(
            groups = self.groups.len(),
            dominant = ?dominant.format.as_ref().map(ToString::to_string),
            dominant_duration = dominant.total_duration,
            excluded = excluded_source_ids.len(),
            "Format vote finalized"
        );

        VotingResult {
            dominant_format: dominant.format.clone(),
            excluded_source_ids,
            warning_text: lines.join("\n"),
            representative_source_id: dominant.members.first().map(|m| m.source_id.clone()),
            group_count: self.groups.len(),
        }
    }
}
