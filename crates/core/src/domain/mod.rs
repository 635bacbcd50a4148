//! Domain entities and business rules

pub mod audio;
pub mod config;
pub mod mixer;
pub mod session;
pub mod voting;

// Re-export specific items to avoid ambiguous glob imports
pub use audio::{
    AudioError, AudioFormatDescriptor, ChunkQueue, SampleClock, SampleSource, SourceChunk,
    SourceId, Ticks, TICKS_PER_SECOND,
};
pub use config::{
    ConfigError, ConfigManager, JobConfig, MixSettings, OutputSettings, RecastConfig, SegmentSpec,
    StreamSpec,
};
pub use mixer::{MixTarget, MixedBlock, MixingEngine, SourceBuffer};
pub use session::{
    BlockSink, CancelFlag, EncodeProfile, MixOutcome, MixSession, MixStatus, RecompressionBridge,
};
pub use voting::{CompatibilityVoter, FormatGroup, SourceRecord, VotingResult};
