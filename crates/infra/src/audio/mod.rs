//! File-backed audio collaborators
//!
//! - `wav`: WAV reading through symphonia, and header writing
//! - `segment_source`: a stream of recorded WAV segments as a sample source
//! - `wav_sink`: WAV output with atomic persist on finish
//! - `pipeline`: segment headers, vote and mix for a job file

pub mod pipeline;
pub mod segment_source;
pub mod wav;
pub mod wav_sink;

pub use pipeline::{JobPipeline, SegmentInfo, SegmentReport, VoteReport};
pub use segment_source::{Segment, SegmentedSource};
pub use wav::{WavInfo, WavReader};
pub use wav_sink::{WavBridge, WavFileSink};
