//! Integration tests for the voter and the mixing engine
//!
//! These tests drive whole sessions over in-memory sources: vote, plan,
//! mix block by block, and check the timeline of the produced blocks.

use recast_core::domain::audio::{
    AudioFormatDescriptor, ChunkQueue, SampleSource, SourceId, Ticks, TICKS_PER_SECOND,
};
use recast_core::domain::config::MixSettings;
use recast_core::domain::mixer::{MixTarget, MixedBlock, MixingEngine};
use recast_core::domain::session::{CancelFlag, MixSession};
use recast_core::domain::voting::CompatibilityVoter;
use std::collections::BTreeSet;

const RATE: u32 = 100;

/// Mono 16-bit source at [`RATE`] holding `value` for `secs` seconds, in
/// chunks of 1/10 s
fn constant_source(id: &str, start_secs: i64, secs: i64, value: i16) -> ChunkQueue {
    let source_id = SourceId::new(id);
    let per_chunk = (RATE / 10) as usize;
    let mut queue = ChunkQueue::new(1);
    for i in 0..secs * 10 {
        let timestamp = start_secs * TICKS_PER_SECOND + i * TICKS_PER_SECOND / 10;
        queue.push_i16(&source_id, timestamp, &vec![value; per_chunk]);
    }
    queue
}

fn samples(block: &MixedBlock) -> Vec<i16> {
    block
        .data
        .chunks_exact(2)
        .map(|b| i16::from_le_bytes([b[0], b[1]]))
        .collect()
}

fn engine(excluded: &[&str]) -> MixingEngine {
    MixingEngine::new(
        MixTarget::new(RATE, 16, 1),
        TICKS_PER_SECOND / 1000,
        excluded.iter().map(|id| SourceId::new(*id)).collect(),
    )
    .unwrap()
}

/// One second of output at [`RATE`] mono 16-bit
const SECOND_BLOCK: usize = RATE as usize * 2;

// ============================================================================
// END-TO-END
// ============================================================================

#[test]
fn test_dominant_format_wins_and_minority_is_excluded() {
    let format_a = AudioFormatDescriptor::pcm(RATE, 16, 1);
    let format_b = AudioFormatDescriptor::pcm(2 * RATE, 16, 1);

    let mut voter = CompatibilityVoter::new();
    voter.observe(Some(&format_a), 10 * TICKS_PER_SECOND, SourceId::new("a1"), "Lectern", 0);
    voter.observe(
        Some(&format_b),
        TICKS_PER_SECOND,
        SourceId::new("b"),
        "Phone",
        3 * TICKS_PER_SECOND,
    );
    voter.observe(
        Some(&format_a),
        2 * TICKS_PER_SECOND,
        SourceId::new("a2"),
        "Lectern (restart)",
        10 * TICKS_PER_SECOND,
    );
    let vote = voter.finalize();

    assert_eq!(vote.dominant_format, Some(format_a));
    assert_eq!(vote.excluded_source_ids, BTreeSet::from([SourceId::new("b")]));
    assert_eq!(vote.warning_text, "Phone start=30000000");
    assert_eq!(vote.representative_source_id, Some(SourceId::new("a1")));

    let sources: Vec<Box<dyn SampleSource>> = vec![
        Box::new(constant_source("a1", 0, 10, 100)),
        Box::new(constant_source("a2", 10, 2, 100)),
        Box::new(constant_source("b", 3, 1, 7)),
    ];
    let settings = MixSettings {
        block_bytes: SECOND_BLOCK,
        tolerance_ms: 1,
        ..MixSettings::default()
    };
    let mut session = MixSession::plan(&vote, &settings, sources, CancelFlag::new()).unwrap();

    let mut blocks: Vec<MixedBlock> = Vec::new();
    let outcome = session.run(&mut blocks).unwrap();

    assert_eq!(outcome.blocks, 12);
    assert_eq!(outcome.end_timestamp, Some(12 * TICKS_PER_SECOND));
    for (i, block) in blocks.iter().enumerate() {
        assert_eq!(block.timestamp, i as Ticks * TICKS_PER_SECOND);
        assert!(samples(block).iter().all(|&s| s == 100), "block {i}");
    }
    assert_eq!(session.engine().clipped_samples(), 0);
}

#[test]
fn test_excluded_source_never_reaches_a_buffer() {
    let mut engine = engine(&["b"])
        .with_source(Box::new(constant_source("a", 0, 3, 5)))
        .with_source(Box::new(constant_source("b", 0, 3, 9)));

    while let Some(block) = engine.next_block(SECOND_BLOCK) {
        assert!(!engine.live_source_ids().contains(&SourceId::new("b")));
        assert!(samples(&block).iter().all(|&s| s == 5));
    }
    assert!(engine.buffers()[1].skipped_chunks() > 0);
}

// ============================================================================
// CLIPPING
// ============================================================================

#[test]
fn test_positive_and_negative_overflow_clip_symmetrically() {
    let mut loud = engine(&[])
        .with_source(Box::new(constant_source("x", 0, 1, 30000)))
        .with_source(Box::new(constant_source("y", 0, 1, 30000)));
    let block = loud.next_block(SECOND_BLOCK).unwrap();
    assert!(samples(&block).iter().all(|&s| s == 32767));
    assert_eq!(loud.clipped_samples(), RATE as u64);

    let mut negative = engine(&[])
        .with_source(Box::new(constant_source("x", 0, 1, -30000)))
        .with_source(Box::new(constant_source("y", 0, 1, -30000)));
    let block = negative.next_block(SECOND_BLOCK).unwrap();
    assert!(samples(&block).iter().all(|&s| s == -32767));
}

#[test]
fn test_sum_is_clipped_once() {
    // Three sources overflow together but a fourth pulls the sum back in range
    let mut engine = engine(&[])
        .with_source(Box::new(constant_source("a", 0, 1, 20000)))
        .with_source(Box::new(constant_source("b", 0, 1, 20000)))
        .with_source(Box::new(constant_source("c", 0, 1, 20000)))
        .with_source(Box::new(constant_source("d", 0, 1, -30000)));

    let block = engine.next_block(SECOND_BLOCK).unwrap();
    assert!(samples(&block).iter().all(|&s| s == 30000));
    assert_eq!(engine.clipped_samples(), 0);
}

// ============================================================================
// EXHAUSTION AND ALIGNMENT
// ============================================================================

#[test]
fn test_mix_continues_with_remaining_source_after_exhaustion() {
    let mut engine = engine(&[])
        .with_source(Box::new(constant_source("short", 0, 5, 10)))
        .with_source(Box::new(constant_source("long", 0, 8, 1)));

    let mut blocks = Vec::new();
    while let Some(block) = engine.next_block(SECOND_BLOCK) {
        blocks.push(block);
    }

    assert_eq!(blocks.len(), 8);
    for (i, block) in blocks.iter().enumerate() {
        assert_eq!(block.timestamp, i as Ticks * TICKS_PER_SECOND);
        let expected = if i < 5 { 11 } else { 1 };
        assert!(samples(block).iter().all(|&s| s == expected), "block {i}");
    }
    assert!(engine.buffers()[0].is_exhausted());
    assert!(engine.buffers()[1].is_exhausted());
    assert!(engine.next_block(SECOND_BLOCK).is_none());
}

#[test]
fn test_late_source_joins_at_its_timestamp() {
    let mut late = ChunkQueue::new(1);
    // starts half a second in
    late.push_i16(&SourceId::new("late"), TICKS_PER_SECOND / 2, &[3; 50]);

    let mut engine = engine(&[])
        .with_source(Box::new(constant_source("early", 0, 1, 1)))
        .with_source(Box::new(late));

    let block = engine.next_block(SECOND_BLOCK).unwrap();
    let mixed = samples(&block);
    assert!(mixed[..50].iter().all(|&s| s == 1));
    assert!(mixed[50..].iter().all(|&s| s == 4));
    assert!(engine.next_block(SECOND_BLOCK).is_none());
}

#[test]
fn test_single_source_is_reproduced_exactly() {
    let ramp: Vec<i16> = (0..RATE as i16).map(|i| i * 300 - 15000).collect();
    let mut queue = ChunkQueue::new(1);
    queue.push_i16(&SourceId::new("solo"), 0, &ramp);

    let mut engine = engine(&[]).with_source(Box::new(queue));
    let block = engine.next_block(SECOND_BLOCK).unwrap();
    assert_eq!(samples(&block), ramp);
}

#[test]
fn test_stereo_target_from_mono_and_stereo_sources() {
    let mut mono = ChunkQueue::new(1);
    mono.push_i16(&SourceId::new("mono"), 0, &[10, 20]);
    let mut stereo = ChunkQueue::new(2);
    stereo.push_i16(&SourceId::new("stereo"), 0, &[1, 2, 3, 4]);

    let mut engine = MixingEngine::new(MixTarget::new(RATE, 16, 2), TICKS_PER_SECOND / 1000, BTreeSet::new())
        .unwrap()
        .with_source(Box::new(mono))
        .with_source(Box::new(stereo));

    let block = engine.next_block(8).unwrap();
    assert_eq!(samples(&block), vec![11, 12, 23, 24]);
}

// ============================================================================
// DEFAULT TOLERANCE
// ============================================================================

fn default_engine(target: MixTarget) -> MixingEngine {
    MixingEngine::new(target, MixSettings::default().tolerance_ticks(), BTreeSet::new()).unwrap()
}

#[test]
fn test_late_mono_source_joins_within_default_tolerance() {
    let mut late = ChunkQueue::new(1);
    late.push_i16(&SourceId::new("late"), TICKS_PER_SECOND / 2, &[3; 50]);

    let mut engine = default_engine(MixTarget::new(RATE, 16, 1))
        .with_source(Box::new(constant_source("early", 0, 1, 1)))
        .with_source(Box::new(late));

    // 100 ms of tolerance is ten positions at 100 Hz, so the late source is
    // picked up at 0.4 s and runs out ten positions before the block ends
    let mixed = samples(&engine.next_block(SECOND_BLOCK).unwrap());
    assert!(mixed[..40].iter().all(|&s| s == 1));
    assert!(mixed[40..90].iter().all(|&s| s == 4));
    assert!(mixed[90..].iter().all(|&s| s == 1));
    assert!(engine.next_block(SECOND_BLOCK).is_none());
}

#[test]
fn test_late_stereo_source_joins_on_frame_boundary() {
    const STEREO_RATE: u32 = 8000;
    let frames = |left: i16, right: i16, count: usize| -> Vec<i16> {
        std::iter::repeat([left, right]).take(count).flatten().collect()
    };

    let tolerance = MixSettings::default().tolerance_ticks();
    let mut early = ChunkQueue::new(2);
    early.push_i16(&SourceId::new("early"), 0, &frames(1, 2, 800));
    let mut late = ChunkQueue::new(2);
    // 8 kHz stereo has 625 ticks per interleaved position: this source comes
    // into range on the right channel of the first frame
    late.push_i16(&SourceId::new("late"), tolerance + 625, &frames(10, 20, 800));

    let target = MixTarget::new(STEREO_RATE, 16, 2);
    let mut engine = default_engine(target)
        .with_source(Box::new(early))
        .with_source(Box::new(late));

    let block = engine.next_block(800 * target.block_align()).unwrap();
    assert_eq!(block.timestamp, 0);
    let mixed = samples(&block);
    assert_eq!(mixed[..2], [1, 2]);
    for (i, frame) in mixed[2..].chunks_exact(2).enumerate() {
        assert_eq!(frame, [11, 22], "frame {}", i + 1);
    }

    // The late source joined one frame in, so its last frame spills over
    let tail = engine.next_block(target.block_align()).unwrap();
    assert_eq!(tail.timestamp, tolerance + 625 + 799 * 1250);
    assert_eq!(samples(&tail), vec![10, 20]);
    assert!(engine.next_block(target.block_align()).is_none());
}
