//! Integration tests for the WAV job pipeline
//!
//! Segments are written to a temporary directory, described by a job file,
//! and mixed through `JobPipeline` into a WAV output.

use recast_core::domain::audio::{AudioFormatDescriptor, SourceId};
use recast_core::domain::config::{JobConfig, MixSettings, SegmentSpec, StreamSpec};
use recast_core::domain::mixer::MixTarget;
use recast_core::domain::session::CancelFlag;
use recast_infra::audio::{wav, JobPipeline, WavBridge};
use std::path::{Path, PathBuf};
use tempfile::TempDir;

fn write_constant(path: &Path, rate: u32, value: i16, frames: usize) {
    let data: Vec<u8> = std::iter::repeat(value.to_le_bytes())
        .take(frames)
        .flatten()
        .collect();
    wav::write_wav(path, &MixTarget::new(rate, 16, 1), &data).unwrap();
}

fn segment(file: &str, id: &str, start_secs: f64) -> SegmentSpec {
    SegmentSpec {
        path: PathBuf::from(file),
        source_id: id.to_string(),
        display_name: String::new(),
        start_secs,
    }
}

/// Podium: 1 s at 8 kHz, then 0.5 s at 22.05 kHz from t=1 s.
/// Room: 1 s at 8 kHz from t=2 s.
async fn lecture_job(dir: &Path) -> JobConfig {
    write_constant(&dir.join("podium-1.wav"), 8000, 1000, 8000);
    write_constant(&dir.join("podium-2.wav"), 22050, 5000, 11025);
    write_constant(&dir.join("room.wav"), 8000, 300, 8000);

    let job = JobConfig {
        name: "lecture".to_string(),
        output: PathBuf::from("lecture.wav"),
        mix: Some(MixSettings {
            block_bytes: 1600,
            ..MixSettings::default()
        }),
        streams: vec![
            StreamSpec {
                name: "podium".to_string(),
                segments: vec![
                    segment("podium-1.wav", "podium-1", 0.0),
                    segment("podium-2.wav", "podium-2", 1.0),
                ],
            },
            StreamSpec {
                name: "room".to_string(),
                segments: vec![segment("room.wav", "room", 2.0)],
            },
        ],
    };

    let job_path = dir.join("lecture.toml");
    job.save_to_file(&job_path).await.unwrap();
    JobConfig::load_from_file(&job_path).await.unwrap()
}

fn part_files(dir: &Path) -> usize {
    std::fs::read_dir(dir)
        .unwrap()
        .filter(|e| {
            e.as_ref()
                .map(|e| e.file_name().to_string_lossy().ends_with(".part"))
                .unwrap_or(false)
        })
        .count()
}

#[tokio::test]
async fn test_job_mixes_to_wav_with_gap_and_exclusion() {
    let dir = TempDir::new().unwrap();
    let job = lecture_job(dir.path()).await;
    let output = dir.path().join("lecture.wav");

    let pipeline = JobPipeline::prepare(job, &MixSettings::default(), &CancelFlag::new()).unwrap();
    let vote = pipeline.vote();
    assert_eq!(vote.dominant_format, Some(AudioFormatDescriptor::pcm(8000, 16, 1)));
    assert!(vote.is_excluded(&SourceId::new("podium-2")));
    assert_eq!(vote.warning_text, "podium-2 start=10000000");

    let mut bridge = WavBridge::new(&output, false);
    let outcome = tokio::task::spawn_blocking(move || pipeline.run(&mut bridge, CancelFlag::new()))
        .await
        .unwrap()
        .unwrap();

    assert!(!outcome.is_cancelled());
    assert_eq!(outcome.blocks, 20);
    assert_eq!(outcome.first_timestamp, Some(0));
    assert_eq!(outcome.end_timestamp, Some(30_000_000));

    let info = wav::read_info(&output).unwrap();
    assert_eq!(info.format, AudioFormatDescriptor::pcm(8000, 16, 1));
    // three seconds, including one second of silence between the streams
    assert_eq!(info.data_len(), 48_000);

    let bytes = std::fs::read(&output).unwrap();
    let samples: Vec<i16> = bytes[44..]
        .chunks_exact(2)
        .map(|b| i16::from_le_bytes([b[0], b[1]]))
        .collect();
    assert!(samples[..8000].iter().all(|&s| s == 1000));
    assert!(samples[8000..16000].iter().all(|&s| s == 0));
    assert!(samples[16000..].iter().all(|&s| s == 300));
    assert_eq!(part_files(dir.path()), 0);
}

#[tokio::test]
async fn test_cancelled_job_leaves_no_output() {
    let dir = TempDir::new().unwrap();
    let job = lecture_job(dir.path()).await;
    let output = dir.path().join("cancelled.wav");

    let pipeline = JobPipeline::prepare(job, &MixSettings::default(), &CancelFlag::new()).unwrap();
    let cancel = CancelFlag::new();
    cancel.cancel();

    let mut bridge = WavBridge::new(&output, false);
    let outcome = pipeline.run(&mut bridge, cancel).unwrap();

    assert!(outcome.is_cancelled());
    assert_eq!(outcome.blocks, 0);
    assert!(!output.exists());
    assert_eq!(part_files(dir.path()), 0);
}

#[tokio::test]
async fn test_vote_report_lists_every_segment() {
    let dir = TempDir::new().unwrap();
    let job = lecture_job(dir.path()).await;

    let report = JobPipeline::prepare(job, &MixSettings::default(), &CancelFlag::new())
        .unwrap()
        .report();

    assert_eq!(report.job, "lecture");
    assert_eq!(report.result.group_count, 2);
    let excluded: Vec<_> = report
        .segments
        .iter()
        .filter(|s| s.excluded)
        .map(|s| s.source_id.as_str())
        .collect();
    assert_eq!(excluded, vec!["podium-2"]);
    assert!((report.segments[1].duration_secs - 0.5).abs() < 1e-9);
}

#[tokio::test]
async fn test_cancel_before_mixing_stops_preparation() {
    let dir = TempDir::new().unwrap();
    let job = lecture_job(dir.path()).await;

    let cancel = CancelFlag::new();
    cancel.cancel();
    let result = JobPipeline::prepare(job, &MixSettings::default(), &cancel);

    assert!(result.is_err());
    assert!(!dir.path().join("lecture.wav").exists());
    assert_eq!(part_files(dir.path()), 0);
}
