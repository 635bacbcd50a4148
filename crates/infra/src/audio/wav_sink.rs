//! WAV output for mixed blocks
//!
//! Blocks are streamed into a temporary file next to the destination. Gaps
//! between consecutive blocks are filled with silence so the file keeps the
//! timeline's spacing. The header is patched and the file moved into place
//! only when the sink is finished; a sink dropped before that removes its
//! temporary file.

use super::wav::{self, WAV_HEADER_LEN};
use recast_core::domain::audio::{AudioError, Result, SampleClock, Ticks};
use recast_core::domain::mixer::{MixTarget, MixedBlock};
use recast_core::domain::session::{BlockSink, EncodeProfile, RecompressionBridge};
use std::io::{BufWriter, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::{debug, info, instrument};

/// Streams mixed PCM into a WAV file
pub struct WavFileSink {
    writer: Option<BufWriter<NamedTempFile>>,
    destination: PathBuf,
    target: MixTarget,
    overwrite: bool,
    clock: SampleClock,
    next_timestamp: Option<Ticks>,
    data_len: u64,
    silence_bytes: u64,
}

impl WavFileSink {
    /// Create the temporary file in the destination's directory
    pub fn create(destination: &Path, target: MixTarget, overwrite: bool) -> Result<Self> {
        if !overwrite && destination.exists() {
            return Err(AudioError::SinkError(format!(
                "{} already exists",
                destination.display()
            )));
        }

        let dir = match destination.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        std::fs::create_dir_all(&dir)?;

        let temp = tempfile::Builder::new()
            .prefix(".recast-")
            .suffix(".wav.part")
            .tempfile_in(&dir)?;
        debug!(temp = %temp.path().display(), "Opened temporary output");

        let mut writer = BufWriter::new(temp);
        writer.write_all(&wav::header_bytes(&target, 0))?;

        Ok(Self {
            writer: Some(writer),
            destination: destination.to_path_buf(),
            target,
            overwrite,
            clock: target.clock(),
            next_timestamp: None,
            data_len: 0,
            silence_bytes: 0,
        })
    }

    pub fn destination(&self) -> &Path {
        &self.destination
    }

    pub fn bytes_written(&self) -> u64 {
        self.data_len
    }

    /// Bytes of silence inserted for timeline gaps
    pub fn silence_bytes(&self) -> u64 {
        self.silence_bytes
    }

    fn writer(&mut self) -> Result<&mut BufWriter<NamedTempFile>> {
        self.writer
            .as_mut()
            .ok_or_else(|| AudioError::SinkError("sink already finished".to_string()))
    }

    fn write_pcm(&mut self, data: &[u8]) -> Result<()> {
        let data_len = self.data_len + data.len() as u64;
        if data_len > u64::from(u32::MAX) - WAV_HEADER_LEN as u64 {
            return Err(AudioError::SinkError("WAV output exceeds 4 GiB".to_string()));
        }

        let eight_bit = self.target.bits_per_sample == 8;
        let writer = self.writer()?;
        if eight_bit {
            let mut unsigned = data.to_vec();
            wav::flip_8bit_sign(&mut unsigned);
            writer.write_all(&unsigned)?;
        } else {
            writer.write_all(data)?;
        }

        self.data_len = data_len;
        Ok(())
    }
}

impl BlockSink for WavFileSink {
    fn write_block(&mut self, block: &MixedBlock) -> Result<()> {
        if let Some(expected) = self.next_timestamp {
            if block.timestamp > expected {
                let channels = u64::from(self.target.channels.max(1));
                let positions = self.clock.positions_in(block.timestamp - expected);
                let frames = positions / channels;
                if frames > 0 {
                    let len = (frames * channels) as usize * self.target.bytes_per_sample();
                    let silence = vec![0u8; len];
                    debug!(gap = block.timestamp - expected, frames, "Filling gap with silence");
                    self.write_pcm(&silence)?;
                    self.silence_bytes += silence.len() as u64;
                }
            }
        }

        self.write_pcm(&block.data)?;
        self.next_timestamp = Some(block.end_timestamp(&self.clock));
        Ok(())
    }

    #[instrument(skip(self), fields(destination = %self.destination.display()))]
    fn finish(&mut self) -> Result<()> {
        let writer = self
            .writer
            .take()
            .ok_or_else(|| AudioError::SinkError("sink already finished".to_string()))?;
        let mut temp = writer
            .into_inner()
            .map_err(|e| AudioError::Io(e.into_error()))?;

        // Bounded by the check in write_block
        let data_len = self.data_len as u32;
        temp.seek(SeekFrom::Start(0))?;
        temp.write_all(&wav::header_bytes(&self.target, data_len))?;
        temp.as_file().sync_all()?;

        let persisted = if self.overwrite {
            temp.persist(&self.destination)
        } else {
            temp.persist_noclobber(&self.destination)
        };
        persisted.map_err(|e| AudioError::SinkError(format!("cannot persist output: {}", e.error)))?;

        info!(bytes = self.data_len, "WAV output written");
        Ok(())
    }
}

/// [`RecompressionBridge`] producing plain WAV files
///
/// The encode profile only informs logging: mixed PCM is written as-is in
/// the mix target's layout.
pub struct WavBridge {
    destination: PathBuf,
    overwrite: bool,
}

impl WavBridge {
    pub fn new(destination: impl Into<PathBuf>, overwrite: bool) -> Self {
        Self {
            destination: destination.into(),
            overwrite,
        }
    }
}

impl RecompressionBridge for WavBridge {
    fn open(&mut self, profile: &EncodeProfile, target: &MixTarget) -> Result<Box<dyn BlockSink>> {
        info!(
            compatible_source = %profile.compatible_source_id,
            format = %profile.format,
            destination = %self.destination.display(),
            "Opening WAV output"
        );
        Ok(Box::new(WavFileSink::create(&self.destination, *target, self.overwrite)?))
    }
}
