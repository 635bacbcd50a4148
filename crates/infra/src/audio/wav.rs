//! WAV input through symphonia, and a minimal WAV writer
//!
//! Recorded segments are opened with symphonia's format reader: the default
//! track's codec parameters describe the segment, and its packets carry the
//! raw interleaved PCM that the mixer consumes. Mixed output gets a canonical
//! 44-byte header written by hand. 8-bit WAV data is unsigned on disk while
//! the mixer works on signed samples, so conversion helpers live here too.

use recast_core::domain::audio::{
    AudioError, AudioFormatDescriptor, Result, Ticks, MAJOR_TYPE_AUDIO, SUBTYPE_PCM,
};
use recast_core::domain::mixer::MixTarget;
use std::fs::File;
use std::io::{ErrorKind, Write};
use std::path::Path;
use symphonia::core::codecs::{
    CodecType, CODEC_TYPE_PCM_F32LE, CODEC_TYPE_PCM_F64LE, CODEC_TYPE_PCM_S16LE,
    CODEC_TYPE_PCM_S24LE, CODEC_TYPE_PCM_S32LE, CODEC_TYPE_PCM_U8,
};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::{FormatOptions, FormatReader};
use symphonia::core::io::{MediaSource, MediaSourceStream};
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use tracing::{debug, trace};

pub const WAV_HEADER_LEN: usize = 44;

const FORMAT_TAG_PCM: u16 = 0x0001;

/// Format and length of a WAV file's sample data
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WavInfo {
    pub format: AudioFormatDescriptor,
    /// Frames declared by the container
    pub frames: u64,
}

impl WavInfo {
    /// Length of the sample data in bytes
    pub fn data_len(&self) -> u64 {
        self.frames * self.format.block_align() as u64
    }

    pub fn duration(&self) -> Ticks {
        self.format.duration_of(self.data_len())
    }
}

fn invalid(msg: impl Into<String>) -> AudioError {
    AudioError::InvalidFormat(msg.into())
}

fn media_error(e: SymphoniaError) -> AudioError {
    match e {
        SymphoniaError::IoError(e) if e.kind() != ErrorKind::UnexpectedEof => AudioError::Io(e),
        other => invalid(other.to_string()),
    }
}

fn is_end_of_stream(e: &SymphoniaError) -> bool {
    matches!(e, SymphoniaError::IoError(e) if e.kind() == ErrorKind::UnexpectedEof)
}

fn sub_type_for(codec: CodecType) -> String {
    match codec {
        CODEC_TYPE_PCM_U8 | CODEC_TYPE_PCM_S16LE | CODEC_TYPE_PCM_S24LE | CODEC_TYPE_PCM_S32LE => {
            SUBTYPE_PCM.to_string()
        }
        CODEC_TYPE_PCM_F32LE | CODEC_TYPE_PCM_F64LE => "float".to_string(),
        other => symphonia::default::get_codecs()
            .get_codec(other)
            .map_or_else(|| format!("codec-{other:?}"), |d| d.short_name.to_string()),
    }
}

fn bits_for(codec: CodecType) -> Option<u32> {
    match codec {
        CODEC_TYPE_PCM_U8 => Some(8),
        CODEC_TYPE_PCM_S16LE => Some(16),
        CODEC_TYPE_PCM_S24LE => Some(24),
        CODEC_TYPE_PCM_S32LE | CODEC_TYPE_PCM_F32LE => Some(32),
        CODEC_TYPE_PCM_F64LE => Some(64),
        _ => None,
    }
}

/// Packet reader over the default track of a WAV stream
pub struct WavReader {
    format: Box<dyn FormatReader>,
    track_id: u32,
    unsigned_8bit: bool,
    info: WavInfo,
}

impl WavReader {
    /// Open a WAV file on disk; format errors name the file
    pub fn open(path: &Path) -> Result<Self> {
        let file = File::open(path)?;

        let mut hint = Hint::new();
        if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
            hint.with_extension(ext);
        }

        Self::from_media_source(Box::new(file), hint).map_err(|e| match e {
            AudioError::InvalidFormat(msg) => {
                AudioError::InvalidFormat(format!("{}: {msg}", path.display()))
            }
            other => other,
        })
    }

    pub fn from_media_source(source: Box<dyn MediaSource>, hint: Hint) -> Result<Self> {
        let mss = MediaSourceStream::new(source, Default::default());
        let opened = symphonia::default::get_probe()
            .format(&hint, mss, &FormatOptions::default(), &MetadataOptions::default())
            .map_err(media_error)?;

        let format = opened.format;
        let track = format
            .default_track()
            .ok_or_else(|| invalid("no default audio track"))?;
        let params = &track.codec_params;

        let sample_rate = params
            .sample_rate
            .ok_or_else(|| invalid("unknown sample rate"))?;
        let channels = params
            .channels
            .map(|c| c.count())
            .ok_or_else(|| invalid("unknown channel layout"))?;
        let bits = params
            .bits_per_sample
            .or_else(|| bits_for(params.codec))
            .ok_or_else(|| invalid("unknown sample width"))?;

        let format_descriptor = AudioFormatDescriptor {
            major_type: MAJOR_TYPE_AUDIO.to_string(),
            sub_type: sub_type_for(params.codec),
            sample_rate,
            bits_per_sample: u16::try_from(bits).map_err(|_| invalid("sample width out of range"))?,
            channel_count: u16::try_from(channels)
                .map_err(|_| invalid("channel count out of range"))?,
        };
        let info = WavInfo {
            format: format_descriptor,
            frames: params.n_frames.unwrap_or(0),
        };
        let track_id = track.id;
        let unsigned_8bit = params.codec == CODEC_TYPE_PCM_U8;
        debug!(format = %info.format, frames = info.frames, "Opened WAV stream");

        Ok(Self {
            format,
            track_id,
            unsigned_8bit,
            info,
        })
    }

    /// WAV stream held in memory
    pub fn from_bytes(bytes: Vec<u8>) -> Result<Self> {
        let mut hint = Hint::new();
        hint.with_extension("wav");
        Self::from_media_source(Box::new(std::io::Cursor::new(bytes)), hint)
    }

    pub fn info(&self) -> &WavInfo {
        &self.info
    }

    pub fn into_info(self) -> WavInfo {
        self.info
    }

    /// Signed little-endian samples of the next packet, `None` at end of stream
    pub fn next_samples(&mut self) -> Result<Option<Vec<u8>>> {
        loop {
            let packet = match self.format.next_packet() {
                Ok(packet) => packet,
                Err(e) if is_end_of_stream(&e) => return Ok(None),
                Err(e) => return Err(media_error(e)),
            };

            if packet.track_id() != self.track_id {
                continue;
            }

            trace!(ts = packet.ts(), bytes = packet.buf().len(), "Read WAV packet");
            let mut data = packet.buf().to_vec();
            if self.unsigned_8bit {
                flip_8bit_sign(&mut data);
            }
            return Ok(Some(data));
        }
    }
}

/// Read the format of a WAV file on disk
pub fn read_info(path: &Path) -> Result<WavInfo> {
    Ok(WavReader::open(path)?.into_info())
}

/// Canonical 44-byte PCM header for `data_len` bytes of `target` audio
pub fn header_bytes(target: &MixTarget, data_len: u32) -> [u8; WAV_HEADER_LEN] {
    let block_align = target.block_align() as u16;
    let byte_rate = target.sample_rate * u32::from(block_align);

    let mut header = [0u8; WAV_HEADER_LEN];
    header[0..4].copy_from_slice(b"RIFF");
    header[4..8].copy_from_slice(&data_len.saturating_add(36).to_le_bytes());
    header[8..12].copy_from_slice(b"WAVE");

    header[12..16].copy_from_slice(b"fmt ");
    header[16..20].copy_from_slice(&16u32.to_le_bytes());
    header[20..22].copy_from_slice(&FORMAT_TAG_PCM.to_le_bytes());
    header[22..24].copy_from_slice(&target.channels.to_le_bytes());
    header[24..28].copy_from_slice(&target.sample_rate.to_le_bytes());
    header[28..32].copy_from_slice(&byte_rate.to_le_bytes());
    header[32..34].copy_from_slice(&block_align.to_le_bytes());
    header[34..36].copy_from_slice(&target.bits_per_sample.to_le_bytes());

    header[36..40].copy_from_slice(b"data");
    header[40..44].copy_from_slice(&data_len.to_le_bytes());
    header
}

/// Write a complete WAV file from signed PCM data
pub fn write_wav(path: &Path, target: &MixTarget, signed_data: &[u8]) -> Result<()> {
    let data_len = u32::try_from(signed_data.len())
        .map_err(|_| AudioError::InvalidConfiguration("WAV data exceeds 4 GiB".to_string()))?;

    let mut file = File::create(path)?;
    file.write_all(&header_bytes(target, data_len))?;
    if target.bits_per_sample == 8 {
        let mut unsigned = signed_data.to_vec();
        flip_8bit_sign(&mut unsigned);
        file.write_all(&unsigned)?;
    } else {
        file.write_all(signed_data)?;
    }
    file.flush()?;
    Ok(())
}

/// Toggle 8-bit samples between WAV's unsigned and the mixer's signed form
pub fn flip_8bit_sign(data: &mut [u8]) {
    for byte in data {
        *byte ^= 0x80;
    }
}
