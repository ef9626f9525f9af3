use std::path::Path;

use reel_timestamp::MediaTime;
use serde::{Deserialize, Serialize};

use crate::{Completion, MediaKind, MediaSample, PcmChunk, PcmFormat, tracks::TrackLabel};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TrackId(pub u32);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OutputId(pub usize);

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VideoCodec {
    #[default]
    H264,
    Hevc,
}

/// Encoder configuration for a writer track.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TrackSettings {
    Video {
        codec: VideoCodec,
        width: u32,
        height: u32,
        fps: Option<u32>,
        real_time: bool,
    },
    Audio {
        format: PcmFormat,
        bitrate: u32,
        real_time: bool,
    },
    /// Samples are written exactly as read.
    Passthrough,
    Timecode,
}

impl TrackSettings {
    pub const AUDIO_BITRATE: u32 = 192_000;

    pub fn audio(real_time: bool) -> Self {
        Self::Audio {
            format: PcmFormat::CANONICAL,
            bitrate: Self::AUDIO_BITRATE,
            real_time,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TrackConfig {
    pub kind: MediaKind,
    pub settings: TrackSettings,
    pub label: Option<TrackLabel>,
}

impl TrackConfig {
    pub fn new(kind: MediaKind, settings: TrackSettings) -> Self {
        Self {
            kind,
            settings,
            label: None,
        }
    }

    pub fn passthrough(kind: MediaKind) -> Self {
        Self::new(kind, TrackSettings::Passthrough)
    }

    pub fn with_label(mut self, label: TrackLabel) -> Self {
        self.label = Some(label);
        self
    }
}

/// A track as reported by a container reader.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TrackInfo {
    pub id: TrackId,
    pub kind: MediaKind,
    pub label: Option<TrackLabel>,
    pub dimensions: Option<(u32, u32)>,
    pub start: MediaTime,
    pub duration: MediaTime,
}

impl TrackInfo {
    pub fn is_master(&self) -> bool {
        self.label.as_ref().is_some_and(TrackLabel::is_master)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetadataItem {
    pub key: String,
    pub value: String,
}

impl MetadataItem {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

/// How a reader output delivers a track's samples.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReadMode {
    /// Compressed samples, untouched.
    Passthrough,
    /// Decoded interleaved `f32` PCM in the given layout.
    Pcm(PcmFormat),
    /// Decoded pixel buffers.
    Decoded,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WriterStatus {
    Unknown,
    Writing,
    Completed,
    Failed,
    Cancelled,
}

#[derive(Debug, thiserror::Error)]
pub enum WriterError {
    #[error("Create/{0}")]
    Create(String),
    #[error("AddTrack/{0}")]
    AddTrack(String),
    #[error("Metadata/{0}")]
    Metadata(String),
    #[error("StartWriting/{0}")]
    Start(String),
    #[error("Append({track:?})/{reason}")]
    Append { track: TrackId, reason: String },
    #[error("NotReadyForMore({0:?})")]
    NotReadyForMore(TrackId),
    #[error("UnknownTrack({0:?})")]
    UnknownTrack(TrackId),
    #[error("WriterFailed/{0}")]
    Failed(String),
    #[error("Sample/{0}")]
    Sample(#[from] crate::SampleError),
    #[error("Io/{0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, thiserror::Error)]
pub enum ReaderError {
    #[error("Open/{0}")]
    Open(String),
    #[error("NoSuchTrack({0:?})")]
    NoSuchTrack(TrackId),
    #[error("AddOutput/{0}")]
    AddOutput(String),
    #[error("StartReading/{0}")]
    Start(String),
    #[error("Read/{0}")]
    Read(String),
    #[error("Io/{0}")]
    Io(#[from] std::io::Error),
}

/// Multiplexes samples into a container file.
///
/// Tracks, metadata and associations are configured before
/// `start_writing`. Each track independently reports whether it can accept
/// more data; callers must check before appending.
pub trait ContainerWriter: Send {
    type Sample: MediaSample;

    fn add_track(&mut self, config: TrackConfig) -> Result<TrackId, WriterError>;

    fn set_metadata(&mut self, items: &[MetadataItem]) -> Result<(), WriterError>;

    fn associate_timecode(&mut self, video: TrackId, timecode: TrackId)
    -> Result<(), WriterError>;

    fn start_writing(&mut self) -> Result<(), WriterError>;

    fn start_session(&mut self, at: MediaTime);

    fn end_session(&mut self, at: MediaTime);

    fn is_ready_for_more(&self, track: TrackId) -> bool;

    fn append(&mut self, track: TrackId, sample: &Self::Sample) -> Result<(), WriterError>;

    fn append_pcm(
        &mut self,
        track: TrackId,
        pts: MediaTime,
        pcm: &PcmChunk,
    ) -> Result<(), WriterError>;

    fn append_timecode(
        &mut self,
        track: TrackId,
        pts: MediaTime,
        frame_number: u32,
        fps: u32,
    ) -> Result<(), WriterError>;

    fn mark_finished(&mut self, track: TrackId);

    fn finish(&mut self) -> Completion<Result<(), WriterError>>;

    fn cancel(&mut self);

    fn status(&self) -> WriterStatus;
}

/// Pulls samples out of a container file, one output per requested track.
pub trait ContainerReader: Send {
    type Sample: MediaSample;

    fn tracks(&self) -> &[TrackInfo];

    fn duration(&self) -> MediaTime;

    fn metadata(&self) -> &[MetadataItem];

    fn add_output(&mut self, track: TrackId, mode: ReadMode) -> Result<OutputId, ReaderError>;

    fn start_reading(&mut self) -> Result<(), ReaderError>;

    /// `None` once the output's track is exhausted.
    fn next_sample(&mut self, output: OutputId) -> Result<Option<Self::Sample>, ReaderError>;

    fn cancel(&mut self);

    /// Earliest track start, the anchor shared by every rewrite.
    fn session_start(&self) -> MediaTime {
        self.tracks()
            .iter()
            .map(|track| track.start)
            .min()
            .unwrap_or(MediaTime::ZERO)
    }

    fn tracks_of(&self, kind: MediaKind) -> Vec<TrackInfo> {
        self.tracks()
            .iter()
            .filter(|track| track.kind == kind)
            .cloned()
            .collect()
    }
}

/// Opens readers and writers for one platform.
pub trait MediaBackend: Send + Sync + 'static {
    type Sample: MediaSample;
    type Reader: ContainerReader<Sample = Self::Sample>;
    type Writer: ContainerWriter<Sample = Self::Sample>;

    fn open_reader(&self, path: &Path) -> Result<Self::Reader, ReaderError>;

    fn create_writer(&self, path: &Path) -> Result<Self::Writer, WriterError>;
}
