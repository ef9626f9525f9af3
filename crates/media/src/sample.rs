use reel_timestamp::MediaTime;
use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum MediaKind {
    Video,
    Audio,
    Timecode,
}

/// What a captured sample represents. Decides which track it is routed to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TrackRole {
    Screen,
    Camera,
    Microphone,
    SystemAudio,
    Timecode,
}

impl TrackRole {
    pub fn kind(self) -> MediaKind {
        match self {
            Self::Screen | Self::Camera => MediaKind::Video,
            Self::Microphone | Self::SystemAudio => MediaKind::Audio,
            Self::Timecode => MediaKind::Timecode,
        }
    }

    pub fn is_video(self) -> bool {
        self.kind() == MediaKind::Video
    }

    pub fn is_audio(self) -> bool {
        self.kind() == MediaKind::Audio
    }
}

/// Capture status attached to screen frames.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum FrameStatus {
    #[default]
    Complete,
    Idle,
    Blank,
    Suspended,
    Started,
    Stopped,
}

impl FrameStatus {
    /// Blank, suspended and stopped frames carry no picture and must never
    /// reach an encoder.
    pub fn is_writable(self) -> bool {
        !matches!(self, Self::Blank | Self::Suspended | Self::Stopped)
    }
}

/// Layout of interleaved `f32` PCM.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PcmFormat {
    pub sample_rate: u32,
    pub channels: u16,
}

impl PcmFormat {
    /// Timeline every audio source is mixed on.
    pub const CANONICAL: Self = Self::new(48_000, 2);

    pub const fn new(sample_rate: u32, channels: u16) -> Self {
        Self {
            sample_rate,
            channels,
        }
    }

    pub fn frame_duration(&self, frames: usize) -> MediaTime {
        MediaTime::new(frames as i64, self.sample_rate as i32)
    }
}

/// A block of interleaved `f32` audio.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PcmChunk {
    pub format: PcmFormat,
    pub samples: Vec<f32>,
}

impl PcmChunk {
    pub fn new(format: PcmFormat, samples: Vec<f32>) -> Self {
        Self { format, samples }
    }

    pub fn silence(format: PcmFormat, frames: usize) -> Self {
        Self::new(format, vec![0.0; frames * format.channels as usize])
    }

    pub fn frames(&self) -> usize {
        if self.format.channels == 0 {
            return 0;
        }

        self.samples.len() / self.format.channels as usize
    }

    pub fn is_empty(&self) -> bool {
        self.frames() == 0
    }

    pub fn duration(&self) -> MediaTime {
        self.format.frame_duration(self.frames())
    }

    /// Remaps channels and sample rate. Rate changes use nearest-sample
    /// picking, which is enough for metering and simulated decoding.
    pub fn convert(&self, target: PcmFormat) -> Self {
        if self.format == target {
            return self.clone();
        }

        let src_channels = self.format.channels.max(1) as usize;
        let dst_channels = target.channels.max(1) as usize;
        let src_frames = self.frames();
        let dst_frames = if self.format.sample_rate == target.sample_rate {
            src_frames
        } else {
            (src_frames as u64 * target.sample_rate as u64 / self.format.sample_rate.max(1) as u64)
                as usize
        };

        let mut samples = Vec::with_capacity(dst_frames * dst_channels);
        for frame in 0..dst_frames {
            let src_frame = if dst_frames == src_frames {
                frame
            } else {
                (frame as u64 * src_frames as u64 / dst_frames.max(1) as u64) as usize
            };
            let base = src_frame * src_channels;

            for channel in 0..dst_channels {
                let value = if src_channels == 1 {
                    self.samples[base]
                } else if dst_channels == 1 {
                    self.samples[base..base + src_channels].iter().sum::<f32>()
                        / src_channels as f32
                } else {
                    self.samples[base + channel.min(src_channels - 1)]
                };
                samples.push(value);
            }
        }

        Self::new(target, samples)
    }
}

/// A timestamped unit of media handed between capture, reader and writer.
///
/// Implementations are cheap handles (retained platform buffers or plain
/// data); `retimed` produces a copy carrying new timing.
pub trait MediaSample: Send + Sized + 'static {
    fn pts(&self) -> MediaTime;

    fn duration(&self) -> Option<MediaTime>;

    fn frame_status(&self) -> FrameStatus {
        FrameStatus::Complete
    }

    fn dimensions(&self) -> Option<(u32, u32)> {
        None
    }

    /// Decoded audio, when the sample holds linear PCM.
    fn pcm(&self) -> Option<PcmChunk> {
        None
    }

    fn retimed(&self, pts: MediaTime, duration: Option<MediaTime>) -> Result<Self, SampleError>;
}

#[derive(Debug, thiserror::Error)]
pub enum SampleError {
    #[error("Retime/{0}")]
    Retime(String),
    #[error("Construct/{0}")]
    Construct(String),
}
