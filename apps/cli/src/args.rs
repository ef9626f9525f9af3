use std::{path::PathBuf, str::FromStr};

use clap::Args;
use reel_media::{VideoCodec, geometry::DeviceSelector, tracks::MasterPosition};
use reel_recording::{AudioRouting, CameraPlacement, RecordingOptions};
use serde::de::DeserializeOwned;

#[derive(Args, Debug, Default)]
pub struct RecordArgs {
    /// Display to capture: index, id or name
    #[arg(long)]
    pub display: Option<DeviceSelector>,
    /// Camera to record: index, unique id or name
    #[arg(long)]
    pub camera: Option<DeviceSelector>,
    /// Where camera video goes: `track` or `file`
    #[arg(long, value_parser = parse_named::<CameraPlacement>)]
    pub camera_placement: Option<CameraPlacement>,
    /// Microphone to record: index, unique id or name
    #[arg(long)]
    pub mic: Option<DeviceSelector>,
    /// Audio sources: `none`, `mic`, `system` or `both`
    #[arg(long, value_parser = parse_named::<AudioRouting>)]
    pub audio: Option<AudioRouting>,
    /// Video codec: `h264` or `hevc`
    #[arg(long, value_parser = parse_named::<VideoCodec>)]
    pub codec: Option<VideoCodec>,
    /// Frame rate: a whole number, or `native` to keep variable timing
    #[arg(long)]
    pub fps: Option<FrameRate>,
    /// Let the master mix clip instead of soft limiting
    #[arg(long)]
    pub no_limiter: bool,
    /// Build a master track even from a single audio source
    #[arg(long)]
    pub force_master: bool,
    /// Where the master track goes: `first` or `last`
    #[arg(long, value_parser = parse_named::<MasterPosition>)]
    pub master_position: Option<MasterPosition>,
    /// Skip the timecode track and sync metadata
    #[arg(long)]
    pub no_timecode: bool,
    /// Stop automatically after this many seconds
    #[arg(long)]
    pub duration: Option<u64>,
    /// Project directory name
    #[arg(long)]
    pub name: Option<String>,
    /// Directory to create the project in
    #[arg(long)]
    pub path: Option<PathBuf>,
    /// Reveal the project once it is finished
    #[arg(long)]
    pub open: bool,
}

impl RecordArgs {
    /// Flags win over config file values.
    pub fn apply(&self, mut options: RecordingOptions) -> RecordingOptions {
        if let Some(display) = &self.display {
            options.display = display.clone();
        }
        if let Some(camera) = &self.camera {
            options.camera = Some(camera.clone());
        }
        if let Some(placement) = self.camera_placement {
            options.camera_placement = placement;
        }
        if let Some(mic) = &self.mic {
            options.microphone = Some(mic.clone());
        }
        if let Some(audio) = self.audio {
            options.audio = audio;
        }
        if let Some(codec) = self.codec {
            options.codec = codec;
        }
        if let Some(fps) = self.fps {
            options.fps = fps.fixed();
        }
        if let Some(position) = self.master_position {
            options.master_position = position;
        }
        if let Some(duration) = self.duration {
            options.duration_secs = Some(duration);
        }
        if let Some(name) = &self.name {
            options.project_name = Some(name.clone());
        }

        options.safe_limiter &= !self.no_limiter;
        options.force_master |= self.force_master;
        options.timecode &= !self.no_timecode;
        options.open_when_done |= self.open;

        // Naming a microphone implies recording it.
        if self.mic.is_some() && self.audio.is_none() {
            options.audio = match options.audio {
                AudioRouting::None | AudioRouting::Microphone => AudioRouting::Microphone,
                AudioRouting::System | AudioRouting::Both => AudioRouting::Both,
            };
        }

        options
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FrameRate {
    Native,
    Fixed(u32),
}

impl FrameRate {
    pub fn fixed(self) -> Option<u32> {
        match self {
            Self::Native => None,
            Self::Fixed(fps) => Some(fps),
        }
    }
}

impl FromStr for FrameRate {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.eq_ignore_ascii_case("native") || s.eq_ignore_ascii_case("variable") {
            return Ok(Self::Native);
        }

        match s.parse::<u32>() {
            Ok(fps) if (1..=240).contains(&fps) => Ok(Self::Fixed(fps)),
            _ => Err(format!("'{s}' is not a frame rate between 1 and 240 or 'native'")),
        }
    }
}

/// Parses a flag value using the same names the config file accepts.
fn parse_named<T: DeserializeOwned>(s: &str) -> Result<T, String> {
    serde_json::from_value(serde_json::Value::String(s.trim().to_lowercase()))
        .map_err(|_| format!("unknown value '{s}'"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_rates() {
        assert_eq!("native".parse(), Ok(FrameRate::Native));
        assert_eq!("60".parse(), Ok(FrameRate::Fixed(60)));
        assert!("0".parse::<FrameRate>().is_err());
        assert!("fast".parse::<FrameRate>().is_err());
    }

    #[test]
    fn named_values_match_config_names() {
        assert_eq!(parse_named::<AudioRouting>("mic"), Ok(AudioRouting::Microphone));
        assert_eq!(parse_named::<AudioRouting>("Both"), Ok(AudioRouting::Both));
        assert_eq!(parse_named::<VideoCodec>("hevc"), Ok(VideoCodec::Hevc));
        assert_eq!(
            parse_named::<CameraPlacement>("track"),
            Ok(CameraPlacement::Track)
        );
        assert!(parse_named::<AudioRouting>("loud").is_err());
    }

    #[test]
    fn flags_override_config() {
        let config = RecordingOptions {
            fps: Some(30),
            audio: AudioRouting::System,
            ..Default::default()
        };

        let args = RecordArgs {
            fps: Some(FrameRate::Native),
            mic: Some(DeviceSelector::Index(1)),
            no_limiter: true,
            ..Default::default()
        };

        let options = args.apply(config);

        assert_eq!(options.fps, None);
        assert_eq!(options.microphone, Some(DeviceSelector::Index(1)));
        assert_eq!(options.audio, AudioRouting::Both);
        assert!(!options.safe_limiter);
        assert!(options.timecode);
    }

    #[test]
    fn unset_flags_keep_config() {
        let config = RecordingOptions {
            fps: Some(24),
            codec: VideoCodec::Hevc,
            open_when_done: true,
            ..Default::default()
        };

        let options = RecordArgs::default().apply(config);

        assert_eq!(options.fps, Some(24));
        assert_eq!(options.codec, VideoCodec::Hevc);
        assert!(options.open_when_done);
    }
}
