use std::path::PathBuf;

use reel_media::{
    VideoCodec,
    geometry::DeviceSelector,
    timecode::SyncContext,
    tracks::{AudioSources, MasterPosition},
};
use serde::{Deserialize, Serialize};

/// User-facing recording configuration. Loaded from the config file and
/// overridden by command line flags.
#[derive(Serialize, Deserialize, Clone, Debug)]
#[serde(rename_all = "camelCase", default)]
pub struct RecordingOptions {
    pub display: DeviceSelector,
    pub camera: Option<DeviceSelector>,
    pub camera_placement: CameraPlacement,
    pub microphone: Option<DeviceSelector>,
    pub audio: AudioRouting,
    pub codec: VideoCodec,
    /// `None` keeps the native variable frame rate.
    pub fps: Option<u32>,
    pub safe_limiter: bool,
    pub microphone_gain: f32,
    pub system_audio_gain: f32,
    pub master_position: MasterPosition,
    pub force_master: bool,
    pub timecode: bool,
    pub duration_secs: Option<u64>,
    pub project_name: Option<String>,
    pub open_when_done: bool,
}

impl Default for RecordingOptions {
    fn default() -> Self {
        Self {
            display: DeviceSelector::Default,
            camera: None,
            camera_placement: CameraPlacement::File,
            microphone: None,
            audio: AudioRouting::None,
            codec: VideoCodec::H264,
            fps: None,
            safe_limiter: true,
            microphone_gain: 1.0,
            system_audio_gain: 1.0,
            master_position: MasterPosition::First,
            force_master: false,
            timecode: true,
            duration_secs: None,
            project_name: None,
            open_when_done: false,
        }
    }
}

/// Where camera frames are written.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum CameraPlacement {
    /// An extra video track inside the screen recording.
    Track,
    /// A separate file sharing the screen recording's session start.
    #[default]
    File,
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum AudioRouting {
    #[default]
    None,
    #[serde(rename = "mic", alias = "microphone")]
    Microphone,
    System,
    Both,
}

impl AudioRouting {
    pub fn sources(self) -> AudioSources {
        AudioSources {
            microphone: matches!(self, Self::Microphone | Self::Both),
            system_audio: matches!(self, Self::System | Self::Both),
        }
    }
}

/// Everything the session needs to lay out its output files.
#[derive(Clone, Debug)]
pub struct SessionPlan {
    pub primary_path: PathBuf,
    pub screen: VideoPlan,
    pub camera: Option<CameraPlan>,
    pub audio: AudioSources,
    pub sync: Option<SyncContext>,
}

#[derive(Clone, Copy, Debug)]
pub struct VideoPlan {
    pub codec: VideoCodec,
    pub fps: Option<u32>,
    /// Used when the first frame does not report its dimensions.
    pub fallback_size: (u32, u32),
}

#[derive(Clone, Debug)]
pub struct CameraPlan {
    pub video: VideoPlan,
    pub placement: CameraPlacement,
    pub path: PathBuf,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_config_uses_defaults() {
        let options: RecordingOptions =
            serde_json::from_str(r#"{ "audio": "both", "fps": 60, "cameraPlacement": "track" }"#)
                .unwrap();

        assert_eq!(options.audio, AudioRouting::Both);
        assert_eq!(options.fps, Some(60));
        assert_eq!(options.camera_placement, CameraPlacement::Track);
        assert!(options.safe_limiter);
        assert_eq!(options.display, DeviceSelector::Default);
    }

    #[test]
    fn routing_maps_to_sources() {
        assert_eq!(AudioRouting::None.sources().count(), 0);
        assert!(AudioRouting::Microphone.sources().microphone);
        assert!(!AudioRouting::Microphone.sources().system_audio);
        assert_eq!(AudioRouting::Both.sources().count(), 2);
    }
}
