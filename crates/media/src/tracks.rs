//! Track ordering and labeling.
//!
//! The recorder creates audio tracks in [`AUDIO_TRACK_ORDER`] and the
//! post-processing passes label them by position. Both sides go through
//! this module so the convention lives in one place.

use serde::{Deserialize, Serialize};

use crate::TrackRole;

pub const MASTER_LANGUAGE: &str = "mul";
pub const MICROPHONE_LANGUAGE: &str = "qaa";
pub const SYSTEM_AUDIO_LANGUAGE: &str = "qab";
pub const UNDETERMINED_LANGUAGE: &str = "und";

/// Creation order of audio tracks in a recorded file.
pub const AUDIO_TRACK_ORDER: [TrackRole; 2] = [TrackRole::Microphone, TrackRole::SystemAudio];

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackLabel {
    pub language: String,
    pub title: String,
}

impl TrackLabel {
    pub fn new(language: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            language: language.into(),
            title: title.into(),
        }
    }

    pub fn master() -> Self {
        Self::new(MASTER_LANGUAGE, "Master Mix")
    }

    pub fn for_role(role: TrackRole) -> Self {
        match role {
            TrackRole::Screen => Self::new(UNDETERMINED_LANGUAGE, "Screen"),
            TrackRole::Camera => Self::new(UNDETERMINED_LANGUAGE, "Camera"),
            TrackRole::Microphone => Self::new(MICROPHONE_LANGUAGE, "Microphone"),
            TrackRole::SystemAudio => Self::new(SYSTEM_AUDIO_LANGUAGE, "System Audio"),
            TrackRole::Timecode => Self::new(UNDETERMINED_LANGUAGE, "Timecode"),
        }
    }

    pub fn generic_audio(position: usize) -> Self {
        Self::new(UNDETERMINED_LANGUAGE, format!("Audio {}", position + 1))
    }

    pub fn is_master(&self) -> bool {
        self.language == MASTER_LANGUAGE
    }
}

/// Which audio sources a recording captured.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AudioSources {
    pub microphone: bool,
    pub system_audio: bool,
}

impl AudioSources {
    pub fn roles(&self) -> Vec<TrackRole> {
        AUDIO_TRACK_ORDER
            .into_iter()
            .filter(|role| match role {
                TrackRole::Microphone => self.microphone,
                TrackRole::SystemAudio => self.system_audio,
                _ => false,
            })
            .collect()
    }

    pub fn count(&self) -> usize {
        self.roles().len()
    }
}

/// Labels for `track_count` recorded audio tracks. Falls back to ordinal
/// labels when the count does not match the captured sources.
pub fn label_audio_tracks(track_count: usize, sources: AudioSources) -> Vec<TrackLabel> {
    let roles = sources.roles();

    if roles.len() == track_count {
        return roles.into_iter().map(TrackLabel::for_role).collect();
    }

    (0..track_count).map(TrackLabel::generic_audio).collect()
}

/// Titles for video tracks given their pixel dimensions, in track order.
pub fn label_video_tracks(dimensions: &[(u32, u32)]) -> Vec<String> {
    match dimensions {
        [_] => vec!["Screen".to_string()],
        [a, b] => {
            let area = |(w, h): &(u32, u32)| *w as u64 * *h as u64;
            if area(a) >= area(b) {
                vec!["Screen".to_string(), "Camera".to_string()]
            } else {
                vec!["Camera".to_string(), "Screen".to_string()]
            }
        }
        _ => (0..dimensions.len())
            .map(|i| format!("Video {}", i + 1))
            .collect(),
    }
}

/// Where the synthesized master track sits among the audio tracks.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum MasterPosition {
    #[default]
    First,
    Last,
}
