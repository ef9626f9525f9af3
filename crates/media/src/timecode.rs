use chrono::{DateTime, SecondsFormat, TimeZone, Timelike, Utc};
use uuid::Uuid;

use crate::MetadataItem;

pub const SYNC_ID_KEY: &str = "com.reel.sync.id";
pub const SYNC_START_KEY: &str = "com.reel.sync.start-date";
pub const SYNC_TIMECODE_KEY: &str = "com.reel.sync.timecode";
pub const SYNC_FPS_KEY: &str = "com.reel.sync.fps";

/// Shared sync point for every file produced by one recording.
#[derive(Clone, Debug, PartialEq)]
pub struct SyncContext {
    pub id: Uuid,
    pub start: DateTime<Utc>,
    pub fps: u32,
    pub timecode: String,
    pub frame_number: u32,
}

impl SyncContext {
    pub fn new<Tz: TimeZone>(start: DateTime<Utc>, fps: u32, tz: &Tz) -> Self {
        Self::with_id(Uuid::new_v4(), start, fps, tz)
    }

    pub fn with_id<Tz: TimeZone>(id: Uuid, start: DateTime<Utc>, fps: u32, tz: &Tz) -> Self {
        let fps = fps.max(1);
        let (timecode, frame_number) = derive_timecode(start, fps, tz);

        Self {
            id,
            start,
            fps,
            timecode,
            frame_number,
        }
    }

    pub fn metadata(&self) -> Vec<MetadataItem> {
        vec![
            MetadataItem::new(SYNC_ID_KEY, self.id.to_string()),
            MetadataItem::new(
                SYNC_START_KEY,
                self.start.to_rfc3339_opts(SecondsFormat::Millis, true),
            ),
            MetadataItem::new(SYNC_TIMECODE_KEY, &self.timecode),
            MetadataItem::new(SYNC_FPS_KEY, self.fps.to_string()),
        ]
    }
}

/// Wall-clock `HH:MM:SS:FF` timecode (non-drop) of `start` in `tz`, plus
/// the equivalent count of frames since local midnight.
pub fn derive_timecode<Tz: TimeZone>(start: DateTime<Utc>, fps: u32, tz: &Tz) -> (String, u32) {
    let fps = fps.max(1);
    let local = start.with_timezone(tz);

    let (hours, minutes, seconds) = (local.hour(), local.minute(), local.second());
    // Leap seconds report nanos past 1e9.
    let nanos = local.nanosecond().min(999_999_999) as u64;
    let frames = (nanos * fps as u64 / 1_000_000_000) as u32;

    let timecode = format!("{hours:02}:{minutes:02}:{seconds:02}:{frames:02}");
    let frame_number = (hours * 3600 + minutes * 60 + seconds) * fps + frames;

    (timecode, frame_number)
}
