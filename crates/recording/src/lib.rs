pub mod actor;
mod options;
mod queue;
mod session;

pub use actor::{ActorError, ActorHandle, AudioLevels, spawn_recording_actor};
pub use options::*;
pub use queue::BoundedQueue;
pub use session::{
    AUDIO_QUEUE_CAP, CompletedRecording, DrainStatus, PRESTART_VIDEO_CAP, RecordingError,
    RecordingSession, SessionStats,
};
