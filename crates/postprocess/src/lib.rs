//! Rewrites of finished recordings.
//!
//! Every pass reads the original file, writes a hidden sibling and only
//! replaces the original once the new file is complete. A failed or
//! cancelled pass leaves the original exactly as it was.

mod alignment;
mod cfr;
mod driver;
mod error;
mod mixdown;
mod project;
mod staging;

pub use alignment::add_alignment_track;
pub use cfr::rewrite_constant_frame_rate;
pub use driver::{CANCEL_POLL_INTERVAL, WRITER_POLL_INTERVAL};
pub use error::{PostProcessError, RewriteOutcome};
pub use mixdown::{MIX_CHUNK_FRAMES, MixdownOptions, add_master_audio_track_if_needed};
pub use project::{FinishOptions, ProjectFiles, ProjectReport, StepOutcome, finish_project};
pub use staging::{StagedOutput, TEMP_PREFIX};
