use std::path::PathBuf;

use reel_media::{MediaBackend, VideoCodec};
use tokio_util::sync::CancellationToken;
use tracing::*;

use crate::{
    MixdownOptions, PostProcessError, RewriteOutcome, add_alignment_track,
    add_master_audio_track_if_needed, rewrite_constant_frame_rate,
};

/// The files one recording produced.
#[derive(Debug, Clone)]
pub struct ProjectFiles {
    pub primary: PathBuf,
    /// Set when the camera was recorded into its own file.
    pub camera: Option<PathBuf>,
}

#[derive(Debug, Clone, Default)]
pub struct FinishOptions {
    pub mixdown: MixdownOptions,
    /// Constant frame rate to rewrite video to. `None` keeps native timing.
    pub fps: Option<u32>,
    pub codec: VideoCodec,
}

#[derive(Debug)]
pub enum StepOutcome {
    Done,
    /// Nothing to do for this file.
    Skipped,
    /// The step failed; its file was left as it was.
    Warning(PostProcessError),
    Cancelled,
}

impl StepOutcome {
    fn from_result(step: &str, result: Result<RewriteOutcome, PostProcessError>) -> Self {
        match result {
            Ok(RewriteOutcome::Rewritten) => Self::Done,
            Ok(RewriteOutcome::Unchanged) => Self::Skipped,
            Err(error) if error.is_cancelled() => {
                info!(step, "Cancelled, original kept");
                Self::Cancelled
            }
            Err(error) => {
                warn!(step, %error, "Post-processing step failed, original kept");
                Self::Warning(error)
            }
        }
    }
}

#[derive(Debug)]
pub struct ProjectReport {
    pub mixdown: StepOutcome,
    pub alignment: StepOutcome,
    pub cfr: Vec<(PathBuf, StepOutcome)>,
}

impl ProjectReport {
    pub fn warnings(&self) -> impl Iterator<Item = &PostProcessError> {
        [&self.mixdown, &self.alignment]
            .into_iter()
            .chain(self.cfr.iter().map(|(_, outcome)| outcome))
            .filter_map(|outcome| match outcome {
                StepOutcome::Warning(error) => Some(error),
                _ => None,
            })
    }

    pub fn was_cancelled(&self) -> bool {
        self.cfr
            .iter()
            .any(|(_, outcome)| matches!(outcome, StepOutcome::Cancelled))
    }
}

/// Runs the post-recording passes in order: master mixdown on the primary
/// file, alignment of the camera file against it, then the optional
/// constant frame rate rewrite of each file.
///
/// Step failures never fail the project; each is reported and the file it
/// touched stays as recorded. Once `cancel` fires, remaining frame rate
/// rewrites are reported as cancelled without being attempted.
pub async fn finish_project<B: MediaBackend>(
    backend: &B,
    project: &ProjectFiles,
    options: &FinishOptions,
    cancel: &CancellationToken,
) -> ProjectReport {
    let mixdown = StepOutcome::from_result(
        "mixdown",
        add_master_audio_track_if_needed(backend, &project.primary, &options.mixdown).await,
    );

    let alignment = match &project.camera {
        Some(camera) => StepOutcome::from_result(
            "alignment",
            add_alignment_track(backend, &project.primary, camera).await,
        ),
        None => StepOutcome::Skipped,
    };

    let mut cfr = vec![];
    if let Some(fps) = options.fps {
        for path in std::iter::once(&project.primary).chain(project.camera.as_ref()) {
            let outcome = if cancel.is_cancelled() {
                StepOutcome::Cancelled
            } else {
                StepOutcome::from_result(
                    "cfr",
                    rewrite_constant_frame_rate(backend, path, fps, options.codec, cancel).await,
                )
            };
            cfr.push((path.clone(), outcome));
        }
    }

    ProjectReport {
        mixdown,
        alignment,
        cfr,
    }
}
