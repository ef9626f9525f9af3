use std::path::Path;

use reel_media::{
    ContainerReader, ContainerWriter, MediaBackend, MediaKind, ReadMode, TrackConfig, TrackInfo,
    tracks::TrackLabel,
};
use tracing::*;

use crate::{
    PostProcessError, RewriteOutcome,
    driver::{CopyTrack, Pipe, Rewrite},
};

/// The track in `primary` other files should be aligned against: its master
/// mix, or its only audio track.
fn reference_track<R: ContainerReader>(primary: &R) -> Option<TrackInfo> {
    let audio = primary.tracks_of(MediaKind::Audio);

    audio
        .iter()
        .find(|track| track.is_master())
        .cloned()
        .or_else(|| match audio.as_slice() {
            [only] => Some(only.clone()),
            _ => None,
        })
}

/// Stream-copies the reference audio of `primary` into `secondary` as a
/// master-labeled track, so both files carry the same alignment signal.
#[tracing::instrument(
    skip_all,
    name = "alignment",
    fields(primary = ?primary, secondary = ?secondary)
)]
pub async fn add_alignment_track<B: MediaBackend>(
    backend: &B,
    primary: &Path,
    secondary: &Path,
) -> Result<RewriteOutcome, PostProcessError> {
    let reference = {
        let reader = backend.open_reader(primary)?;
        reference_track(&reader)
    };
    let Some(reference) = reference else {
        debug!("Primary has no reference audio");
        return Ok(RewriteOutcome::Unchanged);
    };

    {
        let reader = backend.open_reader(secondary)?;
        if reader.tracks().iter().any(TrackInfo::is_master) {
            debug!("Secondary already aligned");
            return Ok(RewriteOutcome::Unchanged);
        }
    }

    let mut rewrite = Rewrite::open(backend, secondary)?;
    let primary_index = rewrite.add_reader(backend, primary)?;
    let tracks = rewrite.source().tracks().to_vec();
    let metadata = rewrite.source().metadata().to_vec();

    let starts = rewrite.readers.iter().map(|reader| reader.session_start());
    let ends = rewrite
        .readers
        .iter()
        .map(|reader| reader.session_start() + reader.duration());
    let session_start = starts.min().unwrap_or_default();
    let end = ends.max().unwrap_or(session_start);

    let mut pipes = vec![];
    let mut videos = vec![];
    let mut timecode = None;

    for kind in [MediaKind::Video, MediaKind::Audio] {
        for track in tracks.iter().filter(|t| t.kind == kind) {
            let mut config = TrackConfig::passthrough(kind);
            config.label = track.label.clone();
            let id = rewrite.writer.add_track(config)?;
            let output = rewrite.readers[0].add_output(track.id, ReadMode::Passthrough)?;
            pipes.push(Pipe::new(
                format!("{kind:?}-{}", track.id.0),
                id,
                CopyTrack { reader: 0, output },
            ));
            if kind == MediaKind::Video {
                videos.push(id);
            }
        }
    }

    let id = rewrite.writer.add_track(
        TrackConfig::passthrough(MediaKind::Audio).with_label(TrackLabel::master()),
    )?;
    let output = rewrite.readers[primary_index].add_output(reference.id, ReadMode::Passthrough)?;
    pipes.push(Pipe::new(
        "reference",
        id,
        CopyTrack {
            reader: primary_index,
            output,
        },
    ));

    for track in tracks.iter().filter(|t| t.kind == MediaKind::Timecode) {
        let id = rewrite
            .writer
            .add_track(TrackConfig::passthrough(MediaKind::Timecode))?;
        let output = rewrite.readers[0].add_output(track.id, ReadMode::Passthrough)?;
        pipes.push(Pipe::new("timecode", id, CopyTrack { reader: 0, output }));
        timecode.get_or_insert(id);
    }

    if let Some(timecode) = timecode {
        for video in &videos {
            rewrite.writer.associate_timecode(*video, timecode)?;
        }
    }
    rewrite.writer.set_metadata(&metadata)?;

    info!(reference = ?reference.label, "Copying alignment track");
    rewrite.start(session_start)?;
    rewrite.run(pipes, end, None).await?;

    Ok(RewriteOutcome::Rewritten)
}
