use std::path::Path;

use reel_media::{
    ContainerReader, ContainerWriter, MediaBackend, MediaKind, MediaSample, MediaTime, OutputId,
    ReadMode, TrackConfig, TrackSettings, VideoCodec,
    tracks::{TrackLabel, UNDETERMINED_LANGUAGE, label_video_tracks},
};
use tokio_util::sync::CancellationToken;
use tracing::*;

use crate::{
    PostProcessError, RewriteOutcome,
    driver::{CopyTrack, Payload, Pipe, PipeSource, Rewrite},
};

/// Rewrites every video track of `path` onto an exact `1 / fps` grid
/// starting at the file's session start, holding the last decoded frame
/// across gaps. Audio and timecode are stream-copied.
///
/// Cancelling `cancel` abandons the rewrite with
/// [`PostProcessError::Cancelled`] and leaves `path` untouched.
#[tracing::instrument(skip_all, name = "cfr", fields(path = ?path, fps = fps))]
pub async fn rewrite_constant_frame_rate<B: MediaBackend>(
    backend: &B,
    path: &Path,
    fps: u32,
    codec: VideoCodec,
    cancel: &CancellationToken,
) -> Result<RewriteOutcome, PostProcessError> {
    if fps == 0 {
        return Err(PostProcessError::InvalidFrameRate(fps));
    }

    let mut rewrite = Rewrite::open(backend, path)?;
    let tracks = rewrite.source().tracks().to_vec();
    let videos = rewrite.source().tracks_of(MediaKind::Video);
    if videos.is_empty() {
        debug!("No video tracks");
        return Ok(RewriteOutcome::Unchanged);
    }

    let session_start = rewrite.source().session_start();
    let end = session_start + rewrite.source().duration();
    let grid = session_start.frames_until(end, fps);
    let metadata = rewrite.source().metadata().to_vec();

    let dimensions = videos
        .iter()
        .map(|track| track.dimensions.unwrap_or_default())
        .collect::<Vec<_>>();
    let titles = label_video_tracks(&dimensions);

    let mut pipes = vec![];
    let mut video_ids = vec![];

    for ((track, (width, height)), title) in videos.iter().zip(dimensions).zip(titles) {
        let settings = TrackSettings::Video {
            codec,
            width,
            height,
            fps: Some(fps),
            real_time: false,
        };
        let config = TrackConfig::new(MediaKind::Video, settings)
            .with_label(TrackLabel::new(UNDETERMINED_LANGUAGE, title));
        let id = rewrite.writer.add_track(config)?;
        let output = rewrite.readers[0].add_output(track.id, ReadMode::Decoded)?;

        pipes.push(Pipe::new(
            format!("video-{}", track.id.0),
            id,
            CfrFeed::new(0, output, session_start, fps, grid),
        ));
        video_ids.push(id);
    }

    for track in tracks.iter().filter(|t| t.kind == MediaKind::Audio) {
        let mut config = TrackConfig::passthrough(MediaKind::Audio);
        config.label = track.label.clone();
        let id = rewrite.writer.add_track(config)?;
        let output = rewrite.readers[0].add_output(track.id, ReadMode::Passthrough)?;
        pipes.push(Pipe::new("audio", id, CopyTrack { reader: 0, output }));
    }

    let mut timecodes = vec![];
    for track in tracks.iter().filter(|t| t.kind == MediaKind::Timecode) {
        let id = rewrite
            .writer
            .add_track(TrackConfig::passthrough(MediaKind::Timecode))?;
        let output = rewrite.readers[0].add_output(track.id, ReadMode::Passthrough)?;
        timecodes.push((id, output));
    }

    if let Some((timecode, _)) = timecodes.first() {
        for video in &video_ids {
            rewrite.writer.associate_timecode(*video, *timecode)?;
        }
    }
    rewrite.writer.set_metadata(&metadata)?;

    info!(tracks = videos.len(), frames = grid, "Resampling video onto constant grid");
    rewrite.start(session_start)?;

    // Timecode tracks hold a handful of samples; copy them up front.
    for (id, output) in timecodes {
        while let Some(sample) = rewrite.readers[0].next_sample(output)? {
            rewrite
                .writer
                .append(id, &sample)
                .map_err(|source| PostProcessError::Append { track: id, source })?;
        }
        rewrite.writer.mark_finished(id);
    }

    rewrite.run(pipes, end, Some(cancel)).await?;

    Ok(RewriteOutcome::Rewritten)
}

/// Emits one frame per grid point, each the latest source frame whose PTS
/// is at or before that point. Grid points ahead of the first frame are
/// skipped.
struct CfrFeed<S> {
    reader: usize,
    output: OutputId,
    start: MediaTime,
    fps: u32,
    count: u64,
    next: u64,
    held: Option<S>,
    lookahead: Option<S>,
    exhausted: bool,
}

impl<S: MediaSample> CfrFeed<S> {
    fn new(reader: usize, output: OutputId, start: MediaTime, fps: u32, count: u64) -> Self {
        Self {
            reader,
            output,
            start,
            fps,
            count,
            next: 0,
            held: None,
            lookahead: None,
            exhausted: false,
        }
    }

    fn advance_to<R>(&mut self, readers: &mut [R], at: MediaTime) -> Result<(), PostProcessError>
    where
        R: ContainerReader<Sample = S>,
    {
        loop {
            if self.lookahead.is_none() && !self.exhausted {
                self.lookahead = readers[self.reader].next_sample(self.output)?;
                self.exhausted = self.lookahead.is_none();
            }

            match &self.lookahead {
                Some(frame) if frame.pts() <= at => self.held = self.lookahead.take(),
                _ => return Ok(()),
            }
        }
    }
}

impl<R: ContainerReader> PipeSource<R> for CfrFeed<R::Sample> {
    fn pull(&mut self, readers: &mut [R]) -> Result<Option<Payload<R::Sample>>, PostProcessError> {
        let frame_duration = MediaTime::new(1, self.fps as i32);

        while self.next < self.count {
            let at = MediaTime::frame_at(self.start, self.next, self.fps);
            self.next += 1;
            self.advance_to(readers, at)?;

            let Some(held) = &self.held else {
                trace!(pts = %at, "Grid point precedes first frame");
                continue;
            };

            return Ok(Some(Payload::Sample(held.retimed(at, Some(frame_duration))?)));
        }

        Ok(None)
    }
}
