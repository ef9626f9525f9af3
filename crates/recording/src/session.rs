use std::{
    cell::OnceCell,
    collections::{BTreeMap, HashMap},
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};

use reel_media::{
    CaptureError, ContainerWriter, MediaBackend, MediaKind, MediaSample, MediaTime, TrackConfig,
    TrackId, TrackRole, TrackSettings, WriterError, WriterStatus,
    timecode::SyncContext,
    tracks::{AUDIO_TRACK_ORDER, TrackLabel},
};
use tracing::*;

use crate::{ActorError, BoundedQueue, CameraPlacement, SessionPlan, VideoPlan};

/// Pending audio per source. Oldest entries are dropped past this.
pub const AUDIO_QUEUE_CAP: usize = 2000;
/// Video buffered per track while waiting for the first screen frame.
pub const PRESTART_VIDEO_CAP: usize = 300;

const WRITER_POLL_INTERVAL: Duration = Duration::from_millis(2);
/// How long `finish` waits on a busy writer before giving up on queued audio.
const FINISH_DRAIN_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, thiserror::Error)]
pub enum RecordingError {
    #[error("Capture/{0}")]
    Capture(#[from] CaptureError),
    #[error("Setup/{0}")]
    Setup(WriterError),
    #[error("Append({role:?})/{source}")]
    Append { role: TrackRole, source: WriterError },
    #[error("Stream/{0}")]
    Stream(CaptureError),
    #[error("Finalize/{0}")]
    Finalize(WriterError),
    #[error("No frames were captured")]
    NoFramesCaptured,
    #[error("Actor/{0}")]
    Actor(#[from] ActorError),
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SessionStats {
    pub written: BTreeMap<TrackRole, u64>,
    /// Video frames the writer was not ready for.
    pub skipped_not_ready: u64,
    pub skipped_blank: u64,
    /// Samples before the session start or behind their track's last write.
    pub skipped_stale: u64,
    pub dropped_overflow: u64,
    /// Audio still queued when the writer never caught up during finish.
    pub dropped_backpressure: u64,
}

impl SessionStats {
    pub fn written(&self, role: TrackRole) -> u64 {
        self.written.get(&role).copied().unwrap_or(0)
    }
}

#[derive(Debug, Clone)]
pub struct CompletedRecording {
    pub primary: PathBuf,
    /// Present when the camera was written to its own file.
    pub camera: Option<PathBuf>,
    pub session_start: MediaTime,
    pub last_pts: MediaTime,
    pub stats: SessionStats,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrainStatus {
    /// Every queued audio sample was written.
    Drained,
    /// A writer track reported it was not ready for more.
    Blocked,
    /// Nothing can be written: the session has not started or has failed.
    Stopped,
}

struct Output<W> {
    path: PathBuf,
    writer: W,
    tracks: Vec<TrackId>,
}

#[derive(Clone, Copy)]
struct Route {
    output: usize,
    track: TrackId,
}

/// Live state of one recording.
///
/// Owned by a single task; every capture callback is funneled into it
/// through [`crate::spawn_recording_actor`], so nothing here is locked.
pub struct RecordingSession<B: MediaBackend> {
    backend: Arc<B>,
    plan: SessionPlan,
    outputs: Vec<Output<B::Writer>>,
    routes: HashMap<TrackRole, Route>,
    prestart: BTreeMap<TrackRole, BoundedQueue<(u64, B::Sample)>>,
    audio: BTreeMap<TrackRole, BoundedQueue<B::Sample>>,
    arrivals: u64,
    first_camera_pts: Option<MediaTime>,
    session_start: Option<MediaTime>,
    last_appended: HashMap<TrackRole, MediaTime>,
    last_pts: Option<MediaTime>,
    end_time: Option<MediaTime>,
    failure: OnceCell<RecordingError>,
    stats: SessionStats,
}

impl<B: MediaBackend> RecordingSession<B> {
    pub fn new(backend: Arc<B>, plan: SessionPlan) -> Self {
        Self {
            backend,
            plan,
            outputs: vec![],
            routes: HashMap::new(),
            prestart: BTreeMap::new(),
            audio: BTreeMap::new(),
            arrivals: 0,
            first_camera_pts: None,
            session_start: None,
            last_appended: HashMap::new(),
            last_pts: None,
            end_time: None,
            failure: OnceCell::new(),
            stats: SessionStats::default(),
        }
    }

    pub fn session_start(&self) -> Option<MediaTime> {
        self.session_start
    }

    pub fn failure(&self) -> Option<&RecordingError> {
        self.failure.get()
    }

    pub fn stats(&self) -> &SessionStats {
        &self.stats
    }

    pub fn pending_audio(&self) -> usize {
        self.audio.values().map(BoundedQueue::len).sum()
    }

    pub fn handle_sample(&mut self, role: TrackRole, sample: B::Sample) {
        if self.failure.get().is_some() {
            return;
        }

        if !self.accepts(role) {
            trace!(?role, "Ignoring sample for a track that was not requested");
            return;
        }

        match role.kind() {
            MediaKind::Video => self.handle_video(role, sample),
            MediaKind::Audio => self.handle_audio(role, sample),
            MediaKind::Timecode => {}
        }
    }

    pub fn handle_stream_error(&mut self, error: CaptureError) {
        self.fail(RecordingError::Stream(error));
    }

    /// Writes queued audio until every queue is empty or a track pushes back.
    pub fn drain_audio(&mut self) -> DrainStatus {
        let Some(start) = self.session_start else {
            return DrainStatus::Stopped;
        };

        let mut status = DrainStatus::Drained;
        let roles = self.audio.keys().copied().collect::<Vec<_>>();

        for role in roles {
            let Some(route) = self.routes.get(&role).copied() else {
                continue;
            };

            loop {
                if self.failure.get().is_some() {
                    return DrainStatus::Stopped;
                }

                let Some(queue) = self.audio.get_mut(&role) else {
                    break;
                };
                let Some(front) = queue.front() else {
                    break;
                };

                let pts = front.pts();
                let behind = self.last_appended.get(&role).is_some_and(|last| pts <= *last);
                if pts < start || behind {
                    queue.pop_front();
                    self.stats.skipped_stale += 1;
                    trace!(?role, %pts, "Discarding stale audio");
                    continue;
                }

                let writer = &mut self.outputs[route.output].writer;
                if !writer.is_ready_for_more(route.track) {
                    status = DrainStatus::Blocked;
                    break;
                }

                let Some(sample) = queue.pop_front() else {
                    break;
                };
                if let Err(source) = writer.append(route.track, &sample) {
                    self.fail(RecordingError::Append { role, source });
                    return DrainStatus::Stopped;
                }
                self.record_append(role, &sample);
            }
        }

        status
    }

    /// Flushes what is left, closes every output and surfaces the first
    /// failure recorded during the session.
    pub async fn finish(mut self) -> Result<CompletedRecording, RecordingError> {
        if let Some(error) = self.failure.take() {
            return Err(error);
        }

        let Some(session_start) = self.session_start else {
            warn!("Recording stopped before the first screen frame");
            return Err(RecordingError::NoFramesCaptured);
        };

        let deadline = tokio::time::Instant::now() + FINISH_DRAIN_TIMEOUT;
        while self.drain_audio() == DrainStatus::Blocked {
            if !self.writers_accepting() {
                break;
            }
            if tokio::time::Instant::now() >= deadline {
                self.abandon_pending_audio();
                break;
            }
            tokio::time::sleep(WRITER_POLL_INTERVAL).await;
        }

        if let Some(error) = self.failure.take() {
            return Err(error);
        }

        let end = self.end_time.unwrap_or(session_start);
        let mut completions = Vec::with_capacity(self.outputs.len());
        for output in &mut self.outputs {
            output.writer.end_session(end);
            for track in &output.tracks {
                output.writer.mark_finished(*track);
            }
            completions.push((output.path.clone(), output.writer.finish()));
        }

        let mut finalize_error = None;
        for (path, completion) in completions {
            let result = match completion.await {
                Ok(result) => result,
                Err(_) => Err(WriterError::Failed("completion dropped".into())),
            };

            if let Err(error) = result {
                error!(?path, %error, "Failed to finalize output");
                finalize_error.get_or_insert(RecordingError::Finalize(error));
            }
        }

        for output in &self.outputs {
            if output.writer.status() == WriterStatus::Failed {
                finalize_error.get_or_insert(RecordingError::Finalize(WriterError::Failed(
                    format!("{:?} ended in a failed state", output.path),
                )));
            }
        }

        if let Some(error) = finalize_error {
            return Err(error);
        }

        let stats = self.stats;
        info!(
            written = ?stats.written,
            skipped_not_ready = stats.skipped_not_ready,
            skipped_blank = stats.skipped_blank,
            skipped_stale = stats.skipped_stale,
            dropped_overflow = stats.dropped_overflow,
            dropped_backpressure = stats.dropped_backpressure,
            "Recording finalized"
        );

        Ok(CompletedRecording {
            primary: self.plan.primary_path.clone(),
            camera: self
                .plan
                .camera
                .as_ref()
                .filter(|camera| camera.placement == CameraPlacement::File)
                .map(|camera| camera.path.clone()),
            session_start,
            last_pts: self.last_pts.unwrap_or(session_start),
            stats,
        })
    }

    fn accepts(&self, role: TrackRole) -> bool {
        match role {
            TrackRole::Screen => true,
            TrackRole::Camera => self.plan.camera.is_some(),
            TrackRole::Microphone => self.plan.audio.microphone,
            TrackRole::SystemAudio => self.plan.audio.system_audio,
            TrackRole::Timecode => false,
        }
    }

    fn handle_video(&mut self, role: TrackRole, sample: B::Sample) {
        if !sample.frame_status().is_writable() {
            self.stats.skipped_blank += 1;
            trace!(?role, status = ?sample.frame_status(), "Dropping blank frame");
            return;
        }

        if self.session_start.is_some() {
            self.write_video(role, &sample);
            if role == TrackRole::Screen {
                self.drain_audio();
            }
            return;
        }

        let pts = sample.pts();
        let dimensions = sample.dimensions();
        if role == TrackRole::Camera && self.first_camera_pts.is_none() {
            self.first_camera_pts = Some(pts);
        }

        self.arrivals += 1;
        let evicted = self
            .prestart
            .entry(role)
            .or_insert_with(|| BoundedQueue::new(PRESTART_VIDEO_CAP))
            .push((self.arrivals, sample));
        if evicted.is_some() {
            self.note_overflow(role);
        }

        if role == TrackRole::Screen {
            self.begin(pts, dimensions);
        }
    }

    fn handle_audio(&mut self, role: TrackRole, sample: B::Sample) {
        let evicted = self
            .audio
            .entry(role)
            .or_insert_with(|| BoundedQueue::new(AUDIO_QUEUE_CAP))
            .push(sample);
        if evicted.is_some() {
            self.note_overflow(role);
        }

        if self.session_start.is_some() {
            self.drain_audio();
        }
    }

    fn begin(&mut self, first_screen_pts: MediaTime, screen_dimensions: Option<(u32, u32)>) {
        let start = match self.first_camera_pts {
            Some(camera_pts) if camera_pts < first_screen_pts => camera_pts,
            _ => first_screen_pts,
        };

        if let Err(error) = self.open_outputs(start, screen_dimensions) {
            self.fail(RecordingError::Setup(error));
            return;
        }

        self.session_start = Some(start);
        info!(%start, outputs = self.outputs.len(), "Recording session started");

        let mut pending = std::mem::take(&mut self.prestart)
            .into_iter()
            .flat_map(|(role, mut queue)| {
                queue
                    .drain()
                    .map(|(arrival, sample)| (arrival, role, sample))
                    .collect::<Vec<_>>()
            })
            .collect::<Vec<_>>();
        pending.sort_by_key(|(arrival, ..)| *arrival);

        for (_, role, sample) in pending {
            if self.failure.get().is_some() {
                return;
            }
            self.write_video(role, &sample);
        }

        self.drain_audio();
    }

    fn open_outputs(
        &mut self,
        start: MediaTime,
        screen_dimensions: Option<(u32, u32)>,
    ) -> Result<(), WriterError> {
        let camera_dimensions = self
            .prestart
            .get(&TrackRole::Camera)
            .and_then(|queue| queue.front())
            .and_then(|(_, sample)| sample.dimensions());

        let screen = video_settings(&self.plan.screen, screen_dimensions);
        let mut primary_videos = vec![(TrackRole::Screen, screen)];
        let mut camera_file = None;

        if let Some(camera) = &self.plan.camera {
            let settings = video_settings(&camera.video, camera_dimensions);
            match camera.placement {
                CameraPlacement::Track => primary_videos.push((TrackRole::Camera, settings)),
                CameraPlacement::File => camera_file = Some((camera.path.clone(), settings)),
            }
        }

        let audio = AUDIO_TRACK_ORDER
            .into_iter()
            .filter(|role| self.accepts(*role))
            .collect::<Vec<_>>();

        let mut layouts = vec![(self.plan.primary_path.clone(), primary_videos, audio)];
        if let Some((path, settings)) = camera_file {
            layouts.push((path, vec![(TrackRole::Camera, settings)], vec![]));
        }

        let mut outputs = Vec::with_capacity(layouts.len());
        let mut routes = HashMap::new();

        for (path, videos, audio) in layouts {
            let opened = open_output(
                self.backend.as_ref(),
                &path,
                &videos,
                &audio,
                self.plan.sync.as_ref(),
                start,
            );

            match opened {
                Ok((output, roles)) => {
                    for (role, track) in roles {
                        routes.insert(
                            role,
                            Route {
                                output: outputs.len(),
                                track,
                            },
                        );
                    }
                    outputs.push(output);
                }
                Err(error) => {
                    for mut output in outputs {
                        output.writer.cancel();
                    }
                    return Err(error);
                }
            }
        }

        self.outputs = outputs;
        self.routes = routes;
        Ok(())
    }

    fn write_video(&mut self, role: TrackRole, sample: &B::Sample) {
        let Some(route) = self.routes.get(&role).copied() else {
            return;
        };

        let pts = sample.pts();
        if self.session_start.is_some_and(|start| pts < start) {
            self.stats.skipped_stale += 1;
            trace!(?role, %pts, "Discarding frame from before the session start");
            return;
        }

        if let Some(last) = self.last_appended.get(&role)
            && pts <= *last
        {
            self.stats.skipped_stale += 1;
            warn!(?role, %pts, last = %last, "Skipping non-monotonic frame");
            return;
        }

        let writer = &mut self.outputs[route.output].writer;
        if !writer.is_ready_for_more(route.track) {
            self.stats.skipped_not_ready += 1;
            trace!(?role, %pts, "Writer not ready, skipping frame");
            return;
        }

        if let Err(source) = writer.append(route.track, sample) {
            self.fail(RecordingError::Append { role, source });
            return;
        }

        self.record_append(role, sample);
    }

    fn record_append(&mut self, role: TrackRole, sample: &B::Sample) {
        let pts = sample.pts();
        let end = sample
            .duration()
            .filter(MediaTime::is_valid)
            .map_or(pts, |duration| pts + duration);

        self.last_appended.insert(role, pts);
        self.last_pts = Some(self.last_pts.map_or(pts, |last| last.max(pts)));
        self.end_time = Some(self.end_time.map_or(end, |last| last.max(end)));
        *self.stats.written.entry(role).or_default() += 1;
    }

    fn writers_accepting(&self) -> bool {
        self.outputs
            .iter()
            .all(|output| output.writer.status() == WriterStatus::Writing)
    }

    fn abandon_pending_audio(&mut self) {
        let mut abandoned = 0;
        for (role, queue) in &mut self.audio {
            let count = queue.drain().count() as u64;
            if count > 0 {
                warn!(?role, count, "Writer stayed busy, abandoning queued audio");
            }
            abandoned += count;
        }
        self.stats.dropped_backpressure += abandoned;
    }

    fn note_overflow(&mut self, role: TrackRole) {
        self.stats.dropped_overflow += 1;

        let dropped = self.stats.dropped_overflow;
        if dropped <= 3 || dropped % 100 == 0 {
            warn!(?role, dropped, "Pending queue full, dropped oldest sample");
        }
    }

    fn fail(&mut self, error: RecordingError) {
        if self.failure.get().is_some() {
            debug!(%error, "Ignoring failure after the first");
            return;
        }

        error!(%error, "Recording session failed");
        let _ = self.failure.set(error);
    }
}

fn video_settings(plan: &VideoPlan, dimensions: Option<(u32, u32)>) -> TrackSettings {
    let (width, height) = dimensions.unwrap_or(plan.fallback_size);

    TrackSettings::Video {
        codec: plan.codec,
        width,
        height,
        fps: plan.fps,
        real_time: true,
    }
}

/// Creates a writer whose tracks follow the fixed order the post-processing
/// labels rely on: video, then audio in [`AUDIO_TRACK_ORDER`], then timecode.
fn open_output<B: MediaBackend>(
    backend: &B,
    path: &Path,
    videos: &[(TrackRole, TrackSettings)],
    audio: &[TrackRole],
    sync: Option<&SyncContext>,
    start: MediaTime,
) -> Result<(Output<B::Writer>, Vec<(TrackRole, TrackId)>), WriterError> {
    let mut writer = backend.create_writer(path)?;

    match configure_writer(&mut writer, videos, audio, sync, start) {
        Ok((tracks, roles)) => {
            debug!(?path, tracks = tracks.len(), "Opened output");
            Ok((
                Output {
                    path: path.to_path_buf(),
                    writer,
                    tracks,
                },
                roles,
            ))
        }
        Err(error) => {
            writer.cancel();
            Err(error)
        }
    }
}

fn configure_writer<W: ContainerWriter>(
    writer: &mut W,
    videos: &[(TrackRole, TrackSettings)],
    audio: &[TrackRole],
    sync: Option<&SyncContext>,
    start: MediaTime,
) -> Result<(Vec<TrackId>, Vec<(TrackRole, TrackId)>), WriterError> {
    let mut tracks = vec![];
    let mut roles = vec![];

    for (role, settings) in videos {
        let config = TrackConfig::new(MediaKind::Video, settings.clone())
            .with_label(TrackLabel::for_role(*role));
        let id = writer.add_track(config)?;
        tracks.push(id);
        roles.push((*role, id));
    }

    for role in audio {
        let config = TrackConfig::new(MediaKind::Audio, TrackSettings::audio(true))
            .with_label(TrackLabel::for_role(*role));
        let id = writer.add_track(config)?;
        tracks.push(id);
        roles.push((*role, id));
    }

    let timecode = match sync {
        Some(sync) => {
            let id = writer.add_track(TrackConfig::new(
                MediaKind::Timecode,
                TrackSettings::Timecode,
            ))?;
            tracks.push(id);

            writer.set_metadata(&sync.metadata())?;
            for (role, video) in &roles {
                if role.is_video() {
                    writer.associate_timecode(*video, id)?;
                }
            }
            Some((id, sync))
        }
        None => None,
    };

    writer.start_writing()?;
    writer.start_session(start);

    if let Some((id, sync)) = timecode {
        writer.append_timecode(id, start, sync.frame_number, sync.fps)?;
    }

    Ok((tracks, roles))
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use reel_media::{
        FrameStatus, PcmChunk, PcmFormat,
        sim::{SimBackend, SimBehavior, SimContainer, SimSample},
        timecode::SYNC_TIMECODE_KEY,
        tracks::AudioSources,
    };

    use super::*;
    use crate::CameraPlan;

    fn t(ms: i64) -> MediaTime {
        MediaTime::new(ms, 1000)
    }

    fn frame(ms: i64, marker: u64) -> SimSample {
        SimSample::frame(t(ms), (320, 180), marker)
    }

    fn audio(ms: i64) -> SimSample {
        SimSample::pcm(t(ms), PcmChunk::silence(PcmFormat::CANONICAL, 480))
    }

    fn plan(dir: &Path, camera: Option<CameraPlacement>, audio: AudioSources) -> SessionPlan {
        let video = VideoPlan {
            codec: Default::default(),
            fps: None,
            fallback_size: (64, 36),
        };

        SessionPlan {
            primary_path: dir.join("screen.mov"),
            screen: video,
            camera: camera.map(|placement| CameraPlan {
                video,
                placement,
                path: dir.join("camera.mov"),
            }),
            audio,
            sync: None,
        }
    }

    fn mic_only() -> AudioSources {
        AudioSources {
            microphone: true,
            system_audio: false,
        }
    }

    fn session(backend: SimBackend, plan: SessionPlan) -> RecordingSession<SimBackend> {
        RecordingSession::new(Arc::new(backend), plan)
    }

    #[tokio::test]
    async fn starts_at_earliest_video_and_drops_earlier_samples() {
        let dir = tempfile::tempdir().unwrap();
        let plan = plan(dir.path(), Some(CameraPlacement::Track), mic_only());
        let mut session = session(SimBackend::new(), plan);

        session.handle_sample(TrackRole::Microphone, audio(900));
        session.handle_sample(TrackRole::Camera, frame(1000, 1));
        session.handle_sample(TrackRole::Camera, frame(1010, 2));
        assert_eq!(session.session_start(), None);

        session.handle_sample(TrackRole::Screen, frame(1020, 3));
        assert_eq!(session.session_start(), Some(t(1000)));

        session.handle_sample(TrackRole::Microphone, audio(1030));
        session.handle_sample(TrackRole::Screen, frame(1040, 4));

        let completed = session.finish().await.unwrap();
        assert_eq!(completed.session_start, t(1000));
        assert_eq!(completed.last_pts, t(1040));
        assert_eq!(completed.camera, None);

        let container = SimContainer::load(&completed.primary).unwrap();
        assert_eq!(container.session_start, Some(t(1000)));

        let videos = container.tracks_of(MediaKind::Video);
        assert_eq!(videos.len(), 2);
        assert_eq!(videos[0].markers(), vec![3, 4]);
        assert_eq!(videos[1].markers(), vec![1, 2]);

        let mic = container.tracks_of(MediaKind::Audio);
        assert_eq!(mic.len(), 1);
        assert_eq!(mic[0].pts(), vec![t(1030)]);
        assert_eq!(mic[0].label, Some(TrackLabel::for_role(TrackRole::Microphone)));

        for track in &container.tracks {
            for sample in &track.samples {
                assert!(sample.pts >= t(1000));
            }
        }
    }

    #[tokio::test]
    async fn screen_alone_sets_start_without_camera() {
        let dir = tempfile::tempdir().unwrap();
        let plan = plan(dir.path(), None, AudioSources::default());
        let mut session = session(SimBackend::new(), plan);

        session.handle_sample(TrackRole::Camera, frame(100, 9));
        session.handle_sample(TrackRole::Screen, frame(500, 1));

        let completed = session.finish().await.unwrap();
        assert_eq!(completed.session_start, t(500));

        let container = SimContainer::load(&completed.primary).unwrap();
        assert_eq!(container.tracks.len(), 1);
    }

    #[tokio::test]
    async fn audio_waits_out_backpressure_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let backend =
            SimBackend::with_behavior(SimBehavior::default().busy(MediaKind::Audio, 100));
        let mut session = session(backend, plan(dir.path(), None, mic_only()));

        session.handle_sample(TrackRole::Screen, frame(0, 0));
        for i in 0..40 {
            session.handle_sample(TrackRole::Microphone, audio(i * 10));
        }
        assert_eq!(session.pending_audio(), 40);
        assert_eq!(session.drain_audio(), DrainStatus::Blocked);

        let completed = session.finish().await.unwrap();
        assert_eq!(completed.stats.written(TrackRole::Microphone), 40);
        assert_eq!(completed.stats.dropped_overflow, 0);

        let container = SimContainer::load(&completed.primary).unwrap();
        let mic = &container.tracks_of(MediaKind::Audio)[0];
        assert_eq!(mic.pts(), (0..40).map(|i| t(i * 10)).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn finish_outlasts_a_long_writer_backlog() {
        let dir = tempfile::tempdir().unwrap();
        let backend =
            SimBackend::with_behavior(SimBehavior::default().busy(MediaKind::Audio, 600));
        let mut session = session(backend, plan(dir.path(), None, mic_only()));

        session.handle_sample(TrackRole::Screen, frame(0, 0));
        for i in 0..10 {
            session.handle_sample(TrackRole::Microphone, audio(i * 10));
        }

        let completed = session.finish().await.unwrap();
        assert_eq!(completed.stats.written(TrackRole::Microphone), 10);
        assert_eq!(completed.stats.dropped_backpressure, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn audio_abandoned_at_finish_is_counted() {
        let dir = tempfile::tempdir().unwrap();
        let backend =
            SimBackend::with_behavior(SimBehavior::default().busy(MediaKind::Audio, usize::MAX));
        let mut session = session(backend, plan(dir.path(), None, mic_only()));

        session.handle_sample(TrackRole::Screen, frame(0, 0));
        for i in 0..10 {
            session.handle_sample(TrackRole::Microphone, audio(i * 10));
        }

        let completed = session.finish().await.unwrap();
        assert_eq!(completed.stats.written(TrackRole::Microphone), 0);
        assert_eq!(completed.stats.dropped_backpressure, 10);
        assert_eq!(completed.stats.dropped_overflow, 0);
    }

    #[tokio::test]
    async fn audio_overflow_drops_oldest() {
        let dir = tempfile::tempdir().unwrap();
        let mut session = session(SimBackend::new(), plan(dir.path(), None, mic_only()));

        for i in 0..(AUDIO_QUEUE_CAP as i64 + 100) {
            session.handle_sample(TrackRole::Microphone, audio(1000 + i * 10));
        }
        assert_eq!(session.pending_audio(), AUDIO_QUEUE_CAP);
        assert_eq!(session.stats().dropped_overflow, 100);

        session.handle_sample(TrackRole::Screen, frame(500, 0));
        let completed = session.finish().await.unwrap();

        let container = SimContainer::load(&completed.primary).unwrap();
        let mic = &container.tracks_of(MediaKind::Audio)[0];
        assert_eq!(mic.samples.len(), AUDIO_QUEUE_CAP);
        assert_eq!(mic.samples[0].pts, t(1000 + 100 * 10));
    }

    #[tokio::test]
    async fn blank_frames_never_reach_the_writer() {
        let dir = tempfile::tempdir().unwrap();
        let plan = plan(dir.path(), None, AudioSources::default());
        let mut session = session(SimBackend::new(), plan);

        session.handle_sample(
            TrackRole::Screen,
            frame(0, 1).with_status(FrameStatus::Blank),
        );
        assert_eq!(session.session_start(), None);

        session.handle_sample(TrackRole::Screen, frame(10, 2));
        session.handle_sample(
            TrackRole::Screen,
            frame(20, 3).with_status(FrameStatus::Suspended),
        );
        session.handle_sample(TrackRole::Screen, frame(30, 4).with_status(FrameStatus::Idle));

        let completed = session.finish().await.unwrap();
        assert_eq!(completed.last_pts, t(30));
        assert_eq!(completed.stats.skipped_blank, 2);

        let container = SimContainer::load(&completed.primary).unwrap();
        assert_eq!(container.tracks[0].markers(), vec![2, 4]);
    }

    #[tokio::test]
    async fn non_monotonic_frames_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let plan = plan(dir.path(), None, AudioSources::default());
        let mut session = session(SimBackend::new(), plan);

        session.handle_sample(TrackRole::Screen, frame(10, 1));
        session.handle_sample(TrackRole::Screen, frame(10, 2));
        session.handle_sample(TrackRole::Screen, frame(5, 3));
        session.handle_sample(TrackRole::Screen, frame(20, 4));

        let completed = session.finish().await.unwrap();
        assert_eq!(completed.stats.skipped_stale, 2);

        let container = SimContainer::load(&completed.primary).unwrap();
        assert_eq!(container.tracks[0].markers(), vec![1, 4]);
    }

    #[tokio::test]
    async fn first_append_failure_is_sticky() {
        let dir = tempfile::tempdir().unwrap();
        let backend =
            SimBackend::with_behavior(SimBehavior::default().fail_after(MediaKind::Video, 2));
        let mut session = session(backend, plan(dir.path(), None, mic_only()));

        for i in 0..5 {
            session.handle_sample(TrackRole::Screen, frame(i * 10, i as u64));
        }
        session.handle_stream_error(CaptureError::Stream("late".into()));
        session.handle_sample(TrackRole::Microphone, audio(60));

        assert!(matches!(
            session.failure(),
            Some(RecordingError::Append {
                role: TrackRole::Screen,
                ..
            })
        ));
        assert_eq!(session.stats().written(TrackRole::Screen), 2);
        assert_eq!(session.pending_audio(), 0);

        assert!(matches!(
            session.finish().await,
            Err(RecordingError::Append { .. })
        ));
    }

    #[tokio::test]
    async fn stream_error_is_surfaced_on_finish() {
        let dir = tempfile::tempdir().unwrap();
        let plan = plan(dir.path(), None, AudioSources::default());
        let mut session = session(SimBackend::new(), plan);

        session.handle_sample(TrackRole::Screen, frame(0, 0));
        session.handle_stream_error(CaptureError::Stream("display disconnected".into()));
        session.handle_sample(TrackRole::Screen, frame(10, 1));

        assert_eq!(session.stats().written(TrackRole::Screen), 1);
        assert!(matches!(
            session.finish().await,
            Err(RecordingError::Stream(_))
        ));
    }

    #[tokio::test]
    async fn finish_without_frames_reports_it() {
        let dir = tempfile::tempdir().unwrap();
        let mut session = session(SimBackend::new(), plan(dir.path(), None, mic_only()));
        session.handle_sample(TrackRole::Microphone, audio(0));

        assert!(matches!(
            session.finish().await,
            Err(RecordingError::NoFramesCaptured)
        ));
        assert!(!dir.path().join("screen.mov").exists());
    }

    #[tokio::test]
    async fn finalize_failure_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let backend = SimBackend::with_behavior(SimBehavior {
            fail_on_finish: true,
            ..Default::default()
        });
        let mut session = session(backend, plan(dir.path(), None, AudioSources::default()));
        session.handle_sample(TrackRole::Screen, frame(0, 0));

        assert!(matches!(
            session.finish().await,
            Err(RecordingError::Finalize(_))
        ));
    }

    #[tokio::test]
    async fn camera_file_shares_start_and_sync_metadata() {
        let dir = tempfile::tempdir().unwrap();
        let mut plan = plan(dir.path(), Some(CameraPlacement::File), mic_only());
        let start = "2026-02-06T13:04:09.5Z".parse().unwrap();
        plan.sync = Some(SyncContext::new(start, 60, &Utc));
        let mut session = session(SimBackend::new(), plan);

        session.handle_sample(TrackRole::Screen, SimSample::frame(t(200), (1920, 1080), 1));
        session.handle_sample(TrackRole::Camera, SimSample::frame(t(210), (1280, 720), 2));
        session.handle_sample(TrackRole::Microphone, audio(205));

        let completed = session.finish().await.unwrap();
        let camera_path = completed.camera.unwrap();

        let primary = SimContainer::load(&completed.primary).unwrap();
        let camera = SimContainer::load(&camera_path).unwrap();

        assert_eq!(primary.session_start, Some(t(200)));
        assert_eq!(camera.session_start, Some(t(200)));
        assert_eq!(primary.metadata, camera.metadata);
        assert!(
            primary
                .metadata
                .iter()
                .any(|item| item.key == SYNC_TIMECODE_KEY && item.value == "13:04:09:30")
        );

        let timecode = primary.tracks_of(MediaKind::Timecode)[0];
        assert_eq!(timecode.pts(), vec![t(200)]);
        assert_eq!(primary.tracks_of(MediaKind::Video)[0].timecode, Some(timecode.id));

        assert_eq!(camera.tracks_of(MediaKind::Video)[0].markers(), vec![2]);
        assert!(camera.tracks_of(MediaKind::Audio).is_empty());
        assert_eq!(
            camera.tracks_of(MediaKind::Video)[0].info().dimensions,
            Some((64, 36))
        );
    }
}
