//! Simulated media backend for tests.
//!
//! Containers are JSON documents on disk so that file-level behavior
//! (temp siblings, atomic replace, cleanup after cancellation) can be
//! observed exactly as with a real container. Writers can be scripted to
//! report backpressure or reject samples.

use std::{
    cell::RefCell,
    collections::HashMap,
    fs,
    path::{Path, PathBuf},
    sync::{Arc, Mutex},
    thread::JoinHandle,
    time::Duration,
};

use futures::{FutureExt, future::BoxFuture};
use reel_timestamp::MediaTime;
use serde::{Deserialize, Serialize};

use crate::{
    CaptureError, CaptureEvent, CaptureSender, CaptureSource, Completion, ContainerReader,
    ContainerWriter, FrameStatus, MediaBackend, MediaKind, MediaSample, MetadataItem, OutputId,
    PcmChunk, ReadMode, ReaderError, SampleError, TrackConfig, TrackId, TrackInfo, TrackRole,
    TrackSettings, WriterError, WriterStatus, tracks::TrackLabel,
};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", tag = "type")]
pub enum SimPayload {
    Frame {
        width: u32,
        height: u32,
        marker: u64,
        #[serde(default)]
        status: FrameStatus,
    },
    Pcm {
        chunk: PcmChunk,
    },
    Timecode {
        frame_number: u32,
        fps: u32,
    },
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SimSample {
    pub pts: MediaTime,
    pub duration: Option<MediaTime>,
    pub payload: SimPayload,
}

impl SimSample {
    pub fn frame(pts: MediaTime, (width, height): (u32, u32), marker: u64) -> Self {
        Self {
            pts,
            duration: None,
            payload: SimPayload::Frame {
                width,
                height,
                marker,
                status: FrameStatus::Complete,
            },
        }
    }

    pub fn pcm(pts: MediaTime, chunk: PcmChunk) -> Self {
        Self {
            pts,
            duration: Some(chunk.duration()),
            payload: SimPayload::Pcm { chunk },
        }
    }

    pub fn timecode(pts: MediaTime, frame_number: u32, fps: u32) -> Self {
        Self {
            pts,
            duration: Some(MediaTime::new(1, fps as i32)),
            payload: SimPayload::Timecode { frame_number, fps },
        }
    }

    pub fn with_status(mut self, new_status: FrameStatus) -> Self {
        if let SimPayload::Frame { status, .. } = &mut self.payload {
            *status = new_status;
        }
        self
    }

    pub fn with_duration(mut self, duration: MediaTime) -> Self {
        self.duration = Some(duration);
        self
    }

    pub fn marker(&self) -> Option<u64> {
        match &self.payload {
            SimPayload::Frame { marker, .. } => Some(*marker),
            _ => None,
        }
    }

    pub fn kind(&self) -> MediaKind {
        match &self.payload {
            SimPayload::Frame { .. } => MediaKind::Video,
            SimPayload::Pcm { .. } => MediaKind::Audio,
            SimPayload::Timecode { .. } => MediaKind::Timecode,
        }
    }

    fn end(&self) -> MediaTime {
        self.pts + self.duration.unwrap_or(MediaTime::ZERO)
    }
}

impl MediaSample for SimSample {
    fn pts(&self) -> MediaTime {
        self.pts
    }

    fn duration(&self) -> Option<MediaTime> {
        self.duration
    }

    fn frame_status(&self) -> FrameStatus {
        match &self.payload {
            SimPayload::Frame { status, .. } => *status,
            _ => FrameStatus::Complete,
        }
    }

    fn dimensions(&self) -> Option<(u32, u32)> {
        match &self.payload {
            SimPayload::Frame { width, height, .. } => Some((*width, *height)),
            _ => None,
        }
    }

    fn pcm(&self) -> Option<PcmChunk> {
        match &self.payload {
            SimPayload::Pcm { chunk } => Some(chunk.clone()),
            _ => None,
        }
    }

    fn retimed(&self, pts: MediaTime, duration: Option<MediaTime>) -> Result<Self, SampleError> {
        if !pts.is_valid() {
            return Err(SampleError::Retime(format!("invalid pts {pts:?}")));
        }

        Ok(Self {
            pts,
            duration,
            payload: self.payload.clone(),
        })
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SimTrack {
    pub id: TrackId,
    pub kind: MediaKind,
    pub label: Option<TrackLabel>,
    pub settings: TrackSettings,
    #[serde(default)]
    pub timecode: Option<TrackId>,
    #[serde(default)]
    pub finished: bool,
    pub samples: Vec<SimSample>,
}

impl SimTrack {
    pub fn new(id: u32, kind: MediaKind, samples: Vec<SimSample>) -> Self {
        Self {
            id: TrackId(id),
            kind,
            label: None,
            settings: TrackSettings::Passthrough,
            timecode: None,
            finished: true,
            samples,
        }
    }

    pub fn with_label(mut self, label: TrackLabel) -> Self {
        self.label = Some(label);
        self
    }

    pub fn info(&self) -> TrackInfo {
        let start = self
            .samples
            .iter()
            .map(|s| s.pts)
            .min()
            .unwrap_or(MediaTime::ZERO);
        let end = self.samples.iter().map(SimSample::end).max().unwrap_or(start);

        let dimensions = match &self.settings {
            TrackSettings::Video { width, height, .. } => Some((*width, *height)),
            _ => self.samples.iter().find_map(|s| s.dimensions()),
        };

        TrackInfo {
            id: self.id,
            kind: self.kind,
            label: self.label.clone(),
            dimensions,
            start,
            duration: end - start,
        }
    }

    pub fn markers(&self) -> Vec<u64> {
        self.samples.iter().filter_map(SimSample::marker).collect()
    }

    pub fn pts(&self) -> Vec<MediaTime> {
        self.samples.iter().map(|s| s.pts).collect()
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SimContainer {
    pub tracks: Vec<SimTrack>,
    #[serde(default)]
    pub metadata: Vec<MetadataItem>,
    #[serde(default)]
    pub session_start: Option<MediaTime>,
    #[serde(default)]
    pub session_end: Option<MediaTime>,
}

impl SimContainer {
    pub fn new(tracks: Vec<SimTrack>) -> Self {
        Self {
            tracks,
            ..Default::default()
        }
    }

    pub fn load(path: &Path) -> std::io::Result<Self> {
        let bytes = fs::read(path)?;
        serde_json::from_slice(&bytes).map_err(std::io::Error::other)
    }

    pub fn save(&self, path: &Path) -> std::io::Result<()> {
        let json = serde_json::to_vec_pretty(self).map_err(std::io::Error::other)?;
        fs::write(path, json)
    }

    pub fn tracks_of(&self, kind: MediaKind) -> Vec<&SimTrack> {
        self.tracks.iter().filter(|t| t.kind == kind).collect()
    }

    pub fn track(&self, id: TrackId) -> Option<&SimTrack> {
        self.tracks.iter().find(|t| t.id == id)
    }
}

/// Scripted writer behavior shared by every writer a backend creates.
#[derive(Clone, Debug, Default)]
pub struct SimBehavior {
    /// The first `n` readiness checks on tracks of a kind report busy.
    pub busy_checks: HashMap<MediaKind, usize>,
    /// Appending more than `n` samples of a kind fails the writer.
    pub fail_after_appends: Option<(MediaKind, usize)>,
    pub fail_on_finish: bool,
}

impl SimBehavior {
    pub fn busy(mut self, kind: MediaKind, checks: usize) -> Self {
        self.busy_checks.insert(kind, checks);
        self
    }

    pub fn fail_after(mut self, kind: MediaKind, appends: usize) -> Self {
        self.fail_after_appends = Some((kind, appends));
        self
    }
}

#[derive(Clone, Default)]
pub struct SimBackend {
    behavior: SimBehavior,
    created: Arc<Mutex<Vec<PathBuf>>>,
}

impl SimBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_behavior(behavior: SimBehavior) -> Self {
        Self {
            behavior,
            ..Default::default()
        }
    }

    /// Paths of every writer created so far, in order.
    pub fn created_paths(&self) -> Vec<PathBuf> {
        self.created.lock().map(|p| p.clone()).unwrap_or_default()
    }
}

impl MediaBackend for SimBackend {
    type Sample = SimSample;
    type Reader = SimReader;
    type Writer = SimWriter;

    fn open_reader(&self, path: &Path) -> Result<SimReader, ReaderError> {
        let container =
            SimContainer::load(path).map_err(|e| ReaderError::Open(format!("{path:?}: {e}")))?;
        Ok(SimReader::new(container))
    }

    fn create_writer(&self, path: &Path) -> Result<SimWriter, WriterError> {
        if path.exists() {
            return Err(WriterError::Create(format!("{path:?} already exists")));
        }

        if let Ok(mut created) = self.created.lock() {
            created.push(path.to_path_buf());
        }

        Ok(SimWriter {
            path: path.to_path_buf(),
            container: SimContainer::default(),
            status: WriterStatus::Unknown,
            behavior: self.behavior.clone(),
            checks: RefCell::new(HashMap::new()),
            appends: HashMap::new(),
        })
    }
}

pub struct SimReader {
    container: SimContainer,
    infos: Vec<TrackInfo>,
    outputs: Vec<SimOutput>,
    started: bool,
}

struct SimOutput {
    track: usize,
    mode: ReadMode,
    cursor: usize,
}

impl SimReader {
    pub fn new(container: SimContainer) -> Self {
        let infos = container.tracks.iter().map(SimTrack::info).collect();
        Self {
            container,
            infos,
            outputs: vec![],
            started: false,
        }
    }
}

impl ContainerReader for SimReader {
    type Sample = SimSample;

    fn tracks(&self) -> &[TrackInfo] {
        &self.infos
    }

    fn duration(&self) -> MediaTime {
        let start = self.session_start();
        let end = self
            .infos
            .iter()
            .map(|t| t.start + t.duration)
            .max()
            .unwrap_or(start);
        end - start
    }

    fn metadata(&self) -> &[MetadataItem] {
        &self.container.metadata
    }

    fn add_output(&mut self, track: TrackId, mode: ReadMode) -> Result<OutputId, ReaderError> {
        if self.started {
            return Err(ReaderError::AddOutput("reader already started".into()));
        }

        let index = self
            .container
            .tracks
            .iter()
            .position(|t| t.id == track)
            .ok_or(ReaderError::NoSuchTrack(track))?;

        self.outputs.push(SimOutput {
            track: index,
            mode,
            cursor: 0,
        });
        Ok(OutputId(self.outputs.len() - 1))
    }

    fn start_reading(&mut self) -> Result<(), ReaderError> {
        self.started = true;
        Ok(())
    }

    fn next_sample(&mut self, output: OutputId) -> Result<Option<SimSample>, ReaderError> {
        if !self.started {
            return Err(ReaderError::Read("reader not started".into()));
        }

        let output = self
            .outputs
            .get_mut(output.0)
            .ok_or_else(|| ReaderError::Read(format!("unknown output {output:?}")))?;
        let Some(sample) = self.container.tracks[output.track]
            .samples
            .get(output.cursor)
            .cloned()
        else {
            return Ok(None);
        };
        output.cursor += 1;

        Ok(Some(match (output.mode, sample.payload) {
            (ReadMode::Pcm(format), SimPayload::Pcm { chunk }) => {
                SimSample::pcm(sample.pts, chunk.convert(format))
            }
            (ReadMode::Pcm(_), _) => {
                return Err(ReaderError::Read("PCM requested for a non-audio track".into()));
            }
            (_, payload) => SimSample { payload, ..sample },
        }))
    }

    fn cancel(&mut self) {
        self.started = false;
    }
}

pub struct SimWriter {
    path: PathBuf,
    container: SimContainer,
    status: WriterStatus,
    behavior: SimBehavior,
    checks: RefCell<HashMap<MediaKind, usize>>,
    appends: HashMap<MediaKind, usize>,
}

impl SimWriter {
    fn track_mut(&mut self, track: TrackId) -> Result<&mut SimTrack, WriterError> {
        self.container
            .tracks
            .iter_mut()
            .find(|t| t.id == track)
            .ok_or(WriterError::UnknownTrack(track))
    }

    fn push(&mut self, track: TrackId, sample: SimSample) -> Result<(), WriterError> {
        if self.status != WriterStatus::Writing {
            return Err(WriterError::Append {
                track,
                reason: format!("writer is {:?}", self.status),
            });
        }

        let kind = self.track_mut(track)?.kind;
        let appended = self.appends.entry(kind).or_default();
        *appended += 1;

        if let Some((fail_kind, limit)) = self.behavior.fail_after_appends
            && fail_kind == kind
            && *appended > limit
        {
            self.status = WriterStatus::Failed;
            return Err(WriterError::Append {
                track,
                reason: "simulated encoder rejection".into(),
            });
        }

        self.track_mut(track)?.samples.push(sample);
        Ok(())
    }
}

impl ContainerWriter for SimWriter {
    type Sample = SimSample;

    fn add_track(&mut self, config: TrackConfig) -> Result<TrackId, WriterError> {
        if self.status != WriterStatus::Unknown {
            return Err(WriterError::AddTrack("writer already started".into()));
        }

        let id = TrackId(self.container.tracks.len() as u32 + 1);
        self.container.tracks.push(SimTrack {
            id,
            kind: config.kind,
            label: config.label,
            settings: config.settings,
            timecode: None,
            finished: false,
            samples: vec![],
        });
        Ok(id)
    }

    fn set_metadata(&mut self, items: &[MetadataItem]) -> Result<(), WriterError> {
        self.container.metadata = items.to_vec();
        Ok(())
    }

    fn associate_timecode(
        &mut self,
        video: TrackId,
        timecode: TrackId,
    ) -> Result<(), WriterError> {
        self.track_mut(timecode)?;
        self.track_mut(video)?.timecode = Some(timecode);
        Ok(())
    }

    fn start_writing(&mut self) -> Result<(), WriterError> {
        self.container
            .save(&self.path)
            .map_err(|e| WriterError::Start(e.to_string()))?;
        self.status = WriterStatus::Writing;
        Ok(())
    }

    fn start_session(&mut self, at: MediaTime) {
        self.container.session_start = Some(at);
    }

    fn end_session(&mut self, at: MediaTime) {
        self.container.session_end = Some(at);
    }

    fn is_ready_for_more(&self, track: TrackId) -> bool {
        let Some(kind) = self
            .container
            .tracks
            .iter()
            .find(|t| t.id == track)
            .map(|t| t.kind)
        else {
            return false;
        };

        let busy = self.behavior.busy_checks.get(&kind).copied().unwrap_or(0);
        let mut checks = self.checks.borrow_mut();
        let seen = checks.entry(kind).or_default();
        *seen += 1;

        *seen > busy
    }

    fn append(&mut self, track: TrackId, sample: &SimSample) -> Result<(), WriterError> {
        self.push(track, sample.clone())
    }

    fn append_pcm(
        &mut self,
        track: TrackId,
        pts: MediaTime,
        pcm: &PcmChunk,
    ) -> Result<(), WriterError> {
        self.push(track, SimSample::pcm(pts, pcm.clone()))
    }

    fn append_timecode(
        &mut self,
        track: TrackId,
        pts: MediaTime,
        frame_number: u32,
        fps: u32,
    ) -> Result<(), WriterError> {
        self.push(track, SimSample::timecode(pts, frame_number, fps))
    }

    fn mark_finished(&mut self, track: TrackId) {
        if let Ok(track) = self.track_mut(track) {
            track.finished = true;
        }
    }

    fn finish(&mut self) -> Completion<Result<(), WriterError>> {
        if self.status != WriterStatus::Writing {
            return Completion::ready(Err(WriterError::Failed(format!(
                "finish called while {:?}",
                self.status
            ))));
        }

        if self.behavior.fail_on_finish {
            self.status = WriterStatus::Failed;
            return Completion::ready(Err(WriterError::Failed("simulated finish failure".into())));
        }

        let result = self.container.save(&self.path).map_err(WriterError::Io);
        self.status = match result {
            Ok(()) => WriterStatus::Completed,
            Err(_) => WriterStatus::Failed,
        };
        Completion::ready(result)
    }

    fn cancel(&mut self) {
        self.status = WriterStatus::Cancelled;
        let _ = fs::remove_file(&self.path);
    }

    fn status(&self) -> WriterStatus {
        self.status
    }
}

pub enum ScriptStep {
    Sample(TrackRole, SimSample),
    Fail(CaptureError),
    Sleep(Duration),
}

/// A capture source that replays a fixed script on its own thread.
pub struct ScriptedSource {
    name: String,
    roles: Vec<TrackRole>,
    script: Option<Vec<ScriptStep>>,
    start_error: Option<CaptureError>,
    thread: Option<JoinHandle<()>>,
}

impl ScriptedSource {
    pub fn new(name: impl Into<String>, roles: Vec<TrackRole>, script: Vec<ScriptStep>) -> Self {
        Self {
            name: name.into(),
            roles,
            script: Some(script),
            start_error: None,
            thread: None,
        }
    }

    pub fn failing(name: impl Into<String>, roles: Vec<TrackRole>, error: CaptureError) -> Self {
        Self {
            start_error: Some(error),
            ..Self::new(name, roles, vec![])
        }
    }
}

impl CaptureSource for ScriptedSource {
    type Sample = SimSample;

    fn name(&self) -> &str {
        &self.name
    }

    fn roles(&self) -> &[TrackRole] {
        &self.roles
    }

    fn start(
        &mut self,
        events: CaptureSender<SimSample>,
    ) -> BoxFuture<'_, Result<(), CaptureError>> {
        if let Some(error) = self.start_error.clone() {
            return async move { Err(error) }.boxed();
        }

        let script = self.script.take().unwrap_or_default();
        self.thread = Some(std::thread::spawn(move || {
            for step in script {
                let event = match step {
                    ScriptStep::Sample(role, sample) => CaptureEvent::Sample { role, sample },
                    ScriptStep::Fail(error) => CaptureEvent::Failed(error),
                    ScriptStep::Sleep(duration) => {
                        std::thread::sleep(duration);
                        continue;
                    }
                };
                if events.send(event).is_err() {
                    return;
                }
            }
        }));

        async { Ok(()) }.boxed()
    }

    fn stop(&mut self) -> BoxFuture<'_, Result<(), CaptureError>> {
        let thread = self.thread.take();
        async move {
            if let Some(thread) = thread {
                thread
                    .join()
                    .map_err(|_| CaptureError::Stop("script thread panicked".into()))?;
            }
            Ok(())
        }
        .boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::PcmFormat;

    #[test]
    fn writer_round_trips_through_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.mov");
        let backend = SimBackend::new();

        let mut writer = backend.create_writer(&path).unwrap();
        let video = writer
            .add_track(TrackConfig::passthrough(MediaKind::Video))
            .unwrap();
        let audio = writer
            .add_track(TrackConfig::new(MediaKind::Audio, TrackSettings::audio(false)))
            .unwrap();
        writer.start_writing().unwrap();
        writer.start_session(MediaTime::ZERO);
        writer
            .append(video, &SimSample::frame(MediaTime::new(1, 30), (16, 9), 4))
            .unwrap();
        writer
            .append_pcm(
                audio,
                MediaTime::ZERO,
                &PcmChunk::silence(PcmFormat::new(48_000, 1), 480),
            )
            .unwrap();
        assert!(futures::executor::block_on(writer.finish()).unwrap().is_ok());

        let mut reader = backend.open_reader(&path).unwrap();
        assert_eq!(reader.tracks().len(), 2);
        assert_eq!(reader.tracks()[0].dimensions, Some((16, 9)));

        let pcm = reader
            .add_output(audio, ReadMode::Pcm(PcmFormat::CANONICAL))
            .unwrap();
        reader.start_reading().unwrap();
        let sample = reader.next_sample(pcm).unwrap().unwrap();
        assert_eq!(sample.pcm().unwrap().format, PcmFormat::CANONICAL);
        assert!(reader.next_sample(pcm).unwrap().is_none());
    }

    #[test]
    fn refuses_to_overwrite() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("exists.mov");
        fs::write(&path, b"{}").unwrap();

        assert!(SimBackend::new().create_writer(&path).is_err());
    }

    #[test]
    fn busy_checks_then_ready() {
        let dir = tempfile::tempdir().unwrap();
        let backend = SimBackend::with_behavior(SimBehavior::default().busy(MediaKind::Audio, 2));
        let mut writer = backend.create_writer(&dir.path().join("a.mov")).unwrap();
        let audio = writer
            .add_track(TrackConfig::new(MediaKind::Audio, TrackSettings::audio(true)))
            .unwrap();

        assert!(!writer.is_ready_for_more(audio));
        assert!(!writer.is_ready_for_more(audio));
        assert!(writer.is_ready_for_more(audio));
    }
}
