use std::{
    fs,
    path::{Path, PathBuf},
    time::Duration,
};

use reel_media::{
    MediaKind, MediaSample, MediaTime, MetadataItem, PcmChunk, PcmFormat, TrackId, TrackRole,
    VideoCodec,
    sim::{SimBackend, SimBehavior, SimContainer, SimSample, SimTrack},
    tracks::{AudioSources, MasterPosition, TrackLabel},
};
use reel_postprocess::{
    FinishOptions, MixdownOptions, PostProcessError, ProjectFiles, RewriteOutcome, StepOutcome,
    TEMP_PREFIX, add_alignment_track, add_master_audio_track_if_needed, finish_project,
    rewrite_constant_frame_rate,
};
use tokio_util::sync::CancellationToken;

mod test_utils {
    use std::sync::Once;

    static INIT: Once = Once::new();

    pub fn init_tracing() {
        INIT.call_once(|| {
            tracing_subscriber::fmt()
                .with_env_filter(
                    tracing_subscriber::EnvFilter::from_default_env()
                        .add_directive(tracing::Level::DEBUG.into()),
                )
                .with_test_writer()
                .try_init()
                .ok();
        });
    }
}

const BOTH: AudioSources = AudioSources {
    microphone: true,
    system_audio: true,
};

fn ms(value: i64) -> MediaTime {
    MediaTime::new(value, 1000)
}

fn video(id: u32, dimensions: (u32, u32), times: &[i64]) -> SimTrack {
    SimTrack::new(
        id,
        MediaKind::Video,
        times
            .iter()
            .enumerate()
            .map(|(i, t)| SimSample::frame(ms(*t), dimensions, i as u64))
            .collect(),
    )
}

/// Constant-valued stereo PCM in 10 ms chunks.
fn pcm(id: u32, value: f32, duration_ms: i64) -> SimTrack {
    SimTrack::new(
        id,
        MediaKind::Audio,
        (0..duration_ms / 10)
            .map(|i| {
                SimSample::pcm(
                    ms(i * 10),
                    PcmChunk::new(PcmFormat::CANONICAL, vec![value; 960]),
                )
            })
            .collect(),
    )
}

fn save(dir: &Path, name: &str, container: &SimContainer) -> PathBuf {
    let path = dir.join(name);
    container.save(&path).unwrap();
    path
}

fn load(path: &Path) -> SimContainer {
    SimContainer::load(path).unwrap()
}

fn leftover_temps(dir: &Path) -> usize {
    fs::read_dir(dir)
        .unwrap()
        .filter_map(Result::ok)
        .filter(|entry| entry.file_name().to_string_lossy().starts_with(TEMP_PREFIX))
        .count()
}

fn pcm_frames(track: &SimTrack) -> Vec<f32> {
    track
        .samples
        .iter()
        .filter_map(MediaSample::pcm)
        .flat_map(|chunk| chunk.samples.chunks(2).map(|f| f[0]).collect::<Vec<_>>())
        .collect()
}

fn mixdown(sources: AudioSources) -> MixdownOptions {
    MixdownOptions {
        sources,
        ..Default::default()
    }
}

#[tokio::test]
async fn multi_track_round_trip() {
    test_utils::init_tracing();

    let dir = tempfile::tempdir().unwrap();
    let backend = SimBackend::new();
    let path = save(
        dir.path(),
        "screen.mov",
        &SimContainer::new(vec![
            video(1, (160, 90), &[0, 100, 200]),
            video(2, (80, 60), &[0, 150]),
            pcm(3, 0.2, 300),
            pcm(4, 0.4, 300),
        ]),
    );

    let outcome = add_master_audio_track_if_needed(&backend, &path, &mixdown(BOTH))
        .await
        .unwrap();
    assert_eq!(outcome, RewriteOutcome::Rewritten);

    let mixed = load(&path);
    assert_eq!(mixed.tracks_of(MediaKind::Video).len(), 2);
    let audio = mixed.tracks_of(MediaKind::Audio);
    assert_eq!(audio.len(), 3);
    assert_eq!(audio[0].label, Some(TrackLabel::master()));
    assert_eq!(audio[1].label, Some(TrackLabel::for_role(TrackRole::Microphone)));
    assert_eq!(audio[2].label, Some(TrackLabel::for_role(TrackRole::SystemAudio)));
    assert!(mixed.tracks.iter().all(|track| track.finished));

    let master = pcm_frames(audio[0]);
    assert_eq!(master.len(), 14_400);
    assert!(master.iter().all(|v| (v - 0.3).abs() < 1e-6));
    assert!(audio[0]
        .samples
        .iter()
        .take(14)
        .all(|s| s.pcm().is_some_and(|chunk| chunk.frames() == 1024)));
    assert_eq!(pcm_frames(audio[1]).len(), 14_400);

    let cancel = CancellationToken::new();
    let outcome = rewrite_constant_frame_rate(&backend, &path, 60, VideoCodec::H264, &cancel)
        .await
        .unwrap();
    assert_eq!(outcome, RewriteOutcome::Rewritten);

    let resampled = load(&path);
    let videos = resampled.tracks_of(MediaKind::Video);
    assert_eq!(videos.len(), 2);
    assert_eq!(resampled.tracks_of(MediaKind::Audio).len(), 3);
    assert_eq!(
        videos
            .iter()
            .map(|t| t.label.as_ref().map(|l| l.title.as_str()))
            .collect::<Vec<_>>(),
        vec![Some("Screen"), Some("Camera")]
    );

    for track in &videos {
        assert_eq!(track.samples.len(), 18);
        for (k, sample) in track.samples.iter().enumerate() {
            assert_eq!(sample.pts, MediaTime::new(k as i64, 60));
        }
    }
    assert_eq!(videos[0].markers()[6], 1);
    assert_eq!(videos[1].markers()[8], 0);
    assert_eq!(videos[1].markers()[9], 1);
    assert_eq!(leftover_temps(dir.path()), 0);
}

#[tokio::test]
async fn cfr_holds_last_frame_on_exact_grid() {
    let dir = tempfile::tempdir().unwrap();
    let backend = SimBackend::new();
    let path = save(
        dir.path(),
        "screen.mov",
        &SimContainer::new(vec![video(1, (64, 36), &[0, 50, 200, 330])]),
    );

    rewrite_constant_frame_rate(&backend, &path, 60, VideoCodec::Hevc, &CancellationToken::new())
        .await
        .unwrap();

    let container = load(&path);
    let track = container.tracks_of(MediaKind::Video)[0];
    // ceil(0.33 * 60)
    assert_eq!(track.samples.len(), 20);
    for (k, sample) in track.samples.iter().enumerate() {
        assert_eq!(sample.pts, MediaTime::new(k as i64, 60));
        assert_eq!(sample.duration, Some(MediaTime::new(1, 60)));
    }
    // t = 0.10 s holds the frame from 0.05 s.
    assert_eq!(track.markers()[6], 1);
    assert_eq!(track.markers()[11], 1);
    assert_eq!(track.markers()[12], 2);
    assert_eq!(track.markers()[19], 2);
    assert!(matches!(
        track.settings,
        reel_media::TrackSettings::Video {
            codec: VideoCodec::Hevc,
            fps: Some(60),
            ..
        }
    ));
}

#[tokio::test]
async fn cfr_rejects_zero_fps() {
    let dir = tempfile::tempdir().unwrap();
    let path = save(
        dir.path(),
        "screen.mov",
        &SimContainer::new(vec![video(1, (64, 36), &[0])]),
    );

    let result = rewrite_constant_frame_rate(
        &SimBackend::new(),
        &path,
        0,
        VideoCodec::H264,
        &CancellationToken::new(),
    )
    .await;
    assert!(matches!(result, Err(PostProcessError::InvalidFrameRate(0))));
}

#[tokio::test]
async fn cancelled_cfr_keeps_original() {
    test_utils::init_tracing();

    let dir = tempfile::tempdir().unwrap();
    let path = save(
        dir.path(),
        "screen.mov",
        &SimContainer::new(vec![video(1, (64, 36), &[0, 40, 80, 120]), pcm(2, 0.1, 120)]),
    );
    let original = fs::read(&path).unwrap();

    // Video never becomes writable, so only cancellation can end the rewrite.
    let backend =
        SimBackend::with_behavior(SimBehavior::default().busy(MediaKind::Video, usize::MAX));
    let cancel = CancellationToken::new();
    tokio::spawn({
        let cancel = cancel.clone();
        async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            cancel.cancel();
        }
    });

    let result = rewrite_constant_frame_rate(&backend, &path, 30, VideoCodec::H264, &cancel).await;

    let error = result.unwrap_err();
    assert!(error.is_cancelled());
    assert_eq!(fs::read(&path).unwrap(), original);
    assert_eq!(leftover_temps(dir.path()), 0);
    assert_eq!(backend.created_paths().len(), 1);
}

#[tokio::test]
async fn failed_mixdown_keeps_original() {
    let dir = tempfile::tempdir().unwrap();
    let path = save(
        dir.path(),
        "screen.mov",
        &SimContainer::new(vec![video(1, (64, 36), &[0]), pcm(2, 0.1, 200), pcm(3, 0.1, 200)]),
    );
    let original = fs::read(&path).unwrap();

    let backend = SimBackend::with_behavior(SimBehavior::default().fail_after(MediaKind::Audio, 3));
    let result = add_master_audio_track_if_needed(&backend, &path, &mixdown(BOTH)).await;

    assert!(matches!(result, Err(PostProcessError::Append { .. })));
    assert_eq!(fs::read(&path).unwrap(), original);
    assert_eq!(leftover_temps(dir.path()), 0);
}

#[tokio::test]
async fn mixdown_leaves_files_that_need_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let backend = SimBackend::new();
    let mic_only = AudioSources {
        microphone: true,
        system_audio: false,
    };

    let single = save(
        dir.path(),
        "single.mov",
        &SimContainer::new(vec![video(1, (64, 36), &[0]), pcm(2, 0.1, 50)]),
    );
    let silent = save(
        dir.path(),
        "silent.mov",
        &SimContainer::new(vec![video(1, (64, 36), &[0])]),
    );
    let mastered = save(
        dir.path(),
        "mastered.mov",
        &SimContainer::new(vec![
            pcm(1, 0.1, 50).with_label(TrackLabel::master()),
            pcm(2, 0.1, 50),
            pcm(3, 0.1, 50),
        ]),
    );

    for path in [&single, &silent, &mastered] {
        let before = fs::read(path).unwrap();
        let outcome = add_master_audio_track_if_needed(&backend, path, &mixdown(mic_only))
            .await
            .unwrap();
        assert_eq!(outcome, RewriteOutcome::Unchanged, "{path:?}");
        assert_eq!(fs::read(path).unwrap(), before);
    }
    assert!(backend.created_paths().is_empty());

    let forced = MixdownOptions {
        force: true,
        ..mixdown(mic_only)
    };
    let outcome = add_master_audio_track_if_needed(&backend, &single, &forced)
        .await
        .unwrap();
    assert_eq!(outcome, RewriteOutcome::Rewritten);

    let container = load(&single);
    let audio = container.tracks_of(MediaKind::Audio);
    assert_eq!(audio.len(), 2);
    assert!(audio[0].label.as_ref().is_some_and(TrackLabel::is_master));
    assert_eq!(audio[1].label, Some(TrackLabel::for_role(TrackRole::Microphone)));
}

#[tokio::test]
async fn master_position_and_gains() {
    let dir = tempfile::tempdir().unwrap();
    let path = save(
        dir.path(),
        "screen.mov",
        &SimContainer::new(vec![pcm(1, 0.2, 100), pcm(2, 0.4, 100)]),
    );

    let options = MixdownOptions {
        sources: BOTH,
        microphone_gain: 0.5,
        position: MasterPosition::Last,
        ..Default::default()
    };
    add_master_audio_track_if_needed(&SimBackend::new(), &path, &options)
        .await
        .unwrap();

    let container = load(&path);
    let audio = container.tracks_of(MediaKind::Audio);
    assert_eq!(audio.len(), 3);
    assert!(audio[2].label.as_ref().is_some_and(TrackLabel::is_master));
    assert!(!audio[0].label.as_ref().is_some_and(TrackLabel::is_master));

    // (0.2 * 0.5 + 0.4) / 2
    let master = pcm_frames(audio[2]);
    assert_eq!(master.len(), 4800);
    assert!(master.iter().all(|v| (v - 0.25).abs() < 1e-6));
    // Originals are not scaled.
    assert!(pcm_frames(audio[0]).iter().all(|v| (v - 0.2).abs() < 1e-6));
}

#[tokio::test]
async fn timecode_and_metadata_survive_rewrites() {
    let dir = tempfile::tempdir().unwrap();
    let backend = SimBackend::new();

    let mut screen = video(1, (64, 36), &[0, 40, 80]);
    screen.timecode = Some(TrackId(4));
    let timecode = SimTrack::new(
        4,
        MediaKind::Timecode,
        vec![SimSample::timecode(MediaTime::ZERO, 2_822_670, 60)],
    );
    let mut container =
        SimContainer::new(vec![screen, pcm(2, 0.1, 100), pcm(3, 0.1, 100), timecode]);
    container.metadata = vec![MetadataItem::new("com.reel.sync.timecode", "13:04:09:30")];
    let path = save(dir.path(), "screen.mov", &container);

    add_master_audio_track_if_needed(&backend, &path, &mixdown(BOTH))
        .await
        .unwrap();
    rewrite_constant_frame_rate(&backend, &path, 25, VideoCodec::H264, &CancellationToken::new())
        .await
        .unwrap();

    let rewritten = load(&path);
    assert_eq!(rewritten.metadata, container.metadata);

    let timecodes = rewritten.tracks_of(MediaKind::Timecode);
    assert_eq!(timecodes.len(), 1);
    assert_eq!(
        timecodes[0].samples,
        vec![SimSample::timecode(MediaTime::ZERO, 2_822_670, 60)]
    );
    let video = rewritten.tracks_of(MediaKind::Video)[0];
    assert_eq!(video.timecode, Some(timecodes[0].id));
}

#[tokio::test]
async fn alignment_copies_reference_into_camera_file() {
    let dir = tempfile::tempdir().unwrap();
    let backend = SimBackend::new();

    let primary = save(
        dir.path(),
        "screen.mov",
        &SimContainer::new(vec![
            video(1, (160, 90), &[0, 50]),
            pcm(2, 0.3, 100).with_label(TrackLabel::master()),
            pcm(3, 0.2, 100),
            pcm(4, 0.4, 100),
        ]),
    );
    let camera = save(
        dir.path(),
        "camera.mov",
        &SimContainer::new(vec![video(1, (80, 60), &[20, 60])]),
    );

    let outcome = add_alignment_track(&backend, &primary, &camera).await.unwrap();
    assert_eq!(outcome, RewriteOutcome::Rewritten);

    let reference = load(&primary);
    let aligned = load(&camera);
    assert_eq!(aligned.tracks_of(MediaKind::Video).len(), 1);
    assert_eq!(aligned.tracks_of(MediaKind::Video)[0].markers(), vec![0, 1]);

    let audio = aligned.tracks_of(MediaKind::Audio);
    assert_eq!(audio.len(), 1);
    assert_eq!(audio[0].label, Some(TrackLabel::master()));
    assert_eq!(audio[0].samples, reference.tracks[1].samples);
    assert_eq!(aligned.session_start, Some(MediaTime::ZERO));

    // A second pass finds the master already there.
    let before = fs::read(&camera).unwrap();
    let outcome = add_alignment_track(&backend, &primary, &camera).await.unwrap();
    assert_eq!(outcome, RewriteOutcome::Unchanged);
    assert_eq!(fs::read(&camera).unwrap(), before);
}

#[tokio::test]
async fn alignment_needs_a_reference() {
    let dir = tempfile::tempdir().unwrap();
    let primary = save(
        dir.path(),
        "screen.mov",
        &SimContainer::new(vec![pcm(1, 0.2, 50), pcm(2, 0.4, 50)]),
    );
    let camera = save(
        dir.path(),
        "camera.mov",
        &SimContainer::new(vec![video(1, (80, 60), &[0])]),
    );

    let outcome = add_alignment_track(&SimBackend::new(), &primary, &camera)
        .await
        .unwrap();
    assert_eq!(outcome, RewriteOutcome::Unchanged);
}

fn project(dir: &Path) -> ProjectFiles {
    ProjectFiles {
        primary: save(
            dir,
            "screen.mov",
            &SimContainer::new(vec![
                video(1, (160, 90), &[0, 45, 90]),
                pcm(2, 0.2, 100),
                pcm(3, 0.4, 100),
            ]),
        ),
        camera: Some(save(
            dir,
            "camera.mov",
            &SimContainer::new(vec![video(1, (80, 60), &[0, 70])]),
        )),
    }
}

#[tokio::test]
async fn finish_project_runs_every_step() {
    test_utils::init_tracing();

    let dir = tempfile::tempdir().unwrap();
    let files = project(dir.path());
    let options = FinishOptions {
        mixdown: mixdown(BOTH),
        fps: Some(30),
        codec: VideoCodec::H264,
    };

    let report =
        finish_project(&SimBackend::new(), &files, &options, &CancellationToken::new()).await;

    assert!(matches!(report.mixdown, StepOutcome::Done));
    assert!(matches!(report.alignment, StepOutcome::Done));
    assert_eq!(report.cfr.len(), 2);
    assert!(report.cfr.iter().all(|(_, o)| matches!(o, StepOutcome::Done)));
    assert_eq!(report.warnings().count(), 0);
    assert!(!report.was_cancelled());

    let camera = load(files.camera.as_ref().unwrap());
    let audio = camera.tracks_of(MediaKind::Audio);
    assert_eq!(audio.len(), 1);
    assert!(audio[0].label.as_ref().is_some_and(TrackLabel::is_master));
    assert!(camera.tracks_of(MediaKind::Video)[0]
        .pts()
        .iter()
        .enumerate()
        .all(|(k, pts)| *pts == MediaTime::new(k as i64, 30)));
}

#[tokio::test]
async fn cancelled_project_skips_frame_rate_pass() {
    let dir = tempfile::tempdir().unwrap();
    let files = project(dir.path());
    let options = FinishOptions {
        mixdown: mixdown(BOTH),
        fps: Some(30),
        codec: VideoCodec::H264,
    };
    let cancel = CancellationToken::new();
    cancel.cancel();

    let report = finish_project(&SimBackend::new(), &files, &options, &cancel).await;

    assert!(matches!(report.mixdown, StepOutcome::Done));
    assert!(matches!(report.alignment, StepOutcome::Done));
    assert!(report.was_cancelled());
    assert!(report.cfr.iter().all(|(_, o)| matches!(o, StepOutcome::Cancelled)));

    let primary = load(&files.primary);
    assert_eq!(
        primary.tracks_of(MediaKind::Video)[0].pts(),
        vec![ms(0), ms(45), ms(90)]
    );
}

#[tokio::test]
async fn project_without_camera_or_fps() {
    let dir = tempfile::tempdir().unwrap();
    let files = ProjectFiles {
        camera: None,
        ..project(dir.path())
    };

    let report = finish_project(
        &SimBackend::new(),
        &files,
        &FinishOptions::default(),
        &CancellationToken::new(),
    )
    .await;

    // Default sources are empty, so the two tracks get generic labels.
    assert!(matches!(report.mixdown, StepOutcome::Done));
    assert!(matches!(report.alignment, StepOutcome::Skipped));
    assert!(report.cfr.is_empty());

    let audio = load(&files.primary).tracks_of(MediaKind::Audio).len();
    assert_eq!(audio, 3);
}
