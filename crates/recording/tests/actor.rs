use std::{path::Path, sync::Arc, time::Duration};

use reel_media::{
    BoxedCaptureSource, CaptureError, MediaKind, MediaTime, PcmChunk, PcmFormat, TrackRole,
    level::MIN_DB,
    sim::{ScriptStep, ScriptedSource, SimBackend, SimContainer, SimSample},
    tracks::AudioSources,
};
use reel_recording::{
    CameraPlacement, CameraPlan, RecordingError, SessionPlan, VideoPlan, spawn_recording_actor,
};

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

fn t(ms: i64) -> MediaTime {
    MediaTime::new(ms, 1000)
}

fn plan(dir: &Path, camera: bool) -> SessionPlan {
    let video = VideoPlan {
        codec: Default::default(),
        fps: None,
        fallback_size: (320, 180),
    };

    SessionPlan {
        primary_path: dir.join("screen.mov"),
        screen: video,
        camera: camera.then(|| CameraPlan {
            video,
            placement: CameraPlacement::File,
            path: dir.join("camera.mov"),
        }),
        audio: AudioSources {
            microphone: true,
            system_audio: false,
        },
        sync: None,
    }
}

fn screen_script(frames: i64) -> Vec<ScriptStep> {
    (0..frames)
        .flat_map(|i| {
            [
                ScriptStep::Sample(
                    TrackRole::Screen,
                    SimSample::frame(t(100 + i * 33), (320, 180), i as u64),
                ),
                ScriptStep::Sleep(Duration::from_millis(1)),
            ]
        })
        .collect()
}

fn mic_script(chunks: i64) -> Vec<ScriptStep> {
    (0..chunks)
        .map(|i| {
            ScriptStep::Sample(
                TrackRole::Microphone,
                SimSample::pcm(
                    t(90 + i * 10),
                    PcmChunk::new(PcmFormat::CANONICAL, vec![0.5; 960]),
                ),
            )
        })
        .collect()
}

#[tokio::test(flavor = "multi_thread")]
async fn records_every_source_into_one_session() {
    test_utils::init_tracing();

    let dir = tempfile::tempdir().unwrap();
    let sources: Vec<BoxedCaptureSource<SimSample>> = vec![
        Box::new(ScriptedSource::new(
            "screen",
            vec![TrackRole::Screen],
            screen_script(10),
        )),
        Box::new(ScriptedSource::new(
            "camera",
            vec![TrackRole::Camera],
            vec![ScriptStep::Sample(
                TrackRole::Camera,
                SimSample::frame(t(95), (640, 480), 100),
            )],
        )),
        Box::new(ScriptedSource::new(
            "microphone",
            vec![TrackRole::Microphone],
            mic_script(30),
        )),
    ];

    let handle = spawn_recording_actor(Arc::new(SimBackend::new()), plan(dir.path(), true), sources)
        .await
        .unwrap();
    let levels = handle.levels();

    tokio::time::sleep(Duration::from_millis(50)).await;
    let completed = handle.stop().await.unwrap();

    assert_eq!(completed.stats.written(TrackRole::Screen), 10);
    assert!(completed.session_start <= t(100));

    let primary = SimContainer::load(&completed.primary).unwrap();
    assert_eq!(
        primary.tracks_of(MediaKind::Video)[0].markers(),
        (0..10).collect::<Vec<_>>()
    );

    let mic = &primary.tracks_of(MediaKind::Audio)[0];
    assert!(!mic.samples.is_empty());
    assert!(mic.samples.iter().all(|s| s.pts >= completed.session_start));
    let pts = mic.pts();
    assert!(pts.windows(2).all(|w| w[0] < w[1]));

    let level = levels.borrow().microphone;
    assert!((level - -6.02).abs() < 0.1, "level was {level}");
    assert_eq!(levels.borrow().system_audio, MIN_DB);
}

#[tokio::test(flavor = "multi_thread")]
async fn stream_error_fails_the_recording() {
    test_utils::init_tracing();

    let dir = tempfile::tempdir().unwrap();
    let mut script = screen_script(3);
    script.push(ScriptStep::Fail(CaptureError::Stream(
        "display went away".into(),
    )));

    let sources: Vec<BoxedCaptureSource<SimSample>> = vec![Box::new(ScriptedSource::new(
        "screen",
        vec![TrackRole::Screen],
        script,
    ))];

    let handle =
        spawn_recording_actor(Arc::new(SimBackend::new()), plan(dir.path(), false), sources)
            .await
            .unwrap();

    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(matches!(handle.stop().await, Err(RecordingError::Stream(_))));
}

#[tokio::test(flavor = "multi_thread")]
async fn failed_start_stops_started_sources() {
    test_utils::init_tracing();

    let dir = tempfile::tempdir().unwrap();
    let sources: Vec<BoxedCaptureSource<SimSample>> = vec![
        Box::new(ScriptedSource::new(
            "screen",
            vec![TrackRole::Screen],
            screen_script(2),
        )),
        Box::new(ScriptedSource::failing(
            "microphone",
            vec![TrackRole::Microphone],
            CaptureError::PermissionDenied("Microphone"),
        )),
    ];

    let result =
        spawn_recording_actor(Arc::new(SimBackend::new()), plan(dir.path(), false), sources).await;

    assert!(matches!(
        result,
        Err(RecordingError::Capture(CaptureError::PermissionDenied(_)))
    ));
    assert!(!dir.path().join("screen.mov").exists());
}

#[tokio::test(flavor = "multi_thread")]
async fn stopping_before_any_frame_reports_no_frames() {
    let dir = tempfile::tempdir().unwrap();
    let sources: Vec<BoxedCaptureSource<SimSample>> = vec![Box::new(ScriptedSource::new(
        "microphone",
        vec![TrackRole::Microphone],
        mic_script(5),
    ))];

    let handle =
        spawn_recording_actor(Arc::new(SimBackend::new()), plan(dir.path(), false), sources)
            .await
            .unwrap();

    assert!(matches!(
        handle.stop().await,
        Err(RecordingError::NoFramesCaptured)
    ));
}
