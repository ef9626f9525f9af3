use std::{path::PathBuf, sync::Arc, time::Duration};

use anyhow::{Context, bail};
use chrono::{Local, Utc};
use indicatif::ProgressBar;
use reel_enc_avfoundation::{
    AvBackend, AvSample, CameraSource, MacDeviceCatalog, MicrophoneSource, ScreenSource,
    ensure_camera_access, ensure_microphone_access, has_screen_permission,
    request_screen_permission,
};
use reel_media::{
    BoxedCaptureSource, CaptureError,
    geometry::{resolve_camera, resolve_display, resolve_microphone},
    timecode::SyncContext,
    tracks::AudioSources,
};
use reel_postprocess::{
    FinishOptions, MixdownOptions, ProjectFiles, ProjectReport, finish_project,
};
use reel_recording::{
    CameraPlan, RecordingOptions, SessionPlan, VideoPlan, spawn_recording_actor,
};
use tokio_util::sync::CancellationToken;
use tracing::*;

use crate::{
    args::RecordArgs,
    config,
    meter::LevelMeter,
    project::{self, CAMERA_FILE, SCREEN_FILE},
    stop::{shutdown_signal, wait_for_stop},
};

/// Capture rate when the recording keeps native timing.
const NATIVE_CAPTURE_FPS: u32 = 60;
const CAMERA_FALLBACK_SIZE: (u32, u32) = (1280, 720);

pub async fn run(args: RecordArgs, config_path: Option<PathBuf>) -> anyhow::Result<()> {
    let options = args.apply(config::load(config_path.as_deref())?);
    debug!(?options, "Recording options");

    if !has_screen_permission() && !request_screen_permission() {
        bail!(
            "Screen recording access is required. Allow it in System Settings > Privacy & Security, then run reel again."
        );
    }

    let catalog = MacDeviceCatalog;

    let display = resolve_display(&catalog, &options.display).context("Selecting display")?;
    info!(
        display = %display.display.name,
        width = display.geometry.pixel_width,
        height = display.geometry.pixel_height,
        "Selected display"
    );

    let mut audio = options.audio.sources();

    let camera = match &options.camera {
        Some(selector) => {
            let device = resolve_camera(&catalog, selector).context("Selecting camera")?;
            access_granted(ensure_camera_access, "Camera")
                .await?
                .then_some(device)
        }
        None => None,
    };

    let microphone = if audio.microphone {
        let selector = options.microphone.clone().unwrap_or_default();
        let device = resolve_microphone(&catalog, &selector).context("Selecting microphone")?;
        if access_granted(ensure_microphone_access, "Microphone").await? {
            Some(device)
        } else {
            audio.microphone = false;
            None
        }
    } else {
        None
    };

    let parent = match &args.path {
        Some(path) => path.clone(),
        None => std::env::current_dir().context("Resolving current directory")?,
    };
    let project_dir = project::create_dir(&parent, options.project_name.as_deref(), &Local::now())
        .with_context(|| format!("Creating project in {parent:?}"))?;

    let capture_fps = options.fps.unwrap_or(NATIVE_CAPTURE_FPS);
    let screen = VideoPlan {
        codec: options.codec,
        fps: options.fps,
        fallback_size: (display.geometry.pixel_width, display.geometry.pixel_height),
    };

    let plan = SessionPlan {
        primary_path: project_dir.join(SCREEN_FILE),
        screen,
        camera: camera.as_ref().map(|_| CameraPlan {
            video: VideoPlan {
                fallback_size: CAMERA_FALLBACK_SIZE,
                ..screen
            },
            placement: options.camera_placement,
            path: project_dir.join(CAMERA_FILE),
        }),
        audio,
        sync: options
            .timecode
            .then(|| SyncContext::new(Utc::now(), capture_fps, &Local)),
    };

    let mut sources: Vec<BoxedCaptureSource<AvSample>> = vec![Box::new(ScreenSource::new(
        &display,
        capture_fps,
        audio.system_audio,
    ))];
    if let Some(camera) = camera {
        sources.push(Box::new(CameraSource::new(camera)));
    }
    if let Some(microphone) = microphone {
        sources.push(Box::new(MicrophoneSource::new(microphone)));
    }

    let backend = Arc::new(AvBackend);
    let actor = spawn_recording_actor(backend.clone(), plan, sources)
        .await
        .context("Starting recording")?;

    let meter = LevelMeter::start(actor.levels(), audio);
    meter.println(match options.duration_secs {
        Some(secs) => format!("Recording for {secs}s. Press Enter or Ctrl-C to stop early."),
        None => "Recording. Press Enter or Ctrl-C to stop.".to_string(),
    });

    let reason = wait_for_stop(options.duration_secs.map(Duration::from_secs)).await;
    meter.finish();
    info!(?reason, "Stopping recording");

    let recording = actor.stop().await.context("Recording failed")?;
    info!(
        primary = ?recording.primary,
        camera = ?recording.camera,
        stats = ?recording.stats,
        "Recording finished"
    );

    let files = ProjectFiles {
        primary: recording.primary.clone(),
        camera: recording.camera.clone(),
    };
    let report = post_process(backend.as_ref(), &files, audio, &options).await;
    for line in project::report_lines(&report) {
        eprintln!("{line}");
    }

    println!("{}", project_dir.display());

    let opened = options.open_when_done.then(|| open::that(&project_dir));
    if let Some(Err(error)) = opened {
        warn!(%error, "Could not open project");
    }

    Ok(())
}

/// A denied camera or microphone only disables that source.
async fn access_granted(
    check: fn() -> Result<(), CaptureError>,
    what: &str,
) -> anyhow::Result<bool> {
    match tokio::task::spawn_blocking(check).await? {
        Ok(()) => Ok(true),
        Err(CaptureError::PermissionDenied(_)) => {
            warn!("{what} access was denied, recording without it");
            eprintln!("warning: {what} access was denied, recording without it");
            Ok(false)
        }
        Err(error) => Err(error).with_context(|| format!("Checking {what} access")),
    }
}

async fn post_process(
    backend: &AvBackend,
    files: &ProjectFiles,
    audio: AudioSources,
    options: &RecordingOptions,
) -> ProjectReport {
    let cancel = CancellationToken::new();
    let spinner = ProgressBar::new_spinner();
    spinner.set_message("Finishing recording (Ctrl-C skips frame rate conversion)");
    spinner.enable_steady_tick(Duration::from_millis(120));

    let watcher = tokio::spawn({
        let cancel = cancel.clone();
        let spinner = spinner.clone();
        async move {
            shutdown_signal().await;
            spinner.set_message("Cancelling");
            cancel.cancel();
        }
    });

    let finish = FinishOptions {
        mixdown: MixdownOptions {
            sources: audio,
            microphone_gain: options.microphone_gain,
            system_audio_gain: options.system_audio_gain,
            force: options.force_master,
            position: options.master_position,
            limiter: options.safe_limiter,
        },
        fps: options.fps,
        codec: options.codec,
    };

    let report = finish_project(backend, files, &finish, &cancel).await;

    watcher.abort();
    spinner.finish_and_clear();

    report
}
