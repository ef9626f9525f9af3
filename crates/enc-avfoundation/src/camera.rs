use cidre::{
    av::{
        self,
        capture::{VideoDataOutputSampleBufDelegate, VideoDataOutputSampleBufDelegateImpl},
    },
    cm, define_obj_type, dispatch, objc,
    objc::Obj,
};
use futures::{FutureExt, future::BoxFuture};
use reel_media::{
    CaptureError, CaptureEvent, CaptureSender, CaptureSource, TrackRole, geometry::DeviceInfo,
};
use tracing::*;

use crate::{
    AvSample,
    capture_device::{DeviceSession, ensure_access, run_blocking},
    devices::find_device,
};

define_obj_type!(
    pub CameraDelegate + VideoDataOutputSampleBufDelegateImpl,
    CameraDelegateInner,
    REEL_CAMERA_DELEGATE
);

pub struct CameraDelegateInner {
    events: CaptureSender<AvSample>,
}

impl VideoDataOutputSampleBufDelegate for CameraDelegate {}

#[objc::add_methods]
impl VideoDataOutputSampleBufDelegateImpl for CameraDelegate {
    extern "C" fn impl_capture_output_did_output_sample_buf_from_connection(
        &mut self,
        _cmd: Option<&objc::Sel>,
        _output: &av::CaptureOutput,
        sample_buf: &cm::SampleBuf,
        _connection: &av::CaptureConnection,
    ) {
        if sample_buf.image_buf().is_none() {
            return;
        }

        let _ = self.inner_mut().events.send(CaptureEvent::Sample {
            role: TrackRole::Camera,
            sample: AvSample::new(sample_buf.retained()),
        });
    }
}

type CameraSession = DeviceSession<av::capture::VideoDataOutput, CameraDelegate>;

pub struct CameraSource {
    name: String,
    device: DeviceInfo,
    running: Option<CameraSession>,
}

impl CameraSource {
    pub fn new(device: DeviceInfo) -> Self {
        Self {
            name: format!("camera '{}'", device.name),
            device,
            running: None,
        }
    }
}

impl CaptureSource for CameraSource {
    type Sample = AvSample;

    fn name(&self) -> &str {
        &self.name
    }

    fn roles(&self) -> &[TrackRole] {
        &[TrackRole::Camera]
    }

    fn start(
        &mut self,
        events: CaptureSender<AvSample>,
    ) -> BoxFuture<'_, Result<(), CaptureError>> {
        let device_id = self.device.id.clone();
        let opened = run_blocking("camera-start", move || open_camera(&device_id, events));

        async move {
            let session = opened
                .await
                .map_err(|_| CaptureError::Start("camera thread exited".to_string()))???;

            info!(camera = %self.device.name, "Camera capture started");
            self.running = Some(session);
            Ok(())
        }
        .boxed()
    }

    fn stop(&mut self) -> BoxFuture<'_, Result<(), CaptureError>> {
        let running = self.running.take();

        async move {
            if let Some(running) = running {
                run_blocking("camera-stop", move || running.stop())
                    .await
                    .map_err(|_| CaptureError::Stop("camera thread exited".to_string()))??;
                debug!(camera = %self.device.name, "Camera capture stopped");
            }
            Ok(())
        }
        .boxed()
    }
}

fn open_camera(
    device_id: &str,
    events: CaptureSender<AvSample>,
) -> Result<CameraSession, CaptureError> {
    ensure_camera_access()?;

    let device = find_device(device_id)
        .ok_or_else(|| CaptureError::DeviceNotFound(format!("camera '{device_id}'")))?;
    let input = av::capture::DeviceInput::with_device(&device)
        .map_err(|e| CaptureError::Start(e.to_string()))?;

    let delegate = CameraDelegate::with(CameraDelegateInner { events });
    let queue = dispatch::Queue::serial_with_ar_pool();

    let mut output = av::capture::VideoDataOutput::new();
    output.set_sample_buf_delegate(Some(delegate.as_ref()), Some(&queue));

    DeviceSession::start(input, output, delegate, queue)
}

/// Asks for camera access if the user has not decided yet.
pub fn ensure_camera_access() -> Result<(), CaptureError> {
    ensure_access(av::MediaType::video(), "Camera")
}
