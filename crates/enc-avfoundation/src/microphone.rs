use cidre::{
    av::{
        self,
        capture::{AudioDataOutputSampleBufDelegate, AudioDataOutputSampleBufDelegateImpl},
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
    pub MicrophoneDelegate + AudioDataOutputSampleBufDelegateImpl,
    MicrophoneDelegateInner,
    REEL_MICROPHONE_DELEGATE
);

pub struct MicrophoneDelegateInner {
    events: CaptureSender<AvSample>,
}

impl AudioDataOutputSampleBufDelegate for MicrophoneDelegate {}

#[objc::add_methods]
impl AudioDataOutputSampleBufDelegateImpl for MicrophoneDelegate {
    extern "C" fn impl_capture_output_did_output_sample_buf_from_connection(
        &mut self,
        _cmd: Option<&objc::Sel>,
        _output: &av::CaptureOutput,
        sample_buf: &cm::SampleBuf,
        _connection: &av::CaptureConnection,
    ) {
        let _ = self.inner_mut().events.send(CaptureEvent::Sample {
            role: TrackRole::Microphone,
            sample: AvSample::new(sample_buf.retained()),
        });
    }
}

type MicrophoneSession = DeviceSession<av::capture::AudioDataOutput, MicrophoneDelegate>;

pub struct MicrophoneSource {
    name: String,
    device: DeviceInfo,
    running: Option<MicrophoneSession>,
}

impl MicrophoneSource {
    pub fn new(device: DeviceInfo) -> Self {
        Self {
            name: format!("microphone '{}'", device.name),
            device,
            running: None,
        }
    }
}

impl CaptureSource for MicrophoneSource {
    type Sample = AvSample;

    fn name(&self) -> &str {
        &self.name
    }

    fn roles(&self) -> &[TrackRole] {
        &[TrackRole::Microphone]
    }

    fn start(
        &mut self,
        events: CaptureSender<AvSample>,
    ) -> BoxFuture<'_, Result<(), CaptureError>> {
        let device_id = self.device.id.clone();
        let opened = run_blocking("microphone-start", move || open_microphone(&device_id, events));

        async move {
            let session = opened
                .await
                .map_err(|_| CaptureError::Start("microphone thread exited".to_string()))???;

            info!(microphone = %self.device.name, "Microphone capture started");
            self.running = Some(session);
            Ok(())
        }
        .boxed()
    }

    fn stop(&mut self) -> BoxFuture<'_, Result<(), CaptureError>> {
        let running = self.running.take();

        async move {
            if let Some(running) = running {
                run_blocking("microphone-stop", move || running.stop())
                    .await
                    .map_err(|_| CaptureError::Stop("microphone thread exited".to_string()))??;
                debug!(microphone = %self.device.name, "Microphone capture stopped");
            }
            Ok(())
        }
        .boxed()
    }
}

fn open_microphone(
    device_id: &str,
    events: CaptureSender<AvSample>,
) -> Result<MicrophoneSession, CaptureError> {
    ensure_microphone_access()?;

    let device = find_device(device_id)
        .ok_or_else(|| CaptureError::DeviceNotFound(format!("microphone '{device_id}'")))?;
    let input = av::capture::DeviceInput::with_device(&device)
        .map_err(|e| CaptureError::Start(e.to_string()))?;

    let delegate = MicrophoneDelegate::with(MicrophoneDelegateInner { events });
    let queue = dispatch::Queue::serial_with_ar_pool();

    let mut output = av::capture::AudioDataOutput::new();
    output.set_sample_buf_delegate(Some(delegate.as_ref()), Some(&queue));

    DeviceSession::start(input, output, delegate, queue)
}

/// Asks for microphone access if the user has not decided yet.
pub fn ensure_microphone_access() -> Result<(), CaptureError> {
    ensure_access(av::MediaType::audio(), "Microphone")
}
