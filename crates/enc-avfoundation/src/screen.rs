use cidre::{
    arc, cm, cv, define_obj_type, dispatch, ns, objc,
    objc::Obj,
    sc::{self, StreamDelegate, StreamDelegateImpl, StreamOutput, StreamOutputImpl},
};
use futures::{FutureExt, future::BoxFuture};
use reel_media::{
    CaptureError, CaptureEvent, CaptureSender, CaptureSource, Completer, TrackRole, completion,
    geometry::ResolvedDisplay,
};
use tracing::*;

use crate::AvSample;

/// `SCStreamErrorUserDeclined`
const USER_DECLINED: ns::Integer = -3801;

define_obj_type!(
    pub StreamCallbacks + StreamOutputImpl + StreamDelegateImpl, StreamCallbacksInner, REEL_SCREEN_CALLBACKS
);

pub struct StreamCallbacksInner {
    events: CaptureSender<AvSample>,
}

impl sc::stream::Output for StreamCallbacks {}

#[objc::add_methods]
impl sc::stream::OutputImpl for StreamCallbacks {
    extern "C" fn impl_stream_did_output_sample_buf(
        &mut self,
        _cmd: Option<&objc::Sel>,
        _stream: &sc::Stream,
        sample_buf: &mut cm::SampleBuf,
        kind: sc::OutputType,
    ) {
        let role = match kind {
            sc::OutputType::Screen => {
                if sample_buf.image_buf().is_none() {
                    trace!("Screen sample without an image buffer");
                    return;
                }
                TrackRole::Screen
            }
            sc::OutputType::Audio => TrackRole::SystemAudio,
            sc::OutputType::Mic => return,
        };

        let sample = AvSample::new(sample_buf.retained());
        let _ = self
            .inner_mut()
            .events
            .send(CaptureEvent::Sample { role, sample });
    }
}

impl sc::stream::Delegate for StreamCallbacks {}

#[objc::add_methods]
impl sc::stream::DelegateImpl for StreamCallbacks {
    extern "C" fn impl_stream_did_stop_with_err(
        &mut self,
        _cmd: Option<&objc::Sel>,
        _stream: &sc::Stream,
        error: &ns::Error,
    ) {
        error!(%error, "Screen capture stream stopped");
        let _ = self
            .inner_mut()
            .events
            .send(CaptureEvent::Failed(CaptureError::Stream(error.to_string())));
    }
}

#[derive(Clone, Debug)]
struct StreamSettings {
    display_id: u32,
    pixel_width: u32,
    pixel_height: u32,
    fps: u32,
    system_audio: bool,
    shows_cursor: bool,
}

type StopRequest = Completer<Result<(), CaptureError>>;

/// Captures one display, and optionally the system audio mix, through
/// ScreenCaptureKit.
///
/// The stream and its callbacks live on a dedicated thread for their whole
/// life, since none of them may leave the thread that created them.
pub struct ScreenSource {
    name: String,
    settings: StreamSettings,
    roles: Vec<TrackRole>,
    control: Option<flume::Sender<StopRequest>>,
}

impl ScreenSource {
    pub fn new(display: &ResolvedDisplay, fps: u32, system_audio: bool) -> Self {
        let mut roles = vec![TrackRole::Screen];
        if system_audio {
            roles.push(TrackRole::SystemAudio);
        }

        Self {
            name: format!("screen '{}'", display.display.name),
            settings: StreamSettings {
                display_id: display.display.id,
                pixel_width: display.geometry.pixel_width,
                pixel_height: display.geometry.pixel_height,
                fps: fps.max(1),
                system_audio,
                shows_cursor: true,
            },
            roles,
            control: None,
        }
    }

    pub fn with_shows_cursor(mut self, shows_cursor: bool) -> Self {
        self.settings.shows_cursor = shows_cursor;
        self
    }
}

impl CaptureSource for ScreenSource {
    type Sample = AvSample;

    fn name(&self) -> &str {
        &self.name
    }

    fn roles(&self) -> &[TrackRole] {
        &self.roles
    }

    fn start(
        &mut self,
        events: CaptureSender<AvSample>,
    ) -> BoxFuture<'_, Result<(), CaptureError>> {
        let (started, on_started) = completion();
        let (control_tx, control_rx) = flume::bounded(1);
        let settings = self.settings.clone();

        let spawned = std::thread::Builder::new()
            .name("screen-capture".to_string())
            .spawn(move || run_stream(settings, events, started, control_rx));

        async move {
            spawned.map_err(|e| CaptureError::Start(e.to_string()))?;

            on_started
                .await
                .map_err(|_| CaptureError::Start("capture thread exited".to_string()))??;

            self.control = Some(control_tx);
            Ok(())
        }
        .boxed()
    }

    fn stop(&mut self) -> BoxFuture<'_, Result<(), CaptureError>> {
        let control = self.control.take();

        async move {
            let Some(control) = control else {
                return Ok(());
            };

            let (done, on_done) = completion();
            control
                .send(done)
                .map_err(|_| CaptureError::Stop("capture thread exited".to_string()))?;

            on_done
                .await
                .map_err(|_| CaptureError::Stop("capture thread exited".to_string()))?
        }
        .boxed()
    }
}

struct Running {
    stream: arc::R<sc::Stream>,
    _callbacks: arc::R<StreamCallbacks>,
    _queue: arc::R<dispatch::Queue>,
}

fn run_stream(
    settings: StreamSettings,
    events: CaptureSender<AvSample>,
    started: Completer<Result<(), CaptureError>>,
    control: flume::Receiver<StopRequest>,
) {
    let running = match futures::executor::block_on(open_stream(&settings, events)) {
        Ok(running) => running,
        Err(error) => {
            started.complete(Err(error));
            return;
        }
    };

    info!(display = settings.display_id, "Screen capture started");
    started.complete(Ok(()));

    // Also unblocks when the source is dropped without being stopped.
    let request = control.recv().ok();

    let result = futures::executor::block_on(running.stream.stop())
        .map_err(|e| CaptureError::Stop(e.to_string()));
    debug!(?result, "Screen capture stopped");

    if let Some(request) = request {
        request.complete(result);
    }
}

async fn open_stream(
    settings: &StreamSettings,
    events: CaptureSender<AvSample>,
) -> Result<Running, CaptureError> {
    if !has_permission() {
        return Err(CaptureError::PermissionDenied("Screen recording"));
    }

    let content = sc::ShareableContent::current()
        .await
        .map_err(|e| classify(&e, CaptureError::Start))?;

    let display = content
        .displays()
        .iter()
        .find(|d| d.display_id().0 == settings.display_id)
        .map(|d| d.retained())
        .ok_or_else(|| CaptureError::DeviceNotFound(format!("display {}", settings.display_id)))?;

    let filter = sc::ContentFilter::with_display_excluding_windows(&display, &ns::Array::new());

    let mut cfg = sc::StreamCfg::new();
    cfg.set_width(settings.pixel_width as usize);
    cfg.set_height(settings.pixel_height as usize);
    cfg.set_minimum_frame_interval(cm::Time::new(1, settings.fps as i32));
    cfg.set_pixel_format(cv::PixelFormat::_32_BGRA);
    cfg.set_shows_cursor(settings.shows_cursor);
    cfg.set_queue_depth(5);

    if settings.system_audio {
        cfg.set_captures_audio(true);
        cfg.set_sample_rate(48_000);
        cfg.set_channel_count(2);
        cfg.set_excludes_current_process_audio(true);
    }

    let callbacks = StreamCallbacks::with(StreamCallbacksInner { events });
    let stream = sc::Stream::with_delegate(&filter, &cfg, callbacks.as_ref());
    let queue = dispatch::Queue::serial_with_ar_pool();

    stream
        .add_stream_output(callbacks.as_ref(), sc::OutputType::Screen, Some(&queue))
        .map_err(|e| CaptureError::Start(e.to_string()))?;

    if settings.system_audio {
        stream
            .add_stream_output(callbacks.as_ref(), sc::OutputType::Audio, Some(&queue))
            .map_err(|e| CaptureError::Start(e.to_string()))?;
    }

    stream
        .start()
        .await
        .map_err(|e| classify(&e, CaptureError::Start))?;

    Ok(Running {
        stream,
        _callbacks: callbacks,
        _queue: queue,
    })
}

fn classify(error: &ns::Error, otherwise: fn(String) -> CaptureError) -> CaptureError {
    if error.code() == USER_DECLINED {
        CaptureError::PermissionDenied("Screen recording")
    } else {
        otherwise(error.to_string())
    }
}

pub fn has_permission() -> bool {
    unsafe { (CGPreflightScreenCaptureAccess() & 1) == 1 }
}

pub fn request_permission() -> bool {
    unsafe { CGRequestScreenCaptureAccess() == 1 }
}

#[link(name = "CoreGraphics", kind = "framework")]
unsafe extern "C" {
    fn CGRequestScreenCaptureAccess() -> i32;
    fn CGPreflightScreenCaptureAccess() -> i32;
}
