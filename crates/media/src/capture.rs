use futures::future::BoxFuture;

use crate::{MediaSample, TrackRole};

/// Everything a capture source reports, delivered from whatever thread the
/// platform calls back on.
pub enum CaptureEvent<S> {
    Sample { role: TrackRole, sample: S },
    Failed(CaptureError),
}

pub type CaptureSender<S> = flume::Sender<CaptureEvent<S>>;
pub type CaptureReceiver<S> = flume::Receiver<CaptureEvent<S>>;

#[derive(Debug, Clone, thiserror::Error)]
pub enum CaptureError {
    #[error("No displays available")]
    NoDisplays,
    #[error("{0} access was denied")]
    PermissionDenied(&'static str),
    #[error("Device '{0}' not found")]
    DeviceNotFound(String),
    #[error("Start/{0}")]
    Start(String),
    #[error("Stop/{0}")]
    Stop(String),
    #[error("Stream/{0}")]
    Stream(String),
}

/// A live producer of samples for one or more track roles.
///
/// `start` resolves once the platform has acknowledged the source is
/// running; samples then flow into `events` until `stop` resolves.
pub trait CaptureSource: Send {
    type Sample: MediaSample;

    fn name(&self) -> &str;

    fn roles(&self) -> &[TrackRole];

    fn start(
        &mut self,
        events: CaptureSender<Self::Sample>,
    ) -> BoxFuture<'_, Result<(), CaptureError>>;

    fn stop(&mut self) -> BoxFuture<'_, Result<(), CaptureError>>;
}

pub type BoxedCaptureSource<S> = Box<dyn CaptureSource<Sample = S>>;
