use std::sync::Arc;

use futures::channel::oneshot;
use reel_media::{
    BoxedCaptureSource, CaptureEvent, MediaBackend, MediaSample, TrackRole,
    level::{MIN_DB, PeakMeter, chunk_peak_dbfs},
};
use tokio::sync::watch;
use tracing::*;

use crate::{CompletedRecording, RecordingError, RecordingSession, SessionPlan};

const LEVEL_WINDOW_SECS: f64 = 0.2;

pub enum ActorControlMessage {
    Stop(oneshot::Sender<Result<CompletedRecording, RecordingError>>),
}

#[derive(Debug, thiserror::Error)]
pub enum ActorError {
    #[error("Actor has stopped")]
    ActorStopped,

    #[error("Failed to send to actor")]
    SendFailed(#[from] flume::SendError<()>),
}

/// Most recent windowed peak per audio source, in dBFS.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AudioLevels {
    pub microphone: f64,
    pub system_audio: f64,
}

impl Default for AudioLevels {
    fn default() -> Self {
        Self {
            microphone: MIN_DB,
            system_audio: MIN_DB,
        }
    }
}

#[derive(Clone)]
pub struct ActorHandle {
    ctrl_tx: flume::Sender<ActorControlMessage>,
    levels: watch::Receiver<AudioLevels>,
}

macro_rules! send_message {
    ($ctrl_tx:expr, $variant:path) => {{
        let (tx, rx) = oneshot::channel();
        $ctrl_tx
            .send_async($variant(tx))
            .await
            .map_err(|_| flume::SendError(()))
            .map_err(ActorError::from)?;
        rx.await.map_err(|_| ActorError::ActorStopped)?
    }};
}

impl ActorHandle {
    pub async fn stop(&self) -> Result<CompletedRecording, RecordingError> {
        send_message!(self.ctrl_tx, ActorControlMessage::Stop)
    }

    pub fn levels(&self) -> watch::Receiver<AudioLevels> {
        self.levels.clone()
    }
}

/// Starts every capture source and spawns the task that owns the
/// recording session.
///
/// Sources deliver on their own threads; all of their events are funneled
/// through one channel into the actor task, which is the only code that
/// touches the session. If any source fails to start, the ones already
/// running are stopped again and nothing is written.
pub async fn spawn_recording_actor<B: MediaBackend>(
    backend: Arc<B>,
    plan: SessionPlan,
    mut sources: Vec<BoxedCaptureSource<B::Sample>>,
) -> Result<ActorHandle, RecordingError> {
    let (event_tx, event_rx) = flume::unbounded();

    let mut started = 0;
    let mut start_error = None;
    for source in sources.iter_mut() {
        debug!(source = source.name(), roles = ?source.roles(), "Starting capture source");

        if let Err(error) = source.start(event_tx.clone()).await {
            error!(source = source.name(), %error, "Capture source failed to start");
            start_error = Some(error);
            break;
        }
        started += 1;
    }
    drop(event_tx);

    if let Some(error) = start_error {
        stop_sources(&mut sources[..started]).await;
        return Err(error.into());
    }

    let (ctrl_tx, ctrl_rx) = flume::bounded(1);
    let (levels_tx, levels_rx) = watch::channel(AudioLevels::default());

    trace!("spawning recording actor");

    tokio::spawn(
        async move {
            let mut actor = Actor {
                session: RecordingSession::new(backend, plan),
                microphone: PeakMeter::new(LEVEL_WINDOW_SECS),
                system_audio: PeakMeter::new(LEVEL_WINDOW_SECS),
                levels_tx,
            };
            let mut events_open = true;

            let reply = loop {
                tokio::select! {
                    msg = ctrl_rx.recv_async() => match msg {
                        Ok(ActorControlMessage::Stop(tx)) => break Some(tx),
                        Err(_) => {
                            warn!("Recording handle dropped, stopping");
                            break None;
                        }
                    },
                    event = event_rx.recv_async(), if events_open => match event {
                        Ok(event) => actor.handle_event(event),
                        Err(_) => {
                            debug!("All capture sources hung up");
                            events_open = false;
                        }
                    },
                }
            };

            stop_sources(&mut sources).await;
            while let Ok(event) = event_rx.try_recv() {
                actor.handle_event(event);
            }

            let result = actor.session.finish().await;
            info!("recording actor finished: {:?}", result.as_ref().map(|r| &r.primary));

            if let Some(tx) = reply {
                let _ = tx.send(result);
            }
        }
        .instrument(error_span!("recording-actor")),
    );

    Ok(ActorHandle {
        ctrl_tx,
        levels: levels_rx,
    })
}

async fn stop_sources<S: MediaSample>(sources: &mut [BoxedCaptureSource<S>]) {
    for source in sources {
        if let Err(error) = source.stop().await {
            warn!(source = source.name(), %error, "Failed to stop capture source");
        }
    }
}

struct Actor<B: MediaBackend> {
    session: RecordingSession<B>,
    microphone: PeakMeter,
    system_audio: PeakMeter,
    levels_tx: watch::Sender<AudioLevels>,
}

impl<B: MediaBackend> Actor<B> {
    fn handle_event(&mut self, event: CaptureEvent<B::Sample>) {
        match event {
            CaptureEvent::Sample { role, sample } => {
                if role.is_audio() {
                    self.meter(role, &sample);
                }
                self.session.handle_sample(role, sample);
            }
            CaptureEvent::Failed(error) => self.session.handle_stream_error(error),
        }
    }

    fn meter(&mut self, role: TrackRole, sample: &B::Sample) {
        let Some(pcm) = sample.pcm() else {
            return;
        };

        let meter = match role {
            TrackRole::Microphone => &mut self.microphone,
            TrackRole::SystemAudio => &mut self.system_audio,
            _ => return,
        };
        meter.push(sample.pts(), chunk_peak_dbfs(&pcm));
        let level = meter.max();

        self.levels_tx.send_modify(|levels| match role {
            TrackRole::Microphone => levels.microphone = level,
            _ => levels.system_audio = level,
        });
    }
}
