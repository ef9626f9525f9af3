use std::{
    path::Path,
    time::{Duration, Instant},
};

use reel_media::{
    ContainerReader, ContainerWriter, MediaBackend, MediaTime, OutputId, PcmChunk, TrackId,
    WriterError, WriterStatus,
};
use tokio_util::sync::CancellationToken;
use tracing::*;

use crate::{PostProcessError, StagedOutput};

/// How long to wait before asking busy writer tracks again.
pub const WRITER_POLL_INTERVAL: Duration = Duration::from_millis(10);
/// How often a cancellable rewrite checks its token.
pub const CANCEL_POLL_INTERVAL: Duration = Duration::from_millis(25);

/// Appends per pipe before the next pipe gets a turn.
const MAX_BURST: usize = 32;

pub(crate) enum Payload<S> {
    Sample(S),
    Pcm(MediaTime, PcmChunk),
}

/// Produces what one writer track should receive next. `readers[0]` is the
/// file being rewritten; further readers are reference files.
pub(crate) trait PipeSource<R: ContainerReader>: Send {
    fn pull(&mut self, readers: &mut [R]) -> Result<Option<Payload<R::Sample>>, PostProcessError>;
}

/// Stream copy of one reader output.
pub(crate) struct CopyTrack {
    pub reader: usize,
    pub output: OutputId,
}

impl<R: ContainerReader> PipeSource<R> for CopyTrack {
    fn pull(&mut self, readers: &mut [R]) -> Result<Option<Payload<R::Sample>>, PostProcessError> {
        Ok(readers[self.reader]
            .next_sample(self.output)?
            .map(Payload::Sample))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum PipeState {
    Reading,
    Draining,
    Finished,
    Failed,
}

pub(crate) struct Pipe<R: ContainerReader> {
    name: String,
    track: TrackId,
    source: Box<dyn PipeSource<R>>,
    pending: Option<Payload<R::Sample>>,
    state: PipeState,
    appended: u64,
}

impl<R: ContainerReader> Pipe<R> {
    pub fn new(
        name: impl Into<String>,
        track: TrackId,
        source: impl PipeSource<R> + 'static,
    ) -> Self {
        Self {
            name: name.into(),
            track,
            source: Box::new(source),
            pending: None,
            state: PipeState::Reading,
            appended: 0,
        }
    }

    pub fn state(&self) -> PipeState {
        self.state
    }

    /// Feeds the writer track until it pushes back, the source runs dry or
    /// the burst is used up. Returns whether anything was appended.
    fn service<W>(&mut self, readers: &mut [R], writer: &mut W) -> Result<bool, PostProcessError>
    where
        W: ContainerWriter<Sample = R::Sample>,
    {
        let mut progressed = false;

        for _ in 0..MAX_BURST {
            if self.pending.is_none() && self.state == PipeState::Reading {
                match self.source.pull(readers) {
                    Ok(Some(payload)) => self.pending = Some(payload),
                    Ok(None) => self.state = PipeState::Draining,
                    Err(error) => {
                        self.state = PipeState::Failed;
                        return Err(error);
                    }
                }
            }

            let Some(payload) = self.pending.take() else {
                if self.state == PipeState::Draining {
                    writer.mark_finished(self.track);
                    self.state = PipeState::Finished;
                    debug!(pipe = %self.name, appended = self.appended, "Track finished");
                    progressed = true;
                }
                break;
            };

            if !writer.is_ready_for_more(self.track) {
                self.pending = Some(payload);
                break;
            }

            let result = match &payload {
                Payload::Sample(sample) => writer.append(self.track, sample),
                Payload::Pcm(pts, chunk) => writer.append_pcm(self.track, *pts, chunk),
            };
            if let Err(source) = result {
                self.state = PipeState::Failed;
                return Err(PostProcessError::Append {
                    track: self.track,
                    source,
                });
            }

            self.appended += 1;
            progressed = true;
        }

        Ok(progressed)
    }
}

/// Services every pipe from one loop until all of them have finished.
pub(crate) async fn drive<R, W>(
    readers: &mut [R],
    writer: &mut W,
    pipes: &mut [Pipe<R>],
    cancel: Option<&CancellationToken>,
) -> Result<(), PostProcessError>
where
    R: ContainerReader,
    W: ContainerWriter<Sample = R::Sample>,
{
    let mut next_cancel_check = Instant::now();

    loop {
        if let Some(cancel) = cancel
            && Instant::now() >= next_cancel_check
        {
            if cancel.is_cancelled() {
                info!("Rewrite cancelled");
                return Err(PostProcessError::Cancelled);
            }
            next_cancel_check = Instant::now() + CANCEL_POLL_INTERVAL;
        }

        let mut progressed = false;
        for pipe in pipes.iter_mut() {
            progressed |= pipe.service(readers, writer)?;
        }

        if pipes.iter().all(|pipe| pipe.state() == PipeState::Finished) {
            return Ok(());
        }

        if writer.status() == WriterStatus::Failed {
            return Err(WriterError::Failed("writer failed mid-rewrite".into()).into());
        }

        if progressed {
            tokio::task::yield_now().await;
        } else {
            tokio::time::sleep(WRITER_POLL_INTERVAL).await;
        }
    }
}

/// One staged rewrite of `target`.
///
/// Any exit other than a successful [`Rewrite::run`] cancels the writer and
/// readers and removes the staged file, leaving `target` untouched.
pub(crate) struct Rewrite<B: MediaBackend> {
    pub readers: Vec<B::Reader>,
    pub writer: B::Writer,
    staged: Option<StagedOutput>,
    completed: bool,
}

impl<B: MediaBackend> Rewrite<B> {
    pub fn open(backend: &B, target: &Path) -> Result<Self, PostProcessError> {
        let reader = backend.open_reader(target)?;
        let staged = StagedOutput::new(target);
        let writer = backend.create_writer(staged.path())?;

        Ok(Self {
            readers: vec![reader],
            writer,
            staged: Some(staged),
            completed: false,
        })
    }

    /// Opens an extra reader whose tracks pipes can copy from.
    pub fn add_reader(&mut self, backend: &B, path: &Path) -> Result<usize, PostProcessError> {
        self.readers.push(backend.open_reader(path)?);
        Ok(self.readers.len() - 1)
    }

    pub fn source(&self) -> &B::Reader {
        &self.readers[0]
    }

    pub fn start(&mut self, session_start: MediaTime) -> Result<(), PostProcessError> {
        for reader in &mut self.readers {
            reader.start_reading()?;
        }
        self.writer.start_writing()?;
        self.writer.start_session(session_start);
        Ok(())
    }

    pub async fn run(
        mut self,
        mut pipes: Vec<Pipe<B::Reader>>,
        end: MediaTime,
        cancel: Option<&CancellationToken>,
    ) -> Result<(), PostProcessError> {
        drive(&mut self.readers, &mut self.writer, &mut pipes, cancel).await?;

        self.writer.end_session(end);
        self.writer
            .finish()
            .await
            .map_err(|_| WriterError::Failed("completion dropped".into()))??;
        if self.writer.status() == WriterStatus::Failed {
            return Err(WriterError::Failed("writer ended in a failed state".into()).into());
        }
        self.completed = true;

        if let Some(staged) = self.staged.take() {
            staged.promote()?;
        }
        Ok(())
    }
}

impl<B: MediaBackend> Drop for Rewrite<B> {
    fn drop(&mut self) {
        if self.completed {
            return;
        }

        self.writer.cancel();
        for reader in &mut self.readers {
            reader.cancel();
        }
        if let Some(staged) = self.staged.take() {
            staged.discard();
        }
    }
}
