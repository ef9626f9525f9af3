use reel_media::{ReaderError, SampleError, TrackId, WriterError};

#[derive(Debug, thiserror::Error)]
pub enum PostProcessError {
    #[error("Reader/{0}")]
    Reader(#[from] ReaderError),
    #[error("Writer/{0}")]
    Writer(#[from] WriterError),
    #[error("Append({track:?})/{source}")]
    Append { track: TrackId, source: WriterError },
    #[error("Sample/{0}")]
    Sample(#[from] SampleError),
    #[error("InvalidFrameRate({0})")]
    InvalidFrameRate(u32),
    #[error("Io/{0}")]
    Io(#[from] std::io::Error),
    #[error("Cancelled")]
    Cancelled,
}

impl PostProcessError {
    /// Cancellation is a user decision, not a failure.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

/// Whether a pass replaced its target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RewriteOutcome {
    Rewritten,
    Unchanged,
}
