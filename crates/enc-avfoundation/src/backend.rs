use std::path::Path;

use reel_media::{MediaBackend, ReaderError, WriterError};

use crate::{AvReader, AvSample, AvWriter};

/// Reads and writes QuickTime and MPEG-4 files through AVFoundation.
#[derive(Clone, Copy, Debug, Default)]
pub struct AvBackend;

impl MediaBackend for AvBackend {
    type Sample = AvSample;
    type Reader = AvReader;
    type Writer = AvWriter;

    fn open_reader(&self, path: &Path) -> Result<AvReader, ReaderError> {
        AvReader::open(path)
    }

    fn create_writer(&self, path: &Path) -> Result<AvWriter, WriterError> {
        AvWriter::create(path)
    }
}
