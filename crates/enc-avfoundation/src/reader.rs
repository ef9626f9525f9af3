use std::{
    io,
    path::{Path, PathBuf},
};

use cidre::{arc, av, cat, cv, ns, objc::Obj};
use reel_media::{
    ContainerReader, MediaKind, MediaTime, MetadataItem, OutputId, PcmFormat, ReadMode,
    ReaderError, TrackId, TrackInfo,
};
use tracing::*;

use crate::{AvSample, bridge};

/// `AVAssetReader` behind the [`ContainerReader`] contract.
pub struct AvReader {
    path: PathBuf,
    reader: arc::R<av::AssetReader>,
    tracks: Vec<TrackInfo>,
    native: Vec<(TrackId, arc::R<av::asset::Track>)>,
    outputs: Vec<arc::R<av::AssetReaderTrackOutput>>,
    duration: MediaTime,
    metadata: Vec<MetadataItem>,
}

unsafe impl Send for AvReader {}

impl AvReader {
    pub fn open(path: &Path) -> Result<Self, ReaderError> {
        if !path.exists() {
            return Err(ReaderError::Io(io::Error::new(
                io::ErrorKind::NotFound,
                format!("{path:?} does not exist"),
            )));
        }

        let path_str = path
            .to_str()
            .ok_or_else(|| ReaderError::Open(format!("non UTF-8 path {path:?}")))?;

        let asset = av::UrlAsset::with_url(&ns::Url::with_fs_path_str(path_str, false), None)
            .ok_or_else(|| ReaderError::Open(format!("UrlAsset::with_url{{{path:?}}}")))?;

        let reader = av::AssetReader::with_asset(&asset)
            .map_err(|e| ReaderError::Open(format!("AssetReader::with_asset: {e}")))?;

        let mut tracks = vec![];
        let mut native = vec![];

        for (kind, media_type) in [
            (MediaKind::Video, av::MediaType::video()),
            (MediaKind::Audio, av::MediaType::audio()),
            (MediaKind::Timecode, av::MediaType::timecode()),
        ] {
            let loaded =
                futures::executor::block_on(asset.load_tracks_with_media_type(media_type))
                    .map_err(|e| ReaderError::Open(format!("load_tracks_with_media_type: {e}")))?;

            for track in loaded.iter() {
                let id = TrackId(track.track_id().0 as u32);
                let range = track.time_range();
                let dimensions = (kind == MediaKind::Video).then(|| {
                    let size = track.natural_size();
                    (size.width.round() as u32, size.height.round() as u32)
                });

                tracks.push(TrackInfo {
                    id,
                    kind,
                    label: bridge::track_label(track),
                    dimensions,
                    start: range.start.into(),
                    duration: range.duration.into(),
                });
                native.push((id, track.retained()));
            }
        }

        tracks.sort_by_key(|track| track.id);

        let metadata = bridge::asset_metadata(&asset);
        let duration = asset.duration().into();

        debug!(?path, tracks = tracks.len(), "Opened asset");

        Ok(Self {
            path: path.to_path_buf(),
            reader,
            tracks,
            native,
            outputs: vec![],
            duration,
            metadata,
        })
    }

    fn error_text(&self) -> String {
        match self.reader.error() {
            Some(error) => error.to_string(),
            None => format!("reader is {:?}", self.reader.status()),
        }
    }
}

impl ContainerReader for AvReader {
    type Sample = AvSample;

    fn tracks(&self) -> &[TrackInfo] {
        &self.tracks
    }

    fn duration(&self) -> MediaTime {
        self.duration
    }

    fn metadata(&self) -> &[MetadataItem] {
        &self.metadata
    }

    fn add_output(&mut self, track: TrackId, mode: ReadMode) -> Result<OutputId, ReaderError> {
        let (_, native) = self
            .native
            .iter()
            .find(|(id, _)| *id == track)
            .ok_or(ReaderError::NoSuchTrack(track))?;

        let settings = match mode {
            ReadMode::Passthrough => None,
            ReadMode::Pcm(format) => Some(pcm_settings(format)),
            ReadMode::Decoded => Some(decoded_settings()),
        };

        let mut output = av::AssetReaderTrackOutput::with_track(native, settings.as_deref())
            .map_err(|e| ReaderError::AddOutput(format!("{track:?} {mode:?}: {e}")))?;
        output.set_always_copies_sample_data(false);

        self.reader
            .add_output(&output)
            .map_err(|e| ReaderError::AddOutput(format!("reader.add_output: {e}")))?;

        self.outputs.push(output);

        Ok(OutputId(self.outputs.len() - 1))
    }

    fn start_reading(&mut self) -> Result<(), ReaderError> {
        match self.reader.start_reading() {
            Ok(true) => Ok(()),
            Ok(false) => Err(ReaderError::Start(self.error_text())),
            Err(e) => Err(ReaderError::Start(e.to_string())),
        }
    }

    fn next_sample(&mut self, output: OutputId) -> Result<Option<AvSample>, ReaderError> {
        let track_output = self
            .outputs
            .get_mut(output.0)
            .ok_or_else(|| ReaderError::Read(format!("unknown output {output:?}")))?;

        match track_output.next_sample_buf() {
            Ok(Some(buf)) => Ok(Some(AvSample::new(buf))),
            Ok(None) if self.reader.status() == av::AssetReaderStatus::Failed => {
                Err(ReaderError::Read(self.error_text()))
            }
            Ok(None) => Ok(None),
            Err(e) => Err(ReaderError::Read(e.to_string())),
        }
    }

    fn cancel(&mut self) {
        if self.reader.status() == av::AssetReaderStatus::Reading {
            trace!(path = ?self.path, "Cancelling reader");
            self.reader.cancel_reading();
        }
    }
}

impl Drop for AvReader {
    fn drop(&mut self) {
        self.cancel();
    }
}

fn pcm_settings(format: PcmFormat) -> arc::R<ns::Dictionary<ns::String, ns::Id>> {
    ns::Dictionary::with_keys_values(
        &[
            av::audio::all_formats_keys::id(),
            av::audio::all_formats_keys::sample_rate(),
            av::audio::all_formats_keys::number_of_channels(),
            av::audio::linear_pcm_keys::bit_depth(),
            av::audio::linear_pcm_keys::is_float(),
            av::audio::linear_pcm_keys::is_non_interleaved(),
            av::audio::linear_pcm_keys::is_big_endian(),
        ],
        &[
            ns::Number::with_u32(cat::AudioFormat::LINEAR_PCM.0).as_id_ref(),
            ns::Number::with_u32(format.sample_rate).as_id_ref(),
            ns::Number::with_u32(format.channels as u32).as_id_ref(),
            ns::Number::with_u32(32).as_id_ref(),
            ns::Number::with_bool(true).as_id_ref(),
            ns::Number::with_bool(false).as_id_ref(),
            ns::Number::with_bool(false).as_id_ref(),
        ],
    )
}

fn decoded_settings() -> arc::R<ns::Dictionary<ns::String, ns::Id>> {
    ns::Dictionary::with_keys_values(
        &[cv::pixel_buffer::keys::pixel_format().as_ns()],
        &[cv::PixelFormat::_420V.to_cf_number().as_ns().as_id_ref()],
    )
}
