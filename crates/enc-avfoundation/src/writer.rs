use std::{
    io,
    path::{Path, PathBuf},
};

use cidre::{arc, av, cat, cf, cm, ns, objc::Obj};
use reel_media::{
    Completion, ContainerWriter, MediaKind, MediaTime, MetadataItem, PcmChunk, TrackConfig,
    TrackId, TrackSettings, VideoCodec, WriterError, WriterStatus, completion,
};
use tracing::*;

use crate::{
    AvSample, bridge,
    sample::{SampleBufExt, timecode_format_desc},
};

struct WriterTrack {
    input: arc::R<av::AssetWriterInput>,
    kind: MediaKind,
    finished: bool,
    appended: u64,
}

/// `AVAssetWriter` behind the [`ContainerWriter`] contract. Track ids are
/// handed out in the order inputs are added, starting at 1.
pub struct AvWriter {
    path: PathBuf,
    asset_writer: arc::R<av::AssetWriter>,
    tracks: Vec<WriterTrack>,
}

unsafe impl Send for AvWriter {}

impl AvWriter {
    /// `.mp4` paths are written as MPEG-4, everything else as QuickTime.
    pub fn create(path: &Path) -> Result<Self, WriterError> {
        if path.exists() {
            return Err(WriterError::Create(format!("{path:?} already exists")));
        }

        let file_type = match path.extension().and_then(|ext| ext.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("mp4") => av::FileType::mp4(),
            _ => av::FileType::qt(),
        };

        let url = cf::Url::with_path(path, false)
            .ok_or_else(|| WriterError::Create(format!("invalid path {path:?}")))?;
        let asset_writer = av::AssetWriter::with_url_and_file_type(url.as_ns(), file_type)
            .map_err(|e| WriterError::Create(e.to_string()))?;

        debug!(?path, "Created asset writer");

        Ok(Self {
            path: path.to_path_buf(),
            asset_writer,
            tracks: vec![],
        })
    }

    fn index(&self, track: TrackId) -> Result<usize, WriterError> {
        let index = (track.0 as usize)
            .checked_sub(1)
            .filter(|index| *index < self.tracks.len())
            .ok_or(WriterError::UnknownTrack(track))?;
        Ok(index)
    }

    fn make_input(
        &self,
        config: &TrackConfig,
    ) -> Result<arc::R<av::AssetWriterInput>, WriterError> {
        let media_type = match config.kind {
            MediaKind::Video => av::MediaType::video(),
            MediaKind::Audio => av::MediaType::audio(),
            MediaKind::Timecode => av::MediaType::timecode(),
        };

        let (settings, real_time) = match &config.settings {
            TrackSettings::Video {
                codec,
                width,
                height,
                fps,
                real_time,
            } => (
                Some(video_settings(*codec, *width, *height, *fps)),
                *real_time,
            ),
            TrackSettings::Audio {
                format,
                bitrate,
                real_time,
            } => (
                Some(audio_settings(
                    format.sample_rate,
                    format.channels as u32,
                    *bitrate,
                )),
                *real_time,
            ),
            TrackSettings::Passthrough | TrackSettings::Timecode => (None, false),
        };

        let mut input = av::AssetWriterInput::with_media_type_and_output_settings(
            media_type,
            settings.as_deref(),
        )
        .map_err(|e| WriterError::AddTrack(e.to_string()))?;
        input.set_expects_media_data_in_real_time(real_time);

        Ok(input)
    }

    fn error_text(&self) -> String {
        writer_error_text(&self.asset_writer)
    }
}

impl ContainerWriter for AvWriter {
    type Sample = AvSample;

    fn add_track(&mut self, config: TrackConfig) -> Result<TrackId, WriterError> {
        let input = self.make_input(&config)?;

        if let Some(label) = &config.label {
            bridge::set_input_label(&input, label);
        }

        if !self.asset_writer.can_add_input(&input) {
            return Err(WriterError::AddTrack(format!(
                "{:?} input rejected by writer",
                config.kind
            )));
        }
        self.asset_writer
            .add_input(&input)
            .map_err(|e| WriterError::AddTrack(e.to_string()))?;

        self.tracks.push(WriterTrack {
            input,
            kind: config.kind,
            finished: false,
            appended: 0,
        });

        let id = TrackId(self.tracks.len() as u32);
        debug!(?id, kind = ?config.kind, label = ?config.label, "Added writer track");
        Ok(id)
    }

    fn set_metadata(&mut self, items: &[MetadataItem]) -> Result<(), WriterError> {
        if self.asset_writer.status() != av::asset::writer::Status::Unknown {
            return Err(WriterError::Metadata("writer already started".into()));
        }

        bridge::set_writer_metadata(&self.asset_writer, items);
        Ok(())
    }

    fn associate_timecode(
        &mut self,
        video: TrackId,
        timecode: TrackId,
    ) -> Result<(), WriterError> {
        let video = &self.tracks[self.index(video)?];
        let timecode = &self.tracks[self.index(timecode)?];

        if video.kind != MediaKind::Video || timecode.kind != MediaKind::Timecode {
            return Err(WriterError::AddTrack(
                "timecode association needs a video and a timecode track".into(),
            ));
        }

        if !bridge::add_timecode_association(&video.input, &timecode.input) {
            warn!("Writer refused timecode association");
        }

        Ok(())
    }

    fn start_writing(&mut self) -> Result<(), WriterError> {
        if !self.asset_writer.start_writing() {
            return Err(WriterError::Start(self.error_text()));
        }

        Ok(())
    }

    fn start_session(&mut self, at: MediaTime) {
        self.asset_writer.start_session_at_src_time(at.into());
    }

    fn end_session(&mut self, at: MediaTime) {
        if let Err(e) = self.asset_writer.end_session_at_src_time(at.into()) {
            warn!(%at, "end_session_at_src_time: {e}");
        }
    }

    fn is_ready_for_more(&self, track: TrackId) -> bool {
        self.index(track)
            .is_ok_and(|index| self.tracks[index].input.is_ready_for_more_media_data())
    }

    fn append(&mut self, track: TrackId, sample: &AvSample) -> Result<(), WriterError> {
        let index = self.index(track)?;
        append_sample_buf(
            &mut self.tracks[index].input,
            &self.asset_writer,
            sample.sample_buf(),
            track,
        )?;
        self.tracks[index].appended += 1;

        Ok(())
    }

    fn append_pcm(
        &mut self,
        track: TrackId,
        pts: MediaTime,
        pcm: &PcmChunk,
    ) -> Result<(), WriterError> {
        let index = self.index(track)?;
        if pcm.is_empty() {
            return Ok(());
        }

        let construct = |e: cidre::os::Error| WriterError::Append {
            track,
            reason: format!("{e:?}"),
        };

        let rate = pcm.format.sample_rate;
        let channels = pcm.format.channels as u32;
        let audio_desc = cat::audio::StreamBasicDesc::common_f32(rate as f64, channels, true);

        let mut block_buf = cm::BlockBuf::with_mem_block(pcm.samples.len() * size_of::<f32>())
            .map_err(construct)?;
        let block_buf_slice = block_buf.as_mut_slice().map_err(construct)?;
        for (bytes, sample) in block_buf_slice.chunks_exact_mut(4).zip(&pcm.samples) {
            bytes.copy_from_slice(&sample.to_ne_bytes());
        }

        let format_desc = cm::AudioFormatDesc::with_asbd(&audio_desc).map_err(construct)?;

        let buffer = cm::SampleBuf::create(
            Some(&block_buf),
            true,
            Some(format_desc.as_ref()),
            pcm.frames() as isize,
            &[cm::SampleTimingInfo {
                duration: cm::Time::new(1, rate as i32),
                pts: pts.into(),
                dts: cm::Time::invalid(),
            }],
            &[audio_desc.bytes_per_frame as usize],
        )
        .map_err(construct)?;

        append_sample_buf(
            &mut self.tracks[index].input,
            &self.asset_writer,
            &buffer,
            track,
        )?;
        self.tracks[index].appended += 1;

        Ok(())
    }

    fn append_timecode(
        &mut self,
        track: TrackId,
        pts: MediaTime,
        frame_number: u32,
        fps: u32,
    ) -> Result<(), WriterError> {
        let index = self.index(track)?;
        let construct = |e: cidre::os::Error| WriterError::Append {
            track,
            reason: format!("{e:?}"),
        };

        let format_desc = timecode_format_desc(fps).map_err(construct)?;

        let mut block_buf = cm::BlockBuf::with_mem_block(size_of::<u32>()).map_err(construct)?;
        block_buf
            .as_mut_slice()
            .map_err(construct)?
            .copy_from_slice(&frame_number.to_be_bytes());

        let buffer = cm::SampleBuf::create(
            Some(&block_buf),
            true,
            Some(format_desc.as_ref()),
            1,
            &[cm::SampleTimingInfo {
                duration: cm::Time::new(1, fps.max(1) as i32),
                pts: pts.into(),
                dts: cm::Time::invalid(),
            }],
            &[size_of::<u32>()],
        )
        .map_err(construct)?;

        append_sample_buf(
            &mut self.tracks[index].input,
            &self.asset_writer,
            &buffer,
            track,
        )?;
        self.tracks[index].appended += 1;

        Ok(())
    }

    fn mark_finished(&mut self, track: TrackId) {
        let Ok(index) = self.index(track) else {
            return;
        };

        let track = &mut self.tracks[index];
        if !track.finished {
            track.input.mark_as_finished();
            track.finished = true;
        }
    }

    fn finish(&mut self) -> Completion<Result<(), WriterError>> {
        use av::asset::writer::Status;

        if self.asset_writer.status() != Status::Writing {
            return Completion::ready(Err(WriterError::Failed(format!(
                "finish while {:?}: {}",
                self.status(),
                self.error_text()
            ))));
        }

        for track in self.tracks.iter_mut().filter(|track| !track.finished) {
            track.input.mark_as_finished();
            track.finished = true;
        }

        for (i, track) in self.tracks.iter().enumerate() {
            debug!(track = i + 1, kind = ?track.kind, appended = track.appended, "Finishing track");
        }

        let (completer, completion) = completion();
        let mut completer = Some(completer);
        let writer = self.asset_writer.clone();
        let path = self.path.clone();

        self.asset_writer.finish_writing_with_ch(move || {
            let Some(completer) = completer.take() else {
                return;
            };

            let result = match writer.status() {
                Status::Completed => {
                    info!(?path, "Finished writing");
                    Ok(())
                }
                _ => Err(WriterError::Failed(writer_error_text(&writer))),
            };
            completer.complete(result);
        });

        completion
    }

    fn cancel(&mut self) {
        if self.asset_writer.status() == av::asset::writer::Status::Writing {
            self.asset_writer.cancel_writing();
        }

        match std::fs::remove_file(&self.path) {
            Ok(()) => debug!(path = ?self.path, "Removed cancelled output"),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => warn!(path = ?self.path, "Failed to remove cancelled output: {e}"),
        }
    }

    fn status(&self) -> WriterStatus {
        map_status(self.asset_writer.status())
    }
}

impl Drop for AvWriter {
    fn drop(&mut self) {
        if self.asset_writer.status() == av::asset::writer::Status::Writing {
            warn!(path = ?self.path, "Writer dropped while writing, cancelling");
            self.cancel();
        }
    }
}

fn map_status(status: av::asset::writer::Status) -> WriterStatus {
    use av::asset::writer::Status;

    match status {
        Status::Unknown => WriterStatus::Unknown,
        Status::Writing => WriterStatus::Writing,
        Status::Completed => WriterStatus::Completed,
        Status::Failed => WriterStatus::Failed,
        Status::Cancelled => WriterStatus::Cancelled,
    }
}

fn writer_error_text(writer: &av::AssetWriter) -> String {
    match writer.error() {
        Some(error) => error.to_string(),
        None => format!("writer is {:?}", map_status(writer.status())),
    }
}

fn append_sample_buf(
    input: &mut av::AssetWriterInput,
    writer: &av::AssetWriter,
    buf: &cm::SampleBuf,
    track: TrackId,
) -> Result<(), WriterError> {
    match input.append_sample_buf(buf) {
        Ok(true) => Ok(()),
        Ok(false) => match writer.status() {
            av::asset::writer::Status::Writing => Err(WriterError::NotReadyForMore(track)),
            _ => Err(WriterError::Failed(writer_error_text(writer))),
        },
        Err(e) => Err(WriterError::Append {
            track,
            reason: e.to_string(),
        }),
    }
}

fn video_settings(
    codec: VideoCodec,
    width: u32,
    height: u32,
    fps: Option<u32>,
) -> arc::R<ns::Dictionary<ns::String, ns::Id>> {
    let fps = fps.unwrap_or(60) as f32;
    let bitrate = get_average_bitrate(width as f32, height as f32, fps);
    let keyframe_interval = (fps * 2.0) as i32;

    debug!(?codec, width, height, bitrate, "Video encoder settings");

    let codec = match codec {
        VideoCodec::H264 => av::VideoCodec::h264(),
        VideoCodec::Hevc => av::VideoCodec::hevc(),
    };

    let compression = ns::Dictionary::with_keys_values(
        &[
            unsafe { AVVideoAverageBitRateKey },
            unsafe { AVVideoAllowFrameReorderingKey },
            unsafe { AVVideoExpectedSourceFrameRateKey },
            unsafe { AVVideoMaxKeyFrameIntervalKey },
        ],
        &[
            ns::Number::with_f32(bitrate).as_id_ref(),
            ns::Number::with_bool(false).as_id_ref(),
            ns::Number::with_f32(fps).as_id_ref(),
            ns::Number::with_i32(keyframe_interval).as_id_ref(),
        ],
    );

    let color = ns::Dictionary::with_keys_values(
        &[
            unsafe { AVVideoTransferFunctionKey },
            unsafe { AVVideoColorPrimariesKey },
            unsafe { AVVideoYCbCrMatrixKey },
        ],
        &[
            unsafe { AVVideoTransferFunction_ITU_R_709_2 }.as_id_ref(),
            unsafe { AVVideoColorPrimaries_ITU_R_709_2 }.as_id_ref(),
            unsafe { AVVideoYCbCrMatrix_ITU_R_709_2 }.as_id_ref(),
        ],
    );

    ns::Dictionary::with_keys_values(
        &[
            av::video_settings_keys::codec(),
            av::video_settings_keys::width(),
            av::video_settings_keys::height(),
            av::video_settings_keys::compression_props(),
            av::video_settings_keys::color_props(),
        ],
        &[
            codec.as_id_ref(),
            ns::Number::with_u32(width).as_id_ref(),
            ns::Number::with_u32(height).as_id_ref(),
            compression.as_id_ref(),
            color.as_id_ref(),
        ],
    )
}

fn audio_settings(
    sample_rate: u32,
    channels: u32,
    bitrate: u32,
) -> arc::R<ns::Dictionary<ns::String, ns::Id>> {
    ns::Dictionary::with_keys_values(
        &[
            av::audio::all_formats_keys::id(),
            av::audio::all_formats_keys::number_of_channels(),
            av::audio::all_formats_keys::sample_rate(),
            av::audio::settings::encoder_propery_keys::bit_rate(),
        ],
        &[
            ns::Number::with_u32(cat::AudioFormat::MPEG4_AAC.0).as_id_ref(),
            ns::Number::with_u32(channels).as_id_ref(),
            ns::Number::with_u32(sample_rate).as_id_ref(),
            ns::Number::with_u32(bitrate).as_id_ref(),
        ],
    )
}

#[link(name = "AVFoundation", kind = "framework")]
unsafe extern "C" {
    static AVVideoAverageBitRateKey: &'static ns::String;
    static AVVideoAllowFrameReorderingKey: &'static ns::String;
    static AVVideoExpectedSourceFrameRateKey: &'static ns::String;
    static AVVideoMaxKeyFrameIntervalKey: &'static ns::String;
    static AVVideoTransferFunctionKey: &'static ns::String;
    static AVVideoColorPrimariesKey: &'static ns::String;
    static AVVideoYCbCrMatrixKey: &'static ns::String;

    static AVVideoTransferFunction_ITU_R_709_2: &'static ns::String;
    static AVVideoColorPrimaries_ITU_R_709_2: &'static ns::String;
    static AVVideoYCbCrMatrix_ITU_R_709_2: &'static ns::String;
}

fn get_average_bitrate(width: f32, height: f32, fps: f32) -> f32 {
    5_000_000.0
        + width * height / (1920.0 * 1080.0) * 2_000_000.0
        + fps.min(60.0) / 30.0 * 5_000_000.0
}
