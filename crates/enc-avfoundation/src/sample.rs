use cidre::{arc, cat, cf, cm, os, sc};
use reel_media::{FrameStatus, MediaSample, MediaTime, PcmChunk, PcmFormat, SampleError};

/// A retained `CMSampleBuffer`, as delivered by capture callbacks and asset
/// readers.
#[derive(Clone)]
pub struct AvSample(arc::R<cm::SampleBuf>);

impl AvSample {
    pub fn new(buf: arc::R<cm::SampleBuf>) -> Self {
        Self(buf)
    }

    pub fn sample_buf(&self) -> &cm::SampleBuf {
        &self.0
    }
}

impl std::fmt::Debug for AvSample {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AvSample")
            .field("pts", &self.pts())
            .field("samples", &self.0.num_samples())
            .finish()
    }
}

impl MediaSample for AvSample {
    fn pts(&self) -> MediaTime {
        self.0.pts().into()
    }

    fn duration(&self) -> Option<MediaTime> {
        let duration = self.0.duration();
        duration.is_valid().then(|| duration.into())
    }

    fn frame_status(&self) -> FrameStatus {
        frame_status(&self.0)
    }

    fn dimensions(&self) -> Option<(u32, u32)> {
        let image = self.0.image_buf()?;
        Some((image.width() as u32, image.height() as u32))
    }

    fn pcm(&self) -> Option<PcmChunk> {
        pcm_chunk(&self.0)
    }

    fn retimed(&self, pts: MediaTime, duration: Option<MediaTime>) -> Result<Self, SampleError> {
        let mut timing = self
            .0
            .timing_info(0)
            .map_err(|e| SampleError::Retime(format!("timing_info: {e:?}")))?;

        timing.pts = pts.into();
        timing.dts = cm::Time::invalid();
        if let Some(duration) = duration {
            timing.duration = duration.into();
        }

        self.0
            .copy_with_new_timing(&[timing])
            .map(Self)
            .map_err(|e| SampleError::Retime(format!("{e:?}")))
    }
}

fn frame_status(buf: &cm::SampleBuf) -> FrameStatus {
    let raw = buf
        .attaches(false)
        .and_then(|attaches| attaches.iter().next())
        .and_then(|info| info.get(sc::FrameInfo::status().as_cf()))
        .and_then(cf::Plist::try_as_number)
        .and_then(|number| number.to_i64());

    let Some(raw) = raw else {
        return FrameStatus::Complete;
    };

    [
        (sc::FrameStatus::Idle, FrameStatus::Idle),
        (sc::FrameStatus::Blank, FrameStatus::Blank),
        (sc::FrameStatus::Suspended, FrameStatus::Suspended),
        (sc::FrameStatus::Started, FrameStatus::Started),
        (sc::FrameStatus::Stopped, FrameStatus::Stopped),
    ]
    .into_iter()
    .find(|(native, _)| *native as i64 == raw)
    .map_or(FrameStatus::Complete, |(_, status)| status)
}

/// Decodes linear PCM (float or integer, interleaved or planar) into
/// interleaved `f32`.
fn pcm_chunk(buf: &cm::SampleBuf) -> Option<PcmChunk> {
    let asbd = buf.format_desc()?.stream_basic_desc()?;
    if asbd.format != cat::AudioFormat::LINEAR_PCM {
        return None;
    }

    let frames = buf.num_samples().max(0) as usize;
    let channels = asbd.channels_per_frame.max(1) as usize;
    let is_float = asbd.format_flags.0 & cat::AudioFormatFlags::IS_FLOAT.0 != 0;

    let list = buf.audio_buf_list::<2>().ok()?;
    let buffers = list.list();
    let planes = buffers
        .buffers
        .iter()
        .take(buffers.number_buffers as usize)
        .map(|plane| {
            if plane.data.is_null() {
                return Some(vec![]);
            }
            let bytes =
                unsafe { std::slice::from_raw_parts(plane.data, plane.data_bytes_size as usize) };
            decode_samples(bytes, is_float, asbd.bits_per_channel)
        })
        .collect::<Option<Vec<_>>>()?;

    let samples = if asbd.is_interleaved() {
        let mut samples = planes.into_iter().next()?;
        samples.truncate(frames * channels);
        samples
    } else {
        let mut samples = Vec::with_capacity(frames * channels);
        for frame in 0..frames {
            for plane in planes.iter().cycle().take(channels) {
                samples.push(plane.get(frame).copied().unwrap_or(0.0));
            }
        }
        samples
    };

    Some(PcmChunk::new(
        PcmFormat::new(asbd.sample_rate as u32, channels as u16),
        samples,
    ))
}

fn decode_samples(bytes: &[u8], is_float: bool, bits: u32) -> Option<Vec<f32>> {
    Some(match (is_float, bits) {
        (true, 32) => bytes
            .chunks_exact(4)
            .map(|b| f32::from_ne_bytes([b[0], b[1], b[2], b[3]]))
            .collect(),
        (false, 16) => bytes
            .chunks_exact(2)
            .map(|b| i16::from_ne_bytes([b[0], b[1]]) as f32 / 32_768.0)
            .collect(),
        (false, 32) => bytes
            .chunks_exact(4)
            .map(|b| i32::from_ne_bytes([b[0], b[1], b[2], b[3]]) as f32 / 2_147_483_648.0)
            .collect(),
        _ => return None,
    })
}

unsafe fn result_unchecked<T, R>(op: impl FnOnce(&mut Option<T>) -> R) -> os::Result<T>
where
    R: Into<os::Result>,
{
    let mut option = None;
    op(&mut option).into()?;
    Ok(unsafe { option.unwrap_unchecked() })
}

pub(crate) trait SampleBufExt {
    fn create(
        data_buffer: Option<&cm::BlockBuf>,
        data_ready: bool,
        format_description: Option<&cm::FormatDesc>,
        num_samples: cm::ItemCount,
        sample_timings: &[cm::SampleTimingInfo],
        sample_sizes: &[usize],
    ) -> os::Result<arc::R<cm::SampleBuf>>;

    fn copy_with_new_timing(
        &self,
        sample_timings: &[cm::SampleTimingInfo],
    ) -> os::Result<arc::R<cm::SampleBuf>>;
}

impl SampleBufExt for cm::SampleBuf {
    fn create(
        data_buffer: Option<&cm::BlockBuf>,
        data_ready: bool,
        format_description: Option<&cm::FormatDesc>,
        num_samples: cm::ItemCount,
        sample_timings: &[cm::SampleTimingInfo],
        sample_sizes: &[usize],
    ) -> os::Result<arc::R<cm::SampleBuf>> {
        unsafe {
            result_unchecked(|res| {
                Self::create_in(
                    None,
                    data_buffer,
                    data_ready,
                    None,
                    std::ptr::null(),
                    format_description,
                    num_samples,
                    sample_timings.len() as isize,
                    sample_timings.as_ptr(),
                    sample_sizes.len() as isize,
                    sample_sizes.as_ptr(),
                    res,
                )
            })
        }
    }

    fn copy_with_new_timing(
        &self,
        sample_timings: &[cm::SampleTimingInfo],
    ) -> os::Result<arc::R<cm::SampleBuf>> {
        unsafe {
            unsafe extern "C-unwind" {
                fn CMSampleBufferCreateCopyWithNewTiming(
                    allocator: Option<&cf::Allocator>,
                    original_buf: &cm::SampleBuf,
                    num_sample_timing_entries: cm::ItemCount,
                    sample_timing_array: *const cm::SampleTimingInfo,
                    sample_buffer_out: *mut Option<arc::R<cm::SampleBuf>>,
                ) -> os::Status;
            }

            result_unchecked(|res| {
                CMSampleBufferCreateCopyWithNewTiming(
                    None,
                    self,
                    sample_timings.len() as isize,
                    sample_timings.as_ptr(),
                    res,
                )
            })
        }
    }
}

/// Format of 32-bit, non-drop, 24 hour timecode samples at `fps`.
pub(crate) fn timecode_format_desc(fps: u32) -> os::Result<arc::R<cm::FormatDesc>> {
    const TIME_CODE_32: u32 = u32::from_be_bytes(*b"tmcd");
    const FLAG_24_HOUR_MAX: u32 = 1 << 1;

    unsafe extern "C-unwind" {
        fn CMTimeCodeFormatDescriptionCreate(
            allocator: Option<&cf::Allocator>,
            time_code_format_type: u32,
            frame_duration: cm::Time,
            frame_quanta: u32,
            flags: u32,
            extensions: Option<&cf::Dictionary>,
            format_description_out: *mut Option<arc::R<cm::FormatDesc>>,
        ) -> os::Status;
    }

    let fps = fps.max(1);
    unsafe {
        result_unchecked(|res| {
            CMTimeCodeFormatDescriptionCreate(
                None,
                TIME_CODE_32,
                cm::Time::new(1, fps as i32),
                fps,
                FLAG_24_HOUR_MAX,
                None,
                res,
            )
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_signed_16_bit() {
        let bytes = [i16::MAX.to_ne_bytes(), i16::MIN.to_ne_bytes(), 0i16.to_ne_bytes()].concat();
        let samples = decode_samples(&bytes, false, 16).unwrap();

        assert!((samples[0] - 1.0).abs() < 1e-4);
        assert_eq!(samples[1], -1.0);
        assert_eq!(samples[2], 0.0);
    }

    #[test]
    fn rejects_unknown_layouts() {
        assert!(decode_samples(&[0; 6], false, 24).is_none());
        assert!(decode_samples(&[0; 8], true, 64).is_none());
    }
}
