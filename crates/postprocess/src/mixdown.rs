use std::{collections::VecDeque, path::Path};

use reel_media::{
    ContainerReader, ContainerWriter, MediaBackend, MediaKind, MediaSample, MediaTime, OutputId,
    PcmChunk, PcmFormat, ReadMode, TrackConfig, TrackRole, TrackSettings,
    tracks::{AudioSources, MasterPosition, TrackLabel, label_audio_tracks},
};
use tracing::*;

use crate::{
    PostProcessError, RewriteOutcome,
    driver::{CopyTrack, Payload, Pipe, PipeSource, Rewrite},
};

/// Frames emitted per master chunk.
pub const MIX_CHUNK_FRAMES: usize = 1024;

/// Linear amplitude of -1 dBFS, where the soft limiter starts bending.
const SOFT_KNEE: f32 = 0.891_250_9;

#[derive(Debug, Clone)]
pub struct MixdownOptions {
    /// Which sources were recorded. Decides how tracks are labeled.
    pub sources: AudioSources,
    pub microphone_gain: f32,
    pub system_audio_gain: f32,
    /// Mix even a single audio track.
    pub force: bool,
    pub position: MasterPosition,
    pub limiter: bool,
}

impl Default for MixdownOptions {
    fn default() -> Self {
        Self {
            sources: AudioSources::default(),
            microphone_gain: 1.0,
            system_audio_gain: 1.0,
            force: false,
            position: MasterPosition::First,
            limiter: true,
        }
    }
}

impl MixdownOptions {
    fn gain_for(&self, label: &TrackLabel) -> f32 {
        if *label == TrackLabel::for_role(TrackRole::Microphone) {
            self.microphone_gain
        } else if *label == TrackLabel::for_role(TrackRole::SystemAudio) {
            self.system_audio_gain
        } else {
            1.0
        }
    }
}

/// Rewrites `path` with every original audio track re-encoded plus one
/// master track mixing them. Video and timecode are stream-copied.
///
/// Leaves the file alone when it already carries a master, has no audio, or
/// has a single audio track and `force` is off.
#[tracing::instrument(skip_all, name = "mixdown", fields(path = ?path))]
pub async fn add_master_audio_track_if_needed<B: MediaBackend>(
    backend: &B,
    path: &Path,
    options: &MixdownOptions,
) -> Result<RewriteOutcome, PostProcessError> {
    let audio_tracks = {
        let reader = backend.open_reader(path)?;
        reader.tracks_of(MediaKind::Audio)
    };

    if audio_tracks.iter().any(|track| track.is_master()) {
        debug!("Master track already present");
        return Ok(RewriteOutcome::Unchanged);
    }
    if audio_tracks.is_empty() || (audio_tracks.len() == 1 && !options.force) {
        debug!(tracks = audio_tracks.len(), "Nothing to mix");
        return Ok(RewriteOutcome::Unchanged);
    }

    let mut rewrite = Rewrite::open(backend, path)?;
    let tracks = rewrite.source().tracks().to_vec();
    let session_start = rewrite.source().session_start();
    let end = session_start + rewrite.source().duration();
    let metadata = rewrite.source().metadata().to_vec();

    let labels = label_audio_tracks(audio_tracks.len(), options.sources);
    let mut pipes = vec![];
    let mut videos = vec![];
    let mut timecode = None;

    for track in tracks.iter().filter(|t| t.kind == MediaKind::Video) {
        let mut config = TrackConfig::passthrough(MediaKind::Video);
        config.label = track.label.clone();
        let id = rewrite.writer.add_track(config)?;
        let output = rewrite.readers[0].add_output(track.id, ReadMode::Passthrough)?;
        pipes.push(Pipe::new("video", id, CopyTrack { reader: 0, output }));
        videos.push(id);
    }

    let mut mix_inputs = vec![];
    let mut originals = vec![];
    for (track, label) in audio_tracks.iter().zip(&labels) {
        let output = rewrite.readers[0].add_output(track.id, ReadMode::Pcm(PcmFormat::CANONICAL))?;
        let mix_output =
            rewrite.readers[0].add_output(track.id, ReadMode::Pcm(PcmFormat::CANONICAL))?;
        mix_inputs.push(MixInput::new(0, mix_output, options.gain_for(label)));
        originals.push((output, label.clone()));
    }

    let add_master = |rewrite: &mut Rewrite<B>,
                      pipes: &mut Vec<Pipe<B::Reader>>,
                      inputs: Vec<MixInput>|
     -> Result<(), PostProcessError> {
        let config = TrackConfig::new(MediaKind::Audio, TrackSettings::audio(false))
            .with_label(TrackLabel::master());
        let id = rewrite.writer.add_track(config)?;
        pipes.push(Pipe::new(
            "master",
            id,
            MixFeed::new(inputs, PcmFormat::CANONICAL, options.limiter),
        ));
        Ok(())
    };

    if options.position == MasterPosition::First {
        add_master(&mut rewrite, &mut pipes, std::mem::take(&mut mix_inputs))?;
    }
    for (output, label) in originals {
        let config =
            TrackConfig::new(MediaKind::Audio, TrackSettings::audio(false)).with_label(label);
        let id = rewrite.writer.add_track(config)?;
        pipes.push(Pipe::new("audio", id, CopyTrack { reader: 0, output }));
    }
    if options.position == MasterPosition::Last {
        add_master(&mut rewrite, &mut pipes, mix_inputs)?;
    }

    for track in tracks.iter().filter(|t| t.kind == MediaKind::Timecode) {
        let id = rewrite
            .writer
            .add_track(TrackConfig::passthrough(MediaKind::Timecode))?;
        let output = rewrite.readers[0].add_output(track.id, ReadMode::Passthrough)?;
        pipes.push(Pipe::new("timecode", id, CopyTrack { reader: 0, output }));
        timecode.get_or_insert(id);
    }

    if let Some(timecode) = timecode {
        for video in &videos {
            rewrite.writer.associate_timecode(*video, timecode)?;
        }
    }
    rewrite.writer.set_metadata(&metadata)?;

    info!(sources = audio_tracks.len(), position = ?options.position, "Mixing master track");
    rewrite.start(session_start)?;
    rewrite.run(pipes, end, None).await?;

    Ok(RewriteOutcome::Rewritten)
}

/// A decoded run of canonical PCM positioned on the sample-index timeline.
struct Segment {
    start: i64,
    frames: usize,
    samples: Vec<f32>,
}

impl Segment {
    fn end(&self) -> i64 {
        self.start + self.frames as i64
    }
}

pub(crate) struct MixInput {
    reader: usize,
    output: OutputId,
    gain: f32,
    segments: VecDeque<Segment>,
    read_end: Option<i64>,
    eos: bool,
}

impl MixInput {
    pub fn new(reader: usize, output: OutputId, gain: f32) -> Self {
        Self {
            reader,
            output,
            gain,
            segments: VecDeque::new(),
            read_end: None,
            eos: false,
        }
    }

    /// Decodes one more sample. Anything overlapping what was already read
    /// is trimmed so segments stay strictly ordered.
    fn read_one<R: ContainerReader>(
        &mut self,
        readers: &mut [R],
        format: PcmFormat,
    ) -> Result<(), PostProcessError> {
        let Some(sample) = readers[self.reader].next_sample(self.output)? else {
            self.eos = true;
            return Ok(());
        };
        let Some(chunk) = sample.pcm() else {
            warn!(output = ?self.output, "Mix input produced a non-PCM sample");
            return Ok(());
        };

        let chunk = chunk.convert(format);
        let channels = format.channels as usize;
        let mut start = sample.pts().to_sample_index(format.sample_rate);
        let mut samples = chunk.samples;

        if let Some(read_end) = self.read_end
            && start < read_end
        {
            let skip = ((read_end - start) as usize).min(samples.len() / channels);
            samples.drain(..skip * channels);
            start = read_end;
        }

        let frames = samples.len() / channels;
        if frames == 0 {
            return Ok(());
        }

        let segment = Segment {
            start,
            frames,
            samples,
        };
        self.read_end = Some(segment.end());
        self.segments.push_back(segment);
        Ok(())
    }

    fn covers(&self, index: i64) -> bool {
        self.eos || self.read_end.is_some_and(|end| end >= index)
    }
}

/// Pulls every mix input forward in lockstep and emits fixed-size master
/// chunks once all live inputs have decoded far enough to cover them.
pub(crate) struct MixFeed {
    inputs: Vec<MixInput>,
    format: PcmFormat,
    limiter: bool,
    cursor: Option<i64>,
}

impl MixFeed {
    pub fn new(inputs: Vec<MixInput>, format: PcmFormat, limiter: bool) -> Self {
        Self {
            inputs,
            format,
            limiter,
            cursor: None,
        }
    }

    fn next_chunk<R: ContainerReader>(
        &mut self,
        readers: &mut [R],
    ) -> Result<Option<(MediaTime, PcmChunk)>, PostProcessError> {
        let cursor = loop {
            if let Some(cursor) = self.cursor {
                break cursor;
            }

            let mut read = false;
            for input in &mut self.inputs {
                if input.segments.is_empty() && !input.eos {
                    input.read_one(readers, self.format)?;
                    read = true;
                }
            }
            if read {
                continue;
            }

            match self
                .inputs
                .iter()
                .filter_map(|input| input.segments.front().map(|s| s.start))
                .min()
            {
                Some(start) => self.cursor = Some(start),
                None => return Ok(None),
            }
        };

        let target = cursor + MIX_CHUNK_FRAMES as i64;
        while let Some(input) = self.inputs.iter_mut().find(|input| !input.covers(target)) {
            input.read_one(readers, self.format)?;
        }

        let tail = self
            .inputs
            .iter()
            .filter_map(|input| input.read_end)
            .max()
            .unwrap_or(cursor);
        let chunk_end = target.min(tail);
        if chunk_end <= cursor {
            return Ok(None);
        }

        let chunk = self.mix(cursor, chunk_end);
        for input in &mut self.inputs {
            while input
                .segments
                .front()
                .is_some_and(|segment| segment.end() <= chunk_end)
            {
                input.segments.pop_front();
            }
        }
        self.cursor = Some(chunk_end);

        Ok(Some((
            MediaTime::from_sample_index(cursor, self.format.sample_rate),
            chunk,
        )))
    }

    /// Sums `[from, to)` across inputs, scaled per frame by the number of
    /// inputs that actually have audio there.
    fn mix(&self, from: i64, to: i64) -> PcmChunk {
        let channels = self.format.channels as usize;
        let frames = (to - from) as usize;
        let mut sum = vec![0.0f32; frames * channels];
        let mut active = vec![0u32; frames];

        for input in &self.inputs {
            for segment in &input.segments {
                let overlap_start = segment.start.max(from);
                let overlap_end = segment.end().min(to);

                for index in overlap_start..overlap_end {
                    let out = (index - from) as usize;
                    let src = (index - segment.start) as usize;
                    active[out] += 1;

                    for channel in 0..channels {
                        sum[out * channels + channel] +=
                            segment.samples[src * channels + channel] * input.gain;
                    }
                }
            }
        }

        for (frame, count) in active.iter().enumerate() {
            let scale = if *count > 0 { 1.0 / *count as f32 } else { 0.0 };
            for value in &mut sum[frame * channels..(frame + 1) * channels] {
                *value = limit(*value * scale, self.limiter);
            }
        }

        PcmChunk::new(self.format, sum)
    }
}

impl<R: ContainerReader> PipeSource<R> for MixFeed {
    fn pull(&mut self, readers: &mut [R]) -> Result<Option<Payload<R::Sample>>, PostProcessError> {
        Ok(self
            .next_chunk(readers)?
            .map(|(pts, chunk)| Payload::Pcm(pts, chunk)))
    }
}

/// Keeps a mixed sample inside `[-1, 1]`. The soft limiter compresses
/// everything above -1 dBFS before the final clip.
pub fn limit(sample: f32, soft: bool) -> f32 {
    if sample.is_nan() {
        return 0.0;
    }

    let magnitude = sample.abs();
    let shaped = if soft && magnitude > SOFT_KNEE {
        let range = 1.0 - SOFT_KNEE;
        let over = magnitude - SOFT_KNEE;
        (SOFT_KNEE + range * over / (over + range)).copysign(sample)
    } else {
        sample
    };

    shaped.clamp(-1.0, 1.0)
}
