use super::{MediaInfo, MediaSource, MediaUnit};
use crate::assets::FRAMERATE_PROBE_FRAMES;
use crate::error::{PipelineError, Result};
use ac_ffmpeg::codec::Decoder;
use ac_ffmpeg::codec::audio::{AudioDecoder, AudioFrame};
use ac_ffmpeg::codec::video::frame::get_pixel_format;
use ac_ffmpeg::codec::video::{PixelFormat, VideoDecoder, VideoFrame, VideoFrameScaler};
use ac_ffmpeg::format::demuxer::{Demuxer, DemuxerWithStreamInfo};
use ac_ffmpeg::format::io::IO;
use std::collections::VecDeque;
use std::fs::File;
use std::path::Path;

/// Demuxes and decodes a media file with FFmpeg.
///
/// Video frames are converted to 8-bit gray at the stream's native size,
/// audio to mono i16 by averaging channels. The sample rate is kept.
pub struct FfmpegSource {
    demuxer: DemuxerWithStreamInfo<File>,
    video_index: usize,
    audio_index: usize,
    video_decoder: VideoDecoder,
    audio_decoder: AudioDecoder,
    scaler: Option<GrayScaler>,
    gray_format: PixelFormat,
    info: MediaInfo,
    pending: VecDeque<MediaUnit>,
    /// Presentation times of the first video frames, kept while probing
    probe_pts: Option<Vec<f64>>,
    finished: bool,
}

// FFmpeg contexts are owned exclusively by the decode stage thread
unsafe impl Send for FfmpegSource {}

struct GrayScaler {
    scaler: VideoFrameScaler,
    source: (PixelFormat, usize, usize),
}

impl FfmpegSource {
    /// Open `path`. Without `framerate` the rate is probed from the
    /// timestamps of the first decoded frames.
    pub fn open(path: &Path, framerate: Option<f64>) -> Result<Self> {
        if path.is_dir() {
            return Err(PipelineError::config(format!(
                "{} is a directory",
                path.display()
            )));
        }
        let file = File::open(path).map_err(|e| {
            PipelineError::config(format!("unable to open {}: {}", path.display(), e))
        })?;

        let io = IO::from_seekable_read_stream(file);
        let demuxer = Demuxer::builder()
            .build(io)?
            .find_stream_info(None)
            .map_err(|(_, err)| err)?;

        let streams = demuxer.streams();
        let video_index = streams
            .iter()
            .position(|s| s.codec_parameters().is_video_codec())
            .ok_or_else(|| {
                PipelineError::config(format!("{} has no video stream", path.display()))
            })?;
        let audio_index = streams
            .iter()
            .position(|s| s.codec_parameters().is_audio_codec())
            .ok_or_else(|| {
                PipelineError::config(format!("{} has no audio stream", path.display()))
            })?;

        let video_params = streams[video_index].codec_parameters();
        let video_params = video_params
            .as_video_codec_parameters()
            .ok_or_else(|| PipelineError::config("video stream without video parameters"))?;
        let (width, height) = (video_params.width() as u32, video_params.height() as u32);

        let audio_params = streams[audio_index].codec_parameters();
        let sample_rate = audio_params
            .as_audio_codec_parameters()
            .map(|p| p.sample_rate())
            .ok_or_else(|| PipelineError::config("audio stream without audio parameters"))?;

        let video_decoder = VideoDecoder::from_stream(&streams[video_index])?.build()?;
        let audio_decoder = AudioDecoder::from_stream(&streams[audio_index])?.build()?;

        let mut source = Self {
            demuxer,
            video_index,
            audio_index,
            video_decoder,
            audio_decoder,
            scaler: None,
            gray_format: get_pixel_format("gray"),
            info: MediaInfo {
                width,
                height,
                framerate: framerate.unwrap_or(0.0),
                sample_rate,
            },
            pending: VecDeque::new(),
            probe_pts: None,
            finished: false,
        };

        if framerate.is_none() {
            source.info.framerate = source.probe_framerate()?;
            log::info!("Decoder: probed frame rate {:.3} fps", source.info.framerate);
        }

        Ok(source)
    }

    /// Decode ahead until enough video frames are buffered to measure the
    /// frame interval. Decoded units stay queued for `next_unit`.
    fn probe_framerate(&mut self) -> Result<f64> {
        self.probe_pts = Some(Vec::with_capacity(FRAMERATE_PROBE_FRAMES));
        while !self.finished
            && self
                .probe_pts
                .as_ref()
                .is_some_and(|pts| pts.len() < FRAMERATE_PROBE_FRAMES)
        {
            self.pump()?;
        }

        let pts = self.probe_pts.take().unwrap_or_default();
        framerate_from_pts(&pts).ok_or_else(|| {
            PipelineError::config("unable to determine the frame rate, pass --framerate")
        })
    }

    /// Feed one demuxed packet to its decoder and queue whatever it yields.
    /// At end of input both decoders are flushed.
    fn pump(&mut self) -> Result<()> {
        match self.demuxer.take()? {
            Some(packet) => {
                let index = packet.stream_index();
                if index == self.video_index {
                    self.video_decoder.push(packet)?;
                    self.drain_video()?;
                } else if index == self.audio_index {
                    self.audio_decoder.push(packet)?;
                    self.drain_audio()?;
                }
            }
            None => {
                self.video_decoder.flush()?;
                self.drain_video()?;
                self.audio_decoder.flush()?;
                self.drain_audio()?;
                self.finished = true;
            }
        }
        Ok(())
    }

    fn drain_video(&mut self) -> Result<()> {
        while let Some(frame) = self.video_decoder.take()? {
            if let Some(pts) = self.probe_pts.as_mut() {
                if let Some(t) = frame.pts().as_f64() {
                    pts.push(t);
                }
            }
            let gray = self.to_gray(&frame)?;
            self.pending.push_back(MediaUnit::Video(gray));
        }
        Ok(())
    }

    fn drain_audio(&mut self) -> Result<()> {
        while let Some(frame) = self.audio_decoder.take()? {
            let mut samples = Vec::with_capacity(frame.samples());
            downmix(&frame, &mut samples)?;
            if !samples.is_empty() {
                self.pending.push_back(MediaUnit::Audio(samples));
            }
        }
        Ok(())
    }

    /// Convert a decoded frame to a contiguous gray buffer of the stream size
    fn to_gray(&mut self, frame: &VideoFrame) -> Result<Vec<u8>> {
        let source = (frame.pixel_format(), frame.width(), frame.height());
        let (width, height) = (self.info.width as usize, self.info.height as usize);

        let rebuild = self
            .scaler
            .as_ref()
            .is_none_or(|s| s.source != source);
        if rebuild {
            let scaler = VideoFrameScaler::builder()
                .source_pixel_format(source.0)
                .source_width(source.1)
                .source_height(source.2)
                .target_pixel_format(self.gray_format)
                .target_width(width)
                .target_height(height)
                .build()
                .map_err(|e| PipelineError::resource(format!("gray scaler: {}", e)))?;
            self.scaler = Some(GrayScaler { scaler, source });
        }

        let scaler = self
            .scaler
            .as_mut()
            .ok_or_else(|| PipelineError::resource("gray scaler missing"))?;
        let gray = scaler.scaler.scale(frame)?;

        let planes = gray.planes();
        let plane = &planes[0];
        let mut out = vec![0u8; width * height];
        extract_plane(&mut out, plane.data(), plane.line_size(), width, height);
        Ok(out)
    }
}

impl MediaSource for FfmpegSource {
    fn info(&self) -> MediaInfo {
        self.info
    }

    fn next_unit(&mut self) -> Result<Option<MediaUnit>> {
        loop {
            if let Some(unit) = self.pending.pop_front() {
                return Ok(Some(unit));
            }
            if self.finished {
                return Ok(None);
            }
            self.pump()?;
        }
    }
}

/// Frames per second implied by a run of presentation times
fn framerate_from_pts(pts: &[f64]) -> Option<f64> {
    if pts.len() < 2 {
        return None;
    }
    let first = pts.iter().cloned().fold(f64::INFINITY, f64::min);
    let last = pts.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
    let span = last - first;
    if !span.is_finite() || span <= 0.0 {
        return None;
    }
    Some((pts.len() - 1) as f64 / span)
}

/// Copy a plane with row padding into a contiguous buffer
#[inline]
fn extract_plane(dst: &mut [u8], src: &[u8], stride: usize, width: usize, height: usize) {
    if stride == width && src.len() >= width * height {
        dst.copy_from_slice(&src[..width * height]);
        return;
    }

    for r in 0..height {
        let src_start = r * stride;
        let dst_start = r * width;
        if src_start + width > src.len() || dst_start + width > dst.len() {
            break;
        }
        dst[dst_start..dst_start + width].copy_from_slice(&src[src_start..src_start + width]);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SampleKind {
    U8,
    I16,
    I32,
    F32,
    F64,
}

impl SampleKind {
    fn width(self) -> usize {
        match self {
            SampleKind::U8 => 1,
            SampleKind::I16 => 2,
            SampleKind::I32 | SampleKind::F32 => 4,
            SampleKind::F64 => 8,
        }
    }

    /// Sample at `index` of `data`, scaled to the i16 range
    fn read(self, data: &[u8], index: usize) -> f64 {
        let at = index * self.width();
        let Some(bytes) = data.get(at..at + self.width()) else {
            return 0.0;
        };
        match self {
            SampleKind::U8 => (bytes[0] as f64 - 128.0) * 256.0,
            SampleKind::I16 => i16::from_ne_bytes([bytes[0], bytes[1]]) as f64,
            SampleKind::I32 => {
                i32::from_ne_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as f64 / 65536.0
            }
            SampleKind::F32 => {
                f32::from_ne_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as f64 * 32767.0
            }
            SampleKind::F64 => {
                let mut raw = [0u8; 8];
                raw.copy_from_slice(bytes);
                f64::from_ne_bytes(raw) * 32767.0
            }
        }
    }
}

/// Sample kind and planarity of an FFmpeg sample format name
fn sample_layout(name: &str) -> Option<(SampleKind, bool)> {
    let (base, planar) = match name.strip_suffix('p') {
        Some(base) => (base, true),
        None => (name, false),
    };
    let kind = match base {
        "u8" => SampleKind::U8,
        "s16" => SampleKind::I16,
        "s32" => SampleKind::I32,
        "flt" => SampleKind::F32,
        "dbl" => SampleKind::F64,
        _ => return None,
    };
    Some((kind, planar))
}

/// Average all channels of `frame` into mono i16 samples
fn downmix(frame: &AudioFrame, out: &mut Vec<i16>) -> Result<()> {
    let format = frame.sample_format();
    let (kind, planar) = sample_layout(format.name()).ok_or_else(|| {
        PipelineError::decode(format!("unsupported sample format {}", format.name()))
    })?;

    let samples = frame.samples();
    let channels = (frame.channel_layout().channels() as usize).max(1);
    let planes = frame.planes();

    for i in 0..samples {
        let mut sum = 0.0;
        for c in 0..channels {
            sum += if planar {
                planes.get(c).map_or(0.0, |p| kind.read(p.data(), i))
            } else {
                planes
                    .first()
                    .map_or(0.0, |p| kind.read(p.data(), i * channels + c))
            };
        }
        let mono = (sum / channels as f64).round();
        out.push(mono.clamp(i16::MIN as f64, i16::MAX as f64) as i16);
    }
    Ok(())
}
