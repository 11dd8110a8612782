//! Media decoding boundary
//!
//! A `MediaSource` yields the decoded media of one input, interleaved in
//! decode order: grayscale frames for the video path and mono 16-bit PCM
//! chunks for the audio path. The FFmpeg binding lives in [`ffmpeg`].

pub mod ffmpeg;

use crate::error::Result;
use std::fmt;

pub use ffmpeg::FfmpegSource;

/// Stream properties known before the first unit is decoded
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MediaInfo {
    pub width: u32,
    pub height: u32,
    pub framerate: f64,
    pub sample_rate: u32,
}

impl MediaInfo {
    /// Bytes in one gray frame
    pub fn frame_len(&self) -> usize {
        self.width as usize * self.height as usize
    }
}

impl fmt::Display for MediaInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}x{} @ {:.3} fps, {} Hz",
            self.width, self.height, self.framerate, self.sample_rate
        )
    }
}

/// One decoded unit
#[derive(Debug, Clone, PartialEq)]
pub enum MediaUnit {
    /// Row-major gray frame, one byte per pixel
    Video(Vec<u8>),
    /// Mono PCM samples
    Audio(Vec<i16>),
}

pub trait MediaSource: Send {
    fn info(&self) -> MediaInfo;

    /// Next decoded unit, `None` at end of stream
    fn next_unit(&mut self) -> Result<Option<MediaUnit>>;
}

impl<S: MediaSource + ?Sized> MediaSource for Box<S> {
    fn info(&self) -> MediaInfo {
        (**self).info()
    }

    fn next_unit(&mut self) -> Result<Option<MediaUnit>> {
        (**self).next_unit()
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use crate::error::PipelineError;
    use std::collections::VecDeque;

    /// Source replaying a fixed list of units, optionally failing at the end
    pub struct ScriptedSource {
        pub info: MediaInfo,
        pub units: VecDeque<MediaUnit>,
        pub fail_at_end: bool,
    }

    impl ScriptedSource {
        pub fn new(info: MediaInfo, units: Vec<MediaUnit>) -> Self {
            Self {
                info,
                units: units.into(),
                fail_at_end: false,
            }
        }

        /// `frames` uniform frames, each followed by one frame period of audio
        pub fn uniform(info: MediaInfo, frames: usize, gray: u8) -> Self {
            let samples_per_frame = (info.sample_rate as f64 / info.framerate) as usize;
            let mut units = Vec::with_capacity(frames * 2);
            for _ in 0..frames {
                units.push(MediaUnit::Video(vec![gray; info.frame_len()]));
                units.push(MediaUnit::Audio(vec![0; samples_per_frame]));
            }
            Self::new(info, units)
        }
    }

    impl MediaSource for ScriptedSource {
        fn info(&self) -> MediaInfo {
            self.info
        }

        fn next_unit(&mut self) -> Result<Option<MediaUnit>> {
            match self.units.pop_front() {
                Some(unit) => Ok(Some(unit)),
                None if self.fail_at_end => Err(PipelineError::decode("corrupt packet")),
                None => Ok(None),
            }
        }
    }
}
