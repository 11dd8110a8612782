//! Run configuration
//!
//! A `RunConfig` is fixed for the life of one transmission. It can be built
//! from defaults, loaded from a JSON file and overridden from the command
//! line; `validate` must pass before any stage is started.

use crate::assets::{
    AUDIO_BYTES, AUDIO_CHANNEL_CAPACITY, BITMAP_CHANNEL_CAPACITY, FRAME_BYTES, LINE_BITS_PER_BYTE,
    MAX_SINK_FAILURES, OUT_HEIGHT, OUT_WIDTH, TONE_CHANNEL_CAPACITY, VIDEO_CHANNEL_CAPACITY,
};
use crate::error::{PipelineError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Per-channel capacities, in units of the channel item type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChannelCapacities {
    /// Gray bytes queued between decoder and ditherer
    pub video: usize,
    /// PCM samples queued between decoder and spectral stage
    pub audio: usize,
    /// Packed bitmap bytes queued before the multiplexer
    pub bitmap: usize,
    /// Tone bytes queued before the multiplexer
    pub tone: usize,
}

impl Default for ChannelCapacities {
    fn default() -> Self {
        Self {
            video: VIDEO_CHANNEL_CAPACITY,
            audio: AUDIO_CHANNEL_CAPACITY,
            bitmap: BITMAP_CHANNEL_CAPACITY,
            tone: TONE_CHANNEL_CAPACITY,
        }
    }
}

/// Options recognized for one run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunConfig {
    pub video_out_width: u32,
    pub video_out_height: u32,
    /// Minimum spectral magnitude a bin needs to be reported as the tone
    pub spectral_threshold: f64,
    /// Output packets per second, normally the source frame rate
    pub framerate: f64,
    pub video_frame_byte_count: usize,
    pub audio_byte_count: usize,
    /// Line speed of the output device, only used to warn about overruns
    pub baudrate: Option<u32>,
    pub max_sink_failures: u32,
    pub capacities: ChannelCapacities,
}

impl RunConfig {
    pub fn new(framerate: f64, spectral_threshold: f64) -> Self {
        Self {
            video_out_width: OUT_WIDTH,
            video_out_height: OUT_HEIGHT,
            spectral_threshold,
            framerate,
            video_frame_byte_count: FRAME_BYTES,
            audio_byte_count: AUDIO_BYTES,
            baudrate: None,
            max_sink_failures: MAX_SINK_FAILURES,
            capacities: ChannelCapacities::default(),
        }
    }

    /// Size of one packed bitmap produced by the ditherer
    pub fn bitmap_len(&self) -> usize {
        self.video_out_width as usize * self.video_out_height as usize / 8
    }

    /// Size of one packet written to the sink
    pub fn packet_len(&self) -> usize {
        self.video_frame_byte_count + self.audio_byte_count
    }

    pub fn frame_period(&self) -> Duration {
        Duration::from_secs_f64(1.0 / self.framerate)
    }

    /// Tone bytes produced per second of audio; the integer part of the frame rate
    pub fn tone_rate(&self) -> u32 {
        self.framerate as u32
    }

    /// Bits per second the configured cadence needs on an 8N1 line
    pub fn required_line_rate(&self) -> f64 {
        self.packet_len() as f64 * LINE_BITS_PER_BYTE as f64 * self.framerate
    }

    pub fn validate(&self) -> Result<()> {
        if self.video_out_width == 0 || self.video_out_height == 0 {
            return Err(PipelineError::config(format!(
                "output size {}x{} must be positive",
                self.video_out_width, self.video_out_height
            )));
        }
        if self.video_out_height % 8 != 0 {
            return Err(PipelineError::config(format!(
                "output height {} is not a multiple of 8",
                self.video_out_height
            )));
        }
        if !self.framerate.is_finite() || self.framerate <= 0.0 {
            return Err(PipelineError::config(format!(
                "framerate {} must be positive",
                self.framerate
            )));
        }
        if !self.spectral_threshold.is_finite() || self.spectral_threshold < 0.0 {
            return Err(PipelineError::config(format!(
                "spectral threshold {} must be a non-negative number",
                self.spectral_threshold
            )));
        }
        if self.video_frame_byte_count == 0 || self.audio_byte_count == 0 {
            return Err(PipelineError::config(
                "packet byte counts must be positive",
            ));
        }
        if self.max_sink_failures == 0 {
            return Err(PipelineError::config(
                "max sink failures must be positive",
            ));
        }

        let caps = &self.capacities;
        if caps.video == 0 || caps.audio == 0 || caps.bitmap == 0 || caps.tone == 0 {
            return Err(PipelineError::config("channel capacities must be positive"));
        }
        if self.bitmap_len() > caps.bitmap || self.video_frame_byte_count > caps.bitmap {
            return Err(PipelineError::config(format!(
                "bitmap channel capacity {} cannot hold one frame of {} bytes",
                caps.bitmap,
                self.bitmap_len().max(self.video_frame_byte_count)
            )));
        }
        if self.audio_byte_count > caps.tone {
            return Err(PipelineError::config(format!(
                "tone channel capacity {} cannot hold {} tone bytes",
                caps.tone, self.audio_byte_count
            )));
        }
        Ok(())
    }

    /// Load from a JSON file, using defaults for missing fields
    pub fn from_file(path: &Path, defaults: RunConfig) -> Result<Self> {
        Ok(PartialRunConfig::from_file(path)?.apply(defaults))
    }
}

/// Configuration file contents: every field optional
#[derive(Debug, Default, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PartialRunConfig {
    pub video_out_width: Option<u32>,
    pub video_out_height: Option<u32>,
    pub spectral_threshold: Option<f64>,
    pub framerate: Option<f64>,
    pub video_frame_byte_count: Option<usize>,
    pub audio_byte_count: Option<usize>,
    pub baudrate: Option<u32>,
    pub max_sink_failures: Option<u32>,
    pub capacities: Option<ChannelCapacities>,
}

impl PartialRunConfig {
    pub fn from_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            PipelineError::config(format!("unable to read {}: {}", path.display(), e))
        })?;
        serde_json::from_str(&text).map_err(|e| {
            PipelineError::config(format!("invalid config {}: {}", path.display(), e))
        })
    }

    /// Fields set in `other` win over fields set in `self`
    pub fn merge(self, other: PartialRunConfig) -> PartialRunConfig {
        PartialRunConfig {
            video_out_width: other.video_out_width.or(self.video_out_width),
            video_out_height: other.video_out_height.or(self.video_out_height),
            spectral_threshold: other.spectral_threshold.or(self.spectral_threshold),
            framerate: other.framerate.or(self.framerate),
            video_frame_byte_count: other
                .video_frame_byte_count
                .or(self.video_frame_byte_count),
            audio_byte_count: other.audio_byte_count.or(self.audio_byte_count),
            baudrate: other.baudrate.or(self.baudrate),
            max_sink_failures: other.max_sink_failures.or(self.max_sink_failures),
            capacities: other.capacities.or(self.capacities),
        }
    }

    pub fn apply(self, mut base: RunConfig) -> RunConfig {
        if let Some(v) = self.video_out_width {
            base.video_out_width = v;
        }
        if let Some(v) = self.video_out_height {
            base.video_out_height = v;
        }
        if let Some(v) = self.spectral_threshold {
            base.spectral_threshold = v;
        }
        if let Some(v) = self.framerate {
            base.framerate = v;
        }
        if let Some(v) = self.video_frame_byte_count {
            base.video_frame_byte_count = v;
        }
        if let Some(v) = self.audio_byte_count {
            base.audio_byte_count = v;
        }
        if self.baudrate.is_some() {
            base.baudrate = self.baudrate;
        }
        if let Some(v) = self.max_sink_failures {
            base.max_sink_failures = v;
        }
        if let Some(v) = self.capacities {
            base.capacities = v;
        }
        base
    }
}

/// Returns the version as specified in Cargo.toml
pub fn app_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

pub fn app_name() -> &'static str {
    env!("CARGO_PKG_NAME")
}
