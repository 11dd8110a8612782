//! Pipeline coordinator
//!
//! Builds the fixed graph of one transmission,
//! decode → {dither, spectrum} → transfer → sink, runs every stage on its
//! own blocking thread and joins them all before reporting.

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use log::{info, warn};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::decode_stage::DecodeStage;
use super::health::{HealthMonitor, HealthSummary, PipelineHealth};
use super::stage::{CompletionFlag, PipelineStage, StageContext};
use super::state::PipelineState;
use super::transfer_stage::{TransferSettings, TransferStage};
use super::transform_stage::TransformStage;
use super::types::MediaKind;
use crate::assets::{HEALTH_INTERVAL, STALL_THRESHOLD};
use crate::channel::BoundedChannel;
use crate::config::RunConfig;
use crate::decoder::{MediaInfo, MediaSource};
use crate::dither::Ditherer;
use crate::error::{PipelineError, Result};
use crate::sink::OutputSink;
use crate::spectrum::SpectralPeakExtractor;
use crate::utils::sos::SignalOfStop;

/// Lets another thread (e.g. a signal handler) end a run
#[derive(Clone)]
pub struct StopHandle {
    requested: CompletionFlag,
    abort: SignalOfStop,
}

impl StopHandle {
    /// End the input and let every stage drain what is already queued
    pub fn request_stop(&self) {
        self.requested.set();
    }

    /// Wake every stage and stop at once
    pub fn abort(&self) {
        self.abort.cancel();
    }

}

/// Outcome of a completed run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunReport {
    pub summary: HealthSummary,
    pub elapsed: Duration,
}

impl fmt::Display for RunReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = &self.summary;
        write!(
            f,
            "{} packets ({} bytes) in {:.1?}: {} frames dithered, {} windows analyzed, {} items discarded, {} sink failures",
            s.packets_sent,
            s.bytes_sent,
            self.elapsed,
            s.frames_dithered,
            s.windows_analyzed,
            s.units_discarded,
            s.sink_failures
        )
    }
}

/// Cancels the run if a stage thread unwinds, so its peers are not left
/// waiting on a channel nobody serves
struct AbortOnPanic(SignalOfStop);

impl Drop for AbortOnPanic {
    fn drop(&mut self) {
        if std::thread::panicking() {
            self.0.cancel();
        }
    }
}

pub struct PipelineCoordinator {
    info: MediaInfo,
    state: PipelineState,
    health: Arc<PipelineHealth>,
    stop: SignalOfStop,
    stop_requested: CompletionFlag,
    stages: Vec<Box<dyn PipelineStage>>,
    stall_threshold: Duration,
}

impl PipelineCoordinator {
    /// Validate `config` against the source and wire up every stage.
    ///
    /// Configuration errors surface here, before any thread is started.
    pub fn new<S, O>(config: &RunConfig, source: S, sink: O) -> Result<Self>
    where
        S: MediaSource + 'static,
        O: OutputSink + 'static,
    {
        let mut state = PipelineState::Idle;
        Self::transition(&mut state, PipelineState::Initializing);

        config.validate()?;
        let info = source.info();
        info!("PipelineCoordinator: source {}", info);

        if info.frame_len() > config.capacities.video {
            return Err(PipelineError::config(format!(
                "video channel capacity {} cannot hold one {}x{} frame",
                config.capacities.video, info.width, info.height
            )));
        }

        let ditherer = Ditherer::new(
            info.width,
            info.height,
            config.video_out_width,
            config.video_out_height,
        )?;
        let extractor = SpectralPeakExtractor::new(
            info.sample_rate,
            config.tone_rate(),
            config.spectral_threshold,
        )?;
        if extractor.window_len() > config.capacities.audio {
            return Err(PipelineError::config(format!(
                "audio channel capacity {} cannot hold one window of {} samples ({} Hz at {} tones/s)",
                config.capacities.audio,
                extractor.window_len(),
                info.sample_rate,
                config.tone_rate()
            )));
        }

        if config.video_frame_byte_count != ditherer.bitmap_len() {
            warn!(
                "PipelineCoordinator: packet carries {} bitmap bytes but a bitmap is {} bytes",
                config.video_frame_byte_count,
                ditherer.bitmap_len()
            );
        }
        if (config.framerate - info.framerate).abs() > f64::EPSILON {
            info!(
                "PipelineCoordinator: pacing at {:.3} fps (source {:.3} fps)",
                config.framerate, info.framerate
            );
        }
        if let Some(baudrate) = config.baudrate {
            let required = config.required_line_rate();
            if required > baudrate as f64 {
                warn!(
                    "PipelineCoordinator: {:.0} baud needed but the line runs at {} baud, packets will back up",
                    required, baudrate
                );
            }
        }

        let health = Arc::new(PipelineHealth::new());
        let stop = SignalOfStop::new();
        let ctx = StageContext::new(stop.clone(), health.clone());
        let caps = &config.capacities;

        let video = BoundedChannel::new("video", caps.video);
        let audio = BoundedChannel::new("audio", caps.audio);
        let bitmap = BoundedChannel::new("bitmap", caps.bitmap);
        let tone = BoundedChannel::new("tone", caps.tone);

        let stop_requested = CompletionFlag::new();
        let decode_done = CompletionFlag::new();
        let dither_done = CompletionFlag::new();
        let spectrum_done = CompletionFlag::new();

        let stages: Vec<Box<dyn PipelineStage>> = vec![
            Box::new(DecodeStage::new(
                source,
                video.clone(),
                audio.clone(),
                stop_requested.clone(),
                decode_done.clone(),
                ctx.clone(),
            )),
            Box::new(TransformStage::new(
                MediaKind::Video.stage_name(),
                MediaKind::Video,
                ditherer,
                video,
                bitmap.clone(),
                decode_done.clone(),
                dither_done.clone(),
                ctx.clone(),
            )),
            Box::new(TransformStage::new(
                MediaKind::Audio.stage_name(),
                MediaKind::Audio,
                extractor,
                audio,
                tone.clone(),
                decode_done,
                spectrum_done.clone(),
                ctx.clone(),
            )),
            Box::new(TransferStage::new(
                bitmap,
                tone,
                dither_done,
                spectrum_done,
                CompletionFlag::new(),
                sink,
                TransferSettings {
                    frame_bytes: config.video_frame_byte_count,
                    audio_bytes: config.audio_byte_count,
                    framerate: config.framerate,
                    max_sink_failures: config.max_sink_failures,
                },
                ctx,
            )),
        ];

        Ok(Self {
            info,
            state,
            health,
            stop,
            stop_requested,
            stages,
            // a slow packet rate alone must not read as a stall
            stall_threshold: STALL_THRESHOLD.max(config.frame_period() * 4),
        })
    }

    fn transition(state: &mut PipelineState, next: PipelineState) {
        if state.can_transition_to(&next) {
            *state = next;
        } else {
            warn!("PipelineCoordinator: invalid transition {} -> {}", state, next);
        }
    }

    pub fn state(&self) -> PipelineState {
        self.state
    }

    pub fn stop_handle(&self) -> StopHandle {
        StopHandle {
            requested: self.stop_requested.clone(),
            abort: self.stop.clone(),
        }
    }

    /// Run every stage to completion.
    ///
    /// All stage threads are joined before returning. The first stage
    /// failure trips the run-wide stop signal and is returned once.
    pub async fn run(mut self) -> Result<RunReport> {
        Self::transition(
            &mut self.state,
            PipelineState::Running {
                started_at: Instant::now(),
            },
        );
        info!("PipelineCoordinator: pipeline started ({})", self.info);

        let cancel = CancellationToken::new();
        let (alert_tx, mut alert_rx) = mpsc::channel(16);
        let monitor = HealthMonitor::new(self.health.clone(), alert_tx)
            .with_check_interval(HEALTH_INTERVAL)
            .with_stall_threshold(self.stall_threshold);
        let monitor_task = {
            let cancel = cancel.clone();
            tokio::spawn(async move { monitor.run(cancel).await })
        };
        let log_task = {
            let cancel = cancel.clone();
            let health = self.health.clone();
            let period = HEALTH_INTERVAL;
            tokio::spawn(async move {
                let mut interval = tokio::time::interval(period);
                interval.tick().await;
                loop {
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = interval.tick() => info!("Pipeline {}", health.summary()),
                        Some(alert) = alert_rx.recv() => warn!("Pipeline health alert: {}", alert),
                    }
                }
            })
        };

        let mut handles = Vec::with_capacity(self.stages.len());
        for mut stage in self.stages.drain(..) {
            let stop = self.stop.clone();
            let name = stage.name();
            let handle = tokio::task::spawn_blocking(move || {
                let _abort = AbortOnPanic(stop.clone());
                let result = stage.run().map_err(|e| e.in_stage(name));
                if result.is_err() {
                    stop.cancel();
                }
                result
            });
            handles.push((name, handle));
        }

        let mut first_error = None;
        for (name, handle) in handles {
            let outcome = match handle.await {
                Ok(result) => result,
                Err(join_error) => {
                    self.stop.cancel();
                    Err(PipelineError::resource(format!("stage panicked: {}", join_error))
                        .in_stage(name))
                }
            };
            if let Err(e) = outcome {
                first_error.get_or_insert(e);
            }
        }

        let elapsed = match self.state {
            PipelineState::Running { started_at } => started_at.elapsed(),
            _ => Duration::ZERO,
        };
        Self::transition(&mut self.state, PipelineState::Stopping);
        cancel.cancel();
        let _ = monitor_task.await;
        let _ = log_task.await;
        Self::transition(&mut self.state, PipelineState::Stopped);

        let report = RunReport {
            summary: self.health.summary(),
            elapsed,
        };
        info!("PipelineCoordinator: pipeline stopped, {}", report);

        match first_error {
            Some(e) => Err(e),
            None => Ok(report),
        }
    }
}
