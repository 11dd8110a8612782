//! Generic transform stage
//!
//! Pulls fixed-size units from its input channel, converts each with a
//! [`Transform`] and pushes the result downstream. Once the upstream stage
//! has completed and less than one unit is queued, the leftover partial unit
//! is discarded and the stage completes.

use std::time::Duration;

use log::info;

use super::stage::{CompletionFlag, PipelineStage, StageContext, StageTracker, admitted};
use super::state::StageState;
use super::types::MediaKind;
use crate::channel::BoundedChannel;
use crate::error::{PipelineError, Result};

/// Conversion of one fixed-size unit of input into some output
pub trait Transform: Send {
    type Input: Clone + Send + 'static;
    type Output: Clone + Send + 'static;

    /// Items consumed per call to `apply`
    fn unit_len(&self) -> usize;

    /// Convert exactly `unit_len()` items, appending the result to `out`
    fn apply(&mut self, unit: &[Self::Input], out: &mut Vec<Self::Output>) -> Result<()>;
}

pub struct TransformStage<T: Transform> {
    name: &'static str,
    kind: MediaKind,
    transform: T,
    input: BoundedChannel<T::Input>,
    output: BoundedChannel<T::Output>,
    upstream_done: CompletionFlag,
    done: CompletionFlag,
    ctx: StageContext,
    input_poll: Duration,
    output_poll: Duration,
}

impl<T: Transform> TransformStage<T> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        name: &'static str,
        kind: MediaKind,
        transform: T,
        input: BoundedChannel<T::Input>,
        output: BoundedChannel<T::Output>,
        upstream_done: CompletionFlag,
        done: CompletionFlag,
        ctx: StageContext,
    ) -> Self {
        Self {
            name,
            kind,
            transform,
            input,
            output,
            upstream_done,
            done,
            ctx,
            input_poll: crate::assets::INPUT_POLL,
            output_poll: match kind {
                MediaKind::Video => crate::assets::VIDEO_OUTPUT_POLL,
                MediaKind::Audio => crate::assets::AUDIO_OUTPUT_POLL,
            },
        }
    }
}

impl<T: Transform> PipelineStage for TransformStage<T> {
    fn run(&mut self) -> Result<()> {
        let _done = self.done.guard();
        let mut tracker = StageTracker::new(self.name);

        let unit_len = self.transform.unit_len();
        if unit_len == 0 {
            return Err(PipelineError::config("transform unit length is zero"));
        }

        let mut unit = Vec::with_capacity(unit_len);
        let mut produced = Vec::new();
        let mut converted = 0u64;

        info!("{}: started ({} items per unit)", self.name, unit_len);

        loop {
            unit.clear();
            if self.input.pop_exact(unit_len, &mut unit) {
                produced.clear();
                self.transform.apply(&unit, &mut produced)?;
                if !admitted(self.output.push_all(&produced, &self.ctx.stop, self.output_poll))? {
                    return Ok(());
                }
                self.ctx.health.record_unit(self.kind);
                converted += 1;
                continue;
            }

            if self.upstream_done.is_set() {
                // the last unit may have landed between the pop and the flag read
                if self.input.len() >= unit_len {
                    continue;
                }
                tracker.advance(StageState::Draining);
                let discarded = self.input.clear();
                if discarded > 0 {
                    self.ctx.health.record_discarded(discarded);
                    info!(
                        "{}: discarded {} trailing items of a partial unit",
                        self.name, discarded
                    );
                }
                break;
            }

            if self.ctx.stop.wait_timeout(self.input_poll) {
                return Ok(());
            }
        }

        tracker.advance(StageState::Done);
        info!(
            "{}: finished, {} {} converted",
            self.name,
            converted,
            self.kind.unit_name()
        );
        Ok(())
    }

    fn name(&self) -> &'static str {
        self.name
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dither::Ditherer;
    use crate::pipeline::health::PipelineHealth;
    use crate::spectrum::SpectralPeakExtractor;
    use crate::utils::sos::SignalOfStop;
    use std::sync::Arc;
    use std::thread;

    const POLL: Duration = Duration::from_micros(100);

    fn context() -> StageContext {
        StageContext::new(SignalOfStop::new(), Arc::new(PipelineHealth::new()))
    }

    /// Sums each unit into one output item
    struct Sum(usize);

    impl Transform for Sum {
        type Input = u8;
        type Output = u32;

        fn unit_len(&self) -> usize {
            self.0
        }

        fn apply(&mut self, unit: &[u8], out: &mut Vec<u32>) -> Result<()> {
            out.push(unit.iter().map(|&v| v as u32).sum());
            Ok(())
        }
    }

    struct Failing;

    impl Transform for Failing {
        type Input = u8;
        type Output = u8;

        fn unit_len(&self) -> usize {
            2
        }

        fn apply(&mut self, _unit: &[u8], _out: &mut Vec<u8>) -> Result<()> {
            Err(PipelineError::resource("scaler unavailable"))
        }
    }

    #[test]
    fn test_partial_unit_discarded_on_shutdown() {
        let ctx = context();
        let input = BoundedChannel::new("in", 64);
        let output = BoundedChannel::new("out", 64);
        let upstream = CompletionFlag::new();
        let done = CompletionFlag::new();

        // one and a half units
        input.push_all(&[1u8, 2, 3, 4, 5, 6], &ctx.stop, POLL).unwrap();
        upstream.set();

        let mut stage = TransformStage::new(
            "SumStage",
            MediaKind::Video,
            Sum(4),
            input.clone(),
            output.clone(),
            upstream,
            done.clone(),
            ctx.clone(),
        );
        stage.run().unwrap();

        assert!(done.is_set());
        assert_eq!(output.pop(), Some(10));
        assert!(output.is_empty());
        assert!(input.is_empty());
        assert_eq!(ctx.health.frames_dithered(), 1);
        assert_eq!(ctx.health.units_discarded(), 2);
    }

    #[test]
    fn test_streams_until_upstream_completes() {
        let ctx = context();
        let input = BoundedChannel::new("in", 8);
        let output = BoundedChannel::new("out", 4);
        let upstream = CompletionFlag::new();
        let done = CompletionFlag::new();

        let mut stage = TransformStage::new(
            "SumStage",
            MediaKind::Audio,
            Sum(2),
            input.clone(),
            output.clone(),
            upstream.clone(),
            done.clone(),
            ctx.clone(),
        );
        let worker = thread::spawn(move || stage.run());

        let producer = {
            let input = input.clone();
            let stop = ctx.stop.clone();
            thread::spawn(move || {
                for i in 0..100u8 {
                    input.push_all(&[i, i], &stop, POLL).unwrap();
                }
                upstream.set();
            })
        };

        let mut sums = Vec::new();
        while !(done.is_set() && output.is_empty()) {
            match output.pop() {
                Some(v) => sums.push(v),
                None => thread::sleep(POLL),
            }
        }
        producer.join().unwrap();
        worker.join().unwrap().unwrap();

        assert_eq!(sums, (0..100u32).map(|i| i * 2).collect::<Vec<_>>());
        assert_eq!(ctx.health.windows_analyzed(), 100);
        assert_eq!(ctx.health.units_discarded(), 0);
    }

    #[test]
    fn test_transform_failure_propagates() {
        let ctx = context();
        let input = BoundedChannel::new("in", 8);
        let output = BoundedChannel::new("out", 8);
        let done = CompletionFlag::new();
        input.push_all(&[0u8, 0], &ctx.stop, POLL).unwrap();

        let mut stage = TransformStage::new(
            "FailingStage",
            MediaKind::Video,
            Failing,
            input,
            output.clone(),
            CompletionFlag::new(),
            done.clone(),
            ctx,
        );

        let err = stage.run().unwrap_err();
        assert!(matches!(err, PipelineError::Resource(_)));
        assert!(output.is_empty());
        assert!(done.is_set());
    }

    #[test]
    fn test_stop_signal_ends_idle_stage() {
        let ctx = context();
        let done = CompletionFlag::new();
        let mut stage = TransformStage::new(
            "SumStage",
            MediaKind::Video,
            Sum(4),
            BoundedChannel::new("in", 8),
            BoundedChannel::new("out", 8),
            CompletionFlag::new(),
            done.clone(),
            ctx.clone(),
        );

        let worker = thread::spawn(move || stage.run());
        thread::sleep(Duration::from_millis(10));
        ctx.stop.cancel();

        assert!(worker.join().unwrap().is_ok());
        assert!(done.is_set());
    }

    #[test]
    fn test_dither_stage_emits_one_bitmap_per_frame() {
        let ctx = context();
        let input = BoundedChannel::new("video", 1024);
        let output = BoundedChannel::new("bitmap", 1024);
        let upstream = CompletionFlag::new();

        // two full 16x8 frames plus 40 stray bytes
        input.push_all(&[255u8; 128], &ctx.stop, POLL).unwrap();
        input.push_all(&[0u8; 128], &ctx.stop, POLL).unwrap();
        input.push_all(&[0u8; 40], &ctx.stop, POLL).unwrap();
        upstream.set();

        let mut stage = TransformStage::new(
            "DitherStage",
            MediaKind::Video,
            Ditherer::new(16, 8, 16, 8).unwrap(),
            input,
            output.clone(),
            upstream,
            CompletionFlag::new(),
            ctx.clone(),
        );
        stage.run().unwrap();

        let mut bitmaps = Vec::new();
        assert!(output.pop_exact(32, &mut bitmaps));
        assert!(output.is_empty());
        assert_eq!(&bitmaps[..16], &[0xFF; 16]);
        assert_eq!(&bitmaps[16..], &[0x00; 16]);
        assert_eq!(ctx.health.units_discarded(), 40);
    }

    #[test]
    fn test_short_audio_window_discarded() {
        let ctx = context();
        let input = BoundedChannel::new("audio", 1024);
        let output = BoundedChannel::new("tone", 16);
        let upstream = CompletionFlag::new();

        // 3000 Hz at 30 windows per second: 100 samples per window
        input.push_all(&[0i16; 250], &ctx.stop, POLL).unwrap();
        upstream.set();

        let mut stage = TransformStage::new(
            "SpectrumStage",
            MediaKind::Audio,
            SpectralPeakExtractor::new(3000, 30, 0.0).unwrap(),
            input.clone(),
            output.clone(),
            upstream,
            CompletionFlag::new(),
            ctx.clone(),
        );
        stage.run().unwrap();

        assert_eq!(output.len(), 2);
        assert!(input.is_empty());
        assert_eq!(ctx.health.windows_analyzed(), 2);
        assert_eq!(ctx.health.units_discarded(), 50);
    }
}
