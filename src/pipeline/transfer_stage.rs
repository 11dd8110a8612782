//! Transfer stage: merges bitmap and tone bytes into paced packets
//!
//! Every tick builds one packet of `frame_bytes` bitmap bytes followed by
//! `audio_bytes` tone bytes and hands it to the sink in one write. The
//! deadline of a tick is taken before any waiting, so packets leave at most
//! once per frame period.
//!
//! As soon as either path has completed with less than one packet's worth
//! queued, no further packet can be built: what remains is discarded (each
//! channel until its own producer has finished) and the stage completes.

use std::time::Duration;

use log::{info, warn};

use super::clock::FramePacer;
use super::stage::{CompletionFlag, PipelineStage, StageContext, StageTracker};
use super::state::StageState;
use crate::assets::TRANSFER_POLL;
use crate::channel::BoundedChannel;
use crate::error::{PipelineError, Result};
use crate::sink::OutputSink;

/// Packet layout and failure policy of the transfer stage
#[derive(Debug, Clone, Copy)]
pub struct TransferSettings {
    pub frame_bytes: usize,
    pub audio_bytes: usize,
    pub framerate: f64,
    pub max_sink_failures: u32,
}

pub struct TransferStage<O: OutputSink> {
    video: BoundedChannel<u8>,
    audio: BoundedChannel<u8>,
    video_done: CompletionFlag,
    audio_done: CompletionFlag,
    done: CompletionFlag,
    sink: O,
    settings: TransferSettings,
    pacer: FramePacer,
    ctx: StageContext,
    poll: Duration,
}

impl<O: OutputSink> TransferStage<O> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        video: BoundedChannel<u8>,
        audio: BoundedChannel<u8>,
        video_done: CompletionFlag,
        audio_done: CompletionFlag,
        done: CompletionFlag,
        sink: O,
        settings: TransferSettings,
        ctx: StageContext,
    ) -> Self {
        Self {
            video,
            audio,
            video_done,
            audio_done,
            done,
            sink,
            pacer: FramePacer::with_framerate(settings.framerate),
            settings,
            ctx,
            poll: TRANSFER_POLL,
        }
    }

    /// True once no further full packet can ever be built
    fn exhausted(&self) -> bool {
        (self.video_done.is_set() && self.video.len() < self.settings.frame_bytes)
            || (self.audio_done.is_set() && self.audio.len() < self.settings.audio_bytes)
    }

    fn packet_ready(&self) -> bool {
        self.video.len() >= self.settings.frame_bytes && self.audio.len() >= self.settings.audio_bytes
    }

    /// Wait for one packet's worth on both channels.
    /// `false` means the stream is exhausted or the run was stopped.
    fn wait_for_packet(&self) -> bool {
        loop {
            if self.exhausted() {
                return false;
            }
            if self.packet_ready() {
                return true;
            }
            if self.ctx.stop.wait_timeout(self.poll) {
                return false;
            }
        }
    }

    /// Move one packet's worth out of both channels into `packet`.
    /// Never leaves a partial packet behind in `packet`.
    fn take_packet(&self, packet: &mut Vec<u8>) -> Result<()> {
        packet.clear();
        let complete = self.video.pop_exact(self.settings.frame_bytes, packet)
            && self.audio.pop_exact(self.settings.audio_bytes, packet);
        if !complete {
            packet.clear();
            return Err(PipelineError::resource(format!(
                "packet channels hold {} bitmap and {} tone bytes, short of a {} + {} byte packet",
                self.video.len(),
                self.audio.len(),
                self.settings.frame_bytes,
                self.settings.audio_bytes
            )));
        }
        Ok(())
    }

    /// Discard whatever is still queued or still arriving on both channels
    fn drain(&self) {
        let mut discarded = 0;
        loop {
            let video_finished = self.video_done.is_set();
            let audio_finished = self.audio_done.is_set();
            discarded += self.video.clear() + self.audio.clear();
            if video_finished && audio_finished {
                break;
            }
            if self.ctx.stop.wait_timeout(self.poll) {
                break;
            }
        }
        if discarded > 0 {
            self.ctx.health.record_discarded(discarded);
            info!("TransferStage: discarded {} trailing bytes", discarded);
        }
    }
}

impl<O: OutputSink> PipelineStage for TransferStage<O> {
    fn run(&mut self) -> Result<()> {
        let _done = self.done.guard();
        let mut tracker = StageTracker::new("TransferStage");

        let packet_len = self.settings.frame_bytes + self.settings.audio_bytes;
        let mut packet = Vec::with_capacity(packet_len);
        let mut consecutive_failures: u32 = 0;
        let mut sent = 0u64;

        info!(
            "TransferStage: started ({} byte packets every {:?})",
            packet_len,
            self.pacer.period()
        );

        loop {
            let deadline = self.pacer.begin_tick();

            if !self.wait_for_packet() {
                break;
            }

            self.take_packet(&mut packet)?;

            match self.sink.write_packet(&packet) {
                Ok(()) => {
                    consecutive_failures = 0;
                    sent += 1;
                    self.ctx.health.record_packet(packet.len());
                }
                Err(e) => {
                    consecutive_failures += 1;
                    self.ctx.health.record_sink_failure();
                    warn!(
                        "TransferStage: packet lost, write failed ({}/{}): {}",
                        consecutive_failures, self.settings.max_sink_failures, e
                    );
                    if consecutive_failures >= self.settings.max_sink_failures {
                        return Err(PipelineError::SinkWrite(e));
                    }
                }
            }

            if self.pacer.wait_until(deadline, &self.ctx.stop) {
                return Ok(());
            }
        }

        if self.ctx.stop.cancelled() {
            return Ok(());
        }

        tracker.advance(StageState::Draining);
        self.drain();
        tracker.advance(StageState::Done);

        info!(
            "TransferStage: finished, {} packets sent in {} ticks ({} late)",
            sent,
            self.pacer.ticks(),
            self.pacer.late_ticks()
        );
        Ok(())
    }

    fn name(&self) -> &'static str {
        "TransferStage"
    }
}
