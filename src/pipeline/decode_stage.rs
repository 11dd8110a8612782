//! Decode stage
//!
//! Pulls units from a `MediaSource` and routes them into the video and
//! audio channels. A graceful stop request is honoured between units: the
//! stage then completes as if the input had ended.

use log::{info, warn};

use super::stage::{CompletionFlag, PipelineStage, StageContext, admitted};
use crate::assets::INPUT_POLL;
use crate::channel::BoundedChannel;
use crate::decoder::{MediaSource, MediaUnit};
use crate::error::{PipelineError, Result};

pub struct DecodeStage<S: MediaSource> {
    source: S,
    video: BoundedChannel<u8>,
    audio: BoundedChannel<i16>,
    stop_requested: CompletionFlag,
    done: CompletionFlag,
    ctx: StageContext,
}

impl<S: MediaSource> DecodeStage<S> {
    pub fn new(
        source: S,
        video: BoundedChannel<u8>,
        audio: BoundedChannel<i16>,
        stop_requested: CompletionFlag,
        done: CompletionFlag,
        ctx: StageContext,
    ) -> Self {
        Self {
            source,
            video,
            audio,
            stop_requested,
            done,
            ctx,
        }
    }
}

impl<S: MediaSource> PipelineStage for DecodeStage<S> {
    fn run(&mut self) -> Result<()> {
        let _done = self.done.guard();
        let frame_len = self.source.info().frame_len();
        let audio_chunk = self.audio.capacity();

        let mut frames = 0u64;
        let mut samples = 0u64;

        info!("DecodeStage: started ({})", self.source.info());

        loop {
            if self.stop_requested.is_set() {
                info!("DecodeStage: stop requested, ending input");
                break;
            }
            if self.ctx.stop.cancelled() {
                return Ok(());
            }

            match self.source.next_unit()? {
                None => break,
                Some(MediaUnit::Video(frame)) => {
                    if frame.len() != frame_len {
                        return Err(PipelineError::decode(format!(
                            "frame of {} bytes, expected {}",
                            frame.len(),
                            frame_len
                        )));
                    }
                    if !admitted(self.video.push_all(&frame, &self.ctx.stop, INPUT_POLL))? {
                        return Ok(());
                    }
                    frames += 1;
                }
                Some(MediaUnit::Audio(pcm)) => {
                    // audio has no unit boundary, large chunks go in pieces
                    for chunk in pcm.chunks(audio_chunk) {
                        if !admitted(self.audio.push_all(chunk, &self.ctx.stop, INPUT_POLL))? {
                            return Ok(());
                        }
                    }
                    samples += pcm.len() as u64;
                }
            }
        }

        if frames == 0 {
            warn!("DecodeStage: no video frames decoded");
        }
        info!(
            "DecodeStage: finished ({} frames, {} samples)",
            frames, samples
        );
        Ok(())
    }

    fn name(&self) -> &'static str {
        "DecodeStage"
    }
}
