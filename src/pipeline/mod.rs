//! Streaming pipeline
//!
//! One transmission is a fixed graph of four stages connected by bounded
//! channels:
//! - DecodeStage: media file into gray frames and mono PCM
//! - DitherStage: gray frames into packed 1-bit bitmaps
//! - SpectrumStage: PCM windows into tone bytes
//! - TransferStage: bitmap and tone bytes into paced packets for the sink
//!
//! # Architecture
//!
//! - Each stage runs on its own blocking thread and implements `PipelineStage`
//! - A stage signals completion through a `CompletionFlag` read by its consumer
//! - A run-wide `SignalOfStop` aborts every wait loop on a fatal failure
//! - The coordinator builds the graph, joins all stages and reports
//! - Health monitoring tracks counters and raises alerts

pub mod clock;
pub mod coordinator;
pub mod decode_stage;
pub mod health;
pub mod stage;
pub mod state;
pub mod transfer_stage;
pub mod transform_stage;
pub mod types;

pub use clock::FramePacer;
pub use coordinator::{PipelineCoordinator, RunReport, StopHandle};
pub use health::{HealthMonitor, PipelineHealth};
pub use stage::{CompletionFlag, PipelineStage, StageContext};
pub use state::{PipelineState, StageState};
pub use transform_stage::{Transform, TransformStage};
pub use types::MediaKind;
