//! Pipeline and stage state management

use std::time::Instant;

/// Pipeline state machine
///
/// Lifecycle of one run as seen by the coordinator. State transitions are
/// validated to ensure consistent behavior.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    /// Pipeline is built but not started
    Idle,

    /// Stages and channels are being set up
    Initializing,

    /// Stage threads are running
    Running {
        /// When the pipeline started running
        started_at: Instant,
    },

    /// All stages are being joined
    Stopping,

    /// Pipeline has stopped and cannot be restarted
    Stopped,
}

impl PipelineState {
    /// Check if this state transition is valid
    pub fn can_transition_to(&self, target: &PipelineState) -> bool {
        use PipelineState::*;

        match (self, target) {
            (Idle, Initializing) => true,

            (Initializing, Running { .. }) => true,
            (Initializing, Stopping) => true, // Can abort initialization

            (Running { .. }, Stopping) => true,

            (Stopping, Stopped) => true,

            // From Stopped - no transitions allowed
            (Stopped, _) => false,

            (a, b) if a == b => true,

            _ => false,
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            PipelineState::Idle => "Idle",
            PipelineState::Initializing => "Initializing",
            PipelineState::Running { .. } => "Running",
            PipelineState::Stopping => "Stopping",
            PipelineState::Stopped => "Stopped",
        }
    }
}

impl std::fmt::Display for PipelineState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.description())
    }
}

/// Per-stage state machine: `Running -> Draining -> Done`
///
/// A stage drains once its upstream has completed and less than one work
/// unit is left; the remainder is discarded and the stage is done.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageState {
    Running,
    Draining,
    Done,
}

impl StageState {
    pub fn can_transition_to(&self, target: &StageState) -> bool {
        use StageState::*;

        matches!(
            (self, target),
            (Running, Draining) | (Running, Done) | (Draining, Done)
        ) || (self == target && *self != Done)
    }

    pub fn description(&self) -> &'static str {
        match self {
            StageState::Running => "Running",
            StageState::Draining => "Draining",
            StageState::Done => "Done",
        }
    }
}

impl std::fmt::Display for StageState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.description())
    }
}
