//! Pipeline stage trait and the plumbing shared by every stage

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use log::debug;

use super::health::PipelineHealth;
use super::state::StageState;
use crate::channel::ChannelError;
use crate::error::{PipelineError, Result};
use crate::utils::sos::SignalOfStop;

/// A stage of the pipeline, run to completion on its own thread
pub trait PipelineStage: Send {
    /// Run the stage until its input is exhausted or the run is stopped
    fn run(&mut self) -> Result<()>;

    /// Get the name of this stage for logging
    fn name(&self) -> &'static str;
}

/// Set once by a stage when it has produced everything it ever will
#[derive(Debug, Clone, Default)]
pub struct CompletionFlag(Arc<AtomicBool>);

impl CompletionFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_set(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// Sets the flag when dropped, so it is raised on every exit path
    pub fn guard(&self) -> CompletionGuard {
        CompletionGuard(self.clone())
    }
}

pub struct CompletionGuard(CompletionFlag);

impl Drop for CompletionGuard {
    fn drop(&mut self) {
        self.0.set();
    }
}

/// Run-wide handles given to every stage at construction
#[derive(Clone)]
pub struct StageContext {
    pub stop: SignalOfStop,
    pub health: Arc<PipelineHealth>,
}

impl StageContext {
    pub fn new(stop: SignalOfStop, health: Arc<PipelineHealth>) -> Self {
        Self { stop, health }
    }
}

/// Current state of one stage, logging every transition
pub struct StageTracker {
    name: &'static str,
    state: StageState,
}

impl StageTracker {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            state: StageState::Running,
        }
    }

    pub fn state(&self) -> StageState {
        self.state
    }

    pub fn advance(&mut self, next: StageState) {
        if !self.state.can_transition_to(&next) {
            debug!("{}: ignoring transition {} -> {}", self.name, self.state, next);
            return;
        }
        if self.state != next {
            debug!("{}: {} -> {}", self.name, self.state, next);
            self.state = next;
        }
    }
}

/// Outcome of a blocking push: `false` when the run was stopped meanwhile
pub fn admitted(result: std::result::Result<(), ChannelError>) -> Result<bool> {
    match result {
        Ok(()) => Ok(true),
        Err(ChannelError::Aborted) => Ok(false),
        Err(err @ ChannelError::Oversized { .. }) => Err(PipelineError::config(err.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_completion_guard_sets_flag() {
        let flag = CompletionFlag::new();
        {
            let _guard = flag.guard();
            assert!(!flag.is_set());
        }
        assert!(flag.is_set());
    }

    #[test]
    fn test_completion_guard_sets_flag_on_error_path() {
        fn failing(flag: &CompletionFlag) -> Result<()> {
            let _done = flag.guard();
            Err(PipelineError::decode("broken"))
        }

        let flag = CompletionFlag::new();
        assert!(failing(&flag).is_err());
        assert!(flag.is_set());
    }

    #[test]
    fn test_tracker_rejects_backward_transition() {
        let mut tracker = StageTracker::new("test");
        tracker.advance(StageState::Draining);
        tracker.advance(StageState::Running);
        assert_eq!(tracker.state(), StageState::Draining);
        tracker.advance(StageState::Done);
        assert_eq!(tracker.state(), StageState::Done);
    }

    #[test]
    fn test_admitted() {
        assert!(admitted(Ok(())).unwrap());
        assert!(!admitted(Err(ChannelError::Aborted)).unwrap());
        let err = admitted(Err(ChannelError::Oversized { len: 9, capacity: 4 })).unwrap_err();
        assert!(err.is_config());
    }
}
