//! Error types shared by every pipeline component

use std::io;
use thiserror::Error;

pub type Result<T, E = PipelineError> = std::result::Result<T, E>;

/// Errors raised while configuring or running a transmission
#[derive(Debug, Error)]
pub enum PipelineError {
    /// Invalid dimensions, rates, window length or capacities.
    /// Detected before any stage starts.
    #[error("configuration error: {0}")]
    Config(String),

    /// Transform, scaler or buffer setup failed
    #[error("resource allocation failed: {0}")]
    Resource(String),

    /// The decoder failed mid-stream
    #[error("decode failed: {0}")]
    Decode(String),

    /// Writing a packet to the output sink failed
    #[error("sink write failed: {0}")]
    SinkWrite(#[source] io::Error),

    /// Wraps an error with the name of the stage that raised it
    #[error("{stage}: {source}")]
    Stage {
        stage: &'static str,
        #[source]
        source: Box<PipelineError>,
    },
}

impl PipelineError {
    pub fn config(msg: impl Into<String>) -> Self {
        PipelineError::Config(msg.into())
    }

    pub fn resource(msg: impl Into<String>) -> Self {
        PipelineError::Resource(msg.into())
    }

    pub fn decode(msg: impl Into<String>) -> Self {
        PipelineError::Decode(msg.into())
    }

    /// Attach the stage name, unless the error already carries one
    pub fn in_stage(self, stage: &'static str) -> Self {
        match self {
            err @ PipelineError::Stage { .. } => err,
            other => PipelineError::Stage {
                stage,
                source: Box::new(other),
            },
        }
    }

    /// The innermost error, skipping stage wrappers
    pub fn root(&self) -> &PipelineError {
        match self {
            PipelineError::Stage { source, .. } => source.root(),
            other => other,
        }
    }

    pub fn is_config(&self) -> bool {
        matches!(self.root(), PipelineError::Config(_))
    }
}

impl From<ac_ffmpeg::Error> for PipelineError {
    fn from(err: ac_ffmpeg::Error) -> Self {
        PipelineError::Decode(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_wrapping_is_idempotent() {
        let err = PipelineError::config("bad width").in_stage("DitherStage");
        let err = err.in_stage("Coordinator");

        match &err {
            PipelineError::Stage { stage, .. } => assert_eq!(*stage, "DitherStage"),
            other => panic!("unexpected error: {other:?}"),
        }
        assert!(err.is_config());
        assert_eq!(err.to_string(), "DitherStage: configuration error: bad width");
    }

    #[test]
    fn test_sink_error_keeps_source() {
        let err = PipelineError::SinkWrite(io::Error::new(io::ErrorKind::BrokenPipe, "gone"));
        assert!(!err.is_config());
        assert!(std::error::Error::source(&err).is_some());
    }
}
