use thiserror::Error;

use crate::models::SegmentSpan;

/// Errors raised by the windowing, matching and aggregation pipeline
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConsensusError {
    /// The waveform record holds no samples
    #[error("signal '{signal}' in {source_id} has no samples")]
    EmptySignal { signal: String, source_id: String },

    /// Sampling frequency is zero, negative or not finite
    #[error("signal '{signal}' has invalid sampling frequency {frequency} Hz")]
    InvalidFrequency { signal: String, frequency: f64 },

    /// Unknown signal name, or a signal with no annotations yet
    #[error("signal '{0}' not found")]
    SignalNotFound(String),

    /// An annotation run refers to another waveform source
    #[error("annotations for '{found}' cannot be applied to source '{expected}'")]
    SourceMismatch { expected: String, found: String },

    /// Two distinct windows produced the same identity
    #[error("identity collision on {id}: {first} vs {second}")]
    IdentityCollision {
        id: String,
        first: SegmentSpan,
        second: SegmentSpan,
    },

    /// A segment asked for samples outside its record
    #[error("segment {span} lies outside signal '{signal}'")]
    SegmentOutOfRange { signal: String, span: SegmentSpan },
}

pub type Result<T> = std::result::Result<T, ConsensusError>;
