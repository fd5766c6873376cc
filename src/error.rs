//! Error type for configuration, constraint and cache failures.
//!
//! Infeasible layouts are not errors: they come back as
//! [`Outcome::Infeasible`](crate::model::Outcome::Infeasible).

use thiserror::Error;

pub type Result<T> = std::result::Result<T, DistributionError>;

#[derive(Debug, Error)]
pub enum DistributionError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid rational value: {value:?}")]
    InvalidRational { value: String },

    #[error("invalid configuration: {message}")]
    InvalidConfig { message: String },

    #[error("forced break {index} is outside 0..={len}")]
    ForcedBreakOutOfRange { index: usize, len: usize },

    #[error("keep-together range {start}..{end} is invalid for {len} stacks")]
    InvalidKeepTogether { start: usize, end: usize, len: usize },

    #[error("keep-together range {start}..{end} contains forced break {index}")]
    ConflictingConstraints { start: usize, end: usize, index: usize },

    #[error("width override refers to unknown stack {source_index}")]
    UnknownStack { source_index: usize },

    #[error("width override for stack {source_index}: {message}")]
    InvalidOverride { source_index: usize, message: String },

    #[error("reflow range {start}..{end} is outside the {count} laid-out systems")]
    InvalidReflowRange { start: usize, end: usize, count: usize },

    #[error("reflow limit of {limit} passes reached for this layout cycle")]
    ReflowLimit { limit: usize },

    #[error("no feasible layout is cached")]
    NoLayout,

    #[error("distribution pass cancelled")]
    Cancelled,

    #[error("cached layout changed while this pass ran")]
    Superseded,
}

impl DistributionError {
    #[must_use]
    pub fn config(message: impl Into<String>) -> Self {
        Self::InvalidConfig {
            message: message.into(),
        }
    }
}
