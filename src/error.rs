//! Errors raised by the scoring library.
//!
//! Only structural problems with a whole call end up here. Gaps in a single
//! record (missing counters, zero subscribers, clock skew) degrade that
//! record's scores to `None` instead.

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ScoringError {
    #[error("Invalid time filter: {0}. Must be one of: hour, today, week, month, year")]
    InvalidFilter(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

pub type ScoringResult<T> = std::result::Result<T, ScoringError>;
