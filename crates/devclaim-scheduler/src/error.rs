//! Scheduler error types.

use thiserror::Error;

/// Errors that abort a whole filter or bind request.
#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("claim not found: {0}")]
    ClaimNotFound(String),

    #[error("invalid claim {0}: neither a device count nor device names requested")]
    InvalidClaim(String),

    #[error("workload not found: {0}")]
    WorkloadNotFound(String),

    #[error("device not found: {0}")]
    DeviceNotFound(String),

    #[error("bind submission failed: {0}")]
    BindFailed(String),

    #[error("object store error: {0}")]
    State(#[from] devclaim_state::StateError),
}

pub type SchedulerResult<T> = Result<T, SchedulerError>;

/// A malformed selector expression. Never surfaced to callers; the
/// matcher logs it and treats the selector as a non-match.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SelectorError {
    #[error("unknown operator {operator:?} for key {key:?}")]
    UnknownOperator { key: String, operator: String },

    #[error("empty key in selector expression")]
    EmptyKey,

    #[error("operator {operator} on key {key:?} requires at least one value")]
    MissingValues { key: String, operator: String },

    #[error("operator {operator} on key {key:?} takes no values")]
    UnexpectedValues { key: String, operator: String },
}
