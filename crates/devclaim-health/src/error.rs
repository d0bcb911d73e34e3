//! Host health monitor error types.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum HealthError {
    #[error("quarantine of host {host} failed after {attempts} attempts: {last_error}")]
    QuarantineFailed {
        host: String,
        attempts: u32,
        last_error: String,
    },

    #[error("object store error: {0}")]
    State(#[from] devclaim_state::StateError),
}

pub type HealthResult<T> = Result<T, HealthError>;
