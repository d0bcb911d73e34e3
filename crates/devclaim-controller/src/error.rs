use thiserror::Error;

#[derive(Debug, Error)]
pub enum ControllerError {
    #[error("invalid claim key {0:?}, expected namespace/name")]
    InvalidKey(String),

    #[error("object store error: {0}")]
    State(#[from] devclaim_state::StateError),
}

pub type ControllerResult<T> = Result<T, ControllerError>;
