//! Object store failures.
//!
//! Storage faults carry the backend's message as text. `NotFound` and
//! `UidMismatch` are outcomes callers branch on, so they keep their fields.

use thiserror::Error;

pub type StateResult<T> = Result<T, StateError>;

#[derive(Debug, Error)]
pub enum StateError {
    #[error("cannot open object store: {0}")]
    Open(String),

    #[error("store transaction aborted: {0}")]
    Transaction(String),

    #[error("store table unavailable: {0}")]
    Table(String),

    #[error("store read failed: {0}")]
    Read(String),

    #[error("store write failed: {0}")]
    Write(String),

    #[error("cannot encode object: {0}")]
    Serialize(String),

    #[error("corrupt object row: {0}")]
    Deserialize(String),

    /// An update or bind targeted a row that is not stored.
    #[error("{key} does not exist in {table}")]
    NotFound { table: String, key: String },

    /// A binding names a workload whose stored uid differs.
    #[error("workload {key} has uid {stored}, binding names {requested}")]
    UidMismatch {
        key: String,
        stored: String,
        requested: String,
    },
}

impl StateError {
    pub fn not_found(table: impl Into<String>, key: impl Into<String>) -> Self {
        StateError::NotFound {
            table: table.into(),
            key: key.into(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, StateError::NotFound { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_found_names_row_and_table() {
        let err = StateError::not_found("devices", "d7");
        assert!(err.is_not_found());
        assert_eq!(err.to_string(), "d7 does not exist in devices");
    }

    #[test]
    fn uid_mismatch_is_not_a_missing_row() {
        let err = StateError::UidMismatch {
            key: "ml/train".into(),
            stored: "a".into(),
            requested: "b".into(),
        };
        assert!(!err.is_not_found());
        assert!(err.to_string().contains("uid a"));
    }
}
