//! Id parse failures.

use thiserror::Error;

/// Why a string is not an id of the requested kind.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum IdError {
    #[error("empty {kind} id")]
    Empty { kind: &'static str },

    /// Missing or foreign prefix, e.g. a `ver_` id parsed as a task id.
    #[error("{input:?} is not a {kind} id")]
    WrongKind { kind: &'static str, input: String },

    #[error("{kind} id {input:?} has a malformed ulid: {reason}")]
    BadUlid {
        kind: &'static str,
        input: String,
        reason: String,
    },
}

impl IdError {
    pub fn kind(&self) -> &'static str {
        match self {
            IdError::Empty { kind }
            | IdError::WrongKind { kind, .. }
            | IdError::BadUlid { kind, .. } => kind,
        }
    }
}
