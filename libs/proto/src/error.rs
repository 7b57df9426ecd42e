//! Error types for protocol framing.

use thiserror::Error;

/// Errors raised while framing or unframing the event stream.
#[derive(Debug, Error)]
pub enum ProtoError {
    /// Underlying transport failure.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// The record length prefix is not a decimal number.
    #[error("invalid record header: {0}")]
    InvalidHeader(String),

    /// A record exceeds the configured limit.
    #[error("record of {len} bytes exceeds limit of {max} bytes")]
    RecordTooLarge { len: usize, max: usize },
}
