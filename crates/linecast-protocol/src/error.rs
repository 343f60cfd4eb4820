//! Framing errors.

/// Errors raised while encoding or reassembling newline-delimited messages.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FrameError {
    /// Outgoing payload contains the delimiter; there is no escaping.
    #[error("message contains a newline at byte {position}")]
    EmbeddedDelimiter { position: usize },

    /// An incoming line grew past the configured limit without a delimiter.
    #[error("line exceeds {limit} bytes without a delimiter ({buffered} buffered)")]
    LineTooLong { limit: usize, buffered: usize },
}
