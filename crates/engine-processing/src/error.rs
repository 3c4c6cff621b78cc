use engine_core::error::TransportError;
use model::core::identifiers::StreamId;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum FetchError {
    /// A non-retryable transport failure while reading a source.
    #[error("Failed to fetch from '{stream}': {source}")]
    Transport {
        stream: StreamId,
        #[source]
        source: TransportError,
    },
}

#[derive(Error, Debug)]
pub enum DispatchError {
    #[error("Send rejected: {0}")]
    Permanent(TransportError),

    #[error("Send failed after {attempts} attempts: {last}")]
    AttemptsExhausted {
        attempts: usize,
        last: TransportError,
    },

    #[error("Send cancelled")]
    Cancelled,
}
