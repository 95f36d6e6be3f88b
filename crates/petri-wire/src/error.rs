use thiserror::Error;

/// Errors that can occur in the wire layer.
#[derive(Debug, Error)]
pub enum WireError {
    #[error("serialization error: {0}")]
    Encode(#[from] rmp_serde::encode::Error),

    #[error("deserialization error: {0}")]
    Decode(#[from] rmp_serde::decode::Error),

    #[error("zeromq error: {0}")]
    Zmq(#[from] zeromq::ZmqError),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("call timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("bad worker address: {0}")]
    BadAddress(String),

    #[error("operation not supported by this client: {0}")]
    Unsupported(&'static str),
}
