use thiserror::Error;

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("gateway transport error: {0}")]
    Transport(#[from] tonic::transport::Error),
    #[error("gateway stream failed: {}", .0.message())]
    Status(#[from] tonic::Status),
    #[error("gateway protocol violation: {0}")]
    ProtocolViolation(String),
    #[error("gateway stream ended before a proxy request arrived")]
    StreamEnded,
    #[error("gateway unavailable: {0}")]
    Unavailable(String),
}

pub type Result<T, E = GatewayError> = std::result::Result<T, E>;
