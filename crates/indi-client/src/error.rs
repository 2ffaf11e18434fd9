//! Client error types

use thiserror::Error;

pub type Result<T> = std::result::Result<T, ClientError>;

#[derive(Error, Debug)]
pub enum ClientError {
    #[error("invalid server endpoint: {0}")]
    InvalidEndpoint(String),

    #[error("no server configured")]
    NotConfigured,

    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    #[error("timeout")]
    Timeout,

    #[error("not connected")]
    NotConnected,

    #[error("unknown device: {0}")]
    UnknownDevice(String),

    #[error("unknown property {property} on device {device}")]
    UnknownProperty { device: String, property: String },

    #[error("send failed: {0}")]
    SendFailed(String),

    #[error("protocol error: {0}")]
    Protocol(#[from] indi_core::Error),

    #[error("transport error: {0}")]
    Transport(#[from] indi_transport::TransportError),
}
