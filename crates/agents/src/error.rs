use crate::capability::CapabilityError;
use thiserror::Error;

/// Errors surfaced by the worker runtime and session pipeline.
#[derive(Error, Debug)]
pub enum AgentError {
    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Session error: {0}")]
    Session(String),

    #[error("Capability error: {0}")]
    Capability(#[from] CapabilityError),

    #[error("Access token error: {0}")]
    AccessToken(#[from] livekit_api::access_token::AccessTokenError),

    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("Wire decode error: {0}")]
    Decode(#[from] prost::DecodeError),

    #[error("Signaling error: {0}")]
    Signal(String),

    #[error("Transport error: {0}")]
    Transport(String),
}
