use mynah_agents::capability::CapabilityError;
use thiserror::Error;

/// Errors from the DashScope websocket and OpenAI-compatible endpoints.
#[derive(Error, Debug)]
pub enum DashScopeError {
    #[error("DashScope connection failed: {0}")]
    Connect(String),

    #[error("DashScope task failed: {code}: {message}")]
    Task { code: String, message: String },

    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("Invalid wire payload: {0}")]
    Payload(#[from] serde_json::Error),

    #[error("Completion API error: {0}")]
    OpenAi(#[from] async_openai::error::OpenAIError),

    #[error("Stream ended unexpectedly: {0}")]
    Stream(String),
}

impl From<DashScopeError> for CapabilityError {
    fn from(e: DashScopeError) -> Self {
        match e {
            DashScopeError::Connect(message) => CapabilityError::Connect(message),
            DashScopeError::Task { code, message } => {
                CapabilityError::Provider(format!("{code}: {message}"))
            }
            DashScopeError::OpenAi(e) => CapabilityError::Provider(e.to_string()),
            other => CapabilityError::Stream(other.to_string()),
        }
    }
}
