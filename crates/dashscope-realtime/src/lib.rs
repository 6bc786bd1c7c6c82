//! DashScope capability providers for voice agent sessions.
//!
//! [`Recognition`] and [`Synthesizer`] speak the duplex websocket
//! protocol at `dashscope.aliyuncs.com/api-ws/v1/inference`; [`Chat`]
//! uses the OpenAI-compatible completion endpoint. All three plug into
//! an `AgentSession` through the capability traits.

pub mod error;
pub mod llm;
mod protocol;
pub mod stt;
pub mod tts;

pub use error::DashScopeError;
pub use llm::Chat;
pub use stt::Recognition;
pub use tts::Synthesizer;
