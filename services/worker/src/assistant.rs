//! The voice assistant entrypoint run once per room job.

use crate::config;
use dashscope_realtime::{Chat, Recognition, Synthesizer};
use mynah_agents::{Agent, AgentError, AgentSession, JobContext};
use tracing::info;

pub const ASSISTANT_INSTRUCTIONS: &str = "你是一个友好的 AI 语音助手。\
你的任务是以自然、流畅的方式与用户对话。\
请用简洁、清晰的语言回答用户的问题。\
如果遇到不确定的问题，请诚实地告知用户。";

/// Entrypoint handed to the worker; invoked with a fresh context per
/// assigned job.
pub async fn entrypoint(ctx: JobContext) -> Result<(), AgentError> {
    let session = build_session()?;
    run_assistant(session, ctx).await
}

fn build_session() -> Result<AgentSession, AgentError> {
    let api_key = config::dashscope_api_key()?;
    let mut stt = Recognition::new(api_key.clone());
    if let Some(vocabulary_id) = config::vocabulary_id() {
        stt = stt.with_vocabulary_id(vocabulary_id);
    }
    let session = AgentSession::builder()
        .stt(stt)
        .llm(Chat::new(api_key.clone()))
        .tts(Synthesizer::new(api_key))
        .build()?;
    Ok(session)
}

/// Starts the session, then joins the room.
///
/// The session must be serving before the agent becomes visible to
/// participants, so a provider rejection aborts the job with the room
/// still disconnected.
async fn run_assistant(mut session: AgentSession, ctx: JobContext) -> Result<(), AgentError> {
    info!("连接到房间: {}", ctx.room().name());
    session
        .start(Agent::new(ASSISTANT_INSTRUCTIONS), ctx.room())
        .await?;
    ctx.connect().await?;
    info!("Agent 已成功启动并连接到房间");
    // The pipeline tasks keep serving after the session value drops;
    // the worker tears the job down by closing the room.
    Ok(())
}
