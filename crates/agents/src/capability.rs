//! Provider seams for the three capability slots of a session.
//!
//! A session binds one implementation of each trait: recognition
//! ([`SpeechToText`]), synthesis ([`TextToSpeech`]) and completion
//! ([`ChatModel`]). The streaming traits hand audio and events over
//! channels so the session pipeline never depends on a concrete vendor.

use crate::audio::AudioFrame;
use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Audio format a capability consumes or produces.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AudioSpec {
    pub sample_rate: u32,
    pub channels: u16,
}

/// Events emitted by a speech recognizer.
#[derive(Clone, Debug, PartialEq)]
pub enum SttEvent {
    Transcript { text: String, is_final: bool },
}

/// Role of one turn in the conversation history.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChatRole {
    System,
    User,
    Assistant,
}

/// One turn of the conversation handed to the completion model.
#[derive(Clone, Debug, PartialEq)]
pub struct ChatTurn {
    pub role: ChatRole,
    pub content: String,
}

impl ChatTurn {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::Assistant,
            content: content.into(),
        }
    }
}

/// Errors reported by capability providers.
#[derive(Error, Debug)]
pub enum CapabilityError {
    #[error("Provider connection failed: {0}")]
    Connect(String),

    #[error("Provider rejected the request: {0}")]
    Provider(String),

    #[error("Provider stream error: {0}")]
    Stream(String),
}

/// Handle to a running provider pump.
///
/// Dropping the handle detaches the pump; [`CapabilityHandle::stop`]
/// aborts it.
#[derive(Debug)]
pub struct CapabilityHandle {
    task: JoinHandle<Result<(), CapabilityError>>,
}

impl CapabilityHandle {
    pub fn new(task: JoinHandle<Result<(), CapabilityError>>) -> Self {
        Self { task }
    }

    pub fn stop(&self) {
        self.task.abort();
    }

    /// Waits for the pump to finish; an aborted pump counts as clean.
    pub async fn join(self) -> Result<(), CapabilityError> {
        match self.task.await {
            Ok(result) => result,
            Err(e) if e.is_cancelled() => Ok(()),
            Err(e) => Err(CapabilityError::Stream(e.to_string())),
        }
    }
}

/// Streaming speech recognition.
///
/// `start` must not resolve until the provider has acknowledged the
/// stream, so a rejected credential or model identifier surfaces here
/// rather than inside the pump. The returned handle owns the pump that
/// consumes `audio` and emits transcripts on `events`; closing the audio
/// channel ends the stream gracefully.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SpeechToText: Send + Sync {
    async fn start(
        &self,
        audio: mpsc::Receiver<AudioFrame>,
        events: mpsc::Sender<SttEvent>,
    ) -> Result<CapabilityHandle, CapabilityError>;

    /// Format the recognizer expects on its audio channel.
    fn input_spec(&self) -> AudioSpec;
}

/// Streaming speech synthesis.
///
/// Same acknowledgment contract as [`SpeechToText`]: `start` resolves
/// after the provider accepts the stream. The pump reads sentence-sized
/// `text` chunks and emits synthesized frames on `audio`; closing the
/// text channel finishes the stream.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TextToSpeech: Send + Sync {
    async fn start(
        &self,
        text: mpsc::Receiver<String>,
        audio: mpsc::Sender<AudioFrame>,
    ) -> Result<CapabilityHandle, CapabilityError>;

    /// Format the synthesizer produces on its audio channel.
    fn output_spec(&self) -> AudioSpec;
}

/// Chat completion. One streaming request per call: deltas are forwarded
/// as they arrive and the full reply is returned at the end.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ChatModel: Send + Sync {
    async fn complete(
        &self,
        turns: &[ChatTurn],
        deltas: mpsc::Sender<String>,
    ) -> Result<String, CapabilityError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chat_turn_constructors_set_roles() {
        assert_eq!(ChatTurn::system("a").role, ChatRole::System);
        assert_eq!(ChatTurn::user("b").role, ChatRole::User);
        assert_eq!(ChatTurn::assistant("c").role, ChatRole::Assistant);
        assert_eq!(ChatTurn::user("你好").content, "你好");
    }

    #[tokio::test]
    async fn capability_handle_join_reports_pump_result() {
        let ok = CapabilityHandle::new(tokio::spawn(async { Ok(()) }));
        assert!(ok.join().await.is_ok());

        let failed = CapabilityHandle::new(tokio::spawn(async {
            Err(CapabilityError::Stream("boom".to_string()))
        }));
        assert!(matches!(
            failed.join().await,
            Err(CapabilityError::Stream(_))
        ));
    }

    #[tokio::test]
    async fn capability_handle_stop_counts_as_clean() {
        let handle = CapabilityHandle::new(tokio::spawn(async {
            tokio::time::sleep(std::time::Duration::from_secs(60)).await;
            Ok(())
        }));
        handle.stop();
        assert!(handle.join().await.is_ok());
    }
}
