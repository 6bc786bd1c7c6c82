//! Streaming speech recognition over the DashScope duplex endpoint.

use crate::error::DashScopeError;
use crate::protocol::{self, EventKind, TaskEvent, TaskRequest};
use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use mynah_agents::audio::AudioFrame;
use mynah_agents::capability::{
    AudioSpec, CapabilityError, CapabilityHandle, SpeechToText, SttEvent,
};
use secrecy::SecretString;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::protocol::Message;
use tracing::{debug, warn};

const DEFAULT_MODEL: &str = "paraformer-realtime-v2";
const DEFAULT_FORMAT: &str = "pcm";
const DEFAULT_SAMPLE_RATE: u32 = 16000;

/// Paraformer realtime recognition.
///
/// Feeds little-endian mono PCM as binary frames and emits one
/// transcript event per `result-generated`; a sentence with an end time
/// is final.
pub struct Recognition {
    api_key: SecretString,
    endpoint: String,
    model: String,
    format: String,
    sample_rate: u32,
    vocabulary_id: Option<String>,
}

#[derive(Serialize)]
struct RecognitionParams<'a> {
    format: &'a str,
    sample_rate: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    vocabulary_id: Option<&'a str>,
}

impl Recognition {
    pub fn new(api_key: SecretString) -> Self {
        Self {
            api_key,
            endpoint: protocol::DASHSCOPE_WSS_URL.to_string(),
            model: DEFAULT_MODEL.to_string(),
            format: DEFAULT_FORMAT.to_string(),
            sample_rate: DEFAULT_SAMPLE_RATE,
            vocabulary_id: None,
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn with_sample_rate(mut self, sample_rate: u32) -> Self {
        self.sample_rate = sample_rate;
        self
    }

    pub fn with_vocabulary_id(mut self, vocabulary_id: impl Into<String>) -> Self {
        self.vocabulary_id = Some(vocabulary_id.into());
        self
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }
}

#[async_trait]
impl SpeechToText for Recognition {
    async fn start(
        &self,
        mut audio: mpsc::Receiver<AudioFrame>,
        events: mpsc::Sender<SttEvent>,
    ) -> Result<CapabilityHandle, CapabilityError> {
        let stream = protocol::connect(&self.endpoint, &self.api_key)
            .await
            .map_err(CapabilityError::from)?;
        let (mut sink, mut source) = stream.split();

        let task_id = protocol::new_task_id();
        let params = serde_json::to_value(RecognitionParams {
            format: &self.format,
            sample_rate: self.sample_rate,
            vocabulary_id: self.vocabulary_id.as_deref(),
        })
        .map_err(DashScopeError::from)
        .map_err(CapabilityError::from)?;
        let open = TaskRequest::run_task(&task_id, "asr", "recognition", &self.model, params)
            .into_message()
            .map_err(CapabilityError::from)?;
        sink.send(open)
            .await
            .map_err(DashScopeError::from)
            .map_err(CapabilityError::from)?;
        protocol::await_task_started(&mut source, &task_id)
            .await
            .map_err(CapabilityError::from)?;
        debug!(model = %self.model, sample_rate = self.sample_rate, "Recognition stream started");

        let pump = tokio::spawn(async move {
            let mut draining = false;
            let result: Result<(), DashScopeError> = loop {
                tokio::select! {
                    frame = audio.recv(), if !draining => match frame {
                        Some(frame) => {
                            if let Err(e) = sink.send(Message::Binary(frame.data)).await {
                                break Err(e.into());
                            }
                        }
                        None => {
                            draining = true;
                            let finish = match TaskRequest::finish_task(&task_id).into_message() {
                                Ok(msg) => msg,
                                Err(e) => break Err(e),
                            };
                            if let Err(e) = sink.send(finish).await {
                                break Err(e.into());
                            }
                        }
                    },
                    incoming = source.next() => match incoming {
                        Some(Ok(Message::Text(text))) => {
                            let event: TaskEvent = match serde_json::from_str(&text) {
                                Ok(event) => event,
                                Err(e) => {
                                    warn!(error = %e, "Unparseable recognition event");
                                    continue;
                                }
                            };
                            match event.header.event {
                                EventKind::ResultGenerated => {
                                    let sentence = event
                                        .payload
                                        .output
                                        .and_then(|output| output.sentence);
                                    if let Some(sentence) = sentence {
                                        if sentence.text.is_empty() {
                                            continue;
                                        }
                                        let update = SttEvent::Transcript {
                                            text: sentence.text,
                                            is_final: sentence.end_time.is_some(),
                                        };
                                        if events.send(update).await.is_err() {
                                            break Ok(());
                                        }
                                    }
                                }
                                EventKind::TaskFinished => break Ok(()),
                                EventKind::TaskFailed => break Err(event.failure()),
                                _ => {}
                            }
                        }
                        Some(Ok(Message::Close(_))) | None => {
                            break if draining {
                                Ok(())
                            } else {
                                Err(DashScopeError::Stream(
                                    "recognition stream closed".to_string(),
                                ))
                            };
                        }
                        Some(Ok(_)) => {}
                        Some(Err(e)) => break Err(e.into()),
                    }
                }
            };
            result.map_err(CapabilityError::from)
        });
        Ok(CapabilityHandle::new(pump))
    }

    fn input_spec(&self) -> AudioSpec {
        AudioSpec {
            sample_rate: self.sample_rate,
            channels: 1,
        }
    }
}
