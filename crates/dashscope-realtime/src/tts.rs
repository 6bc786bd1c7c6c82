//! Streaming speech synthesis over the DashScope duplex endpoint.

use crate::error::DashScopeError;
use crate::protocol::{self, EventKind, TaskEvent, TaskRequest};
use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use mynah_agents::audio::AudioFrame;
use mynah_agents::capability::{AudioSpec, CapabilityError, CapabilityHandle, TextToSpeech};
use secrecy::SecretString;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::protocol::Message;
use tracing::{debug, warn};

const DEFAULT_MODEL: &str = "cosyvoice-v2";
const DEFAULT_VOICE: &str = "longcheng_v2";
const DEFAULT_FORMAT: &str = "pcm";
const DEFAULT_SAMPLE_RATE: u32 = 22050;

/// CosyVoice streaming synthesis.
///
/// One duplex task per session: each sentence goes out as a
/// `continue-task`, synthesized PCM comes back as binary frames, and
/// closing the text channel finishes the task.
pub struct Synthesizer {
    api_key: SecretString,
    endpoint: String,
    model: String,
    voice: String,
    format: String,
    sample_rate: u32,
    rate: f32,
    volume: u32,
    pitch: f32,
}

#[derive(Serialize)]
struct SynthesisParams<'a> {
    text_type: &'a str,
    voice: &'a str,
    format: &'a str,
    sample_rate: u32,
    rate: f32,
    volume: u32,
    pitch: f32,
}

impl Synthesizer {
    pub fn new(api_key: SecretString) -> Self {
        Self {
            api_key,
            endpoint: protocol::DASHSCOPE_WSS_URL.to_string(),
            model: DEFAULT_MODEL.to_string(),
            voice: DEFAULT_VOICE.to_string(),
            format: DEFAULT_FORMAT.to_string(),
            sample_rate: DEFAULT_SAMPLE_RATE,
            rate: 1.0,
            volume: 50,
            pitch: 1.0,
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn with_voice(mut self, voice: impl Into<String>) -> Self {
        self.voice = voice.into();
        self
    }

    pub fn with_sample_rate(mut self, sample_rate: u32) -> Self {
        self.sample_rate = sample_rate;
        self
    }

    /// Speech rate multiplier; forwarded to the service as given.
    pub fn with_rate(mut self, rate: f32) -> Self {
        self.rate = rate;
        self
    }

    /// Volume from 0 to 100; forwarded to the service as given.
    pub fn with_volume(mut self, volume: u32) -> Self {
        self.volume = volume;
        self
    }

    /// Pitch multiplier; forwarded to the service as given.
    pub fn with_pitch(mut self, pitch: f32) -> Self {
        self.pitch = pitch;
        self
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    pub fn voice(&self) -> &str {
        &self.voice
    }

    pub fn rate(&self) -> f32 {
        self.rate
    }

    pub fn volume(&self) -> u32 {
        self.volume
    }

    pub fn pitch(&self) -> f32 {
        self.pitch
    }
}

#[async_trait]
impl TextToSpeech for Synthesizer {
    async fn start(
        &self,
        mut text: mpsc::Receiver<String>,
        audio: mpsc::Sender<AudioFrame>,
    ) -> Result<CapabilityHandle, CapabilityError> {
        let stream = protocol::connect(&self.endpoint, &self.api_key)
            .await
            .map_err(CapabilityError::from)?;
        let (mut sink, mut source) = stream.split();

        let task_id = protocol::new_task_id();
        let params = serde_json::to_value(SynthesisParams {
            text_type: "PlainText",
            voice: &self.voice,
            format: &self.format,
            sample_rate: self.sample_rate,
            rate: self.rate,
            volume: self.volume,
            pitch: self.pitch,
        })
        .map_err(DashScopeError::from)
        .map_err(CapabilityError::from)?;
        let open = TaskRequest::run_task(&task_id, "tts", "SpeechSynthesizer", &self.model, params)
            .into_message()
            .map_err(CapabilityError::from)?;
        sink.send(open)
            .await
            .map_err(DashScopeError::from)
            .map_err(CapabilityError::from)?;
        protocol::await_task_started(&mut source, &task_id)
            .await
            .map_err(CapabilityError::from)?;
        debug!(model = %self.model, voice = %self.voice, "Synthesis stream started");

        let sample_rate = self.sample_rate;
        let pump = tokio::spawn(async move {
            let mut draining = false;
            let result: Result<(), DashScopeError> = loop {
                tokio::select! {
                    sentence = text.recv(), if !draining => match sentence {
                        Some(sentence) => {
                            let chunk = match TaskRequest::continue_text(&task_id, &sentence)
                                .into_message()
                            {
                                Ok(msg) => msg,
                                Err(e) => break Err(e),
                            };
                            if let Err(e) = sink.send(chunk).await {
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
                        Some(Ok(Message::Binary(data))) => {
                            let frame = AudioFrame::new(data, sample_rate, 1);
                            if audio.send(frame).await.is_err() {
                                break Ok(());
                            }
                        }
                        Some(Ok(Message::Text(raw))) => {
                            let event: TaskEvent = match serde_json::from_str(&raw) {
                                Ok(event) => event,
                                Err(e) => {
                                    warn!(error = %e, "Unparseable synthesis event");
                                    continue;
                                }
                            };
                            match event.header.event {
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
                                    "synthesis stream closed".to_string(),
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

    fn output_spec(&self) -> AudioSpec {
        AudioSpec {
            sample_rate: self.sample_rate,
            channels: 1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prosody_settings_are_kept_as_given() {
        let tts = Synthesizer::new(SecretString::from("test-key"))
            .with_voice("longxiaochun_v2")
            .with_rate(1.4)
            .with_volume(80)
            .with_pitch(0.9);
        assert_eq!(tts.voice(), "longxiaochun_v2");
        assert_eq!(tts.rate(), 1.4);
        assert_eq!(tts.volume(), 80);
        assert_eq!(tts.pitch(), 0.9);
        assert_eq!(tts.output_spec().sample_rate, 22050);
    }

    #[test]
    fn synthesis_params_serialize_plain_text_payload() {
        let params = serde_json::to_value(SynthesisParams {
            text_type: "PlainText",
            voice: "longcheng_v2",
            format: "pcm",
            sample_rate: 22050,
            rate: 1.0,
            volume: 50,
            pitch: 1.0,
        })
        .unwrap();
        assert_eq!(params["text_type"], "PlainText");
        assert_eq!(params["voice"], "longcheng_v2");
        assert_eq!(params["sample_rate"], 22050);
        assert_eq!(params["rate"], 1.0);
        assert_eq!(params["volume"], 50);
        assert_eq!(params["pitch"], 1.0);
    }
}
