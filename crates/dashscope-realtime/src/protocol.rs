//! Wire types for the DashScope duplex websocket protocol.
//!
//! Every task runs over one connection: the client opens with a
//! `run-task` action, the service acknowledges with a `task-started`
//! event, then both sides stream until `finish-task` is answered by
//! `task-finished`. Recognition results and synthesis acknowledgments
//! arrive as `result-generated` events; synthesized audio arrives as
//! binary frames.

use crate::error::DashScopeError;
use futures_util::StreamExt;
use futures_util::stream::SplitStream;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::protocol::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::debug;

pub(crate) const DASHSCOPE_WSS_URL: &str = "wss://dashscope.aliyuncs.com/api-ws/v1/inference";
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

pub(crate) type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Fresh 32-character hex task id.
pub(crate) fn new_task_id() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}

/// Opens the duplex endpoint with a bearer credential.
pub(crate) async fn connect(
    endpoint: &str,
    api_key: &SecretString,
) -> Result<WsStream, DashScopeError> {
    let mut request = endpoint
        .into_client_request()
        .map_err(|e| DashScopeError::Connect(e.to_string()))?;
    let bearer = HeaderValue::from_str(&format!("bearer {}", api_key.expose_secret()))
        .map_err(|e| DashScopeError::Connect(e.to_string()))?;
    request.headers_mut().insert("Authorization", bearer);
    request
        .headers_mut()
        .insert("X-DashScope-DataInspection", HeaderValue::from_static("enable"));

    let connected = tokio::time::timeout(CONNECT_TIMEOUT, connect_async(request))
        .await
        .map_err(|_| DashScopeError::Connect("connection timed out".to_string()))?;
    let (stream, _) = connected.map_err(|e| DashScopeError::Connect(e.to_string()))?;
    Ok(stream)
}

#[derive(Serialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub(crate) enum Action {
    RunTask,
    ContinueTask,
    FinishTask,
}

#[derive(Serialize, Debug)]
struct RequestHeader {
    action: Action,
    task_id: String,
    streaming: &'static str,
}

/// Client to service envelope.
#[derive(Serialize, Debug)]
pub(crate) struct TaskRequest {
    header: RequestHeader,
    payload: RequestPayload,
}

#[derive(Serialize, Debug, Default)]
pub(crate) struct RequestPayload {
    #[serde(skip_serializing_if = "Option::is_none")]
    task_group: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    task: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    function: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    model: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    parameters: Option<Value>,
    input: Value,
}

impl TaskRequest {
    /// `run-task` opening an audio task over the duplex stream.
    pub(crate) fn run_task(
        task_id: &str,
        task: &'static str,
        function: &'static str,
        model: &str,
        parameters: Value,
    ) -> Self {
        Self {
            header: RequestHeader {
                action: Action::RunTask,
                task_id: task_id.to_string(),
                streaming: "duplex",
            },
            payload: RequestPayload {
                task_group: Some("audio"),
                task: Some(task),
                function: Some(function),
                model: Some(model.to_string()),
                parameters: Some(parameters),
                input: Value::Object(Default::default()),
            },
        }
    }

    /// `continue-task` feeding one text chunk into a running task.
    pub(crate) fn continue_text(task_id: &str, text: &str) -> Self {
        Self {
            header: RequestHeader {
                action: Action::ContinueTask,
                task_id: task_id.to_string(),
                streaming: "duplex",
            },
            payload: RequestPayload {
                input: serde_json::json!({ "text": text }),
                ..Default::default()
            },
        }
    }

    /// `finish-task` asking the service to flush and close the task.
    pub(crate) fn finish_task(task_id: &str) -> Self {
        Self {
            header: RequestHeader {
                action: Action::FinishTask,
                task_id: task_id.to_string(),
                streaming: "duplex",
            },
            payload: RequestPayload {
                input: Value::Object(Default::default()),
                ..Default::default()
            },
        }
    }

    pub(crate) fn into_message(self) -> Result<Message, DashScopeError> {
        let text = serde_json::to_string(&self)?;
        Ok(Message::Text(text.into()))
    }
}

#[derive(Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub(crate) enum EventKind {
    TaskStarted,
    ResultGenerated,
    TaskFinished,
    TaskFailed,
    #[serde(other)]
    Unknown,
}

/// Service to client envelope.
#[derive(Deserialize, Debug)]
pub(crate) struct TaskEvent {
    pub header: EventHeader,
    #[serde(default)]
    pub payload: EventPayload,
}

#[derive(Deserialize, Debug)]
pub(crate) struct EventHeader {
    #[serde(default)]
    pub task_id: String,
    pub event: EventKind,
    #[serde(default)]
    pub error_code: Option<String>,
    #[serde(default)]
    pub error_message: Option<String>,
}

#[derive(Deserialize, Debug, Default)]
pub(crate) struct EventPayload {
    #[serde(default)]
    pub output: Option<EventOutput>,
}

#[derive(Deserialize, Debug, Default)]
pub(crate) struct EventOutput {
    #[serde(default)]
    pub sentence: Option<Sentence>,
}

/// One recognized sentence. `end_time` is only present once the
/// sentence is final.
#[derive(Deserialize, Debug)]
pub(crate) struct Sentence {
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub end_time: Option<u64>,
}

impl TaskEvent {
    pub(crate) fn failure(&self) -> DashScopeError {
        DashScopeError::Task {
            code: self
                .header
                .error_code
                .clone()
                .unwrap_or_else(|| "unknown".to_string()),
            message: self
                .header
                .error_message
                .clone()
                .unwrap_or_else(|| "task failed".to_string()),
        }
    }
}

/// Reads frames until the service acknowledges the task.
///
/// A `task-failed` event or a closed socket before `task-started` is the
/// provider rejecting the task; the caller surfaces that from `start`.
pub(crate) async fn await_task_started(
    source: &mut SplitStream<WsStream>,
    task_id: &str,
) -> Result<(), DashScopeError> {
    loop {
        match source.next().await {
            Some(Ok(Message::Text(text))) => {
                let event: TaskEvent = serde_json::from_str(&text)?;
                match event.header.event {
                    EventKind::TaskStarted if event.header.task_id == task_id => {
                        debug!(task_id, "Task acknowledged");
                        return Ok(());
                    }
                    EventKind::TaskFailed => return Err(event.failure()),
                    _ => {}
                }
            }
            Some(Ok(Message::Close(_))) | None => {
                return Err(DashScopeError::Stream(
                    "connection closed before task-started".to_string(),
                ));
            }
            Some(Ok(_)) => {}
            Some(Err(e)) => return Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn task_ids_are_32_hex_chars() {
        let id = new_task_id();
        assert_eq!(id.len(), 32);
        assert!(id.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn run_task_serializes_the_duplex_envelope() {
        let request = TaskRequest::run_task(
            "abc123",
            "asr",
            "recognition",
            "paraformer-realtime-v2",
            serde_json::json!({ "format": "pcm", "sample_rate": 16000 }),
        );
        let value: Value = serde_json::to_value(&request).unwrap();
        assert_eq!(value["header"]["action"], "run-task");
        assert_eq!(value["header"]["task_id"], "abc123");
        assert_eq!(value["header"]["streaming"], "duplex");
        assert_eq!(value["payload"]["task_group"], "audio");
        assert_eq!(value["payload"]["function"], "recognition");
        assert_eq!(value["payload"]["parameters"]["sample_rate"], 16000);
        assert_eq!(value["payload"]["input"], serde_json::json!({}));
    }

    #[test]
    fn continue_task_carries_text_input_only() {
        let request = TaskRequest::continue_text("abc123", "你好。");
        let value: Value = serde_json::to_value(&request).unwrap();
        assert_eq!(value["header"]["action"], "continue-task");
        assert_eq!(value["payload"]["input"]["text"], "你好。");
        assert!(value["payload"].get("model").is_none());
    }

    #[test]
    fn events_parse_with_unknown_kinds_and_missing_fields() {
        let event: TaskEvent = serde_json::from_str(
            r#"{"header":{"task_id":"t1","event":"result-generated"},
                "payload":{"output":{"sentence":{"text":"你好","end_time":1200}}}}"#,
        )
        .unwrap();
        assert_eq!(event.header.event, EventKind::ResultGenerated);
        let sentence = event.payload.output.unwrap().sentence.unwrap();
        assert_eq!(sentence.text, "你好");
        assert_eq!(sentence.end_time, Some(1200));

        let event: TaskEvent =
            serde_json::from_str(r#"{"header":{"task_id":"t1","event":"task-forwarded"}}"#)
                .unwrap();
        assert_eq!(event.header.event, EventKind::Unknown);
    }

    #[test]
    fn failure_event_maps_to_task_error() {
        let event: TaskEvent = serde_json::from_str(
            r#"{"header":{"task_id":"t1","event":"task-failed",
                "error_code":"InvalidApiKey","error_message":"invalid key"}}"#,
        )
        .unwrap();
        match event.failure() {
            DashScopeError::Task { code, message } => {
                assert_eq!(code, "InvalidApiKey");
                assert_eq!(message, "invalid key");
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}
