//! Worker registration and job dispatch over the server's agent socket.
//!
//! The worker holds one long-lived WebSocket to `{server}/agent`,
//! registers itself for room jobs, answers availability probes, and
//! spawns the entrypoint for every assignment. Job sessions run as
//! detached tasks; the worker only tears them down on explicit
//! termination or shutdown.

use crate::error::AgentError;
use crate::job::JobContext;
use crate::room::RoomHandle;
use crate::signal;
use futures_util::{SinkExt, StreamExt};
use livekit_api::access_token::{AccessToken, VideoGrants};
use livekit_protocol as proto;
use prost::Message as ProstMessage;
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::protocol::Message;
use tracing::{Instrument, error, info, info_span, warn};

const PING_INTERVAL: Duration = Duration::from_secs(10);
const WORKER_VERSION: &str = env!("CARGO_PKG_VERSION");

type JobFuture = Pin<Box<dyn Future<Output = Result<(), AgentError>> + Send>>;
type EntryFn = Arc<dyn Fn(JobContext) -> JobFuture + Send + Sync>;

/// What the worker registers as and what it runs per job.
#[derive(Clone)]
pub struct WorkerOptions {
    agent_name: String,
    entrypoint: EntryFn,
}

impl WorkerOptions {
    pub fn new<F, Fut>(agent_name: impl Into<String>, entrypoint: F) -> Self
    where
        F: Fn(JobContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), AgentError>> + Send + 'static,
    {
        Self {
            agent_name: agent_name.into(),
            entrypoint: Arc::new(move |ctx| Box::pin(entrypoint(ctx))),
        }
    }

    pub fn agent_name(&self) -> &str {
        &self.agent_name
    }
}

/// Server coordinates and credentials for the agent socket.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub url: String,
    pub api_key: String,
    pub api_secret: String,
}

struct ActiveJob {
    room: RoomHandle,
    task: JoinHandle<()>,
}

pub struct Worker {
    options: WorkerOptions,
    server: ServerConfig,
    jobs: HashMap<String, ActiveJob>,
}

impl Worker {
    pub fn new(options: WorkerOptions, server: ServerConfig) -> Self {
        Self {
            options,
            server,
            jobs: HashMap::new(),
        }
    }

    fn registration_token(&self) -> Result<String, AgentError> {
        let token = AccessToken::with_api_key(&self.server.api_key, &self.server.api_secret)
            .with_identity(&format!("worker-{}", self.options.agent_name))
            .with_grants(VideoGrants {
                // TEMP-PROBE agent: true,
                ..Default::default()
            })
            .with_ttl(Duration::from_secs(3600))
            .to_jwt()?;
        Ok(token)
    }

    fn agent_endpoint(&self) -> String {
        format!("{}/agent", signal::ws_base(&self.server.url))
    }

    /// Runs the worker until `shutdown` resolves or the server closes
    /// the agent socket.
    pub async fn run(mut self, shutdown: impl Future<Output = ()>) -> Result<(), AgentError> {
        let token = self.registration_token()?;
        let endpoint = self.agent_endpoint();
        let mut request = endpoint.clone().into_client_request()?;
        request.headers_mut().insert(
            "Authorization",
            HeaderValue::from_str(&format!("Bearer {token}"))
                .map_err(|e| AgentError::Transport(e.to_string()))?,
        );

        info!(endpoint = %endpoint, agent = %self.options.agent_name, "Registering worker");
        let (stream, _) = connect_async(request).await?;
        let (mut sink, mut incoming) = stream.split();

        let register = proto::WorkerMessage {
            message: Some(proto::worker_message::Message::Register(
                proto::RegisterWorkerRequest {
                    r#type: proto::JobType::JtRoom as i32,
                    agent_name: self.options.agent_name.clone(),
                    version: WORKER_VERSION.to_string(),
                    ..Default::default()
                },
            )),
        };
        sink.send(Message::Binary(register.encode_to_vec().into()))
            .await?;

        let mut ping = tokio::time::interval(PING_INTERVAL);
        ping.tick().await;
        tokio::pin!(shutdown);

        let mut outcome = Ok(());
        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("Shutdown requested; draining jobs");
                    break;
                }
                _ = ping.tick() => {
                    let ping_msg = proto::WorkerMessage {
                        message: Some(proto::worker_message::Message::Ping(proto::WorkerPing {
                            timestamp: signal::unix_millis(),
                        })),
                    };
                    sink.send(Message::Binary(ping_msg.encode_to_vec().into())).await?;
                }
                frame = incoming.next() => {
                    match frame {
                        Some(Ok(Message::Binary(data))) => {
                            let msg = proto::ServerMessage::decode(data.as_ref())?;
                            if let Some(reply) = self.handle_server_message(msg)? {
                                sink.send(Message::Binary(reply.encode_to_vec().into())).await?;
                            }
                        }
                        Some(Ok(Message::Close(_))) | None => {
                            warn!("Agent socket closed by server");
                            break;
                        }
                        Some(Ok(_)) => {}
                        Some(Err(e)) => {
                            error!(error = %e, "Agent socket error");
                            outcome = Err(AgentError::from(e));
                            break;
                        }
                    }
                }
            }
        }

        for (job_id, job) in self.jobs.drain() {
            if let Err(e) = job.room.close().await {
                warn!(job_id = %job_id, error = %e, "Room close failed during drain");
            }
            job.task.abort();
        }
        let _ = sink.send(Message::Close(None)).await;
        outcome
    }

    fn handle_server_message(
        &mut self,
        msg: proto::ServerMessage,
    ) -> Result<Option<proto::WorkerMessage>, AgentError> {
        match msg.message {
            Some(proto::server_message::Message::Register(resp)) => {
                info!(worker_id = %resp.worker_id, "Worker registered");
                Ok(None)
            }
            Some(proto::server_message::Message::Availability(req)) => {
                let job = req
                    .job
                    .ok_or_else(|| AgentError::Session("availability request without job".into()))?;
                info!(job_id = %job.id, "Availability requested; accepting");
                Ok(Some(proto::WorkerMessage {
                    message: Some(proto::worker_message::Message::Availability(
                        proto::AvailabilityResponse {
                            job_id: job.id,
                            available: true,
                            participant_identity: format!("agent-{}", self.options.agent_name),
                            participant_name: self.options.agent_name.clone(),
                            ..Default::default()
                        },
                    )),
                }))
            }
            Some(proto::server_message::Message::Assignment(assignment)) => {
                self.spawn_job(assignment)?;
                Ok(None)
            }
            Some(proto::server_message::Message::Termination(term)) => {
                if let Some(job) = self.jobs.remove(&term.job_id) {
                    info!(job_id = %term.job_id, "Job terminated by server");
                    let room = job.room;
                    tokio::spawn(async move {
                        if let Err(e) = room.close().await {
                            warn!(error = %e, "Room close failed after termination");
                        }
                    });
                    job.task.abort();
                }
                Ok(None)
            }
            Some(proto::server_message::Message::Pong(_)) => Ok(None),
            _ => Ok(None),
        }
    }

    fn spawn_job(&mut self, assignment: proto::JobAssignment) -> Result<(), AgentError> {
        let job = assignment
            .job
            .ok_or_else(|| AgentError::Session("assignment without job".into()))?;
        let room_name = job
            .room
            .as_ref()
            .map(|room| room.name.clone())
            .unwrap_or_default();
        let url = assignment
            .url
            .filter(|url| !url.is_empty())
            .unwrap_or_else(|| self.server.url.clone());

        let ctx =
            JobContext::from_assignment(job.id.clone(), room_name.clone(), url, assignment.token);
        let room = ctx.room().clone();
        let entry = Arc::clone(&self.options.entrypoint);
        let span = info_span!("job", job_id = %job.id, room = %room_name);
        let job_id = job.id.clone();
        let task = tokio::spawn(
            async move {
                match entry(ctx).await {
                    Ok(()) => info!("Job entrypoint finished"),
                    Err(e) => error!(error = %e, "Job entrypoint failed"),
                }
            }
            .instrument(span),
        );

        info!(job_id = %job_id, room = %room_name, "Job assigned");
        self.jobs.insert(job_id, ActiveJob { room, task });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn agent_endpoint_rewrites_scheme() {
        let worker = Worker::new(
            WorkerOptions::new("mynah", |_ctx| async { Ok(()) }),
            ServerConfig {
                url: "https://livekit.example.com/".to_string(),
                api_key: "devkey".to_string(),
                api_secret: "secret".to_string(),
            },
        );
        assert_eq!(worker.agent_endpoint(), "wss://livekit.example.com/agent");
    }

    #[test]
    fn registration_token_is_issued() {
        let worker = Worker::new(
            WorkerOptions::new("mynah", |_ctx| async { Ok(()) }),
            ServerConfig {
                url: "ws://localhost:7880".to_string(),
                api_key: "devkey".to_string(),
                api_secret: "secret-with-enough-entropy-for-hs256".to_string(),
            },
        );
        let token = worker.registration_token().unwrap();
        assert!(!token.is_empty());
    }

    #[tokio::test]
    async fn availability_is_accepted_with_agent_identity() {
        let mut worker = Worker::new(
            WorkerOptions::new("mynah", |_ctx| async { Ok(()) }),
            ServerConfig {
                url: "ws://localhost:7880".to_string(),
                api_key: "devkey".to_string(),
                api_secret: "secret".to_string(),
            },
        );
        let msg = proto::ServerMessage {
            message: Some(proto::server_message::Message::Availability(
                proto::AvailabilityRequest {
                    job: Some(proto::Job {
                        id: "AJ_123".to_string(),
                        ..Default::default()
                    }),
                    ..Default::default()
                },
            )),
        };
        let reply = worker.handle_server_message(msg).unwrap().unwrap();
        match reply.message {
            Some(proto::worker_message::Message::Availability(resp)) => {
                assert_eq!(resp.job_id, "AJ_123");
                assert!(resp.available);
                assert_eq!(resp.participant_identity, "agent-mynah");
            }
            other => panic!("unexpected reply: {other:?}"),
        }
    }

    #[tokio::test]
    async fn assignment_spawns_and_tracks_the_job() {
        let (done_tx, done_rx) = tokio::sync::oneshot::channel();
        let done_tx = std::sync::Mutex::new(Some(done_tx));
        let mut worker = Worker::new(
            WorkerOptions::new("mynah", move |ctx: JobContext| {
                let tx = done_tx.lock().unwrap().take();
                async move {
                    if let Some(tx) = tx {
                        let _ = tx.send(ctx.room().name().to_string());
                    }
                    Ok(())
                }
            }),
            ServerConfig {
                url: "ws://localhost:7880".to_string(),
                api_key: "devkey".to_string(),
                api_secret: "secret".to_string(),
            },
        );
        let msg = proto::ServerMessage {
            message: Some(proto::server_message::Message::Assignment(
                proto::JobAssignment {
                    job: Some(proto::Job {
                        id: "AJ_456".to_string(),
                        room: Some(proto::Room {
                            name: "assigned-room".to_string(),
                            ..Default::default()
                        }),
                        ..Default::default()
                    }),
                    url: Some(String::new()),
                    token: "job-token".to_string(),
                },
            )),
        };
        assert!(worker.handle_server_message(msg).unwrap().is_none());
        assert!(worker.jobs.contains_key("AJ_456"));
        assert_eq!(done_rx.await.unwrap(), "assigned-room");
    }
}
