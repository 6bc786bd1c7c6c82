//! Per-job context handed to the worker entrypoint.

use crate::error::AgentError;
use crate::room::RoomHandle;
use crate::signal::SignalSession;
use tracing::info;

enum ConnectTarget {
    /// Join through the media server's signaling endpoint.
    Server { url: String, token: String },
    /// In-process room with no server behind it.
    Local,
}

/// The framework's handle for one assistant-to-room assignment. Supplies
/// the not-yet-joined room and the ability to connect to it.
pub struct JobContext {
    job_id: String,
    room: RoomHandle,
    target: ConnectTarget,
}

impl JobContext {
    pub(crate) fn from_assignment(
        job_id: String,
        room_name: String,
        url: String,
        token: String,
    ) -> Self {
        Self {
            job_id,
            room: RoomHandle::new(room_name),
            target: ConnectTarget::Server { url, token },
        }
    }

    /// Context for an in-process room; `connect` completes without a
    /// server. Used by local tooling and tests.
    pub fn local(room_name: impl Into<String>) -> Self {
        Self {
            job_id: "local".to_string(),
            room: RoomHandle::new(room_name),
            target: ConnectTarget::Local,
        }
    }

    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    pub fn room(&self) -> &RoomHandle {
        &self.room
    }

    /// Joins the room. Suspends until the transport join completes or
    /// fails; on success the room handle reports connected.
    pub async fn connect(&self) -> Result<(), AgentError> {
        match &self.target {
            ConnectTarget::Server { url, token } => {
                let (session, join) = SignalSession::connect(url, token).await?;
                let server_room = join.room.map(|room| room.name).unwrap_or_default();
                self.room.attach_signal(session).await;
                info!(
                    room = %self.room.name(),
                    server_room = %server_room,
                    "Joined room through signaling"
                );
                Ok(())
            }
            ConnectTarget::Local => {
                self.room.mark_connected();
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn local_context_connects_without_server() {
        let ctx = JobContext::local("demo-room");
        assert_eq!(ctx.room().name(), "demo-room");
        assert!(!ctx.room().is_connected());
        ctx.connect().await.unwrap();
        assert!(ctx.room().is_connected());
    }
}
