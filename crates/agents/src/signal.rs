//! Minimal signaling client for the media server's `/rtc` endpoint.
//!
//! Joins a room, answers the server's protocol pings for the lifetime of
//! the session, and sends the leave request on close. The media plane is
//! not negotiated here; audio stays on the room bridge.

use crate::error::AgentError;
use futures_util::{SinkExt, StreamExt};
use livekit_protocol as proto;
use prost::Message as ProstMessage;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::protocol::Message as WsMessage;
use tracing::{debug, warn};

const DEFAULT_PING_INTERVAL_SECS: u64 = 30;
const CLOSE_GRACE: Duration = Duration::from_secs(2);

/// Normalizes a server URL to its websocket form, without a trailing slash.
pub(crate) fn ws_base(server_url: &str) -> String {
    let base = server_url.trim_end_matches('/');
    if let Some(rest) = base.strip_prefix("http://") {
        format!("ws://{}", rest)
    } else if let Some(rest) = base.strip_prefix("https://") {
        format!("wss://{}", rest)
    } else {
        base.to_string()
    }
}

fn signal_url(server_url: &str, token: &str) -> String {
    format!("{}/rtc?access_token={}&auto_subscribe=1", ws_base(server_url), token)
}

pub(crate) fn unix_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or_default()
}

/// An established signaling connection for one room.
pub(crate) struct SignalSession {
    outbound: mpsc::Sender<proto::SignalRequest>,
    pump: JoinHandle<()>,
}

impl SignalSession {
    /// Connects and waits for the server's join acknowledgment. The first
    /// binary frame must decode to a `Join` response; anything else is a
    /// protocol error.
    pub(crate) async fn connect(
        server_url: &str,
        token: &str,
    ) -> Result<(Self, proto::JoinResponse), AgentError> {
        let url = signal_url(server_url, token);
        let (ws, _) = connect_async(&url).await?;
        let (mut sink, mut stream) = ws.split();

        let join = loop {
            match stream.next().await {
                Some(Ok(WsMessage::Binary(data))) => {
                    let response = proto::SignalResponse::decode(data.as_ref())?;
                    match response.message {
                        Some(proto::signal_response::Message::Join(join)) => break join,
                        Some(_) => {
                            return Err(AgentError::Signal(
                                "unexpected signal message before join".to_string(),
                            ));
                        }
                        None => {
                            return Err(AgentError::Signal(
                                "empty signal response before join".to_string(),
                            ));
                        }
                    }
                }
                Some(Ok(WsMessage::Ping(_))) | Some(Ok(WsMessage::Pong(_))) => continue,
                Some(Ok(_)) => {
                    return Err(AgentError::Signal(
                        "unexpected non-binary frame before join".to_string(),
                    ));
                }
                Some(Err(e)) => return Err(e.into()),
                None => {
                    return Err(AgentError::Signal(
                        "connection closed before join".to_string(),
                    ));
                }
            }
        };

        let ping_interval = if join.ping_interval > 0 {
            join.ping_interval as u64
        } else {
            DEFAULT_PING_INTERVAL_SECS
        };

        let (outbound, mut outbound_rx) = mpsc::channel::<proto::SignalRequest>(16);
        let pump = tokio::spawn(async move {
            let mut ping = tokio::time::interval(Duration::from_secs(ping_interval));
            ping.tick().await;
            loop {
                tokio::select! {
                    request = outbound_rx.recv() => {
                        let Some(request) = request else { break };
                        let leaving = matches!(
                            request.message,
                            Some(proto::signal_request::Message::Leave(_))
                        );
                        if sink
                            .send(WsMessage::Binary(request.encode_to_vec().into()))
                            .await
                            .is_err()
                        {
                            break;
                        }
                        if leaving {
                            let _ = sink.close().await;
                            break;
                        }
                    }
                    incoming = stream.next() => {
                        match incoming {
                            Some(Ok(WsMessage::Binary(data))) => {
                                match proto::SignalResponse::decode(data.as_ref()) {
                                    Ok(response) => handle_signal_event(response),
                                    Err(e) => warn!(error = %e, "Undecodable signal message"),
                                }
                            }
                            Some(Ok(WsMessage::Close(_))) | None => {
                                debug!("Signal connection closed by server");
                                break;
                            }
                            Some(Ok(_)) => {}
                            Some(Err(e)) => {
                                warn!(error = %e, "Signal stream error");
                                break;
                            }
                        }
                    }
                    _ = ping.tick() => {
                        let request = proto::SignalRequest {
                            message: Some(proto::signal_request::Message::Ping(unix_millis())),
                        };
                        if sink
                            .send(WsMessage::Binary(request.encode_to_vec().into()))
                            .await
                            .is_err()
                        {
                            break;
                        }
                    }
                }
            }
            debug!("Signal pump finished");
        });

        Ok((Self { outbound, pump }, join))
    }

    /// Sends the leave request and waits briefly for the pump to drain.
    pub(crate) async fn close(self) -> Result<(), AgentError> {
        let leave = proto::SignalRequest {
            message: Some(proto::signal_request::Message::Leave(proto::LeaveRequest {
                reason: proto::DisconnectReason::ClientInitiated as i32,
                ..Default::default()
            })),
        };
        // The pump may already be gone if the server dropped us.
        let _ = self.outbound.send(leave).await;
        let _ = tokio::time::timeout(CLOSE_GRACE, self.pump).await;
        Ok(())
    }
}

fn handle_signal_event(response: proto::SignalResponse) {
    match response.message {
        Some(proto::signal_response::Message::Leave(_)) => {
            debug!("Server requested leave");
        }
        Some(proto::signal_response::Message::Pong(_)) => {}
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ws_base_rewrites_http_schemes() {
        assert_eq!(ws_base("http://localhost:7880/"), "ws://localhost:7880");
        assert_eq!(ws_base("https://media.example.com"), "wss://media.example.com");
        assert_eq!(ws_base("ws://localhost:7880"), "ws://localhost:7880");
    }

    #[test]
    fn signal_url_carries_token_and_subscription() {
        let url = signal_url("wss://media.example.com", "tok123");
        assert_eq!(
            url,
            "wss://media.example.com/rtc?access_token=tok123&auto_subscribe=1"
        );
    }
}
