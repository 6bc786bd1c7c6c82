//! Room handle shared between the job context and the agent session.

use crate::audio::AudioFrame;
use crate::error::AgentError;
use crate::signal::SignalSession;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::{Mutex, broadcast};

const AUDIO_CHANNEL_CAPACITY: usize = 256;

/// Clonable view of one media room.
///
/// Audio crosses this seam as PCM frames on broadcast channels: the
/// session subscribes to participant audio and publishes agent speech,
/// while the transport side feeds and drains the same channels. The
/// signaling connection is attached by `JobContext::connect`; until then
/// the room is not connected and published audio has no room-side
/// listener.
#[derive(Clone)]
pub struct RoomHandle {
    inner: Arc<RoomInner>,
}

struct RoomInner {
    name: String,
    connected: AtomicBool,
    participant_audio: broadcast::Sender<AudioFrame>,
    playback: broadcast::Sender<AudioFrame>,
    signal: Mutex<Option<SignalSession>>,
}

impl RoomHandle {
    pub(crate) fn new(name: impl Into<String>) -> Self {
        let (participant_audio, _) = broadcast::channel(AUDIO_CHANNEL_CAPACITY);
        let (playback, _) = broadcast::channel(AUDIO_CHANNEL_CAPACITY);
        Self {
            inner: Arc::new(RoomInner {
                name: name.into(),
                connected: AtomicBool::new(false),
                participant_audio,
                playback,
                signal: Mutex::new(None),
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn is_connected(&self) -> bool {
        self.inner.connected.load(Ordering::SeqCst)
    }

    /// Audio received from room participants.
    pub fn subscribe_audio(&self) -> broadcast::Receiver<AudioFrame> {
        self.inner.participant_audio.subscribe()
    }

    /// Queues agent speech for playback into the room.
    pub fn publish_audio(&self, frame: AudioFrame) {
        let _ = self.inner.playback.send(frame);
    }

    /// Audio the agent has published; consumed by the transport side.
    pub fn subscribe_playback(&self) -> broadcast::Receiver<AudioFrame> {
        self.inner.playback.subscribe()
    }

    /// Feeds participant audio into the room bridge.
    pub fn feed_participant_audio(&self, frame: AudioFrame) {
        let _ = self.inner.participant_audio.send(frame);
    }

    pub(crate) async fn attach_signal(&self, session: SignalSession) {
        *self.inner.signal.lock().await = Some(session);
        self.inner.connected.store(true, Ordering::SeqCst);
    }

    pub(crate) fn mark_connected(&self) {
        self.inner.connected.store(true, Ordering::SeqCst);
    }

    /// Leaves the room and stops the signaling session.
    pub async fn close(&self) -> Result<(), AgentError> {
        if let Some(session) = self.inner.signal.lock().await.take() {
            session.close().await?;
        }
        self.inner.connected.store(false, Ordering::SeqCst);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn new_room_is_not_connected() {
        let room = RoomHandle::new("demo-room");
        assert_eq!(room.name(), "demo-room");
        assert!(!room.is_connected());
    }

    #[tokio::test]
    async fn audio_bridge_fans_out_to_subscribers() {
        let room = RoomHandle::new("bridge");
        let mut listener = room.subscribe_audio();
        let frame = AudioFrame::from_samples(&[1, 2, 3], 16000, 1);
        room.feed_participant_audio(frame.clone());
        assert_eq!(listener.recv().await.unwrap(), frame);

        let mut playback = room.subscribe_playback();
        room.publish_audio(frame.clone());
        assert_eq!(playback.recv().await.unwrap(), frame);
    }

    #[tokio::test]
    async fn close_without_signal_resets_connected() {
        let room = RoomHandle::new("demo");
        room.mark_connected();
        assert!(room.is_connected());
        room.close().await.unwrap();
        assert!(!room.is_connected());
    }
}
