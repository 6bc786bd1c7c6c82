//! The per-job session binding recognition, synthesis and completion to
//! a room.
//!
//! `start` acknowledges both streaming providers before anything is
//! spawned, then runs the pipeline: participant audio is resampled into
//! the recognizer, final transcripts drive a completion turn, completion
//! deltas are chunked into sentences for the synthesizer, and synthesized
//! frames are resampled back onto the room bridge.

use crate::agent::Agent;
use crate::audio::{AudioFrame, PcmResampler, ROOM_SAMPLE_RATE};
use crate::capability::{
    CapabilityHandle, ChatModel, ChatTurn, SpeechToText, SttEvent, TextToSpeech,
};
use crate::error::AgentError;
use crate::room::RoomHandle;
use crate::text::SentenceSplitter;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{Instrument, debug, error, info, info_span, warn};

const AUDIO_QUEUE: usize = 64;
const EVENT_QUEUE: usize = 32;

/// Builder for the three capability slots of an [`AgentSession`].
#[derive(Default)]
pub struct AgentSessionBuilder {
    stt: Option<Box<dyn SpeechToText>>,
    tts: Option<Box<dyn TextToSpeech>>,
    llm: Option<Box<dyn ChatModel>>,
}

impl AgentSessionBuilder {
    pub fn stt(mut self, stt: impl SpeechToText + 'static) -> Self {
        self.stt = Some(Box::new(stt));
        self
    }

    pub fn tts(mut self, tts: impl TextToSpeech + 'static) -> Self {
        self.tts = Some(Box::new(tts));
        self
    }

    pub fn llm(mut self, llm: impl ChatModel + 'static) -> Self {
        self.llm = Some(Box::new(llm));
        self
    }

    pub fn build(self) -> Result<AgentSession, AgentError> {
        Ok(AgentSession {
            stt: self
                .stt
                .ok_or_else(|| AgentError::Session("recognition slot is not configured".into()))?,
            tts: self
                .tts
                .ok_or_else(|| AgentError::Session("synthesis slot is not configured".into()))?,
            llm: Some(
                self.llm
                    .ok_or_else(|| AgentError::Session("completion slot is not configured".into()))?,
            ),
            running: None,
        })
    }
}

/// The ephemeral per-job aggregate. Created per job, discarded when the
/// room closes; the pipeline tasks detach from the value itself so the
/// session keeps serving after the entrypoint returns.
pub struct AgentSession {
    stt: Box<dyn SpeechToText>,
    tts: Box<dyn TextToSpeech>,
    llm: Option<Box<dyn ChatModel>>,
    running: Option<RunningPipeline>,
}

impl std::fmt::Debug for AgentSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentSession").finish_non_exhaustive()
    }
}

struct RunningPipeline {
    stt_handle: CapabilityHandle,
    tts_handle: CapabilityHandle,
    audio_in: JoinHandle<()>,
    audio_out: JoinHandle<()>,
    turns: JoinHandle<()>,
}

impl AgentSession {
    pub fn builder() -> AgentSessionBuilder {
        AgentSessionBuilder::default()
    }

    pub fn is_running(&self) -> bool {
        self.running.is_some()
    }

    /// Binds the agent to the room and starts the pipeline.
    ///
    /// Suspends until both streaming providers have acknowledged their
    /// streams; a rejected credential or model identifier surfaces here
    /// and nothing is spawned.
    pub async fn start(&mut self, agent: Agent, room: &RoomHandle) -> Result<(), AgentError> {
        if self.running.is_some() || self.llm.is_none() {
            return Err(AgentError::Session("session is already started".into()));
        }

        let stt_spec = self.stt.input_spec();
        let (stt_audio_tx, stt_audio_rx) = mpsc::channel(AUDIO_QUEUE);
        let (stt_event_tx, stt_event_rx) = mpsc::channel(EVENT_QUEUE);
        let (tts_text_tx, tts_text_rx) = mpsc::channel(EVENT_QUEUE);
        let (tts_audio_tx, tts_audio_rx) = mpsc::channel(AUDIO_QUEUE);

        let stt_handle = self.stt.start(stt_audio_rx, stt_event_tx).await?;
        let tts_handle = self.tts.start(tts_text_rx, tts_audio_tx).await?;
        let llm = self
            .llm
            .take()
            .ok_or_else(|| AgentError::Session("session is already started".into()))?;

        let span = info_span!("agent_session", room = %room.name());
        let audio_in = tokio::spawn(
            pump_participant_audio(room.subscribe_audio(), stt_audio_tx, stt_spec.sample_rate)
                .instrument(span.clone()),
        );
        let audio_out =
            tokio::spawn(pump_agent_audio(tts_audio_rx, room.clone()).instrument(span.clone()));
        let turns =
            tokio::spawn(run_turn_loop(llm, agent, stt_event_rx, tts_text_tx).instrument(span));

        info!(room = %room.name(), "Agent session is running");
        self.running = Some(RunningPipeline {
            stt_handle,
            tts_handle,
            audio_in,
            audio_out,
            turns,
        });
        Ok(())
    }

    /// Stops the pipeline tasks. Closing the room has the same effect
    /// from the transport side; this is the session-local teardown.
    pub fn close(&mut self) {
        if let Some(running) = self.running.take() {
            running.stt_handle.stop();
            running.tts_handle.stop();
            running.audio_in.abort();
            running.audio_out.abort();
            running.turns.abort();
            info!("Agent session closed");
        }
    }
}

/// Resamples one frame towards `target_rate`, rebuilding the converter
/// when the input rate changes mid-stream.
fn bridge_rate(
    frame: &AudioFrame,
    target_rate: u32,
    cache: &mut Option<(u32, PcmResampler)>,
) -> Option<AudioFrame> {
    if frame.sample_rate == target_rate {
        return Some(frame.clone());
    }
    if cache.as_ref().map(|(rate, _)| *rate) != Some(frame.sample_rate) {
        match PcmResampler::new(frame.sample_rate, target_rate) {
            Ok(resampler) => *cache = Some((frame.sample_rate, resampler)),
            Err(e) => {
                warn!(error = %e, rate = frame.sample_rate, "Cannot resample frame");
                return None;
            }
        }
    }
    let (_, resampler) = cache.as_mut()?;
    let resampled = resampler.process(&frame.samples());
    if resampled.is_empty() {
        None
    } else {
        Some(AudioFrame::from_samples(
            &resampled,
            target_rate,
            frame.channels,
        ))
    }
}

async fn pump_participant_audio(
    mut source: broadcast::Receiver<AudioFrame>,
    sink: mpsc::Sender<AudioFrame>,
    target_rate: u32,
) {
    let mut cache = None;
    loop {
        match source.recv().await {
            Ok(frame) => {
                if let Some(out) = bridge_rate(&frame, target_rate, &mut cache) {
                    if sink.send(out).await.is_err() {
                        break;
                    }
                }
            }
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                warn!(skipped, "Participant audio lagged; frames dropped");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
    debug!("Participant audio pump finished");
}

async fn pump_agent_audio(mut source: mpsc::Receiver<AudioFrame>, room: RoomHandle) {
    let mut cache = None;
    while let Some(frame) = source.recv().await {
        if let Some(out) = bridge_rate(&frame, ROOM_SAMPLE_RATE, &mut cache) {
            room.publish_audio(out);
        }
    }
    debug!("Agent audio pump finished");
}

/// Drives one completion turn per final transcript. History is seeded
/// with the agent instructions as the system turn; assistant replies are
/// appended after each completed turn.
async fn run_turn_loop(
    llm: Box<dyn ChatModel>,
    agent: Agent,
    mut events: mpsc::Receiver<SttEvent>,
    speech: mpsc::Sender<String>,
) {
    let mut history = vec![ChatTurn::system(agent.instructions())];
    while let Some(event) = events.recv().await {
        let SttEvent::Transcript { text, is_final } = event;
        if !is_final {
            debug!(partial = %text, "Interim transcript");
            continue;
        }
        let text = text.trim().to_string();
        if text.is_empty() {
            continue;
        }
        info!(transcript = %text, "Final transcript; running completion turn");
        history.push(ChatTurn::user(text));

        let (delta_tx, mut delta_rx) = mpsc::channel(EVENT_QUEUE);
        let mut splitter = SentenceSplitter::new();
        // The turn future borrows `history`; scope it so the borrow ends
        // before the history is updated below.
        let result = {
            let turn = llm.complete(&history, delta_tx);
            tokio::pin!(turn);

            let mut result = None;
            let mut deltas_done = false;
            while !deltas_done {
                tokio::select! {
                    delta = delta_rx.recv() => match delta {
                        Some(chunk) => {
                            for sentence in splitter.push(&chunk) {
                                if speech.send(sentence).await.is_err() {
                                    return;
                                }
                            }
                        }
                        None => deltas_done = true,
                    },
                    turn_result = &mut turn, if result.is_none() => {
                        result = Some(turn_result);
                    }
                }
            }
            match result {
                Some(result) => result,
                None => turn.await,
            }
        };
        match result {
            Ok(reply) => {
                if let Some(tail) = splitter.flush() {
                    if speech.send(tail).await.is_err() {
                        return;
                    }
                }
                history.push(ChatTurn::assistant(reply));
            }
            Err(e) => {
                error!(error = %e, "Completion turn failed");
                history.pop();
            }
        }
    }
    // Transcript stream ended; dropping the speech sender lets the
    // synthesizer drain and finish.
    debug!("Turn loop finished");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capability::{
        AudioSpec, CapabilityError, MockChatModel, MockSpeechToText, MockTextToSpeech,
    };
    use std::time::Duration;
    use tokio::time::timeout;

    const WAIT: Duration = Duration::from_secs(5);

    fn running_handle() -> CapabilityHandle {
        CapabilityHandle::new(tokio::spawn(async { Ok(()) }))
    }

    #[test]
    fn build_requires_all_three_slots() {
        let err = AgentSession::builder().build().unwrap_err();
        assert!(matches!(err, AgentError::Session(_)));
    }

    #[tokio::test]
    async fn start_propagates_provider_rejection_and_skips_synthesis() {
        let mut stt = MockSpeechToText::new();
        stt.expect_input_spec()
            .return_const(AudioSpec { sample_rate: 16000, channels: 1 });
        stt.expect_start().times(1).returning(|_, _| {
            Err(CapabilityError::Provider("invalid api key".to_string()))
        });

        let mut tts = MockTextToSpeech::new();
        tts.expect_output_spec()
            .return_const(AudioSpec { sample_rate: 22050, channels: 1 });
        tts.expect_start().times(0);

        let llm = MockChatModel::new();

        let room = RoomHandle::new("demo-room");
        let mut session = AgentSession::builder()
            .stt(stt)
            .tts(tts)
            .llm(llm)
            .build()
            .unwrap();

        let err = session
            .start(Agent::new("助手"), &room)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            AgentError::Capability(CapabilityError::Provider(_))
        ));
        assert!(!session.is_running());
    }

    #[tokio::test]
    async fn start_twice_is_an_error() {
        let mut stt = MockSpeechToText::new();
        stt.expect_input_spec()
            .return_const(AudioSpec { sample_rate: 16000, channels: 1 });
        stt.expect_start()
            .times(1)
            .returning(|_, _| Ok(running_handle()));

        let mut tts = MockTextToSpeech::new();
        tts.expect_output_spec()
            .return_const(AudioSpec { sample_rate: 22050, channels: 1 });
        tts.expect_start()
            .times(1)
            .returning(|_, _| Ok(running_handle()));

        let llm = MockChatModel::new();

        let room = RoomHandle::new("demo-room");
        let mut session = AgentSession::builder()
            .stt(stt)
            .tts(tts)
            .llm(llm)
            .build()
            .unwrap();

        session.start(Agent::new("助手"), &room).await.unwrap();
        assert!(session.is_running());
        let err = session.start(Agent::new("助手"), &room).await.unwrap_err();
        assert!(matches!(err, AgentError::Session(_)));
        session.close();
    }

    #[tokio::test]
    async fn pipeline_runs_transcript_through_completion_to_synthesis() {
        let room = RoomHandle::new("pipeline-room");

        // Recognition: hand the event sender out to the test.
        let (events_probe_tx, mut events_probe_rx) = mpsc::channel(1);
        let mut stt = MockSpeechToText::new();
        stt.expect_input_spec()
            .return_const(AudioSpec { sample_rate: 16000, channels: 1 });
        stt.expect_start().times(1).returning(move |_audio, events| {
            let _ = events_probe_tx.try_send(events);
            Ok(running_handle())
        });

        // Completion: one delta, then the full reply.
        let mut llm = MockChatModel::new();
        llm.expect_complete().times(1).returning(|turns, deltas| {
            assert_eq!(turns.len(), 2);
            assert_eq!(turns[0].role, crate::capability::ChatRole::System);
            assert_eq!(turns[1].content, "你好。");
            let _ = deltas.try_send("好的。".to_string());
            Ok("好的。".to_string())
        });

        // Synthesis: echo sentences to the test and emit audio frames.
        let (speech_probe_tx, mut speech_probe_rx) = mpsc::channel(4);
        let mut tts = MockTextToSpeech::new();
        tts.expect_output_spec()
            .return_const(AudioSpec { sample_rate: 22050, channels: 1 });
        tts.expect_start().times(1).returning(move |mut text, audio| {
            let probe = speech_probe_tx.clone();
            Ok(CapabilityHandle::new(tokio::spawn(async move {
                while let Some(sentence) = text.recv().await {
                    let _ = probe.send(sentence).await;
                    let frame = AudioFrame::from_samples(&vec![0i16; 4800], 22050, 1);
                    let _ = audio.send(frame).await;
                }
                Ok(())
            })))
        });

        let mut playback = room.subscribe_playback();
        let mut session = AgentSession::builder()
            .stt(stt)
            .tts(tts)
            .llm(llm)
            .build()
            .unwrap();
        session
            .start(Agent::new("测试助手"), &room)
            .await
            .unwrap();

        let events = events_probe_rx.recv().await.expect("event sender");
        events
            .send(SttEvent::Transcript { text: "你好".to_string(), is_final: false })
            .await
            .unwrap();
        events
            .send(SttEvent::Transcript { text: "你好。".to_string(), is_final: true })
            .await
            .unwrap();

        let spoken = timeout(WAIT, speech_probe_rx.recv())
            .await
            .expect("sentence in time")
            .expect("sentence");
        assert_eq!(spoken, "好的。");

        let frame = timeout(WAIT, playback.recv())
            .await
            .expect("frame in time")
            .expect("frame");
        assert_eq!(frame.sample_rate, ROOM_SAMPLE_RATE);
        assert!(!frame.samples().is_empty());

        session.close();
    }

    #[tokio::test]
    async fn interim_transcripts_do_not_trigger_completions() {
        let room = RoomHandle::new("quiet-room");

        let (events_probe_tx, mut events_probe_rx) = mpsc::channel(1);
        let mut stt = MockSpeechToText::new();
        stt.expect_input_spec()
            .return_const(AudioSpec { sample_rate: 16000, channels: 1 });
        stt.expect_start().times(1).returning(move |_audio, events| {
            let _ = events_probe_tx.try_send(events);
            Ok(running_handle())
        });

        let mut llm = MockChatModel::new();
        llm.expect_complete().times(0);

        let mut tts = MockTextToSpeech::new();
        tts.expect_output_spec()
            .return_const(AudioSpec { sample_rate: 22050, channels: 1 });
        tts.expect_start()
            .times(1)
            .returning(|_, _| Ok(running_handle()));

        let mut session = AgentSession::builder()
            .stt(stt)
            .tts(tts)
            .llm(llm)
            .build()
            .unwrap();
        session.start(Agent::new("助手"), &room).await.unwrap();

        let events = events_probe_rx.recv().await.expect("event sender");
        events
            .send(SttEvent::Transcript { text: "正在".to_string(), is_final: false })
            .await
            .unwrap();
        events
            .send(SttEvent::Transcript { text: "   ".to_string(), is_final: true })
            .await
            .unwrap();
        drop(events);

        // Give the turn loop a moment to consume both events.
        tokio::time::sleep(Duration::from_millis(100)).await;
        session.close();
    }
}
