//! Per-call session orchestrator
//!
//! One logical writer per call: a single `select!` loop owns the session
//! record and consumes the provider WebSocket, the STT event queue, the
//! silence deadline and LLM turn outcomes. The other activities — the STT
//! upstream task, the at-most-one LLM turn, the speak lane and the outbound
//! writer — communicate with it through channels only.

use std::ops::ControlFlow;
use std::path::Path;
use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket};
use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use agri_voice_core::{mulaw_decode, ConversationHistory};
use agri_voice_llm::{build_messages, LlmError};
use agri_voice_pipeline::{
    accept_utterance, run_turn, SttConfig, SttEvent, SttSession, TtsQueue, UtteranceAssembler,
    SILENCE_TIMEOUT,
};
use agri_voice_telephony::{pace_pcm, parse_inbound, CallRecorder, InboundMessage};

use crate::state::AppState;

/// Spoken to the caller right after the media stream starts.
pub const WELCOME_MESSAGE: &str = "Welcome to Agri Agents. Please tell me your question.";

/// Per-call session record. Mutated by exactly one writer, the orchestrator
/// loop; destruction cancels all in-flight pipeline work.
pub struct CallSession {
    pub id: String,
    /// Provider stream identifier, known only after `start`.
    pub stream_sid: Option<String>,
    pub history: ConversationHistory,
    /// True while an LLM turn is in flight.
    pub processing: bool,
    stop_tx: watch::Sender<bool>,
    stop_rx: watch::Receiver<bool>,
}

impl CallSession {
    pub fn new() -> Self {
        let (stop_tx, stop_rx) = watch::channel(false);
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            stream_sid: None,
            history: ConversationHistory::new(),
            processing: false,
            stop_tx,
            stop_rx,
        }
    }

    pub fn stopped(&self) -> bool {
        *self.stop_rx.borrow()
    }

    /// Fire the cancellation handle. Idempotent.
    pub fn stop(&self) {
        let _ = self.stop_tx.send(true);
    }

    pub fn stop_signal(&self) -> watch::Receiver<bool> {
        self.stop_rx.clone()
    }
}

impl Default for CallSession {
    fn default() -> Self {
        Self::new()
    }
}

/// Everything the orchestrator loop owns for one call.
struct CallContext {
    state: AppState,
    session: CallSession,
    assembler: UtteranceAssembler,
    silence_deadline: Option<tokio::time::Instant>,
    recorder: Option<CallRecorder>,
    stt: Option<SttSession>,
    speak_tx: mpsc::Sender<String>,
    speak_rx: Option<mpsc::Receiver<String>>,
    speaker_handle: Option<JoinHandle<()>>,
    out_tx: mpsc::Sender<String>,
    turn_tx: mpsc::Sender<Result<String, LlmError>>,
    turn_handle: Option<JoinHandle<()>>,
}

fn stt_config_from(state: &AppState) -> SttConfig {
    let stt = &state.settings.stt;
    SttConfig {
        endpoint: stt.endpoint.clone(),
        api_key: stt.api_key.clone(),
        model: stt.model.clone(),
        language: stt.language.clone(),
        vad_sensitivity: stt.vad_sensitivity.clone(),
        sample_rate: 8000,
    }
}

impl CallContext {
    fn new(
        state: AppState,
        out_tx: mpsc::Sender<String>,
    ) -> (
        Self,
        mpsc::Receiver<SttEvent>,
        mpsc::Receiver<Result<String, LlmError>>,
    ) {
        let session = CallSession::new();
        let (stt, stt_events) = SttSession::spawn(stt_config_from(&state), session.stop_signal());
        let (speak_tx, speak_rx) = mpsc::channel(32);
        let (turn_tx, turn_rx) = mpsc::channel(4);

        let ctx = Self {
            state,
            session,
            assembler: UtteranceAssembler::new(),
            silence_deadline: None,
            recorder: None,
            stt: Some(stt),
            speak_tx,
            speak_rx: Some(speak_rx),
            speaker_handle: None,
            out_tx,
            turn_tx,
            turn_handle: None,
        };
        (ctx, stt_events, turn_rx)
    }

    async fn handle_inbound(&mut self, text: &str) -> ControlFlow<()> {
        let message = match parse_inbound(text) {
            Ok(Some(message)) => message,
            Ok(None) => return ControlFlow::Continue(()),
            Err(e) => {
                tracing::warn!(session_id = %self.session.id, error = %e, "dropping malformed control frame");
                return ControlFlow::Continue(());
            }
        };

        match message {
            InboundMessage::Connected { protocol, version } => {
                tracing::debug!(
                    session_id = %self.session.id,
                    protocol = ?protocol,
                    version = ?version,
                    "provider connected"
                );
            }
            InboundMessage::Start { stream_sid, start } => {
                let Some(sid) = stream_sid.or(start.stream_sid) else {
                    tracing::warn!(session_id = %self.session.id, "start frame without stream sid");
                    return ControlFlow::Continue(());
                };
                tracing::info!(
                    session_id = %self.session.id,
                    stream_sid = %sid,
                    call_sid = ?start.call_sid,
                    "media stream started"
                );
                self.session.stream_sid = Some(sid.clone());
                self.start_speaker(sid);
                if self.speak_tx.send(WELCOME_MESSAGE.to_string()).await.is_err() {
                    tracing::warn!(session_id = %self.session.id, "speak lane closed before welcome");
                }
            }
            InboundMessage::Media { media, .. } => {
                let mulaw = match media.decode() {
                    Ok(bytes) => bytes,
                    Err(e) => {
                        tracing::warn!(session_id = %self.session.id, error = %e, "undecodable media payload");
                        return ControlFlow::Continue(());
                    }
                };
                if self.state.settings.recording.enabled {
                    let dir = Path::new(&self.state.settings.recording.dir).to_path_buf();
                    let recorder = self
                        .recorder
                        .get_or_insert_with(|| CallRecorder::new(&dir, &self.session.id));
                    recorder.append(&mulaw).await;
                }
                let pcm = mulaw_decode(&mulaw);
                if let Some(stt) = &self.stt {
                    stt.push_audio(pcm).await;
                }
            }
            InboundMessage::Stop { .. } => {
                tracing::info!(session_id = %self.session.id, "stop received");
                return ControlFlow::Break(());
            }
        }
        ControlFlow::Continue(())
    }

    fn handle_stt_event(&mut self, event: SttEvent) {
        match event {
            SttEvent::Transcript(text) => {
                tracing::debug!(session_id = %self.session.id, transcript = %text, "partial transcript");
                self.assembler.push(&text);
                self.silence_deadline = Some(tokio::time::Instant::now() + SILENCE_TIMEOUT);
            }
            SttEvent::SpeechStart => {
                self.assembler.clear();
                self.silence_deadline = None;
            }
            SttEvent::SpeechEnd => self.flush_utterance(),
            SttEvent::Error(detail) => {
                tracing::warn!(session_id = %self.session.id, detail = %detail, "transcription error");
            }
            SttEvent::Closed { code } => {
                tracing::debug!(session_id = %self.session.id, code, "transcription stream closed");
                // Some providers close the stream after each utterance
                // instead of emitting speech_end.
                if code == 1000 {
                    self.flush_utterance();
                }
            }
        }
    }

    /// End the in-progress utterance: pick the longest partial, filter it,
    /// and start an LLM turn unless one is already in flight.
    fn flush_utterance(&mut self) {
        self.silence_deadline = None;
        let Some(text) = self.assembler.flush() else {
            return;
        };
        let Some(utterance) = accept_utterance(&text) else {
            tracing::debug!(session_id = %self.session.id, text = %text, "utterance filtered");
            return;
        };
        if self.session.processing {
            tracing::debug!(session_id = %self.session.id, "turn in flight, dropping utterance");
            return;
        }
        if self.session.stopped() {
            return;
        }

        tracing::info!(session_id = %self.session.id, utterance = %utterance, "utterance accepted");
        self.session.processing = true;
        self.session.history.push_user(&utterance);

        let backend = Arc::clone(&self.state.llm);
        let messages = build_messages(&self.session.history);
        let speak_tx = self.speak_tx.clone();
        let turn_tx = self.turn_tx.clone();
        let debug_prompt = self.state.settings.llm.debug_prompt;
        self.turn_handle = Some(tokio::spawn(async move {
            let outcome = run_turn(backend, messages, speak_tx, debug_prompt).await;
            let _ = turn_tx.send(outcome).await;
        }));
    }

    fn handle_turn_outcome(&mut self, outcome: Result<String, LlmError>) {
        self.session.processing = false;
        self.turn_handle = None;
        match outcome {
            Ok(reply) if !reply.trim().is_empty() => {
                self.session.history.push_assistant(reply.trim());
            }
            Ok(_) => {
                tracing::debug!(session_id = %self.session.id, "empty reply");
                self.session.history.pop_dangling_user();
            }
            Err(e) => {
                tracing::warn!(session_id = %self.session.id, error = %e, "generation failed");
                self.session.history.pop_dangling_user();
            }
        }
    }

    /// Spawn the speak lane once the stream identifier is known: segments go
    /// through the global TTS queue, then out through the frame pacer.
    fn start_speaker(&mut self, stream_sid: String) {
        let Some(speak_rx) = self.speak_rx.take() else {
            return;
        };
        let tts = self.state.tts.clone();
        let language = self.state.settings.tts.language.clone();
        let out_tx = self.out_tx.clone();
        let stopped = self.session.stop_signal();
        let session_id = self.session.id.clone();
        self.speaker_handle = Some(tokio::spawn(async move {
            speak_segments(speak_rx, tts, language, stream_sid, out_tx, stopped, session_id).await;
        }));
    }

    /// Cancel all in-flight work. Every step is idempotent and best-effort.
    async fn teardown(mut self) {
        self.session.stop();

        if let Some(handle) = self.turn_handle.take() {
            handle.abort();
            self.session.processing = false;
            if self.session.history.pop_dangling_user().is_some() {
                tracing::debug!(session_id = %self.session.id, "popped aborted user turn");
            }
        }
        if let Some(stt) = self.stt.take() {
            stt.close();
        }
        if let Some(recorder) = self.recorder.take() {
            recorder.finalize().await;
        }
        if let Some(handle) = self.speaker_handle.take() {
            handle.abort();
        }

        tracing::info!(
            session_id = %self.session.id,
            turns = self.session.history.len(),
            "call torn down"
        );
    }
}

/// Handle one media-stream WebSocket for its whole lifetime.
pub async fn handle_socket(socket: WebSocket, state: AppState) {
    let (ws_sink, mut ws_stream) = socket.split();
    let (out_tx, out_rx) = mpsc::channel::<String>(256);
    let writer = tokio::spawn(write_outbound(ws_sink, out_rx));

    let (mut ctx, mut stt_events, mut turn_rx) = CallContext::new(state, out_tx);
    tracing::info!(session_id = %ctx.session.id, "call connected");

    loop {
        // A parked deadline keeps the select arm disabled without a branch.
        let deadline = ctx
            .silence_deadline
            .unwrap_or_else(|| tokio::time::Instant::now() + std::time::Duration::from_secs(3600));

        tokio::select! {
            inbound = ws_stream.next() => match inbound {
                Some(Ok(Message::Text(text))) => {
                    if ctx.handle_inbound(&text).await.is_break() {
                        break;
                    }
                }
                Some(Ok(Message::Close(_))) | None => {
                    tracing::info!(session_id = %ctx.session.id, "websocket closed");
                    break;
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    tracing::warn!(session_id = %ctx.session.id, error = %e, "websocket error");
                    break;
                }
            },
            Some(event) = stt_events.recv() => ctx.handle_stt_event(event),
            Some(outcome) = turn_rx.recv() => ctx.handle_turn_outcome(outcome),
            _ = tokio::time::sleep_until(deadline), if ctx.silence_deadline.is_some() => {
                tracing::debug!(session_id = %ctx.session.id, "silence timeout");
                ctx.flush_utterance();
            }
        }
    }

    ctx.teardown().await;
    writer.abort();
}

/// Speak lane: strictly ordered per session. Each segment is synthesized
/// through the process-wide queue, then paced out as μ-law frames.
async fn speak_segments(
    mut speak_rx: mpsc::Receiver<String>,
    tts: TtsQueue,
    language: String,
    stream_sid: String,
    out_tx: mpsc::Sender<String>,
    stopped: watch::Receiver<bool>,
    session_id: String,
) {
    while let Some(segment) = speak_rx.recv().await {
        if *stopped.borrow() {
            break;
        }
        let Some(audio) = tts.synthesize(&segment, &language).await else {
            tracing::debug!(session_id = %session_id, segment = %segment, "segment skipped");
            continue;
        };
        let frames = pace_pcm(&audio, &stream_sid, &out_tx, &stopped).await;
        tracing::debug!(session_id = %session_id, frames, "segment played");
    }
}

/// Outbound writer: the single owner of the WebSocket sink.
async fn write_outbound(
    mut sink: SplitSink<WebSocket, Message>,
    mut out_rx: mpsc::Receiver<String>,
) {
    while let Some(json) = out_rx.recv().await {
        if sink.send(Message::Text(json)).await.is_err() {
            break;
        }
    }
    let _ = sink.close().await;
}
