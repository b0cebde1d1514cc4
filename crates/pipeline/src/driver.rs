//! One-turn LLM driver
//!
//! Streams a completion for an accepted utterance and feeds the deltas
//! through the incremental segmenter, handing each finished segment to the
//! session's speak lane while generation is still running.

use std::sync::Arc;

use tokio::sync::mpsc;

use agri_voice_llm::{FinishReason, LlmBackend, LlmError, Message};

use crate::segmenter::ResponseSegmenter;

/// Run one generation to completion.
///
/// Returns the full reply text; segments go out through `speak_tx` as they
/// form. The generation future is polled inside this task rather than
/// spawned, so aborting the turn drops the upstream stream and cancels it
/// immediately. A dropped speak lane (hang-up) ends the turn the same way.
pub async fn run_turn(
    backend: Arc<dyn LlmBackend>,
    messages: Vec<Message>,
    speak_tx: mpsc::Sender<String>,
    debug_prompt: bool,
) -> Result<String, LlmError> {
    if debug_prompt {
        match serde_json::to_string_pretty(&messages) {
            Ok(rendered) => tracing::debug!(prompt = %rendered, "outgoing llm prompt"),
            Err(e) => tracing::debug!(error = %e, "failed to render llm prompt"),
        }
    }

    let (delta_tx, mut delta_rx) = mpsc::channel::<String>(32);
    let mut segmenter = ResponseSegmenter::new();

    let generation = backend.generate_stream(&messages, delta_tx);
    tokio::pin!(generation);

    // Segment deltas as they arrive while the stream is still live. The
    // sender lives inside the generation future, so the delta lane cannot
    // close before generation completes.
    let result = loop {
        tokio::select! {
            result = &mut generation => break result,
            Some(delta) = delta_rx.recv() => {
                if !forward_segments(&mut segmenter, &delta, &speak_tx).await {
                    // Caller hung up; returning drops the stream and
                    // cancels the generation.
                    return Ok(String::new());
                }
            }
        }
    };

    // Deltas still buffered in the channel after completion.
    while let Some(delta) = delta_rx.recv().await {
        if !forward_segments(&mut segmenter, &delta, &speak_tx).await {
            return Ok(String::new());
        }
    }
    for segment in segmenter.finish() {
        if speak_tx.send(segment).await.is_err() {
            break;
        }
    }

    let result = result?;
    tracing::debug!(
        tokens = result.tokens,
        first_token_ms = result.time_to_first_token_ms,
        total_ms = result.total_time_ms,
        "turn complete"
    );
    if result.finish_reason == FinishReason::Cancelled {
        tracing::debug!("generation cancelled mid-stream");
    }
    Ok(result.text)
}

/// Push one delta through the segmenter and onward to the speak lane.
/// Returns false once the lane has closed.
async fn forward_segments(
    segmenter: &mut ResponseSegmenter,
    delta: &str,
    speak_tx: &mpsc::Sender<String>,
) -> bool {
    for segment in segmenter.push(delta) {
        if speak_tx.send(segment).await.is_err() {
            return false;
        }
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use agri_voice_llm::{GenerationResult, Role};

    /// Backend that replays scripted deltas.
    struct ScriptedBackend {
        deltas: Vec<String>,
        calls: AtomicUsize,
    }

    impl ScriptedBackend {
        fn new(deltas: &[&str]) -> Self {
            Self {
                deltas: deltas.iter().map(|s| s.to_string()).collect(),
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl LlmBackend for ScriptedBackend {
        async fn generate_stream(
            &self,
            _messages: &[Message],
            tx: mpsc::Sender<String>,
        ) -> Result<GenerationResult, LlmError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let mut text = String::new();
            for delta in &self.deltas {
                text.push_str(delta);
                if tx.send(delta.clone()).await.is_err() {
                    return Ok(GenerationResult {
                        text,
                        tokens: 0,
                        time_to_first_token_ms: 0,
                        total_time_ms: 0,
                        finish_reason: FinishReason::Cancelled,
                    });
                }
            }
            Ok(GenerationResult {
                text,
                tokens: self.deltas.len(),
                time_to_first_token_ms: 1,
                total_time_ms: 2,
                finish_reason: FinishReason::Stop,
            })
        }

        fn model_name(&self) -> &str {
            "scripted"
        }
    }

    fn user_message(text: &str) -> Vec<Message> {
        vec![Message {
            role: Role::User,
            content: text.to_string(),
        }]
    }

    #[tokio::test]
    async fn test_segments_stream_in_reading_order() {
        let backend = Arc::new(ScriptedBackend::new(&[
            "Paddy does well in July rains. ",
            "Make sure the field ",
            "holds enough water.",
        ]));
        let (speak_tx, mut speak_rx) = mpsc::channel(8);

        let text = run_turn(backend, user_message("crop for July?"), speak_tx, false)
            .await
            .unwrap();

        assert_eq!(
            speak_rx.recv().await.as_deref(),
            Some("Paddy does well in July rains.")
        );
        assert_eq!(
            speak_rx.recv().await.as_deref(),
            Some("Make sure the field holds enough water.")
        );
        assert!(speak_rx.recv().await.is_none());
        assert!(text.starts_with("Paddy does well"));
    }

    #[tokio::test]
    async fn test_short_reply_emitted_whole() {
        let backend = Arc::new(ScriptedBackend::new(&["Sow paddy now."]));
        let (speak_tx, mut speak_rx) = mpsc::channel(8);

        run_turn(backend, user_message("what now?"), speak_tx, false)
            .await
            .unwrap();

        assert_eq!(speak_rx.recv().await.as_deref(), Some("Sow paddy now."));
    }

    #[tokio::test]
    async fn test_dropped_speak_lane_ends_turn() {
        let backend = Arc::new(ScriptedBackend::new(&[
            "First full sentence with enough words. ",
            "Second sentence that should never be spoken. ",
        ]));
        let (speak_tx, speak_rx) = mpsc::channel(8);
        drop(speak_rx);

        // The turn still completes without error; nothing is spoken.
        let result = run_turn(backend.clone(), user_message("hello there"), speak_tx, false).await;
        assert!(result.is_ok());
        assert_eq!(backend.calls.load(Ordering::SeqCst), 1);
    }

    /// Aborting the turn task must cancel the generation with it: the
    /// stream future lives in the task, so its drop guard runs on abort.
    #[tokio::test]
    async fn test_abort_drops_generation_stream() {
        struct GuardedBackend {
            started: Arc<std::sync::atomic::AtomicBool>,
            dropped: Arc<std::sync::atomic::AtomicBool>,
        }

        struct DropFlag(Arc<std::sync::atomic::AtomicBool>);
        impl Drop for DropFlag {
            fn drop(&mut self) {
                self.0.store(true, Ordering::SeqCst);
            }
        }

        #[async_trait]
        impl LlmBackend for GuardedBackend {
            async fn generate_stream(
                &self,
                _messages: &[Message],
                _tx: mpsc::Sender<String>,
            ) -> Result<GenerationResult, LlmError> {
                let _guard = DropFlag(self.dropped.clone());
                self.started.store(true, Ordering::SeqCst);
                std::future::pending::<()>().await;
                unreachable!()
            }

            fn model_name(&self) -> &str {
                "guarded"
            }
        }

        let started = Arc::new(std::sync::atomic::AtomicBool::new(false));
        let dropped = Arc::new(std::sync::atomic::AtomicBool::new(false));
        let backend = Arc::new(GuardedBackend {
            started: started.clone(),
            dropped: dropped.clone(),
        });

        let (speak_tx, _speak_rx) = mpsc::channel(8);
        let turn = tokio::spawn(run_turn(backend, user_message("hello there"), speak_tx, false));

        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert!(started.load(Ordering::SeqCst));

        turn.abort();
        let _ = turn.await;
        assert!(dropped.load(Ordering::SeqCst), "stream must drop on abort");
    }
}
