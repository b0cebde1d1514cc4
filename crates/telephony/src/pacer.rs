//! Outbound frame pacer
//!
//! Slices synthesized PCM into 20 ms μ-law frames and writes them toward the
//! caller at the real-time rate. Sleeping between chunks bounds jitter at
//! the provider's buffer; the stop signal is checked between chunks so a
//! hang-up halts playback promptly.

use std::time::Duration;

use tokio::sync::{mpsc, watch};

use agri_voice_core::{mulaw_encode, FRAME_MS, PCM_FRAME_BYTES};

use crate::messages::OutboundMediaMessage;

/// Pace one PCM16LE @ 8 kHz buffer out as μ-law media frames.
///
/// Returns the number of frames written. Stops early when the session stop
/// signal fires or the outbound lane closes.
pub async fn pace_pcm(
    pcm: &[u8],
    stream_sid: &str,
    out_tx: &mpsc::Sender<String>,
    stopped: &watch::Receiver<bool>,
) -> usize {
    let mut sent = 0;
    for chunk in pcm.chunks(PCM_FRAME_BYTES) {
        if *stopped.borrow() {
            tracing::debug!(frames = sent, "playback halted by stop signal");
            break;
        }
        let mulaw = mulaw_encode(chunk);
        let frame = OutboundMediaMessage::new(stream_sid, &mulaw).to_json();
        if out_tx.send(frame).await.is_err() {
            break;
        }
        sent += 1;
        tokio::time::sleep(Duration::from_millis(FRAME_MS)).await;
    }
    sent
}

#[cfg(test)]
mod tests {
    use super::*;
    use base64::engine::general_purpose::STANDARD as BASE64;
    use base64::Engine as _;

    fn stop_pair() -> (watch::Sender<bool>, watch::Receiver<bool>) {
        watch::channel(false)
    }

    async fn collect_frames(pcm: &[u8]) -> (usize, Vec<Vec<u8>>) {
        let (out_tx, mut out_rx) = mpsc::channel(1024);
        let (_stop_tx, stop_rx) = stop_pair();

        let sent = pace_pcm(pcm, "MZabc", &out_tx, &stop_rx).await;
        drop(out_tx);

        let mut frames = Vec::new();
        while let Some(json) = out_rx.recv().await {
            let value: serde_json::Value = serde_json::from_str(&json).unwrap();
            let payload = value["media"]["payload"].as_str().unwrap();
            frames.push(BASE64.decode(payload).unwrap());
        }
        (sent, frames)
    }

    #[tokio::test(start_paused = true)]
    async fn test_frame_count_and_sizes() {
        // 50 ms of PCM: two full frames plus a 10 ms remainder.
        let pcm = vec![0u8; 800];
        let (sent, frames) = collect_frames(&pcm).await;

        assert_eq!(sent, 3); // ceil(800 / 320)
        assert_eq!(frames.len(), 3);
        assert_eq!(frames[0].len(), 160);
        assert_eq!(frames[1].len(), 160);
        assert_eq!(frames[2].len(), 80); // the short last frame

        let total_samples: usize = frames.iter().map(Vec::len).sum();
        assert_eq!(total_samples, pcm.len() / 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exact_multiple_has_no_short_frame() {
        let pcm = vec![0u8; 640];
        let (sent, frames) = collect_frames(&pcm).await;
        assert_eq!(sent, 2);
        assert!(frames.iter().all(|f| f.len() == 160));
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_input_sends_nothing() {
        let (sent, frames) = collect_frames(&[]).await;
        assert_eq!(sent, 0);
        assert!(frames.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_signal_halts_between_chunks() {
        let (out_tx, mut out_rx) = mpsc::channel(1024);
        let (stop_tx, stop_rx) = stop_pair();

        // A second of audio; hang up almost immediately.
        let pcm = vec![0u8; 16_000];
        let pacer = tokio::spawn(async move { pace_pcm(&pcm, "MZabc", &out_tx, &stop_rx).await });

        tokio::time::sleep(Duration::from_millis(45)).await;
        stop_tx.send(true).unwrap();

        let sent = pacer.await.unwrap();
        assert!(sent < 50, "playback should halt early, sent {}", sent);

        let mut received = 0;
        while out_rx.try_recv().is_ok() {
            received += 1;
        }
        assert_eq!(received, sent);
    }
}
