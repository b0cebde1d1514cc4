//! Best-effort call recording
//!
//! Raw μ-law is streamed to disk while the call runs; at stop the capture is
//! decoded to PCM and rewritten as a WAV file, and the raw file is deleted on
//! success. Recording failures are logged and never abort the call.

use std::path::{Path, PathBuf};

use tokio::fs::{self, File, OpenOptions};
use tokio::io::AsyncWriteExt;

use agri_voice_core::mulaw_decode;

use crate::TelephonyError;

/// Per-call recorder. Created lazily on the first media frame so a `media`
/// before `start` is tolerated.
#[derive(Debug)]
pub struct CallRecorder {
    raw_path: PathBuf,
    wav_path: PathBuf,
    file: Option<File>,
    failed: bool,
}

impl CallRecorder {
    pub fn new(dir: &Path, session_id: &str) -> Self {
        Self {
            raw_path: dir.join(format!("{}.ulaw", session_id)),
            wav_path: dir.join(format!("{}.wav", session_id)),
            file: None,
            failed: false,
        }
    }

    /// Append raw μ-law bytes to the capture file.
    pub async fn append(&mut self, mulaw: &[u8]) {
        if self.failed {
            return;
        }
        if self.file.is_none() {
            match self.open().await {
                Ok(file) => self.file = Some(file),
                Err(e) => {
                    tracing::warn!(error = %e, "disabling call recording");
                    self.failed = true;
                    return;
                }
            }
        }
        if let Some(file) = self.file.as_mut() {
            if let Err(e) = file.write_all(mulaw).await {
                tracing::warn!(error = %e, "recording write failed, disabling");
                self.failed = true;
            }
        }
    }

    async fn open(&self) -> Result<File, TelephonyError> {
        if let Some(parent) = self.raw_path.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| TelephonyError::Recording(e.to_string()))?;
        }
        OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.raw_path)
            .await
            .map_err(|e| TelephonyError::Recording(e.to_string()))
    }

    /// Convert the raw capture to a WAV file and remove the raw file.
    ///
    /// Idempotent and best-effort: every failure is logged, none propagate.
    pub async fn finalize(mut self) {
        if let Some(mut file) = self.file.take() {
            if let Err(e) = file.flush().await {
                tracing::warn!(error = %e, "recording flush failed");
            }
        } else {
            // Nothing was ever captured.
            return;
        }

        let raw = match fs::read(&self.raw_path).await {
            Ok(raw) => raw,
            Err(e) => {
                tracing::warn!(error = %e, "could not read raw capture");
                return;
            }
        };

        let wav_path = self.wav_path.clone();
        let written = tokio::task::spawn_blocking(move || write_wav(&wav_path, &raw)).await;
        match written {
            Ok(Ok(())) => {
                if let Err(e) = fs::remove_file(&self.raw_path).await {
                    tracing::warn!(error = %e, "could not delete raw capture");
                }
                tracing::info!(path = %self.wav_path.display(), "call recording saved");
            }
            Ok(Err(e)) => tracing::warn!(error = %e, "wav conversion failed"),
            Err(e) => tracing::warn!(error = %e, "wav conversion task failed"),
        }
    }
}

fn write_wav(path: &Path, mulaw: &[u8]) -> Result<(), TelephonyError> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate: 8000,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut writer =
        hound::WavWriter::create(path, spec).map_err(|e| TelephonyError::Recording(e.to_string()))?;

    let pcm = mulaw_decode(mulaw);
    for chunk in pcm.chunks_exact(2) {
        let sample = i16::from_le_bytes([chunk[0], chunk[1]]);
        writer
            .write_sample(sample)
            .map_err(|e| TelephonyError::Recording(e.to_string()))?;
    }
    writer
        .finalize()
        .map_err(|e| TelephonyError::Recording(e.to_string()))
}
