//! Stereo call recording.
//!
//! Caller audio goes to the left channel, assistant audio to the right. Samples
//! are placed by their wall-clock offset from the start of the call, so the two
//! sides stay aligned across silences.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;
use thiserror::Error;
use tokio::time::Instant;
use tracing::info;

use crate::core::audio::TELEPHONY_SAMPLE_RATE;

#[derive(Debug, Error)]
pub enum RecorderError {
    #[error("WAV error: {0}")]
    Wav(#[from] hound::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Recording task failed: {0}")]
    Task(String),
}

pub type SharedRecorder = Arc<Mutex<CallRecorder>>;

#[derive(Debug)]
pub struct CallRecorder {
    call_id: String,
    started_at: Instant,
    sample_rate: u32,
    caller: Vec<i16>,
    assistant: Vec<i16>,
}

impl CallRecorder {
    pub fn new(call_id: impl Into<String>, started_at: Instant) -> Self {
        Self {
            call_id: call_id.into(),
            started_at,
            sample_rate: TELEPHONY_SAMPLE_RATE,
            caller: Vec::new(),
            assistant: Vec::new(),
        }
    }

    pub fn shared(call_id: impl Into<String>, started_at: Instant) -> SharedRecorder {
        Arc::new(Mutex::new(Self::new(call_id, started_at)))
    }

    fn offset(&self, at: Instant) -> usize {
        let elapsed = at.saturating_duration_since(self.started_at);
        (elapsed.as_micros() * self.sample_rate as u128 / 1_000_000) as usize
    }

    fn place(track: &mut Vec<i16>, offset: usize, pcm: &[i16]) {
        if track.len() < offset {
            track.resize(offset, 0);
        }
        track.extend_from_slice(pcm);
    }

    pub fn write_caller(&mut self, at: Instant, pcm: &[i16]) {
        let offset = self.offset(at);
        Self::place(&mut self.caller, offset, pcm);
    }

    pub fn write_assistant(&mut self, at: Instant, pcm: &[i16]) {
        let offset = self.offset(at);
        Self::place(&mut self.assistant, offset, pcm);
    }

    /// Recorded length in samples per channel.
    pub fn len(&self) -> usize {
        self.caller.len().max(self.assistant.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Write the recording as `<dir>/<call_id>.wav` and return its path.
    pub async fn finalize(self, dir: &Path) -> Result<PathBuf, RecorderError> {
        let path = dir.join(recording_file_name(&self.call_id));
        let target = path.clone();
        let dir = dir.to_path_buf();
        let samples = self.len();

        tokio::task::spawn_blocking(move || {
            std::fs::create_dir_all(&dir)?;
            self.write_wav(&target)
        })
        .await
        .map_err(|e| RecorderError::Task(e.to_string()))??;

        info!(path = %path.display(), samples, "Call recording written");
        Ok(path)
    }

    fn write_wav(&self, path: &Path) -> Result<(), RecorderError> {
        let spec = hound::WavSpec {
            channels: 2,
            sample_rate: self.sample_rate,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut writer = hound::WavWriter::create(path, spec)?;
        for i in 0..self.len() {
            writer.write_sample(self.caller.get(i).copied().unwrap_or(0))?;
            writer.write_sample(self.assistant.get(i).copied().unwrap_or(0))?;
        }
        writer.finalize()?;
        Ok(())
    }
}

/// File name a call's recording is stored under.
pub fn recording_file_name(call_id: &str) -> String {
    format!("{}.wav", sanitize_file_stem(call_id))
}

fn sanitize_file_stem(raw: &str) -> String {
    raw.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;
    use tokio::time::Duration;

    #[test]
    fn test_tracks_are_time_aligned() {
        let start = Instant::now();
        let mut recorder = CallRecorder::new("call-1", start);
        recorder.write_caller(start, &[1; 160]);
        recorder.write_assistant(start + Duration::from_millis(100), &[2; 160]);

        assert_eq!(recorder.assistant.len(), 800 + 160);
        assert!(recorder.assistant[..800].iter().all(|&s| s == 0));
        assert_eq!(recorder.len(), 960);
    }

    #[test]
    fn test_sanitize_file_stem() {
        assert_eq!(sanitize_file_stem("CA12/../x y"), "CA12____x_y");
    }

    #[tokio::test]
    async fn test_finalize_writes_stereo_wav() {
        let dir = TempDir::new().unwrap();
        let start = Instant::now();
        let mut recorder = CallRecorder::new("call-42", start);
        recorder.write_caller(start, &[1000; 160]);
        recorder.write_assistant(start, &[-1000; 80]);

        let path = recorder.finalize(dir.path()).await.unwrap();
        assert_eq!(path, dir.path().join("call-42.wav"));

        let mut reader = hound::WavReader::open(&path).unwrap();
        let spec = reader.spec();
        assert_eq!(spec.channels, 2);
        assert_eq!(spec.sample_rate, 8000);
        let samples: Vec<i16> = reader.samples::<i16>().map(|s| s.unwrap()).collect();
        assert_eq!(samples.len(), 320);
        assert_eq!(&samples[..2], &[1000, -1000]);
        assert_eq!(&samples[318..], &[1000, 0]);
    }
}
