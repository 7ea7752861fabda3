use async_trait::async_trait;
use base64::Engine;
use rehearse_core::AudioSink;
use rehearse_core::playback::SinkError;
use std::path::PathBuf;
use std::sync::Mutex;

/// Encodes synthesized audio for a JSON body.
pub fn encode_audio(audio: &[u8]) -> String {
    base64::engine::general_purpose::STANDARD.encode(audio)
}

/// An output that keeps the clip in memory so a handler can return it.
///
/// Playback "completes" as soon as the bytes are captured; the client plays
/// the clip itself.
#[derive(Debug, Default)]
pub struct ClipSink {
    clip: Mutex<Option<Vec<u8>>>,
}

impl ClipSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Takes the captured clip, if any.
    pub fn take(&self) -> Option<Vec<u8>> {
        self.clip.lock().ok().and_then(|mut clip| clip.take())
    }
}

#[async_trait]
impl AudioSink for ClipSink {
    async fn play(&self, audio: Vec<u8>) -> Result<(), SinkError> {
        let mut clip = self
            .clip
            .lock()
            .map_err(|_| SinkError("clip buffer is poisoned".to_string()))?;
        *clip = Some(audio);
        Ok(())
    }
}

/// An output that writes each clip to a file.
#[derive(Debug, Clone)]
pub struct FileSink {
    path: PathBuf,
}

impl FileSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &PathBuf {
        &self.path
    }
}

#[async_trait]
impl AudioSink for FileSink {
    async fn play(&self, audio: Vec<u8>) -> Result<(), SinkError> {
        tokio::fs::write(&self.path, audio)
            .await
            .map_err(|e| SinkError(format!("failed to write {:?}: {e}", self.path)))
    }
}
