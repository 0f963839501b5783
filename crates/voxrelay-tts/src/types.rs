//! Unified request, response, and option types shared by every backend.

use crate::error::TtsError;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use uuid::Uuid;

/// Supported TTS vendors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProviderKind {
    /// ElevenLabs streaming TTS API
    ElevenLabs,
    /// Minimax t2a_v2 API
    Minimax,
    /// Tencent Cloud TTS API
    Tencent,
}

impl ProviderKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderKind::ElevenLabs => "elevenlabs",
            ProviderKind::Minimax => "minimax",
            ProviderKind::Tencent => "tencent",
        }
    }
}

impl std::fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ProviderKind {
    type Err = TtsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "elevenlabs" => Ok(ProviderKind::ElevenLabs),
            "minimax" => Ok(ProviderKind::Minimax),
            "tencent" => Ok(ProviderKind::Tencent),
            _ => Err(TtsError::InvalidRequest(format!(
                "Unknown TTS provider: {s}"
            ))),
        }
    }
}

/// Requested audio container/encoding.
///
/// Each backend maps this onto the subset its vendor supports and silently
/// keeps the vendor default for formats outside that subset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AudioFormat {
    Mp3,
    Wav,
    Pcm,
    Flac,
    Opus,
}

impl AudioFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            AudioFormat::Mp3 => "mp3",
            AudioFormat::Wav => "wav",
            AudioFormat::Pcm => "pcm",
            AudioFormat::Flac => "flac",
            AudioFormat::Opus => "opus",
        }
    }
}

/// Unified synthesis parameters.
///
/// Backends rename, clamp, and restrict these to the vendor's shape.
/// `extra` carries vendor-specific overrides merged last-write-wins on top of
/// the mapped parameters; nested settings objects are deep-merged one level.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TtsRequest {
    /// Text to synthesize. Ignored by the incremental operation, which takes
    /// its text from the caller's stream.
    #[serde(default)]
    pub text: String,
    /// Vendor voice identifier.
    pub voice: Option<String>,
    /// Vendor model identifier.
    pub model: Option<String>,
    /// Speaking rate. Vendor ranges differ; values are clamped per backend.
    pub rate: Option<f32>,
    /// Output volume. Clamped per backend.
    pub volume: Option<f32>,
    /// Voice pitch. Clamped per backend.
    pub pitch: Option<f32>,
    /// Emotion/style hint (e.g. "happy", "sad").
    pub emotion: Option<String>,
    /// Requested audio format.
    pub format: Option<AudioFormat>,
    /// Requested sample rate in Hz.
    pub sample_rate: Option<u32>,
    /// Request character-level alignment metadata where the vendor offers it.
    #[serde(default)]
    pub with_timestamps: bool,
    /// Vendor-specific parameter overrides, highest precedence.
    pub extra: Option<serde_json::Map<String, serde_json::Value>>,
}

impl TtsRequest {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Default::default()
        }
    }
}

/// One normalized audio chunk from a streaming or incremental synthesis.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AudioChunk {
    /// Chunk identifier (vendor trace/session id where available).
    pub id: String,
    /// Audio payload as the vendor encodes it (base64, or hex for Minimax).
    pub data: String,
    /// Set on the vendor's final frame for the session.
    #[serde(rename = "final")]
    pub is_final: bool,
    /// Alignment, subtitles, status fields, and other vendor extras.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
}

/// Result of a one-shot synthesis.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AudioResult {
    pub id: String,
    /// Complete audio payload, encoded as the vendor delivers it.
    pub data: String,
    #[serde(rename = "final")]
    pub is_final: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
}

/// Clonable cancellation handle.
///
/// All clones observe the same flag; `cancel` is idempotent.
#[derive(Clone)]
pub struct CancelToken {
    tx: Arc<watch::Sender<bool>>,
    rx: watch::Receiver<bool>,
}

impl CancelToken {
    pub fn new() -> Self {
        let (tx, rx) = watch::channel(false);
        Self {
            tx: Arc::new(tx),
            rx,
        }
    }

    /// Signal cancellation to every clone of this token.
    pub fn cancel(&self) {
        let _ = self.tx.send(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once the token is cancelled.
    pub async fn cancelled(&self) {
        let mut rx = self.rx.clone();
        if rx.wait_for(|cancelled| *cancelled).await.is_err() {
            // Sender kept alive by self; unreachable in practice.
            std::future::pending::<()>().await;
        }
    }
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for CancelToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CancelToken")
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

/// Per-call options shared by all operations.
#[derive(Debug, Clone, Default)]
pub struct TtsOptions {
    /// Bounds connection establishment and handshake; one-shot calls apply it
    /// to the whole HTTP request.
    pub timeout: Option<Duration>,
    /// Carried for callers; the core never retries (retry policy is the
    /// caller's concern).
    pub max_retries: Option<u32>,
    /// Extra headers for the HTTP request or WebSocket handshake.
    pub headers: Option<HashMap<String, String>>,
    /// Cooperative cancellation for streaming/incremental calls.
    pub cancel: Option<CancelToken>,
}

/// Request-id source owned by the façade; no process-wide counter.
#[derive(Debug, Clone)]
pub struct IdGenerator {
    prefix: String,
}

impl IdGenerator {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    pub fn next_id(&self) -> String {
        format!("{}{}", self.prefix, Uuid::new_v4())
    }
}

impl Default for IdGenerator {
    fn default() -> Self {
        Self::new("id#")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn provider_kind_round_trips_through_str() {
        for kind in [
            ProviderKind::ElevenLabs,
            ProviderKind::Minimax,
            ProviderKind::Tencent,
        ] {
            assert_eq!(ProviderKind::from_str(kind.as_str()).unwrap(), kind);
        }
        assert!(ProviderKind::from_str("azure").is_err());
    }

    #[test]
    fn provider_kind_parse_is_case_insensitive() {
        assert_eq!(
            ProviderKind::from_str("ElevenLabs").unwrap(),
            ProviderKind::ElevenLabs
        );
    }

    #[test]
    fn audio_chunk_serializes_final_field() {
        let chunk = AudioChunk {
            id: "id#1".into(),
            data: "AAAA".into(),
            is_final: true,
            metadata: None,
        };
        let json = serde_json::to_value(&chunk).unwrap();
        assert_eq!(json["final"], serde_json::json!(true));
        assert!(json.get("metadata").is_none());
    }

    #[test]
    fn id_generator_applies_prefix_and_is_unique() {
        let ids = IdGenerator::new("req#");
        let a = ids.next_id();
        let b = ids.next_id();
        assert!(a.starts_with("req#"));
        assert_ne!(a, b);
    }

    #[tokio::test]
    async fn cancel_token_wakes_waiters() {
        let token = CancelToken::new();
        assert!(!token.is_cancelled());

        let waiter = token.clone();
        let handle = tokio::spawn(async move { waiter.cancelled().await });
        token.cancel();
        handle.await.unwrap();
        assert!(token.is_cancelled());
    }

    #[tokio::test]
    async fn cancelled_resolves_immediately_when_already_cancelled() {
        let token = CancelToken::new();
        token.cancel();
        token.cancel(); // idempotent
        token.cancelled().await;
    }
}
