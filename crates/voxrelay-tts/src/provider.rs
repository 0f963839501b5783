use crate::error::TtsResult;
use crate::types::{AudioChunk, AudioResult, TtsOptions, TtsRequest};
use async_trait::async_trait;
use futures::stream::Stream;
use std::pin::Pin;

/// Ordered sequence of normalized audio chunks.
pub type AudioStream = Pin<Box<dyn Stream<Item = TtsResult<AudioChunk>> + Send>>;

/// Caller-supplied text fragments for incremental synthesis.
pub type TextStream = Pin<Box<dyn Stream<Item = String> + Send>>;

/// One TTS vendor behind the unified request/response shape.
///
/// All three operations accept the same [`TtsRequest`] and produce the same
/// normalized chunk shape; the implementations own parameter mapping and the
/// vendor's wire protocol.
#[async_trait]
pub trait TtsProvider: Send + Sync {
    /// Vendor name as exposed to callers and logs.
    fn provider_name(&self) -> &'static str;

    /// One-shot synthesis: the full audio payload in a single result.
    async fn synthesize(&self, request: TtsRequest, options: TtsOptions) -> TtsResult<AudioResult>;

    /// Server-driven streaming: the vendor decides chunk boundaries.
    async fn synthesize_stream(
        &self,
        request: TtsRequest,
        options: TtsOptions,
    ) -> TtsResult<AudioStream>;

    /// Caller-driven incremental synthesis over a duplex connection. `text`
    /// replaces `request.text`, which is ignored.
    async fn synthesize_incremental(
        &self,
        text: TextStream,
        request: TtsRequest,
        options: TtsOptions,
    ) -> TtsResult<AudioStream>;
}
