//! Unified façade over the registered TTS providers.
//!
//! Callers talk to [`TtsRelay`]: it validates the request, stamps a request
//! id, logs the call, and dispatches to the matching provider. All three
//! operations produce the same normalized chunk shape regardless of vendor.

use crate::error::{TtsError, TtsResult};
use crate::provider::{AudioStream, TextStream, TtsProvider};
use crate::types::{AudioResult, IdGenerator, ProviderKind, TtsOptions, TtsRequest};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

/// Provider registry and dispatcher.
pub struct TtsRelay {
    adapters: HashMap<ProviderKind, Arc<dyn TtsProvider>>,
    ids: IdGenerator,
}

impl Default for TtsRelay {
    fn default() -> Self {
        Self::new()
    }
}

impl TtsRelay {
    pub fn new() -> Self {
        Self {
            adapters: HashMap::new(),
            ids: IdGenerator::new("req#"),
        }
    }

    /// Use a caller-supplied id source instead of the default one.
    pub fn with_id_generator(ids: IdGenerator) -> Self {
        Self {
            adapters: HashMap::new(),
            ids,
        }
    }

    /// Register (or replace) the adapter for a provider.
    pub fn register(&mut self, kind: ProviderKind, adapter: Arc<dyn TtsProvider>) {
        self.adapters.insert(kind, adapter);
    }

    pub fn list_providers(&self) -> Vec<ProviderKind> {
        let mut kinds: Vec<_> = self.adapters.keys().copied().collect();
        kinds.sort_by_key(|k| k.as_str());
        kinds
    }

    fn adapter(&self, kind: ProviderKind) -> TtsResult<&Arc<dyn TtsProvider>> {
        self.adapters
            .get(&kind)
            .ok_or_else(|| TtsError::InvalidRequest(format!("Provider '{kind}' not registered")))
    }

    /// One-shot synthesis.
    pub async fn synthesize(
        &self,
        provider: ProviderKind,
        request: TtsRequest,
        options: TtsOptions,
    ) -> TtsResult<AudioResult> {
        let adapter = self.adapter(provider)?;
        require_text(&request)?;
        let request_id = self.ids.next_id();
        let started = Instant::now();
        log::info!(
            "tts request {request_id} started: provider={provider} op=synthesize text_chars={}",
            request.text.chars().count()
        );
        match adapter.synthesize(request, options).await {
            Ok(result) => {
                log::info!(
                    "tts request {request_id} completed in {}ms",
                    started.elapsed().as_millis()
                );
                Ok(result)
            }
            Err(err) => {
                log::error!(
                    "tts request {request_id} failed after {}ms: {err}",
                    started.elapsed().as_millis()
                );
                Err(err)
            }
        }
    }

    /// Server-driven streaming synthesis.
    pub async fn synthesize_stream(
        &self,
        provider: ProviderKind,
        request: TtsRequest,
        options: TtsOptions,
    ) -> TtsResult<AudioStream> {
        let adapter = self.adapter(provider)?;
        require_text(&request)?;
        let request_id = self.ids.next_id();
        log::info!(
            "tts request {request_id} started: provider={provider} op=stream text_chars={}",
            request.text.chars().count()
        );
        match adapter.synthesize_stream(request, options).await {
            Ok(stream) => Ok(stream),
            Err(err) => {
                log::error!("tts request {request_id} failed to open stream: {err}");
                Err(err)
            }
        }
    }

    /// Caller-driven incremental synthesis; text comes from `text`, not the
    /// request.
    pub async fn synthesize_incremental(
        &self,
        provider: ProviderKind,
        text: TextStream,
        request: TtsRequest,
        options: TtsOptions,
    ) -> TtsResult<AudioStream> {
        let adapter = self.adapter(provider)?;
        let request_id = self.ids.next_id();
        log::info!("tts request {request_id} started: provider={provider} op=incremental");
        match adapter.synthesize_incremental(text, request, options).await {
            Ok(stream) => Ok(stream),
            Err(err) => {
                log::error!("tts request {request_id} failed to open session: {err}");
                Err(err)
            }
        }
    }
}

fn require_text(request: &TtsRequest) -> TtsResult<()> {
    if request.text.is_empty() {
        return Err(TtsError::InvalidRequest("text must not be empty".into()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::AudioChunk;
    use async_trait::async_trait;
    use futures::StreamExt;

    struct EchoProvider;

    #[async_trait]
    impl TtsProvider for EchoProvider {
        fn provider_name(&self) -> &'static str {
            "echo"
        }

        async fn synthesize(
            &self,
            request: TtsRequest,
            _options: TtsOptions,
        ) -> TtsResult<AudioResult> {
            Ok(AudioResult {
                id: "id#echo".into(),
                data: request.text,
                is_final: true,
                metadata: None,
            })
        }

        async fn synthesize_stream(
            &self,
            request: TtsRequest,
            _options: TtsOptions,
        ) -> TtsResult<AudioStream> {
            let chunk = AudioChunk {
                id: "id#echo".into(),
                data: request.text,
                is_final: true,
                metadata: None,
            };
            Ok(Box::pin(futures::stream::iter(vec![Ok(chunk)])))
        }

        async fn synthesize_incremental(
            &self,
            text: TextStream,
            _request: TtsRequest,
            _options: TtsOptions,
        ) -> TtsResult<AudioStream> {
            let stream = text.map(|fragment| {
                Ok(AudioChunk {
                    id: "id#echo".into(),
                    data: fragment,
                    is_final: false,
                    metadata: None,
                })
            });
            Ok(Box::pin(stream))
        }
    }

    fn relay() -> TtsRelay {
        let mut relay = TtsRelay::new();
        relay.register(ProviderKind::Minimax, Arc::new(EchoProvider));
        relay
    }

    #[tokio::test]
    async fn dispatches_to_registered_provider() {
        let result = relay()
            .synthesize(
                ProviderKind::Minimax,
                TtsRequest::new("hello"),
                TtsOptions::default(),
            )
            .await
            .unwrap();
        assert_eq!(result.data, "hello");
    }

    #[tokio::test]
    async fn unknown_provider_is_an_invalid_request() {
        let err = relay()
            .synthesize(
                ProviderKind::Tencent,
                TtsRequest::new("hello"),
                TtsOptions::default(),
            )
            .await
            .unwrap_err();
        assert!(err.to_string().contains("not registered"));
    }

    #[tokio::test]
    async fn empty_text_is_rejected_before_dispatch() {
        let err = relay()
            .synthesize(
                ProviderKind::Minimax,
                TtsRequest::new(""),
                TtsOptions::default(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, TtsError::InvalidRequest(_)));
    }

    #[tokio::test]
    async fn incremental_accepts_empty_request_text() {
        let text: TextStream = Box::pin(futures::stream::iter(vec![
            "a".to_string(),
            "b".to_string(),
        ]));
        let stream = relay()
            .synthesize_incremental(
                ProviderKind::Minimax,
                text,
                TtsRequest::default(),
                TtsOptions::default(),
            )
            .await
            .unwrap();
        let chunks: Vec<_> = stream.collect().await;
        assert_eq!(chunks.len(), 2);
    }

    #[test]
    fn list_providers_reports_registrations() {
        let mut relay = relay();
        relay.register(ProviderKind::ElevenLabs, Arc::new(EchoProvider));
        assert_eq!(
            relay.list_providers(),
            vec![ProviderKind::ElevenLabs, ProviderKind::Minimax]
        );
    }
}
