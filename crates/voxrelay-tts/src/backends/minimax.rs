//! Minimax t2a_v2 TTS backend.
//!
//! One-shot and server-streamed synthesis POST to the same endpoint; the
//! streamed variant answers with SSE events. Incremental synthesis runs the
//! `task_start` / `task_continue` / `task_finish` WebSocket protocol, which
//! acknowledges the connection with a `connected_success` event before the
//! task may start.

use crate::backends::util::{merge_extra, vendor_error};
use crate::builder::TtsBuilder;
use crate::error::{TtsError, TtsResult};
use crate::provider::{AudioStream, TextStream, TtsProvider};
use crate::session::{
    Decoded, Handshake, InboundFrame, InboundProtocol, OutboundProtocol, connect_ws, drive_duplex,
};
use crate::types::{AudioChunk, AudioResult, IdGenerator, TtsOptions, TtsRequest};
use async_trait::async_trait;
use futures_util::StreamExt;
use serde_json::{Map, Value, json};
use std::sync::Arc;

pub const DEFAULT_BASE_URL: &str = "https://api.minimax.chat";
pub const DEFAULT_WS_URL: &str = "wss://api.minimax.chat/ws/v1/t2a_v2";
pub const DEFAULT_MODEL: &str = "speech-02-hd";

const SUPPORTED_FORMATS: [&str; 4] = ["mp3", "wav", "pcm", "flac"];
const SUPPORTED_SAMPLE_RATES: [u32; 6] = [8000, 16000, 22050, 24000, 32000, 44100];

/// Minimax TTS provider.
#[derive(Debug)]
pub struct Minimax {
    pub api_key: String,
    pub group_id: String,
    pub base_url: String,
    pub ws_url: String,
    pub default_model: String,
    ids: IdGenerator,
    client: reqwest::Client,
}

impl Minimax {
    pub fn with_config(
        api_key: impl Into<String>,
        group_id: impl Into<String>,
        base_url: Option<String>,
        default_model: Option<String>,
    ) -> Self {
        Self {
            api_key: api_key.into(),
            group_id: group_id.into(),
            base_url: base_url.unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
            ws_url: DEFAULT_WS_URL.to_string(),
            default_model: default_model.unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            ids: IdGenerator::default(),
            client: reqwest::Client::new(),
        }
    }

    fn map_request(&self, request: &TtsRequest) -> Map<String, Value> {
        let mut body = Map::new();
        body.insert("text".into(), json!(request.text));
        body.insert(
            "model".into(),
            json!(request.model.clone().unwrap_or_else(|| self.default_model.clone())),
        );

        let mut voice_setting = Map::new();
        if let Some(voice) = &request.voice {
            voice_setting.insert("voice_id".into(), json!(voice));
        }
        if let Some(rate) = request.rate {
            voice_setting.insert("speed".into(), json!(rate));
        }
        if let Some(volume) = request.volume {
            voice_setting.insert("vol".into(), json!(volume));
        }
        if let Some(pitch) = request.pitch {
            voice_setting.insert("pitch".into(), json!(pitch));
        }
        if let Some(emotion) = &request.emotion {
            voice_setting.insert("emotion".into(), json!(emotion));
        }
        if !voice_setting.is_empty() {
            body.insert("voice_setting".into(), Value::Object(voice_setting));
        }

        let mut audio_setting = Map::new();
        if let Some(format) = request.format {
            if SUPPORTED_FORMATS.contains(&format.as_str()) {
                audio_setting.insert("format".into(), json!(format.as_str()));
            }
        }
        if let Some(rate) = request.sample_rate {
            if SUPPORTED_SAMPLE_RATES.contains(&rate) {
                audio_setting.insert("sample_rate".into(), json!(rate));
            }
        }
        if !audio_setting.is_empty() {
            body.insert("audio_setting".into(), Value::Object(audio_setting));
        }

        if let Some(extra) = &request.extra {
            merge_extra(&mut body, extra, &["voice_setting", "audio_setting"]);
        }
        body
    }

    fn post(&self, options: &TtsOptions) -> reqwest::RequestBuilder {
        let url = format!("{}/v1/t2a_v2?GroupId={}", self.base_url, self.group_id);
        let mut req = self.client.post(url).bearer_auth(&self.api_key);
        if let Some(timeout) = options.timeout {
            req = req.timeout(timeout);
        }
        if let Some(headers) = &options.headers {
            for (name, value) in headers {
                req = req.header(name, value);
            }
        }
        req
    }
}

/// Fail on any payload whose `base_resp.status_code` is non-zero.
fn validate_payload(payload: &Value) -> TtsResult<()> {
    let code = payload
        .pointer("/base_resp/status_code")
        .and_then(Value::as_i64)
        .unwrap_or(0);
    if code != 0 {
        let message = payload
            .pointer("/base_resp/status_msg")
            .and_then(Value::as_str)
            .unwrap_or("Unknown error")
            .to_owned();
        return Err(TtsError::Vendor {
            provider: "minimax",
            code,
            message,
        });
    }
    Ok(())
}

fn payload_id(payload: &Value, ids: &IdGenerator) -> String {
    payload
        .get("trace_id")
        .and_then(Value::as_str)
        .map(str::to_owned)
        .unwrap_or_else(|| ids.next_id())
}

fn payload_chunk(payload: &Value, ids: &IdGenerator) -> AudioChunk {
    AudioChunk {
        id: payload_id(payload, ids),
        data: payload
            .pointer("/data/audio")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_owned(),
        // Audio status 2 marks the last segment of a synthesis.
        is_final: payload.pointer("/data/status").and_then(Value::as_i64) == Some(2),
        metadata: None,
    }
}

#[async_trait]
impl TtsProvider for Minimax {
    fn provider_name(&self) -> &'static str {
        "minimax"
    }

    async fn synthesize(&self, request: TtsRequest, options: TtsOptions) -> TtsResult<AudioResult> {
        let body = self.map_request(&request);
        let resp = self.post(&options).json(&Value::Object(body)).send().await?;
        if !resp.status().is_success() {
            return Err(vendor_error("minimax", resp).await);
        }
        let payload: Value = resp.json().await?;
        validate_payload(&payload)?;
        let chunk = payload_chunk(&payload, &self.ids);
        Ok(AudioResult {
            id: chunk.id,
            data: chunk.data,
            is_final: true,
            metadata: None,
        })
    }

    async fn synthesize_stream(
        &self,
        request: TtsRequest,
        options: TtsOptions,
    ) -> TtsResult<AudioStream> {
        let mut body = self.map_request(&request);
        body.insert("stream".into(), json!(true));
        body.insert(
            "stream_options".into(),
            json!({"exclude_aggregated_audio": true}),
        );
        let resp = self.post(&options).json(&Value::Object(body)).send().await?;
        if !resp.status().is_success() {
            return Err(vendor_error("minimax", resp).await);
        }

        let is_sse = resp
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|v| v.contains("text/event-stream"));
        let ids = self.ids.clone();

        let stream = async_stream::try_stream! {
            let mut parser = SseParser::default();
            let mut body = resp.bytes_stream();
            let mut fallback: Vec<u8> = Vec::new();
            while let Some(piece) = body.next().await {
                let piece = piece.map_err(TtsError::from)?;
                if is_sse {
                    for payload in parser.feed(&piece)? {
                        validate_payload(&payload)?;
                        yield payload_chunk(&payload, &ids);
                    }
                } else {
                    fallback.extend_from_slice(&piece);
                }
            }
            if !is_sse {
                // Non-SSE responses carry one aggregated JSON payload and the
                // stream ends after it.
                let payload: Value = serde_json::from_slice(&fallback)?;
                validate_payload(&payload)?;
                yield payload_chunk(&payload, &ids);
            }
        };
        Ok(Box::pin(stream))
    }

    async fn synthesize_incremental(
        &self,
        text: TextStream,
        request: TtsRequest,
        options: TtsOptions,
    ) -> TtsResult<AudioStream> {
        let mut params = self.map_request(&request);
        params.remove("text");
        params.remove("stream");
        let mut start = Map::new();
        start.insert("event".into(), json!("task_start"));
        for (key, value) in params {
            start.insert(key, value);
        }

        let mut headers = options.headers.clone().unwrap_or_default();
        headers.insert(
            "Authorization".into(),
            format!("Bearer {}", self.api_key),
        );
        let (sink, source) = connect_ws(&self.ws_url, Some(&headers), options.timeout).await?;

        let handshake = Handshake {
            init_frames: Vec::new(),
            // The server confirms with a connected_success event before
            // task_start is allowed.
            requires_ready: true,
            start_frames: vec![Value::Object(start).to_string()],
        };
        drive_duplex(
            handshake,
            Outbound,
            Inbound {
                ids: self.ids.clone(),
            },
            sink,
            source,
            Some(text),
            &options,
        )
        .await
    }
}

/// Incremental SSE event parser; events are blank-line separated, payloads
/// ride on `data:` lines.
#[derive(Default)]
struct SseParser {
    buffer: Vec<u8>,
}

impl SseParser {
    fn feed(&mut self, piece: &[u8]) -> TtsResult<Vec<Value>> {
        self.buffer.extend_from_slice(piece);
        let mut payloads = Vec::new();
        while let Some(pos) = self.buffer.windows(2).position(|w| w == b"\n\n") {
            let event: Vec<u8> = self.buffer.drain(..pos + 2).collect();
            for line in event.split(|&b| b == b'\n') {
                let Some(data) = line.strip_prefix(b"data: ") else {
                    continue;
                };
                if data.iter().all(u8::is_ascii_whitespace) {
                    continue;
                }
                payloads.push(serde_json::from_slice(data)?);
            }
        }
        Ok(payloads)
    }
}

struct Outbound;

impl OutboundProtocol for Outbound {
    fn text_frame(&mut self, unit: &str, _first: bool) -> String {
        json!({"event": "task_continue", "text": unit}).to_string()
    }

    fn finish_frame(&mut self) -> Option<String> {
        Some(json!({"event": "task_finish"}).to_string())
    }
}

struct Inbound {
    ids: IdGenerator,
}

impl InboundProtocol for Inbound {
    fn provider(&self) -> &'static str {
        "minimax"
    }

    fn decode(&mut self, frame: InboundFrame) -> TtsResult<Decoded> {
        let InboundFrame::Text(text) = frame else {
            return Err(TtsError::ResponseFormat(
                "unexpected binary frame from Minimax".into(),
            ));
        };
        let payload: Value = serde_json::from_str(&text)?;
        match payload.get("event").and_then(Value::as_str) {
            Some("connected_success") => Ok(Decoded::Ready),
            Some("task_continued") => Ok(Decoded::Chunk(payload_chunk(&payload, &self.ids))),
            Some("task_finished") => Ok(Decoded::Done),
            Some("task_failed") => {
                let code = payload
                    .pointer("/base_resp/status_code")
                    .and_then(Value::as_i64)
                    .unwrap_or(-1);
                let message = payload
                    .pointer("/base_resp/status_msg")
                    .and_then(Value::as_str)
                    .unwrap_or("Unknown error")
                    .to_owned();
                Err(TtsError::Vendor {
                    provider: "minimax",
                    code,
                    message,
                })
            }
            // task_started and anything unrecognized carry no audio.
            _ => Ok(Decoded::Ignore),
        }
    }
}

impl TtsBuilder<Minimax> {
    /// Builds the Minimax provider from the configured builder.
    pub fn build(self) -> TtsResult<Arc<Minimax>> {
        let api_key = self
            .api_key
            .ok_or_else(|| TtsError::InvalidRequest("No API key provided for Minimax".into()))?;
        let group_id = self
            .group_id
            .ok_or_else(|| TtsError::InvalidRequest("No group id provided for Minimax".into()))?;
        Ok(Arc::new(Minimax::with_config(
            api_key,
            group_id,
            self.base_url,
            self.default_model,
        )))
    }
}
