//! Tencent Cloud TTS backend.
//!
//! Every call authenticates with an HMAC-SHA1 signature over the sorted
//! request parameters. One-shot synthesis POSTs to `/stream` and answers with
//! raw audio bytes (or a JSON error document); server-streamed synthesis runs
//! over the `/stream_ws` WebSocket with the text in the signed query; the
//! incremental v2 protocol on `/stream_wsv2` requires the server's `ready`
//! signal before any text may be sent and interleaves heartbeat frames that
//! never reach the caller.

use crate::backends::util::{clamp_f32, vendor_error};
use crate::builder::TtsBuilder;
use crate::error::{TtsError, TtsResult};
use crate::provider::{AudioStream, TextStream, TtsProvider};
use crate::session::{
    Decoded, Handshake, InboundFrame, InboundProtocol, OutboundProtocol, connect_ws, drive_duplex,
};
use crate::types::{AudioChunk, AudioResult, TtsOptions, TtsRequest};
use async_trait::async_trait;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use futures_util::StreamExt;
use hmac::{Hmac, Mac};
use serde_json::{Value, json};
use sha1::Sha1;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use uuid::Uuid;

type HmacSha1 = Hmac<Sha1>;

pub const DEFAULT_BASE_URL: &str = "https://tts.cloud.tencent.com";
pub const DEFAULT_VOICE_TYPE: i64 = 101001;

const SUPPORTED_CODECS: [&str; 3] = ["mp3", "pcm", "opus"];
const SUPPORTED_SAMPLE_RATES: [u32; 3] = [8000, 16000, 24000];
const EMOTION_CATEGORIES: [&str; 10] = [
    "neutral", "sad", "happy", "angry", "fear", "news", "story", "radio", "poetry", "call",
];

/// Tencent Cloud TTS provider.
#[derive(Debug)]
pub struct Tencent {
    pub app_id: String,
    pub secret_id: String,
    secret_key: String,
    pub base_url: String,
    /// Host the signature is computed against, parsed from `base_url`.
    host: String,
    client: reqwest::Client,
}

impl Tencent {
    pub fn with_config(
        app_id: impl Into<String>,
        secret_id: impl Into<String>,
        secret_key: impl Into<String>,
        base_url: Option<String>,
    ) -> Self {
        let base_url = base_url.unwrap_or_else(|| DEFAULT_BASE_URL.to_string());
        let host = base_url
            .trim_start_matches("https://")
            .trim_start_matches("http://")
            .trim_end_matches('/')
            .to_string();
        Self {
            app_id: app_id.into(),
            secret_id: secret_id.into(),
            secret_key: secret_key.into(),
            base_url,
            host,
            client: reqwest::Client::new(),
        }
    }

    fn session_id(&self) -> String {
        Uuid::new_v4().simple().to_string()
    }

    /// Common request parameters; sorted keys double as the signing order.
    fn base_params(
        &self,
        request: &TtsRequest,
        action: &str,
        session_id: &str,
        default_codec: &str,
        subtitle_default: Option<bool>,
        include_text: bool,
    ) -> TtsResult<BTreeMap<String, Value>> {
        let app_id: i64 = self.app_id.parse().map_err(|_| {
            TtsError::InvalidRequest(format!("Tencent app id is not numeric: {}", self.app_id))
        })?;
        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);

        let voice_type = request
            .voice
            .as_deref()
            .and_then(|v| v.parse::<i64>().ok())
            .unwrap_or(DEFAULT_VOICE_TYPE);
        let codec = request
            .format
            .map(|f| f.as_str())
            .filter(|f| SUPPORTED_CODECS.contains(f))
            .unwrap_or(default_codec);
        let sample_rate = request
            .sample_rate
            .filter(|r| SUPPORTED_SAMPLE_RATES.contains(r))
            .unwrap_or(16000);

        let mut params = BTreeMap::new();
        params.insert("Action".into(), json!(action));
        params.insert("AppId".into(), json!(app_id));
        params.insert("SecretId".into(), json!(self.secret_id));
        params.insert("ModelType".into(), json!(1));
        params.insert("VoiceType".into(), json!(voice_type));
        params.insert("Codec".into(), json!(codec));
        params.insert("SampleRate".into(), json!(sample_rate));
        params.insert(
            "Speed".into(),
            json!(request.rate.map(|r| clamp_f32(r, -10.0, 10.0)).unwrap_or(0.0)),
        );
        params.insert(
            "Volume".into(),
            json!(request.volume.map(|v| clamp_f32(v, -10.0, 10.0)).unwrap_or(0.0)),
        );
        params.insert("SessionId".into(), json!(session_id));
        params.insert("Timestamp".into(), json!(timestamp));
        params.insert("Expired".into(), json!(timestamp + 24 * 60 * 60));
        if let Some(subtitle) = subtitle_default {
            params.insert("EnableSubtitle".into(), json!(subtitle));
        }
        if let Some(emotion) = request
            .emotion
            .as_deref()
            .filter(|e| EMOTION_CATEGORIES.contains(e))
        {
            params.insert("EmotionCategory".into(), json!(emotion));
        }
        if include_text {
            params.insert("Text".into(), json!(request.text));
        }
        if let Some(extra) = &request.extra {
            for (key, value) in extra {
                params.insert(key.clone(), value.clone());
            }
        }
        Ok(params)
    }

    fn sign(&self, method: &str, path: &str, params: &BTreeMap<String, Value>) -> TtsResult<String> {
        let sign_str = signing_string(method, &self.host, path, params);
        let mut mac = HmacSha1::new_from_slice(self.secret_key.as_bytes())
            .map_err(|e| TtsError::InvalidRequest(format!("invalid secret key: {e}")))?;
        mac.update(sign_str.as_bytes());
        Ok(BASE64.encode(mac.finalize().into_bytes()))
    }

    fn ws_url(&self, path: &str, params: &BTreeMap<String, Value>, signature: &str) -> String {
        let mut url = format!("wss://{}{path}?", self.host);
        for (key, value) in params {
            let value = param_str(value);
            if key == "Text" {
                url.push_str(&format!("{key}={}&", urlencoding::encode(&value)));
            } else {
                url.push_str(&format!("{key}={value}&"));
            }
        }
        url.push_str(&format!("Signature={}", urlencoding::encode(signature)));
        url
    }
}

fn param_str(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn signing_string(
    method: &str,
    host: &str,
    path: &str,
    params: &BTreeMap<String, Value>,
) -> String {
    let mut out = format!("{method}{host}{path}?");
    for (i, (key, value)) in params.iter().enumerate() {
        if i > 0 {
            out.push('&');
        }
        out.push_str(key);
        out.push('=');
        out.push_str(&param_str(value));
    }
    out
}

#[async_trait]
impl TtsProvider for Tencent {
    fn provider_name(&self) -> &'static str {
        "tencent"
    }

    async fn synthesize(&self, request: TtsRequest, options: TtsOptions) -> TtsResult<AudioResult> {
        let session_id = self.session_id();
        let params = self.base_params(
            &request,
            "TextToStreamAudio",
            &session_id,
            "mp3",
            None,
            true,
        )?;
        let signature = self.sign("POST", "/stream", &params)?;

        let mut req = self
            .client
            .post(format!("{}/stream", self.base_url))
            .header("Authorization", signature)
            .json(&params);
        if let Some(timeout) = options.timeout {
            req = req.timeout(timeout);
        }
        if let Some(headers) = &options.headers {
            for (name, value) in headers {
                req = req.header(name, value);
            }
        }
        let resp = req.send().await?;
        if !resp.status().is_success() {
            return Err(vendor_error("tencent", resp).await);
        }

        // The body is either raw audio or a JSON error document; the endpoint
        // offers no content-type discriminator, so the first chunk decides.
        let mut body = resp.bytes_stream();
        let mut audio: Vec<u8> = Vec::new();
        let mut decided_audio = false;
        while let Some(piece) = body.next().await {
            let piece = piece.map_err(TtsError::from)?;
            if decided_audio {
                audio.extend_from_slice(&piece);
                continue;
            }
            match serde_json::from_slice::<Value>(&piece) {
                Ok(doc) => {
                    if let Some(error) = doc.pointer("/Response/Error") {
                        let code = error.get("Code").and_then(Value::as_str).unwrap_or("Unknown");
                        let message = error
                            .get("Message")
                            .and_then(Value::as_str)
                            .unwrap_or("Unknown error");
                        return Err(TtsError::Vendor {
                            provider: "tencent",
                            code: -1,
                            message: format!("{code}: {message}"),
                        });
                    }
                    // Status document, not audio; skip it.
                }
                Err(_) => {
                    decided_audio = true;
                    audio.extend_from_slice(&piece);
                }
            }
        }
        if audio.is_empty() {
            return Err(TtsError::ResponseFormat("no audio data received".into()));
        }

        Ok(AudioResult {
            id: session_id.clone(),
            data: BASE64.encode(&audio),
            is_final: true,
            metadata: Some(json!({
                "session_id": session_id,
                "request_id": session_id,
            })),
        })
    }

    async fn synthesize_stream(
        &self,
        request: TtsRequest,
        options: TtsOptions,
    ) -> TtsResult<AudioStream> {
        let session_id = self.session_id();
        let params = self.base_params(
            &request,
            "TextToStreamAudioWS",
            &session_id,
            "pcm",
            Some(true),
            true,
        )?;
        let signature = self.sign("GET", "/stream_ws", &params)?;
        let url = self.ws_url("/stream_ws", &params, &signature);

        let (sink, source) = connect_ws(&url, options.headers.as_ref(), options.timeout).await?;
        drive_duplex(
            Handshake::default(),
            SilentOutbound,
            StreamInbound { session_id },
            sink,
            source,
            None,
            &options,
        )
        .await
    }

    async fn synthesize_incremental(
        &self,
        text: TextStream,
        request: TtsRequest,
        options: TtsOptions,
    ) -> TtsResult<AudioStream> {
        let session_id = self.session_id();
        let params = self.base_params(
            &request,
            "TextToStreamAudioWSv2",
            &session_id,
            "pcm",
            Some(false),
            false,
        )?;
        let signature = self.sign("GET", "/stream_wsv2", &params)?;
        let url = self.ws_url("/stream_wsv2", &params, &signature);

        let (sink, source) = connect_ws(&url, options.headers.as_ref(), options.timeout).await?;
        let handshake = Handshake {
            init_frames: Vec::new(),
            // Sending text before the server's ready signal is a protocol
            // violation; the driver defers the whole sender on this flag.
            requires_ready: true,
            start_frames: Vec::new(),
        };
        drive_duplex(
            handshake,
            IncrementalOutbound {
                session_id: session_id.clone(),
            },
            IncrementalInbound { session_id },
            sink,
            source,
            Some(text),
            &options,
        )
        .await
    }
}

fn status_metadata(payload: &Value) -> Value {
    json!({
        "message": payload.get("message").cloned().unwrap_or(Value::Null),
        "session_id": payload.get("session_id").cloned().unwrap_or(Value::Null),
        "request_id": payload.get("request_id").cloned().unwrap_or(Value::Null),
        "message_id": payload.get("message_id").cloned().unwrap_or(Value::Null),
        "subtitles": payload.pointer("/result/subtitles").cloned().unwrap_or(Value::Null),
    })
}

fn vendor_status_error(payload: &Value) -> TtsError {
    TtsError::Vendor {
        provider: "tencent",
        code: payload.get("code").and_then(Value::as_i64).unwrap_or(-1),
        message: payload
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or("Unknown error")
            .to_owned(),
    }
}

/// The v1 stream socket is inbound-only.
struct SilentOutbound;

impl OutboundProtocol for SilentOutbound {
    fn text_frame(&mut self, _unit: &str, _first: bool) -> String {
        String::new()
    }

    fn finish_frame(&mut self) -> Option<String> {
        None
    }
}

/// v1 stream frames: binary audio interleaved with JSON status/subtitle
/// messages, correlated by receipt order.
struct StreamInbound {
    session_id: String,
}

impl InboundProtocol for StreamInbound {
    fn provider(&self) -> &'static str {
        "tencent"
    }

    fn decode(&mut self, frame: InboundFrame) -> TtsResult<Decoded> {
        match frame {
            InboundFrame::Binary(data) => Ok(Decoded::Chunk(AudioChunk {
                id: self.session_id.clone(),
                data: BASE64.encode(&data),
                is_final: false,
                metadata: None,
            })),
            InboundFrame::Text(text) => {
                let payload: Value = serde_json::from_str(&text)?;
                if payload.get("code").and_then(Value::as_i64).unwrap_or(0) != 0 {
                    return Err(vendor_status_error(&payload));
                }
                let chunk = AudioChunk {
                    id: payload
                        .get("session_id")
                        .and_then(Value::as_str)
                        .unwrap_or(&self.session_id)
                        .to_owned(),
                    data: String::new(),
                    is_final: payload.get("final").and_then(Value::as_i64) == Some(1),
                    metadata: Some(status_metadata(&payload)),
                };
                if chunk.is_final {
                    Ok(Decoded::Final(chunk))
                } else {
                    Ok(Decoded::Chunk(chunk))
                }
            }
        }
    }
}

struct IncrementalOutbound {
    session_id: String,
}

impl OutboundProtocol for IncrementalOutbound {
    fn text_frame(&mut self, unit: &str, _first: bool) -> String {
        json!({
            "session_id": self.session_id,
            "message_id": Uuid::new_v4().simple().to_string(),
            "action": "ACTION_SYNTHESIS",
            "data": unit,
        })
        .to_string()
    }

    fn finish_frame(&mut self) -> Option<String> {
        Some(
            json!({
                "session_id": self.session_id,
                "message_id": Uuid::new_v4().simple().to_string(),
                "action": "ACTION_COMPLETE",
                "data": "",
            })
            .to_string(),
        )
    }
}

/// v2 incremental frames add `ready` and `heartbeat` signals on top of the
/// v1 vocabulary.
struct IncrementalInbound {
    session_id: String,
}

impl InboundProtocol for IncrementalInbound {
    fn provider(&self) -> &'static str {
        "tencent"
    }

    fn decode(&mut self, frame: InboundFrame) -> TtsResult<Decoded> {
        match frame {
            InboundFrame::Binary(data) => Ok(Decoded::Chunk(AudioChunk {
                id: self.session_id.clone(),
                data: BASE64.encode(&data),
                is_final: false,
                metadata: None,
            })),
            InboundFrame::Text(text) => {
                let payload: Value = serde_json::from_str(&text)?;
                if payload.get("code").and_then(Value::as_i64).unwrap_or(0) != 0 {
                    return Err(vendor_status_error(&payload));
                }
                if payload.get("ready").and_then(Value::as_i64) == Some(1) {
                    return Ok(Decoded::Ready);
                }
                if payload.get("heartbeat").and_then(Value::as_i64) == Some(1) {
                    return Ok(Decoded::Ignore);
                }
                let is_final = payload.get("final").and_then(Value::as_i64) == Some(1);
                let has_subtitles = payload
                    .pointer("/result/subtitles")
                    .is_some_and(|s| !s.is_null());
                if has_subtitles {
                    let chunk = AudioChunk {
                        id: payload
                            .get("session_id")
                            .and_then(Value::as_str)
                            .unwrap_or(&self.session_id)
                            .to_owned(),
                        data: String::new(),
                        is_final,
                        metadata: Some(status_metadata(&payload)),
                    };
                    if is_final {
                        Ok(Decoded::Final(chunk))
                    } else {
                        Ok(Decoded::Chunk(chunk))
                    }
                } else if is_final {
                    Ok(Decoded::Done)
                } else {
                    Ok(Decoded::Ignore)
                }
            }
        }
    }
}

impl TtsBuilder<Tencent> {
    /// Builds the Tencent provider from the configured builder.
    pub fn build(self) -> TtsResult<Arc<Tencent>> {
        let app_id = self
            .app_id
            .ok_or_else(|| TtsError::InvalidRequest("No app id provided for Tencent".into()))?;
        let secret_id = self
            .secret_id
            .ok_or_else(|| TtsError::InvalidRequest("No secret id provided for Tencent".into()))?;
        let secret_key = self
            .secret_key
            .ok_or_else(|| TtsError::InvalidRequest("No secret key provided for Tencent".into()))?;
        Ok(Arc::new(Tencent::with_config(
            app_id,
            secret_id,
            secret_key,
            self.base_url,
        )))
    }
}
