//! ElevenLabs TTS backend.
//!
//! One-shot and server-streamed synthesis go over HTTP POST (optionally via
//! the `with-timestamps` endpoints); incremental synthesis uses the
//! `stream-input` WebSocket, where the API key travels both as a header and
//! inline in the init frame so the same protocol works on transports that
//! cannot set headers before connecting.

use crate::backends::util::{clamp_f32, merge_extra, vendor_error};
use crate::builder::TtsBuilder;
use crate::error::{TtsError, TtsResult};
use crate::provider::{AudioStream, TextStream, TtsProvider};
use crate::session::{
    Decoded, Handshake, InboundFrame, InboundProtocol, OutboundProtocol, connect_ws, drive_duplex,
};
use crate::types::{AudioChunk, AudioFormat, AudioResult, IdGenerator, TtsOptions, TtsRequest};
use async_trait::async_trait;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use futures_util::StreamExt;
use serde_json::{Map, Value, json};
use std::sync::Arc;

pub const DEFAULT_BASE_URL: &str = "https://api.elevenlabs.io";

/// ElevenLabs TTS provider.
#[derive(Debug)]
pub struct ElevenLabs {
    pub api_key: String,
    pub base_url: String,
    pub ws_base_url: String,
    pub default_voice: Option<String>,
    pub default_model: Option<String>,
    ids: IdGenerator,
    client: reqwest::Client,
}

#[derive(Debug)]
struct Mapped {
    voice_id: String,
    body: Map<String, Value>,
    output_format: Option<String>,
}

impl ElevenLabs {
    pub fn with_config(
        api_key: impl Into<String>,
        base_url: Option<String>,
        default_voice: Option<String>,
        default_model: Option<String>,
    ) -> Self {
        let base_url = base_url.unwrap_or_else(|| DEFAULT_BASE_URL.to_string());
        let ws_base_url = base_url
            .replacen("https://", "wss://", 1)
            .replacen("http://", "ws://", 1);
        Self {
            api_key: api_key.into(),
            base_url,
            ws_base_url,
            default_voice,
            default_model,
            ids: IdGenerator::default(),
            client: reqwest::Client::new(),
        }
    }

    fn map_request(&self, request: &TtsRequest) -> TtsResult<Mapped> {
        let voice_id = request
            .voice
            .clone()
            .or_else(|| self.default_voice.clone())
            .ok_or_else(|| TtsError::InvalidRequest("ElevenLabs requires a voice id".into()))?;

        let mut body = Map::new();
        body.insert("text".into(), json!(request.text));
        if let Some(model) = request.model.clone().or_else(|| self.default_model.clone()) {
            body.insert("model_id".into(), json!(model));
        }

        let mut voice_settings = Map::new();
        if let Some(rate) = request.rate {
            voice_settings.insert("speed".into(), json!(clamp_f32(rate, 0.25, 4.0)));
        }
        if let Some(emotion) = &request.emotion {
            voice_settings.insert("emotion".into(), json!(emotion));
        }
        if !voice_settings.is_empty() {
            body.insert("voice_settings".into(), Value::Object(voice_settings));
        }

        if let Some(extra) = &request.extra {
            merge_extra(&mut body, extra, &["voice_settings"]);
        }

        Ok(Mapped {
            voice_id,
            output_format: request
                .format
                .and_then(|f| output_format(f, request.sample_rate))
                .map(str::to_owned),
            body,
        })
    }

    fn http_post(&self, url: &str, options: &TtsOptions) -> reqwest::RequestBuilder {
        let mut req = self.client.post(url).header("xi-api-key", &self.api_key);
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

    fn endpoint(&self, voice_id: &str, suffix: &str, output_format: &Option<String>) -> String {
        let mut url = format!("{}/v1/text-to-speech/{voice_id}{suffix}", self.base_url);
        if let Some(format) = output_format {
            url.push_str(&format!("?output_format={format}"));
        }
        url
    }
}

/// ElevenLabs output formats are a single enum of codec+rate+bitrate; map the
/// unified format/sample-rate pair onto it and leave the vendor default for
/// combinations outside the table.
fn output_format(format: AudioFormat, sample_rate: Option<u32>) -> Option<&'static str> {
    match (format, sample_rate) {
        (AudioFormat::Mp3, Some(22050)) => Some("mp3_22050_32"),
        (AudioFormat::Mp3, Some(44100)) => Some("mp3_44100_64"),
        (AudioFormat::Mp3, _) => Some("mp3_44100_128"),
        (AudioFormat::Pcm, Some(22050)) => Some("pcm_22050"),
        (AudioFormat::Pcm, Some(24000)) => Some("pcm_24000"),
        (AudioFormat::Pcm, Some(44100)) => Some("pcm_44100"),
        (AudioFormat::Pcm, _) => Some("pcm_16000"),
        (AudioFormat::Opus, _) => Some("opus_48000_32"),
        (AudioFormat::Wav, _) | (AudioFormat::Flac, _) => None,
    }
}

fn timestamp_metadata(payload: &Value, alignment: &str, normalized: &str) -> Value {
    json!({
        "alignment": payload.get(alignment).cloned().unwrap_or(Value::Null),
        "normalized_alignment": payload.get(normalized).cloned().unwrap_or(Value::Null),
    })
}

#[async_trait]
impl TtsProvider for ElevenLabs {
    fn provider_name(&self) -> &'static str {
        "elevenlabs"
    }

    async fn synthesize(&self, request: TtsRequest, options: TtsOptions) -> TtsResult<AudioResult> {
        let mapped = self.map_request(&request)?;
        let suffix = if request.with_timestamps {
            "/with-timestamps"
        } else {
            ""
        };
        let url = self.endpoint(&mapped.voice_id, suffix, &mapped.output_format);
        let resp = self
            .http_post(&url, &options)
            .json(&Value::Object(mapped.body))
            .send()
            .await?;
        if !resp.status().is_success() {
            return Err(vendor_error("elevenlabs", resp).await);
        }

        if request.with_timestamps {
            let payload: Value = resp.json().await?;
            let data = payload
                .get("audio_base64")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_owned();
            Ok(AudioResult {
                id: self.ids.next_id(),
                data,
                is_final: true,
                metadata: Some(timestamp_metadata(
                    &payload,
                    "alignment",
                    "normalized_alignment",
                )),
            })
        } else {
            let bytes = resp.bytes().await?;
            Ok(AudioResult {
                id: self.ids.next_id(),
                data: BASE64.encode(&bytes),
                is_final: true,
                metadata: None,
            })
        }
    }

    async fn synthesize_stream(
        &self,
        request: TtsRequest,
        options: TtsOptions,
    ) -> TtsResult<AudioStream> {
        let mapped = self.map_request(&request)?;
        let suffix = if request.with_timestamps {
            "/stream/with-timestamps"
        } else {
            "/stream"
        };
        let url = self.endpoint(&mapped.voice_id, suffix, &mapped.output_format);
        let resp = self
            .http_post(&url, &options)
            .json(&Value::Object(mapped.body))
            .send()
            .await?;
        if !resp.status().is_success() {
            return Err(vendor_error("elevenlabs", resp).await);
        }

        let ids = self.ids.clone();
        if request.with_timestamps {
            // The timestamped stream is newline-delimited JSON objects.
            let stream = async_stream::try_stream! {
                let mut body = resp.bytes_stream();
                let mut buffer: Vec<u8> = Vec::new();
                while let Some(piece) = body.next().await {
                    let piece = piece.map_err(TtsError::from)?;
                    buffer.extend_from_slice(&piece);
                    while let Some(pos) = buffer.iter().position(|&b| b == b'\n') {
                        let line: Vec<u8> = buffer.drain(..=pos).collect();
                        if line.iter().all(u8::is_ascii_whitespace) {
                            continue;
                        }
                        let payload: Value = serde_json::from_slice(&line)?;
                        yield timestamped_chunk(&ids, &payload);
                    }
                }
                if !buffer.iter().all(u8::is_ascii_whitespace) {
                    let payload: Value = serde_json::from_slice(&buffer)?;
                    yield timestamped_chunk(&ids, &payload);
                }
            };
            Ok(Box::pin(stream))
        } else {
            let stream = resp.bytes_stream().map(move |piece| -> TtsResult<AudioChunk> {
                let piece = piece.map_err(TtsError::from)?;
                Ok(AudioChunk {
                    id: ids.next_id(),
                    data: BASE64.encode(&piece),
                    is_final: false,
                    metadata: None,
                })
            });
            Ok(Box::pin(stream))
        }
    }

    async fn synthesize_incremental(
        &self,
        text: TextStream,
        request: TtsRequest,
        options: TtsOptions,
    ) -> TtsResult<AudioStream> {
        let mapped = self.map_request(&request)?;
        let url = format!(
            "{}/v1/text-to-speech/{}/stream-input",
            self.ws_base_url, mapped.voice_id
        );

        let mut headers = options.headers.clone().unwrap_or_default();
        headers.insert("xi-api-key".into(), self.api_key.clone());
        let (sink, source) = connect_ws(&url, Some(&headers), options.timeout).await?;

        // The init frame repeats the credential inline so the protocol also
        // works where the transport cannot carry the header.
        let mut init = Map::new();
        init.insert("text".into(), json!(" "));
        if let Some(settings) = mapped.body.get("voice_settings") {
            init.insert("voice_settings".into(), settings.clone());
        }
        init.insert("xi-api-key".into(), json!(self.api_key));

        let handshake = Handshake {
            init_frames: vec![Value::Object(init).to_string()],
            requires_ready: false,
            start_frames: Vec::new(),
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

fn timestamped_chunk(ids: &IdGenerator, payload: &Value) -> AudioChunk {
    AudioChunk {
        id: ids.next_id(),
        data: payload
            .get("audio_base64")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_owned(),
        is_final: false,
        metadata: Some(timestamp_metadata(
            payload,
            "alignment",
            "normalized_alignment",
        )),
    }
}

struct Outbound;

impl OutboundProtocol for Outbound {
    fn text_frame(&mut self, unit: &str, first: bool) -> String {
        json!({"text": unit, "try_trigger_generation": first}).to_string()
    }

    fn finish_frame(&mut self) -> Option<String> {
        // An empty text frame tells the server the input is finished.
        Some(json!({"text": ""}).to_string())
    }
}

struct Inbound {
    ids: IdGenerator,
}

impl InboundProtocol for Inbound {
    fn provider(&self) -> &'static str {
        "elevenlabs"
    }

    fn decode(&mut self, frame: InboundFrame) -> TtsResult<Decoded> {
        let InboundFrame::Text(text) = frame else {
            return Err(TtsError::ResponseFormat(
                "unexpected binary frame from ElevenLabs".into(),
            ));
        };
        let payload: Value = serde_json::from_str(&text)?;
        let is_final = payload
            .get("isFinal")
            .and_then(Value::as_bool)
            .unwrap_or(false);
        let chunk = AudioChunk {
            id: self.ids.next_id(),
            data: payload
                .get("audio")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_owned(),
            is_final,
            metadata: Some(timestamp_metadata(
                &payload,
                "alignment",
                "normalizedAlignment",
            )),
        };
        if is_final {
            Ok(Decoded::Final(chunk))
        } else {
            Ok(Decoded::Chunk(chunk))
        }
    }
}

impl TtsBuilder<ElevenLabs> {
    /// Builds the ElevenLabs provider from the configured builder.
    pub fn build(self) -> TtsResult<Arc<ElevenLabs>> {
        let api_key = self.api_key.ok_or_else(|| {
            TtsError::InvalidRequest("No API key provided for ElevenLabs".into())
        })?;
        Ok(Arc::new(ElevenLabs::with_config(
            api_key,
            self.base_url,
            self.default_voice,
            self.default_model,
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn provider() -> ElevenLabs {
        ElevenLabs::with_config("key", None, None, None)
    }

    #[test]
    fn voice_is_required() {
        let err = provider().map_request(&TtsRequest::new("hi")).unwrap_err();
        assert!(matches!(err, TtsError::InvalidRequest(_)));
    }

    #[test]
    fn default_voice_fills_in() {
        let p = ElevenLabs::with_config("key", None, Some("rachel".into()), None);
        let mapped = p.map_request(&TtsRequest::new("hi")).unwrap();
        assert_eq!(mapped.voice_id, "rachel");
    }

    #[test]
    fn rate_clamps_to_vendor_range() {
        let mut request = TtsRequest::new("hi");
        request.voice = Some("v".into());
        request.rate = Some(10.0);
        let mapped = provider().map_request(&request).unwrap();
        assert_eq!(mapped.body["voice_settings"]["speed"], json!(4.0));

        request.rate = Some(0.1);
        let mapped = provider().map_request(&request).unwrap();
        assert_eq!(mapped.body["voice_settings"]["speed"], json!(0.25));
    }

    #[test]
    fn format_and_sample_rate_map_to_output_format() {
        let mut request = TtsRequest::new("hi");
        request.voice = Some("v".into());
        request.format = Some(AudioFormat::Pcm);
        request.sample_rate = Some(24000);
        let mapped = provider().map_request(&request).unwrap();
        assert_eq!(mapped.output_format.as_deref(), Some("pcm_24000"));

        request.format = Some(AudioFormat::Mp3);
        request.sample_rate = None;
        let mapped = provider().map_request(&request).unwrap();
        assert_eq!(mapped.output_format.as_deref(), Some("mp3_44100_128"));

        request.format = Some(AudioFormat::Wav);
        let mapped = provider().map_request(&request).unwrap();
        assert_eq!(mapped.output_format, None);
    }

    #[test]
    fn extra_deep_merges_voice_settings() {
        let mut request = TtsRequest::new("hi");
        request.voice = Some("v".into());
        request.rate = Some(1.5);
        request.extra = Some(
            json!({"voice_settings": {"stability": 0.4}, "seed": 7})
                .as_object()
                .unwrap()
                .clone(),
        );
        let mapped = provider().map_request(&request).unwrap();
        assert_eq!(mapped.body["voice_settings"]["speed"], json!(1.5));
        assert_eq!(mapped.body["voice_settings"]["stability"], json!(0.4));
        assert_eq!(mapped.body["seed"], json!(7));
    }

    #[test]
    fn ws_frames_follow_the_stream_input_protocol() {
        let mut outbound = Outbound;
        let first: Value = serde_json::from_str(&outbound.text_frame("Hello.", true)).unwrap();
        assert_eq!(first["text"], json!("Hello."));
        assert_eq!(first["try_trigger_generation"], json!(true));

        let finish: Value = serde_json::from_str(&outbound.finish_frame().unwrap()).unwrap();
        assert_eq!(finish["text"], json!(""));
    }

    #[test]
    fn decode_final_frame_terminates() {
        let mut inbound = Inbound {
            ids: IdGenerator::default(),
        };
        let frame = InboundFrame::Text(json!({"audio": "QUJD", "isFinal": true}).to_string());
        match inbound.decode(frame).unwrap() {
            Decoded::Final(chunk) => {
                assert_eq!(chunk.data, "QUJD");
                assert!(chunk.is_final);
            }
            other => panic!("expected final chunk, got {other:?}"),
        }
    }

    #[test]
    fn builder_requires_api_key() {
        let err = TtsBuilder::<ElevenLabs>::new().build().unwrap_err();
        assert!(err.to_string().contains("No API key provided"));
    }
}
