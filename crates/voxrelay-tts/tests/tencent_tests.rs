#![allow(unused_imports)]
use voxrelay_tts::{TtsBuilder, TtsError, TtsOptions, TtsRequest};

#[cfg(feature = "tencent")]
mod tencent_tests {
    use super::*;
    use base64::Engine as _;
    use base64::engine::general_purpose::STANDARD as BASE64;
    use httpmock::prelude::*;
    use serde_json::json;
    use voxrelay_tts::backends::tencent::Tencent;
    use voxrelay_tts::provider::TtsProvider;

    fn provider_for(server: &MockServer) -> std::sync::Arc<Tencent> {
        TtsBuilder::<Tencent>::new()
            .app_id("1300000000")
            .secret_id("secret-id")
            .secret_key("secret-key")
            .base_url(server.base_url())
            .build()
            .expect("Failed to build Tencent client")
    }

    #[test]
    fn test_tencent_builds() {
        let client = TtsBuilder::<Tencent>::new()
            .app_id("1300000000")
            .secret_id("secret-id")
            .secret_key("secret-key")
            .build()
            .expect("Failed to build Tencent client");
        assert_eq!(client.app_id, "1300000000");
        assert_eq!(client.secret_id, "secret-id");
    }

    #[tokio::test]
    async fn synthesize_accumulates_audio_bytes() {
        let server = MockServer::start_async().await;
        // Binary-looking body: the first chunk fails to parse as JSON, so it
        // is treated as audio.
        let audio: &[u8] = b"\xffID3-not-json-audio-payload";
        let mock = server
            .mock_async(move |when, then| {
                when.method(POST).path("/stream");
                then.status(200).body(audio);
            })
            .await;

        let result = provider_for(&server)
            .synthesize(TtsRequest::new("你好。"), TtsOptions::default())
            .await
            .unwrap();

        mock.assert_async().await;
        assert_eq!(result.data, BASE64.encode(audio));
        assert!(result.is_final);
        assert!(!result.id.is_empty());
    }

    #[tokio::test]
    async fn synthesize_surfaces_error_documents() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/stream");
                then.status(200).json_body(json!({
                    "Response": {
                        "Error": {"Code": "AuthFailure.SignatureFailure", "Message": "signature mismatch"},
                        "RequestId": "r1",
                    }
                }));
            })
            .await;

        let err = provider_for(&server)
            .synthesize(TtsRequest::new("你好。"), TtsOptions::default())
            .await
            .unwrap_err();
        match err {
            TtsError::Vendor { message, .. } => {
                assert!(message.contains("AuthFailure.SignatureFailure"));
                assert!(message.contains("signature mismatch"));
            }
            other => panic!("expected vendor error, got {other}"),
        }
    }

    #[tokio::test]
    async fn empty_body_is_a_format_error() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/stream");
                then.status(200).body("");
            })
            .await;

        let err = provider_for(&server)
            .synthesize(TtsRequest::new("你好。"), TtsOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, TtsError::ResponseFormat(_)));
    }

    #[tokio::test]
    async fn http_error_maps_to_vendor_error() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/stream");
                then.status(500).body("internal error");
            })
            .await;

        let err = provider_for(&server)
            .synthesize(TtsRequest::new("你好。"), TtsOptions::default())
            .await
            .unwrap_err();
        match err {
            TtsError::Vendor { code, .. } => assert_eq!(code, 500),
            other => panic!("expected vendor error, got {other}"),
        }
    }
}
