//! Integration tests for the OpenAI-compatible provider against a mock server.

#![cfg(feature = "openai")]

use futures::StreamExt;
use serde_json::json;
use studyforge_inference::openai::{OpenAIBackend, OpenAIConfig};
use studyforge_inference::{
    AudioSource, CompletionProvider, CompletionRequest, ContentPart, Error, PricingTable,
    StreamEvent, TokenUsage,
};
use wiremock::matchers::{body_partial_json, body_string_contains, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn backend_for(server: &MockServer) -> OpenAIBackend {
    let config = OpenAIConfig {
        base_url: server.uri(),
        api_key: Some("test-key".to_string()),
        chat_model: "gpt-4o-mini".to_string(),
        embed_model: "text-embedding-3-small".to_string(),
        transcribe_model: "whisper-1".to_string(),
        timeout_seconds: 10,
        ..OpenAIConfig::default()
    };
    OpenAIBackend::new(config, PricingTable::new()).expect("Failed to create backend")
}

#[tokio::test]
async fn test_complete_sends_auth_and_prices_usage() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .and(header("Authorization", "Bearer test-key"))
        .and(body_partial_json(json!({
            "model": "gpt-4o-mini",
            "stream": false,
            "response_format": {"type": "json_object"}
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "chatcmpl-1",
            "model": "gpt-4o-mini-2024-07-18",
            "choices": [{
                "index": 0,
                "message": {"role": "assistant", "content": "{\"ok\":true}"},
                "finish_reason": "stop"
            }],
            "usage": {"prompt_tokens": 2000, "completion_tokens": 1000, "total_tokens": 3000}
        })))
        .expect(1)
        .mount(&server)
        .await;

    let backend = backend_for(&server);
    let completion = backend
        .complete(CompletionRequest::new().system("Reply in JSON").user("hi").json())
        .await
        .unwrap();

    assert_eq!(completion.message, "{\"ok\":true}");
    assert_eq!(completion.model, "gpt-4o-mini-2024-07-18");
    assert_eq!(completion.usage, Some(TokenUsage::new(2000, 1000)));
    assert!((completion.input_cost_usd - 0.0003).abs() < 1e-12);
    assert!((completion.output_cost_usd - 0.0006).abs() < 1e-12);
}

#[tokio::test]
async fn test_openrouter_headers_sent_in_request() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .and(header("HTTP-Referer", "https://studyforge.app"))
        .and(header("X-Title", "StudyForge"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "choices": [{"message": {"content": "ok"}}]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let config = OpenAIConfig {
        base_url: server.uri(),
        http_referer: Some("https://studyforge.app".to_string()),
        x_title: Some("StudyForge".to_string()),
        ..OpenAIConfig::default()
    };
    let backend = OpenAIBackend::new(config, PricingTable::new()).unwrap();
    let completion = backend
        .complete(CompletionRequest::new().user("hi"))
        .await
        .unwrap();

    // No usage reported: model falls back to the requested one, cost is zero.
    assert_eq!(completion.model, backend.config().chat_model);
    assert!(completion.usage.is_none());
    assert_eq!(completion.input_cost_usd, 0.0);
}

#[tokio::test]
async fn test_image_parts_sent_as_content_array() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .and(body_partial_json(json!({
            "messages": [{
                "role": "user",
                "content": [
                    {"type": "text", "text": "Grade this"},
                    {"type": "image_url", "image_url": {"url": "data:image/png;base64,AAAA"}}
                ]
            }]
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "choices": [{"message": {"content": "graded"}}]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let backend = backend_for(&server);
    let completion = backend
        .complete(CompletionRequest::new().user_parts(vec![
            ContentPart::text("Grade this"),
            ContentPart::inline_image("image/png", "AAAA"),
        ]))
        .await
        .unwrap();
    assert_eq!(completion.message, "graded");
}

#[tokio::test]
async fn test_stream_yields_deltas_and_final_usage() {
    let server = MockServer::start().await;

    let sse = concat!(
        "data: {\"model\":\"gpt-4o-mini\",\"choices\":[{\"delta\":{\"content\":\"Photo\"}}]}\n\n",
        "data: {\"choices\":[{\"delta\":{\"content\":\"synthesis\"}}]}\n\n",
        "data: {\"choices\":[],\"usage\":{\"prompt_tokens\":10,\"completion_tokens\":2,\"total_tokens\":12}}\n\n",
        "data: [DONE]\n\n",
    );

    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .and(body_partial_json(json!({
            "stream": true,
            "stream_options": {"include_usage": true}
        })))
        .respond_with(ResponseTemplate::new(200).set_body_raw(sse, "text/event-stream"))
        .expect(1)
        .mount(&server)
        .await;

    let backend = backend_for(&server);
    let events: Vec<_> = backend
        .complete_stream(CompletionRequest::new().user("Explain"))
        .await
        .unwrap()
        .collect()
        .await;

    let deltas: Vec<String> = events
        .iter()
        .filter_map(|e| match e {
            Ok(StreamEvent::Delta(d)) => Some(d.clone()),
            _ => None,
        })
        .collect();
    assert_eq!(deltas, vec!["Photo", "synthesis"]);

    match events.last() {
        Some(Ok(StreamEvent::Done(c))) => {
            assert_eq!(c.message, "Photosynthesis");
            assert_eq!(c.usage, Some(TokenUsage::new(10, 2)));
            assert!(c.input_cost_usd > 0.0);
        }
        other => panic!("expected Done, got {other:?}"),
    }
}

#[tokio::test]
async fn test_embeddings_returned_in_input_order() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/embeddings"))
        .and(body_partial_json(json!({"input": ["first", "second"]})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": [
                {"embedding": [0.0, 1.0], "index": 1},
                {"embedding": [1.0, 0.0], "index": 0}
            ],
            "model": "text-embedding-3-small",
            "usage": {"prompt_tokens": 1000, "total_tokens": 1000}
        })))
        .expect(1)
        .mount(&server)
        .await;

    let backend = backend_for(&server);
    let result = backend
        .embed(&["first".to_string(), "second".to_string()])
        .await
        .unwrap();

    assert_eq!(result.vectors, vec![vec![1.0, 0.0], vec![0.0, 1.0]]);
    assert_eq!(result.usage, Some(TokenUsage::new(1000, 0)));
    assert!((result.input_cost_usd - 0.000_02).abs() < 1e-12);
}

#[tokio::test]
async fn test_embed_empty_input_makes_no_request() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/embeddings"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let backend = backend_for(&server);
    let err = backend.embed(&[]).await.unwrap_err();
    assert!(matches!(err, Error::InvalidInput(_)));
}

#[tokio::test]
async fn test_auth_error_maps_to_config() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(401).set_body_json(json!({
            "error": {"message": "Incorrect API key provided", "type": "invalid_request_error", "code": "invalid_api_key"}
        })))
        .mount(&server)
        .await;

    let backend = backend_for(&server);
    let err = backend
        .complete(CompletionRequest::new().user("hi"))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Config(ref m) if m.contains("Incorrect API key")));
}

#[tokio::test]
async fn test_rate_limit_maps_to_operation_error() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/embeddings"))
        .respond_with(ResponseTemplate::new(429).set_body_string("slow down"))
        .mount(&server)
        .await;

    let backend = backend_for(&server);
    let err = backend.embed(&["x".to_string()]).await.unwrap_err();
    assert!(matches!(err, Error::Embedding(ref m) if m.contains("Rate limit exceeded")));
}

#[tokio::test]
async fn test_transcribe_inline_audio_multipart() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/audio/transcriptions"))
        .and(body_string_contains("name=\"model\""))
        .and(body_string_contains("whisper-1"))
        .and(body_string_contains("verbose_json"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "text": " The mitochondria is the powerhouse of the cell. ",
            "language": "english",
            "duration": 4.5
        })))
        .expect(1)
        .mount(&server)
        .await;

    let backend = backend_for(&server);
    let transcript = backend
        .transcribe(&AudioSource::Inline {
            data_base64: "AAECAwQF".to_string(),
            mime_type: "audio/mpeg".to_string(),
            filename: Some("lecture.mp3".to_string()),
        })
        .await
        .unwrap();

    assert_eq!(transcript.text, "The mitochondria is the powerhouse of the cell.");
    assert_eq!(transcript.duration_secs, Some(4.5));
    assert_eq!(transcript.audio_bytes, 6);
    assert_eq!(transcript.model, "whisper-1");
}

#[tokio::test]
async fn test_transcribe_remote_audio_downloads_first() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/files/lecture.m4a"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-type", "audio/mp4")
                .set_body_bytes(vec![7u8; 32]),
        )
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("POST"))
        .and(path("/audio/transcriptions"))
        .and(body_string_contains("lecture.m4a"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"text": "hello"})))
        .expect(1)
        .mount(&server)
        .await;

    let backend = backend_for(&server);
    let transcript = backend
        .transcribe(&AudioSource::Remote {
            url: format!("{}/files/lecture.m4a", server.uri()),
        })
        .await
        .unwrap();

    assert_eq!(transcript.text, "hello");
    assert_eq!(transcript.audio_bytes, 32);
    assert!(transcript.duration_secs.is_none());
}

#[tokio::test]
async fn test_transcribe_server_error_maps_to_transcription() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/audio/transcriptions"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let backend = backend_for(&server);
    let err = backend
        .transcribe(&AudioSource::Inline {
            data_base64: "AAEC".to_string(),
            mime_type: "audio/wav".to_string(),
            filename: None,
        })
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Transcription(ref m) if m.contains("Server error")));
}
