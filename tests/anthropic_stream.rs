mod common;

use common::MemoryTransport;
use futures_util::StreamExt;
use llm_relay::LLMProvider;
use llm_relay::config::{Credential, ModelConfig, ProviderKind, build_client_from_configs};
use llm_relay::error::LLMError;
use llm_relay::http::DynHttpTransport;
use llm_relay::provider::AnthropicProvider;
use serde_json::json;

const MESSAGE_STREAM: &str = concat!(
    "event: message_start\n",
    "data: {\"type\":\"message_start\",\"message\":{\"id\":\"msg_01\",\"type\":\"message\",\"role\":\"assistant\",\"content\":[],\"model\":\"claude-3-5-haiku-latest\"}}\n\n",
    "event: content_block_start\n",
    "data: {\"type\":\"content_block_start\",\"index\":0,\"content_block\":{\"type\":\"text\",\"text\":\"\"}}\n\n",
    "event: ping\n",
    "data: {\"type\": \"ping\"}\n\n",
    "event: content_block_delta\n",
    "data: {\"type\":\"content_block_delta\",\"index\":0,\"delta\":{\"type\":\"text_delta\",\"text\":\"Bonjour\"}}\n\n",
    "event: content_block_delta\n",
    "data: {broken json\n\n",
    "event: content_block_delta\n",
    "data: {\"type\":\"content_block_delta\",\"index\":0,\"delta\":{\"type\":\"text_delta\",\"text\":\" \u{00e0} tous\"}}\n\n",
    "event: content_block_stop\n",
    "data: {\"type\":\"content_block_stop\",\"index\":0}\n\n",
    "event: message_delta\n",
    "data: {\"type\":\"message_delta\",\"delta\":{\"stop_reason\":\"end_turn\"},\"usage\":{\"output_tokens\":4}}\n\n",
    "event: message_stop\n",
    "data: {\"type\":\"message_stop\"}\n\n",
    "event: content_block_delta\n",
    "data: {\"type\":\"content_block_delta\",\"index\":0,\"delta\":{\"type\":\"text_delta\",\"text\":\"late\"}}\n\n",
);

fn provider(transport: DynHttpTransport) -> AnthropicProvider {
    AnthropicProvider::new(transport, "sk-ant-test")
        .with_base_url("https://anthropic.test")
        .with_default_model("claude-3-5-haiku-latest")
}

async fn collect_text(chunk_size: usize) -> Vec<String> {
    let transport = MemoryTransport::chunked(200, MESSAGE_STREAM.as_bytes(), chunk_size);
    let stream = provider(transport)
        .stream_chat(json!({
            "max_tokens": 256,
            "messages": [{ "role": "user", "content": "Salue tout le monde" }]
        }))
        .await
        .expect("stream opens");
    stream
        .map(|chunk| {
            let chunk = chunk.expect("chunk");
            assert_eq!(chunk.object, "chat.completion.chunk");
            assert_eq!(chunk.model, "claude-3-5-haiku-latest");
            let choice = &chunk.choices[0];
            assert_eq!(choice.index, 0);
            assert_eq!(choice.delta.role.as_deref(), Some("assistant"));
            assert!(choice.delta.refusal.is_none());
            choice.delta.content.clone().unwrap_or_default()
        })
        .collect()
        .await
}

#[tokio::test]
async fn text_deltas_become_openai_chunks_for_any_chunking() {
    let expected = vec!["Bonjour".to_string(), " \u{00e0} tous".to_string()];
    for size in [1, 2, 3, 4, 11, 100, MESSAGE_STREAM.len()] {
        assert_eq!(collect_text(size).await, expected, "chunk size {size}");
    }
}

#[tokio::test]
async fn stream_request_uses_anthropic_headers_and_drops_system_messages() {
    let transport = MemoryTransport::new(200, vec![b"event: message_stop\ndata: {}\n\n".to_vec()]);
    let provider = provider(transport.clone()).with_beta("prompt-caching-2024-07-31");

    let mut stream = provider
        .stream_chat(json!({
            "max_tokens": 64,
            "messages": [
                { "role": "system", "content": "You are terse." },
                { "role": "user", "content": "hi" }
            ]
        }))
        .await
        .expect("stream opens");
    assert!(stream.next().await.is_none());

    let request = transport.last_request();
    assert_eq!(request.url, "https://anthropic.test/v1/messages");
    assert_eq!(request.headers["x-api-key"], "sk-ant-test");
    assert_eq!(request.headers["anthropic-version"], "2023-06-01");
    assert_eq!(request.headers["anthropic-beta"], "prompt-caching-2024-07-31");
    assert_eq!(
        transport.last_body(),
        json!({
            "max_tokens": 64,
            "messages": [{ "role": "user", "content": "hi" }],
            "model": "claude-3-5-haiku-latest",
            "stream": true
        })
    );
}

#[tokio::test]
async fn chat_maps_tool_use_to_tool_calls() {
    let body = json!({
        "id": "msg_02",
        "type": "message",
        "role": "assistant",
        "model": "claude-3-5-sonnet-latest",
        "content": [
            { "type": "text", "text": "Checking the weather." },
            { "type": "tool_use", "id": "toolu_1", "name": "get_weather", "input": { "city": "Paris" } }
        ],
        "stop_reason": "tool_use",
        "usage": { "input_tokens": 30, "output_tokens": 12 }
    });
    let transport = MemoryTransport::new(200, vec![serde_json::to_vec(&body).unwrap()]);

    let completion = provider(transport)
        .chat(json!({ "max_tokens": 128, "messages": [{ "role": "user", "content": "Weather?" }] }))
        .await
        .expect("chat");

    assert_eq!(completion.id, "msg_02");
    assert_eq!(completion.object, "chat.completion");
    let choice = &completion.choices[0];
    assert_eq!(choice.finish_reason.as_deref(), Some("tool_use"));
    assert_eq!(choice.message.content.as_deref(), Some("Checking the weather."));
    let calls = choice.message.tool_calls.as_ref().expect("tool calls");
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].id, "toolu_1");
    assert_eq!(calls[0].kind, "function");
    assert_eq!(calls[0].function.name, "get_weather");
    assert_eq!(calls[0].function.arguments, r#"{"city":"Paris"}"#);

    let usage = completion.usage.as_ref().expect("usage");
    assert_eq!(
        (usage.prompt_tokens, usage.completion_tokens, usage.total_tokens),
        (30, 12, 42)
    );
}

#[tokio::test]
async fn overloaded_error_surfaces_before_streaming() {
    let body = br#"{"type":"error","error":{"type":"overloaded_error","message":"Overloaded"}}"#;
    let transport = MemoryTransport::new(529, vec![body.to_vec()]);

    let result = provider(transport)
        .stream_chat(json!({ "max_tokens": 16, "messages": [] }))
        .await;
    match result {
        Err(LLMError::Api {
            provider,
            status,
            message,
            kind,
            ..
        }) => {
            assert_eq!(provider, "anthropic");
            assert_eq!(status, 529);
            assert_eq!(message, "Overloaded");
            assert_eq!(kind.as_deref(), Some("overloaded_error"));
        }
        Err(other) => panic!("unexpected error: {other:?}"),
        Ok(_) => panic!("expected an error"),
    }
}

#[tokio::test]
async fn invalid_key_maps_to_auth_error() {
    let body =
        br#"{"type":"error","error":{"type":"authentication_error","message":"invalid x-api-key"}}"#;
    let transport = MemoryTransport::new(401, vec![body.to_vec()]);
    let err = provider(transport)
        .chat(json!({ "max_tokens": 16, "messages": [] }))
        .await
        .unwrap_err();
    assert!(matches!(err, LLMError::Auth { message } if message == "invalid x-api-key"));
}

#[tokio::test]
async fn bearer_credential_sends_authorization_instead_of_api_key() {
    let transport = MemoryTransport::new(200, vec![b"event: message_stop\ndata: {}\n\n".to_vec()]);
    let config: ModelConfig = serde_json::from_value(json!({
        "handle": "claude",
        "provider": "anthropic",
        "credential": { "type": "bearer", "token": "oauth-abc" },
        "base_url": "https://gateway.test",
        "default_model": "claude-3-5-haiku-latest",
        "headers": { "X-Gateway-Route": "claude" }
    }))
    .expect("config");
    assert!(matches!(config.credential, Credential::Bearer { .. }));
    assert_eq!(config.provider, ProviderKind::Anthropic);

    let client = build_client_from_configs(&[config], transport.clone()).expect("client");
    let mut stream = client
        .stream_chat("claude", json!({ "max_tokens": 8, "messages": [] }))
        .await
        .expect("stream opens");
    assert!(stream.next().await.is_none());

    let headers = transport.last_request().headers;
    assert_eq!(headers["Authorization"], "Bearer oauth-abc");
    assert!(!headers.keys().any(|name| name.eq_ignore_ascii_case("x-api-key")));
    assert_eq!(headers["anthropic-version"], "2023-06-01");
    assert_eq!(headers["X-Gateway-Route"], "claude");
}
