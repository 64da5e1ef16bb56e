//! Wire-level tests for the OpenAI-compatible provider clients.

use std::time::Duration;

use httpmock::prelude::*;
use serde_json::json;

use callsift::embeddings::{EmbeddingProvider, OpenAiEmbeddings};
use callsift::llm::{ChatMessage, CompletionProvider, OpenAiCompletion};

#[tokio::test]
async fn completion_client_sends_auth_and_trims_the_reply() {
    let server = MockServer::start_async().await;
    let mock = server
        .mock_async(|when, then| {
            when.method(POST)
                .path("/chat/completions")
                .header("authorization", "Bearer test-key")
                .header("content-type", "application/json");
            then.status(200).json_body(json!({
                "choices": [
                    { "message": { "role": "assistant", "content": "  The order number is 12345.  " } }
                ]
            }));
        })
        .await;

    let provider = OpenAiCompletion::new(
        "test-key",
        &server.base_url(),
        "gpt-4o",
        Duration::from_secs(5),
    )
    .unwrap();

    let messages = [
        ChatMessage::system("extract things"),
        ChatMessage::user("What is the order number?"),
    ];
    let reply = provider.complete(&messages, 0.0, 100).await.unwrap();

    assert_eq!(reply, "The order number is 12345.");
    mock.assert_async().await;
}

#[tokio::test]
async fn completion_client_reports_provider_errors() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(POST).path("/chat/completions");
            then.status(500).body("upstream exploded");
        })
        .await;

    let provider = OpenAiCompletion::new(
        "test-key",
        &server.base_url(),
        "gpt-4o",
        Duration::from_secs(5),
    )
    .unwrap();

    let messages = [ChatMessage::user("hello")];
    let outcome = provider.complete(&messages, 0.0, 100).await;
    assert!(outcome.is_err());
}

#[tokio::test]
async fn embeddings_client_restores_input_order() {
    let server = MockServer::start_async().await;
    // Rows arrive out of order; `index` must restore input order.
    let mock = server
        .mock_async(|when, then| {
            when.method(POST).path("/embeddings");
            then.status(200).json_body(json!({
                "data": [
                    { "index": 1, "embedding": [0.0, 1.0] },
                    { "index": 0, "embedding": [1.0, 0.0] }
                ]
            }));
        })
        .await;

    let provider = OpenAiEmbeddings::new(
        "test-key",
        &server.base_url(),
        "text-embedding-3-small",
        Duration::from_secs(5),
    )
    .unwrap();

    let vectors = provider
        .embed(&["first".to_string(), "second".to_string()])
        .await
        .unwrap();

    assert_eq!(vectors, vec![vec![1.0, 0.0], vec![0.0, 1.0]]);
    mock.assert_async().await;
}

#[tokio::test]
async fn embeddings_client_rejects_a_count_mismatch() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(POST).path("/embeddings");
            then.status(200).json_body(json!({
                "data": [ { "index": 0, "embedding": [0.5] } ]
            }));
        })
        .await;

    let provider = OpenAiEmbeddings::new(
        "test-key",
        &server.base_url(),
        "text-embedding-3-small",
        Duration::from_secs(5),
    )
    .unwrap();

    let outcome = provider
        .embed(&["a".to_string(), "b".to_string()])
        .await;
    assert!(outcome.is_err());
}
