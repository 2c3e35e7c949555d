//! HTTP collaborator tests
//!
//! Token and memory clients against a mock service

use secrecy::ExposeSecret as _;
use serde_json::json;
use wiremock::matchers::{body_json, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use sous_live::{Error, HttpMemoryStore, HttpTokenProvider, MemoryStore, TokenProvider};

fn record(content: &str, favourite: bool) -> serde_json::Value {
    json!({
        "id": "m-1",
        "content": content,
        "category": "recipe",
        "createdAt": "2026-01-02T03:04:05Z",
        "favourite": favourite,
    })
}

#[tokio::test]
async fn test_token_provider_reads_overrides() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "token": "ephemeral",
            "model": "models/custom",
            "systemInstruction": "be brief",
        })))
        .expect(1)
        .mount(&server)
        .await;

    let provider = HttpTokenProvider::new(format!("{}/token", server.uri()));
    let token = provider.fetch().await.unwrap();

    assert_eq!(token.token.expose_secret(), "ephemeral");
    assert_eq!(token.model.as_deref(), Some("models/custom"));
    assert_eq!(token.system_instruction.as_deref(), Some("be brief"));
}

#[tokio::test]
async fn test_token_provider_reports_status() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/token"))
        .respond_with(ResponseTemplate::new(401).set_body_string("unauthorized"))
        .mount(&server)
        .await;

    let provider = HttpTokenProvider::new(format!("{}/token", server.uri()));
    let err = provider.fetch().await.unwrap_err();

    match err {
        Error::Token(message) => {
            assert!(message.contains("401"), "{message}");
            assert!(message.contains("unauthorized"), "{message}");
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn test_token_provider_rejects_empty_token() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "token": "" })))
        .mount(&server)
        .await;

    let provider = HttpTokenProvider::new(server.uri());
    assert!(matches!(provider.fetch().await, Err(Error::Token(_))));
}

#[tokio::test]
async fn test_memory_search_sends_query_and_limit() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/memories/search"))
        .and(query_param("q", "basil"))
        .and(query_param("limit", "3"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!([record("likes basil", false)])),
        )
        .expect(1)
        .mount(&server)
        .await;

    // Trailing slash on the base URL is tolerated
    let store = HttpMemoryStore::new(format!("{}/", server.uri()));
    let results = store.search("basil", 3).await.unwrap();

    assert_eq!(results.len(), 1);
    assert_eq!(results[0].content, "likes basil");
}

#[tokio::test]
async fn test_memory_favourites() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/memories/favourites"))
        .and(query_param("limit", "5"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            record("shakshuka", true),
            record("ramen", true),
        ])))
        .mount(&server)
        .await;

    let store = HttpMemoryStore::new(server.uri());
    let favourites = store.list_favourites(5).await.unwrap();

    assert_eq!(favourites.len(), 2);
    assert!(favourites.iter().all(|r| r.favourite));
}

#[tokio::test]
async fn test_memory_save_posts_body() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/memories"))
        .and(body_json(json!({ "content": "no cilantro", "category": "preference" })))
        .respond_with(ResponseTemplate::new(201).set_body_json(record("no cilantro", false)))
        .expect(1)
        .mount(&server)
        .await;

    let store = HttpMemoryStore::new(server.uri());
    let saved = store.add_memory("no cilantro", "preference").await.unwrap();
    assert_eq!(saved.content, "no cilantro");
}

#[tokio::test]
async fn test_memory_service_error_is_a_tool_error() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(503).set_body_string("overloaded"))
        .mount(&server)
        .await;

    let store = HttpMemoryStore::new(server.uri());
    let err = store.search("anything", 5).await.unwrap_err();

    match err {
        Error::Tool(message) => assert!(message.contains("503"), "{message}"),
        other => panic!("unexpected error: {other}"),
    }
}
