//! HTTP-level tests for the relay server. Each test gets its own transcript
//! file and router; chat providers are scripted in-process.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{ Request, StatusCode };
use serde_json::{ json, Value };
use tempfile::TempDir;
use tower::ServiceExt;

use datanexus_relay::cli::Args;
use datanexus_relay::error::ProviderError;
use datanexus_relay::history::{ FileHistoryStore, HistoryStore };
use datanexus_relay::llm::chat::{ ChatClient, FragmentStream, ProviderRegistry };
use datanexus_relay::llm::ProviderType;
use datanexus_relay::models::chat::{ ChatTurn, Role };
use datanexus_relay::relay::{ ChatRelay, NO_CONTENT_PLACEHOLDER };
use datanexus_relay::server::{ create_router, AppState };

// =============================================================================
// Helpers
// =============================================================================

/// Answers every message with fixed fragments, or fails before the first one.
struct FixedClient {
    provider: ProviderType,
    fragments: Option<Vec<&'static str>>,
}

#[async_trait]
impl ChatClient for FixedClient {
    async fn complete(&self, _message: &str, _prior: &[ChatTurn]) -> Result<String, ProviderError> {
        match &self.fragments {
            Some(parts) => Ok(parts.concat()),
            None => Err(ProviderError::Upstream { status: 503, body: "overloaded".into() }),
        }
    }

    async fn complete_stream(
        &self,
        _message: &str,
        _prior: &[ChatTurn]
    ) -> Result<FragmentStream, ProviderError> {
        match &self.fragments {
            Some(parts) => {
                let items: Vec<Result<String, ProviderError>> = parts
                    .iter()
                    .map(|p| Ok(p.to_string()))
                    .collect();
                Ok(Box::pin(futures::stream::iter(items)))
            }
            None => Err(ProviderError::Upstream { status: 503, body: "overloaded".into() }),
        }
    }

    fn provider(&self) -> ProviderType {
        self.provider
    }

    fn model(&self) -> String {
        "fixed".into()
    }
}

struct TestApp {
    _dir: TempDir,
    history_path: PathBuf,
    router: axum::Router,
}

impl TestApp {
    fn new(registry: ProviderRegistry) -> Self {
        Self::configured(registry, |_| {})
    }

    /// Like `new`, with `configure` applied to the settings last.
    fn configured(registry: ProviderRegistry, configure: impl FnOnce(&mut Args)) -> Self {
        let dir = TempDir::new().unwrap();
        let history_path = dir.path().join("chat_history.json");
        let store: Arc<dyn HistoryStore> = Arc::new(FileHistoryStore::new(history_path.clone()));
        let relay = Arc::new(ChatRelay::new(store, registry, ProviderType::Gemini, 20));

        let mut args = Args::defaults();
        args.chat_rate_limit = 1000;
        args.openweathermap_api_key = None;
        args.pinecone_api_key = None;
        args.assistant_name = None;
        args.pinecone_index_host = None;
        configure(&mut args);
        let state = AppState::new(relay, &args).unwrap();

        Self { _dir: dir, history_path, router: create_router(state, None) }
    }

    fn answering(fragments: Vec<&'static str>) -> Self {
        Self::new(
            ProviderRegistry::new().with(
                Arc::new(FixedClient { provider: ProviderType::Gemini, fragments: Some(fragments) })
            )
        )
    }

    fn failing() -> Self {
        Self::new(
            ProviderRegistry::new().with(
                Arc::new(FixedClient { provider: ProviderType::Gemini, fragments: None })
            )
        )
    }

    async fn send(&self, req: Request<Body>) -> (StatusCode, Vec<u8>) {
        let resp = self.router.clone().oneshot(req).await.unwrap();
        let status = resp.status();
        let bytes = axum::body::to_bytes(resp.into_body(), 1024 * 1024).await.unwrap().to_vec();
        (status, bytes)
    }

    async fn send_chat(&self, body: Value) -> (StatusCode, String) {
        let (status, bytes) = self.send(post_json("/api/ai/chat/send", &body)).await;
        (status, String::from_utf8(bytes).unwrap())
    }

    async fn history(&self) -> Vec<Value> {
        let (status, bytes) = self.send(get("/api/ai/chat/history")).await;
        assert_eq!(status, StatusCode::OK);
        serde_json::from_slice(&bytes).unwrap()
    }

    async fn stored_turns(&self) -> Vec<ChatTurn> {
        FileHistoryStore::new(self.history_path.clone()).load().await.unwrap()
    }
}

fn get(uri: &str) -> Request<Body> {
    Request::get(uri).body(Body::empty()).unwrap()
}

fn post_json(uri: &str, json: &Value) -> Request<Body> {
    Request::post(uri)
        .header("content-type", "application/json")
        .body(Body::from(json.to_string()))
        .unwrap()
}

/// Serves `router` on an ephemeral loopback port and returns its base URL.
async fn spawn_upstream(router: axum::Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    format!("http://{}", addr)
}

/// An app whose Pinecone assistant and wiki index both live at `host`.
fn with_pinecone(host: &str) -> TestApp {
    let host = host.to_string();
    TestApp::configured(ProviderRegistry::new(), move |args| {
        args.pinecone_api_key = Some("pc-key".into());
        args.assistant_name = Some("helper".into());
        args.pinecone_assistant_host = Some(host.clone());
        args.pinecone_index_host = Some(host);
    })
}

fn sender_and_text(messages: &[Value]) -> Vec<(String, String)> {
    messages
        .iter()
        .map(|m| (m["sender"].as_str().unwrap().to_string(), m["text"].as_str().unwrap().to_string()))
        .collect()
}

// =============================================================================
// Chat
// =============================================================================

#[tokio::test]
async fn ping_pong_round_trip_shows_up_in_history() {
    let app = TestApp::answering(vec!["po", "ng"]);

    let (status, body) = app.send_chat(json!({ "message": "ping", "provider": "gemini" })).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, "pong");

    let history = app.history().await;
    assert_eq!(
        sender_and_text(&history),
        vec![("user".to_string(), "ping".to_string()), ("ai".to_string(), "pong".to_string())]
    );
    assert!(history[0]["id"].as_str().unwrap().starts_with("hist-0-user-"));
    assert!(history[0].get("isStreaming").is_none());
}

#[tokio::test]
async fn send_chat_streams_plain_text() {
    let app = TestApp::answering(vec!["hello"]);
    let resp = app
        .router
        .clone()
        .oneshot(post_json("/api/ai/chat/send", &json!({ "message": "hi" })))
        .await
        .unwrap();

    assert_eq!(resp.status(), StatusCode::OK);
    let content_type = resp.headers().get("content-type").unwrap().to_str().unwrap();
    assert!(content_type.starts_with("text/plain"));
}

#[tokio::test]
async fn legacy_api_field_selects_provider() {
    let app = TestApp::new(
        ProviderRegistry::new().with(
            Arc::new(FixedClient {
                provider: ProviderType::OpenRouter,
                fragments: Some(vec!["from openrouter"]),
            })
        )
    );

    let (status, body) = app.send_chat(json!({ "message": "hi", "api": "openrouter" })).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, "from openrouter");
}

#[tokio::test]
async fn empty_message_is_rejected_without_side_effects() {
    let app = TestApp::answering(vec!["unused"]);

    let (status, body) = app.send_chat(json!({ "message": "" })).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    let err: Value = serde_json::from_str(&body).unwrap();
    assert_eq!(err["error"], "bad_request");
    assert_eq!(err["message"], "Missing message for AI chat.");

    assert!(app.history().await.is_empty());
    assert!(!app.history_path.exists());
}

#[tokio::test]
async fn whitespace_message_is_relayed_and_recorded() {
    let app = TestApp::answering(vec!["ok"]);

    let (status, body) = app.send_chat(json!({ "message": "   " })).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, "ok");

    let history = app.history().await;
    assert_eq!(
        sender_and_text(&history),
        vec![("user".to_string(), "   ".to_string()), ("ai".to_string(), "ok".to_string())]
    );
}

#[tokio::test]
async fn provider_field_wins_when_api_is_also_sent() {
    let app = TestApp::new(
        ProviderRegistry::new()
            .with(Arc::new(FixedClient { provider: ProviderType::Gemini, fragments: Some(vec!["gemini"]) }))
            .with(
                Arc::new(FixedClient {
                    provider: ProviderType::OpenRouter,
                    fragments: Some(vec!["openrouter"]),
                })
            )
    );

    let (status, body) = app.send_chat(
        json!({ "message": "hi", "provider": "openrouter", "api": "gemini" })
    ).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, "openrouter");
}

#[tokio::test]
async fn missing_message_field_is_rejected() {
    let app = TestApp::answering(vec!["unused"]);
    let (status, _) = app.send_chat(json!({ "provider": "gemini" })).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn malformed_json_is_rejected() {
    let app = TestApp::answering(vec!["unused"]);
    let req = Request::post("/api/ai/chat/send")
        .header("content-type", "application/json")
        .body(Body::from("{not json"))
        .unwrap();
    let (status, _) = app.send(req).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn failing_provider_still_records_user_message() {
    let app = TestApp::failing();

    let (status, body) = app.send_chat(json!({ "message": "hello" })).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, NO_CONTENT_PLACEHOLDER);

    let turns = app.stored_turns().await;
    assert_eq!(turns.len(), 2);
    assert_eq!(turns[0].role, Role::User);
    assert_eq!(turns[0].text, "hello");
    assert_eq!(turns[1].role, Role::Model);
    assert!(!turns[1].text.is_empty());
    assert_ne!(turns[1].text, "hello");
}

#[tokio::test]
async fn unknown_provider_tag_still_records_user_message() {
    let app = TestApp::answering(vec!["unused"]);

    let (status, body) = app.send_chat(json!({ "message": "hi", "provider": "claude" })).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, NO_CONTENT_PLACEHOLDER);

    let history = app.history().await;
    assert_eq!(
        sender_and_text(&history),
        vec![
            ("user".to_string(), "hi".to_string()),
            ("ai".to_string(), NO_CONTENT_PLACEHOLDER.to_string())
        ]
    );
}

#[tokio::test]
async fn history_is_stable_across_reads() {
    let app = TestApp::answering(vec!["one"]);
    app.send_chat(json!({ "message": "first" })).await;
    app.send_chat(json!({ "message": "second" })).await;

    let strip_ids = |messages: Vec<Value>| {
        messages
            .into_iter()
            .map(|mut m| {
                m.as_object_mut().unwrap().remove("id");
                m
            })
            .collect::<Vec<_>>()
    };

    let first = strip_ids(app.history().await);
    let second = strip_ids(app.history().await);
    assert_eq!(first.len(), 4);
    assert_eq!(first, second);
}

#[tokio::test]
async fn malformed_history_file_reads_as_empty() {
    let app = TestApp::answering(vec!["unused"]);
    std::fs::write(&app.history_path, "{ definitely not an array").unwrap();
    assert!(app.history().await.is_empty());
}

// =============================================================================
// Dashboard proxies
// =============================================================================

#[tokio::test]
async fn dashboard_feed_is_served() {
    let app = TestApp::answering(vec![]);
    let (status, bytes) = app.send(get("/api/dashboard")).await;
    assert_eq!(status, StatusCode::OK);

    let feed: Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(feed["calendar_events"].as_array().unwrap().len(), 3);
    assert_eq!(feed["notifications"].as_array().unwrap().len(), 3);
}

#[tokio::test]
async fn weather_without_coordinates_uses_default_location() {
    let app = TestApp::answering(vec![]);
    let (status, bytes) = app.send(get("/api/weather")).await;
    assert_eq!(status, StatusCode::OK);

    let report: Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(report["location"], "Copenhagen, Denmark");
    assert_eq!(report["condition"], "Partly Cloudy");
}

#[tokio::test]
async fn unsupported_crypto_pair_is_not_found() {
    let app = TestApp::answering(vec![]);
    let (status, bytes) = app.send(get("/api/crypto/DOGEUSD")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let err: Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(err["message"], "Cryptocurrency pair not supported");
}

#[tokio::test]
async fn explain_crypto_requires_gemini() {
    let app = TestApp::new(ProviderRegistry::new());
    let body = json!({ "pairSymbol": "BTC/USD", "price": "1.00", "changePercent": "0.50" });
    let (status, _) = app.send(post_json("/api/ai/explain-crypto", &body)).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
}

#[tokio::test]
async fn explain_crypto_returns_trimmed_answer() {
    let app = TestApp::answering(vec!["  Bitcoin is steady.  "]);
    let body = json!({ "pairSymbol": "BTC/USD", "price": 64000.5, "changePercent": -0.4 });
    let (status, bytes) = app.send(post_json("/api/ai/explain-crypto", &body)).await;
    assert_eq!(status, StatusCode::OK);

    let resp: Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(resp["explanation"], "Bitcoin is steady.");
}

#[tokio::test]
async fn explain_crypto_rejects_missing_fields() {
    let app = TestApp::answering(vec!["unused"]);
    let body = json!({ "pairSymbol": "BTC/USD" });
    let (status, _) = app.send(post_json("/api/ai/explain-crypto", &body)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn google_token_without_credential_is_rejected() {
    let app = TestApp::answering(vec![]);
    let (status, _) = app.send(post_json("/api/verify-google-token", &json!({}))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn unknown_route_is_not_found() {
    let app = TestApp::answering(vec![]);
    let (status, _) = app.send(get("/api/nope")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

// =============================================================================
// Pinecone assistant and wiki
// =============================================================================

fn assistant_upstream() -> axum::Router {
    axum::Router::new().route(
        "/assistant/chat/helper",
        axum::routing::post(|| async {
            axum::Json(
                json!({
                    "message": { "role": "assistant", "content": "See the Q3 report." },
                    "citations": [{ "position": 3 }]
                })
            )
        })
    )
}

#[tokio::test]
async fn pinecone_query_without_assistant_is_unavailable() {
    let app = TestApp::answering(vec![]);
    let (status, bytes) = app.send(post_json("/api/pinecone-query", &json!({ "query": "find docs" }))).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);

    let err: Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(err["message"], "Pinecone Assistant not initialized.");
}

#[tokio::test]
async fn pinecone_query_with_keyword_reaches_assistant() {
    let host = spawn_upstream(assistant_upstream()).await;
    let app = with_pinecone(&host);

    let (status, bytes) = app.send(
        post_json("/api/pinecone-query", &json!({ "query": "Search the Database for Q3" }))
    ).await;
    assert_eq!(status, StatusCode::OK);

    let resp: Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(resp["source"], "pinecone");
    assert_eq!(resp["response"], "See the Q3 report.");
    assert_eq!(resp["citations"], json!([{ "position": 3 }]));
}

#[tokio::test]
async fn pinecone_query_without_keyword_is_declined() {
    let host = spawn_upstream(assistant_upstream()).await;
    let app = with_pinecone(&host);

    let (status, bytes) = app.send(post_json("/api/pinecone-query", &json!({ "query": "tell me a joke" }))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let resp: Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(
        resp,
        json!({ "source": "default", "response": "Query does not meet Pinecone Assistant criteria." })
    );
}

#[tokio::test]
async fn forced_pinecone_query_skips_keyword_check() {
    let host = spawn_upstream(assistant_upstream()).await;
    let app = with_pinecone(&host);

    let body = json!({ "query": "tell me a joke", "forceAssistant": true });
    let (status, _) = app.send(post_json("/api/pinecone-query", &body)).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn failing_assistant_is_internal_error() {
    let upstream = axum::Router::new().route(
        "/assistant/chat/helper",
        axum::routing::post(|| async { (StatusCode::UNAUTHORIZED, "bad key") })
    );
    let host = spawn_upstream(upstream).await;
    let app = with_pinecone(&host);

    let (status, bytes) = app.send(post_json("/api/pinecone-query", &json!({ "query": "help" }))).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);

    let err: Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(err["message"], "Failed to process Pinecone query");
}

#[tokio::test]
async fn wiki_without_index_is_unavailable() {
    let app = TestApp::answering(vec![]);
    for req in [get("/api/wiki"), get("/api/wiki/wiki-1"), post_json("/api/wiki", &json!({}))] {
        let (status, bytes) = app.send(req).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        let err: Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(err["message"], "Pinecone service not available.");
    }
}

#[tokio::test]
async fn wiki_upsert_requires_title_and_content() {
    let host = spawn_upstream(axum::Router::new()).await;
    let app = with_pinecone(&host);

    let (status, bytes) = app.send(post_json("/api/wiki", &json!({ "title": "Only a title" }))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    let err: Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(err["message"], "Title and content_md are required.");
}

#[tokio::test]
async fn wiki_upsert_creates_page() {
    let upstream = axum::Router::new().route(
        "/vectors/upsert",
        axum::routing::post(|| async { axum::Json(json!({ "upsertedCount": 1 })) })
    );
    let host = spawn_upstream(upstream).await;
    let app = with_pinecone(&host);

    let body = json!({ "id": "wiki-onboarding", "title": "Onboarding", "content_md": "# Hi" });
    let (status, bytes) = app.send(post_json("/api/wiki", &body)).await;
    assert_eq!(status, StatusCode::CREATED);

    let page: Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(page, body);
}

#[tokio::test]
async fn missing_wiki_page_is_not_found() {
    let upstream = axum::Router::new().route(
        "/vectors/fetch",
        axum::routing::get(|| async { axum::Json(json!({ "vectors": {} })) })
    );
    let host = spawn_upstream(upstream).await;
    let app = with_pinecone(&host);

    let (status, bytes) = app.send(get("/api/wiki/wiki-404")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    let err: Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(err["message"], "Wiki page not found.");
}

#[tokio::test]
async fn wiki_search_requires_query() {
    let host = spawn_upstream(axum::Router::new()).await;
    let app = with_pinecone(&host);

    let (status, _) = app.send(post_json("/api/wiki/search", &json!({ "query": "  " }))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn unreachable_wiki_index_is_internal_error() {
    let upstream = axum::Router::new().route(
        "/vectors/list",
        axum::routing::get(|| async { (StatusCode::SERVICE_UNAVAILABLE, "down") })
    );
    let host = spawn_upstream(upstream).await;
    let app = with_pinecone(&host);

    let (status, bytes) = app.send(get("/api/wiki")).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    let err: Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(err["message"], "Failed to list sample wiki pages.");
}
