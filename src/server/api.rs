use std::convert::Infallible;
use std::error::Error;
use std::num::NonZeroU32;
use std::path::Path as FsPath;
use std::sync::Arc;

use axum::{
    body::Body,
    extract::{ rejection::JsonRejection, Path, Query, State },
    http::{ header, StatusCode },
    response::{ IntoResponse, Response },
    routing::{ get, post },
    Json,
    Router,
};
use futures::StreamExt;
use governor::{ DefaultDirectRateLimiter, Quota, RateLimiter };
use log::{ error, info, warn };
use serde::{ Deserialize, Serialize };
use serde_json::Value;
use tower::ServiceBuilder;
use tower_http::cors::{ Any, CorsLayer };
use tower_http::services::{ ServeDir, ServeFile };

use crate::auth::{ AuthError, GoogleTokenVerifier };
use crate::cli::Args;
use crate::dashboard::crypto::{ explanation_prompt, fetch_quote, CryptoQuote };
use crate::dashboard::weather::{ current_weather, WeatherQuery, WeatherReport };
use crate::dashboard::{ Dashboard, DashboardFeed };
use crate::history::load_chat_messages;
use crate::llm::chat::pinecone::{ wants_assistant, PineconeAssistantClient };
use crate::llm::{ ProviderConfig, ProviderType };
use crate::models::chat::{ ChatMessage, SendChatRequest };
use crate::relay::ChatRelay;
use crate::server::error::ApiError;
use crate::wiki::{ WikiIndex, WikiPage, WikiSearchHit, WikiSummary };

const WIKI_SAMPLE_SIZE: usize = 5;
const WIKI_SEARCH_TOP_K: usize = 10;

#[derive(Clone)]
pub struct AppState {
    pub relay: Arc<ChatRelay>,
    pub dashboard: Arc<Dashboard>,
    pub auth: Arc<GoogleTokenVerifier>,
    pub chat_limiter: Arc<DefaultDirectRateLimiter>,
    /// Direct assistant access for `/api/pinecone-query`, outside the relay.
    pub assistant: Option<Arc<PineconeAssistantClient>>,
    pub wiki: Option<Arc<WikiIndex>>,
}

impl AppState {
    pub fn new(relay: Arc<ChatRelay>, args: &Args) -> Result<Self, Box<dyn Error + Send + Sync>> {
        let dashboard = Dashboard::from_args(args)?;
        let auth = GoogleTokenVerifier::new(dashboard.http.clone(), args.google_client_id.clone());
        let per_second = NonZeroU32::new(args.chat_rate_limit.max(1)).unwrap_or(NonZeroU32::MIN);
        let assistant = PineconeAssistantClient::from_config(
            &ProviderConfig::from_args(ProviderType::Pinecone, args)
        ).ok();
        let wiki = WikiIndex::from_args(args, dashboard.http.clone());

        Ok(Self {
            relay,
            dashboard: Arc::new(dashboard),
            auth: Arc::new(auth),
            chat_limiter: Arc::new(RateLimiter::direct(Quota::per_second(per_second))),
            assistant: assistant.map(Arc::new),
            wiki: wiki.map(Arc::new),
        })
    }
}

pub fn create_router(state: AppState, static_dir: Option<&FsPath>) -> Router {
    let cors = CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any);

    let mut router = Router::new()
        .route("/api/ai/chat/send", post(send_chat_handler))
        .route("/api/ai/chat/history", get(chat_history_handler))
        .route("/api/dashboard", get(dashboard_handler))
        .route("/api/weather", get(weather_handler))
        .route("/api/crypto/{pair}", get(crypto_handler))
        .route("/api/ai/explain-crypto", post(explain_crypto_handler))
        .route("/api/verify-google-token", post(verify_google_token_handler))
        .route("/api/pinecone-query", post(pinecone_query_handler))
        .route("/api/wiki", get(list_wiki_handler).post(upsert_wiki_handler))
        .route("/api/wiki/search", post(search_wiki_handler))
        .route("/api/wiki/{page_id}", get(get_wiki_handler));

    if let Some(dir) = static_dir {
        info!("Serving front-end from {}", dir.display());
        let spa = ServeDir::new(dir).fallback(ServeFile::new(dir.join("index.html")));
        router = router.fallback_service(spa);
    }

    router.layer(ServiceBuilder::new().layer(cors)).with_state(state)
}

async fn send_chat_handler(
    State(state): State<AppState>,
    payload: Result<Json<SendChatRequest>, JsonRejection>
) -> Result<Response, ApiError> {
    let Json(request) = payload.map_err(|e| ApiError::BadRequest(e.body_text()))?;

    if state.chat_limiter.check().is_err() {
        warn!("Chat rate limit exceeded, rejecting request.");
        return Err(ApiError::TooManyRequests("Too many chat requests, slow down.".to_string()));
    }

    let fragments = state.relay.send(request)?;
    let body = Body::from_stream(fragments.map(Ok::<_, Infallible>));

    Ok(
        (
            [
                (header::CONTENT_TYPE, "text/plain; charset=utf-8"),
                (header::CACHE_CONTROL, "no-cache"),
            ],
            body,
        ).into_response()
    )
}

async fn chat_history_handler(State(state): State<AppState>) -> Json<Vec<ChatMessage>> {
    Json(load_chat_messages(state.relay.history().as_ref()).await)
}

async fn dashboard_handler(State(state): State<AppState>) -> Json<DashboardFeed> {
    Json(state.dashboard.feed.clone())
}

async fn weather_handler(
    State(state): State<AppState>,
    Query(query): Query<WeatherQuery>
) -> Json<WeatherReport> {
    let dashboard = &state.dashboard;
    Json(current_weather(&dashboard.http, dashboard.weather_api_key.as_deref(), &query).await)
}

async fn crypto_handler(
    State(state): State<AppState>,
    Path(pair): Path<String>
) -> Result<Json<CryptoQuote>, ApiError> {
    let dashboard = &state.dashboard;
    let quote = fetch_quote(&dashboard.http, &dashboard.coingecko_base_url, &pair).await?;
    Ok(Json(quote))
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ExplainCryptoRequest {
    #[serde(default)]
    pair_symbol: Option<String>,
    #[serde(default)]
    price: Option<Value>,
    #[serde(default)]
    change_percent: Option<Value>,
}

#[derive(Serialize)]
struct ExplainCryptoResponse {
    explanation: String,
}

/// Renders a loosely typed JSON field as prompt text. Strings lose their quotes.
fn prompt_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

async fn explain_crypto_handler(
    State(state): State<AppState>,
    payload: Result<Json<ExplainCryptoRequest>, JsonRejection>
) -> Result<Json<ExplainCryptoResponse>, ApiError> {
    let Some(client) = state.relay.providers().get(ProviderType::Gemini) else {
        return Err(
            ApiError::ServiceUnavailable(
                "AI service not available. GEMINI_API_KEY might be missing or invalid on backend.".to_string()
            )
        );
    };

    let Json(request) = payload.map_err(|e| ApiError::BadRequest(e.body_text()))?;
    let (Some(pair_symbol), Some(price), Some(change)) = (
        request.pair_symbol.filter(|p| !p.is_empty()),
        request.price,
        request.change_percent,
    ) else {
        return Err(
            ApiError::BadRequest(
                "Missing required data for AI explanation (pairSymbol, price, changePercent).".to_string()
            )
        );
    };

    let prompt = explanation_prompt(&pair_symbol, &prompt_value(&price), &prompt_value(&change));
    let text = client.complete(&prompt, &[]).await.map_err(|e| {
        error!("Error getting AI explanation from Gemini: {}", e);
        ApiError::Internal(format!("Failed to get AI explanation. {}", e))
    })?;

    let explanation = text.trim();
    if explanation.is_empty() {
        return Err(
            ApiError::Internal(
                "Failed to get AI explanation. No explanation content received from Gemini API.".to_string()
            )
        );
    }
    Ok(Json(ExplainCryptoResponse { explanation: explanation.to_string() }))
}

#[derive(Debug, Default, Deserialize)]
struct VerifyTokenRequest {
    #[serde(default)]
    credential: Option<String>,
}

#[derive(Serialize)]
struct VerifyTokenResponse {
    success: bool,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    user: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

async fn verify_google_token_handler(
    State(state): State<AppState>,
    payload: Result<Json<VerifyTokenRequest>, JsonRejection>
) -> Result<Response, ApiError> {
    let Json(request) = payload.map_err(|e| ApiError::BadRequest(e.body_text()))?;
    let Some(credential) = request.credential.filter(|c| !c.is_empty()) else {
        return Err(ApiError::BadRequest("Credential not provided".to_string()));
    };

    let (status, body) = match state.auth.verify(&credential).await {
        Ok(claims) =>
            (
                StatusCode::OK,
                VerifyTokenResponse {
                    success: true,
                    message: "Authentication successful".to_string(),
                    user: Some(claims),
                    error: None,
                },
            ),
        Err(e) => {
            error!("Error verifying Google ID token: {}", e);
            let status = match e {
                AuthError::Rejected(_) => StatusCode::UNAUTHORIZED,
                AuthError::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            };
            (
                status,
                VerifyTokenResponse {
                    success: false,
                    message: "Authentication failed".to_string(),
                    user: None,
                    error: Some(e.to_string()),
                },
            )
        }
    };

    Ok((status, Json(body)).into_response())
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PineconeQueryRequest {
    #[serde(default)]
    query: Option<String>,
    #[serde(default)]
    force_assistant: bool,
}

#[derive(Serialize)]
struct PineconeQueryResponse {
    source: &'static str,
    response: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    citations: Option<Vec<Value>>,
}

async fn pinecone_query_handler(
    State(state): State<AppState>,
    payload: Result<Json<PineconeQueryRequest>, JsonRejection>
) -> Result<Response, ApiError> {
    let Some(assistant) = state.assistant.clone() else {
        return Err(ApiError::ServiceUnavailable("Pinecone Assistant not initialized.".to_string()));
    };

    let Json(request) = payload.map_err(|e| ApiError::BadRequest(e.body_text()))?;
    let Some(query) = request.query.filter(|q| !q.is_empty()) else {
        return Err(ApiError::BadRequest("Query is required.".to_string()));
    };

    if !request.force_assistant && !wants_assistant(&query) {
        let body = PineconeQueryResponse {
            source: "default",
            response: "Query does not meet Pinecone Assistant criteria.".to_string(),
            citations: None,
        };
        return Ok((StatusCode::BAD_REQUEST, Json(body)).into_response());
    }

    let answer = assistant.chat(&query, &[]).await.map_err(|e| {
        error!("Error querying Pinecone Assistant: {}", e);
        ApiError::Internal("Failed to process Pinecone query".to_string())
    })?;

    let body = PineconeQueryResponse {
        source: "pinecone",
        response: answer.content,
        citations: Some(answer.citations),
    };
    Ok(Json(body).into_response())
}

fn wiki_index(state: &AppState) -> Result<Arc<WikiIndex>, ApiError> {
    state.wiki
        .clone()
        .ok_or_else(|| ApiError::ServiceUnavailable("Pinecone service not available.".to_string()))
}

async fn get_wiki_handler(
    State(state): State<AppState>,
    Path(page_id): Path<String>
) -> Result<Json<WikiPage>, ApiError> {
    let wiki = wiki_index(&state)?;
    match wiki.page(&page_id).await {
        Ok(Some(page)) => Ok(Json(page)),
        Ok(None) => Err(ApiError::NotFound("Wiki page not found.".to_string())),
        Err(e) => {
            error!("Error fetching wiki page {}: {}", page_id, e);
            Err(ApiError::Internal("Failed to fetch wiki page.".to_string()))
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct UpsertWikiRequest {
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    content_md: Option<String>,
}

async fn upsert_wiki_handler(
    State(state): State<AppState>,
    payload: Result<Json<UpsertWikiRequest>, JsonRejection>
) -> Result<Response, ApiError> {
    let wiki = wiki_index(&state)?;
    let Json(request) = payload.map_err(|e| ApiError::BadRequest(e.body_text()))?;
    let (Some(title), Some(content_md)) = (
        request.title.filter(|t| !t.is_empty()),
        request.content_md.filter(|c| !c.is_empty()),
    ) else {
        return Err(ApiError::BadRequest("Title and content_md are required.".to_string()));
    };

    let page = wiki.upsert(request.id, &title, &content_md).await.map_err(|e| {
        error!("Error upserting wiki page: {}", e);
        ApiError::Internal("Failed to create/update wiki page.".to_string())
    })?;
    Ok((StatusCode::CREATED, Json(page)).into_response())
}

async fn list_wiki_handler(State(state): State<AppState>) -> Result<Json<Vec<WikiSummary>>, ApiError> {
    let wiki = wiki_index(&state)?;
    let pages = wiki.list(WIKI_SAMPLE_SIZE).await.map_err(|e| {
        error!("Error listing wiki pages: {}", e);
        ApiError::Internal("Failed to list sample wiki pages.".to_string())
    })?;
    Ok(Json(pages))
}

#[derive(Debug, Default, Deserialize)]
struct SearchWikiRequest {
    #[serde(default)]
    query: Option<String>,
}

async fn search_wiki_handler(
    State(state): State<AppState>,
    payload: Result<Json<SearchWikiRequest>, JsonRejection>
) -> Result<Json<Vec<WikiSearchHit>>, ApiError> {
    let wiki = wiki_index(&state)?;
    let Json(request) = payload.map_err(|e| ApiError::BadRequest(e.body_text()))?;
    let Some(query) = request.query.filter(|q| !q.trim().is_empty()) else {
        return Err(ApiError::BadRequest("Search query is required.".to_string()));
    };

    let hits = wiki.search(&query, WIKI_SEARCH_TOP_K).await.map_err(|e| {
        error!("Error searching wiki pages: {}", e);
        ApiError::Internal("Failed to search wiki pages.".to_string())
    })?;
    Ok(Json(hits))
}
