use async_trait::async_trait;
use std::time::Duration;
use log::info;
use reqwest::header::{ HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE };
use serde::{ Deserialize, Serialize };

use super::{ build_http_client, check_status, http_stream_generate, ChatClient, FragmentStream, Frame };
use crate::error::ProviderError;
use crate::llm::{ ProviderConfig, ProviderType };
use crate::models::chat::{ ChatTurn, Role };

const DEFAULT_MODEL: &str = "deepseek/deepseek-chat";
const DEFAULT_BASE_URL: &str = "https://openrouter.ai/api/v1";

#[derive(Serialize)]
struct OpenRouterMessage {
    role: &'static str,
    content: String,
}

#[derive(Serialize)]
struct OpenRouterRequest {
    model: String,
    messages: Vec<OpenRouterMessage>,
    stream: bool,
}

#[derive(Deserialize)]
struct OpenRouterResponse {
    choices: Vec<OpenRouterChoice>,
}

#[derive(Deserialize)]
struct OpenRouterChoice {
    message: OpenRouterReply,
}

#[derive(Deserialize)]
struct OpenRouterReply {
    content: Option<String>,
}

#[derive(Deserialize)]
struct OpenRouterStreamChunk {
    #[serde(default)]
    choices: Vec<OpenRouterStreamChoice>,
    error: Option<OpenRouterErrorBody>,
}

#[derive(Deserialize)]
struct OpenRouterStreamChoice {
    delta: OpenRouterDelta,
}

#[derive(Deserialize)]
struct OpenRouterDelta {
    content: Option<String>,
}

#[derive(Deserialize)]
struct OpenRouterErrorBody {
    code: Option<serde_json::Value>,
    message: Option<String>,
}

fn parse_openrouter_event(data: &str) -> Result<Frame, ProviderError> {
    let data = data.trim();
    if data == "[DONE]" {
        return Ok(Frame::Done);
    }
    if data.is_empty() {
        return Ok(Frame::Skip);
    }

    let chunk: OpenRouterStreamChunk = serde_json
        ::from_str(data)
        .map_err(|e| ProviderError::Protocol(format!("OpenRouter stream chunk: {}", e)))?;

    if let Some(err) = chunk.error {
        let status = err.code
            .as_ref()
            .and_then(|c| c.as_u64())
            .and_then(|c| u16::try_from(c).ok())
            .unwrap_or(502);
        return Err(ProviderError::Upstream {
            status,
            body: err.message.unwrap_or_else(|| "stream error".to_string()),
        });
    }

    match chunk.choices.into_iter().next().and_then(|c| c.delta.content) {
        Some(text) if !text.is_empty() => Ok(Frame::Text(text)),
        _ => Ok(Frame::Skip),
    }
}

pub struct OpenRouterChatClient {
    http: reqwest::Client,
    timeout: Duration,
    headers: HeaderMap,
    model: String,
    base_url: String,
}

impl OpenRouterChatClient {
    pub fn new(
        api_key: String,
        model: Option<String>,
        base_url: Option<String>,
        app_title: Option<String>,
        config: &ProviderConfig
    ) -> Result<Self, ProviderError> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {}", api_key)).map_err(|e|
                ProviderError::configuration(ProviderType::OpenRouter, format!("Invalid API key format: {}", e))
            )?
        );
        if let Some(title) = app_title {
            if let Ok(value) = HeaderValue::from_str(&title) {
                headers.insert("X-Title", value);
            }
        }

        Ok(Self {
            http: build_http_client(config)?,
            timeout: config.timeout,
            headers,
            model: model.unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            base_url: base_url.unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
        })
    }

    pub fn from_config(config: &ProviderConfig) -> Result<Self, ProviderError> {
        let api_key = config.api_key
            .clone()
            .ok_or_else(||
                ProviderError::configuration(ProviderType::OpenRouter, "OPENROUTER_API_KEY is not set")
            )?;
        Self::new(api_key, config.model.clone(), config.base_url.clone(), config.name.clone(), config)
    }

    fn build_request(&self, message: &str, prior: &[ChatTurn], stream: bool) -> OpenRouterRequest {
        let mut messages: Vec<OpenRouterMessage> = prior
            .iter()
            .map(|turn| OpenRouterMessage {
                role: match turn.role {
                    Role::User => "user",
                    Role::Model => "assistant",
                },
                content: turn.text.clone(),
            })
            .collect();
        messages.push(OpenRouterMessage { role: "user", content: message.to_string() });

        OpenRouterRequest { model: self.model.clone(), messages, stream }
    }

    fn url(&self) -> String {
        format!("{}/chat/completions", self.base_url.trim_end_matches('/'))
    }
}

#[async_trait]
impl ChatClient for OpenRouterChatClient {
    async fn complete(&self, message: &str, prior: &[ChatTurn]) -> Result<String, ProviderError> {
        info!("OpenRouterChatClient::complete() → model={}", self.model);
        let resp = self.http
            .post(self.url())
            .headers(self.headers.clone())
            .json(&self.build_request(message, prior, false))
            .timeout(self.timeout)
            .send().await?;
        let data: OpenRouterResponse = check_status(resp).await?
            .json().await
            .map_err(|e| ProviderError::Protocol(format!("OpenRouter response: {}", e)))?;
        data.choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| ProviderError::Protocol("OpenRouter response has no choices".into()))
    }

    async fn complete_stream(
        &self,
        message: &str,
        prior: &[ChatTurn]
    ) -> Result<FragmentStream, ProviderError> {
        info!(
            "OpenRouterChatClient::complete_stream() → model={} prior_turns={}",
            self.model,
            prior.len()
        );
        let request = self.http
            .post(self.url())
            .headers(self.headers.clone())
            .json(&self.build_request(message, prior, true));
        http_stream_generate(request, parse_openrouter_event).await
    }

    fn provider(&self) -> ProviderType {
        ProviderType::OpenRouter
    }

    fn model(&self) -> String {
        self.model.clone()
    }
}
