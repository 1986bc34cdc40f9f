use async_trait::async_trait;
use std::time::Duration;
use log::info;
use serde::{ Deserialize, Serialize };

use super::{ build_http_client, check_status, http_stream_generate, ChatClient, FragmentStream, Frame };
use crate::error::ProviderError;
use crate::llm::{ ProviderConfig, ProviderType };
use crate::models::chat::{ ChatTurn, Role };

const DEFAULT_MODEL: &str = "gemini-2.5-flash";
const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

#[derive(Serialize)]
struct GeminiRequest {
    contents: Vec<GeminiContent>,
}

#[derive(Serialize)]
struct GeminiContent {
    role: &'static str,
    parts: Vec<GeminiPart>,
}

#[derive(Serialize)]
struct GeminiPart {
    text: String,
}

#[derive(Deserialize)]
struct GoogleChunk {
    #[serde(default)]
    candidates: Vec<GoogleCandidate>,
}

#[derive(Deserialize)]
struct GoogleCandidate {
    content: Option<GoogleContent>,
}

#[derive(Deserialize)]
struct GoogleContent {
    #[serde(default)]
    parts: Vec<GooglePart>,
}

#[derive(Deserialize)]
struct GooglePart {
    text: Option<String>,
}

impl GoogleChunk {
    fn text(&self) -> String {
        self.candidates
            .first()
            .and_then(|c| c.content.as_ref())
            .map(|content| {
                content.parts
                    .iter()
                    .filter_map(|p| p.text.as_deref())
                    .collect::<String>()
            })
            .unwrap_or_default()
    }
}

fn parse_gemini_event(data: &str) -> Result<Frame, ProviderError> {
    let data = data.trim();
    if data.is_empty() {
        return Ok(Frame::Skip);
    }
    let chunk: GoogleChunk = serde_json
        ::from_str(data)
        .map_err(|e| ProviderError::Protocol(format!("Gemini stream chunk: {}", e)))?;
    let text = chunk.text();
    if text.is_empty() {
        Ok(Frame::Skip)
    } else {
        Ok(Frame::Text(text))
    }
}

pub struct GeminiChatClient {
    http: reqwest::Client,
    timeout: Duration,
    api_key: String,
    model: String,
    base_url: String,
}

impl GeminiChatClient {
    pub fn new(
        api_key: String,
        model: Option<String>,
        base_url: Option<String>,
        config: &ProviderConfig
    ) -> Result<Self, ProviderError> {
        Ok(Self {
            http: build_http_client(config)?,
            timeout: config.timeout,
            api_key,
            model: model.unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            base_url: base_url.unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
        })
    }

    pub fn from_config(config: &ProviderConfig) -> Result<Self, ProviderError> {
        let api_key = config.api_key
            .clone()
            .ok_or_else(|| ProviderError::configuration(ProviderType::Gemini, "GEMINI_API_KEY is not set"))?;
        Self::new(api_key, config.model.clone(), config.base_url.clone(), config)
    }

    fn endpoint(&self, method: &str) -> String {
        format!("{}/models/{}:{}", self.base_url.trim_end_matches('/'), self.model, method)
    }

    fn build_request(message: &str, prior: &[ChatTurn]) -> GeminiRequest {
        let mut contents: Vec<GeminiContent> = prior
            .iter()
            .map(|turn| GeminiContent {
                role: match turn.role {
                    Role::User => "user",
                    Role::Model => "model",
                },
                parts: vec![GeminiPart { text: turn.text.clone() }],
            })
            .collect();
        contents.push(GeminiContent {
            role: "user",
            parts: vec![GeminiPart { text: message.to_string() }],
        });
        GeminiRequest { contents }
    }
}

#[async_trait]
impl ChatClient for GeminiChatClient {
    async fn complete(&self, message: &str, prior: &[ChatTurn]) -> Result<String, ProviderError> {
        info!("GeminiChatClient::complete() → model={} prior_turns={}", self.model, prior.len());
        let resp = self.http
            .post(self.endpoint("generateContent"))
            .timeout(self.timeout)
            .header("x-goog-api-key", &self.api_key)
            .json(&Self::build_request(message, prior))
            .send().await?;
        let chunk: GoogleChunk = check_status(resp).await?
            .json().await
            .map_err(|e| ProviderError::Protocol(format!("Gemini response: {}", e)))?;
        Ok(chunk.text())
    }

    async fn complete_stream(
        &self,
        message: &str,
        prior: &[ChatTurn]
    ) -> Result<FragmentStream, ProviderError> {
        info!(
            "GeminiChatClient::complete_stream() → model={} prior_turns={}",
            self.model,
            prior.len()
        );
        let request = self.http
            .post(format!("{}?alt=sse", self.endpoint("streamGenerateContent")))
            .header("x-goog-api-key", &self.api_key)
            .json(&Self::build_request(message, prior));
        http_stream_generate(request, parse_gemini_event).await
    }

    fn provider(&self) -> ProviderType {
        ProviderType::Gemini
    }

    fn model(&self) -> String {
        self.model.clone()
    }
}
