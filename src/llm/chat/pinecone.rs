use async_trait::async_trait;
use log::info;
use serde::{ Deserialize, Serialize };
use serde_json::Value;
use std::time::Duration;

use super::{ build_http_client, check_status, ChatClient };
use crate::error::ProviderError;
use crate::llm::{ ProviderConfig, ProviderType };
use crate::models::chat::{ ChatTurn, Role };

const DEFAULT_HOST: &str = "https://prod-1-data.ke.pinecone.io";

/// Words that mark a free-form query as a question for the knowledge base.
const ASSISTANT_KEYWORDS: [&str; 7] = [
    "database",
    "document",
    "information",
    "find",
    "search",
    "help",
    "pinecone",
];

/// Whether `query` should go to the assistant without being forced.
pub fn wants_assistant(query: &str) -> bool {
    let query = query.to_lowercase();
    ASSISTANT_KEYWORDS.iter().any(|k| query.contains(k))
}

#[derive(Serialize)]
struct AssistantMessage {
    role: &'static str,
    content: String,
}

#[derive(Serialize)]
struct AssistantChatRequest {
    messages: Vec<AssistantMessage>,
    stream: bool,
}

#[derive(Deserialize)]
struct AssistantChatResponse {
    message: AssistantReply,
    #[serde(default)]
    citations: Option<Vec<Value>>,
}

/// An assistant reply together with the sources it cites.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AssistantAnswer {
    pub content: String,
    /// Citation objects as Pinecone returns them.
    pub citations: Vec<Value>,
}

#[derive(Deserialize)]
struct AssistantReply {
    content: String,
}

/// Vector-search assistant. Answers arrive in one payload, so the relay sees
/// a single fragment.
pub struct PineconeAssistantClient {
    http: reqwest::Client,
    timeout: Duration,
    api_key: String,
    assistant_name: String,
    host: String,
}

impl PineconeAssistantClient {
    pub fn from_config(config: &ProviderConfig) -> Result<Self, ProviderError> {
        let api_key = config.api_key
            .clone()
            .ok_or_else(|| ProviderError::configuration(ProviderType::Pinecone, "PINECONE_API_KEY is not set"))?;
        let assistant_name = config.name
            .clone()
            .ok_or_else(|| ProviderError::configuration(ProviderType::Pinecone, "ASSISTANT_NAME is not set"))?;

        Ok(Self {
            http: build_http_client(config)?,
            timeout: config.timeout,
            api_key,
            assistant_name,
            host: config.base_url.clone().unwrap_or_else(|| DEFAULT_HOST.to_string()),
        })
    }

    fn build_request(message: &str, prior: &[ChatTurn]) -> AssistantChatRequest {
        let mut messages: Vec<AssistantMessage> = prior
            .iter()
            .map(|turn| AssistantMessage {
                role: match turn.role {
                    Role::User => "user",
                    Role::Model => "assistant",
                },
                content: turn.text.clone(),
            })
            .collect();
        messages.push(AssistantMessage { role: "user", content: message.to_string() });
        AssistantChatRequest { messages, stream: false }
    }

    /// Asks the assistant and keeps its citations.
    pub async fn chat(&self, message: &str, prior: &[ChatTurn]) -> Result<AssistantAnswer, ProviderError> {
        let url = format!(
            "{}/assistant/chat/{}",
            self.host.trim_end_matches('/'),
            self.assistant_name
        );
        info!("PineconeAssistantClient::chat() → assistant={}", self.assistant_name);

        let resp = self.http
            .post(&url)
            .timeout(self.timeout)
            .header("Api-Key", &self.api_key)
            .json(&Self::build_request(message, prior))
            .send().await?;
        let data: AssistantChatResponse = check_status(resp).await?
            .json().await
            .map_err(|e| ProviderError::Protocol(format!("assistant response: {}", e)))?;

        Ok(AssistantAnswer {
            content: data.message.content,
            citations: data.citations.unwrap_or_default(),
        })
    }
}

#[async_trait]
impl ChatClient for PineconeAssistantClient {
    async fn complete(&self, message: &str, prior: &[ChatTurn]) -> Result<String, ProviderError> {
        Ok(self.chat(message, prior).await?.content)
    }

    fn provider(&self) -> ProviderType {
        ProviderType::Pinecone
    }

    fn model(&self) -> String {
        format!("assistant:{}", self.assistant_name)
    }
}
