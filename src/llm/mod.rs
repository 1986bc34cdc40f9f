pub mod chat;
pub mod sse;

use serde::{ Deserialize, Serialize };
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use crate::cli::Args;

/// Upstream chat backend selected per request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderType {
    Gemini,
    OpenRouter,
    Pinecone,
}

impl ProviderType {
    pub const ALL: [ProviderType; 3] = [
        ProviderType::Gemini,
        ProviderType::OpenRouter,
        ProviderType::Pinecone,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderType::Gemini => "gemini",
            ProviderType::OpenRouter => "openrouter",
            ProviderType::Pinecone => "pinecone",
        }
    }
}

impl fmt::Display for ProviderType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, PartialEq, Eq)]
pub struct ParseProviderTypeError {
    message: String,
}

impl fmt::Display for ParseProviderTypeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for ParseProviderTypeError {}

impl FromStr for ProviderType {
    type Err = ParseProviderTypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "gemini" => Ok(ProviderType::Gemini),
            "openrouter" => Ok(ProviderType::OpenRouter),
            "pinecone" => Ok(ProviderType::Pinecone),
            _ =>
                Err(ParseProviderTypeError {
                    message: format!("Invalid chat provider: '{}'", s),
                }),
        }
    }
}

/// Settings one adapter needs. `api_key` of `None` disables the provider.
#[derive(Debug, Clone)]
pub struct ProviderConfig {
    pub provider: ProviderType,
    pub api_key: Option<String>,
    pub model: Option<String>,
    pub base_url: Option<String>,
    /// Provider-specific name: assistant name for Pinecone, app title for OpenRouter.
    pub name: Option<String>,
    pub timeout: Duration,
}

impl ProviderConfig {
    pub fn new(provider: ProviderType) -> Self {
        Self {
            provider,
            api_key: None,
            model: None,
            base_url: None,
            name: None,
            timeout: Duration::from_secs(60),
        }
    }

    pub fn from_args(provider: ProviderType, args: &Args) -> Self {
        let timeout = Duration::from_secs(args.provider_timeout_secs);
        let (api_key, model, base_url, name) = match provider {
            ProviderType::Gemini =>
                (
                    args.gemini_api_key.clone(),
                    args.gemini_model.clone(),
                    args.gemini_base_url.clone(),
                    None,
                ),
            ProviderType::OpenRouter =>
                (
                    args.openrouter_api_key.clone(),
                    args.openrouter_model.clone(),
                    args.openrouter_base_url.clone(),
                    args.openrouter_app_title.clone(),
                ),
            ProviderType::Pinecone =>
                (
                    args.pinecone_api_key.clone(),
                    None,
                    args.pinecone_assistant_host.clone(),
                    args.assistant_name.clone(),
                ),
        };

        Self {
            provider,
            api_key: api_key.filter(|k| !k.trim().is_empty()),
            model: model.filter(|m| !m.trim().is_empty()),
            base_url: base_url.filter(|u| !u.trim().is_empty()),
            name: name.filter(|n| !n.trim().is_empty()),
            timeout,
        }
    }
}
