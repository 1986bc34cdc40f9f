pub mod gemini;
pub mod openrouter;
pub mod pinecone;

use async_trait::async_trait;
use futures::{ Stream, StreamExt };
use log::{ info, warn };
use reqwest::{ RequestBuilder, Response };
use std::collections::HashMap;
use std::pin::Pin;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

use self::gemini::GeminiChatClient;
use self::openrouter::OpenRouterChatClient;
use self::pinecone::PineconeAssistantClient;
use super::sse::SseDecoder;
use super::{ ProviderConfig, ProviderType };
use crate::error::ProviderError;
use crate::models::chat::ChatTurn;

/// Lazy, finite, non-restartable sequence of plain text fragments.
pub type FragmentStream = Pin<Box<dyn Stream<Item = Result<String, ProviderError>> + Send>>;

/// What a provider's event parser made of one upstream event.
#[derive(Debug, PartialEq, Eq)]
pub enum Frame {
    Text(String),
    Skip,
    Done,
}

#[async_trait]
pub trait ChatClient: Send + Sync {
    /// Single-shot completion of `message` given the earlier conversation.
    async fn complete(&self, message: &str, prior: &[ChatTurn]) -> Result<String, ProviderError>;

    /// Streams the answer. Providers without native streaming hand back
    /// their single-shot answer as a one-fragment stream.
    async fn complete_stream(
        &self,
        message: &str,
        prior: &[ChatTurn]
    ) -> Result<FragmentStream, ProviderError> {
        let text = self.complete(message, prior).await?;
        Ok(single_fragment(text))
    }

    fn provider(&self) -> ProviderType;

    fn model(&self) -> String;
}

pub fn single_fragment(text: String) -> FragmentStream {
    Box::pin(futures::stream::once(async move { Ok(text) }))
}

/// Shared reqwest client. The provider timeout bounds connecting and each
/// read, so a long answer keeps streaming as long as bytes keep arriving.
/// Single-shot calls add a whole-request timeout themselves.
pub(crate) fn build_http_client(config: &ProviderConfig) -> Result<reqwest::Client, ProviderError> {
    reqwest::Client
        ::builder()
        .connect_timeout(config.timeout)
        .read_timeout(config.timeout)
        .build()
        .map_err(|e| ProviderError::configuration(config.provider, format!("HTTP client: {}", e)))
}

/// Turns a non-success response into `ProviderError::Upstream` carrying the body.
pub(crate) async fn check_status(resp: Response) -> Result<Response, ProviderError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let body = resp.text().await.unwrap_or_default();
    Err(ProviderError::Upstream { status: status.as_u16(), body })
}

/// Sends `request` and relays its event-stream body as text fragments.
///
/// Status errors surface before any fragment. `event_parser` strips the
/// provider framing; `Frame::Done` ends the stream early. The reader task
/// stops as soon as the receiving side is dropped.
pub async fn http_stream_generate(
    request: RequestBuilder,
    event_parser: fn(&str) -> Result<Frame, ProviderError>
) -> Result<FragmentStream, ProviderError> {
    let resp = check_status(request.send().await?).await?;
    let (tx, rx) = mpsc::channel(32);

    tokio::spawn(async move {
        let mut decoder = SseDecoder::new();
        let mut bytes = resp.bytes_stream();

        while let Some(chunk) = bytes.next().await {
            let buf = match chunk {
                Ok(buf) => buf,
                Err(e) => {
                    let _ = tx.send(Err(ProviderError::from(e))).await;
                    return;
                }
            };
            for event in decoder.feed(&buf) {
                if !forward_event(&tx, event_parser(&event.data)).await {
                    return;
                }
            }
        }

        if let Some(event) = decoder.finish() {
            forward_event(&tx, event_parser(&event.data)).await;
        }
    });

    Ok(Box::pin(ReceiverStream::new(rx)))
}

/// Returns `false` when the stream should stop.
async fn forward_event(
    tx: &mpsc::Sender<Result<String, ProviderError>>,
    parsed: Result<Frame, ProviderError>
) -> bool {
    match parsed {
        Ok(Frame::Text(text)) => tx.send(Ok(text)).await.is_ok(),
        Ok(Frame::Skip) => true,
        Ok(Frame::Done) => false,
        Err(e) => {
            let _ = tx.send(Err(e)).await;
            false
        }
    }
}

pub fn new_client(config: &ProviderConfig) -> Result<Arc<dyn ChatClient>, ProviderError> {
    let client: Arc<dyn ChatClient> = match config.provider {
        ProviderType::Gemini => Arc::new(GeminiChatClient::from_config(config)?),
        ProviderType::OpenRouter => Arc::new(OpenRouterChatClient::from_config(config)?),
        ProviderType::Pinecone => Arc::new(PineconeAssistantClient::from_config(config)?),
    };
    Ok(client)
}

/// Adapters available to the relay, keyed by provider tag.
#[derive(Clone, Default)]
pub struct ProviderRegistry {
    clients: HashMap<ProviderType, Arc<dyn ChatClient>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds every provider whose configuration is complete. A provider
    /// with missing settings is left out; the rest stay usable.
    pub fn from_configs(configs: &[ProviderConfig]) -> Self {
        let mut registry = Self::new();
        for config in configs {
            match new_client(config) {
                Ok(client) => {
                    info!(
                        "Chat provider enabled: Type={}, Model={}",
                        config.provider,
                        client.model()
                    );
                    registry.register(client);
                }
                Err(e) => warn!("Chat provider {} disabled: {}", config.provider, e),
            }
        }
        registry
    }

    pub fn register(&mut self, client: Arc<dyn ChatClient>) {
        self.clients.insert(client.provider(), client);
    }

    pub fn with(mut self, client: Arc<dyn ChatClient>) -> Self {
        self.register(client);
        self
    }

    pub fn get(&self, provider: ProviderType) -> Option<Arc<dyn ChatClient>> {
        self.clients.get(&provider).cloned()
    }

    pub fn enabled(&self) -> Vec<ProviderType> {
        ProviderType::ALL.into_iter()
            .filter(|p| self.clients.contains_key(p))
            .collect()
    }
}
