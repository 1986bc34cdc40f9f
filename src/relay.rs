//! Chat relay: one request in, one streamed answer out, one exchange persisted.
//!
//! Each exchange walks `Validating → Dispatching → Streaming → Committing →
//! Done`. Failures in the first three states end in `Errored`, but the
//! exchange is still committed: the user's message always reaches the
//! transcript, with a placeholder standing in for a missing answer.

use bytes::Bytes;
use futures::StreamExt;
use log::{ debug, error, info, warn };
use std::sync::Arc;
use tokio::sync::{ mpsc, Mutex };
use tokio_stream::wrappers::ReceiverStream;
use uuid::Uuid;

use crate::error::{ InvalidRequest, ProviderError, RelayError };
use crate::history::{ recent_turns, HistoryStore };
use crate::llm::chat::{ ChatClient, ProviderRegistry };
use crate::llm::ProviderType;
use crate::models::chat::{ ChatTurn, SendChatRequest };

/// Model text recorded when no answer text was produced at all.
pub const NO_CONTENT_PLACEHOLDER: &str =
    "[AI failed to respond due to an error. No content generated.]";

/// Appended to a partial answer whose stream broke.
pub const INCOMPLETE_SUFFIX: &str = "\n[Error during streaming, AI response may be incomplete]";

const SINK_CAPACITY: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayState {
    Validating,
    Dispatching,
    Streaming,
    Committing,
    Done,
    Errored,
}

/// What happened to one exchange.
#[derive(Debug)]
pub struct ExchangeOutcome {
    /// `Done` or `Errored`.
    pub state: RelayState,
    /// Text committed as the model turn.
    pub model_text: String,
    pub error: Option<RelayError>,
    pub client_disconnected: bool,
    pub committed: bool,
}

struct Exchange {
    id: Uuid,
    state: RelayState,
    failed: bool,
}

impl Exchange {
    fn new() -> Self {
        Self { id: Uuid::new_v4(), state: RelayState::Validating, failed: false }
    }

    fn advance(&mut self, next: RelayState) {
        debug!("[{}] {:?} -> {:?}", self.id, self.state, next);
        self.state = next;
    }

    fn fail(&mut self) {
        self.failed = true;
    }

    fn finish(&mut self) -> RelayState {
        let terminal = if self.failed { RelayState::Errored } else { RelayState::Done };
        self.advance(terminal);
        terminal
    }
}

/// Write side of the caller's channel. Stops writing once the caller is gone.
struct Forwarder {
    id: Uuid,
    tx: mpsc::Sender<Bytes>,
    open: bool,
}

impl Forwarder {
    async fn forward(&mut self, text: &str) {
        if !self.open || text.is_empty() {
            return;
        }
        if self.tx.send(Bytes::copy_from_slice(text.as_bytes())).await.is_err() {
            info!("[{}] Client disconnected, continuing without forwarding.", self.id);
            self.open = false;
        }
    }
}

pub struct ChatRelay {
    history: Arc<dyn HistoryStore>,
    providers: ProviderRegistry,
    default_provider: ProviderType,
    context_len: usize,
    commit_lock: Mutex<()>,
}

impl ChatRelay {
    pub fn new(
        history: Arc<dyn HistoryStore>,
        providers: ProviderRegistry,
        default_provider: ProviderType,
        context_len: usize
    ) -> Self {
        Self {
            history,
            providers,
            default_provider,
            context_len,
            commit_lock: Mutex::new(()),
        }
    }

    pub fn history(&self) -> &Arc<dyn HistoryStore> {
        &self.history
    }

    pub fn providers(&self) -> &ProviderRegistry {
        &self.providers
    }

    /// Only an absent or empty message is refused. Whitespace is a message.
    pub fn validate(request: &SendChatRequest) -> Result<(), InvalidRequest> {
        if request.message.is_empty() {
            return Err(InvalidRequest("Missing message for AI chat.".to_string()));
        }
        Ok(())
    }

    /// Validates synchronously, then runs the exchange in the background and
    /// returns the fragment stream. The stream ends once the exchange has
    /// been committed.
    pub fn send(
        self: &Arc<Self>,
        request: SendChatRequest
    ) -> Result<ReceiverStream<Bytes>, InvalidRequest> {
        Self::validate(&request)?;

        let (tx, rx) = mpsc::channel(SINK_CAPACITY);
        let relay = Arc::clone(self);
        tokio::spawn(async move {
            relay.run_exchange(request, tx).await;
        });
        Ok(ReceiverStream::new(rx))
    }

    /// Drives one exchange to completion, forwarding fragments into `sink`.
    pub async fn run_exchange(
        &self,
        request: SendChatRequest,
        sink: mpsc::Sender<Bytes>
    ) -> ExchangeOutcome {
        let mut exchange = Exchange::new();
        let mut forwarder = Forwarder { id: exchange.id, tx: sink, open: true };

        if let Err(e) = Self::validate(&request) {
            exchange.fail();
            exchange.finish();
            return ExchangeOutcome {
                state: RelayState::Errored,
                model_text: String::new(),
                error: Some(e.into()),
                client_disconnected: false,
                committed: false,
            };
        }

        info!(
            "[{}] Received message ({} chars) for provider {:?}",
            exchange.id,
            request.message.chars().count(),
            request.provider_tag().unwrap_or(self.default_provider.as_str())
        );

        exchange.advance(RelayState::Dispatching);
        let (model_text, error) = match self.dispatch(request.provider_tag()) {
            Err(e) => {
                warn!("[{}] {}", exchange.id, e);
                exchange.fail();
                forwarder.forward(NO_CONTENT_PLACEHOLDER).await;
                (NO_CONTENT_PLACEHOLDER.to_string(), Some(e))
            }
            Ok(client) => {
                let prior = self.prior_turns(exchange.id).await;
                exchange.advance(RelayState::Streaming);
                let (accumulated, failure) = Self::stream_answer(
                    client.as_ref(),
                    &request.message,
                    &prior,
                    &mut forwarder
                ).await;
                Self::settle(&mut exchange, &mut forwarder, accumulated, failure).await
            }
        };

        exchange.advance(RelayState::Committing);
        let committed = self.commit(exchange.id, &request.message, &model_text).await;
        let state = exchange.finish();

        ExchangeOutcome {
            state,
            model_text,
            error,
            client_disconnected: !forwarder.open,
            committed,
        }
    }

    fn dispatch(&self, tag: Option<&str>) -> Result<Arc<dyn ChatClient>, RelayError> {
        let provider = match tag.map(str::trim).filter(|t| !t.is_empty()) {
            None => self.default_provider,
            Some(tag) =>
                tag.parse::<ProviderType>().map_err(|e| RelayError::ProviderUnavailable {
                    provider: tag.to_string(),
                    reason: e.to_string(),
                })?,
        };

        self.providers.get(provider).ok_or_else(|| RelayError::ProviderUnavailable {
            provider: provider.to_string(),
            reason: "provider is not configured".to_string(),
        })
    }

    async fn prior_turns(&self, id: Uuid) -> Vec<ChatTurn> {
        match self.history.load().await {
            Ok(turns) => recent_turns(turns, self.context_len),
            Err(e) => {
                warn!("[{}] Could not read history for context: {}", id, e);
                Vec::new()
            }
        }
    }

    async fn stream_answer(
        client: &dyn ChatClient,
        message: &str,
        prior: &[ChatTurn],
        forwarder: &mut Forwarder
    ) -> (String, Option<ProviderError>) {
        let mut accumulated = String::new();

        let mut fragments = match client.complete_stream(message, prior).await {
            Ok(fragments) => fragments,
            Err(e) => {
                return (accumulated, Some(e));
            }
        };

        while let Some(item) = fragments.next().await {
            match item {
                Ok(fragment) => {
                    accumulated.push_str(&fragment);
                    forwarder.forward(&fragment).await;
                }
                Err(e) => {
                    return (accumulated, Some(e));
                }
            }
        }

        (accumulated, None)
    }

    /// Chooses the text to commit and tells the caller about any failure.
    async fn settle(
        exchange: &mut Exchange,
        forwarder: &mut Forwarder,
        accumulated: String,
        failure: Option<ProviderError>
    ) -> (String, Option<RelayError>) {
        match failure {
            None if !accumulated.is_empty() => {
                info!("[{}] Stream finished ({} chars).", exchange.id, accumulated.len());
                (accumulated, None)
            }
            None => {
                warn!("[{}] Provider returned an empty answer.", exchange.id);
                forwarder.forward(NO_CONTENT_PLACEHOLDER).await;
                (NO_CONTENT_PLACEHOLDER.to_string(), None)
            }
            Some(e) if accumulated.is_empty() => {
                error!("[{}] Provider failed before producing text: {}", exchange.id, e);
                exchange.fail();
                forwarder.forward(NO_CONTENT_PLACEHOLDER).await;
                (NO_CONTENT_PLACEHOLDER.to_string(), Some(e.into()))
            }
            Some(e) => {
                error!("[{}] Provider failed mid-stream: {}", exchange.id, e);
                exchange.fail();
                forwarder.forward(INCOMPLETE_SUFFIX).await;
                (accumulated + INCOMPLETE_SUFFIX, Some(e.into()))
            }
        }
    }

    async fn commit(&self, id: Uuid, user_text: &str, model_text: &str) -> bool {
        let _guard = self.commit_lock.lock().await;
        match self.history.append(user_text, model_text).await {
            Ok(()) => {
                debug!("[{}] Exchange committed.", id);
                true
            }
            Err(e) => {
                error!("[{}] Exchange could not be saved to history: {}", id, e);
                false
            }
        }
    }
}
