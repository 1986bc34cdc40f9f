mod file;

pub use file::FileHistoryStore;

use async_trait::async_trait;
use log::{ info, warn };
use std::sync::Arc;

use crate::cli::Args;
use crate::error::PersistenceError;
use crate::models::chat::{ iso_millis, ChatMessage, ChatTurn, Role, Sender };

/// Append-only transcript of chat exchanges.
///
/// Implementations keep no authoritative in-memory copy: every call goes to
/// the backing medium. There is no locking; callers serialize `append`.
#[async_trait]
pub trait HistoryStore: Send + Sync {
    /// Missing or malformed content reads as an empty transcript.
    async fn load(&self) -> Result<Vec<ChatTurn>, PersistenceError>;

    /// Appends one user turn and one model turn as a single replace.
    async fn append(&self, user_text: &str, model_text: &str) -> Result<(), PersistenceError>;
}

pub fn initialize_history_store(args: &Args) -> Arc<dyn HistoryStore> {
    info!("Chat history will be stored in: {}", args.history_file.display());
    Arc::new(FileHistoryStore::new(args.history_file.clone()))
}

/// Loads the transcript and reshapes it for the client, oldest first.
///
/// Store failures yield an empty list so the UI starts fresh.
pub async fn load_chat_messages(store: &dyn HistoryStore) -> Vec<ChatMessage> {
    match store.load().await {
        Ok(turns) => to_chat_messages(&turns),
        Err(e) => {
            warn!("Failed to load chat history, returning empty history: {}", e);
            Vec::new()
        }
    }
}

pub fn to_chat_messages(turns: &[ChatTurn]) -> Vec<ChatMessage> {
    let mut indexed: Vec<(usize, &ChatTurn)> = turns.iter().enumerate().collect();
    // Stable: turns sharing a timestamp keep file order.
    indexed.sort_by_key(|(_, turn)| turn.timestamp);

    indexed
        .into_iter()
        .map(|(index, turn)| ChatMessage {
            id: format!("hist-{}-{}-{}", index, turn.role.as_str(), turn.timestamp.timestamp_millis()),
            text: turn.text.clone(),
            sender: Sender::from(turn.role),
            timestamp: iso_millis::format(&turn.timestamp),
            is_streaming: None,
        })
        .collect()
}

/// The trailing `limit` turns, trimmed so the slice starts on a user turn.
pub fn recent_turns(turns: Vec<ChatTurn>, limit: usize) -> Vec<ChatTurn> {
    let start = turns.len().saturating_sub(limit);
    let mut recent: Vec<ChatTurn> = turns.into_iter().skip(start).collect();
    while recent.first().map_or(false, |t| t.role != Role::User) {
        recent.remove(0);
    }
    recent
}
