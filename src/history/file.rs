use async_trait::async_trait;
use chrono::Utc;
use log::{ debug, error, info, warn };
use std::io::ErrorKind;
use std::path::{ Path, PathBuf };

use super::HistoryStore;
use crate::error::PersistenceError;
use crate::models::chat::{ ChatTurn, Role };

/// Transcript kept as one pretty-printed JSON array on disk.
///
/// The file is opened fresh on every call and replaced whole on every append
/// (write to `<file>.tmp`, then rename).
pub struct FileHistoryStore {
    path: PathBuf,
}

enum Contents {
    Missing,
    Turns(Vec<ChatTurn>),
    Malformed(String),
}

impl FileHistoryStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn read_contents(&self) -> Result<Contents, PersistenceError> {
        let raw = match tokio::fs::read_to_string(&self.path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Ok(Contents::Missing);
            }
            Err(e) if e.kind() == ErrorKind::InvalidData => {
                return Ok(Contents::Malformed(format!("not valid UTF-8: {}", e)));
            }
            Err(e) => {
                return Err(e.into());
            }
        };

        if raw.trim().is_empty() {
            return Ok(Contents::Turns(Vec::new()));
        }

        match serde_json::from_str::<Vec<ChatTurn>>(&raw) {
            Ok(turns) => Ok(Contents::Turns(turns)),
            Err(e) => Ok(Contents::Malformed(e.to_string())),
        }
    }

    /// Moves unreadable content aside so it can be recovered by hand.
    async fn quarantine(&self) -> Result<PathBuf, PersistenceError> {
        let mut name = self.path.as_os_str().to_owned();
        name.push(format!(".corrupted.{}", Utc::now().timestamp_millis()));
        let backup = PathBuf::from(name);
        tokio::fs::rename(&self.path, &backup).await?;
        Ok(backup)
    }

    async fn write_all(&self, turns: &[ChatTurn]) -> Result<(), PersistenceError> {
        let json = serde_json::to_string_pretty(turns)?;
        let mut tmp = self.path.as_os_str().to_owned();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&tmp, json).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        Ok(())
    }
}

#[async_trait]
impl HistoryStore for FileHistoryStore {
    async fn load(&self) -> Result<Vec<ChatTurn>, PersistenceError> {
        match self.read_contents().await? {
            Contents::Missing => {
                debug!("Chat history file {} not found, starting fresh.", self.path.display());
                Ok(Vec::new())
            }
            Contents::Turns(turns) => Ok(turns),
            Contents::Malformed(reason) => {
                error!(
                    "Chat history file {} is malformed ({}). Treating as empty history.",
                    self.path.display(),
                    reason
                );
                Ok(Vec::new())
            }
        }
    }

    async fn append(&self, user_text: &str, model_text: &str) -> Result<(), PersistenceError> {
        let mut turns = match self.read_contents().await? {
            Contents::Missing => Vec::new(),
            Contents::Turns(turns) => turns,
            Contents::Malformed(reason) => {
                let backup = self.quarantine().await?;
                warn!(
                    "Chat history file {} was malformed ({}). Moved it to {} and started a new history.",
                    self.path.display(),
                    reason,
                    backup.display()
                );
                Vec::new()
            }
        };

        turns.push(ChatTurn::new(Role::User, user_text));
        turns.push(ChatTurn::new(Role::Model, model_text));

        self.write_all(&turns).await?;
        info!("Saved exchange to {} ({} turns total).", self.path.display(), turns.len());
        Ok(())
    }
}
