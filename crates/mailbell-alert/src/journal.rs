//! JSONL journal of delivered alerts (`~/.mailbell/alerts.jsonl`).

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use mailbell_core::{AlertEvent, MailbellError, Result};
use serde::{Deserialize, Serialize};
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

/// One journal line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JournalEntry {
    /// When the alert was dispatched
    pub received_at: DateTime<Utc>,
    pub subject: String,
    pub sender: String,
    /// Server-side event timestamp
    pub timestamp: f64,
    /// Alert session that delivered it
    pub session_id: String,
    /// Whether the alert extended an already ringing session
    pub extended: bool,
}

impl JournalEntry {
    pub fn new(event: &AlertEvent, session_id: impl Into<String>, extended: bool) -> Self {
        Self {
            received_at: Utc::now(),
            subject: event.subject.clone(),
            sender: event.sender.clone(),
            timestamp: event.timestamp,
            session_id: session_id.into(),
            extended,
        }
    }
}

/// Append-only alert journal.
pub struct AlertJournal {
    path: PathBuf,
    file: Mutex<File>,
}

impl AlertJournal {
    /// Open (or create) the journal at `path`.
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| MailbellError::DirectoryCreation {
                    path: parent.to_path_buf(),
                    source: e,
                })?;
        }

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await
            .map_err(|e| MailbellError::io("opening alert journal", &path, e))?;

        Ok(Self {
            path,
            file: Mutex::new(file),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn append(&self, entry: &JournalEntry) -> Result<()> {
        let json = serde_json::to_string(entry)
            .map_err(|e| MailbellError::json_parse("alert journal entry", e))?;
        let line = format!("{json}\n");

        let mut file = self.file.lock().await;
        file.write_all(line.as_bytes())
            .await
            .map_err(|e| MailbellError::io("writing alert journal", &self.path, e))?;
        file.flush()
            .await
            .map_err(|e| MailbellError::io("flushing alert journal", &self.path, e))?;

        Ok(())
    }

    /// Read every entry back, skipping lines that do not parse.
    pub async fn read_all(path: impl AsRef<Path>) -> Result<Vec<JournalEntry>> {
        let path = path.as_ref();
        let content = match tokio::fs::read_to_string(path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(MailbellError::io("reading alert journal", path, e)),
        };

        Ok(content
            .lines()
            .filter_map(|line| serde_json::from_str(line).ok())
            .collect())
    }
}
