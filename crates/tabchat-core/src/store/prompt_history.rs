use std::path::{Path, PathBuf};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;

use super::{PromptHistory, StoreError};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PromptEntry {
    pub text: String,
    pub timestamp: DateTime<Utc>,
}

/// Prompt history appended as JSON lines to a file.
#[derive(Debug, Clone)]
pub struct FilePromptHistory {
    path: PathBuf,
}

impl FilePromptHistory {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// `{data_dir}/tabchat/prompt_history.jsonl`
    pub fn default_path() -> Option<PathBuf> {
        dirs::data_dir().map(|dir| dir.join("tabchat").join("prompt_history.jsonl"))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Reads back every entry, skipping lines that no longer parse.
    pub async fn entries(&self) -> Result<Vec<PromptEntry>, StoreError> {
        let contents = match tokio::fs::read_to_string(&self.path).await {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        Ok(contents
            .lines()
            .filter_map(|line| serde_json::from_str(line).ok())
            .collect())
    }
}

#[async_trait]
impl PromptHistory for FilePromptHistory {
    async fn add_prompt(&self, text: &str) -> Result<(), StoreError> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let entry = PromptEntry {
            text: text.to_string(),
            timestamp: Utc::now(),
        };
        let mut line =
            serde_json::to_string(&entry).map_err(|e| StoreError::serialization(e.to_string()))?;
        line.push('\n');

        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        file.write_all(line.as_bytes()).await?;
        file.flush().await?;
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct InMemoryPromptHistory {
    prompts: Mutex<Vec<String>>,
}

impl InMemoryPromptHistory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn prompts(&self) -> Vec<String> {
        self.prompts
            .lock()
            .map(|prompts| prompts.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl PromptHistory for InMemoryPromptHistory {
    async fn add_prompt(&self, text: &str) -> Result<(), StoreError> {
        self.prompts
            .lock()
            .map_err(|_| StoreError::lock_poisoned("prompts"))?
            .push(text.to_string());
        Ok(())
    }
}
