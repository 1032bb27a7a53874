//! Conversation history: the external store contract plus a file-backed
//! implementation, and the adapter that replays persisted transcripts
//! through the same extraction path used for live streaming.

use crate::extract;
use crate::types::{ChatMessage, Role, UploadedAttachment};
use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tracing::{debug, info, warn};

/// A persisted conversation transcript.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Conversation {
    pub id: String,
    pub title: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub messages: Vec<StoredMessage>,
}

/// One persisted message: the turn's display text (for assistant turns,
/// [`crate::reducer::display_text`] of the final state, so placeholder and
/// error substitution are already applied) plus the tool-result payloads
/// collected during it. Artifacts are not persisted; they are re-extracted
/// on load so historical and live messages render identically.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct StoredMessage {
    pub role: Role,
    pub content: String,
    #[serde(default)]
    pub tool_results: Vec<serde_json::Value>,
    #[serde(default)]
    pub attachments: Vec<UploadedAttachment>,
    pub timestamp: DateTime<Utc>,
}

/// Metadata for listing conversations without loading transcripts.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct ConversationSummary {
    pub id: String,
    pub title: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub message_count: usize,
}

/// The external store contract. The pipeline only depends on this surface;
/// persistence details belong to the collaborator behind it.
pub trait ConversationStore: Send + Sync {
    fn list(&self) -> Result<Vec<ConversationSummary>>;
    fn get(&self, id: &str) -> Result<Option<Conversation>>;
    fn rename(&mut self, id: &str, title: &str) -> Result<bool>;
    fn delete(&mut self, id: &str) -> Result<bool>;
    fn save(&mut self, conversation: &Conversation) -> Result<()>;
}

/// Replay a persisted transcript through the extraction engine.
///
/// Each assistant message's text and attached tool results run through the
/// exact pipeline live frames end in, so a reloaded conversation is
/// indistinguishable from one assembled in real time.
pub fn hydrate(conversation: &Conversation) -> Vec<ChatMessage> {
    conversation
        .messages
        .iter()
        .enumerate()
        .map(|(index, stored)| {
            let id = format!("{}-{}", conversation.id, index);
            match stored.role {
                Role::User => ChatMessage {
                    id,
                    role: Role::User,
                    raw_content: stored.content.clone(),
                    tool_results: Vec::new(),
                    media: Vec::new(),
                    documents: Vec::new(),
                    attachments: stored.attachments.clone(),
                    timestamp: stored.timestamp,
                },
                Role::Assistant => {
                    let extracted =
                        extract::extract_artifacts(&stored.content, &stored.tool_results, &[]);
                    ChatMessage {
                        id,
                        role: Role::Assistant,
                        raw_content: extracted.cleaned_text,
                        tool_results: stored.tool_results.clone(),
                        media: extracted.media,
                        documents: extracted.documents,
                        attachments: stored.attachments.clone(),
                        timestamp: stored.timestamp,
                    }
                }
            }
        })
        .collect()
}

/// File-backed store: one JSON file per conversation plus a summary index,
/// rebuilt from the conversation files when it cannot be parsed.
pub struct FileConversationStore {
    root_dir: PathBuf,
}

impl FileConversationStore {
    pub fn new() -> Self {
        let root_dir = dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("chat-pipeline");
        info!("Storing conversations in: {:?}", root_dir);
        Self { root_dir }
    }

    pub fn with_root(root_dir: PathBuf) -> Self {
        Self { root_dir }
    }

    fn ensure_dir(&self) -> Result<PathBuf> {
        let dir = self.root_dir.join("conversations");
        if !dir.exists() {
            std::fs::create_dir_all(&dir)?;
        }
        Ok(dir)
    }

    fn conversation_path(&self, id: &str) -> Result<PathBuf> {
        Ok(self.ensure_dir()?.join(format!("{id}.json")))
    }

    fn index_path(&self) -> Result<PathBuf> {
        Ok(self.ensure_dir()?.join("index.json"))
    }

    fn write_index(&self, summaries: &[ConversationSummary]) -> Result<()> {
        let json = serde_json::to_string_pretty(summaries)?;
        std::fs::write(self.index_path()?, json)?;
        Ok(())
    }

    fn rebuild_index(&self) -> Result<Vec<ConversationSummary>> {
        let mut summaries = Vec::new();
        let dir = self.ensure_dir()?;
        for entry in std::fs::read_dir(dir)? {
            let path = entry?.path();
            if path.extension().and_then(|s| s.to_str()) != Some("json") {
                continue;
            }
            let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            if stem == "index" {
                continue;
            }
            match self.get(stem) {
                Ok(Some(conversation)) => summaries.push(summary_of(&conversation)),
                Ok(None) => {}
                Err(e) => warn!("Skipping unreadable conversation {stem}: {e}"),
            }
        }
        if !summaries.is_empty() {
            if let Err(e) = self.write_index(&summaries) {
                warn!("Failed to save rebuilt index: {e}");
            } else {
                info!("Rebuilt index for {} conversations", summaries.len());
            }
        }
        Ok(summaries)
    }
}

impl Default for FileConversationStore {
    fn default() -> Self {
        Self::new()
    }
}

impl ConversationStore for FileConversationStore {
    fn list(&self) -> Result<Vec<ConversationSummary>> {
        let index_path = self.index_path()?;
        let mut summaries: Vec<ConversationSummary> = if index_path.exists() {
            let content = std::fs::read_to_string(&index_path)?;
            match serde_json::from_str(&content) {
                Ok(list) => list,
                Err(e) => {
                    warn!("Conversation index unreadable, rebuilding: {e}");
                    self.rebuild_index()?
                }
            }
        } else {
            Vec::new()
        };

        // Newest first.
        summaries.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(summaries)
    }

    fn get(&self, id: &str) -> Result<Option<Conversation>> {
        let path = self.conversation_path(id)?;
        if !path.exists() {
            return Ok(None);
        }
        debug!("Loading conversation from {}", path.display());
        let json = std::fs::read_to_string(path)?;
        Ok(Some(serde_json::from_str(&json)?))
    }

    fn rename(&mut self, id: &str, title: &str) -> Result<bool> {
        let Some(mut conversation) = self.get(id)? else {
            return Ok(false);
        };
        conversation.title = title.to_string();
        conversation.updated_at = Utc::now();
        self.save(&conversation)?;
        Ok(true)
    }

    fn delete(&mut self, id: &str) -> Result<bool> {
        let path = self.conversation_path(id)?;
        let existed = path.exists();
        if existed {
            debug!("Deleting conversation file {}", path.display());
            std::fs::remove_file(path)?;
        }

        let index_path = self.index_path()?;
        if index_path.exists() {
            let content = std::fs::read_to_string(&index_path)?;
            let mut summaries: Vec<ConversationSummary> =
                serde_json::from_str(&content).unwrap_or_default();
            summaries.retain(|s| s.id != id);
            self.write_index(&summaries)?;
        }
        Ok(existed)
    }

    fn save(&mut self, conversation: &Conversation) -> Result<()> {
        let path = self.conversation_path(&conversation.id)?;
        debug!("Saving conversation to {}", path.display());
        let json = serde_json::to_string_pretty(conversation)?;
        std::fs::write(path, json)?;

        let index_path = self.index_path()?;
        let mut summaries: Vec<ConversationSummary> = if index_path.exists() {
            let content = std::fs::read_to_string(&index_path)?;
            serde_json::from_str(&content).unwrap_or_default()
        } else {
            Vec::new()
        };

        let summary = summary_of(conversation);
        if let Some(existing) = summaries.iter_mut().find(|s| s.id == conversation.id) {
            *existing = summary;
        } else {
            summaries.push(summary);
        }
        self.write_index(&summaries)
    }
}

fn summary_of(conversation: &Conversation) -> ConversationSummary {
    ConversationSummary {
        id: conversation.id.clone(),
        title: conversation.title.clone(),
        created_at: conversation.created_at,
        updated_at: conversation.updated_at,
        message_count: conversation.messages.len(),
    }
}

/// Generate a unique conversation id.
pub fn generate_conversation_id() -> String {
    let timestamp = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis();
    format!("conv_{timestamp:x}_{:x}", std::process::id())
}
