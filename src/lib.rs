//! Conversational streaming pipeline for the assistant backend.
//!
//! This crate implements:
//! - Incremental decoding of the line-oriented event-frame stream, invariant
//!   under transport chunk boundaries
//! - Assembly of one in-flight assistant reply via pure reducer functions
//! - Classification and normalization of shareable-file links
//! - Extraction of media and document artifacts from tool results and
//!   narrative text, deduplicated across both sources
//! - Replay of persisted conversations through the same extraction path

#[cfg(test)]
mod tests;

pub mod client;
pub mod extract;
pub mod history;
pub mod links;
pub mod logging;
pub mod reducer;
pub mod sse;
pub mod types;
pub mod upload;

pub use client::{ChatClient, ChatRequest, SessionTokenProvider, StreamingCallback};
pub use extract::{extract_artifacts, ExtractedMessage};
pub use history::{Conversation, ConversationStore, FileConversationStore};
pub use types::*;
