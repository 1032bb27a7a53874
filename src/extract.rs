//! Artifact extraction engine.
//!
//! Two differently-shaped, partially-overlapping sources of truth feed one
//! deduplicated result set: structured tool results (authoritative) and the
//! free-form narrative text. Pass 1 walks the tool results; pass 2 walks the
//! text line by line, dropping lines whose link already produced an artifact
//! and upgrading the rest. Surviving lines are rejoined in original order.

use crate::links::{self, LinkKind};
use crate::types::{DocumentArtifact, MediaArtifact, MediaKind};
use regex::Regex;
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::sync::OnceLock;
use tracing::debug;

/// List-shaped tool-result fields that may carry artifact entries, in
/// priority order. The first present field wins for a given result.
const LIST_FIELDS: &[&str] = &["contents", "files", "items", "attachments"];

/// Per-entry link fields, in priority order.
const LINK_FIELDS: &[&str] = &["driveLink", "link", "url", "fileUrl"];

fn image_link_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"!\[([^\]]*)\]\(([^)\s]+)\)").unwrap())
}

fn plain_link_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\[([^\]]+)\]\(([^)\s]+)\)").unwrap())
}

/// Output of the extraction engine.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ExtractedMessage {
    /// Narrative text with embedded artifact references stripped, surviving
    /// lines in original order.
    pub cleaned_text: String,
    pub media: Vec<MediaArtifact>,
    pub documents: Vec<DocumentArtifact>,
}

/// Structured document metadata recovered from tool results, used to upgrade
/// a narrative-text link into a clickable, typed reference. Built per
/// message, never persisted.
#[derive(Debug, Default)]
pub struct LinkIndex {
    by_link: HashMap<String, DocMeta>,
}

#[derive(Debug, Clone)]
struct DocMeta {
    id: String,
    kind: String,
    title: String,
}

impl LinkIndex {
    fn insert(&mut self, normalized_link: &str, doc: &DocumentArtifact) {
        self.by_link.insert(
            normalized_link.to_string(),
            DocMeta {
                id: doc.id.clone(),
                kind: doc.kind.clone(),
                title: doc.title.clone(),
            },
        );
    }

    fn resolve(&self, normalized_link: &str) -> Option<&DocMeta> {
        self.by_link.get(normalized_link)
    }
}

struct Collector {
    media: Vec<MediaArtifact>,
    documents: Vec<DocumentArtifact>,
    index: LinkIndex,
    /// Normalized links already owning an artifact, across both categories.
    seen_links: HashSet<String>,
    seen_doc_ids: HashSet<String>,
}

impl Collector {
    fn new() -> Self {
        Self {
            media: Vec::new(),
            documents: Vec::new(),
            index: LinkIndex::default(),
            seen_links: HashSet::new(),
            seen_doc_ids: HashSet::new(),
        }
    }

    fn add_media(&mut self, artifact: MediaArtifact) {
        let key = artifact.display_url.clone();
        if self.seen_links.insert(key) {
            self.media.push(artifact);
        }
    }

    fn add_document(&mut self, artifact: DocumentArtifact) {
        if !artifact.source_link.is_empty() {
            let key = links::normalize_share_link(&artifact.source_link);
            if !self.seen_links.insert(key.clone()) {
                return;
            }
            self.index.insert(&key, &artifact);
        }
        if self.seen_doc_ids.insert(artifact.id.clone()) {
            self.documents.push(artifact);
        }
    }
}

/// Run both extraction passes over a reply's text and tool results.
///
/// `eager_documents` are artifacts surfaced by `document` frames during
/// streaming; they are seeded ahead of pass 1 and participate in dedup.
pub fn extract_artifacts(
    text: &str,
    tool_results: &[Value],
    eager_documents: &[DocumentArtifact],
) -> ExtractedMessage {
    let mut collector = Collector::new();

    for doc in eager_documents {
        collector.add_document(doc.clone());
    }

    // Pass 1: structured tool results are the source of truth. Nothing in
    // pass 2 may override a link resolved here.
    for result in tool_results {
        collect_from_tool_result(result, &mut collector);
    }

    // Pass 2: line-oriented scan of the narrative text.
    let mut surviving = Vec::new();
    for line in text.lines() {
        if keep_line(line, &mut collector) {
            surviving.push(line);
        }
    }

    ExtractedMessage {
        cleaned_text: surviving.join("\n"),
        media: collector.media,
        documents: collector.documents,
    }
}

fn collect_from_tool_result(result: &Value, collector: &mut Collector) {
    let Some(entries) = LIST_FIELDS
        .iter()
        .find_map(|field| result.get(field).and_then(Value::as_array))
    else {
        return;
    };

    for entry in entries {
        let Some(link) = LINK_FIELDS
            .iter()
            .find_map(|field| entry.get(field).and_then(Value::as_str))
        else {
            debug!("Tool result entry without a link, skipping: {entry}");
            continue;
        };
        let title = entry
            .get("title")
            .or_else(|| entry.get("name"))
            .and_then(Value::as_str);
        let tag = entry
            .get("type")
            .or_else(|| entry.get("kind"))
            .and_then(Value::as_str)
            .unwrap_or("generic");

        match tag {
            "image" | "video" => {
                let kind = if tag == "video" {
                    MediaKind::Video
                } else {
                    MediaKind::Image
                };
                collector.add_media(MediaArtifact {
                    id: link.to_string(),
                    kind,
                    display_url: links::normalize_share_link(link),
                    title: title.unwrap_or(default_media_title(kind)).to_string(),
                    source_title: title.map(str::to_string),
                });
            }
            _ => {
                let id = entry
                    .get("id")
                    .and_then(Value::as_str)
                    .unwrap_or(link)
                    .to_string();
                collector.add_document(DocumentArtifact {
                    id,
                    kind: tag.to_string(),
                    title: title.unwrap_or("Documento").to_string(),
                    source_link: link.to_string(),
                    content: entry
                        .get("content")
                        .and_then(Value::as_str)
                        .map(str::to_string),
                });
            }
        }
    }
}

/// Decide one narrative line's fate: `true` keeps it verbatim, `false`
/// drops it after (possibly) adding an artifact for it.
fn keep_line(line: &str, collector: &mut Collector) -> bool {
    let (label, link, is_image_syntax) =
        if let Some(caps) = image_link_regex().captures(line) {
            (caps[1].to_string(), caps[2].to_string(), true)
        } else if let Some(caps) = plain_link_regex().captures(line) {
            (caps[1].to_string(), caps[2].to_string(), false)
        } else {
            return true;
        };

    let normalized = links::normalize_share_link(&link);

    match links::classify_link(&label, &link, is_image_syntax) {
        LinkKind::Image | LinkKind::Video
            if collector.seen_links.contains(&normalized) =>
        {
            // Already produced by a tool result (or an earlier line): the
            // authoritative artifact stands, the duplicate line goes.
            false
        }
        kind @ (LinkKind::Image | LinkKind::Video) => {
            let media_kind = if kind == LinkKind::Video {
                MediaKind::Video
            } else {
                MediaKind::Image
            };
            let title = clean_label(&label);
            collector.add_media(MediaArtifact {
                id: link,
                kind: media_kind,
                display_url: normalized,
                title: if title.is_empty() {
                    default_media_title(media_kind).to_string()
                } else {
                    title
                },
                source_title: None,
            });
            false
        }
        LinkKind::Document => {
            if let Some(meta) = collector.index.resolve(&normalized) {
                // Known from structured output; the typed artifact already
                // exists, so the narrative duplicate is dropped.
                debug!("Narrative link resolved to document {}", meta.id);
                return false;
            }
            let title = clean_label(&label);
            collector.add_document(DocumentArtifact {
                id: link.clone(),
                kind: "generic".to_string(),
                title: if title.is_empty() { link } else { title },
                source_link: normalized,
                content: None,
            });
            false
        }
        // Unclassifiable links are rendered as normal hyperlinks, never
        // dropped silently.
        LinkKind::Plain => true,
    }
}

/// Titles come from link labels stripped of leading bullets and a trailing
/// colon.
fn clean_label(label: &str) -> String {
    label
        .trim()
        .trim_start_matches(['-', '*', '•'])
        .trim_end_matches(':')
        .trim()
        .to_string()
}

fn default_media_title(kind: MediaKind) -> &'static str {
    match kind {
        MediaKind::Image => "Imagem",
        MediaKind::Video => "Vídeo",
    }
}
