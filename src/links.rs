//! Link classification and share-URL normalization.
//!
//! Both functions are pure. The normalizer rewrites the known family of
//! cloud-host shareable links into a directly embeddable form; the
//! classifier decides what a labelled narrative link is meant to render as.

use url::Url;

/// Canonical embeddable template the recognized share shapes rewrite into.
const EMBED_TEMPLATE: &str = "https://drive.google.com/uc?export=view&id=";

/// Path prefix of the document host, used to upgrade narrative links into
/// document references.
const DOCUMENT_HOST_PATTERN: &str = "docs.google.com/document";

const VIDEO_KEYWORDS: &[&str] = &["vídeo", "video", "assistir", "watch"];
const IMAGE_KEYWORDS: &[&str] = &["imagem", "image", "foto", "photo", "ver", "view"];

/// Rewrite a shareable-file link into a stable, directly embeddable URL.
///
/// Recognized shapes, by path pattern on any host:
/// - `…/file/d/{id}/…`
/// - `…/open?id={id}`
/// - `…/uc?…id={id}…`
///
/// Unrecognized shapes pass through unchanged. Idempotent: the canonical
/// form re-extracts the same file id.
pub fn normalize_share_link(link: &str) -> String {
    let Ok(url) = Url::parse(link) else {
        return link.to_string();
    };

    if let Some(id) = extract_file_id(&url) {
        return format!("{EMBED_TEMPLATE}{id}");
    }
    link.to_string()
}

fn extract_file_id(url: &Url) -> Option<String> {
    let mut segments = url.path_segments()?;

    // `/file/d/{id}/...`
    let mut walker = segments.clone();
    while let Some(segment) = walker.next() {
        if segment == "file" && walker.clone().next() == Some("d") {
            walker.next();
            let id = walker.next()?;
            if !id.is_empty() {
                return Some(id.to_string());
            }
            return None;
        }
    }

    // `/open?id={id}` and `/uc?…id={id}`
    if segments.any(|s| s == "open" || s == "uc") {
        let id = url
            .query_pairs()
            .find(|(key, _)| key == "id")
            .map(|(_, value)| value.to_string())?;
        if !id.is_empty() {
            return Some(id);
        }
    }
    None
}

/// What a labelled link is meant to render as.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkKind {
    Image,
    Video,
    Document,
    /// Left in the narrative text as a normal hyperlink.
    Plain,
}

/// Classify a labelled link from its surrounding text.
///
/// Rules, in order: markdown image syntax wins; then video keywords in the
/// label; then image keywords; then the document-host pattern on the URL;
/// everything else stays a plain hyperlink (never dropped).
pub fn classify_link(label: &str, link: &str, is_markdown_image: bool) -> LinkKind {
    if is_markdown_image {
        return LinkKind::Image;
    }
    if label_has_keyword(label, VIDEO_KEYWORDS) {
        return LinkKind::Video;
    }
    if label_has_keyword(label, IMAGE_KEYWORDS) {
        return LinkKind::Image;
    }
    if link.contains(DOCUMENT_HOST_PATTERN) {
        return LinkKind::Document;
    }
    LinkKind::Plain
}

/// Whole-word keyword match, so "ver" does not fire inside "conversa".
fn label_has_keyword(label: &str, keywords: &[&str]) -> bool {
    let lowered = label.to_lowercase();
    lowered
        .split(|c: char| !c.is_alphanumeric())
        .any(|word| keywords.contains(&word))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalizes_file_d_shape() {
        assert_eq!(
            normalize_share_link("https://drive.google.com/file/d/ABC123/view?usp=sharing"),
            "https://drive.google.com/uc?export=view&id=ABC123"
        );
        // Path pattern matters, not the host.
        assert_eq!(
            normalize_share_link("https://host/file/d/ABC123/view"),
            "https://drive.google.com/uc?export=view&id=ABC123"
        );
    }

    #[test]
    fn normalizes_open_and_uc_shapes() {
        assert_eq!(
            normalize_share_link("https://drive.google.com/open?id=XYZ"),
            "https://drive.google.com/uc?export=view&id=XYZ"
        );
        assert_eq!(
            normalize_share_link("https://drive.google.com/uc?id=XYZ&export=download"),
            "https://drive.google.com/uc?export=view&id=XYZ"
        );
    }

    #[test]
    fn unrecognized_links_pass_through() {
        let link = "https://example.com/some/page";
        assert_eq!(normalize_share_link(link), link);
        assert_eq!(normalize_share_link("not a url"), "not a url");
    }

    #[test]
    fn normalization_is_idempotent() {
        let shapes = [
            "https://drive.google.com/file/d/ABC123/view",
            "https://drive.google.com/open?id=QQ9",
            "https://drive.google.com/uc?id=K2&export=download",
            "https://example.com/unrelated",
        ];
        for shape in shapes {
            let once = normalize_share_link(shape);
            assert_eq!(normalize_share_link(&once), once, "shape: {shape}");
        }
    }

    #[test]
    fn markdown_image_syntax_wins() {
        assert_eq!(
            classify_link("qualquer coisa", "https://example.com/x", true),
            LinkKind::Image
        );
    }

    #[test]
    fn keyword_classification() {
        assert_eq!(
            classify_link("Assistir Vídeo", "https://host/f", false),
            LinkKind::Video
        );
        assert_eq!(
            classify_link("Ver Imagem", "https://host/f", false),
            LinkKind::Image
        );
        assert_eq!(
            classify_link("Download da foto", "https://host/f", false),
            LinkKind::Image
        );
        // Video keywords outrank image keywords.
        assert_eq!(
            classify_link("Ver vídeo da campanha", "https://host/f", false),
            LinkKind::Video
        );
    }

    #[test]
    fn keywords_match_whole_words_only() {
        assert_eq!(
            classify_link("Abrir conversa", "https://example.com/x", false),
            LinkKind::Plain
        );
    }

    #[test]
    fn document_host_pattern_upgrades_to_document() {
        assert_eq!(
            classify_link(
                "Briefing da campanha",
                "https://docs.google.com/document/d/doc1/edit",
                false
            ),
            LinkKind::Document
        );
    }

    #[test]
    fn everything_else_stays_plain() {
        assert_eq!(
            classify_link("Saiba mais", "https://example.com/post", false),
            LinkKind::Plain
        );
    }
}
