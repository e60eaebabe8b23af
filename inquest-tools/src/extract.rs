//! Text extraction from HTML, PDF and plain-text documents.

use inquest_core::error::SourceError;
use inquest_core::research::{ContentKind, ExtractedText, RawDocument, TextExtractor};
use regex::Regex;
use std::sync::LazyLock;
use tracing::debug;

static MAIN_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)<main\b[^>]*>(.*)</main>").expect("static regex"));
static ARTICLE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)<article\b[^>]*>(.*)</article>").expect("static regex"));

/// Elements whose content is never body text.
const SKIPPED_ELEMENTS: &[&str] = &[
    "script", "style", "nav", "header", "footer", "aside", "form", "noscript", "svg",
];

/// Tags that start a new line of text.
const BLOCK_TAGS: &[&str] = &[
    "p", "br", "div", "h1", "h2", "h3", "h4", "h5", "h6", "li", "tr", "section", "blockquote",
    "pre", "table",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Format {
    Html,
    Pdf,
    Text,
}

fn detect_format(raw: &RawDocument) -> Option<Format> {
    let content_type = raw
        .content_type
        .as_deref()
        .map(|ct| ct.split(';').next().unwrap_or("").trim().to_ascii_lowercase())
        .unwrap_or_default();
    let location = raw.location.to_ascii_lowercase();
    let location = location.split(['?', '#']).next().unwrap_or("");

    if content_type == "application/pdf" || location.ends_with(".pdf") || raw.body.starts_with(b"%PDF")
    {
        return Some(Format::Pdf);
    }
    if content_type == "text/html" || content_type == "application/xhtml+xml" {
        return Some(Format::Html);
    }
    if content_type.starts_with("text/")
        || content_type == "application/json"
        || content_type.ends_with("+json")
    {
        return Some(Format::Text);
    }
    if content_type.is_empty() {
        if location.ends_with(".html") || location.ends_with(".htm") {
            return Some(Format::Html);
        }
        let head = String::from_utf8_lossy(&raw.body[..raw.body.len().min(512)]).to_lowercase();
        if head.trim_start().starts_with("<!doctype html") || head.contains("<html") {
            return Some(Format::Html);
        }
        if std::str::from_utf8(&raw.body).is_ok() {
            return Some(Format::Text);
        }
    }
    None
}

/// Strip tags and non-content elements from an HTML page.
///
/// The `<main>` or `<article>` element is used when present.
pub fn extract_text_from_html(html: &str) -> String {
    let scope = MAIN_RE
        .captures(html)
        .or_else(|| ARTICLE_RE.captures(html))
        .and_then(|c| c.get(1))
        .map(|m| m.as_str())
        .unwrap_or(html);

    let mut text = String::new();
    let mut in_tag = false;
    let mut building_tag = false;
    let mut tag_name = String::new();
    let mut skipping: Option<String> = None;

    for ch in scope.chars() {
        if ch == '<' {
            in_tag = true;
            building_tag = true;
            tag_name.clear();
            continue;
        }
        if ch == '>' && in_tag {
            in_tag = false;
            building_tag = false;
            let tag = tag_name.to_lowercase();
            let (closing, name) = match tag.strip_prefix('/') {
                Some(name) => (true, name),
                None => (false, tag.as_str()),
            };

            match &skipping {
                Some(open) if closing && open == name => skipping = None,
                Some(_) => {}
                None if !closing && SKIPPED_ELEMENTS.contains(&name) => {
                    skipping = Some(name.to_string());
                }
                None if BLOCK_TAGS.contains(&name) => text.push('\n'),
                None => {}
            }
            continue;
        }
        if in_tag {
            if building_tag && (ch.is_alphanumeric() || ch == '/') {
                tag_name.push(ch);
            } else {
                building_tag = false;
            }
            continue;
        }
        if skipping.is_none() {
            text.push(ch);
        }
    }

    let text = text
        .replace("&nbsp;", " ")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&apos;", "'")
        .replace("&amp;", "&");

    text.lines()
        .map(|l| l.split_whitespace().collect::<Vec<_>>().join(" "))
        .filter(|l| !l.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

/// Extractor for the document types the fetcher returns.
#[derive(Debug, Default, Clone, Copy)]
pub struct DocumentExtractor;

impl DocumentExtractor {
    pub fn new() -> Self {
        Self
    }
}

impl TextExtractor for DocumentExtractor {
    fn extract(&self, raw: &RawDocument) -> Result<ExtractedText, SourceError> {
        let unparseable = |content_type: &str| SourceError::Unparseable {
            location: raw.location.clone(),
            content_type: content_type.to_string(),
        };

        let format = detect_format(raw).ok_or_else(|| {
            unparseable(raw.content_type.as_deref().unwrap_or("unknown"))
        })?;

        let (text, kind) = match format {
            Format::Pdf => {
                let text = pdf_extract::extract_text_from_mem(&raw.body).map_err(|e| {
                    debug!(location = %raw.location, error = %e, "PDF extraction failed");
                    unparseable("application/pdf")
                })?;
                (text, ContentKind::Pdf)
            }
            Format::Html => (
                extract_text_from_html(&String::from_utf8_lossy(&raw.body)),
                ContentKind::Html,
            ),
            Format::Text => {
                let text = String::from_utf8(raw.body.clone())
                    .map_err(|_| unparseable(raw.content_type.as_deref().unwrap_or("text")))?;
                (text, ContentKind::Text)
            }
        };

        if text.trim().is_empty() {
            return Err(SourceError::Empty {
                location: raw.location.clone(),
            });
        }
        Ok(ExtractedText {
            text: text.trim().to_string(),
            kind,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn raw(location: &str, content_type: Option<&str>, body: &[u8]) -> RawDocument {
        RawDocument {
            location: location.to_string(),
            content_type: content_type.map(str::to_string),
            body: body.to_vec(),
        }
    }

    #[test]
    fn test_extract_text_from_html() {
        let html = r#"<html><head><title>T</title><style>body{}</style></head>
            <body><nav>Home | About</nav><h1>Qubits</h1><p>A qubit holds &amp; mixes states.</p>
            <script>track()</script><footer>Copyright</footer></body></html>"#;
        let text = extract_text_from_html(html);
        assert!(text.contains("Qubits"));
        assert!(text.contains("A qubit holds & mixes states."));
        assert!(!text.contains("track()"));
        assert!(!text.contains("Home | About"));
        assert!(!text.contains("Copyright"));
        assert!(!text.contains("body{}"));
    }

    #[test]
    fn test_extract_prefers_main_element() {
        let html = "<body><div>Sidebar links</div><main><p>The real article.</p></main></body>";
        assert_eq!(extract_text_from_html(html), "The real article.");
    }

    #[test]
    fn test_extract_html_by_content_type() {
        let doc = raw(
            "https://a.org",
            Some("text/html; charset=utf-8"),
            b"<p>Hello <b>world</b></p>",
        );
        let out = DocumentExtractor.extract(&doc).unwrap();
        assert_eq!(out.kind, ContentKind::Html);
        assert_eq!(out.text, "Hello world");
    }

    #[test]
    fn test_extract_plain_text_and_markdown() {
        let doc = raw("notes.md", Some("text/markdown"), b"# Notes\n\nSome text.");
        let out = DocumentExtractor.extract(&doc).unwrap();
        assert_eq!(out.kind, ContentKind::Text);
        assert!(out.text.starts_with("# Notes"));
    }

    #[test]
    fn test_whitespace_only_is_empty() {
        let doc = raw("https://a.org/blank", Some("text/plain"), b"   \n\t ");
        assert!(matches!(
            DocumentExtractor.extract(&doc),
            Err(SourceError::Empty { .. })
        ));
        let doc = raw("https://a.org/blank", Some("text/html"), b"<script>x()</script>");
        assert!(matches!(
            DocumentExtractor.extract(&doc),
            Err(SourceError::Empty { .. })
        ));
    }

    #[test]
    fn test_binary_is_unparseable() {
        let doc = raw("https://a.org/img", Some("image/png"), &[0x89, 0x50, 0x4e, 0x47]);
        assert!(matches!(
            DocumentExtractor.extract(&doc),
            Err(SourceError::Unparseable { .. })
        ));
    }

    #[test]
    fn test_pdf_detected_by_type_extension_or_magic() {
        assert_eq!(
            detect_format(&raw("x", Some("application/pdf"), b"")),
            Some(Format::Pdf)
        );
        assert_eq!(
            detect_format(&raw("https://a.org/paper.PDF?dl=1", None, b"")),
            Some(Format::Pdf)
        );
        assert_eq!(detect_format(&raw("x", None, b"%PDF-1.7")), Some(Format::Pdf));
    }

    #[test]
    fn test_detect_format_sniffs_untyped_bodies() {
        assert_eq!(
            detect_format(&raw("x", None, b"<!DOCTYPE html><html></html>")),
            Some(Format::Html)
        );
        assert_eq!(detect_format(&raw("x", None, b"plain words")), Some(Format::Text));
        assert_eq!(detect_format(&raw("x", None, &[0xff, 0xfe, 0x00])), None);
    }
}
