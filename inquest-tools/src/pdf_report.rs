//! PDF report renderer built on `genpdf`.
//!
//! The document is laid out from the Markdown rendering so both formats
//! carry the same content.

use genpdf::elements::{Break, Paragraph};
use genpdf::fonts::{FontData, FontFamily};
use genpdf::style::{Style, StyledString};
use genpdf::{Document, SimplePageDecorator};
use inquest_core::error::RenderError;
use inquest_core::research::{MarkdownRenderer, ReportFormat, ReportRenderer, ResearchReport};
use std::path::PathBuf;
use tracing::debug;

/// Font directories and family names tried in order.
fn default_font_candidates() -> Vec<(PathBuf, String)> {
    [
        ("/usr/share/fonts/truetype/liberation", "LiberationSans"),
        ("/usr/share/fonts/liberation", "LiberationSans"),
        ("/usr/share/fonts/truetype/dejavu", "DejaVuSans"),
        ("/System/Library/Fonts", "Helvetica"),
        ("/Library/Fonts", "Arial"),
        ("C:\\Windows\\Fonts", "arial"),
    ]
    .iter()
    .map(|(dir, family)| (PathBuf::from(dir), family.to_string()))
    .collect()
}

/// One block of the Markdown layout.
#[derive(Debug, Clone, PartialEq)]
enum Block {
    Heading { level: usize, text: String },
    Paragraph(String),
}

/// Split Markdown into headings and paragraphs, dropping HTML anchors and
/// emphasis markers.
fn markdown_blocks(markdown: &str) -> Vec<Block> {
    let mut blocks = Vec::new();
    let mut paragraph: Vec<String> = Vec::new();

    let flush = |paragraph: &mut Vec<String>, blocks: &mut Vec<Block>| {
        if !paragraph.is_empty() {
            blocks.push(Block::Paragraph(paragraph.join(" ")));
            paragraph.clear();
        }
    };

    for line in markdown.lines() {
        let line = line.trim();
        if line.is_empty() || (line.starts_with("<a ") && line.ends_with("</a>")) {
            flush(&mut paragraph, &mut blocks);
            continue;
        }
        let level = line.chars().take_while(|&c| c == '#').count();
        if level > 0 && line[level..].starts_with(' ') {
            flush(&mut paragraph, &mut blocks);
            blocks.push(Block::Heading {
                level,
                text: line[level..].trim().to_string(),
            });
            continue;
        }
        let cleaned = line.replace("**", "").replace('*', "");
        // List items keep their own line.
        if cleaned.starts_with("- ") || cleaned.starts_with("> ") {
            flush(&mut paragraph, &mut blocks);
            blocks.push(Block::Paragraph(cleaned));
        } else {
            paragraph.push(cleaned);
        }
    }
    flush(&mut paragraph, &mut blocks);
    blocks
}

pub struct PdfRenderer {
    font_candidates: Vec<(PathBuf, String)>,
}

impl Default for PdfRenderer {
    fn default() -> Self {
        Self::new()
    }
}

impl PdfRenderer {
    pub fn new() -> Self {
        Self {
            font_candidates: default_font_candidates(),
        }
    }

    /// Search only these `(directory, family)` pairs for a font.
    pub fn with_fonts(mut self, candidates: Vec<(PathBuf, String)>) -> Self {
        self.font_candidates = candidates;
        self
    }

    fn load_font(&self) -> Result<FontFamily<FontData>, RenderError> {
        for (dir, family) in &self.font_candidates {
            match genpdf::fonts::from_files(dir, family, None) {
                Ok(font) => return Ok(font),
                Err(e) => debug!(dir = %dir.display(), family = %family, error = %e, "Font not usable"),
            }
        }
        Err(RenderError::FontUnavailable {
            searched: self
                .font_candidates
                .iter()
                .map(|(dir, family)| format!("{}/{family}", dir.display()))
                .collect::<Vec<_>>()
                .join(", "),
        })
    }
}

impl ReportRenderer for PdfRenderer {
    fn format(&self) -> ReportFormat {
        ReportFormat::Pdf
    }

    fn render(&self, report: &ResearchReport) -> Result<Vec<u8>, RenderError> {
        let font = self.load_font()?;
        let mut doc = Document::new(font);
        doc.set_title(format!("Research Report: {}", report.query));

        let mut decorator = SimplePageDecorator::new();
        decorator.set_margins(30);
        doc.set_page_decorator(decorator);

        let markdown = MarkdownRenderer::render_to_string(report);
        for block in markdown_blocks(&markdown) {
            match block {
                Block::Heading { level, text } => {
                    let size = match level {
                        1 => 18,
                        2 => 14,
                        _ => 12,
                    };
                    doc.push(Break::new(0.5));
                    doc.push(Paragraph::new(StyledString::new(
                        text,
                        Style::new().bold().with_font_size(size),
                    )));
                    doc.push(Break::new(0.3));
                }
                Block::Paragraph(text) => {
                    doc.push(Paragraph::new(text));
                    doc.push(Break::new(0.3));
                }
            }
        }

        let mut bytes = Vec::new();
        doc.render(&mut bytes).map_err(|e| RenderError::Failed {
            format: "pdf".into(),
            message: e.to_string(),
        })?;
        Ok(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use inquest_core::research::output::QualityAssessment;
    use pretty_assertions::assert_eq;

    fn empty_report() -> ResearchReport {
        ResearchReport {
            run_id: uuid::Uuid::new_v4(),
            query: "What is X?".into(),
            generated_at: Utc::now(),
            executive_summary: "X is a thing.".into(),
            sections: vec![],
            quality: QualityAssessment {
                sub_tasks: 0,
                total_sources: 0,
                cited_sources: 0,
                mean_similarity: 0.0,
                max_similarity: 0.0,
                threshold: 0.8,
                rewritten_sections: 0,
                best_effort_sections: vec![],
                unsupported_sub_tasks: vec![],
                issues: vec![],
            },
        }
    }

    #[test]
    fn test_markdown_blocks() {
        let md = "# Title\n\n*Generated today*\n\n<a id=\"quality\"></a>\n## Quality\n\nFirst line\nsecond line\n- **Item:** 1\n";
        assert_eq!(
            markdown_blocks(md),
            vec![
                Block::Heading {
                    level: 1,
                    text: "Title".into()
                },
                Block::Paragraph("Generated today".into()),
                Block::Heading {
                    level: 2,
                    text: "Quality".into()
                },
                Block::Paragraph("First line second line".into()),
                Block::Paragraph("- Item: 1".into()),
            ]
        );
    }

    #[test]
    fn test_missing_font_is_an_error() {
        let renderer = PdfRenderer::new().with_fonts(vec![(
            PathBuf::from("/nonexistent/fonts"),
            "NoSuchFont".to_string(),
        )]);
        match renderer.render(&empty_report()) {
            Err(RenderError::FontUnavailable { searched }) => {
                assert!(searched.contains("NoSuchFont"));
            }
            other => panic!("expected FontUnavailable, got {other:?}"),
        }
    }

    #[test]
    fn test_renders_when_a_font_is_installed() {
        let renderer = PdfRenderer::new();
        // Hosts without any of the candidate fonts only check the error path.
        match renderer.render(&empty_report()) {
            Ok(bytes) => assert!(bytes.starts_with(b"%PDF")),
            Err(e) => assert!(matches!(e, RenderError::FontUnavailable { .. })),
        }
    }
}
