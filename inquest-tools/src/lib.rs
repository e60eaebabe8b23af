//! # Inquest Tools
//!
//! Concrete collaborators for the Inquest research pipeline.
//! Provides the DuckDuckGo search backend, the HTTP and local-file fetcher,
//! HTML/PDF/plain-text extraction, and the PDF report renderer.

pub mod extract;
pub mod fetch;
pub mod pdf_report;
pub mod search;

pub use extract::DocumentExtractor;
pub use fetch::HttpFetcher;
pub use pdf_report::PdfRenderer;
pub use search::DuckDuckGoSearch;

use inquest_core::config::{ResearchConfig, WebConfig};
use inquest_core::error::SourceError;
use inquest_core::research::{MarkdownRenderer, ReportFormat, ReportRenderer, WebSourceGatherer};
use std::sync::Arc;

/// Wire search, fetch and extraction into a gatherer.
pub fn build_gatherer(
    web: &WebConfig,
    research: &ResearchConfig,
) -> Result<WebSourceGatherer, SourceError> {
    Ok(WebSourceGatherer::new(
        Arc::new(DuckDuckGoSearch::new(web)?),
        Arc::new(HttpFetcher::new(web)?),
        Arc::new(DocumentExtractor::new()),
    )
    .with_min_content_chars(research.min_content_chars)
    .with_call_timeout(research.call_timeout()))
}

/// Renderer for `format`.
pub fn renderer_for(format: ReportFormat) -> Box<dyn ReportRenderer> {
    match format {
        ReportFormat::Markdown => Box::new(MarkdownRenderer),
        ReportFormat::Pdf => Box::new(PdfRenderer::new()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_renderer_for_format() {
        assert_eq!(
            renderer_for(ReportFormat::Markdown).format(),
            ReportFormat::Markdown
        );
        assert_eq!(renderer_for(ReportFormat::Pdf).format(), ReportFormat::Pdf);
    }

    #[test]
    fn test_build_gatherer_with_defaults() {
        assert!(build_gatherer(&WebConfig::default(), &ResearchConfig::default()).is_ok());
    }
}
