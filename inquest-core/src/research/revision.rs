//! Rewriting flagged sections to read less like their sources.

use super::originality::OriginalityVerdict;
use super::synthesis::{SynthesizedSection, citation_markers, expand_grouped_markers};
use crate::brain::LlmProvider;
use crate::error::LlmError;
use crate::types::CompletionRequest;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Rephrases a flagged section, keeping its facts and citations.
#[async_trait]
pub trait Reviser: Send + Sync {
    async fn revise(
        &self,
        section: &SynthesizedSection,
        verdict: &OriginalityVerdict,
    ) -> Result<SynthesizedSection, LlmError>;
}

/// Accept `candidate`'s prose only if it carries exactly the markers of
/// `original`. The citation list always stays the original's.
pub fn accept_revision(
    original: &SynthesizedSection,
    candidate: &SynthesizedSection,
) -> Option<SynthesizedSection> {
    // `[S1, S2]` and `[S1][S2]` cite the same sources.
    let text = expand_grouped_markers(candidate.narrative_text.trim());
    if text.is_empty()
        || citation_markers(&text)
            != citation_markers(&expand_grouped_markers(&original.narrative_text))
    {
        return None;
    }
    Some(SynthesizedSection {
        sub_task_id: original.sub_task_id.clone(),
        narrative_text: text,
        citations: original.citations.clone(),
    })
}

const REVISION_SYSTEM_PROMPT: &str = "You are an editor. Rewrite the text below in clearly \
different words and sentence structure while keeping every fact exactly as stated. Keep every \
citation marker such as [S1] attached to the claim it supports; do not add, drop or renumber \
markers. Return only the rewritten text.";

/// Reviser backed by a language model, run at a higher temperature than
/// synthesis.
pub struct LlmReviser {
    provider: Arc<dyn LlmProvider>,
    temperature: f32,
    max_tokens: usize,
    timeout: Duration,
}

impl LlmReviser {
    pub fn new(
        provider: Arc<dyn LlmProvider>,
        temperature: f32,
        max_tokens: usize,
        timeout: Duration,
    ) -> Self {
        Self {
            provider,
            temperature,
            max_tokens,
            timeout,
        }
    }
}

fn strip_code_fence(text: &str) -> &str {
    let trimmed = text.trim();
    match trimmed.strip_prefix("```") {
        Some(rest) => {
            let body = rest.split_once('\n').map(|(_, b)| b).unwrap_or(rest);
            body.trim_end().trim_end_matches("```").trim()
        }
        None => trimmed,
    }
}

#[async_trait]
impl Reviser for LlmReviser {
    async fn revise(
        &self,
        section: &SynthesizedSection,
        verdict: &OriginalityVerdict,
    ) -> Result<SynthesizedSection, LlmError> {
        let request = CompletionRequest::prompt(
            REVISION_SYSTEM_PROMPT,
            format!(
                "Similarity to sources: {:.2}. Rewrite:\n\n{}",
                verdict.score, section.narrative_text
            ),
        )
        .with_temperature(self.temperature)
        .with_max_tokens(self.max_tokens)
        .with_timeout(self.timeout);

        let response = self.provider.complete(request).await?;
        debug!(section = %section.sub_task_id, score = verdict.score, "Section rewritten");

        Ok(SynthesizedSection {
            sub_task_id: section.sub_task_id.clone(),
            narrative_text: strip_code_fence(&response.text).to_string(),
            citations: section.citations.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::brain::MockLlmProvider;
    use chrono::Utc;

    fn section(text: &str) -> SynthesizedSection {
        SynthesizedSection {
            sub_task_id: "T1".into(),
            narrative_text: text.into(),
            citations: vec!["T1-S1".into(), "T1-S2".into()],
        }
    }

    fn verdict() -> OriginalityVerdict {
        OriginalityVerdict {
            section_id: "T1".into(),
            score: 0.93,
            flagged: true,
            matched_source_id: Some("T1-S1".into()),
            iteration: 0,
            scored_at: Utc::now(),
        }
    }

    #[test]
    fn test_accept_revision_same_markers() {
        let original = section("A [S1]. B [S2].");
        let candidate = section("B, restated [S2]. A, restated [S1].");
        let accepted = accept_revision(&original, &candidate).unwrap();
        assert_eq!(accepted.citations, original.citations);
        assert!(accepted.narrative_text.starts_with("B, restated"));
    }

    #[test]
    fn test_accept_revision_rejects_changed_markers() {
        let original = section("A [S1]. B [S2].");
        assert!(accept_revision(&original, &section("A and B [S1].")).is_none());
        assert!(accept_revision(&original, &section("A [S1]. B [S2]. C [S3].")).is_none());
        assert!(accept_revision(&original, &section("   ")).is_none());
    }

    #[test]
    fn test_accept_revision_grouped_markers_cite_the_same_sources() {
        let original = section("A [S1]. B [S2].");
        let accepted = accept_revision(&original, &section("A and B, restated [S1, S2].")).unwrap();
        assert_eq!(accepted.narrative_text, "A and B, restated [S1][S2].");
        assert_eq!(accepted.citations, original.citations);

        let grouped_original = section("A and B [S1; S2].");
        assert!(accept_revision(&grouped_original, &section("A [S2]. B [S1].")).is_some());
        assert!(accept_revision(&grouped_original, &section("A [S1, S3].")).is_none());
    }

    #[test]
    fn test_strip_code_fence() {
        assert_eq!(strip_code_fence("```text\nHello [S1].\n```"), "Hello [S1].");
        assert_eq!(strip_code_fence("  plain  "), "plain");
    }

    #[tokio::test]
    async fn test_llm_reviser_uses_temperature_and_keeps_citations() {
        let provider = Arc::new(MockLlmProvider::with_responder(|req| {
            assert!((req.temperature - 0.6).abs() < f32::EPSILON);
            assert!(req.last_user_text().unwrap_or_default().contains("0.93"));
            Ok("Restated B [S2]. Restated A [S1].".into())
        }));
        let reviser = LlmReviser::new(provider, 0.6, 1000, Duration::from_secs(5));
        let revised = reviser
            .revise(&section("A [S1]. B [S2]."), &verdict())
            .await
            .unwrap();
        assert_eq!(revised.citations, vec!["T1-S1", "T1-S2"]);
        assert_eq!(revised.narrative_text, "Restated B [S2]. Restated A [S1].");
    }
}
