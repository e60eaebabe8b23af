//! Cited narrative synthesis per sub-task.
//!
//! Evidence is shown to the model numbered `[S1]..[Sn]`. The model's answer
//! keeps those markers inline; [`resolve_citations`] maps them back to
//! source ids and strips any marker that does not name supplied evidence.

use super::decomposition::SubTask;
use super::evidence::EvidenceItem;
use crate::brain::LlmProvider;
use crate::error::LlmError;
use crate::types::CompletionRequest;
use async_trait::async_trait;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt::Write as _;
use std::sync::{Arc, LazyLock};
use std::time::Duration;
use tracing::{debug, warn};

/// Opening text of every section synthesized from zero evidence.
pub const NO_EVIDENCE_MARKER: &str = "No evidence found.";

static MARKER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\[S(\d+)\]").expect("static regex"));

static STRIP_MARKER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s*\[S\d+\]").expect("static regex"));

static GROUPED_MARKER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\[(S\d+(?:\s*[,;]\s*S\d+)+)\]").expect("static regex"));

/// The cited narrative answering one sub-task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SynthesizedSection {
    pub sub_task_id: String,
    /// Prose with inline `[S#]` markers.
    pub narrative_text: String,
    /// Cited source ids in order of first citation.
    pub citations: Vec<String>,
}

impl SynthesizedSection {
    /// Section stating that nothing could be found for `sub_task`.
    pub fn no_evidence(sub_task: &SubTask) -> Self {
        Self {
            sub_task_id: sub_task.id.clone(),
            narrative_text: format!(
                "{} No usable sources could be retrieved for \"{}\", so this section reports \
                 no findings.",
                NO_EVIDENCE_MARKER, sub_task.question
            ),
            citations: Vec::new(),
        }
    }

    pub fn is_no_evidence(&self) -> bool {
        self.narrative_text.starts_with(NO_EVIDENCE_MARKER)
    }
}

/// Merges evidence for one sub-task into a cited section.
#[async_trait]
pub trait Synthesizer: Send + Sync {
    async fn synthesize(
        &self,
        sub_task: &SubTask,
        evidence: &[EvidenceItem],
    ) -> Result<SynthesizedSection, LlmError>;
}

/// The ordered set of marker numbers appearing in `text`.
pub fn citation_markers(text: &str) -> Vec<usize> {
    let mut markers: Vec<usize> = MARKER_RE
        .captures_iter(text)
        .filter_map(|c| c[1].parse().ok())
        .collect();
    markers.sort_unstable();
    markers.dedup();
    markers
}

/// Remove every `[S#]` marker, for scoring plain prose.
pub fn strip_markers(text: &str) -> String {
    STRIP_MARKER_RE.replace_all(text, "").into_owned()
}

/// Split `[S1, S3]` into `[S1][S3]`.
pub(crate) fn expand_grouped_markers(text: &str) -> String {
    GROUPED_MARKER_RE
        .replace_all(text, |caps: &regex::Captures| {
            caps[1]
                .split([',', ';'])
                .map(|m| format!("[{}]", m.trim()))
                .collect::<String>()
        })
        .into_owned()
}

/// Map markers in `text` to the ids of `evidence`, dropping unknown markers.
///
/// Returns the cleaned prose and the cited source ids in order of first use.
pub fn resolve_citations(text: &str, evidence: &[EvidenceItem]) -> (String, Vec<String>) {
    let expanded = expand_grouped_markers(text);
    let mut citations: Vec<String> = Vec::new();

    let cleaned = MARKER_RE.replace_all(&expanded, |caps: &regex::Captures| {
        let source = caps[1]
            .parse::<usize>()
            .ok()
            .and_then(|n| n.checked_sub(1))
            .and_then(|idx| evidence.get(idx));
        match source {
            Some(item) => {
                if !citations.contains(&item.source_id) {
                    citations.push(item.source_id.clone());
                }
                caps[0].to_string()
            }
            None => String::new(),
        }
    });

    (cleaned.trim().to_string(), citations)
}

/// First sentence of `text`, capped at `max_chars` characters.
fn leading_excerpt(text: &str, max_chars: usize) -> String {
    let flat = text.split_whitespace().collect::<Vec<_>>().join(" ");
    let sentence_end = flat
        .char_indices()
        .find(|&(i, c)| matches!(c, '.' | '!' | '?') && i > 40)
        .map(|(i, _)| i + 1)
        .unwrap_or(flat.len());
    let sentence = &flat[..sentence_end];
    match sentence.char_indices().nth(max_chars) {
        Some((idx, _)) => format!("{}...", sentence[..idx].trim_end()),
        None => sentence.to_string(),
    }
}

/// Extractive fallback: one quoted excerpt per source, each cited.
pub fn extractive_digest(sub_task: &SubTask, evidence: &[EvidenceItem]) -> SynthesizedSection {
    if evidence.is_empty() {
        return SynthesizedSection::no_evidence(sub_task);
    }
    let mut text = String::new();
    for (i, item) in evidence.iter().enumerate() {
        let excerpt = leading_excerpt(&item.extracted_text, 300);
        let _ = write!(
            text,
            "{}According to {}, \"{}\" [S{}]",
            if i == 0 { "" } else { " " },
            item.title,
            excerpt.trim_end_matches('.'),
            i + 1
        );
        text.push('.');
    }
    SynthesizedSection {
        sub_task_id: sub_task.id.clone(),
        narrative_text: text,
        citations: evidence.iter().map(|e| e.source_id.clone()).collect(),
    }
}

const SYNTHESIS_SYSTEM_PROMPT: &str = "You are a research analyst writing one section of a \
research report. Use only the numbered sources provided. Every factual sentence must end with \
the marker of the source that supports it, written exactly as [S1], [S2] and so on. Do not \
state anything the sources do not support, do not invent sources, and write in your own words \
rather than copying sentences. Write 2 to 4 well-structured paragraphs.";

/// Synthesizer backed by a language model.
pub struct LlmSynthesizer {
    provider: Arc<dyn LlmProvider>,
    temperature: f32,
    max_tokens: usize,
    timeout: Duration,
    excerpt_chars: usize,
}

impl LlmSynthesizer {
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
            excerpt_chars: 3000,
        }
    }

    pub fn with_excerpt_chars(mut self, excerpt_chars: usize) -> Self {
        self.excerpt_chars = excerpt_chars;
        self
    }

    fn build_prompt(&self, sub_task: &SubTask, evidence: &[EvidenceItem]) -> String {
        let mut prompt = format!(
            "Question: {}\nResearch focus: {}\n\nSources:\n",
            sub_task.question, sub_task.instructions
        );
        for (i, item) in evidence.iter().enumerate() {
            let excerpt: String = item.extracted_text.chars().take(self.excerpt_chars).collect();
            let _ = write!(
                prompt,
                "\n[S{}] {} ({})\n{}\n",
                i + 1,
                item.title,
                item.location,
                excerpt
            );
        }
        prompt.push_str("\nWrite the section now, citing sources with [S#] markers.");
        prompt
    }
}

#[async_trait]
impl Synthesizer for LlmSynthesizer {
    async fn synthesize(
        &self,
        sub_task: &SubTask,
        evidence: &[EvidenceItem],
    ) -> Result<SynthesizedSection, LlmError> {
        if evidence.is_empty() {
            return Ok(SynthesizedSection::no_evidence(sub_task));
        }

        let request = CompletionRequest::prompt(
            SYNTHESIS_SYSTEM_PROMPT,
            self.build_prompt(sub_task, evidence),
        )
        .with_temperature(self.temperature)
        .with_max_tokens(self.max_tokens)
        .with_timeout(self.timeout);

        let response = self.provider.complete(request).await?;
        let (narrative_text, citations) = resolve_citations(&response.text, evidence);

        if citations.is_empty() {
            warn!(
                sub_task = %sub_task.id,
                "Synthesis carried no valid citation; using extractive digest"
            );
            return Ok(extractive_digest(sub_task, evidence));
        }

        debug!(sub_task = %sub_task.id, citations = citations.len(), "Section synthesized");
        Ok(SynthesizedSection {
            sub_task_id: sub_task.id.clone(),
            narrative_text,
            citations,
        })
    }
}
