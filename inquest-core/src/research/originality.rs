//! Originality scoring: how closely a section's prose tracks its sources.
//!
//! [`TfIdfScorer`] builds a TF-IDF model over the section and every text it
//! is compared against, then takes the highest cosine similarity. A score at
//! or above the threshold flags the section for revision.

use super::evidence::EvidenceItem;
use super::synthesis::{SynthesizedSection, strip_markers};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::Path;
use tracing::{debug, warn};

/// Vocabulary cap, most frequent terms first.
const MAX_FEATURES: usize = 5000;

const STOP_WORDS: &[&str] = &[
    "a", "about", "above", "after", "again", "against", "all", "also", "am", "an", "and", "any",
    "are", "as", "at", "be", "because", "been", "before", "being", "below", "between", "both",
    "but", "by", "can", "could", "did", "do", "does", "doing", "down", "during", "each", "few",
    "for", "from", "further", "had", "has", "have", "having", "he", "her", "here", "hers",
    "herself", "him", "himself", "his", "how", "however", "i", "if", "in", "into", "is", "it",
    "its", "itself", "just", "may", "me", "might", "more", "most", "much", "must", "my",
    "myself", "no", "nor", "not", "now", "of", "off", "on", "once", "only", "or", "other", "our",
    "ours", "ourselves", "out", "over", "own", "same", "she", "should", "so", "some", "such",
    "than", "that", "the", "their", "theirs", "them", "themselves", "then", "there", "these",
    "they", "this", "those", "through", "thus", "to", "too", "under", "until", "up", "upon",
    "us", "very", "was", "we", "were", "what", "when", "where", "whether", "which", "while",
    "who", "whom", "why", "will", "with", "within", "without", "would", "yet", "you", "your",
    "yours", "yourself", "yourselves",
];

/// Similarity assessment of a section against the texts it was compared with.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OriginalityVerdict {
    pub section_id: String,
    /// Highest cosine similarity, in [0, 1].
    pub score: f64,
    pub flagged: bool,
    /// Source (or reference document) the prose is closest to.
    pub matched_source_id: Option<String>,
    /// Revision count when this verdict was taken; 0 for the first score.
    pub iteration: usize,
    pub scored_at: DateTime<Utc>,
}

impl OriginalityVerdict {
    pub fn with_iteration(mut self, iteration: usize) -> Self {
        self.iteration = iteration;
        self
    }
}

/// Scores a section against its evidence.
pub trait OriginalityScorer: Send + Sync {
    /// `evidence` is everything gathered for the section's sub-task; only
    /// the items the section cites are compared.
    fn score(&self, section: &SynthesizedSection, evidence: &[EvidenceItem])
    -> OriginalityVerdict;
}

/// A document outside the run's evidence that prose must not copy either.
#[derive(Debug, Clone)]
pub struct ReferenceDocument {
    pub id: String,
    pub text: String,
}

/// Stop-word filtered TF-IDF with cosine similarity.
pub struct TfIdfScorer {
    threshold: f64,
    reference_corpus: Vec<ReferenceDocument>,
}

impl TfIdfScorer {
    pub fn new(threshold: f64) -> Self {
        Self {
            threshold,
            reference_corpus: Vec::new(),
        }
    }

    pub fn with_reference_corpus(mut self, corpus: Vec<ReferenceDocument>) -> Self {
        self.reference_corpus = corpus;
        self
    }

    /// Load reference documents from files; unreadable files are skipped.
    pub fn load_reference_corpus<P: AsRef<Path>>(paths: &[P]) -> Vec<ReferenceDocument> {
        paths
            .iter()
            .filter_map(|p| {
                let path = p.as_ref();
                match std::fs::read_to_string(path) {
                    Ok(text) => Some(ReferenceDocument {
                        id: format!("ref:{}", path.display()),
                        text,
                    }),
                    Err(e) => {
                        warn!(path = %path.display(), error = %e, "Skipping reference document");
                        None
                    }
                }
            })
            .collect()
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }
}

impl OriginalityScorer for TfIdfScorer {
    fn score(
        &self,
        section: &SynthesizedSection,
        evidence: &[EvidenceItem],
    ) -> OriginalityVerdict {
        let cited: HashSet<&str> = section.citations.iter().map(String::as_str).collect();
        let mut others: Vec<(&str, &str)> = evidence
            .iter()
            .filter(|e| cited.contains(e.source_id.as_str()))
            .map(|e| (e.source_id.as_str(), e.extracted_text.as_str()))
            .collect();
        others.extend(
            self.reference_corpus
                .iter()
                .map(|r| (r.id.as_str(), r.text.as_str())),
        );

        let prose = strip_markers(&section.narrative_text);
        let texts: Vec<&str> = others.iter().map(|(_, t)| *t).collect();
        let similarities = max_similarity(&prose, &texts);

        let (score, matched) = match similarities {
            Some((idx, score)) => (score, Some(others[idx].0.to_string())),
            None => (0.0, None),
        };
        let flagged = score >= self.threshold;
        debug!(section = %section.sub_task_id, score, flagged, "Scored section");

        OriginalityVerdict {
            section_id: section.sub_task_id.clone(),
            score,
            flagged,
            matched_source_id: matched,
            iteration: 0,
            scored_at: Utc::now(),
        }
    }
}

fn tokenize(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| t.chars().count() >= 2)
        .map(str::to_lowercase)
        .filter(|t| !STOP_WORDS.contains(&t.as_str()))
        .collect()
}

fn term_counts(tokens: &[String]) -> HashMap<&str, f64> {
    let mut counts = HashMap::new();
    for t in tokens {
        *counts.entry(t.as_str()).or_insert(0.0) += 1.0;
    }
    counts
}

/// Index and similarity of the text in `others` closest to `prose`.
///
/// Returns `None` when there is nothing to compare: the prose has no
/// content terms or `others` is empty.
pub fn max_similarity(prose: &str, others: &[&str]) -> Option<(usize, f64)> {
    if others.is_empty() {
        return None;
    }
    let docs: Vec<Vec<String>> = std::iter::once(prose)
        .chain(others.iter().copied())
        .map(tokenize)
        .collect();
    if docs[0].is_empty() {
        return None;
    }

    let counts: Vec<HashMap<&str, f64>> = docs.iter().map(|d| term_counts(d)).collect();

    let mut corpus_freq: HashMap<&str, f64> = HashMap::new();
    let mut doc_freq: HashMap<&str, f64> = HashMap::new();
    for doc in &counts {
        for (term, n) in doc {
            *corpus_freq.entry(*term).or_insert(0.0) += n;
            *doc_freq.entry(*term).or_insert(0.0) += 1.0;
        }
    }

    let mut vocabulary: Vec<(&str, f64)> = corpus_freq.into_iter().collect();
    vocabulary.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| a.0.cmp(b.0)));
    vocabulary.truncate(MAX_FEATURES);

    // Smoothed idf: ln((1 + n) / (1 + df)) + 1
    let n_docs = counts.len() as f64;
    let idf: HashMap<&str, f64> = vocabulary
        .iter()
        .map(|(term, _)| {
            let df = doc_freq.get(term).copied().unwrap_or(0.0);
            (*term, ((1.0 + n_docs) / (1.0 + df)).ln() + 1.0)
        })
        .collect();

    let vectors: Vec<HashMap<&str, f64>> = counts
        .iter()
        .map(|doc| {
            let mut v: HashMap<&str, f64> = doc
                .iter()
                .filter_map(|(term, tf)| idf.get(term).map(|w| (*term, tf * w)))
                .collect();
            let norm = v.values().map(|x| x * x).sum::<f64>().sqrt();
            if norm > 0.0 {
                v.values_mut().for_each(|x| *x /= norm);
            }
            v
        })
        .collect();

    let prose_vec = &vectors[0];
    vectors[1..]
        .iter()
        .enumerate()
        .map(|(i, v)| {
            let dot: f64 = prose_vec
                .iter()
                .filter_map(|(term, w)| v.get(term).map(|x| w * x))
                .sum();
            (i, dot.clamp(0.0, 1.0))
        })
        .max_by(|a, b| a.1.total_cmp(&b.1).then_with(|| b.0.cmp(&a.0)))
}
