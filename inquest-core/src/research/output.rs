//! Report payload assembly and rendering.
//!
//! [`ResearchReport::assemble`] turns a reviewed run into the renderer-neutral
//! payload; a [`ReportRenderer`] turns that payload into a document.

use super::decomposition::RetrievalStrategy;
use super::session::{ResearchRun, ReviewOutcome};
use super::synthesis::{citation_markers, strip_markers};
use crate::error::{InquestError, RenderError};
use crate::persistence::atomic_write;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use uuid::Uuid;

/// Sections quoted in the executive summary.
const SUMMARY_SECTIONS: usize = 3;

/// Output document format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReportFormat {
    Markdown,
    Pdf,
}

impl ReportFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            ReportFormat::Markdown => "md",
            ReportFormat::Pdf => "pdf",
        }
    }
}

impl std::fmt::Display for ReportFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ReportFormat::Markdown => write!(f, "markdown"),
            ReportFormat::Pdf => write!(f, "pdf"),
        }
    }
}

/// A source cited by a section, keyed by its in-section marker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CitedSource {
    /// Marker number as it appears in the prose (`[S{marker}]`).
    pub marker: usize,
    pub source_id: String,
    pub title: String,
    pub location: String,
}

/// One numbered section of the report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportSection {
    pub number: usize,
    pub sub_task_id: String,
    pub question: String,
    pub strategy: RetrievalStrategy,
    pub narrative: String,
    pub sources: Vec<CitedSource>,
    pub similarity: f64,
    pub revisions: usize,
    pub outcome: ReviewOutcome,
    pub unsupported: bool,
}

/// Run-wide quality figures.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualityAssessment {
    pub sub_tasks: usize,
    pub total_sources: usize,
    pub cited_sources: usize,
    pub mean_similarity: f64,
    pub max_similarity: f64,
    pub threshold: f64,
    pub rewritten_sections: usize,
    pub best_effort_sections: Vec<String>,
    pub unsupported_sub_tasks: Vec<String>,
    pub issues: Vec<String>,
}

/// Renderer-neutral report payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResearchReport {
    pub run_id: Uuid,
    pub query: String,
    pub generated_at: DateTime<Utc>,
    pub executive_summary: String,
    pub sections: Vec<ReportSection>,
    pub quality: QualityAssessment,
}

fn first_sentence(text: &str) -> String {
    let flat = strip_markers(text)
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ");
    let end = flat
        .char_indices()
        .find(|&(i, c)| matches!(c, '.' | '!' | '?') && i > 20)
        .map(|(i, _)| i + 1)
        .unwrap_or(flat.len());
    flat[..end].trim().to_string()
}

impl ResearchReport {
    /// Build the payload from a run's sub-tasks, evidence and reviewed sections.
    pub fn assemble(run: &ResearchRun, threshold: f64) -> Self {
        let mut sections = Vec::new();
        for (i, reviewed) in run.sections().iter().enumerate() {
            let section = &reviewed.section;
            let Some(sub_task) = run
                .sub_tasks()
                .iter()
                .find(|t| t.id == section.sub_task_id)
            else {
                continue;
            };
            let evidence = run.evidence().get(&sub_task.id);
            let sources = citation_markers(&section.narrative_text)
                .into_iter()
                .filter_map(|marker| {
                    let item = evidence.get(marker.checked_sub(1)?)?;
                    Some(CitedSource {
                        marker,
                        source_id: item.source_id.clone(),
                        title: item.title.clone(),
                        location: item.location.clone(),
                    })
                })
                .collect();

            sections.push(ReportSection {
                number: i + 1,
                sub_task_id: sub_task.id.clone(),
                question: sub_task.question.clone(),
                strategy: sub_task.strategy,
                narrative: section.narrative_text.clone(),
                sources,
                similarity: reviewed.verdict.score,
                revisions: reviewed.iterations,
                outcome: reviewed.outcome,
                unsupported: section.is_no_evidence(),
            });
        }

        let executive_summary = sections
            .iter()
            .filter(|s| !s.unsupported)
            .take(SUMMARY_SECTIONS)
            .map(|s| format!("{} (see section {})", first_sentence(&s.narrative), s.number))
            .collect::<Vec<_>>()
            .join(" ");
        let executive_summary = if executive_summary.is_empty() {
            "No findings could be established from the available sources.".to_string()
        } else {
            executive_summary
        };

        let scores: Vec<f64> = sections.iter().map(|s| s.similarity).collect();
        let mean_similarity = if scores.is_empty() {
            0.0
        } else {
            scores.iter().sum::<f64>() / scores.len() as f64
        };
        let quality = QualityAssessment {
            sub_tasks: run.sub_tasks().len(),
            total_sources: run.evidence().total_items(),
            cited_sources: sections.iter().map(|s| s.sources.len()).sum(),
            mean_similarity,
            max_similarity: scores.iter().copied().fold(0.0, f64::max),
            threshold,
            rewritten_sections: sections.iter().filter(|s| s.revisions > 0).count(),
            best_effort_sections: sections
                .iter()
                .filter(|s| s.outcome == ReviewOutcome::BestEffort)
                .map(|s| s.sub_task_id.clone())
                .collect(),
            unsupported_sub_tasks: sections
                .iter()
                .filter(|s| s.unsupported)
                .map(|s| s.sub_task_id.clone())
                .collect(),
            issues: run.issues().iter().map(|i| i.to_string()).collect(),
        };

        Self {
            run_id: run.id(),
            query: run.query().to_string(),
            generated_at: Utc::now(),
            executive_summary,
            sections,
            quality,
        }
    }
}

/// Turns a report payload into a document.
pub trait ReportRenderer: Send + Sync {
    fn format(&self) -> ReportFormat;
    fn render(&self, report: &ResearchReport) -> Result<Vec<u8>, RenderError>;
}

/// Render `report` and write it to `<dir>/report.<ext>`.
pub fn write_report(
    renderer: &dyn ReportRenderer,
    report: &ResearchReport,
    dir: &Path,
) -> Result<PathBuf, InquestError> {
    let bytes = renderer.render(report)?;
    let path = dir.join(format!("report.{}", renderer.format().extension()));
    atomic_write(&path, &bytes)?;
    Ok(path)
}

/// Markdown renderer.
pub struct MarkdownRenderer;

impl MarkdownRenderer {
    pub fn render_to_string(report: &ResearchReport) -> String {
        let mut out = format!("# Research Report: {}\n\n", report.query);
        out.push_str(&format!(
            "*Generated {} | run {}*\n\n",
            report.generated_at.format("%Y-%m-%d %H:%M UTC"),
            report.run_id
        ));

        out.push_str("## Executive Summary\n\n");
        out.push_str(&report.executive_summary);
        out.push_str("\n\n");

        out.push_str("## Table of Contents\n\n");
        for section in &report.sections {
            out.push_str(&format!(
                "{}. [{}](#section-{})\n",
                section.number, section.question, section.number
            ));
        }
        out.push_str(&format!(
            "{}. [Research Quality Assessment](#quality)\n\n",
            report.sections.len() + 1
        ));

        for section in &report.sections {
            out.push_str(&format!(
                "<a id=\"section-{}\"></a>\n## {}. {}\n\n",
                section.number, section.number, section.question
            ));
            out.push_str(&format!("*Focus: {}*\n\n", section.strategy.label()));
            out.push_str(section.narrative.trim());
            out.push_str("\n\n");

            if section.outcome == ReviewOutcome::BestEffort {
                out.push_str(&format!(
                    "> **Note:** this section remains close to its sources (similarity {:.2}) \
                     after {} revision(s).\n\n",
                    section.similarity, section.revisions
                ));
            }

            if !section.sources.is_empty() {
                out.push_str("### Sources\n\n");
                for source in &section.sources {
                    out.push_str(&format!(
                        "- [S{}] [{}]({})\n",
                        source.marker, source.title, source.location
                    ));
                }
                out.push('\n');
            }
        }

        let q = &report.quality;
        out.push_str("<a id=\"quality\"></a>\n## Research Quality Assessment\n\n");
        out.push_str(&format!("- **Sub-tasks researched:** {}\n", q.sub_tasks));
        out.push_str(&format!(
            "- **Sources gathered / cited:** {} / {}\n",
            q.total_sources, q.cited_sources
        ));
        out.push_str(&format!(
            "- **Similarity to sources:** mean {:.2}, max {:.2} (threshold {:.2})\n",
            q.mean_similarity, q.max_similarity, q.threshold
        ));
        out.push_str(&format!(
            "- **Sections rewritten for originality:** {}\n",
            q.rewritten_sections
        ));
        if !q.best_effort_sections.is_empty() {
            out.push_str(&format!(
                "- **Best-effort sections:** {}\n",
                q.best_effort_sections.join(", ")
            ));
        }
        if !q.unsupported_sub_tasks.is_empty() {
            out.push_str(&format!(
                "- **Sub-tasks without evidence:** {}\n",
                q.unsupported_sub_tasks.join(", ")
            ));
        }
        if !q.issues.is_empty() {
            out.push_str("\n### Recorded issues\n\n");
            for issue in &q.issues {
                out.push_str(&format!("- {issue}\n"));
            }
        }
        out
    }
}

impl ReportRenderer for MarkdownRenderer {
    fn format(&self) -> ReportFormat {
        ReportFormat::Markdown
    }

    fn render(&self, report: &ResearchReport) -> Result<Vec<u8>, RenderError> {
        Ok(Self::render_to_string(report).into_bytes())
    }
}
