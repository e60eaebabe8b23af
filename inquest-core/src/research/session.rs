//! Research run state machine.
//!
//! A [`ResearchRun`] is created when the controller starts, advanced one
//! stage at a time, and frozen once it reaches `Done` or `Failed`. Callers
//! only ever see it through read accessors.

use super::decomposition::SubTask;
use super::evidence::EvidenceStore;
use super::originality::OriginalityVerdict;
use super::output::ResearchReport;
use super::synthesis::SynthesizedSection;
use crate::error::PipelineError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Pipeline stage of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunPhase {
    Planning,
    Gathering,
    Synthesizing,
    Reviewing,
    Done,
    Failed,
}

impl RunPhase {
    pub fn is_terminal(&self) -> bool {
        matches!(self, RunPhase::Done | RunPhase::Failed)
    }

    fn next(&self) -> Option<RunPhase> {
        match self {
            RunPhase::Planning => Some(RunPhase::Gathering),
            RunPhase::Gathering => Some(RunPhase::Synthesizing),
            RunPhase::Synthesizing => Some(RunPhase::Reviewing),
            RunPhase::Reviewing => Some(RunPhase::Done),
            RunPhase::Done | RunPhase::Failed => None,
        }
    }
}

impl std::fmt::Display for RunPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            RunPhase::Planning => "PLANNING",
            RunPhase::Gathering => "GATHERING",
            RunPhase::Synthesizing => "SYNTHESIZING",
            RunPhase::Reviewing => "REVIEWING",
            RunPhase::Done => "DONE",
            RunPhase::Failed => "FAILED",
        };
        f.write_str(name)
    }
}

/// Something that went wrong during a run.
///
/// Every variant but `CollaboratorUnavailable` is recorded and the run
/// carries on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RunIssue {
    PlanningDegraded {
        reason: String,
    },
    SourceUnavailable {
        sub_task_id: String,
        location: String,
        reason: String,
    },
    SubTaskUnsupported {
        sub_task_id: String,
    },
    RevisionExhausted {
        sub_task_id: String,
        iterations: usize,
        final_score: f64,
    },
    CollaboratorUnavailable {
        collaborator: String,
        message: String,
    },
}

impl RunIssue {
    pub fn is_fatal(&self) -> bool {
        matches!(self, RunIssue::CollaboratorUnavailable { .. })
    }
}

impl std::fmt::Display for RunIssue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunIssue::PlanningDegraded { reason } => write!(f, "Planning degraded: {reason}"),
            RunIssue::SourceUnavailable {
                sub_task_id,
                location,
                reason,
            } => write!(f, "Source dropped for {sub_task_id}: {location} ({reason})"),
            RunIssue::SubTaskUnsupported { sub_task_id } => {
                write!(f, "No evidence found for {sub_task_id}")
            }
            RunIssue::RevisionExhausted {
                sub_task_id,
                iterations,
                final_score,
            } => write!(
                f,
                "Section {sub_task_id} still similar to its sources after {iterations} revision(s) \
                 (score {final_score:.2})"
            ),
            RunIssue::CollaboratorUnavailable {
                collaborator,
                message,
            } => write!(f, "The {collaborator} is unavailable: {message}"),
        }
    }
}

/// How the review loop ended for a section.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReviewOutcome {
    /// Never flagged.
    Original,
    /// Flagged, then cleared by revision.
    Revised,
    /// Still flagged after the last permitted revision.
    BestEffort,
}

/// A section together with its review working state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReviewedSection {
    pub section: SynthesizedSection,
    /// Latest verdict; earlier ones live in the run archive.
    pub verdict: OriginalityVerdict,
    /// Revise + re-score cycles spent on this section.
    pub iterations: usize,
    pub outcome: ReviewOutcome,
}

/// All state of one research run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResearchRun {
    id: Uuid,
    query: String,
    phase: RunPhase,
    started_at: DateTime<Utc>,
    finished_at: Option<DateTime<Utc>>,
    sub_tasks: Vec<SubTask>,
    evidence: EvidenceStore,
    sections: Vec<ReviewedSection>,
    issues: Vec<RunIssue>,
    failure_reason: Option<String>,
    report: Option<ResearchReport>,
}

impl ResearchRun {
    pub(crate) fn new(query: impl Into<String>, max_content_length: usize) -> Self {
        Self {
            id: Uuid::new_v4(),
            query: query.into(),
            phase: RunPhase::Planning,
            started_at: Utc::now(),
            finished_at: None,
            sub_tasks: Vec::new(),
            evidence: EvidenceStore::new(max_content_length),
            sections: Vec::new(),
            issues: Vec::new(),
            failure_reason: None,
            report: None,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    /// First eight characters of the run id.
    pub fn short_id(&self) -> String {
        self.id.simple().to_string()[..8].to_string()
    }

    pub fn query(&self) -> &str {
        &self.query
    }

    pub fn phase(&self) -> RunPhase {
        self.phase
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn finished_at(&self) -> Option<DateTime<Utc>> {
        self.finished_at
    }

    pub fn sub_tasks(&self) -> &[SubTask] {
        &self.sub_tasks
    }

    pub fn evidence(&self) -> &EvidenceStore {
        &self.evidence
    }

    /// Sections in sub-task order.
    pub fn sections(&self) -> &[ReviewedSection] {
        &self.sections
    }

    pub fn issues(&self) -> &[RunIssue] {
        &self.issues
    }

    pub fn failure_reason(&self) -> Option<&str> {
        self.failure_reason.as_deref()
    }

    pub fn report(&self) -> Option<&ResearchReport> {
        self.report.as_ref()
    }

    pub fn is_finalized(&self) -> bool {
        self.phase.is_terminal()
    }

    fn ensure_open(&self) -> Result<(), PipelineError> {
        if self.is_finalized() {
            Err(PipelineError::RunFinalized)
        } else {
            Ok(())
        }
    }

    /// Move to the next stage. Only the forward edge is allowed.
    pub(crate) fn advance(&mut self, to: RunPhase) -> Result<(), PipelineError> {
        self.ensure_open()?;
        if self.phase.next() != Some(to) || to == RunPhase::Done {
            return Err(PipelineError::InvalidTransition {
                from: self.phase.to_string(),
                to: to.to_string(),
            });
        }
        self.phase = to;
        Ok(())
    }

    pub(crate) fn set_sub_tasks(&mut self, sub_tasks: Vec<SubTask>) -> Result<(), PipelineError> {
        self.ensure_open()?;
        self.sub_tasks = sub_tasks;
        Ok(())
    }

    pub(crate) fn evidence_mut(&mut self) -> Result<&mut EvidenceStore, PipelineError> {
        self.ensure_open()?;
        Ok(&mut self.evidence)
    }

    pub(crate) fn set_sections(
        &mut self,
        sections: Vec<ReviewedSection>,
    ) -> Result<(), PipelineError> {
        self.ensure_open()?;
        self.sections = sections;
        Ok(())
    }

    pub(crate) fn record_issue(&mut self, issue: RunIssue) -> Result<(), PipelineError> {
        self.ensure_open()?;
        self.issues.push(issue);
        Ok(())
    }

    /// Freeze the run as `Done` with its report. Only valid from `Reviewing`.
    pub(crate) fn finish(&mut self, report: ResearchReport) -> Result<(), PipelineError> {
        self.ensure_open()?;
        if self.phase != RunPhase::Reviewing {
            return Err(PipelineError::InvalidTransition {
                from: self.phase.to_string(),
                to: RunPhase::Done.to_string(),
            });
        }
        self.report = Some(report);
        self.phase = RunPhase::Done;
        self.finished_at = Some(Utc::now());
        Ok(())
    }

    /// Freeze the run as `Failed`, keeping whatever was produced so far.
    pub(crate) fn fail(&mut self, reason: impl Into<String>) -> Result<(), PipelineError> {
        self.ensure_open()?;
        self.failure_reason = Some(reason.into());
        self.phase = RunPhase::Failed;
        self.finished_at = Some(Utc::now());
        Ok(())
    }
}

/// Callback trait for progress reporting during a run.
pub trait ResearchCallback: Send + Sync {
    /// Called when the run enters a new phase.
    fn on_phase_change(&self, phase: RunPhase);
    /// Called once per sub-task after its evidence is stored.
    fn on_sub_task_gathered(&self, sub_task: &SubTask, sources_found: usize);
    /// Called when a section leaves the review loop.
    fn on_section_reviewed(&self, verdict: &OriginalityVerdict, iterations: usize);
}

/// No-op callback.
pub struct NoOpResearchCallback;

impl ResearchCallback for NoOpResearchCallback {
    fn on_phase_change(&self, _phase: RunPhase) {}
    fn on_sub_task_gathered(&self, _sub_task: &SubTask, _sources_found: usize) {}
    fn on_section_reviewed(&self, _verdict: &OriginalityVerdict, _iterations: usize) {}
}
