//! On-disk audit trail for research runs.
//!
//! Layout under the data directory:
//!
//! ```text
//! run_<YYYYMMDD_HHMMSS>_<short-id>/
//!   run.json                    final run state
//!   subtasks.json               ordered plan
//!   evidence/<sub_task>.jsonl   one record per source
//!   verdicts/<sub_task>.jsonl   one record per scoring pass
//!   events.jsonl                phase changes and issues
//! ```

use super::decomposition::SubTask;
use super::evidence::EvidenceItem;
use super::originality::OriginalityVerdict;
use super::session::{ResearchRun, RunIssue, RunPhase};
use crate::persistence::{append_jsonl, atomic_write_json, load_json};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::io;
use std::path::{Path, PathBuf};
use tracing::debug;
use uuid::Uuid;

/// One line of `events.jsonl`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArchiveEvent {
    pub at: DateTime<Utc>,
    #[serde(flatten)]
    pub kind: EventKind,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum EventKind {
    Phase { phase: RunPhase },
    Issue { issue: RunIssue },
}

/// Write handle for one run directory.
#[derive(Debug, Clone)]
pub struct RunArchive {
    dir: PathBuf,
}

impl RunArchive {
    /// Create the run directory under `data_dir`.
    pub fn create(data_dir: &Path, run: &ResearchRun) -> io::Result<Self> {
        let dir = data_dir.join(format!(
            "run_{}_{}",
            run.started_at().format("%Y%m%d_%H%M%S"),
            run.short_id()
        ));
        std::fs::create_dir_all(dir.join("evidence"))?;
        std::fs::create_dir_all(dir.join("verdicts"))?;
        debug!(dir = %dir.display(), "Created run archive");
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn write_sub_tasks(&self, sub_tasks: &[SubTask]) -> io::Result<()> {
        atomic_write_json(&self.dir.join("subtasks.json"), &sub_tasks)
    }

    pub fn append_evidence(&self, sub_task_id: &str, items: &[EvidenceItem]) -> io::Result<()> {
        let path = self.dir.join("evidence").join(format!("{sub_task_id}.jsonl"));
        items.iter().try_for_each(|item| append_jsonl(&path, item))
    }

    pub fn append_verdict(&self, verdict: &OriginalityVerdict) -> io::Result<()> {
        let path = self
            .dir
            .join("verdicts")
            .join(format!("{}.jsonl", verdict.section_id));
        append_jsonl(&path, verdict)
    }

    pub fn append_event(&self, kind: EventKind) -> io::Result<()> {
        append_jsonl(
            &self.dir.join("events.jsonl"),
            &ArchiveEvent {
                at: Utc::now(),
                kind,
            },
        )
    }

    pub fn write_run(&self, run: &ResearchRun) -> io::Result<()> {
        atomic_write_json(&self.dir.join("run.json"), run)
    }
}

/// Load the final state stored in a run directory.
pub fn load_run(run_dir: &Path) -> io::Result<Option<ResearchRun>> {
    load_json(&run_dir.join("run.json"))
}

/// Summary of an archived run for listing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSummary {
    pub dir: PathBuf,
    pub id: Uuid,
    pub query: String,
    pub phase: RunPhase,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub sections: usize,
    pub failure_reason: Option<String>,
}

/// List archived runs under `data_dir`, most recent first.
///
/// Directories without a readable `run.json` are skipped.
pub fn list_runs(data_dir: &Path) -> Vec<RunSummary> {
    let Ok(entries) = std::fs::read_dir(data_dir) else {
        return Vec::new();
    };

    let mut summaries: Vec<RunSummary> = entries
        .flatten()
        .map(|entry| entry.path())
        .filter(|path| {
            path.is_dir()
                && path
                    .file_name()
                    .and_then(|n| n.to_str())
                    .is_some_and(|n| n.starts_with("run_"))
        })
        .filter_map(|path| {
            let run = load_run(&path).ok().flatten()?;
            Some(RunSummary {
                id: run.id(),
                query: run.query().to_string(),
                phase: run.phase(),
                started_at: run.started_at(),
                finished_at: run.finished_at(),
                sections: run.sections().len(),
                failure_reason: run.failure_reason().map(str::to_string),
                dir: path,
            })
        })
        .collect();

    summaries.sort_by(|a, b| b.started_at.cmp(&a.started_at));
    summaries
}
