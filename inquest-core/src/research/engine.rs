//! Pipeline controller: sequences the research stages for one query.
//!
//! ```text
//! PLANNING -> GATHERING -> SYNTHESIZING -> REVIEWING -> DONE
//!      \___________\____________\______________\______-> FAILED
//! ```
//!
//! Gathering is the only parallel stage. Every other stage runs sub-tasks
//! one after another in plan order, so section order never depends on
//! completion timing.

use super::archive::{EventKind, RunArchive};
use super::decomposition::{Decomposer, LlmDecomposer, SubTask, sanitize_plan};
use super::evidence::EvidenceItem;
use super::gather::{GatherOutcome, SourceGatherer};
use super::originality::{OriginalityScorer, OriginalityVerdict, TfIdfScorer};
use super::output::ResearchReport;
use super::revision::{LlmReviser, Reviser, accept_revision};
use super::session::{
    NoOpResearchCallback, ResearchCallback, ResearchRun, ReviewOutcome, ReviewedSection,
    RunIssue, RunPhase,
};
use super::synthesis::{
    LlmSynthesizer, SynthesizedSection, Synthesizer, extractive_digest, resolve_citations,
};
use crate::brain::LlmProvider;
use crate::config::{LlmConfig, ResearchConfig};
use crate::error::{PipelineError, SourceError};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

/// The five role implementations a controller drives.
pub struct Collaborators {
    pub decomposer: Arc<dyn Decomposer>,
    pub gatherer: Arc<dyn SourceGatherer>,
    pub synthesizer: Arc<dyn Synthesizer>,
    pub scorer: Arc<dyn OriginalityScorer>,
    pub reviser: Arc<dyn Reviser>,
}

impl Collaborators {
    /// Production wiring: every language-model role shares `provider`.
    pub fn with_llm(
        provider: Arc<dyn LlmProvider>,
        gatherer: Arc<dyn SourceGatherer>,
        llm: &LlmConfig,
        research: &ResearchConfig,
    ) -> Self {
        let reference_corpus = TfIdfScorer::load_reference_corpus(&research.reference_corpus);
        Self {
            decomposer: Arc::new(LlmDecomposer::new(
                Arc::clone(&provider),
                llm.temperature,
                llm.max_tokens,
                llm.timeout(),
            )),
            gatherer,
            synthesizer: Arc::new(
                LlmSynthesizer::new(
                    Arc::clone(&provider),
                    llm.temperature,
                    llm.max_tokens,
                    llm.timeout(),
                )
                .with_excerpt_chars(research.synthesis_excerpt_chars),
            ),
            scorer: Arc::new(
                TfIdfScorer::new(research.originality_threshold)
                    .with_reference_corpus(reference_corpus),
            ),
            reviser: Arc::new(LlmReviser::new(
                provider,
                research.revision_temperature(llm.temperature),
                llm.max_tokens,
                llm.timeout(),
            )),
        }
    }
}

fn unavailable(collaborator: &str, message: impl std::fmt::Display) -> PipelineError {
    PipelineError::CollaboratorUnavailable {
        collaborator: collaborator.to_string(),
        message: message.to_string(),
    }
}

/// Sequences Decomposer -> SourceGatherer fan-out -> Synthesizer ->
/// OriginalityScorer/Reviser loop -> report.
pub struct PipelineController {
    config: ResearchConfig,
    collaborators: Collaborators,
    callback: Arc<dyn ResearchCallback>,
    data_dir: Option<PathBuf>,
}

impl PipelineController {
    pub fn new(config: ResearchConfig, collaborators: Collaborators) -> Self {
        Self {
            config,
            collaborators,
            callback: Arc::new(NoOpResearchCallback),
            data_dir: None,
        }
    }

    pub fn with_callback(mut self, callback: Arc<dyn ResearchCallback>) -> Self {
        self.callback = callback;
        self
    }

    /// Archive every run under `data_dir`.
    pub fn with_archive(mut self, data_dir: impl Into<PathBuf>) -> Self {
        self.data_dir = Some(data_dir.into());
        self
    }

    pub fn config(&self) -> &ResearchConfig {
        &self.config
    }

    /// Research `query` to completion.
    ///
    /// Always returns a finalized run: `Done` with a report, or `Failed`
    /// with a reason and whatever was produced before the failure.
    pub async fn run(&self, query: &str) -> ResearchRun {
        let mut run = ResearchRun::new(query.trim(), self.config.max_content_length);
        let archive = self.open_archive(&run);
        info!(run_id = %run.id(), query = %run.query(), "Research run started");

        if let Err(e) = self.drive(&mut run, archive.as_ref()).await {
            let reason = match &e {
                PipelineError::CollaboratorUnavailable {
                    collaborator,
                    message,
                } => {
                    let issue = RunIssue::CollaboratorUnavailable {
                        collaborator: collaborator.clone(),
                        message: message.clone(),
                    };
                    let reason = issue.to_string();
                    self.note(&mut run, archive.as_ref(), issue);
                    reason
                }
                other => other.to_string(),
            };
            error!(run_id = %run.id(), phase = %run.phase(), reason = %reason, "Research run failed");
            if run.fail(reason).is_ok() {
                record(archive.as_ref(), |a| {
                    a.append_event(EventKind::Phase {
                        phase: RunPhase::Failed,
                    })
                });
                self.callback.on_phase_change(RunPhase::Failed);
            }
        }

        record(archive.as_ref(), |a| a.write_run(&run));
        run
    }

    async fn drive(
        &self,
        run: &mut ResearchRun,
        archive: Option<&RunArchive>,
    ) -> Result<(), PipelineError> {
        if run.query().is_empty() {
            return Err(PipelineError::EmptyQuery);
        }
        let deadline = self
            .config
            .run_timeout()
            .map(|t| Instant::now() + t);
        self.callback.on_phase_change(RunPhase::Planning);
        self.plan(run, archive).await?;

        self.enter(run, archive, RunPhase::Gathering)?;
        self.gather(run, archive, deadline).await?;

        self.enter(run, archive, RunPhase::Synthesizing)?;
        let drafts = self.synthesize(run).await?;

        self.enter(run, archive, RunPhase::Reviewing)?;
        self.review(run, archive, drafts).await?;

        let report = ResearchReport::assemble(run, self.config.originality_threshold);
        run.finish(report)?;
        record(archive, |a| {
            a.append_event(EventKind::Phase {
                phase: RunPhase::Done,
            })
        });
        self.callback.on_phase_change(RunPhase::Done);
        info!(
            run_id = %run.id(),
            sections = run.sections().len(),
            issues = run.issues().len(),
            "Research run complete"
        );
        Ok(())
    }

    fn open_archive(&self, run: &ResearchRun) -> Option<RunArchive> {
        let data_dir = self.data_dir.as_ref()?;
        match RunArchive::create(data_dir, run) {
            Ok(archive) => Some(archive),
            Err(e) => {
                warn!(dir = %data_dir.display(), error = %e, "Run archive unavailable; continuing without it");
                None
            }
        }
    }

    fn enter(
        &self,
        run: &mut ResearchRun,
        archive: Option<&RunArchive>,
        phase: RunPhase,
    ) -> Result<(), PipelineError> {
        run.advance(phase)?;
        record(archive, |a| a.append_event(EventKind::Phase { phase }));
        self.callback.on_phase_change(phase);
        info!(run_id = %run.id(), phase = %phase, "Entering phase");
        Ok(())
    }

    fn note(&self, run: &mut ResearchRun, archive: Option<&RunArchive>, issue: RunIssue) {
        debug!(run_id = %run.id(), issue = %issue, "Recording issue");
        record(archive, |a| {
            a.append_event(EventKind::Issue {
                issue: issue.clone(),
            })
        });
        if let Err(e) = run.record_issue(issue) {
            warn!(error = %e, "Issue arrived after the run was finalized");
        }
    }

    async fn plan(
        &self,
        run: &mut ResearchRun,
        archive: Option<&RunArchive>,
    ) -> Result<(), PipelineError> {
        let (candidates, planner_error) =
            match self.collaborators.decomposer.decompose(run.query()).await {
                Ok(candidates) => (candidates, None),
                Err(e) if e.is_unavailable() => return Err(unavailable("language model", e)),
                Err(e) => {
                    warn!(run_id = %run.id(), error = %e, "Planner call failed");
                    (Vec::new(), Some(e))
                }
            };

        let plan = sanitize_plan(run.query(), candidates);
        if let Some(reason) = plan.degraded {
            let reason = match planner_error {
                Some(e) => format!("planner call failed ({e}); researching the query directly"),
                None => reason,
            };
            self.note(run, archive, RunIssue::PlanningDegraded { reason });
        }

        info!(
            run_id = %run.id(),
            sub_tasks = plan.sub_tasks.len(),
            "Plan ready"
        );
        record(archive, |a| a.write_sub_tasks(&plan.sub_tasks));
        run.set_sub_tasks(plan.sub_tasks)
    }

    /// Fan out one gather per sub-task, bounded by `max_concurrency`, then
    /// store results in plan order.
    ///
    /// Gathers still in flight at `deadline` are cancelled; the run goes on
    /// with whatever evidence arrived.
    async fn gather(
        &self,
        run: &mut ResearchRun,
        archive: Option<&RunArchive>,
        deadline: Option<Instant>,
    ) -> Result<(), PipelineError> {
        let sub_tasks = run.sub_tasks().to_vec();
        let semaphore = Arc::new(Semaphore::new(self.config.max_concurrency.max(1)));
        let mut set = JoinSet::new();

        for (idx, task) in sub_tasks.iter().cloned().enumerate() {
            let gatherer = Arc::clone(&self.collaborators.gatherer);
            let sem = Arc::clone(&semaphore);
            let max_results = self.config.max_results;
            set.spawn(async move {
                let _permit = sem.acquire_owned().await;
                (idx, gatherer.gather(&task, max_results).await)
            });
        }

        let mut results: Vec<Option<Result<GatherOutcome, SourceError>>> =
            (0..sub_tasks.len()).map(|_| None).collect();
        let mut timed_out = false;

        loop {
            let next = match deadline {
                Some(deadline) => match tokio::time::timeout_at(deadline, set.join_next()).await {
                    Ok(next) => next,
                    Err(_) => {
                        warn!(
                            run_id = %run.id(),
                            pending = set.len(),
                            "Run timeout reached; cancelling outstanding gathers"
                        );
                        set.abort_all();
                        timed_out = true;
                        break;
                    }
                },
                None => set.join_next().await,
            };
            match next {
                Some(Ok((idx, result))) => results[idx] = Some(result),
                Some(Err(e)) => warn!(run_id = %run.id(), error = %e, "Gather task aborted"),
                None => break,
            }
        }

        let mut unavailable_count = 0;
        let mut last_unavailable = String::new();

        for (task, result) in sub_tasks.iter().zip(results) {
            match result {
                Some(Ok(outcome)) => {
                    for dropped in outcome.dropped {
                        self.note(
                            run,
                            archive,
                            RunIssue::SourceUnavailable {
                                sub_task_id: task.id.clone(),
                                location: dropped.location,
                                reason: dropped.reason,
                            },
                        );
                    }
                    let store = run.evidence_mut()?;
                    let mut stored = 0;
                    for item in outcome.items {
                        if stored >= self.config.max_results {
                            break;
                        }
                        if store.put(&task.id, item) {
                            stored += 1;
                        }
                    }
                }
                Some(Err(e)) => {
                    if e.is_unavailable() {
                        unavailable_count += 1;
                        last_unavailable = e.to_string();
                    }
                    self.note(
                        run,
                        archive,
                        RunIssue::SourceUnavailable {
                            sub_task_id: task.id.clone(),
                            location: "search".to_string(),
                            reason: e.to_string(),
                        },
                    );
                }
                None => {
                    let reason = if timed_out {
                        "run timeout reached before gathering finished"
                    } else {
                        "gather task did not complete"
                    };
                    self.note(
                        run,
                        archive,
                        RunIssue::SourceUnavailable {
                            sub_task_id: task.id.clone(),
                            location: "search".to_string(),
                            reason: reason.to_string(),
                        },
                    );
                }
            }

            let found = run.evidence().get(&task.id).len();
            record(archive, |a| {
                a.append_evidence(&task.id, run.evidence().get(&task.id))
            });
            self.callback.on_sub_task_gathered(task, found);
            if found == 0 {
                self.note(
                    run,
                    archive,
                    RunIssue::SubTaskUnsupported {
                        sub_task_id: task.id.clone(),
                    },
                );
            }
        }

        if !sub_tasks.is_empty() && unavailable_count == sub_tasks.len() {
            return Err(unavailable("search backend", last_unavailable));
        }
        Ok(())
    }

    async fn synthesize(&self, run: &ResearchRun) -> Result<Vec<SynthesizedSection>, PipelineError> {
        let mut drafts = Vec::with_capacity(run.sub_tasks().len());
        for task in run.sub_tasks() {
            let evidence = run.evidence().get(&task.id);
            let section = match self.collaborators.synthesizer.synthesize(task, evidence).await {
                Ok(section) => section,
                Err(e) if e.is_unavailable() => return Err(unavailable("language model", e)),
                Err(e) => {
                    warn!(run_id = %run.id(), sub_task = %task.id, error = %e, "Synthesis failed; using extractive digest");
                    extractive_digest(task, evidence)
                }
            };
            drafts.push(bind_citations(task, section, evidence));
        }
        Ok(drafts)
    }

    async fn review(
        &self,
        run: &mut ResearchRun,
        archive: Option<&RunArchive>,
        drafts: Vec<SynthesizedSection>,
    ) -> Result<(), PipelineError> {
        let mut reviewed = Vec::with_capacity(drafts.len());
        for draft in drafts {
            let evidence = run.evidence().get(&draft.sub_task_id).to_vec();
            match self.review_section(draft, &evidence, archive).await {
                Ok(section) => {
                    if section.outcome == ReviewOutcome::BestEffort {
                        self.note(
                            run,
                            archive,
                            RunIssue::RevisionExhausted {
                                sub_task_id: section.section.sub_task_id.clone(),
                                iterations: section.iterations,
                                final_score: section.verdict.score,
                            },
                        );
                    }
                    reviewed.push(section);
                }
                Err(e) => {
                    run.set_sections(reviewed)?;
                    return Err(e);
                }
            }
        }
        run.set_sections(reviewed)
    }

    /// Score, then revise and re-score while flagged, at most
    /// `max_iterations` times.
    async fn review_section(
        &self,
        mut section: SynthesizedSection,
        evidence: &[EvidenceItem],
        archive: Option<&RunArchive>,
    ) -> Result<ReviewedSection, PipelineError> {
        let scorer = &self.collaborators.scorer;
        let mut verdict = scorer.score(&section, evidence);
        record(archive, |a| a.append_verdict(&verdict));
        let initially_flagged = verdict.flagged;
        let mut iterations = 0;

        while verdict.flagged && iterations < self.config.max_iterations {
            iterations += 1;
            match self.collaborators.reviser.revise(&section, &verdict).await {
                Ok(candidate) => match accept_revision(&section, &candidate) {
                    Some(accepted) => section = accepted,
                    None => warn!(
                        section = %section.sub_task_id,
                        iteration = iterations,
                        "Rewrite changed citation markers; keeping previous prose"
                    ),
                },
                Err(e) if e.is_unavailable() => return Err(unavailable("language model", e)),
                Err(e) => warn!(
                    section = %section.sub_task_id,
                    iteration = iterations,
                    error = %e,
                    "Revision failed; keeping previous prose"
                ),
            }
            verdict = scorer.score(&section, evidence).with_iteration(iterations);
            record(archive, |a| a.append_verdict(&verdict));
            debug!(
                section = %section.sub_task_id,
                iteration = iterations,
                score = verdict.score,
                flagged = verdict.flagged,
                "Re-scored section"
            );
        }

        let outcome = match (verdict.flagged, initially_flagged) {
            (true, _) => ReviewOutcome::BestEffort,
            (false, true) => ReviewOutcome::Revised,
            (false, false) => ReviewOutcome::Original,
        };
        self.callback.on_section_reviewed(&verdict, iterations);

        Ok(ReviewedSection {
            section,
            verdict,
            iterations,
            outcome,
        })
    }
}

/// Tie a draft to its sub-task and keep only citations of supplied evidence.
///
/// Markers in the prose are authoritative. A draft with no surviving
/// citation is replaced by the extractive digest.
fn bind_citations(
    task: &SubTask,
    draft: SynthesizedSection,
    evidence: &[EvidenceItem],
) -> SynthesizedSection {
    if evidence.is_empty() {
        return SynthesizedSection::no_evidence(task);
    }
    let (narrative_text, citations) = resolve_citations(&draft.narrative_text, evidence);
    if citations.is_empty() {
        return extractive_digest(task, evidence);
    }
    SynthesizedSection {
        sub_task_id: task.id.clone(),
        narrative_text,
        citations,
    }
}

/// Run an archive write, logging instead of failing the run.
fn record(
    archive: Option<&RunArchive>,
    write: impl FnOnce(&RunArchive) -> std::io::Result<()>,
) {
    if let Some(archive) = archive
        && let Err(e) = write(archive)
    {
        warn!(dir = %archive.dir().display(), error = %e, "Failed to write run archive");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::brain::MockLlmProvider;
    use crate::error::LlmError;
    use crate::research::evidence::test_item;
    use crate::research::synthesis::NO_EVIDENCE_MARKER;
    use async_trait::async_trait;
    use chrono::Utc;

    struct StubGatherer;

    #[async_trait]
    impl SourceGatherer for StubGatherer {
        async fn gather(
            &self,
            sub_task: &SubTask,
            max_results: usize,
        ) -> Result<GatherOutcome, SourceError> {
            let items = (1..=3)
                .take(max_results)
                .map(|n| {
                    test_item(
                        &sub_task.id,
                        n,
                        &format!("https://{}.example/{n}", sub_task.id.to_lowercase()),
                        &format!("Fact {n} about {} from an independent source.", sub_task.question),
                    )
                })
                .collect();
            Ok(GatherOutcome {
                items,
                dropped: vec![],
            })
        }
    }

    struct ConstScorer(bool);

    impl OriginalityScorer for ConstScorer {
        fn score(&self, section: &SynthesizedSection, _e: &[EvidenceItem]) -> OriginalityVerdict {
            OriginalityVerdict {
                section_id: section.sub_task_id.clone(),
                score: if self.0 { 0.95 } else { 0.1 },
                flagged: self.0,
                matched_source_id: section.citations.first().cloned(),
                iteration: 0,
                scored_at: Utc::now(),
            }
        }
    }

    fn plan_json() -> String {
        r#"{"tasks":[
            {"id":"T1","question":"What is A?","instructions":"definitions"},
            {"id":"T2","question":"Where is A used?","instructions":"applications"}]}"#
            .to_string()
    }

    fn controller(provider: Arc<MockLlmProvider>, flag: bool) -> PipelineController {
        let llm: Arc<dyn LlmProvider> = provider;
        let config = ResearchConfig {
            max_iterations: 2,
            ..Default::default()
        };
        let mut collaborators = Collaborators::with_llm(
            Arc::clone(&llm),
            Arc::new(StubGatherer),
            &LlmConfig::default(),
            &config,
        );
        collaborators.scorer = Arc::new(ConstScorer(flag));
        PipelineController::new(config, collaborators)
    }

    fn scripted_provider() -> Arc<MockLlmProvider> {
        Arc::new(MockLlmProvider::with_responder(|req| {
            let system = req.system_text().unwrap_or_default();
            if system.contains("research planner") {
                Ok(plan_json())
            } else {
                Ok("A is well documented [S1] and widely discussed [S2].".to_string())
            }
        }))
    }

    #[tokio::test]
    async fn test_run_reaches_done() {
        let run = controller(scripted_provider(), false).run("Tell me about A").await;
        assert_eq!(run.phase(), RunPhase::Done);
        assert_eq!(run.sub_tasks().len(), 2);
        assert_eq!(run.sections().len(), 2);
        assert_eq!(run.sections()[0].outcome, ReviewOutcome::Original);
        assert!(run.report().is_some());
        assert!(run.issues().is_empty());
    }

    #[tokio::test]
    async fn test_always_flagged_exhausts_iterations() {
        let run = controller(scripted_provider(), true).run("Tell me about A").await;
        assert_eq!(run.phase(), RunPhase::Done);
        for section in run.sections() {
            assert_eq!(section.iterations, 2);
            assert_eq!(section.outcome, ReviewOutcome::BestEffort);
        }
        let exhausted = run
            .issues()
            .iter()
            .filter(|i| matches!(i, RunIssue::RevisionExhausted { .. }))
            .count();
        assert_eq!(exhausted, 2);
    }

    #[tokio::test]
    async fn test_empty_query_fails() {
        let run = controller(scripted_provider(), false).run("   ").await;
        assert_eq!(run.phase(), RunPhase::Failed);
        assert_eq!(run.failure_reason(), Some("Research query is empty"));
    }

    #[tokio::test]
    async fn test_unreachable_model_fails_run() {
        let provider = Arc::new(MockLlmProvider::failing(LlmError::Connection {
            message: "connection refused".into(),
        }));
        let run = controller(provider, false).run("Tell me about A").await;
        assert_eq!(run.phase(), RunPhase::Failed);
        assert!(
            run.failure_reason()
                .unwrap_or_default()
                .contains("language model is unavailable")
        );
        assert!(run.issues().iter().any(RunIssue::is_fatal));
    }

    #[tokio::test]
    async fn test_planner_timeout_degrades_plan() {
        let provider = scripted_provider();
        provider.queue_error(LlmError::Timeout { timeout_secs: 60 });
        let run = controller(provider, false).run("Tell me about A").await;
        assert_eq!(run.phase(), RunPhase::Done);
        assert_eq!(run.sub_tasks(), &[SubTask::fallback("Tell me about A")]);
        assert!(matches!(
            run.issues()[0],
            RunIssue::PlanningDegraded { .. }
        ));
    }

    #[test]
    fn test_bind_citations_drops_foreign_markers() {
        let task = SubTask::new("T1", "Q?", "");
        let evidence = vec![test_item("T1", 1, "https://a.org", "alpha text")];
        let draft = SynthesizedSection {
            sub_task_id: "wrong".into(),
            narrative_text: "Claim [S1]. Other [S4].".into(),
            citations: vec!["T9-S9".into()],
        };
        let bound = bind_citations(&task, draft, &evidence);
        assert_eq!(bound.sub_task_id, "T1");
        assert_eq!(bound.citations, vec!["T1-S1"]);
        assert_eq!(bound.narrative_text, "Claim [S1]. Other .");
    }

    #[test]
    fn test_bind_citations_without_evidence() {
        let task = SubTask::new("T1", "Q?", "");
        let draft = SynthesizedSection {
            sub_task_id: "T1".into(),
            narrative_text: "Made up [S1].".into(),
            citations: vec![],
        };
        let bound = bind_citations(&task, draft, &[]);
        assert!(bound.narrative_text.starts_with(NO_EVIDENCE_MARKER));
    }
}
