//! Research pipeline.
//!
//! A query flows through five roles:
//! 1. **Decompose**: split the query into focused sub-tasks
//! 2. **Gather**: search, fetch and extract sources for every sub-task in parallel
//! 3. **Synthesize**: write one cited section per sub-task
//! 4. **Review**: score each section against its sources and rewrite while flagged
//! 5. **Report**: assemble and render the final document
//!
//! [`engine::PipelineController`] owns the [`session::ResearchRun`] and
//! drives the roles in that order.

pub mod archive;
pub mod decomposition;
pub mod engine;
pub mod evidence;
pub mod gather;
pub mod originality;
pub mod output;
pub mod revision;
pub mod session;
pub mod synthesis;

pub use archive::{RunArchive, RunSummary, list_runs, load_run};
pub use decomposition::{Decomposer, LlmDecomposer, RetrievalStrategy, SubTask};
pub use engine::{Collaborators, PipelineController};
pub use evidence::{ContentKind, EvidenceItem, EvidenceStore};
pub use gather::{
    DocumentFetcher, ExtractedText, GatherOutcome, RawDocument, SearchBackend, SearchHit,
    SourceGatherer, TextExtractor, WebSourceGatherer,
};
pub use originality::{OriginalityScorer, OriginalityVerdict, TfIdfScorer};
pub use output::{MarkdownRenderer, ReportFormat, ReportRenderer, ResearchReport, write_report};
pub use revision::{LlmReviser, Reviser};
pub use session::{
    NoOpResearchCallback, ResearchCallback, ResearchRun, ReviewOutcome, ReviewedSection,
    RunIssue, RunPhase,
};
pub use synthesis::{LlmSynthesizer, SynthesizedSection, Synthesizer};
