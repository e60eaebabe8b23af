//! Single-query research run: wiring, progress output and report writing.

use crate::{Cli, FormatArg};
use inquest_core::config::InquestConfig;
use inquest_core::research::{
    Collaborators, OriginalityVerdict, PipelineController, ReportFormat, ResearchCallback,
    RunPhase, SubTask, write_report,
};
use inquest_core::{ResearchRun, create_provider};
use inquest_tools::{build_gatherer, renderer_for};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{info, warn};

/// Fold command-line flags into the loaded configuration.
pub fn apply_overrides(config: &mut InquestConfig, cli: &Cli) {
    if let Some(model) = &cli.model {
        config.llm.model = model.clone();
    }
    if let Some(max_results) = cli.max_results {
        config.research.max_results = max_results;
    }
    if let Some(max_iterations) = cli.max_iterations {
        config.research.max_iterations = max_iterations;
    }
    if let Some(threshold) = cli.threshold {
        config.research.originality_threshold = threshold;
    }
    if let Some(output) = &cli.output {
        config.output.reports_dir = output.clone();
    }
    if let Some(format) = cli.format {
        config.output.formats = match format {
            FormatArg::Markdown => vec![ReportFormat::Markdown],
            FormatArg::Pdf => vec![ReportFormat::Pdf],
            FormatArg::Both => vec![ReportFormat::Markdown, ReportFormat::Pdf],
        };
    }
}

/// Relative paths are taken from the workspace.
pub fn resolve(workspace: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        workspace.join(path)
    }
}

/// Prints stage progress to stderr.
struct ConsoleCallback {
    quiet: bool,
}

impl ResearchCallback for ConsoleCallback {
    fn on_phase_change(&self, phase: RunPhase) {
        if !self.quiet && !phase.is_terminal() {
            eprintln!("==> {phase}");
        }
    }

    fn on_sub_task_gathered(&self, sub_task: &SubTask, sources_found: usize) {
        if !self.quiet {
            eprintln!(
                "    [{}] {} source(s): {}",
                sub_task.id, sources_found, sub_task.question
            );
        }
    }

    fn on_section_reviewed(&self, verdict: &OriginalityVerdict, iterations: usize) {
        if !self.quiet {
            eprintln!(
                "    [{}] similarity {:.2} after {} revision(s){}",
                verdict.section_id,
                verdict.score,
                iterations,
                if verdict.flagged { " (best effort)" } else { "" }
            );
        }
    }
}

/// Write every configured format; a failing format is reported and skipped.
fn write_reports(run: &ResearchRun, config: &InquestConfig, workspace: &Path) -> Vec<PathBuf> {
    let Some(report) = run.report() else {
        return Vec::new();
    };
    let reports_dir = resolve(workspace, &config.output.reports_dir);
    if let Err(e) = std::fs::create_dir_all(&reports_dir) {
        warn!(dir = %reports_dir.display(), error = %e, "Cannot create reports directory");
        return Vec::new();
    }

    let mut written = Vec::new();
    for format in &config.output.formats {
        let renderer = renderer_for(*format);
        match write_report(renderer.as_ref(), report, &reports_dir) {
            Ok(path) => {
                info!(format = %format, path = %path.display(), "Report written");
                written.push(path);
            }
            Err(e) => {
                warn!(format = %format, error = %e, "Report not written");
                eprintln!("warning: {format} report not written: {e}");
            }
        }
    }
    written
}

/// Research `query` and write the report. FAILED runs exit non-zero.
pub async fn run_query(
    query: &str,
    config: InquestConfig,
    workspace: &Path,
    quiet: bool,
) -> anyhow::Result<ExitCode> {
    let provider = create_provider(&config.llm)
        .map_err(|e| anyhow::anyhow!("Language model unavailable: {}", e))?;
    let gatherer = build_gatherer(&config.web, &config.research)
        .map_err(|e| anyhow::anyhow!("Search backend unavailable: {}", e))?;
    let collaborators =
        Collaborators::with_llm(provider, Arc::new(gatherer), &config.llm, &config.research);

    let controller = PipelineController::new(config.research.clone(), collaborators)
        .with_callback(Arc::new(ConsoleCallback { quiet }))
        .with_archive(resolve(workspace, &config.output.data_dir));

    let run = controller.run(query).await;

    if run.phase() == RunPhase::Failed {
        eprintln!(
            "Research failed: {}",
            run.failure_reason().unwrap_or("unknown reason")
        );
        return Ok(ExitCode::FAILURE);
    }

    let written = write_reports(&run, &config, workspace);
    if !quiet {
        println!(
            "Research complete: {} section(s), {} source(s), {} issue(s).",
            run.sections().len(),
            run.evidence().total_items(),
            run.issues().len()
        );
    }
    for path in &written {
        println!("{}", path.display());
    }
    if written.is_empty() {
        eprintln!("No report could be written.");
        return Ok(ExitCode::FAILURE);
    }
    Ok(ExitCode::SUCCESS)
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    #[test]
    fn test_apply_overrides() {
        let cli = Cli::parse_from([
            "inquest",
            "What is X?",
            "--max-results",
            "3",
            "--max-iterations",
            "1",
            "--threshold",
            "0.6",
            "--model",
            "gpt-4o-mini",
            "--format",
            "markdown",
            "--output",
            "out",
        ]);
        let mut config = InquestConfig::default();
        apply_overrides(&mut config, &cli);

        assert_eq!(config.research.max_results, 3);
        assert_eq!(config.research.max_iterations, 1);
        assert_eq!(config.research.originality_threshold, 0.6);
        assert_eq!(config.llm.model, "gpt-4o-mini");
        assert_eq!(config.output.formats, vec![ReportFormat::Markdown]);
        assert_eq!(config.output.reports_dir, PathBuf::from("out"));
    }

    #[test]
    fn test_no_flags_keep_config() {
        let cli = Cli::parse_from(["inquest", "What is X?"]);
        let mut config = InquestConfig::default();
        apply_overrides(&mut config, &cli);
        assert_eq!(config.research.max_results, 5);
        assert_eq!(
            config.output.formats,
            vec![ReportFormat::Markdown, ReportFormat::Pdf]
        );
    }

    #[test]
    fn test_resolve_relative_to_workspace() {
        let ws = Path::new("/tmp/ws");
        assert_eq!(resolve(ws, Path::new("reports")), PathBuf::from("/tmp/ws/reports"));
        assert_eq!(resolve(ws, Path::new("/abs")), PathBuf::from("/abs"));
    }

    #[tokio::test]
    async fn test_failed_run_writes_no_report() {
        let dir = TempDir::new().unwrap();
        let mut config = InquestConfig::default();
        config.llm.provider = "mock".into();
        config.output.formats = vec![ReportFormat::Markdown];

        let provider = create_provider(&config.llm).unwrap();
        let gatherer = build_gatherer(&config.web, &config.research).unwrap();
        let controller = PipelineController::new(
            config.research.clone(),
            Collaborators::with_llm(provider, Arc::new(gatherer), &config.llm, &config.research),
        );

        let run = controller.run("   ").await;
        assert_eq!(run.phase(), RunPhase::Failed);
        assert!(write_reports(&run, &config, dir.path()).is_empty());
        assert!(!dir.path().join("reports").exists());
    }
}
