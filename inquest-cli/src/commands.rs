//! CLI subcommand handlers.

use crate::Commands;
use crate::ConfigAction;
use crate::RunsAction;
use crate::research::resolve;
use inquest_core::config::{InquestConfig, load_config, load_config_file};
use inquest_core::research::list_runs;
use std::path::Path;

/// Load the effective configuration, from `config_file` when given.
pub fn load(workspace: &Path, config_file: Option<&Path>) -> anyhow::Result<InquestConfig> {
    match config_file {
        Some(path) => load_config_file(path).map_err(|e| anyhow::anyhow!("{}", e)),
        None => load_config(Some(workspace), None)
            .map_err(|e| anyhow::anyhow!("Failed to load config: {}", e)),
    }
}

/// Handle a CLI subcommand.
pub async fn handle_command(
    command: Commands,
    workspace: &Path,
    config_file: Option<&Path>,
) -> anyhow::Result<()> {
    match command {
        Commands::Config { action } => handle_config(action, workspace, config_file),
        Commands::Runs { action } => handle_runs(action, workspace, config_file),
    }
}

fn handle_config(
    action: ConfigAction,
    workspace: &Path,
    config_file: Option<&Path>,
) -> anyhow::Result<()> {
    match action {
        ConfigAction::Init => {
            let config_dir = workspace.join(".inquest");
            std::fs::create_dir_all(&config_dir)?;

            let config_path = config_dir.join("config.toml");
            if config_path.exists() {
                println!(
                    "Configuration file already exists at: {}",
                    config_path.display()
                );
                return Ok(());
            }

            let toml_str = toml::to_string_pretty(&InquestConfig::default())?;
            std::fs::write(&config_path, &toml_str)?;
            println!(
                "Created default configuration at: {}",
                config_path.display()
            );
            Ok(())
        }
        ConfigAction::Show => {
            let config = load(workspace, config_file)?;
            println!("{}", toml::to_string_pretty(&config)?);
            Ok(())
        }
    }
}

fn handle_runs(
    action: RunsAction,
    workspace: &Path,
    config_file: Option<&Path>,
) -> anyhow::Result<()> {
    match action {
        RunsAction::List => {
            let config = load(workspace, config_file)?;
            let data_dir = resolve(workspace, &config.output.data_dir);
            let runs = list_runs(&data_dir);
            if runs.is_empty() {
                println!("No archived runs in {}", data_dir.display());
                return Ok(());
            }
            for run in runs {
                let status = match &run.failure_reason {
                    Some(reason) => format!("{} ({reason})", run.phase),
                    None => run.phase.to_string(),
                };
                println!(
                    "{}  {:<8} {:>2} sections  {}",
                    run.started_at.format("%Y-%m-%d %H:%M"),
                    status,
                    run.sections,
                    run.query
                );
                println!("    {}", run.dir.display());
            }
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_config_init_creates_file() {
        let dir = TempDir::new().unwrap();
        let command = Commands::Config {
            action: ConfigAction::Init,
        };
        handle_command(command, dir.path(), None).await.unwrap();

        let config_path = dir.path().join(".inquest").join("config.toml");
        let content = std::fs::read_to_string(&config_path).unwrap();
        assert!(content.contains("[research]"));
        assert!(content.contains("originality_threshold"));
    }

    #[tokio::test]
    async fn test_config_init_keeps_existing_file() {
        let dir = TempDir::new().unwrap();
        let config_dir = dir.path().join(".inquest");
        std::fs::create_dir_all(&config_dir).unwrap();
        std::fs::write(config_dir.join("config.toml"), "[llm]\nmodel = \"local\"\n").unwrap();

        let command = Commands::Config {
            action: ConfigAction::Init,
        };
        handle_command(command, dir.path(), None).await.unwrap();
        let content = std::fs::read_to_string(config_dir.join("config.toml")).unwrap();
        assert_eq!(content, "[llm]\nmodel = \"local\"\n");
    }

    #[tokio::test]
    async fn test_config_show_defaults() {
        let dir = TempDir::new().unwrap();
        let command = Commands::Config {
            action: ConfigAction::Show,
        };
        assert!(handle_command(command, dir.path(), None).await.is_ok());
    }

    #[tokio::test]
    async fn test_config_show_missing_explicit_file() {
        let dir = TempDir::new().unwrap();
        let command = Commands::Config {
            action: ConfigAction::Show,
        };
        let missing = dir.path().join("nope.toml");
        assert!(
            handle_command(command, dir.path(), Some(&missing))
                .await
                .is_err()
        );
    }

    #[tokio::test]
    async fn test_runs_list_empty_workspace() {
        let dir = TempDir::new().unwrap();
        let command = Commands::Runs {
            action: RunsAction::List,
        };
        assert!(handle_command(command, dir.path(), None).await.is_ok());
    }
}
