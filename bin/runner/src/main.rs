//! Command-line runner for flowloom workflows.
//!
//! State is restored from the configured state directory on startup and
//! saved back after every command that changes it.

mod config;
mod error;

use clap::{Parser, Subcommand};
use config::RunnerConfig;
use error::RunnerError;
use flowloom_ai::OpenAiCompatibleProvider;
use flowloom_core::{NodeId, WorkflowId};
use flowloom_workflow::{Engine, FileBlobStore, NodeStatus, RunStatus, Workflow};
use serde::Serialize;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

type CliResult<T> = flowloom_core::Result<T, RunnerError>;

#[derive(Debug, Parser)]
#[command(name = "flowloom", version, about = "Run flowloom workflows")]
struct Cli {
    /// Configuration file, merged under FLOWLOOM__* environment variables.
    #[arg(long, env = "FLOWLOOM_CONFIG", default_value = "flowloom.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// List stored workflows.
    List,
    /// Check a workflow's graph for unknown branches and cycles.
    Validate {
        /// Workflow id or name.
        workflow: String,
    },
    /// Run a workflow from its entry nodes and print the run record.
    Run {
        /// Workflow id or name.
        workflow: String,
    },
    /// Run a single node without descending to its targets.
    Node {
        /// Workflow id or name.
        workflow: String,
        /// Node id.
        node: NodeId,
        /// Seed the node with `{"retry": true}` instead of an isolation trigger.
        #[arg(long)]
        retry: bool,
    },
    /// Import a workflow definition from a JSON file.
    Import {
        /// Path to the workflow JSON.
        file: PathBuf,
    },
    /// Print a workflow definition as JSON.
    Export {
        /// Workflow id or name.
        workflow: String,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    match execute(cli).await {
        Ok(code) => code,
        Err(report) => {
            eprintln!("{report}");
            ExitCode::FAILURE
        }
    }
}

async fn execute(cli: Cli) -> CliResult<ExitCode> {
    let config = RunnerConfig::load(&cli.config).map_err(|e| RunnerError::Config {
        details: e.to_string(),
    })?;
    let engine = build_engine(&config);
    if engine.restore().await.map_err(RunnerError::from)? {
        info!(state_path = %config.state_path.display(), "restored state");
    }

    match cli.command {
        Command::List => {
            print_json(&engine.workflows().await)?;
            Ok(ExitCode::SUCCESS)
        }
        Command::Validate { workflow } => {
            let workflow = find_workflow(&engine, &workflow).await?;
            match workflow.validate() {
                Ok(()) => {
                    println!("{} is valid", workflow.name());
                    Ok(ExitCode::SUCCESS)
                }
                Err(e) => {
                    println!("{}: {e}", workflow.name());
                    Ok(ExitCode::FAILURE)
                }
            }
        }
        Command::Run { workflow } => {
            let workflow = find_workflow(&engine, &workflow).await?;
            let record = engine
                .run_workflow(workflow.id)
                .await
                .map_err(RunnerError::from)?;
            engine.save().await.map_err(RunnerError::from)?;
            print_json(&record)?;
            Ok(exit_code(record.status == RunStatus::Error))
        }
        Command::Node {
            workflow,
            node,
            retry,
        } => {
            let workflow = find_workflow(&engine, &workflow).await?;
            let runtime = if retry {
                engine.retry_node(workflow.id, node).await
            } else {
                engine.run_node_instance(workflow.id, node).await
            }
            .map_err(RunnerError::from)?;
            engine.save().await.map_err(RunnerError::from)?;
            print_json(&runtime)?;
            Ok(exit_code(runtime.status == NodeStatus::Error))
        }
        Command::Import { file } => {
            let path = file.display().to_string();
            let bytes = tokio::fs::read(&file)
                .await
                .map_err(|e| RunnerError::Import {
                    path: path.clone(),
                    details: e.to_string(),
                })?;
            let workflow: Workflow =
                serde_json::from_slice(&bytes).map_err(|e| RunnerError::Import {
                    path,
                    details: e.to_string(),
                })?;
            if let Err(e) = workflow.validate() {
                warn!(workflow = workflow.name(), error = %e, "imported workflow does not validate");
            }
            let id = engine.store().insert_workflow(workflow).await;
            engine.save().await.map_err(RunnerError::from)?;
            println!("{id}");
            Ok(ExitCode::SUCCESS)
        }
        Command::Export { workflow } => {
            print_json(&find_workflow(&engine, &workflow).await?)?;
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn build_engine(config: &RunnerConfig) -> Engine {
    Engine::builder(config.engine.clone())
        .with_model(Arc::new(OpenAiCompatibleProvider::new(config.model.clone())))
        .with_blob_store(Arc::new(FileBlobStore::new(config.state_path.clone())))
        .build()
}

/// Looks a workflow up by id, falling back to its name.
async fn find_workflow(engine: &Engine, query: &str) -> CliResult<Workflow> {
    let id = match query.parse::<WorkflowId>() {
        Ok(id) => Some(id),
        Err(_) => engine.store().find_by_name(query).await,
    };
    let workflow = match id {
        Some(id) => engine.workflow(id).await,
        None => None,
    };
    Ok(workflow.ok_or_else(|| RunnerError::WorkflowNotFound {
        query: query.to_string(),
    })?)
}

fn print_json(value: &impl Serialize) -> CliResult<()> {
    let text = serde_json::to_string_pretty(value).map_err(|e| RunnerError::Output {
        details: e.to_string(),
    })?;
    println!("{text}");
    Ok(())
}

fn exit_code(failed: bool) -> ExitCode {
    if failed {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn node_command_parses_ids_and_retry_flag() {
        let node = NodeId::new();
        let cli = Cli::try_parse_from(["flowloom", "node", "Daily", &node.to_string(), "--retry"])
            .unwrap();
        match cli.command {
            Command::Node {
                workflow,
                node: parsed,
                retry,
            } => {
                assert_eq!(workflow, "Daily");
                assert_eq!(parsed, node);
                assert!(retry);
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[tokio::test]
    async fn workflows_resolve_by_id_or_name() {
        let dir = tempfile::tempdir().unwrap();
        let config = RunnerConfig {
            state_path: dir.path().to_path_buf(),
            ..RunnerConfig::default()
        };
        let engine = build_engine(&config);
        let id = engine.store().create_workflow("Daily digest").await;

        assert_eq!(find_workflow(&engine, "Daily digest").await.unwrap().id, id);
        assert_eq!(find_workflow(&engine, &id.to_string()).await.unwrap().id, id);
        let report = find_workflow(&engine, "missing").await.unwrap_err();
        assert!(report.to_string().contains("no workflow matches 'missing'"));
    }
}
