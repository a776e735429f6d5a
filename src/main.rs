use std::sync::Arc;

use anyhow::{Context, Result, bail};
use chrono::{DateTime, Utc};
use clap::{Args, Parser, Subcommand};
use common::Store;
use common::cli::{CommonArgs, CommonCommands, utils};
use common::config::Configuration;
use common::queue::InMemoryQueue;
use lifecycle::{
    ClearRequest, GlobalId, MutationReceipt, NodeKind, ProjectLifecycle, Query, QueuePublisher,
};
use serde_json::json;

#[derive(Parser)]
#[command(name = "spanstore")]
#[command(about = "spanstore - delete and clear projects in the span store")]
#[command(version)]
struct Cli {
    #[command(flatten)]
    common: CommonArgs,

    #[command(subcommand)]
    command: SpanStoreCommands,
}

#[derive(Subcommand)]
enum SpanStoreCommands {
    /// Delete a project and everything under it
    DeleteProject(ProjectTarget),

    /// Delete a project's traces, optionally only those before a time
    ClearProject {
        #[command(flatten)]
        target: ProjectTarget,

        #[arg(long, help = "Only clear traces that started before this RFC 3339 time")]
        end_time: Option<DateTime<Utc>>,
    },

    /// Print the global id of a node
    EncodeId {
        #[arg(help = "Node kind, e.g. Project or Trace")]
        kind: NodeKind,
        rowid: i64,
    },

    #[command(flatten)]
    Common(CommonCommands),
}

#[derive(Args, Debug, Clone)]
struct ProjectTarget {
    #[arg(help = "Project global id, or project name with --name")]
    project: String,

    #[arg(long, help = "Treat PROJECT as a project name")]
    name: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    utils::init_logging(&cli.common);

    let config = utils::load_config(cli.common.config.as_ref())?;

    match cli.command {
        SpanStoreCommands::Common(command) => utils::handle_common_command(&command, &config),
        SpanStoreCommands::EncodeId { kind, rowid } => {
            println!("{}", GlobalId::new(kind, rowid).encode());
            Ok(())
        }
        command => {
            utils::validate_config(&config)?;
            let output = run_mutation(command, &config).await?;
            println!(
                "{}",
                serde_json::to_string_pretty(&output).context("Failed to serialize result")?
            );
            Ok(())
        }
    }
}

/// Run a delete or clear and describe the outcome as JSON.
async fn run_mutation(
    command: SpanStoreCommands,
    config: &Configuration,
) -> Result<serde_json::Value> {
    let store = Store::new(&config.database.dsn)
        .await
        .context("Failed to open span store")?;
    let queue = InMemoryQueue::connected(config.events.queue.clone())
        .await
        .context("Failed to connect invalidation queue")?;
    let lifecycle =
        ProjectLifecycle::from_store(store.clone(), Arc::new(QueuePublisher::new(queue)), config)
            .context("Invalid lifecycle settings")?;
    let query = Query::new(store.clone());

    let output = match command {
        SpanStoreCommands::DeleteProject(target) => {
            let project_ref = resolve_target(&query, &target).await?;
            let receipt = lifecycle.delete_project(&project_ref).await?;
            describe(&receipt, None)
        }
        SpanStoreCommands::ClearProject { target, end_time } => {
            let project_ref = resolve_target(&query, &target).await?;
            let request = ClearRequest {
                project_ref,
                end_time,
            };
            let receipt = lifecycle.clear_project(&request).await?;
            let remaining = receipt
                .query
                .trace_count(receipt.event.project_key())
                .await
                .context("Failed to count remaining traces")?;
            describe(&receipt, Some(remaining))
        }
        SpanStoreCommands::EncodeId { .. } | SpanStoreCommands::Common(_) => {
            bail!("not a mutation command")
        }
    };

    store.close().await;
    Ok(output)
}

async fn resolve_target(query: &Query, target: &ProjectTarget) -> Result<String> {
    if !target.name {
        return Ok(target.project.clone());
    }
    let project = query
        .project_by_name(&target.project)
        .await
        .context("Failed to look up project")?
        .with_context(|| format!("Unknown project: {}", target.project))?;
    Ok(GlobalId::project(project.id).encode())
}

fn describe(receipt: &MutationReceipt, remaining_traces: Option<i64>) -> serde_json::Value {
    if let Some(fault) = &receipt.publish_fault {
        log::warn!("Mutation committed but invalidation was not published: {fault}");
    }
    json!({
        "event": receipt.event,
        "published": receipt.published(),
        "publish_fault": receipt.publish_fault.as_ref().map(ToString::to_string),
        "remaining_traces": remaining_traces,
    })
}
