//! s3db-cli - Admin Command Line Interface
//!
//! Administrative commands for a connected s3db database: manifest
//! inspection, resource CRUD against an already-declared schema,
//! coordination status, and queue stats.

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use s3db::{Behavior, Config, Database, IdGeneratorConfig, QueueConfig};
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "s3db-cli")]
#[command(about = "s3db Admin CLI")]
#[command(version)]
struct Args {
    /// Connection string: s3://ACCESS:SECRET@ENDPOINT/BUCKET/PREFIX or memory://BUCKET/PREFIX
    #[arg(short, long, default_value = "memory://s3db/cli")]
    uri: String,

    /// Log level
    #[arg(long, default_value = "warn")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Manifest operations
    Manifest {
        #[command(subcommand)]
        action: ManifestCommands,
    },
    /// Resource CRUD (against an already-declared schema)
    Resource {
        /// Resource name, as it appears in the manifest
        name: String,
        #[command(subcommand)]
        action: ResourceCommands,
    },
    /// Coordination service status
    Coordination {
        #[command(subcommand)]
        action: CoordinationCommands,
    },
    /// Queue status
    Queue {
        /// Queue (resource) name
        name: String,
        #[command(subcommand)]
        action: QueueCommands,
    },
}

#[derive(Subcommand, Debug)]
enum ManifestCommands {
    /// List every declared resource and its current schema version
    Inspect,
}

#[derive(Subcommand, Debug)]
enum ResourceCommands {
    /// List records
    List {
        #[arg(short, long, default_value_t = 50)]
        limit: usize,
    },
    /// Show one record
    Get { id: String },
    /// Insert a record from a JSON literal
    Insert { json: String },
    /// Merge a JSON literal into an existing record
    Update { id: String, json: String },
    /// Delete a record
    Delete { id: String },
    /// Count records
    Count,
}

#[derive(Subcommand, Debug)]
enum CoordinationCommands {
    /// Show this process's leader/epoch status
    Status,
    /// Run one coordination tick immediately
    Tick,
}

#[derive(Subcommand, Debug)]
enum QueueCommands {
    /// Per-state counts
    Stats,
    /// Sweep expired leases back to pending
    Reap,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| args.log_level.clone().into()))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let db = Database::connect(&args.uri, Config::default()).await.map_err(|e| anyhow!(e.to_string())).context("connecting to database")?;

    match args.command {
        Commands::Manifest { action } => manifest_command(&db, action),
        Commands::Resource { name, action } => resource_command(&db, &name, action).await,
        Commands::Coordination { action } => coordination_command(&db, action).await,
        Commands::Queue { name, action } => queue_command(&db, &name, action).await,
    }
}

fn manifest_command(db: &Arc<Database>, action: ManifestCommands) -> Result<()> {
    match action {
        ManifestCommands::Inspect => {
            let manifest = db.catalog().manifest();
            println!("Manifest version: {}", manifest.version);
            println!("Last updated:     {}", manifest.last_updated);
            println!();
            if manifest.resources.is_empty() {
                println!("No resources declared");
                return Ok(());
            }
            println!("{:<30} {:<12} {:<16} {:<10}", "RESOURCE", "VERSION", "BEHAVIOR", "ATTRS");
            println!("{}", "-".repeat(70));
            for (name, entry) in &manifest.resources {
                let attrs = entry.versions.get(&entry.current_version).map_or(0, |v| v.attributes.len());
                println!("{:<30} {:<12} {:<16} {:<10}", name, entry.current_version, entry.behavior, attrs);
            }
        }
    }
    Ok(())
}

async fn open_existing_resource(db: &Arc<Database>, name: &str) -> Result<Arc<s3db::Resource>> {
    let entry = db.catalog().get_resource(name).ok_or_else(|| anyhow!("resource {name:?} is not declared in the manifest"))?;
    let attributes = entry
        .versions
        .get(&entry.current_version)
        .ok_or_else(|| anyhow!("resource {name:?} has no entry for its current version"))?
        .attributes
        .clone();
    let behavior = parse_behavior(&entry.behavior)?;
    db.resource(name, attributes, behavior, IdGeneratorConfig::default()).await.map_err(|e| anyhow!(e.to_string()))
}

fn parse_behavior(raw: &str) -> Result<Behavior> {
    Ok(match raw {
        "user-managed" => Behavior::UserManaged,
        "enforce-limits" => Behavior::EnforceLimits,
        "truncate-data" => Behavior::TruncateData,
        "body-overflow" => Behavior::BodyOverflow,
        other => return Err(anyhow!("unknown behavior {other:?}")),
    })
}

async fn resource_command(db: &Arc<Database>, name: &str, action: ResourceCommands) -> Result<()> {
    let resource = open_existing_resource(db, name).await?;
    match action {
        ResourceCommands::List { limit } => {
            let records = resource.list(Some(limit), 0).await.map_err(|e| anyhow!(e.to_string()))?;
            for record in records {
                println!("{}", serde_json::to_string(&record)?);
            }
        }
        ResourceCommands::Get { id } => {
            let record = resource.get_or_throw(&id).await.map_err(|e| anyhow!(e.to_string()))?;
            println!("{}", serde_json::to_string_pretty(&record)?);
        }
        ResourceCommands::Insert { json } => {
            let data: serde_json::Value = serde_json::from_str(&json).context("parsing JSON literal")?;
            let record = resource.insert(data).await.map_err(|e| anyhow!(e.to_string()))?;
            println!("{}", serde_json::to_string_pretty(&record)?);
        }
        ResourceCommands::Update { id, json } => {
            let changes: serde_json::Value = serde_json::from_str(&json).context("parsing JSON literal")?;
            let record = resource.update(&id, changes).await.map_err(|e| anyhow!(e.to_string()))?;
            println!("{}", serde_json::to_string_pretty(&record)?);
        }
        ResourceCommands::Delete { id } => {
            resource.delete(&id).await.map_err(|e| anyhow!(e.to_string()))?;
            println!("Record {id:?} deleted");
        }
        ResourceCommands::Count => {
            let count = resource.count().await.map_err(|e| anyhow!(e.to_string()))?;
            println!("{count}");
        }
    }
    Ok(())
}

async fn coordination_command(db: &Arc<Database>, action: CoordinationCommands) -> Result<()> {
    match action {
        CoordinationCommands::Status => {
            let metrics = db.coordination().metrics();
            println!("Self id: {}", db.coordination().self_id());
            println!("Leader:  {}", metrics.leader_id.as_deref().unwrap_or("(none)"));
            println!("Epoch:   {}", metrics.epoch);
            println!("Is self: {}", metrics.is_leader);
        }
        CoordinationCommands::Tick => {
            db.coordination().tick().await.map_err(|e| anyhow!(e.to_string()))?;
            println!("Tick complete");
        }
    }
    Ok(())
}

async fn queue_command(db: &Arc<Database>, name: &str, action: QueueCommands) -> Result<()> {
    let queue = db.queue(name, QueueConfig::default()).await.map_err(|e| anyhow!(e.to_string()))?;
    match action {
        QueueCommands::Stats => {
            let stats = queue.queue_stats().await.map_err(|e| anyhow!(e.to_string()))?;
            println!("pending:    {}", stats.pending);
            println!("processing: {}", stats.processing);
            println!("completed:  {}", stats.completed);
            println!("failed:     {}", stats.failed);
        }
        QueueCommands::Reap => {
            let swept = queue.reap(chrono::Utc::now()).await.map_err(|e| anyhow!(e.to_string()))?;
            println!("{swept} lease(s) returned to pending");
        }
    }
    Ok(())
}
