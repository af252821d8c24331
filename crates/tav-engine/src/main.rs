//! Operator binary for the Tav task engine.
//!
//! Runs one command against the `PostgreSQL` store and prints the result as
//! JSON on stdout. Logs go to stderr.
//!
//! # Startup Sequence
//!
//! 1. Load configuration from `TAV_CONFIG` or `tav-config.yaml`
//! 2. Initialize structured logging (tracing)
//! 3. Load definitions from `infrastructure.definitions_path`
//! 4. Connect to `PostgreSQL` and apply migrations
//! 5. Run the command

mod cli;
mod error;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use clap::Parser;
use tav_core::{DefinitionRegistry, EngineConfig, LogFormat, TaskEngine, TaskStore};
use tav_db::{PgTaskStore, PostgresConfig, PostgresPool};
use tav_types::ActorRecord;
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::cli::{Cli, Command, TargetArg};
use crate::error::EngineError;

/// Default configuration file, relative to the working directory.
const DEFAULT_CONFIG_PATH: &str = "tav-config.yaml";

/// Application entry point.
///
/// # Errors
///
/// Returns an error if startup or the command fails.
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let command = Cli::parse().command;

    let config = load_config()?;
    init_logging(&config);
    info!(
        max_iterations = config.engine.max_iterations,
        schedules = config.schedules.len(),
        definitions_path = config.infrastructure.definitions_path,
        "Configuration loaded"
    );

    let registry = DefinitionRegistry::from_file(Path::new(
        &config.infrastructure.definitions_path,
    ))?;
    let (skills, targets, items) = registry.counts();
    info!(skills, targets, items, "Definitions loaded");

    let pool = PostgresPool::connect(&PostgresConfig::from_infrastructure(
        &config.infrastructure,
    ))
    .await?;
    pool.run_migrations().await?;

    let engine = TaskEngine::from_config(pool.task_store(), Arc::new(registry), &config);
    let result = run(&engine, command).await;
    pool.close().await;

    println!("{}", result?);
    Ok(())
}

/// Execute one command and render its result.
async fn run(engine: &TaskEngine<PgTaskStore>, command: Command) -> Result<String, EngineError> {
    let output = match command {
        Command::Create { actor_id } => {
            let actor_id = actor_id.unwrap_or_default();
            engine
                .store()
                .create_actor(ActorRecord {
                    actor_id,
                    ..ActorRecord::default()
                })
                .await?;
            info!(%actor_id, "Actor created");
            serde_json::to_string_pretty(&engine.store().load_snapshot(actor_id).await?)?
        }
        Command::Tick { actor_id, now } => {
            let now = now.unwrap_or_else(Utc::now);
            let report = engine.tick(actor_id, now, None, None).await?;
            serde_json::to_string_pretty(&report)?
        }
        Command::Add {
            actor_id,
            skill_id,
            target,
            priority,
        } => {
            let task = engine
                .add_task(actor_id, skill_id, TargetArg::resolve(target), priority, Utc::now())
                .await?;
            serde_json::to_string_pretty(&task)?
        }
        Command::Move { actor_id, from, to } => {
            serde_json::to_string_pretty(&engine.move_stack(actor_id, from, to).await?)?
        }
        Command::Compact { actor_id } => {
            serde_json::to_string_pretty(&engine.compact(actor_id).await?)?
        }
    };
    Ok(output)
}

/// Load configuration from `TAV_CONFIG`, else `tav-config.yaml`.
///
/// A missing file yields the defaults, with `DATABASE_URL` still applied.
fn load_config() -> Result<EngineConfig, EngineError> {
    let config_path = std::env::var_os("TAV_CONFIG")
        .map_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH), PathBuf::from);
    if config_path.exists() {
        Ok(EngineConfig::from_file(&config_path)?)
    } else {
        let mut config = EngineConfig::default();
        config.infrastructure.apply_env_overrides();
        Ok(config)
    }
}

/// Install the global subscriber. `RUST_LOG` wins over `logging.level`.
fn init_logging(config: &EngineConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.logging.level));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr);

    match config.logging.format {
        LogFormat::Json => builder.json().init(),
        LogFormat::Text => builder.init(),
    }
}
