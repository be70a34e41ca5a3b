//! # STOMP Queue CLI
//!
//! Command-line interface for reliable queues backed by STOMP brokers.
//!
//! This module provides CLI commands for:
//! - Configuration validation
//! - Enqueuing a message on a configured queue
//! - Claiming (and optionally acknowledging) the next message
//! - Reporting a queue's message count

use clap::{Parser, Subcommand};
use serde_json::{json, Value};
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use stomp_queue::{ConfigurationError, NoopHook, QueueRegistry, QueuesConfig, ReliableQueue};
use tracing::{debug, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[cfg(test)]
#[path = "lib_tests.rs"]
mod tests;

// ============================================================================
// CLI Structure
// ============================================================================

/// STOMP Queue CLI - reliable queues over STOMP durable subscriptions
#[derive(Parser)]
#[command(name = "stomp-queue")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Reliable queues over STOMP durable subscriptions")]
#[command(
    long_about = "Enqueue, claim and acknowledge messages on STOMP broker destinations through the reliable queue contract"
)]
pub struct Cli {
    /// Configuration file path
    #[arg(short, long, env = "STOMP_QUEUE_CONFIG")]
    pub config: Option<PathBuf>,

    /// Logging level or filter directive
    #[arg(short, long, default_value = "info")]
    pub log_level: String,

    /// Enable JSON logging
    #[arg(long)]
    pub json_logs: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,
}

/// Available CLI commands
#[derive(Subcommand, Debug, PartialEq, Eq)]
pub enum Commands {
    /// Load and validate the configuration, then list the queues
    Validate,

    /// Send a message to a queue
    Enqueue {
        /// Configured queue name
        #[arg(short, long)]
        queue: String,

        /// Message data as JSON; objects are sent as map messages
        #[arg(short, long)]
        data: String,
    },

    /// Claim the next message from a queue and print it as JSON
    Claim {
        /// Configured queue name
        #[arg(short, long)]
        queue: String,

        /// Acknowledge the message after printing it
        #[arg(long)]
        ack: bool,

        /// Lease hint passed to the queue
        #[arg(long, default_value = "30")]
        lease_seconds: i64,
    },

    /// Print the number of waiting messages
    Count {
        /// Configured queue name
        #[arg(short, long)]
        queue: String,
    },
}

impl Commands {
    /// Queue the command operates on, if any
    pub fn queue(&self) -> Option<&str> {
        match self {
            Self::Validate => None,
            Self::Enqueue { queue, .. } | Self::Claim { queue, .. } | Self::Count { queue } => {
                Some(queue.as_str())
            }
        }
    }
}

// ============================================================================
// Error Types
// ============================================================================

/// CLI errors
#[derive(Debug, thiserror::Error)]
pub enum CliError {
    #[error("Configuration error: {0}")]
    Configuration(#[from] ConfigurationError),

    #[error("Unknown queue: {queue}")]
    UnknownQueue { queue: String },

    #[error("Command failed: {message}")]
    CommandFailed { message: String },

    #[error("Invalid argument: {arg} - {message}")]
    InvalidArgument { arg: String, message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl CliError {
    /// Process exit code for this error
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Configuration(_) => 1,
            Self::UnknownQueue { .. } => 2,
            Self::CommandFailed { .. } => 3,
            Self::InvalidArgument { .. } => 4,
            Self::Io(_) => 5,
        }
    }
}

// ============================================================================
// Entry Points
// ============================================================================

/// Parse arguments, set up logging and run the command against stdout
pub async fn run_cli() -> Result<(), CliError> {
    let cli = Cli::parse();

    initialize_logging(&cli)?;

    let mut stdout = std::io::stdout();
    run(cli, &mut stdout).await
}

/// Load configuration and run the command, writing results to `out`
pub async fn run(cli: Cli, out: &mut dyn Write) -> Result<(), CliError> {
    let config = QueuesConfig::load(cli.config.as_deref())?;

    let Some(name) = cli.command.queue() else {
        return write_validation(&config, out);
    };

    let mut registry = QueueRegistry::from_config(&config, Arc::new(NoopHook))?;
    let queue = registry
        .get_mut(name)
        .ok_or_else(|| CliError::UnknownQueue {
            queue: name.to_string(),
        })?;

    execute(&cli.command, queue, out).await
}

/// Run a queue command against an already built queue.
///
/// The queue is closed afterwards so every frame is written before the
/// process exits.
pub async fn execute(
    command: &Commands,
    queue: &mut dyn ReliableQueue,
    out: &mut dyn Write,
) -> Result<(), CliError> {
    let result = match command {
        Commands::Validate => Ok(()),
        Commands::Enqueue { data, .. } => execute_enqueue_command(queue, data, out).await,
        Commands::Claim {
            ack, lease_seconds, ..
        } => execute_claim_command(queue, *ack, *lease_seconds, out).await,
        Commands::Count { .. } => execute_count_command(queue, out).await,
    };

    queue.close().await;
    result
}

// ============================================================================
// Command Implementations
// ============================================================================

fn initialize_logging(cli: &Cli) -> Result<(), CliError> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&cli.log_level))
        .map_err(|e| CliError::InvalidArgument {
            arg: "log-level".to_string(),
            message: e.to_string(),
        })?;

    let json_layer = cli
        .json_logs
        .then(|| tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr));
    let text_layer = (!cli.json_logs)
        .then(|| tracing_subscriber::fmt::layer().with_writer(std::io::stderr));

    tracing_subscriber::registry()
        .with(filter)
        .with(json_layer)
        .with(text_layer)
        .try_init()
        .map_err(|e| CliError::CommandFailed {
            message: format!("failed to initialize logging: {}", e),
        })
}

/// Parse `--data` as JSON
pub fn parse_data(data: &str) -> Result<Value, CliError> {
    serde_json::from_str(data).map_err(|e| CliError::InvalidArgument {
        arg: "data".to_string(),
        message: format!("not valid JSON: {}", e),
    })
}

fn write_validation(config: &QueuesConfig, out: &mut dyn Write) -> Result<(), CliError> {
    writeln!(out, "Configuration is valid ({} queues)", config.queues.len())?;
    for (name, settings) in &config.queues {
        writeln!(
            out,
            "  {}: {} via {}",
            name,
            settings.destination(),
            settings.brokers().join(", ")
        )?;
    }
    Ok(())
}

async fn execute_enqueue_command(
    queue: &mut dyn ReliableQueue,
    data: &str,
    out: &mut dyn Write,
) -> Result<(), CliError> {
    let value = parse_data(data)?;

    if !queue.enqueue(value).await {
        return Err(CliError::CommandFailed {
            message: format!("could not enqueue on {}", queue.name()),
        });
    }

    info!(queue = queue.name(), "Message enqueued");
    writeln!(out, "{}", json!({ "queue": queue.name(), "enqueued": true }))?;
    Ok(())
}

async fn execute_claim_command(
    queue: &mut dyn ReliableQueue,
    ack: bool,
    lease_seconds: i64,
    out: &mut dyn Write,
) -> Result<(), CliError> {
    if lease_seconds <= 0 {
        return Err(CliError::InvalidArgument {
            arg: "lease-seconds".to_string(),
            message: "must be greater than zero".to_string(),
        });
    }

    let item = queue
        .claim(chrono::Duration::seconds(lease_seconds))
        .await
        .ok_or_else(|| CliError::CommandFailed {
            message: format!("could not claim from {}", queue.name()),
        })?;

    let rendered = serde_json::to_string_pretty(&item).map_err(|e| CliError::CommandFailed {
        message: format!("could not render claimed item: {}", e),
    })?;
    writeln!(out, "{}", rendered)?;

    if ack {
        queue.acknowledge(item).await;
        info!(queue = queue.name(), "Message acknowledged");
    } else {
        debug!(queue = queue.name(), "Message left unacknowledged for redelivery");
    }
    Ok(())
}

async fn execute_count_command(
    queue: &mut dyn ReliableQueue,
    out: &mut dyn Write,
) -> Result<(), CliError> {
    let count = queue.count().await;
    writeln!(out, "{}", count)?;
    Ok(())
}
