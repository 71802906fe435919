//! warden - Kubernetes automation engine
//!
//! Runs playbooks against cluster events and delivers the resulting
//! findings to the configured sinks.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing::{error, info};
use warden_runner::{LogFormat, Warden, WardenConfig, dispatch_once, telemetry, validate};

#[derive(Parser)]
#[command(name = "warden")]
#[command(about = "Kubernetes automation engine")]
#[command(version)]
struct Cli {
    /// Log output format
    #[arg(long, value_enum, default_value_t = LogFormat::Text, global = true)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the engine
    Run {
        /// Path to config file
        #[arg(short, long, env = "WARDEN_CONFIG", default_value = "/etc/warden/warden.toml")]
        config: PathBuf,
    },

    /// Check a config file without running
    Validate {
        /// Path to config file
        #[arg(short, long, env = "WARDEN_CONFIG", default_value = "/etc/warden/warden.toml")]
        config: PathBuf,
    },

    /// Run one event from a JSON file and print the dispatch report
    Dispatch {
        /// Path to config file
        #[arg(short, long, env = "WARDEN_CONFIG", default_value = "/etc/warden/warden.toml")]
        config: PathBuf,

        /// Path to the event JSON
        #[arg(short, long)]
        event: PathBuf,
    },

    /// List the playbooks in a config file with their ids
    Playbooks {
        /// Path to config file
        #[arg(short, long, env = "WARDEN_CONFIG", default_value = "/etc/warden/warden.toml")]
        config: PathBuf,
    },

    /// List the built-in actions
    Actions,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    telemetry::init(cli.log_format)?;

    match cli.command {
        Commands::Run { config } => {
            let warden = Warden::start(config).await?;
            warden
                .run(async {
                    if let Err(e) = tokio::signal::ctrl_c().await {
                        error!(error = %e, "failed to listen for shutdown signal");
                    }
                    info!("shutdown signal received");
                })
                .await?;
        }

        Commands::Validate { config } => {
            let path = config.clone();
            let loaded = tokio::task::spawn_blocking(move || validate(&path)).await??;
            println!(
                "{}: ok ({} playbooks, {} sinks)",
                config.display(),
                loaded.playbooks.len(),
                loaded.sinks.len()
            );
        }

        Commands::Dispatch { config, event } => {
            let report = tokio::task::spawn_blocking(move || dispatch_once(&config, &event)).await??;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }

        Commands::Playbooks { config } => {
            let loaded = WardenConfig::from_file(&config)?;
            println!("{:<18} {:<28} {:<24} ACTIONS", "ID", "NAME", "TRIGGERS");
            for definition in &loaded.playbooks {
                let id = definition.playbook_id()?;
                let triggers: Vec<String> = definition
                    .triggers
                    .iter()
                    .map(|t| t.event_kind().to_string())
                    .collect();
                let actions: Vec<&str> = definition.actions.iter().map(|a| a.name.as_str()).collect();
                println!(
                    "{:<18} {:<28} {:<24} {}",
                    &id[..id.len().min(16)],
                    definition.name.as_deref().unwrap_or("-"),
                    triggers.join(","),
                    actions.join(" -> ")
                );
            }
        }

        Commands::Actions => {
            let registry = warden_actions::builtin_registry()?;
            for name in registry.names() {
                println!("{name}");
            }
        }
    }

    Ok(())
}
