//! Agent operator CLI
//!
//! Inspect the desired-state objects the operator manages and preview the
//! configuration bundles a manifest would produce.

mod commands;
mod config;
mod output;

use anyhow::Result;
use clap::{Parser, Subcommand};
use commands::{render, status};
use std::path::PathBuf;

/// Agent operator CLI
#[derive(Parser)]
#[command(name = "agentctl")]
#[command(author, version, about = "CLI for the monitoring agent operator", long_about = None)]
pub struct Cli {
    /// Path to kubeconfig file (uses default if not specified)
    #[arg(long, env = "KUBECONFIG")]
    pub kubeconfig: Option<String>,

    /// Output format
    #[arg(long, short, default_value = "table")]
    pub format: output::OutputFormat,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Show every agent desired-state object and its observed status
    Status {
        /// Restrict to one namespace (all namespaces if not specified)
        #[arg(long, short)]
        namespace: Option<String>,
    },

    /// Print the configuration bundles a desired-state manifest produces
    Render {
        /// JSON manifest of a ClusterAgent, ClusterCollector or InfraViz
        manifest: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let settings = config::Config::load()?;

    match cli.command {
        Commands::Status { namespace } => {
            let namespace = namespace.or(settings.default_namespace);
            let client = config::kube_client(cli.kubeconfig.as_deref()).await?;
            status::show_status(&client, namespace.as_deref(), cli.format).await?;
        }
        Commands::Render { manifest } => {
            render::render_manifest(&manifest, cli.format)?;
        }
    }

    Ok(())
}
