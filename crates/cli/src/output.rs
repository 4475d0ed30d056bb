//! Output formatting utilities

use clap::ValueEnum;
use colored::Colorize;
use operator_lib::crd::WorkloadReadiness;
use serde::Serialize;
use tabled::{settings::Style, Table, Tabled};

/// Output format for CLI commands
#[derive(Debug, Clone, Copy, Default, ValueEnum)]
pub enum OutputFormat {
    /// Table format (default)
    #[default]
    Table,
    /// JSON format
    Json,
}

/// Print a table from a list of items
pub fn print_table<T: Tabled + Serialize>(items: &[T], format: OutputFormat) {
    match format {
        OutputFormat::Table => {
            if items.is_empty() {
                print_warning("No desired-state objects found");
                return;
            }
            let table = Table::new(items).with(Style::rounded()).to_string();
            println!("{}", table);
        }
        OutputFormat::Json => {
            if let Ok(json) = serde_json::to_string_pretty(&items) {
                println!("{}", json);
            }
        }
    }
}

/// Print a warning message
pub fn print_warning(message: &str) {
    println!("{} {}", "⚠".yellow().bold(), message);
}

/// Print an info message
pub fn print_info(message: &str) {
    println!("{} {}", "ℹ".blue().bold(), message);
}

/// `ready/desired`, colored by whether the workload is fully up
pub fn color_readiness(readiness: &WorkloadReadiness) -> String {
    let text = format!("{}/{}", readiness.ready, readiness.desired);
    if readiness.is_ready() {
        text.green().to_string()
    } else if readiness.ready > 0 {
        text.yellow().to_string()
    } else {
        text.red().to_string()
    }
}

/// Render an RFC 3339 timestamp for humans, `-` when absent
pub fn format_timestamp(ts: Option<&str>) -> String {
    match ts {
        Some(ts) => match chrono::DateTime::parse_from_rfc3339(ts) {
            Ok(dt) => dt.format("%Y-%m-%d %H:%M:%S").to_string(),
            Err(_) => ts.to_string(),
        },
        None => "-".to_string(),
    }
}
