//! Configuration management for the CLI

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// CLI configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// Namespace used when `--namespace` is not given
    pub default_namespace: Option<String>,
}

impl Config {
    /// Load configuration from file
    pub fn load() -> Result<Self> {
        let config_path = Self::config_path()?;

        if !config_path.exists() {
            return Ok(Self::default());
        }

        let content =
            std::fs::read_to_string(&config_path).context("Failed to read config file")?;

        serde_json::from_str(&content).context("Failed to parse config file")
    }

    /// Get the configuration file path
    fn config_path() -> Result<PathBuf> {
        let home = dirs_next::home_dir().context("Could not determine home directory")?;
        Ok(home.join(".config").join("agentctl").join("config.json"))
    }
}

/// Build a cluster client, from an explicit kubeconfig when one is given
pub async fn kube_client(kubeconfig: Option<&str>) -> Result<kube::Client> {
    let config = match kubeconfig {
        Some(path) => {
            let raw = kube::config::Kubeconfig::read_from(PathBuf::from(path))
                .with_context(|| format!("Failed to read kubeconfig {}", path))?;
            kube::Config::from_custom_kubeconfig(raw, &kube::config::KubeConfigOptions::default())
                .await
                .context("Invalid kubeconfig")?
        }
        None => kube::Config::infer()
            .await
            .context("Could not infer cluster configuration")?,
    };
    kube::Client::try_from(config).context("Failed to create cluster client")
}
