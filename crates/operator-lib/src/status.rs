//! Agent self-status polling

use crate::crd::ObservedStatus;
use crate::error::{Error, Result};
use async_trait::async_trait;
use reqwest::Client;
use std::time::Duration;
use tracing::debug;

/// Source of a running agent's self-reported status
#[async_trait]
pub trait StatusSource: Send + Sync {
    /// Query the agent reachable at `address:port`
    async fn fetch_status(&self, address: &str, port: i32) -> Result<ObservedStatus>;
}

/// Plain HTTP `GET /status` against the agent's service address
pub struct HttpStatusReporter {
    client: Client,
}

impl HttpStatusReporter {
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::StatusUnavailable(format!("failed to create HTTP client: {}", e)))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl StatusSource for HttpStatusReporter {
    async fn fetch_status(&self, address: &str, port: i32) -> Result<ObservedStatus> {
        let url = format!("http://{}:{}/status", address, port);
        debug!(url = %url, "Querying agent status");

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| Error::StatusUnavailable(format!("request to {} failed: {}", url, e)))?;

        if !response.status().is_success() {
            return Err(Error::StatusUnavailable(format!(
                "{} answered {}",
                url,
                response.status()
            )));
        }

        response
            .json::<ObservedStatus>()
            .await
            .map_err(|e| Error::StatusUnavailable(format!("malformed status from {}: {}", url, e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reporter() -> HttpStatusReporter {
        HttpStatusReporter::new(Duration::from_secs(2)).unwrap()
    }

    fn split(url: &str) -> (String, i32) {
        let url = url::Url::parse(url).unwrap();
        (
            url.host_str().unwrap().to_string(),
            url.port().unwrap() as i32,
        )
    }

    #[tokio::test]
    async fn test_fetch_status_parses_body() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/status")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                r#"{
                    "nsToMonitor": ["default", "prod"],
                    "nsToMonitorExclude": [],
                    "nodesToMonitor": [],
                    "nodesToMonitorExclude": ["master"],
                    "instrumentRules": [{"namespaces": ["prod"], "matchString": ["api"]}]
                }"#,
            )
            .create_async()
            .await;

        let (host, port) = split(&server.url());
        let status = reporter().fetch_status(&host, port).await.unwrap();
        assert_eq!(status.ns_to_monitor, vec!["default", "prod"]);
        assert_eq!(status.nodes_to_monitor_exclude, vec!["master"]);
        assert_eq!(status.instrument_rules[0].match_string, vec!["api"]);
        assert!(status.ns_to_instrument.is_empty());
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_error_status_is_unavailable() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/status")
            .with_status(503)
            .create_async()
            .await;

        let (host, port) = split(&server.url());
        let err = reporter().fetch_status(&host, port).await.unwrap_err();
        assert!(matches!(err, Error::StatusUnavailable(_)));
    }

    #[tokio::test]
    async fn test_missing_required_field_is_unavailable() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/status")
            .with_status(200)
            .with_body(r#"{"nsToMonitor": []}"#)
            .create_async()
            .await;

        let (host, port) = split(&server.url());
        let err = reporter().fetch_status(&host, port).await.unwrap_err();
        assert!(matches!(err, Error::StatusUnavailable(_)));
    }

    #[tokio::test]
    async fn test_unreachable_agent_is_unavailable() {
        let err = reporter().fetch_status("127.0.0.1", 1).await.unwrap_err();
        assert!(matches!(err, Error::StatusUnavailable(_)));
    }
}
