//! Finding the leading master.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, warn};

use super::ConnectorError;

/// Leader address and cluster name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MasterInfo {
    /// `host:port` of the leading master.
    pub leader: String,
    pub cluster: Option<String>,
}

/// Resolves the leading master from a list of candidates.
#[async_trait]
pub trait MasterDiscovery: Send + Sync {
    async fn discover(&self, masters: &[String]) -> Result<MasterInfo, ConnectorError>;
}

/// Queries `/master/state` on each candidate in order.
pub struct HttpMasterDiscovery {
    client: reqwest::Client,
}

#[derive(Debug, Deserialize)]
struct MasterState {
    #[serde(default)]
    leader: Option<String>,
    #[serde(default)]
    cluster: Option<String>,
}

impl HttpMasterDiscovery {
    pub fn new() -> Result<Self, ConnectorError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()?;
        Ok(Self { client })
    }

    async fn query(&self, master: &str) -> Result<MasterInfo, ConnectorError> {
        let url = format!("http://{master}/master/state");
        debug!(url = %url, "Querying master state");

        let response = self.client.get(&url).send().await?;
        if !response.status().is_success() {
            return Err(ConnectorError::Discovery(format!(
                "{master} answered {}",
                response.status()
            )));
        }

        let state: MasterState = response.json().await?;
        let leader = state
            .leader
            .map(|l| strip_pid_prefix(&l).to_string())
            .filter(|l| !l.is_empty())
            .ok_or_else(|| ConnectorError::Discovery(format!("{master} reports no leader")))?;

        Ok(MasterInfo {
            leader,
            cluster: state.cluster,
        })
    }
}

#[async_trait]
impl MasterDiscovery for HttpMasterDiscovery {
    async fn discover(&self, masters: &[String]) -> Result<MasterInfo, ConnectorError> {
        let mut last_error = None;
        for master in masters {
            match self.query(master).await {
                Ok(info) => return Ok(info),
                Err(e) => {
                    warn!(master = %master, error = %e, "Master state query failed");
                    last_error = Some(e.to_string());
                }
            }
        }
        Err(ConnectorError::Discovery(
            last_error.unwrap_or_else(|| "no masters configured".to_string()),
        ))
    }
}

/// Always returns the same leader. Useful when the leader is known.
pub struct StaticMasterDiscovery {
    info: MasterInfo,
}

impl StaticMasterDiscovery {
    pub fn new(leader: impl Into<String>, cluster: Option<String>) -> Self {
        Self {
            info: MasterInfo {
                leader: leader.into(),
                cluster,
            },
        }
    }
}

#[async_trait]
impl MasterDiscovery for StaticMasterDiscovery {
    async fn discover(&self, _masters: &[String]) -> Result<MasterInfo, ConnectorError> {
        Ok(self.info.clone())
    }
}

/// `master@10.0.0.1:5050` → `10.0.0.1:5050`.
fn strip_pid_prefix(leader: &str) -> &str {
    leader
        .split_once('@')
        .map(|(_, addr)| addr)
        .unwrap_or(leader)
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn test_strip_pid_prefix() {
        assert_eq!(strip_pid_prefix("master@10.0.0.1:5050"), "10.0.0.1:5050");
        assert_eq!(strip_pid_prefix("10.0.0.1:5050"), "10.0.0.1:5050");
    }

    #[tokio::test]
    async fn test_http_discovery_skips_dead_master() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/master/state"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "leader": "master@10.1.1.1:5050",
                "cluster": "prod-east"
            })))
            .mount(&server)
            .await;

        let live = server.address().to_string();
        let discovery = HttpMasterDiscovery::new().unwrap();
        let info = discovery
            .discover(&["127.0.0.1:1".to_string(), live])
            .await
            .unwrap();

        assert_eq!(info.leader, "10.1.1.1:5050");
        assert_eq!(info.cluster.as_deref(), Some("prod-east"));
    }

    #[tokio::test]
    async fn test_http_discovery_without_leader_fails() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/master/state"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({})))
            .mount(&server)
            .await;

        let discovery = HttpMasterDiscovery::new().unwrap();
        let err = discovery
            .discover(&[server.address().to_string()])
            .await
            .unwrap_err();
        assert!(matches!(err, ConnectorError::Discovery(_)));
    }
}
