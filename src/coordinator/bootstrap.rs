//! Replica group bootstrap
//!
//! A freshly formed group is turned into one replication cluster by calling
//! its first replica:
//! 1. `POST /init`
//! 2. `POST /add-learner` with `[ordinal, addr]` for every other replica
//! 3. `POST /change-membership` with every ordinal
//!
//! Ordinals are replica positions inside the group. Calls are best effort:
//! each outcome is recorded in a [`BootstrapReport`] and a failure never
//! stops the group from being published.

use crate::common::{base_url, timestamp_now_millis, ClusterStore, Error, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::time::Duration;

/// Key prefix of persisted bootstrap reports
pub const BOOTSTRAP_PREFIX: &str = "bootstrap/";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BootstrapStep {
    /// e.g. `init`, `add-learner 2`, `change-membership`
    pub call: String,
    pub target: String,
    pub ok: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BootstrapReport {
    pub replica_addrs: Vec<String>,
    /// Version of the nodemap that introduced the group
    pub nodemap_version: i64,
    pub started_at_ms: u64,
    pub steps: Vec<BootstrapStep>,
}

impl BootstrapReport {
    pub fn new(replica_addrs: &[String]) -> Self {
        Self {
            replica_addrs: replica_addrs.to_vec(),
            nodemap_version: 0,
            started_at_ms: timestamp_now_millis(),
            steps: Vec::new(),
        }
    }

    pub fn record(&mut self, call: impl Into<String>, target: &str, outcome: Result<()>) {
        let (ok, error) = match outcome {
            Ok(()) => (true, None),
            Err(e) => (false, Some(e.to_string())),
        };
        self.steps.push(BootstrapStep {
            call: call.into(),
            target: target.to_string(),
            ok,
            error,
        });
    }

    pub fn failed_steps(&self) -> usize {
        self.steps.iter().filter(|s| !s.ok).count()
    }

    pub fn succeeded(&self) -> bool {
        self.failed_steps() == 0
    }
}

/// Turns a new replica group into a working replication cluster
#[async_trait]
pub trait GroupBootstrapper: Send + Sync {
    async fn bootstrap(&self, group: &[String]) -> BootstrapReport;
}

/// Bootstraps groups through the storage nodes' management API
pub struct HttpBootstrapper {
    http: reqwest::Client,
    timeout: Duration,
    settle: Duration,
}

impl HttpBootstrapper {
    pub fn new(timeout: Duration, settle: Duration) -> Self {
        Self {
            http: reqwest::Client::new(),
            timeout,
            settle,
        }
    }

    async fn post(&self, url: &str, body: Option<serde_json::Value>) -> Result<()> {
        let mut request = self.http.post(url).timeout(self.timeout);
        if let Some(body) = body {
            request = request.json(&body);
        }

        let response = request
            .send()
            .await
            .map_err(|e| Error::Http(format!("{}: {}", url, e)))?;
        if !response.status().is_success() {
            return Err(Error::Http(format!("{}: status {}", url, response.status())));
        }
        Ok(())
    }
}

#[async_trait]
impl GroupBootstrapper for HttpBootstrapper {
    async fn bootstrap(&self, group: &[String]) -> BootstrapReport {
        let mut report = BootstrapReport::new(group);
        let leader = match group.first() {
            Some(addr) => addr.clone(),
            None => return report,
        };
        let base = base_url(&leader);

        tracing::info!("Bootstrapping group {:?} via {}", group, leader);

        let outcome = self.post(&format!("{}/init", base), None).await;
        report.record("init", &leader, outcome);

        for (ordinal, addr) in group.iter().enumerate().skip(1) {
            tokio::time::sleep(self.settle).await;
            let outcome = self
                .post(&format!("{}/add-learner", base), Some(json!([ordinal, addr])))
                .await;
            report.record(format!("add-learner {}", ordinal), &leader, outcome);
        }

        tokio::time::sleep(self.settle).await;
        let ordinals: Vec<usize> = (0..group.len()).collect();
        let outcome = self
            .post(&format!("{}/change-membership", base), Some(json!(ordinals)))
            .await;
        report.record("change-membership", &leader, outcome);

        for step in report.steps.iter().filter(|s| !s.ok) {
            tracing::warn!(
                "Bootstrap step {} on {} failed: {}",
                step.call,
                step.target,
                step.error.as_deref().unwrap_or("unknown error")
            );
        }
        report
    }
}

fn report_key(version: i64, index: usize) -> String {
    format!("{}{:020}-{:04}", BOOTSTRAP_PREFIX, version, index)
}

/// Persist the report of the `index`-th group introduced by its nodemap version
pub async fn save_report(
    store: &dyn ClusterStore,
    index: usize,
    report: &BootstrapReport,
) -> Result<()> {
    store
        .put(&report_key(report.nodemap_version, index), serde_json::to_vec(report)?)
        .await
}

/// All persisted reports, oldest version first
pub async fn load_reports(store: &dyn ClusterStore) -> Result<Vec<BootstrapReport>> {
    let records = store.scan_prefix(BOOTSTRAP_PREFIX).await?;
    records
        .into_iter()
        .map(|(_, value)| serde_json::from_slice(&value).map_err(Error::from))
        .collect()
}
