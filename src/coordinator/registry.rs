//! Node registry: the latest liveness report of every storage node
//!
//! Reports are stored as JSON at `nodes/{nodeId}`. A new report replaces the
//! previous one; no history is kept.

use crate::common::{ClusterStore, Error, Result, METRICS};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Key prefix of heartbeat records
pub const NODES_PREFIX: &str = "nodes/";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeStatus {
    Ready,
    Pending,
    Failed,
}

/// Role the node reports inside its own replica group
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeRole {
    Leader,
    Follower,
    Learner,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeHeartbeat {
    pub status: NodeStatus,
    pub node_id: String,
    pub role: NodeRole,
    /// `host:port` of the node's slice API
    pub addr: String,
    #[serde(default)]
    pub group: Option<u64>,
    /// Last nodemap version the node has seen
    #[serde(default)]
    pub nodemap_version: i64,
}

impl NodeHeartbeat {
    /// Decode and validate a heartbeat body
    pub fn from_json(body: &[u8]) -> Result<Self> {
        let heartbeat: NodeHeartbeat =
            serde_json::from_slice(body).map_err(|e| Error::InvalidPayload(e.to_string()))?;
        heartbeat.validate()?;
        Ok(heartbeat)
    }

    pub fn validate(&self) -> Result<()> {
        if self.node_id.trim().is_empty() {
            return Err(Error::InvalidPayload("nodeId is empty".into()));
        }
        if self.addr.trim().is_empty() {
            return Err(Error::InvalidPayload("addr is empty".into()));
        }
        Ok(())
    }

    pub fn is_ready(&self) -> bool {
        self.status == NodeStatus::Ready
    }
}

pub fn node_key(node_id: &str) -> String {
    format!("{}{}", NODES_PREFIX, node_id)
}

/// Heartbeat store backed by the shared cluster store
#[derive(Clone)]
pub struct NodeRegistry {
    store: Arc<dyn ClusterStore>,
}

impl NodeRegistry {
    pub fn new(store: Arc<dyn ClusterStore>) -> Self {
        Self { store }
    }

    /// Persist `heartbeat`, replacing the node's previous report
    ///
    /// Returns once the store has acknowledged the write.
    pub async fn record_heartbeat(&self, heartbeat: &NodeHeartbeat) -> Result<()> {
        heartbeat.validate()?;
        let value = serde_json::to_vec(heartbeat)?;
        self.store
            .put(&node_key(&heartbeat.node_id), value)
            .await
            .map_err(|e| Error::RegistryUnavailable(e.to_string()))?;

        METRICS.heartbeats_recorded.inc();
        tracing::debug!(
            node_id = %heartbeat.node_id,
            addr = %heartbeat.addr,
            status = ?heartbeat.status,
            "Heartbeat recorded"
        );
        Ok(())
    }

    /// Latest report of every node, in store key order
    pub async fn list_heartbeats(&self) -> Result<Vec<NodeHeartbeat>> {
        let records = self
            .store
            .scan_prefix(NODES_PREFIX)
            .await
            .map_err(|e| Error::RegistryUnavailable(e.to_string()))?;

        let mut heartbeats = Vec::with_capacity(records.len());
        for (key, value) in records {
            match serde_json::from_slice::<NodeHeartbeat>(&value) {
                Ok(hb) => heartbeats.push(hb),
                Err(e) => tracing::warn!("Skipping unreadable heartbeat {}: {}", key, e),
            }
        }
        Ok(heartbeats)
    }
}
