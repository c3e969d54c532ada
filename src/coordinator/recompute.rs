//! Nodemap recomputation
//!
//! Every cycle tries to take the recomputation lock; losers skip the cycle.
//! The holder:
//! 1. reads heartbeats and the current nodemap
//! 2. groups ready, not yet assigned nodes into groups of `group_size`
//! 3. bootstraps each new group (best effort)
//! 4. repartitions the keyspace over existing + new groups
//! 5. publishes the result as version `previous + 1`
//! 6. records the bootstrap reports of the published groups
//!
//! A cycle that forms no group writes nothing.

use crate::common::{
    ClusterStore, CoordinatorConfig, Error, LockService, Nodemap, Result, StoreHandles, METRICS,
};
use crate::coordinator::bootstrap::{save_report, GroupBootstrapper};
use crate::coordinator::lock::LeaseGuard;
use crate::coordinator::registry::{NodeHeartbeat, NodeRegistry};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::MissedTickBehavior;

/// Key prefix holding the published nodemap
pub const NODEMAP_PREFIX: &str = "nodemap/";

/// Key of the published nodemap
pub const NODEMAP_KEY: &str = "nodemap/current";

/// Result of one recomputation cycle
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CycleOutcome {
    /// Another coordinator held the lock
    Skipped,
    /// No new group could be formed
    Unchanged { version: i64 },
    Published {
        version: i64,
        new_groups: usize,
        ungrouped: usize,
    },
}

/// New groups formed from one registry snapshot
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GroupPlan {
    pub groups: Vec<Vec<String>>,
    /// Ready, unassigned nodes left over by the trailing partial group
    pub ungrouped: Vec<String>,
}

/// Chunk ready nodes absent from `current` into groups of exactly `group_size`
///
/// Order follows `heartbeats`. Duplicate addresses count once.
pub fn plan_groups(
    heartbeats: &[NodeHeartbeat],
    current: &Nodemap,
    group_size: usize,
) -> GroupPlan {
    let assigned = current.assigned_addrs();
    let mut seen = HashSet::new();

    let candidates: Vec<String> = heartbeats
        .iter()
        .filter(|hb| hb.is_ready())
        .map(|hb| hb.addr.clone())
        .filter(|addr| !assigned.contains(addr.as_str()))
        .filter(|addr| seen.insert(addr.clone()))
        .collect();

    if group_size == 0 {
        return GroupPlan {
            groups: Vec::new(),
            ungrouped: candidates,
        };
    }

    let mut plan = GroupPlan::default();
    for chunk in candidates.chunks(group_size) {
        if chunk.len() == group_size {
            plan.groups.push(chunk.to_vec());
        } else {
            plan.ungrouped.extend_from_slice(chunk);
        }
    }
    plan
}

/// Read the nodemap at `nodemap/current`; empty (version 0) when absent
pub async fn load_current(store: &dyn ClusterStore) -> Result<Nodemap> {
    match store.get(NODEMAP_KEY).await? {
        Some(bytes) => Ok(serde_json::from_slice(&bytes)?),
        None => Ok(Nodemap::empty()),
    }
}

/// Read the published nodemap, requiring exactly one record under `nodemap/`
pub async fn load_published(store: &dyn ClusterStore) -> Result<Nodemap> {
    let records = store.scan_prefix(NODEMAP_PREFIX).await?;
    match records.as_slice() {
        [(_, value)] => Ok(serde_json::from_slice(value)?),
        _ => Err(Error::NodemapCorrupted(format!(
            "expected one nodemap record, found {}",
            records.len()
        ))),
    }
}

pub struct NodemapCoordinator {
    node_id: String,
    config: CoordinatorConfig,
    registry: NodeRegistry,
    store: Arc<dyn ClusterStore>,
    locks: Arc<dyn LockService>,
    bootstrapper: Arc<dyn GroupBootstrapper>,
}

impl NodemapCoordinator {
    pub fn new(
        node_id: String,
        config: CoordinatorConfig,
        stores: StoreHandles,
        bootstrapper: Arc<dyn GroupBootstrapper>,
    ) -> Self {
        Self {
            node_id,
            config,
            registry: NodeRegistry::new(stores.kv.clone()),
            store: stores.kv,
            locks: stores.locks,
            bootstrapper,
        }
    }

    /// Run one cycle under the recomputation lock
    pub async fn run_cycle(&self) -> Result<CycleOutcome> {
        let guard = match LeaseGuard::acquire(
            self.locks.clone(),
            &self.config.lock_name,
            &self.node_id,
            self.config.lock_ttl(),
        )
        .await?
        {
            Some(guard) => guard,
            None => {
                METRICS.cycles_skipped.inc();
                tracing::debug!("Lock {} held elsewhere, skipping cycle", self.config.lock_name);
                return Ok(CycleOutcome::Skipped);
            }
        };
        METRICS.cycles_run.inc();

        let outcome = self.recompute(&guard).await;
        if let Err(e) = guard.release().await {
            tracing::warn!("Failed to release {}: {}", self.config.lock_name, e);
        }
        outcome
    }

    async fn recompute(&self, guard: &LeaseGuard) -> Result<CycleOutcome> {
        let heartbeats = self.registry.list_heartbeats().await?;
        let current = load_current(self.store.as_ref()).await?;

        let plan = plan_groups(&heartbeats, &current, self.config.group_size);
        if plan.groups.is_empty() {
            tracing::debug!(
                version = current.version,
                ungrouped = plan.ungrouped.len(),
                "No new replica group"
            );
            return Ok(CycleOutcome::Unchanged {
                version: current.version,
            });
        }

        let version = current.version + 1;
        let new_groups = plan.groups.len();

        let mut reports = Vec::with_capacity(new_groups);
        for group in &plan.groups {
            guard.ensure_held()?;
            let mut report = self.bootstrapper.bootstrap(group).await;
            report.nodemap_version = version;

            let failed = report.failed_steps();
            if failed > 0 {
                METRICS.bootstrap_failures.add(failed as u64);
            }
            reports.push(report);
        }

        let mut groups = current.groups();
        groups.extend(plan.groups);
        let nodemap = Nodemap::from_groups(groups, version);
        nodemap.validate()?;

        guard.ensure_held()?;
        self.store
            .put(NODEMAP_KEY, serde_json::to_vec(&nodemap)?)
            .await?;

        // Reports only name versions that were actually published.
        for (index, report) in reports.iter().enumerate() {
            if let Err(e) = save_report(self.store.as_ref(), index, report).await {
                tracing::warn!(
                    "Failed to persist bootstrap report for {:?}: {}",
                    report.replica_addrs,
                    e
                );
            }
        }

        METRICS.nodemaps_published.inc();
        METRICS.nodemap_version.set(version.max(0) as u64);
        tracing::info!(
            version,
            shards = nodemap.shards.len(),
            new_groups,
            ungrouped = plan.ungrouped.len(),
            token = guard.token(),
            "Published nodemap"
        );

        Ok(CycleOutcome::Published {
            version,
            new_groups,
            ungrouped: plan.ungrouped.len(),
        })
    }

    /// Run cycles forever at the configured interval
    ///
    /// The first cycle starts after a random delay of up to a quarter period.
    pub async fn run(self: Arc<Self>) {
        let period = self.config.cycle_interval();
        let jitter_ms = (period.as_millis() as u64 / 4).max(1);
        tokio::time::sleep(Duration::from_millis(rand::random::<u64>() % jitter_ms)).await;

        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            interval.tick().await;
            match self.run_cycle().await {
                Ok(_) => {}
                Err(e) if e.is_retryable() => {
                    tracing::warn!("Recomputation cycle failed, retrying next period: {}", e);
                }
                Err(e) => tracing::error!("Recomputation cycle failed: {}", e),
            }
        }
    }
}
