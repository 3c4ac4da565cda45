//! Fleet-wide metrics and pending-connection aggregation.
//!
//! Each manager publishes what its own load balancers observed, then reads
//! back every live manager's report. Metrics merge by concatenation per
//! backend IP; averaging is left to the calculator. Pending counts sum.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::debug;

use ringscale_core::{LocalMetrics, MergedMetrics};
use ringscale_store::{CoordinationStore, ManagerRecords, StoreResult};

/// One sample per backend, ready to merge.
pub fn to_merged(local: &LocalMetrics) -> MergedMetrics {
    local
        .iter()
        .map(|(ip, sample)| (ip.clone(), vec![sample.clone()]))
        .collect()
}

/// Concatenate every manager's samples per IP, in uuid order.
pub fn merge_metrics(all: &HashMap<String, MergedMetrics>) -> MergedMetrics {
    let mut uuids: Vec<&String> = all.keys().collect();
    uuids.sort();
    let mut merged = MergedMetrics::new();
    for uuid in uuids {
        for (ip, samples) in &all[uuid] {
            merged
                .entry(ip.clone())
                .or_default()
                .extend(samples.iter().cloned());
        }
    }
    merged
}

/// Sum every manager's pending count per URL.
pub fn merge_pending(all: &HashMap<String, HashMap<String, u64>>) -> HashMap<String, u64> {
    let mut merged = HashMap::new();
    for pending in all.values() {
        for (url, count) in pending {
            *merged.entry(url.clone()).or_insert(0u64) += count;
        }
    }
    merged
}

/// Publishes one manager's observations and reads back the fleet's.
pub struct Aggregator {
    uuid: String,
    records: ManagerRecords,
}

impl Aggregator {
    pub fn new(store: Arc<dyn CoordinationStore>, uuid: &str) -> Self {
        Self {
            uuid: uuid.to_string(),
            records: ManagerRecords::new(store),
        }
    }

    pub fn metrics(&self, local: &MergedMetrics) -> StoreResult<MergedMetrics> {
        self.records.publish_metrics(&self.uuid, local)?;
        let all = self.records.all_metrics()?;
        debug!(manager = %self.uuid, reports = all.len(), "metrics merged");
        Ok(merge_metrics(&all))
    }

    pub fn pending(&self, local: &HashMap<String, u64>) -> StoreResult<HashMap<String, u64>> {
        self.records.publish_pending(&self.uuid, local)?;
        Ok(merge_pending(&self.records.all_pending()?))
    }

    pub fn active(&self, total: u64) -> StoreResult<()> {
        self.records.publish_active(&self.uuid, total)
    }
}
