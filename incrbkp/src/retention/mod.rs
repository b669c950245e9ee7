//! Retention: bound a snapshot series to the newest `keep` entries.

pub mod store;

use crate::snapshot::SnapshotId;

pub use store::{LocalStore, RemoteStore, SnapshotStore};

/// Snapshots to delete so that only the newest `keep` remain.
///
/// Newest first by timestamp, ties broken by sequence index. The returned
/// list keeps that order.
pub fn compute_evictions(existing: &[SnapshotId], keep: usize) -> Vec<SnapshotId> {
    let mut sorted = existing.to_vec();
    sorted.sort_by(|a, b| b.cmp(a));
    sorted.into_iter().skip(keep).collect()
}

/// Parse store entry names into the series of one host and namespace.
pub fn retention_set(names: &[String], host_label: &str, namespace: &str) -> Vec<SnapshotId> {
    let mut set: Vec<SnapshotId> = names
        .iter()
        .filter_map(|name| SnapshotId::parse(name, namespace))
        .filter(|id| id.belongs_to(host_label, namespace))
        .collect();
    set.sort();
    set
}
