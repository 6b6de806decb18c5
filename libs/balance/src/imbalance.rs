//! Per-host memory imbalance relative to the cluster-wide target ratio.
//!
//! Positive imbalance means a host is below its fair share and has room to
//! receive VMs; negative means it is above and should shed. Excluded hosts
//! have a fair share of zero, so their imbalance is their negated usage.

use crate::error::{BalanceError, BalanceResult};
use crate::model::{ExcludeSet, Host};

/// Target memory ratio: used memory of all hosts over the capacity of the
/// hosts that may receive VMs.
pub fn target_ratio(hosts: &[Host], exclude: &ExcludeSet) -> BalanceResult<f64> {
    let used: u64 = hosts.iter().map(|host| host.used_memory).sum();
    let capacity: u64 = hosts
        .iter()
        .filter(|host| !exclude.contains(&host.name))
        .map(|host| host.total_memory)
        .sum();

    if capacity == 0 {
        return Err(BalanceError::NoCapacity {
            hosts: hosts.len(),
            excluded: hosts
                .iter()
                .filter(|host| exclude.contains(&host.name))
                .count(),
        });
    }

    Ok(used as f64 / capacity as f64)
}

/// Working imbalance of one host, owned by the planner.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HostImbalance {
    /// Index of the host in the snapshot slice.
    pub host: usize,

    /// Signed bytes between fair share and actual usage.
    pub imbalance: f64,

    pub excluded: bool,
}

/// Imbalance of every host in a snapshot.
///
/// Entries keep a working order that [`sort_descending`](Self::sort_descending)
/// rearranges in place; ties preserve the previous order.
#[derive(Debug, Clone)]
pub struct ImbalanceTable {
    target_ratio: f64,
    entries: Vec<HostImbalance>,
}

impl ImbalanceTable {
    /// Compute fresh imbalances for `hosts`.
    pub fn compute(hosts: &[Host], exclude: &ExcludeSet) -> BalanceResult<Self> {
        let target_ratio = target_ratio(hosts, exclude)?;

        let entries = hosts
            .iter()
            .enumerate()
            .map(|(index, host)| {
                let excluded = exclude.contains(&host.name);
                let target = if excluded {
                    0.0
                } else {
                    target_ratio * host.total_memory as f64
                };
                HostImbalance {
                    host: index,
                    imbalance: target - host.used_memory as f64,
                    excluded,
                }
            })
            .collect();

        Ok(Self {
            target_ratio,
            entries,
        })
    }

    pub fn target_ratio(&self) -> f64 {
        self.target_ratio
    }

    /// Entries in working order.
    pub fn entries(&self) -> &[HostImbalance] {
        &self.entries
    }

    /// Imbalance of the host at snapshot index `host`.
    pub fn imbalance_of(&self, host: usize) -> Option<f64> {
        self.entries
            .iter()
            .find(|entry| entry.host == host)
            .map(|entry| entry.imbalance)
    }

    /// Order entries from most under-utilized to most over-utilized.
    pub fn sort_descending(&mut self) {
        self.entries
            .sort_by(|a, b| b.imbalance.total_cmp(&a.imbalance));
    }

    /// Largest absolute imbalance across all hosts (0 for an empty table).
    pub fn max_abs(&self) -> f64 {
        self.entries
            .iter()
            .map(|entry| entry.imbalance.abs())
            .fold(0.0, f64::max)
    }

    /// Account for `bytes` moving from the entry at working position `source`
    /// to the one at `target`.
    pub fn transfer(&mut self, source: usize, target: usize, bytes: u64) {
        self.entries[source].imbalance += bytes as f64;
        self.entries[target].imbalance -= bytes as f64;
    }
}
