//! Greedy migration planner.
//!
//! The planner repeatedly moves one VM from the most over-utilized host to the
//! most under-utilized one until the largest absolute imbalance is within the
//! threshold, or until no move in a full scan of host pairs is beneficial.
//!
//! # Invariants
//!
//! - The caller's snapshot is never mutated; imbalances live in an
//!   [`ImbalanceTable`] owned by a single `plan` call.
//! - At most one planned migration references a given VM.
//! - Nothing is planned onto an excluded host.
//! - VMs without memory usage are never moved.
//! - The output is deterministic for a given snapshot order.

use std::collections::HashMap;

use serde::Serialize;
use tracing::{debug, info, instrument, warn};

use crate::bytes::ByteSize;
use crate::error::BalanceResult;
use crate::imbalance::{HostImbalance, ImbalanceTable};
use crate::model::{ExcludeSet, Host, HostName, Migration, Vm, VmId};

/// Default convergence tolerance: 1 GiB.
pub const DEFAULT_THRESHOLD: u64 = 1024 * 1024 * 1024;

/// Target ratios above this are worth a warning: the cluster is nearly full.
pub const HIGH_TARGET_RATIO: f64 = 0.9;

/// Why the planning loop stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Termination {
    /// Every host is within the threshold of its fair share.
    Converged,

    /// A full scan found no acceptable move; imbalance may remain.
    Exhausted,
}

/// An excluded host that keeps VMs after planning.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UndrainedHost {
    pub host: HostName,
    pub vms: Vec<VmId>,
}

/// Ordered migrations plus diagnostics about the planning run.
#[derive(Debug, Clone, Serialize)]
pub struct Plan {
    pub migrations: Vec<Migration>,
    pub target_ratio: f64,
    pub initial_imbalance: f64,
    pub residual_imbalance: f64,
    pub termination: Termination,
    pub undrained: Vec<UndrainedHost>,
}

impl Plan {
    fn empty() -> Self {
        Self {
            migrations: Vec::new(),
            target_ratio: 0.0,
            initial_imbalance: 0.0,
            residual_imbalance: 0.0,
            termination: Termination::Converged,
            undrained: Vec::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.migrations.is_empty()
    }

    pub fn len(&self) -> usize {
        self.migrations.len()
    }

    pub fn is_converged(&self) -> bool {
        self.termination == Termination::Converged
    }

    /// Whether every excluded host ends up without VMs.
    pub fn is_fully_drained(&self) -> bool {
        self.undrained.is_empty()
    }
}

/// Result of one scan over host pairs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ScanOutcome {
    /// A migration was planned and imbalances updated.
    Applied,

    /// No pair yielded an acceptable VM.
    Exhausted,
}

/// Planned migrations keyed by VM.
#[derive(Debug, Default)]
struct PendingMigrations {
    order: Vec<Migration>,
    targets: HashMap<VmId, HostName>,
}

impl PendingMigrations {
    fn target_of(&self, vm: &VmId) -> Option<&HostName> {
        self.targets.get(vm)
    }

    /// Record a migration, replacing any earlier one for the same VM.
    fn record(&mut self, migration: Migration) {
        if self.targets.contains_key(&migration.vm.id) {
            self.order.retain(|planned| planned.vm.id != migration.vm.id);
        }
        self.targets
            .insert(migration.vm.id.clone(), migration.target.clone());
        self.order.push(migration);
    }

    fn into_migrations(self) -> Vec<Migration> {
        self.order
    }
}

/// Memory rebalancing planner.
#[derive(Debug, Clone, Copy)]
pub struct Planner {
    threshold: u64,
}

impl Default for Planner {
    fn default() -> Self {
        Self::new(DEFAULT_THRESHOLD)
    }
}

impl Planner {
    /// Create a planner converging to within `threshold` bytes.
    pub fn new(threshold: u64) -> Self {
        Self { threshold }
    }

    pub fn threshold(&self) -> u64 {
        self.threshold
    }

    /// Compute the migrations that balance memory across `hosts`, draining
    /// the hosts in `exclude`.
    ///
    /// Fails only when the non-excluded hosts have no capacity at all.
    #[instrument(skip_all, fields(hosts = hosts.len(), excluded = exclude.len()))]
    pub fn plan(&self, hosts: &[Host], exclude: &ExcludeSet) -> BalanceResult<Plan> {
        if hosts.is_empty() {
            return Ok(Plan::empty());
        }

        let threshold = self.threshold as f64;
        let mut table = ImbalanceTable::compute(hosts, exclude)?;
        let target_ratio = table.target_ratio();
        let initial_imbalance = table.max_abs();

        let ratio_percent = format!("{:.0}%", target_ratio * 100.0);
        info!(
            target_ratio = %ratio_percent,
            imbalance = %ByteSize(initial_imbalance),
            "Starting migration planning"
        );

        if target_ratio > HIGH_TARGET_RATIO {
            warn!(target_ratio = %ratio_percent, "Target memory ratio is over 90%");
        }

        let mut pending = PendingMigrations::default();
        let termination = loop {
            table.sort_descending();
            let remaining = table.max_abs();
            if remaining <= threshold {
                break Termination::Converged;
            }

            debug!(imbalance = %ByteSize(remaining), "Remaining memory imbalance");

            match self.scan(hosts, &mut table, &mut pending) {
                ScanOutcome::Applied => continue,
                ScanOutcome::Exhausted => break Termination::Exhausted,
            }
        };

        let residual_imbalance = table.max_abs();
        info!(
            imbalance = %ByteSize(residual_imbalance),
            migrations = pending.order.len(),
            converged = termination == Termination::Converged,
            "Terminating migration planning"
        );

        let undrained = undrained_hosts(hosts, exclude, &pending);
        for host in &undrained {
            let vms: Vec<&str> = host.vms.iter().map(VmId::as_str).collect();
            warn!(
                host = %host.host,
                remaining_vms = ?vms,
                "Terminating without fully emptying excluded host"
            );
        }

        Ok(Plan {
            migrations: pending.into_migrations(),
            target_ratio,
            initial_imbalance,
            residual_imbalance,
            termination,
            undrained,
        })
    }

    /// Try host pairs from the most over-loaded source and the most
    /// under-loaded target, planning the first acceptable VM.
    fn scan(
        &self,
        hosts: &[Host],
        table: &mut ImbalanceTable,
        pending: &mut PendingMigrations,
    ) -> ScanOutcome {
        let count = table.entries().len();

        for source_pos in (0..count).rev() {
            let source = table.entries()[source_pos];
            if source.imbalance > 0.0 {
                continue;
            }

            for target_pos in 0..count {
                let target = table.entries()[target_pos];
                if target_pos == source_pos || target.imbalance < 0.0 || target.excluded {
                    continue;
                }

                let source_host = &hosts[source.host];
                let target_host = &hosts[target.host];
                debug!(
                    source = %source_host.name,
                    target = %target_host.name,
                    "Trying migration between hosts"
                );

                if let Some(vm) = self.select_vm(source_host, target_host, source, target, pending)
                {
                    let used_memory = vm.used_memory;
                    pending.record(Migration::new(vm.clone(), target_host.name.clone()));
                    table.transfer(source_pos, target_pos, used_memory);
                    return ScanOutcome::Applied;
                }
            }
        }

        ScanOutcome::Exhausted
    }

    /// Pick the VM that brings `source` closest to its fair share without
    /// overshooting either host by more than the threshold.
    fn select_vm<'a>(
        &self,
        source_host: &'a Host,
        target_host: &Host,
        source: HostImbalance,
        target: HostImbalance,
        pending: &PendingMigrations,
    ) -> Option<&'a Vm> {
        let threshold = self.threshold as f64;

        // Smaller VMs migrate faster, so they win ties on the closeness key.
        let mut candidates: Vec<&Vm> = source_host.vms.iter().collect();
        candidates.sort_by_key(|vm| vm.used_memory);
        candidates.sort_by(|a, b| {
            closeness(a, source.imbalance).total_cmp(&closeness(b, source.imbalance))
        });

        for vm in candidates {
            match pending.target_of(&vm.id) {
                Some(planned) if planned == &source_host.name => {
                    debug!(
                        vm_id = %vm.id,
                        target = %planned,
                        "VM already planned for migration, reconsidering"
                    );
                }
                Some(_) => {
                    debug!(vm_id = %vm.id, "VM already planned for migration, ignoring");
                    continue;
                }
                None => {}
            }

            if vm.used_memory == 0 {
                continue;
            }

            let used = vm.used_memory as f64;
            if used > -source.imbalance + threshold {
                debug!(
                    vm_id = %vm.id,
                    memory = %ByteSize::from(vm.used_memory),
                    source_imbalance = %ByteSize(source.imbalance),
                    threshold = %ByteSize::from(self.threshold),
                    "VM overshoots source host's imbalance"
                );
                continue;
            }

            if used > target.imbalance + threshold {
                debug!(
                    vm_id = %vm.id,
                    memory = %ByteSize::from(vm.used_memory),
                    target_imbalance = %ByteSize(target.imbalance),
                    threshold = %ByteSize::from(self.threshold),
                    "VM overshoots target host's imbalance"
                );
                if !source.excluded {
                    continue;
                }
                info!(
                    vm_id = %vm.id,
                    source = %source_host.name,
                    target = %target_host.name,
                    overshoot = %ByteSize(used - target.imbalance),
                    "Migrating despite overshoot because the source host must be emptied"
                );
            }

            info!(
                vm_id = %vm.id,
                memory = %ByteSize::from(vm.used_memory),
                source = %source_host.name,
                target = %target_host.name,
                "Planning migration"
            );
            return Some(vm);
        }

        None
    }
}

/// Distance of the source host from its fair share after moving `vm` off it.
fn closeness(vm: &Vm, source_imbalance: f64) -> f64 {
    (vm.used_memory as f64 + source_imbalance).abs()
}

fn undrained_hosts(
    hosts: &[Host],
    exclude: &ExcludeSet,
    pending: &PendingMigrations,
) -> Vec<UndrainedHost> {
    hosts
        .iter()
        .filter(|host| exclude.contains(&host.name))
        .filter_map(|host| {
            let vms: Vec<VmId> = host
                .vms
                .iter()
                .filter(|vm| pending.target_of(&vm.id).is_none())
                .map(|vm| vm.id.clone())
                .collect();
            (!vms.is_empty()).then(|| UndrainedHost {
                host: host.name.clone(),
                vms,
            })
        })
        .collect()
}
