//! Cluster snapshot types.
//!
//! A snapshot is read once per invocation and never mutated by the planner.
//! Hosts and VMs are identified by stable keys ([`HostName`], [`VmId`]) so
//! that lookups never depend on structural equality of composite records.

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Opaque, comparable VM identifier.
///
/// Proxmox uses numeric vmids, but nothing here relies on that.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VmId(String);

impl VmId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for VmId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for VmId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for VmId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl From<u32> for VmId {
    fn from(id: u32) -> Self {
        Self(id.to_string())
    }
}

/// Unique host (cluster node) name.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct HostName(String);

impl HostName {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for HostName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for HostName {
    fn from(name: &str) -> Self {
        Self(name.to_string())
    }
}

impl From<String> for HostName {
    fn from(name: String) -> Self {
        Self(name)
    }
}

impl PartialEq<str> for HostName {
    fn eq(&self, other: &str) -> bool {
        self.0 == other
    }
}

/// A running virtual machine as seen in the snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Vm {
    pub id: VmId,

    /// Memory currently in use, in bytes.
    pub used_memory: u64,

    /// Allocated (maximum) memory, in bytes.
    pub total_memory: u64,

    /// Host currently running the VM.
    pub host: HostName,
}

impl Vm {
    pub fn new(
        id: impl Into<VmId>,
        used_memory: u64,
        total_memory: u64,
        host: impl Into<HostName>,
    ) -> Self {
        Self {
            id: id.into(),
            used_memory,
            total_memory,
            host: host.into(),
        }
    }
}

/// A cluster node and the VMs it runs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Host {
    pub name: HostName,

    /// Memory in use on the node, in bytes. Includes overhead not attributed
    /// to any VM, so it is not necessarily the sum over `vms`.
    pub used_memory: u64,

    /// Memory capacity of the node, in bytes.
    pub total_memory: u64,

    pub vms: Vec<Vm>,
}

impl Host {
    pub fn new(
        name: impl Into<HostName>,
        used_memory: u64,
        total_memory: u64,
        vms: Vec<Vm>,
    ) -> Self {
        Self {
            name: name.into(),
            used_memory,
            total_memory,
            vms,
        }
    }

    /// Fraction of capacity in use (0 for a host without capacity).
    pub fn memory_ratio(&self) -> f64 {
        if self.total_memory == 0 {
            0.0
        } else {
            self.used_memory as f64 / self.total_memory as f64
        }
    }
}

/// A planned relocation of one VM to a destination host.
///
/// The source host is the VM's `host` field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Migration {
    pub vm: Vm,
    pub target: HostName,
}

impl Migration {
    pub fn new(vm: Vm, target: impl Into<HostName>) -> Self {
        Self {
            vm,
            target: target.into(),
        }
    }

    pub fn source(&self) -> &HostName {
        &self.vm.host
    }

    /// Whether this migration touches `host` as source or target.
    pub fn involves(&self, host: &HostName) -> bool {
        self.source() == host || &self.target == host
    }
}

impl fmt::Display for Migration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "vm {}: {} -> {}", self.vm.id, self.vm.host, self.target)
    }
}

/// Hosts to be drained: every VM moves off them and nothing moves onto them.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExcludeSet(BTreeSet<HostName>);

impl ExcludeSet {
    /// An explicitly empty exclusion set.
    pub fn none() -> Self {
        Self::default()
    }

    pub fn contains(&self, host: &HostName) -> bool {
        self.0.contains(host)
    }

    pub fn insert(&mut self, host: impl Into<HostName>) -> bool {
        self.0.insert(host.into())
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &HostName> {
        self.0.iter()
    }
}

impl<H: Into<HostName>> FromIterator<H> for ExcludeSet {
    fn from_iter<I: IntoIterator<Item = H>>(iter: I) -> Self {
        Self(iter.into_iter().map(Into::into).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_migration_source_is_vm_host() {
        let vm = Vm::new(101u32, 512, 1024, "pve1");
        let migration = Migration::new(vm, "pve2");

        assert_eq!(migration.source().as_str(), "pve1");
        assert!(migration.involves(&HostName::from("pve1")));
        assert!(migration.involves(&HostName::from("pve2")));
        assert!(!migration.involves(&HostName::from("pve3")));
        assert_eq!(migration.to_string(), "vm 101: pve1 -> pve2");
    }

    #[test]
    fn test_exclude_set_by_name() {
        let exclude: ExcludeSet = ["pve2", "pve3"].into_iter().collect();
        assert!(exclude.contains(&HostName::from("pve2")));
        assert!(!exclude.contains(&HostName::from("pve1")));
        assert_eq!(exclude.len(), 2);
        assert!(ExcludeSet::none().is_empty());
    }

    #[test]
    fn test_memory_ratio_without_capacity() {
        let host = Host::new("empty", 0, 0, vec![]);
        assert_eq!(host.memory_ratio(), 0.0);
    }

    #[test]
    fn test_ids_serialize_transparently() {
        let vm = Vm::new("a0", 1, 2, "a");
        let json = serde_json::to_value(&vm).unwrap();
        assert_eq!(json["id"], "a0");
        assert_eq!(json["host"], "a");
    }
}
