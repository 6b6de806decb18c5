//! Shared test fixtures: a scripted in-memory cluster.

#![allow(dead_code)]

use std::collections::HashSet;
use std::sync::Mutex;

use async_trait::async_trait;
use pvebal_balance::{
    BackendError, Cluster, FinishedTask, Host, Migration, MigrationBackend, TaskId, Vm, VmId,
};

pub const GIB: u64 = 1024 * 1024 * 1024;

/// Build a host whose used memory is the sum of its VMs.
pub fn host(name: &str, total_gib: u64, vms: &[(&str, u64)]) -> Host {
    let vms: Vec<Vm> = vms
        .iter()
        .map(|(id, gib)| Vm::new(*id, gib * GIB, gib * GIB, name))
        .collect();
    let used = vms.iter().map(|vm| vm.used_memory).sum();
    Host::new(name, used, total_gib * GIB, vms)
}

pub fn migration(vm: &str, source: &str, target: &str) -> Migration {
    Migration::new(Vm::new(vm, GIB, GIB, source), target)
}

#[derive(Debug, Default)]
struct MockState {
    next_task: u64,
    running: Vec<(TaskId, Migration)>,
    submitted: Vec<Migration>,
    polls: usize,
    max_concurrent: usize,
    violations: Vec<String>,
}

/// In-memory cluster that finishes the oldest running tasks on every poll
/// and records any overlap between running migrations.
pub struct MockCluster {
    hosts: Vec<Host>,
    finish_per_poll: usize,
    failing: HashSet<VmId>,
    state: Mutex<MockState>,
}

impl MockCluster {
    pub fn new(hosts: Vec<Host>) -> Self {
        Self {
            hosts,
            finish_per_poll: 1,
            failing: HashSet::new(),
            state: Mutex::new(MockState::default()),
        }
    }

    /// A backend that finishes `count` tasks per poll (0 never finishes).
    pub fn finishing(mut self, count: usize) -> Self {
        self.finish_per_poll = count;
        self
    }

    /// Report migrations of `vm` as failed.
    pub fn failing(mut self, vm: &str) -> Self {
        self.failing.insert(VmId::from(vm));
        self
    }

    pub fn submitted(&self) -> Vec<Migration> {
        self.state.lock().unwrap().submitted.clone()
    }

    pub fn submitted_vms(&self) -> Vec<String> {
        self.submitted()
            .iter()
            .map(|m| m.vm.id.to_string())
            .collect()
    }

    pub fn polls(&self) -> usize {
        self.state.lock().unwrap().polls
    }

    pub fn max_concurrent(&self) -> usize {
        self.state.lock().unwrap().max_concurrent
    }

    pub fn violations(&self) -> Vec<String> {
        self.state.lock().unwrap().violations.clone()
    }
}

#[async_trait]
impl MigrationBackend for MockCluster {
    async fn submit(&self, migration: &Migration) -> Result<TaskId, BackendError> {
        let mut guard = self.state.lock().unwrap();
        let state = &mut *guard;

        for (task, running) in &state.running {
            if running.involves(migration.source()) || running.involves(&migration.target) {
                let violation = format!("{} overlaps running task {}", migration, task);
                state.violations.push(violation);
                break;
            }
        }
        if state
            .running
            .iter()
            .any(|(_, running)| running.vm.id == migration.vm.id)
        {
            let violation = format!("vm {} submitted twice", migration.vm.id);
            state.violations.push(violation);
        }

        state.next_task += 1;
        let task = TaskId::new(format!("UPID:mock:{:08X}", state.next_task));
        state.running.push((task.clone(), migration.clone()));
        state.submitted.push(migration.clone());
        state.max_concurrent = state.max_concurrent.max(state.running.len());

        Ok(task)
    }

    async fn finished_tasks(&self) -> Result<Vec<FinishedTask>, BackendError> {
        let mut state = self.state.lock().unwrap();
        state.polls += 1;

        let count = self.finish_per_poll.min(state.running.len());
        let finished = state.running.drain(..count).collect::<Vec<_>>();

        let mut tasks = vec![FinishedTask::succeeded("UPID:other:00000000")];
        for (task, migration) in finished {
            if self.failing.contains(&migration.vm.id) {
                tasks.push(FinishedTask::failed(task.as_str(), "migration aborted"));
            } else {
                tasks.push(FinishedTask::succeeded(task.as_str()));
            }
        }

        Ok(tasks)
    }
}

#[async_trait]
impl Cluster for MockCluster {
    async fn snapshot(&self) -> Result<Vec<Host>, BackendError> {
        Ok(self.hosts.clone())
    }
}
