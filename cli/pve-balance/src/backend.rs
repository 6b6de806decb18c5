//! [`Cluster`] implementation backed by the Proxmox API.

use async_trait::async_trait;
use pvebal_balance::{
    BackendError, Cluster, FinishedTask, Host, Migration, MigrationBackend, TaskId, Vm,
};
use tracing::{debug, instrument, warn};

use crate::client::ProxmoxClient;

/// A Proxmox VE cluster reached through one of its nodes.
#[derive(Debug, Clone)]
pub struct ProxmoxCluster {
    client: ProxmoxClient,
}

impl ProxmoxCluster {
    pub fn new(client: ProxmoxClient) -> Self {
        Self { client }
    }

    pub fn client(&self) -> &ProxmoxClient {
        &self.client
    }
}

#[async_trait]
impl MigrationBackend for ProxmoxCluster {
    async fn submit(&self, migration: &Migration) -> Result<TaskId, BackendError> {
        let upid = self
            .client
            .migrate(
                migration.source().as_str(),
                migration.vm.id.as_str(),
                migration.target.as_str(),
            )
            .await?;

        Ok(TaskId::new(upid))
    }

    async fn finished_tasks(&self) -> Result<Vec<FinishedTask>, BackendError> {
        let tasks = self.client.cluster_tasks().await?;

        Ok(tasks
            .into_iter()
            .filter(|task| task.is_finished())
            .map(|task| {
                if task.is_ok() {
                    FinishedTask::succeeded(task.upid)
                } else {
                    let reason = task.status.unwrap_or_else(|| "unknown status".to_string());
                    FinishedTask::failed(task.upid, reason)
                }
            })
            .collect())
    }
}

#[async_trait]
impl Cluster for ProxmoxCluster {
    #[instrument(skip_all)]
    async fn snapshot(&self) -> Result<Vec<Host>, BackendError> {
        let mut hosts = Vec::new();

        for node in self.client.nodes().await? {
            if !node.is_online() {
                warn!(host = %node.node, status = ?node.status, "Skipping node that is not online");
                continue;
            }

            let vms: Vec<Vm> = self
                .client
                .node_vms(&node.node)
                .await?
                .into_iter()
                .filter(|vm| vm.is_running())
                .map(|vm| Vm::new(vm.vmid, vm.mem, vm.maxmem, node.node.as_str()))
                .collect();

            debug!(host = %node.node, vms = vms.len(), "Read node");
            hosts.push(Host::new(node.node, node.mem, node.maxmem, vms));
        }

        Ok(hosts)
    }
}
