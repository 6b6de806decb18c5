//! One balance run: snapshot, plan, execute.

use async_trait::async_trait;
use serde::Serialize;
use tokio::sync::watch;
use tracing::{debug, info, instrument, warn};

use crate::error::{BackendError, BalanceError, BalanceResult};
use crate::executor::{ExecutionReport, Executor, ExecutorConfig, MigrationBackend};
use crate::model::{ExcludeSet, Host};
use crate::planner::{Plan, Planner, DEFAULT_THRESHOLD};

/// A cluster that can be inspected and can migrate VMs.
#[async_trait]
pub trait Cluster: MigrationBackend {
    /// Hosts with their running VMs. Stopped VMs must not be included.
    async fn snapshot(&self) -> Result<Vec<Host>, BackendError>;
}

/// Options for a balance run.
#[derive(Debug, Clone)]
pub struct BalanceOptions {
    /// Hosts to drain.
    pub exclude: ExcludeSet,

    /// Convergence tolerance in bytes.
    pub threshold: u64,

    /// Only plan; never submit migrations.
    pub dry: bool,

    pub executor: ExecutorConfig,
}

impl Default for BalanceOptions {
    fn default() -> Self {
        Self {
            exclude: ExcludeSet::none(),
            threshold: DEFAULT_THRESHOLD,
            dry: false,
            executor: ExecutorConfig::default(),
        }
    }
}

/// Outcome of a balance run.
#[derive(Debug, Clone, Serialize)]
pub struct BalanceReport {
    pub plan: Plan,

    /// `None` in dry mode.
    pub execution: Option<ExecutionReport>,
}

pub struct Balancer {
    options: BalanceOptions,
}

impl Balancer {
    pub fn new(options: BalanceOptions) -> Self {
        Self { options }
    }

    pub fn options(&self) -> &BalanceOptions {
        &self.options
    }

    /// Read a fresh snapshot from `cluster`, plan, and unless in dry mode
    /// carry out the plan.
    #[instrument(skip_all, fields(dry = self.options.dry))]
    pub async fn run<C>(
        &self,
        cluster: &C,
        mut shutdown: watch::Receiver<bool>,
    ) -> BalanceResult<BalanceReport>
    where
        C: Cluster + ?Sized,
    {
        debug!("Reading cluster snapshot");
        let hosts = cluster.snapshot().await.map_err(BalanceError::Snapshot)?;
        debug!(hosts = hosts.len(), "Cluster snapshot read");

        for name in self.options.exclude.iter() {
            if !hosts.iter().any(|host| &host.name == name) {
                warn!(host = %name, "Excluded host is not part of the cluster");
            }
        }

        debug!("Starting to calculate migrations");
        let plan = Planner::new(self.options.threshold).plan(&hosts, &self.options.exclude)?;

        if self.options.dry {
            info!(migrations = plan.len(), "Terminating due to dry mode");
            return Ok(BalanceReport {
                plan,
                execution: None,
            });
        }

        if plan.is_empty() {
            info!("Nothing to migrate");
        }

        let execution = Executor::new(self.options.executor.clone())
            .execute(&plan.migrations, cluster, &mut shutdown)
            .await?;

        info!(
            submitted = execution.submitted,
            succeeded = execution.succeeded.len(),
            failed = execution.failed.len(),
            in_flight = execution.in_flight.len(),
            "Balance run complete"
        );

        Ok(BalanceReport {
            plan,
            execution: Some(execution),
        })
    }
}
