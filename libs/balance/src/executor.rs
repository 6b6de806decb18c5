//! Migration execution scheduler.
//!
//! Submits planned migrations to an asynchronous backend while keeping every
//! host involved in at most one in-flight migration. Moves are attempted in
//! plan order, but a blocked move is deferred and a later one whose hosts are
//! free goes first.
//!
//! The loop only blocks while every pending move is blocked: it then polls the
//! backend on a fixed interval until at least one of its tasks finishes. That
//! wait is bounded by a stall timeout and aborts when shutdown is signaled.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, info, instrument, warn};

use crate::bytes::ByteSize;
use crate::error::{BackendError, ExecuteError};
use crate::model::{HostName, Migration};

/// Default interval between task status polls.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Default time to wait for any in-flight migration to finish.
pub const DEFAULT_STALL_TIMEOUT: Duration = Duration::from_secs(60 * 60);

/// Opaque handle of a backend task.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(String);

impl TaskId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Terminal state of a backend task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "status", content = "reason")]
pub enum TaskOutcome {
    Succeeded,
    Failed(String),
}

/// A task the backend reports as finished.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FinishedTask {
    pub id: TaskId,
    pub outcome: TaskOutcome,
}

impl FinishedTask {
    pub fn succeeded(id: impl Into<String>) -> Self {
        Self {
            id: TaskId::new(id),
            outcome: TaskOutcome::Succeeded,
        }
    }

    pub fn failed(id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            id: TaskId::new(id),
            outcome: TaskOutcome::Failed(reason.into()),
        }
    }
}

/// Backend that performs migrations.
#[async_trait]
pub trait MigrationBackend: Send + Sync {
    /// Start a migration and return its task handle without waiting for it.
    async fn submit(&self, migration: &Migration) -> Result<TaskId, BackendError>;

    /// All known tasks that have reached a terminal state.
    ///
    /// May include tasks this scheduler never submitted; those are ignored.
    async fn finished_tasks(&self) -> Result<Vec<FinishedTask>, BackendError>;
}

/// Execution scheduler configuration.
#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    /// Interval between task status polls while blocked.
    pub poll_interval: Duration,

    /// Give up when no in-flight migration finishes for this long.
    /// `None` waits forever.
    pub stall_timeout: Option<Duration>,

    /// Wait for in-flight migrations to finish after the last submission.
    pub wait: bool,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            poll_interval: DEFAULT_POLL_INTERVAL,
            stall_timeout: Some(DEFAULT_STALL_TIMEOUT),
            wait: false,
        }
    }
}

/// A migration whose task finished with an error.
#[derive(Debug, Clone, Serialize)]
pub struct FailedMigration {
    pub migration: Migration,
    pub reason: String,
}

/// What happened to the submitted migrations.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ExecutionReport {
    /// Number of migrations handed to the backend.
    pub submitted: usize,

    pub succeeded: Vec<Migration>,

    pub failed: Vec<FailedMigration>,

    /// Migrations still running when execution returned (only without `wait`).
    pub in_flight: Vec<Migration>,
}

/// Submitted tasks and the hosts they occupy.
#[derive(Debug, Default)]
struct InFlight {
    tasks: Vec<(TaskId, Migration)>,
}

impl InFlight {
    fn len(&self) -> usize {
        self.tasks.len()
    }

    fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// First host of `migration` that is already part of a running task.
    fn busy_host<'a>(&self, migration: &'a Migration) -> Option<&'a HostName> {
        [migration.source(), &migration.target]
            .into_iter()
            .find(|host| self.tasks.iter().any(|(_, running)| running.involves(host)))
    }

    fn insert(&mut self, task: TaskId, migration: Migration) {
        self.tasks.push((task, migration));
    }

    fn remove(&mut self, task: &TaskId) -> Option<Migration> {
        let index = self.tasks.iter().position(|(id, _)| id == task)?;
        Some(self.tasks.remove(index).1)
    }

    /// Drop finished tasks, recording their outcome. Returns how many of our
    /// tasks finished.
    fn complete(&mut self, finished: Vec<FinishedTask>, report: &mut ExecutionReport) -> usize {
        let mut completed = 0;

        for task in finished {
            let Some(migration) = self.remove(&task.id) else {
                continue;
            };
            completed += 1;

            match task.outcome {
                TaskOutcome::Succeeded => {
                    info!(
                        vm_id = %migration.vm.id,
                        task = %task.id,
                        target = %migration.target,
                        "Migration finished"
                    );
                    report.succeeded.push(migration);
                }
                TaskOutcome::Failed(reason) => {
                    warn!(
                        vm_id = %migration.vm.id,
                        task = %task.id,
                        target = %migration.target,
                        reason = %reason,
                        "Migration failed"
                    );
                    report.failed.push(FailedMigration { migration, reason });
                }
            }
        }

        completed
    }

    fn into_migrations(self) -> Vec<Migration> {
        self.tasks.into_iter().map(|(_, migration)| migration).collect()
    }
}

/// Drives planned migrations through a [`MigrationBackend`].
#[derive(Debug, Clone, Default)]
pub struct Executor {
    config: ExecutorConfig,
}

impl Executor {
    pub fn new(config: ExecutorConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ExecutorConfig {
        &self.config
    }

    /// Submit every migration, never letting a host take part in two running
    /// migrations at once.
    ///
    /// Returns once all migrations are submitted, or, with `wait`, once all
    /// of them have finished.
    #[instrument(skip_all, fields(migrations = migrations.len(), wait = self.config.wait))]
    pub async fn execute<B>(
        &self,
        migrations: &[Migration],
        backend: &B,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Result<ExecutionReport, ExecuteError>
    where
        B: MigrationBackend + ?Sized,
    {
        let mut pending: Vec<Migration> = migrations.to_vec();
        let mut in_flight = InFlight::default();
        let mut report = ExecutionReport::default();

        while !pending.is_empty() {
            if *shutdown.borrow() {
                return Err(ExecuteError::Cancelled {
                    pending: pending.len(),
                    in_flight: in_flight.len(),
                });
            }

            let Some(index) = next_submittable(&pending, &in_flight) else {
                // Every pending migration is blocked by a running one.
                self.wait_for_tasks(backend, &mut in_flight, &mut report, shutdown, pending.len())
                    .await?;
                continue;
            };

            let migration = pending.remove(index);
            info!(
                vm_id = %migration.vm.id,
                memory = %ByteSize::from(migration.vm.used_memory),
                source = %migration.source(),
                target = %migration.target,
                "Migrating VM"
            );
            let task = backend.submit(&migration).await?;
            debug!(vm_id = %migration.vm.id, task = %task, "Migration submitted");

            in_flight.insert(task, migration);
            report.submitted += 1;
        }

        if self.config.wait {
            while !in_flight.is_empty() {
                self.wait_for_tasks(backend, &mut in_flight, &mut report, shutdown, 0)
                    .await?;
            }
        }

        report.in_flight = in_flight.into_migrations();
        Ok(report)
    }

    /// Poll until at least one of our tasks finished.
    async fn wait_for_tasks<B>(
        &self,
        backend: &B,
        in_flight: &mut InFlight,
        report: &mut ExecutionReport,
        shutdown: &mut watch::Receiver<bool>,
        pending: usize,
    ) -> Result<(), ExecuteError>
    where
        B: MigrationBackend + ?Sized,
    {
        info!(tasks = in_flight.len(), "Waiting for completion of tasks");
        let started = Instant::now();

        loop {
            let finished = backend.finished_tasks().await?;
            if in_flight.complete(finished, report) > 0 {
                return Ok(());
            }

            let elapsed = started.elapsed();
            if let Some(limit) = self.config.stall_timeout {
                if elapsed >= limit {
                    return Err(ExecuteError::Stalled {
                        elapsed,
                        in_flight: in_flight.len(),
                    });
                }
            }

            tokio::select! {
                _ = tokio::time::sleep(self.config.poll_interval) => {}
                Ok(()) = shutdown.changed() => {
                    if *shutdown.borrow() {
                        return Err(ExecuteError::Cancelled {
                            pending,
                            in_flight: in_flight.len(),
                        });
                    }
                }
            }
        }
    }
}

/// Index of the first pending migration whose hosts are both free.
fn next_submittable(pending: &[Migration], in_flight: &InFlight) -> Option<usize> {
    for (index, migration) in pending.iter().enumerate() {
        match in_flight.busy_host(migration) {
            Some(host) => {
                debug!(
                    vm_id = %migration.vm.id,
                    host = %host,
                    "Postponing migration because host is busy"
                );
            }
            None => return Some(index),
        }
    }
    None
}
