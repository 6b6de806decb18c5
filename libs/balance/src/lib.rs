//! Memory rebalancing for VM clusters.
//!
//! The engine has two stages:
//!
//! - **Planning** ([`Planner`]): a greedy fixed-point loop that turns a cluster
//!   snapshot into an ordered list of migrations so that every host's memory
//!   usage approaches the same fraction of its capacity. Excluded hosts are
//!   drained.
//! - **Execution** ([`Executor`]): submits those migrations to a
//!   [`MigrationBackend`] so that no host takes part in two running
//!   migrations at once, waiting for tasks to finish when every remaining
//!   migration is blocked.
//!
//! [`Balancer`] ties both together against a [`Cluster`].
//!
//! # Invariants
//!
//! - Planning never mutates the snapshot and is deterministic
//! - A VM is referenced by at most one planned migration
//! - A host is source or target of at most one in-flight migration

pub mod balancer;
pub mod bytes;
pub mod error;
pub mod executor;
pub mod imbalance;
pub mod model;
pub mod planner;

pub use balancer::{BalanceOptions, BalanceReport, Balancer, Cluster};
pub use bytes::ByteSize;
pub use error::{BackendError, BalanceError, BalanceResult, ExecuteError};
pub use executor::{
    ExecutionReport, Executor, ExecutorConfig, FailedMigration, FinishedTask, MigrationBackend,
    TaskId, TaskOutcome,
};
pub use model::{ExcludeSet, Host, HostName, Migration, Vm, VmId};
pub use planner::{Plan, Planner, Termination, UndrainedHost, DEFAULT_THRESHOLD};
