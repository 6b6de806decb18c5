//! Output formatting for balance reports.

use std::collections::HashMap;

use clap::ValueEnum;
use colored::Colorize;
use pvebal_balance::{BalanceReport, ByteSize, ExecutionReport, Migration, Termination, VmId};
use tabled::{Table, Tabled};

/// Output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable table format.
    #[default]
    Table,
    /// JSON format.
    Json,
}

/// One planned migration in table output.
#[derive(Debug, Clone, PartialEq, Eq, Tabled)]
pub struct MigrationRow {
    #[tabled(rename = "#")]
    pub step: usize,

    #[tabled(rename = "VM")]
    pub vm: String,

    #[tabled(rename = "Memory")]
    pub memory: String,

    #[tabled(rename = "From")]
    pub source: String,

    #[tabled(rename = "To")]
    pub target: String,

    #[tabled(rename = "Status")]
    pub status: String,
}

/// Build table rows for a report, with the execution status of each
/// migration when the plan was carried out.
pub fn migration_rows(report: &BalanceReport) -> Vec<MigrationRow> {
    let statuses = report.execution.as_ref().map(statuses);

    report
        .plan
        .migrations
        .iter()
        .enumerate()
        .map(|(index, migration)| MigrationRow {
            step: index + 1,
            vm: migration.vm.id.to_string(),
            memory: ByteSize::from(migration.vm.used_memory).to_string(),
            source: migration.source().to_string(),
            target: migration.target.to_string(),
            status: match &statuses {
                None => "planned".to_string(),
                Some(statuses) => statuses
                    .get(&migration.vm.id)
                    .cloned()
                    .unwrap_or_else(|| "not submitted".to_string()),
            },
        })
        .collect()
}

fn statuses(execution: &ExecutionReport) -> HashMap<VmId, String> {
    let mut statuses = HashMap::new();
    let mut mark = |migrations: &[Migration], status: &str| {
        for migration in migrations {
            statuses.insert(migration.vm.id.clone(), status.to_string());
        }
    };
    mark(&execution.succeeded, "done");
    mark(&execution.in_flight, "running");

    for failed in &execution.failed {
        statuses.insert(
            failed.migration.vm.id.clone(),
            format!("failed: {}", failed.reason),
        );
    }
    statuses
}

/// Print a report in the specified format.
pub fn print_report(report: &BalanceReport, format: OutputFormat) {
    match format {
        OutputFormat::Table => print_table(report),
        OutputFormat::Json => {
            let json = serde_json::to_string_pretty(report).unwrap_or_else(|_| "{}".to_string());
            println!("{}", json);
        }
    }
}

fn print_table(report: &BalanceReport) {
    let plan = &report.plan;

    println!(
        "{} {:.0}%  {} {} -> {}{}",
        "Target ratio:".bold(),
        plan.target_ratio * 100.0,
        "Imbalance:".bold(),
        ByteSize(plan.initial_imbalance),
        ByteSize(plan.residual_imbalance),
        match plan.termination {
            Termination::Converged => String::new(),
            Termination::Exhausted => format!(" {}", "(no further improving move)".dimmed()),
        }
    );

    let rows = migration_rows(report);
    if rows.is_empty() {
        println!("{}", "Nothing to migrate.".dimmed());
    } else {
        println!("{}", Table::new(&rows));
    }

    for host in &plan.undrained {
        let vms: Vec<&str> = host.vms.iter().map(VmId::as_str).collect();
        println!(
            "{} {} keeps VMs {}",
            "Warning:".yellow().bold(),
            host.host,
            vms.join(", ")
        );
    }

    if let Some(execution) = &report.execution {
        println!(
            "{} {} submitted, {} done, {} failed, {} running",
            "Summary:".green().bold(),
            execution.submitted,
            execution.succeeded.len(),
            execution.failed.len(),
            execution.in_flight.len()
        );
    }
}
