//! `actionctl metrics`: hydrate a `MetricsCollector` from the on-disk
//! journal and print the aggregate view.

use std::path::Path;

use actioncore_core::{MetricsCollector, MetricsConfig};
use anyhow::Result;
use comfy_table::{Cell, Table};

pub async fn metrics(journal_path: &Path, json: bool) -> Result<()> {
    let entries = actioncore_infra::journal::read_metrics(journal_path).await?;
    let collector = MetricsCollector::new(MetricsConfig::default());
    collector.load_from_journal(entries).await;
    let aggregate = collector.aggregate().await;

    if json {
        println!("{}", serde_json::to_string_pretty(&aggregate)?);
        return Ok(());
    }

    let mut table = Table::new();
    table.set_header(vec!["metric", "value"]);
    table.add_row(vec![Cell::new("total executed"), Cell::new(aggregate.total_executed)]);
    table.add_row(vec![
        Cell::new("success rate"),
        Cell::new(format!("{:.1}%", aggregate.success_rate * 100.0)),
    ]);
    table.add_row(vec![Cell::new("avg duration (ms)"), Cell::new(format!("{:.0}", aggregate.avg_duration))]);
    table.add_row(vec![Cell::new("p50 (ms)"), Cell::new(format!("{:.0}", aggregate.p50))]);
    table.add_row(vec![Cell::new("p95 (ms)"), Cell::new(format!("{:.0}", aggregate.p95))]);
    table.add_row(vec![Cell::new("p99 (ms)"), Cell::new(format!("{:.0}", aggregate.p99))]);
    table.add_row(vec![Cell::new("total retries"), Cell::new(aggregate.total_retries)]);
    table.add_row(vec![
        Cell::new("circuit breaker trips"),
        Cell::new(aggregate.circuit_breaker_trips),
    ]);
    table.add_row(vec![
        Cell::new("approval rate"),
        Cell::new(format!("{:.1}%", aggregate.approval_rate * 100.0)),
    ]);
    println!("{table}");

    Ok(())
}
