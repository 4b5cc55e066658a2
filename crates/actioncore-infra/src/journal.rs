//! Append-only JSON-lines journals (spec §6 "Persisted state layout"): one
//! metrics file, one optional executions file, one optional daily summary
//! file per UTC day in a summaries directory. Every writer opens the file in
//! append mode and writes one record per line -- no read-modify-write, so
//! concurrent writers from independent processes never corrupt a record.

use std::path::Path;

use actioncore_types::{MetricEntry, MetricsAggregate, WorkflowExecution};
use chrono::Utc;
use serde::Serialize;
use tokio::fs::OpenOptions;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

use crate::error::InfraError;

async fn append_line(path: &Path, line: &str) -> Result<(), InfraError> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|source| InfraError::Io {
                path: parent.display().to_string(),
                source,
            })?;
    }
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .await
        .map_err(|source| InfraError::Io {
            path: path.display().to_string(),
            source,
        })?;
    file.write_all(line.as_bytes())
        .await
        .map_err(|source| InfraError::Io {
            path: path.display().to_string(),
            source,
        })?;
    file.write_all(b"\n").await.map_err(|source| InfraError::Io {
        path: path.display().to_string(),
        source,
    })?;
    Ok(())
}

async fn read_lines<T: serde::de::DeserializeOwned>(path: &Path) -> Result<Vec<T>, InfraError> {
    let file = match tokio::fs::File::open(path).await {
        Ok(file) => file,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(source) => {
            return Err(InfraError::Io {
                path: path.display().to_string(),
                source,
            })
        }
    };
    let mut lines = BufReader::new(file).lines();
    let mut out = Vec::new();
    while let Some(line) = lines.next_line().await.map_err(|source| InfraError::Io {
        path: path.display().to_string(),
        source,
    })? {
        if line.trim().is_empty() {
            continue;
        }
        out.push(serde_json::from_str(&line)?);
    }
    Ok(out)
}

/// Append one [`MetricEntry`] to the metrics journal, driven by
/// `MetricsCollector::drain_pending` on a periodic flush timer.
pub async fn append_metric(path: &Path, entry: &MetricEntry) -> Result<(), InfraError> {
    append_line(path, &serde_json::to_string(entry)?).await
}

/// Append a batch drained from `MetricsCollector::drain_pending`.
pub async fn append_metrics(path: &Path, entries: &[MetricEntry]) -> Result<(), InfraError> {
    for entry in entries {
        append_metric(path, entry).await?;
    }
    Ok(())
}

/// Hydrate a `MetricsCollector` at startup via `load_from_journal`.
pub async fn read_metrics(path: &Path) -> Result<Vec<MetricEntry>, InfraError> {
    read_lines(path).await
}

/// Append one `WorkflowExecution` record to the optional executions journal.
pub async fn append_execution(path: &Path, execution: &WorkflowExecution) -> Result<(), InfraError> {
    append_line(path, &serde_json::to_string(execution)?).await
}

pub async fn read_executions(path: &Path) -> Result<Vec<WorkflowExecution>, InfraError> {
    read_lines(path).await
}

#[derive(Debug, Clone, Serialize)]
struct DailySummary<'a> {
    date: String,
    aggregate: &'a MetricsAggregate,
}

/// Write `{summaries_dir}/{YYYY-MM-DD}.json`, overwriting any summary
/// already written for today (the rollup is idempotent per day, unlike the
/// append-only journals).
pub async fn write_daily_summary(summaries_dir: &Path, aggregate: &MetricsAggregate) -> Result<(), InfraError> {
    tokio::fs::create_dir_all(summaries_dir)
        .await
        .map_err(|source| InfraError::Io {
            path: summaries_dir.display().to_string(),
            source,
        })?;
    let date = Utc::now().format("%Y-%m-%d").to_string();
    let path = summaries_dir.join(format!("{date}.json"));
    let summary = DailySummary {
        date: date.clone(),
        aggregate,
    };
    let body = serde_json::to_string_pretty(&summary)?;
    tokio::fs::write(&path, body).await.map_err(|source| InfraError::Io {
        path: path.display().to_string(),
        source,
    })?;
    Ok(())
}
