//! `actionctl run`: execute a workflow definition against the console mock
//! executor, printing each step as it happens and the final execution
//! record at the end.

use std::path::Path;
use std::sync::Arc;

use actioncore_core::{CircuitBreaker, CircuitConfig, EventBus, IdempotencyCache, RollbackConfig, WorkflowRunner};
use actioncore_types::{Policy, WorkflowDefinition};
use anyhow::{Context, Result};
use console::style;
use indicatif::{ProgressBar, ProgressStyle};
use tokio_util::sync::CancellationToken;

use crate::mock_executor::ConsoleExecutor;

pub async fn run(path: &Path, data_dir: &std::path::Path, journal: bool, json: bool) -> Result<()> {
    let content = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("reading {}", path.display()))?;
    let def: WorkflowDefinition =
        serde_yaml_ng::from_str(&content).with_context(|| format!("parsing {}", path.display()))?;

    let config = actioncore_infra::load_core_config(data_dir).await;

    let events = EventBus::new(1024);
    let circuit = Arc::new(CircuitBreaker::new(CircuitConfig::default(), events.clone()));
    let idempotency = Arc::new(IdempotencyCache::new(10_000));
    let runner = WorkflowRunner::new(circuit, idempotency, Policy::default(), events, RollbackConfig::default())
        .with_rate_limit_buffer_ms(config.rate_limit_buffer_sec * 1000);

    let targets: std::collections::HashSet<&str> = def.steps.iter().map(|s| s.target.as_str()).collect();
    for target in targets {
        runner.register_executor(
            target,
            Arc::new(ConsoleExecutor {
                name: target.to_string(),
            }),
        );
    }

    if !json {
        println!("  {} running '{}'", style("==>").bold(), def.name);
    }

    let spinner = if !json {
        let pb = ProgressBar::new_spinner();
        pb.set_style(ProgressStyle::default_spinner().template("{spinner:.cyan} {msg}").unwrap());
        pb.enable_steady_tick(std::time::Duration::from_millis(100));
        pb.set_message(format!("executing {} step(s)...", def.steps.len()));
        Some(pb)
    } else {
        None
    };

    let cancel = CancellationToken::new();
    let (execution, rollback) = runner.run(&def, serde_json::json!({}), &cancel).await?;

    if let Some(pb) = spinner {
        pb.finish_and_clear();
    }

    if journal {
        let journal_path = config
            .executions_journal_path
            .map(std::path::PathBuf::from)
            .unwrap_or_else(|| data_dir.join("logs").join("executions.jsonl"));
        actioncore_infra::journal::append_execution(&journal_path, &execution).await?;
    }

    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(&serde_json::json!({
                "execution": execution,
                "rollback": rollback,
            }))?
        );
    } else {
        println!();
        println!("  {} {:?}", style("status").dim(), execution.status);
        for step in &execution.steps {
            println!("    {:?}  {}", step.status, step.step_id);
        }
        if let Some(rollback) = &rollback {
            println!();
            println!(
                "  {} rolled back: {:?}, manual intervention: {:?}",
                style("rollback").yellow(),
                rollback.rolled_back,
                rollback.manual_intervention_actions
            );
        }
    }

    Ok(())
}
