//! `actionctl validate`: parse a workflow YAML file and run the static
//! dependency checks without executing anything.

use std::path::Path;

use actioncore_core::validate_workflow;
use actioncore_types::WorkflowDefinition;
use anyhow::{Context, Result};
use console::style;

pub async fn validate(path: &Path, json: bool) -> Result<()> {
    let content = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("reading {}", path.display()))?;
    let def: WorkflowDefinition =
        serde_yaml_ng::from_str(&content).with_context(|| format!("parsing {}", path.display()))?;

    match validate_workflow(&def) {
        Ok(()) => {
            if json {
                println!(
                    "{}",
                    serde_json::to_string_pretty(&serde_json::json!({
                        "valid": true,
                        "workflow": def.name,
                        "steps": def.steps.len(),
                    }))?
                );
            } else {
                println!(
                    "  {} '{}' is valid ({} step(s))",
                    style("ok").green().bold(),
                    def.name,
                    def.steps.len()
                );
            }
            Ok(())
        }
        Err(err) => {
            if json {
                println!(
                    "{}",
                    serde_json::to_string_pretty(&serde_json::json!({
                        "valid": false,
                        "error": err.to_string(),
                    }))?
                );
                Ok(())
            } else {
                println!("  {} {err}", style("FAIL").red().bold());
                Err(err.into())
            }
        }
    }
}
