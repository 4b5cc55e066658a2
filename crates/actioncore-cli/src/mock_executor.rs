//! A console-only `Executor` used by `actionctl run` when no real platform
//! adapter is wired in. Every call prints the operation and echoes its
//! params back as the result, annotated with a fresh id so rollback/delete
//! steps have something to act on.

use actioncore_core::{Executor, RawFailure};
use console::style;
use serde_json::Value;
use uuid::Uuid;

pub struct ConsoleExecutor {
    pub name: String,
}

impl Executor for ConsoleExecutor {
    async fn execute(&self, operation: &str, params: &Value) -> Result<Value, RawFailure> {
        println!(
            "  {} {}:{} {}",
            style("->").cyan(),
            style(&self.name).bold(),
            operation,
            params
        );
        Ok(serde_json::json!({
            "id": Uuid::now_v7().to_string(),
            "echoed": params,
        }))
    }
}
