//! Concrete implementations of the built-in fallback operations named in
//! spec §4.4 (`actioncore_core::fallback::builtin`). Each takes the step's
//! opaque params and returns an opaque result/error the same shape an
//! `Executor::execute` call would, so a `FallbackStep { action: WRITE_LOCAL_FILE, .. }`
//! can be dispatched to these functions from the same `invoke` closure that
//! the real platform executors are dispatched from.

use std::path::Path;

use serde_json::Value;
use tokio::io::AsyncWriteExt;

use crate::notify::WebhookSink;

/// `write_local_file`: writes `params.content` to `{backup_dir}/{params.filename}`.
pub async fn write_local_file(backup_dir: &Path, params: &Value) -> Result<Value, String> {
    let filename = params
        .get("filename")
        .and_then(Value::as_str)
        .ok_or("write_local_file requires a 'filename' param")?;
    let content = params
        .get("content")
        .and_then(Value::as_str)
        .ok_or("write_local_file requires a 'content' param")?;

    tokio::fs::create_dir_all(backup_dir)
        .await
        .map_err(|e| e.to_string())?;
    let path = backup_dir.join(filename);
    tokio::fs::write(&path, content).await.map_err(|e| e.to_string())?;

    Ok(serde_json::json!({ "path": path.display().to_string() }))
}

/// `append_csv_row`: appends `params.row` (an array of scalar values) as a
/// comma-separated line to `{csv_dir}/{params.filename}`.
pub async fn append_csv_row(csv_dir: &Path, params: &Value) -> Result<Value, String> {
    let filename = params
        .get("filename")
        .and_then(Value::as_str)
        .ok_or("append_csv_row requires a 'filename' param")?;
    let row = params
        .get("row")
        .and_then(Value::as_array)
        .ok_or("append_csv_row requires a 'row' array param")?;

    let line = row
        .iter()
        .map(value_to_csv_field)
        .collect::<Vec<_>>()
        .join(",");

    tokio::fs::create_dir_all(csv_dir).await.map_err(|e| e.to_string())?;
    let path = csv_dir.join(filename);
    let mut file = tokio::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)
        .await
        .map_err(|e| e.to_string())?;
    file.write_all(line.as_bytes()).await.map_err(|e| e.to_string())?;
    file.write_all(b"\n").await.map_err(|e| e.to_string())?;

    Ok(serde_json::json!({ "path": path.display().to_string() }))
}

fn value_to_csv_field(value: &Value) -> String {
    match value {
        Value::String(s) if s.contains(',') || s.contains('"') => {
            format!("\"{}\"", s.replace('"', "\"\""))
        }
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// `console_print`: the cheapest possible fallback, used in tests and demos.
pub fn console_print(params: &Value) -> Result<Value, String> {
    println!("[fallback] {params}");
    Ok(serde_json::json!({ "printed": true }))
}

/// `enqueue_for_later_retry`: appends the failed request to a pending-retry
/// queue file for an out-of-band worker to drain later.
pub async fn enqueue_for_later_retry(queue_path: &Path, params: &Value) -> Result<Value, String> {
    if let Some(parent) = queue_path.parent() {
        tokio::fs::create_dir_all(parent).await.map_err(|e| e.to_string())?;
    }
    let mut file = tokio::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(queue_path)
        .await
        .map_err(|e| e.to_string())?;
    let line = serde_json::to_string(params).map_err(|e| e.to_string())?;
    file.write_all(line.as_bytes()).await.map_err(|e| e.to_string())?;
    file.write_all(b"\n").await.map_err(|e| e.to_string())?;
    Ok(serde_json::json!({ "enqueued": true }))
}

/// `post_webhook`: POSTs `params` verbatim to `webhook_url`.
pub async fn post_webhook(sink: &WebhookSink, webhook_url: &str, params: &Value) -> Result<Value, String> {
    sink.post(webhook_url, params).await.map_err(|e| e.to_string())?;
    Ok(serde_json::json!({ "posted": true }))
}

/// `send_email`: no SMTP client is in the teacher's stack, so this degrades
/// to the webhook sink against a configured mail-relay endpoint (the same
/// shape most transactional-email providers expose) and surfaces a clear
/// error when no such endpoint is configured, rather than silently dropping
/// the message.
pub async fn send_email(sink: &WebhookSink, mail_relay_url: Option<&str>, params: &Value) -> Result<Value, String> {
    let Some(url) = mail_relay_url else {
        return Err("send_email has no mail_relay_url configured".to_string());
    };
    sink.post(url, params).await.map_err(|e| e.to_string())?;
    Ok(serde_json::json!({ "sent": true }))
}
