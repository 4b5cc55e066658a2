//! Errors surfaced by the infra adapters. Not part of the core taxonomy
//! (spec §7) -- these wrap I/O and transport failures one layer below it.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum InfraError {
    #[error("io error at {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to serialize entry: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("webhook request failed: {0}")]
    Webhook(#[from] reqwest::Error),
}
