//! Infrastructure adapters for the action orchestration core: JSON-lines
//! journals for metrics and executions, TOML configuration loading, a
//! `reqwest`-backed webhook sink, and concrete implementations of the
//! built-in fallback operations. `actioncore-core` stays free of filesystem
//! and network I/O; everything here is the other side of that boundary.

pub mod config;
pub mod error;
pub mod fallback_ops;
pub mod journal;
pub mod notify;

pub use config::{default_data_dir, load_core_config};
pub use error::InfraError;
pub use notify::WebhookSink;
