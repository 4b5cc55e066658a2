//! Configuration loader (spec §6 "Environment inputs"), modeled on the
//! teacher's `boternity_infra::config::load_global_config`: read a TOML file
//! from the data directory, fall back to defaults on a missing or malformed
//! file rather than failing the process.

use std::path::Path;

use actioncore_types::CoreConfig;

/// Load `{data_dir}/config.toml` into a [`CoreConfig`].
///
/// - Missing file: returns [`CoreConfig::default()`].
/// - Malformed file: logs a warning and returns the default.
/// - Valid file: returns the parsed config, with any field the file omits
///   filled from `CoreConfig`'s per-field defaults.
pub async fn load_core_config(data_dir: &Path) -> CoreConfig {
    let config_path = data_dir.join("config.toml");

    let content = match tokio::fs::read_to_string(&config_path).await {
        Ok(content) => content,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            tracing::debug!("no config.toml at {}, using defaults", config_path.display());
            return CoreConfig::default();
        }
        Err(err) => {
            tracing::warn!("failed to read {}: {err}, using defaults", config_path.display());
            return CoreConfig::default();
        }
    };

    match toml::from_str::<CoreConfig>(&content) {
        Ok(config) => config,
        Err(err) => {
            tracing::warn!("failed to parse {}: {err}, using defaults", config_path.display());
            CoreConfig::default()
        }
    }
}

/// Default data directory, `~/.actioncore/` (mirrors the teacher's
/// per-user data directory convention).
pub fn default_data_dir() -> std::path::PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| std::path::PathBuf::from("."))
        .join(".actioncore")
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn load_core_config_missing_file_returns_default() {
        let tmp = TempDir::new().unwrap();
        let config = load_core_config(tmp.path()).await;
        assert_eq!(config.metrics_path, "logs/metrics.jsonl");
        assert!(config.features.approvals_enabled);
    }

    #[tokio::test]
    async fn load_core_config_valid_toml_returns_parsed() {
        let tmp = TempDir::new().unwrap();
        tokio::fs::write(
            tmp.path().join("config.toml"),
            r#"
metrics_path = "custom/metrics.jsonl"
retention_days = 7

[features]
approvals_enabled = false
"#,
        )
        .await
        .unwrap();

        let config = load_core_config(tmp.path()).await;
        assert_eq!(config.metrics_path, "custom/metrics.jsonl");
        assert_eq!(config.retention_days, 7);
        assert!(!config.features.approvals_enabled);
        assert!(config.features.metrics_enabled);
    }

    #[tokio::test]
    async fn load_core_config_invalid_toml_returns_default() {
        let tmp = TempDir::new().unwrap();
        tokio::fs::write(tmp.path().join("config.toml"), "not valid {{ toml")
            .await
            .unwrap();

        let config = load_core_config(tmp.path()).await;
        assert_eq!(config, CoreConfig::default());
    }
}
