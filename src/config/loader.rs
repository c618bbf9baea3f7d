use super::{ConfigError, RunnerConfig};
use std::path::Path;
use tracing::debug;

/// Read a [`RunnerConfig`] from a `.toml`, `.yaml`/`.yml` or `.json` file
///
/// Missing fields keep their defaults. The result is not validated; callers
/// apply their own overrides first.
pub fn load_config(path: &Path) -> Result<RunnerConfig, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;

    let parse_error = |message: String| ConfigError::Parse {
        path: path.to_path_buf(),
        message,
    };

    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase);

    let config = match extension.as_deref() {
        Some("toml") => toml::from_str(&content).map_err(|e| parse_error(e.to_string()))?,
        Some("yaml") | Some("yml") => {
            serde_yaml::from_str(&content).map_err(|e| parse_error(e.to_string()))?
        }
        Some("json") => serde_json::from_str(&content).map_err(|e| parse_error(e.to_string()))?,
        other => {
            return Err(parse_error(format!(
                "unsupported config format {:?}; expected toml, yaml or json",
                other.unwrap_or("")
            )))
        }
    };

    debug!("Loaded runner config from {}", path.display());
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{BackoffStrategy, ExecutorConfig};
    use std::time::Duration;
    use tempfile::TempDir;

    fn write(dir: &TempDir, name: &str, content: &str) -> std::path::PathBuf {
        let path = dir.path().join(name);
        std::fs::write(&path, content).unwrap();
        path
    }

    #[test]
    fn test_load_toml() {
        let dir = TempDir::new().unwrap();
        let path = write(
            &dir,
            "job.toml",
            r#"
chunk_size = 1000
retries = 2
chunk_timeout = "30s"

[backoff]
strategy = "fixed"
initial_delay = "10ms"

[executor.pool]
workers = 3
"#,
        );

        let config = load_config(&path).unwrap();
        assert_eq!(config.chunk_size, 1000);
        assert_eq!(config.retries, 2);
        assert_eq!(config.chunk_timeout, Some(Duration::from_secs(30)));
        assert_eq!(config.backoff.strategy, BackoffStrategy::Fixed);
        assert_eq!(config.backoff.initial_delay, Duration::from_millis(10));
        assert_eq!(config.executor, ExecutorConfig::Pool { workers: 3 });
        assert_eq!(config.cancel_grace, Duration::from_secs(5));
    }

    #[test]
    fn test_load_yaml() {
        let dir = TempDir::new().unwrap();
        let path = write(
            &dir,
            "job.yml",
            r#"
max_failures: 2
order: arrival
executor:
  distributed:
    scheduler_address: "inproc://local"
    workers: 4
    compression: 6
"#,
        );

        let config = load_config(&path).unwrap();
        assert_eq!(config.max_failures, 2);
        assert_eq!(config.order, crate::accumulator::ReductionOrder::Arrival);
        assert_eq!(
            config.executor,
            ExecutorConfig::Distributed {
                scheduler_address: "inproc://local".to_string(),
                workers: 4,
                compression: Some(6),
            }
        );
    }

    #[test]
    fn test_load_json_sequential() {
        let dir = TempDir::new().unwrap();
        let path = write(&dir, "job.json", r#"{"executor": "sequential", "best_effort": true}"#);

        let config = load_config(&path).unwrap();
        assert_eq!(config.executor, ExecutorConfig::Sequential);
        assert!(config.best_effort);
    }

    #[test]
    fn test_unknown_extension_and_missing_file() {
        let dir = TempDir::new().unwrap();
        let path = write(&dir, "job.ini", "chunk_size=1");
        assert!(matches!(load_config(&path), Err(ConfigError::Parse { .. })));

        let missing = dir.path().join("absent.toml");
        assert!(matches!(load_config(&missing), Err(ConfigError::Io { .. })));
    }
}
