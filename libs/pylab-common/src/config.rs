// Platform configuration: config/pylab.json plus environment overrides
use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_CONFIG_PATH: &str = "config/pylab.json";

/// Resource ceilings applied to every sandboxed interpreter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResourceLimits {
    pub memory_limit_mb: u64,
    /// Floor only: a run always gets at least one CPU second past its timeout
    pub cpu_time_limit_secs: u64,
    pub max_file_size_mb: u64,
    pub max_open_files: u64,
}

impl Default for ResourceLimits {
    fn default() -> Self {
        Self {
            memory_limit_mb: 512,
            cpu_time_limit_secs: 10,
            max_file_size_mb: 16,
            max_open_files: 64,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HarnessConfig {
    /// Interpreter used to run synthesized programs
    pub python: String,
    pub python_args: Vec<String>,
    /// Parent of the per-run scratch directories
    pub work_root: PathBuf,
    /// Where declared exercise data files are copied from
    pub data_dir: PathBuf,
    pub default_timeout_ms: u64,
    pub max_concurrent_runs: usize,
    pub max_queued_runs: usize,
    pub queue_timeout_ms: u64,
    pub limits: ResourceLimits,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            python: "python3".to_string(),
            python_args: vec!["-I".to_string()],
            work_root: std::env::temp_dir().join("pylab-runs"),
            data_dir: PathBuf::from("data"),
            default_timeout_ms: 3000,
            max_concurrent_runs: 4,
            max_queued_runs: 32,
            queue_timeout_ms: 10_000,
            limits: ResourceLimits::default(),
        }
    }
}

impl HarnessConfig {
    pub fn default_timeout(&self) -> Duration {
        Duration::from_millis(self.default_timeout_ms)
    }

    pub fn queue_timeout(&self) -> Duration {
        Duration::from_millis(self.queue_timeout_ms)
    }

    pub fn validate(&self) -> Result<()> {
        if self.python.trim().is_empty() {
            bail!("python interpreter must not be empty");
        }
        if self.default_timeout_ms == 0 {
            bail!("default_timeout_ms must be greater than zero");
        }
        if self.max_concurrent_runs == 0 {
            bail!("max_concurrent_runs must be greater than zero");
        }
        if self.limits.memory_limit_mb == 0 || self.limits.cpu_time_limit_secs == 0 {
            bail!("resource limits must be greater than zero");
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlatformConfig {
    pub bind_addr: String,
    pub exercises_dir: PathBuf,
    pub harness: HarnessConfig,
}

impl Default for PlatformConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:8000".to_string(),
            exercises_dir: PathBuf::from("exercises"),
            harness: HarnessConfig::default(),
        }
    }
}

impl PlatformConfig {
    /// Load configuration from a JSON file
    pub fn load(config_path: &Path) -> Result<Self> {
        let content = fs::read_to_string(config_path)
            .with_context(|| format!("Failed to read {}", config_path.display()))?;

        let config: PlatformConfig = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse {}", config_path.display()))?;

        Ok(config)
    }

    /// Load from $PYLAB_CONFIG or config/pylab.json, falling back to defaults
    /// when the file does not exist, then apply environment overrides
    pub fn load_default() -> Result<Self> {
        let config_path = std::env::var("PYLAB_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(DEFAULT_CONFIG_PATH));

        let mut config = if config_path.exists() {
            Self::load(&config_path)?
        } else {
            tracing::debug!(path = %config_path.display(), "No config file, using defaults");
            Self::default()
        };

        config.apply_env_overrides()?;
        config.harness.validate()?;
        Ok(config)
    }

    pub fn apply_env_overrides(&mut self) -> Result<()> {
        if let Ok(addr) = std::env::var("PYLAB_BIND") {
            self.bind_addr = addr;
        }
        if let Ok(dir) = std::env::var("PYLAB_EXERCISES_DIR") {
            self.exercises_dir = PathBuf::from(dir);
        }
        if let Ok(dir) = std::env::var("PYLAB_DATA_DIR") {
            self.harness.data_dir = PathBuf::from(dir);
        }
        if let Ok(dir) = std::env::var("PYLAB_WORK_ROOT") {
            self.harness.work_root = PathBuf::from(dir);
        }
        if let Ok(python) = std::env::var("PYLAB_PYTHON") {
            self.harness.python = python;
        }
        if let Ok(slots) = std::env::var("PYLAB_MAX_CONCURRENT_RUNS") {
            self.harness.max_concurrent_runs = slots
                .parse()
                .with_context(|| format!("Invalid PYLAB_MAX_CONCURRENT_RUNS: {}", slots))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = PlatformConfig::default();
        assert!(config.harness.validate().is_ok());
        assert_eq!(config.harness.default_timeout(), Duration::from_secs(3));
        assert_eq!(config.bind_addr, "0.0.0.0:8000");
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pylab.json");
        fs::write(
            &path,
            r#"{"exercises_dir": "/srv/exercises", "harness": {"default_timeout_ms": 5000, "limits": {"memory_limit_mb": 128}}}"#,
        )
        .unwrap();

        let config = PlatformConfig::load(&path).unwrap();
        assert_eq!(config.exercises_dir, PathBuf::from("/srv/exercises"));
        assert_eq!(config.harness.default_timeout_ms, 5000);
        assert_eq!(config.harness.limits.memory_limit_mb, 128);
        assert_eq!(config.harness.limits.max_open_files, 64);
        assert_eq!(config.harness.python, "python3");
    }

    #[test]
    fn test_invalid_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pylab.json");
        fs::write(&path, "{ not json").unwrap();
        assert!(PlatformConfig::load(&path).is_err());
        assert!(PlatformConfig::load(&dir.path().join("missing.json")).is_err());
    }

    #[test]
    fn test_validate_rejects_zero_values() {
        let mut config = HarnessConfig::default();
        config.default_timeout_ms = 0;
        assert!(config.validate().is_err());

        let mut config = HarnessConfig::default();
        config.max_concurrent_runs = 0;
        assert!(config.validate().is_err());

        let mut config = HarnessConfig::default();
        config.python = " ".to_string();
        assert!(config.validate().is_err());
    }
}
