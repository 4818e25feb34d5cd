//! Store runner configuration

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// How the store reclaims primary memory from spillable objects
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReclaimPolicy {
    /// Hand victims to the spiller; records stay as Spilled
    #[default]
    Spill,
    /// Drop victims outright; records are removed as Evicted
    Evict,
}

/// Construction parameters for the plasma store runner
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreRunnerConfig {
    /// Transport identity of the client-facing boundary (opaque here)
    pub socket_name: String,
    /// Primary memory budget in bytes
    pub system_memory: u64,
    /// Reserve the primary region with huge pages
    pub hugepages_enabled: bool,
    /// Directory holding the primary backing file
    pub plasma_directory: PathBuf,
    /// Directory for fallback allocations (empty disables fallback)
    pub fallback_directory: PathBuf,
    /// Used-space fraction at which a watched directory counts as full
    pub capacity_threshold: f64,
    /// Capacity monitor refresh period (milliseconds)
    pub monitor_interval_ms: u64,
    /// Reclaim policy applied under memory pressure
    pub reclaim_policy: ReclaimPolicy,
}

impl Default for StoreRunnerConfig {
    fn default() -> Self {
        Self {
            socket_name: "/tmp/plasma_store".to_string(),
            system_memory: 1024 * 1024 * 1024, // 1GB
            hugepages_enabled: false,
            plasma_directory: PathBuf::from("/dev/shm"),
            fallback_directory: PathBuf::new(),
            capacity_threshold: 0.95,
            monitor_interval_ms: 1000,
            reclaim_policy: ReclaimPolicy::Spill,
        }
    }
}

impl StoreRunnerConfig {
    /// Build a configuration from the required construction parameters
    pub fn new(
        socket_name: impl Into<String>,
        system_memory: u64,
        hugepages_enabled: bool,
        plasma_directory: impl Into<PathBuf>,
        fallback_directory: impl Into<PathBuf>,
    ) -> Self {
        Self {
            socket_name: socket_name.into(),
            system_memory,
            hugepages_enabled,
            plasma_directory: plasma_directory.into(),
            fallback_directory: fallback_directory.into(),
            ..Self::default()
        }
    }

    /// Load configuration from `PLASMA_*` environment variables
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let socket_name =
            std::env::var("PLASMA_SOCKET_NAME").unwrap_or(defaults.socket_name);

        let system_memory = std::env::var("PLASMA_SYSTEM_MEMORY")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(defaults.system_memory);

        let hugepages_enabled = std::env::var("PLASMA_HUGEPAGES_ENABLED")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(defaults.hugepages_enabled);

        let plasma_directory = std::env::var("PLASMA_PLASMA_DIRECTORY")
            .map(PathBuf::from)
            .unwrap_or(defaults.plasma_directory);

        let fallback_directory = std::env::var("PLASMA_FALLBACK_DIRECTORY")
            .map(PathBuf::from)
            .unwrap_or(defaults.fallback_directory);

        let capacity_threshold = std::env::var("PLASMA_CAPACITY_THRESHOLD")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(defaults.capacity_threshold);

        let monitor_interval_ms = std::env::var("PLASMA_MONITOR_INTERVAL_MS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(defaults.monitor_interval_ms);

        let reclaim_policy = match std::env::var("PLASMA_RECLAIM_POLICY").as_deref() {
            Ok("evict") => ReclaimPolicy::Evict,
            _ => defaults.reclaim_policy,
        };

        Self {
            socket_name,
            system_memory,
            hugepages_enabled,
            plasma_directory,
            fallback_directory,
            capacity_threshold,
            monitor_interval_ms,
            reclaim_policy,
        }
    }

    /// Load a config file, with `PLASMA_*` environment variables layered on top
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let config: Self = config::Config::builder()
            .add_source(config::File::from(path.as_ref()))
            .add_source(config::Environment::with_prefix("PLASMA").try_parsing(true))
            .build()
            .and_then(|c| c.try_deserialize())
            .map_err(|e| Error::Config(format!("Failed to load {:?}: {}", path.as_ref(), e)))?;

        config.validate()?;
        Ok(config)
    }

    /// Reject parameters the allocator cannot honour
    pub fn validate(&self) -> Result<()> {
        if self.system_memory == 0 {
            return Err(Error::Config(
                "system_memory must be greater than zero".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.capacity_threshold) {
            return Err(Error::Config(format!(
                "capacity_threshold must be within [0, 1], got {}",
                self.capacity_threshold
            )));
        }
        if self.plasma_directory.as_os_str().is_empty() {
            return Err(Error::Config("plasma_directory must be set".to_string()));
        }
        Ok(())
    }

    /// Fallback directory, `None` when fallback is disabled
    pub fn fallback_directory(&self) -> Option<PathBuf> {
        if self.fallback_directory.as_os_str().is_empty() {
            None
        } else {
            Some(self.fallback_directory.clone())
        }
    }

    /// Directories watched by the capacity monitor
    pub fn watched_directories(&self) -> Vec<PathBuf> {
        let mut dirs = vec![self.plasma_directory.clone()];
        dirs.extend(self.fallback_directory());
        dirs
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = StoreRunnerConfig::default();
        assert!(config.validate().is_ok());
        assert!(config.fallback_directory().is_none());
        assert_eq!(config.watched_directories().len(), 1);
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = StoreRunnerConfig::new("sock", 0, false, "/tmp/plasma", "");
        assert!(matches!(config.validate(), Err(Error::Config(_))));

        config.system_memory = 1000;
        config.capacity_threshold = 1.5;
        assert!(config.validate().is_err());

        config.capacity_threshold = 0.9;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_from_file() -> Result<()> {
        let dir = std::env::temp_dir().join(format!(
            "plasma_config_{}_{}",
            std::process::id(),
            uuid::Uuid::new_v4()
        ));
        std::fs::create_dir_all(&dir).ok();
        let path = dir.join("plasma.toml");
        std::fs::write(
            &path,
            r#"
socket_name = "/tmp/test_socket"
system_memory = 4096
plasma_directory = "/tmp/plasma_test"
fallback_directory = "/tmp/plasma_fallback"
reclaim_policy = "evict"
"#,
        )
        .ok();

        let config = StoreRunnerConfig::from_file(&path)?;
        assert_eq!(config.socket_name, "/tmp/test_socket");
        assert_eq!(config.system_memory, 4096);
        assert_eq!(config.reclaim_policy, ReclaimPolicy::Evict);
        assert_eq!(
            config.fallback_directory(),
            Some(PathBuf::from("/tmp/plasma_fallback"))
        );
        // Unset keys keep their defaults
        assert_eq!(config.monitor_interval_ms, 1000);

        std::fs::remove_dir_all(dir).ok();
        Ok(())
    }
}
