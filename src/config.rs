// Copyright 2025 dentsusoken
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use crate::error::{LockyardError, Result};
use crate::locking::timeout::LockTimeoutValue;
use config::{Config, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const CONFIG_FILE_NAME: &str = "lockyard.toml";
pub const HOME_ENV_VAR: &str = "LOCKYARD_HOME";
const ENV_PREFIX: &str = "LOCKYARD";
const STORE_DIR_NAME: &str = "store";

pub const DEFAULT_COORDINATOR_ROOT: &str = "/lockyard-registry";
pub const DEFAULT_CACHE_CAPACITY: usize = 30_000;
const DEFAULT_PROBE_WORKERS: usize = 1;
const DEFAULT_PROBE_QUEUE_CAPACITY: usize = 64;
const DEFAULT_RETRY_INTERVAL_MS: u64 = 1_000;
const DEFAULT_IMMEDIATE_PROBE_MS: u64 = 100;

pub const DEFAULT_REGISTRY_KEY: &str = "lockyard";
pub const DEFAULT_EXPIRE_AFTER_MS: u64 = 60_000;
const DEFAULT_POLL_INTERVAL_MS: u64 = 100;

const DEFAULT_HEARTBEAT_MS: u64 = 500;
const DEFAULT_BUSY_WAIT_MS: u64 = 50;

const DEFAULT_LOCK_TIMEOUT_SECS: u64 = 600;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistryConfig {
    #[serde(skip)]
    home: PathBuf,

    #[serde(default)]
    pub coordinator: CoordinatorConfig,

    #[serde(default)]
    pub keyed_store: KeyedStoreConfig,

    #[serde(default)]
    pub leader: LeaderConfig,

    #[serde(default)]
    pub locking: LockingConfig,
}

/// Settings for the coordination-service backed registry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoordinatorConfig {
    /// Root path under which every lock node lives; also the connectivity probe target.
    #[serde(default = "default_coordinator_root")]
    pub root: String,

    #[serde(default = "default_cache_capacity")]
    pub cache_capacity: usize,

    #[serde(default = "default_probe_workers")]
    pub probe_workers: usize,

    #[serde(default = "default_probe_queue_capacity")]
    pub probe_queue_capacity: usize,

    /// Slice used by blocking acquisition while it retries bounded attempts.
    #[serde(default = "default_retry_interval_ms")]
    pub retry_interval_ms: u64,

    /// Probe budget for the zero-wait `try_lock`.
    #[serde(default = "default_immediate_probe_ms")]
    pub immediate_probe_ms: u64,
}

/// Settings for the keyed-store backed registry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeyedStoreConfig {
    #[serde(default = "default_registry_key")]
    pub registry_key: String,

    #[serde(default = "default_expire_after_ms")]
    pub expire_after_ms: u64,

    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Overrides the host identifier written into lock records.
    #[serde(default)]
    pub host: Option<String>,

    /// Directory of the file-backed store; defaults to `<home>/store`.
    #[serde(default)]
    pub store_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LeaderConfig {
    #[serde(default = "default_heartbeat_ms")]
    pub heartbeat_ms: u64,

    #[serde(default = "default_busy_wait_ms")]
    pub busy_wait_ms: u64,
}

/// Timeout applied by the CLI when it waits for a lock.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LockingConfig {
    #[serde(default = "default_lock_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            root: default_coordinator_root(),
            cache_capacity: DEFAULT_CACHE_CAPACITY,
            probe_workers: DEFAULT_PROBE_WORKERS,
            probe_queue_capacity: DEFAULT_PROBE_QUEUE_CAPACITY,
            retry_interval_ms: DEFAULT_RETRY_INTERVAL_MS,
            immediate_probe_ms: DEFAULT_IMMEDIATE_PROBE_MS,
        }
    }
}

impl Default for KeyedStoreConfig {
    fn default() -> Self {
        Self {
            registry_key: default_registry_key(),
            expire_after_ms: DEFAULT_EXPIRE_AFTER_MS,
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
            host: None,
            store_dir: None,
        }
    }
}

impl Default for LeaderConfig {
    fn default() -> Self {
        Self {
            heartbeat_ms: DEFAULT_HEARTBEAT_MS,
            busy_wait_ms: DEFAULT_BUSY_WAIT_MS,
        }
    }
}

impl Default for LockingConfig {
    fn default() -> Self {
        Self {
            timeout_secs: DEFAULT_LOCK_TIMEOUT_SECS,
        }
    }
}

fn default_coordinator_root() -> String {
    DEFAULT_COORDINATOR_ROOT.to_string()
}

fn default_cache_capacity() -> usize {
    DEFAULT_CACHE_CAPACITY
}

fn default_probe_workers() -> usize {
    DEFAULT_PROBE_WORKERS
}

fn default_probe_queue_capacity() -> usize {
    DEFAULT_PROBE_QUEUE_CAPACITY
}

fn default_retry_interval_ms() -> u64 {
    DEFAULT_RETRY_INTERVAL_MS
}

fn default_immediate_probe_ms() -> u64 {
    DEFAULT_IMMEDIATE_PROBE_MS
}

fn default_registry_key() -> String {
    DEFAULT_REGISTRY_KEY.to_string()
}

fn default_expire_after_ms() -> u64 {
    DEFAULT_EXPIRE_AFTER_MS
}

fn default_poll_interval_ms() -> u64 {
    DEFAULT_POLL_INTERVAL_MS
}

fn default_heartbeat_ms() -> u64 {
    DEFAULT_HEARTBEAT_MS
}

fn default_busy_wait_ms() -> u64 {
    DEFAULT_BUSY_WAIT_MS
}

fn default_lock_timeout_secs() -> u64 {
    DEFAULT_LOCK_TIMEOUT_SECS
}

impl CoordinatorConfig {
    pub fn retry_interval(&self) -> Duration {
        Duration::from_millis(self.retry_interval_ms)
    }

    pub fn immediate_probe(&self) -> Duration {
        Duration::from_millis(self.immediate_probe_ms)
    }
}

impl KeyedStoreConfig {
    pub fn expire_after(&self) -> Duration {
        Duration::from_millis(self.expire_after_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

impl LeaderConfig {
    pub fn heartbeat(&self) -> Duration {
        Duration::from_millis(self.heartbeat_ms)
    }

    pub fn busy_wait(&self) -> Duration {
        Duration::from_millis(self.busy_wait_ms)
    }
}

impl LockingConfig {
    pub fn timeout_value(&self) -> LockTimeoutValue {
        LockTimeoutValue::from_secs(self.timeout_secs)
    }
}

impl RegistryConfig {
    /// Configuration with built-in defaults rooted at `home`.
    pub fn new(home: PathBuf) -> Self {
        Self {
            home,
            coordinator: CoordinatorConfig::default(),
            keyed_store: KeyedStoreConfig::default(),
            leader: LeaderConfig::default(),
            locking: LockingConfig::default(),
        }
    }

    /// Loads `lockyard.toml` from `home` (if present) layered with `LOCKYARD_*` variables.
    ///
    /// Nested keys use a double underscore, e.g. `LOCKYARD_KEYED_STORE__EXPIRE_AFTER_MS`.
    pub fn load(home: &Path) -> Result<Self> {
        let config_path = home.join(CONFIG_FILE_NAME);
        if !config_path.exists() {
            log::debug!("Config file not found at {config_path:?}, using defaults");
        }

        let settings = Config::builder()
            .add_source(
                File::from(config_path.as_path())
                    .format(FileFormat::Toml)
                    .required(false),
            )
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .map_err(|e| {
                LockyardError::ConfigError(format!("Failed to read {CONFIG_FILE_NAME}: {e}"))
            })?;

        let mut config: RegistryConfig = settings.try_deserialize().map_err(|e| {
            LockyardError::ConfigError(format!("Failed to parse {CONFIG_FILE_NAME}: {e}"))
        })?;
        config.home = home.to_path_buf();
        config.validate()?;

        log::debug!("Loaded config for lockyard home {home:?}");
        Ok(config)
    }

    pub fn save(&self) -> Result<()> {
        let config_path = self.home.join(CONFIG_FILE_NAME);

        if let Some(parent) = config_path.parent() {
            fs::create_dir_all(parent)?;
        }

        let contents = toml::to_string_pretty(self)
            .map_err(|e| LockyardError::ConfigError(format!("Failed to serialize config: {e}")))?;

        fs::write(&config_path, contents)?;
        log::debug!("Saved config to {config_path:?}");
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if !self.coordinator.root.starts_with('/') {
            return Err(LockyardError::InvalidConfig(format!(
                "coordinator.root must be an absolute path, got '{}'",
                self.coordinator.root
            )));
        }
        if self.coordinator.cache_capacity == 0 {
            return Err(LockyardError::InvalidConfig(
                "coordinator.cache_capacity must be greater than zero".to_string(),
            ));
        }
        if self.coordinator.probe_workers == 0 || self.coordinator.probe_queue_capacity == 0 {
            return Err(LockyardError::InvalidConfig(
                "coordinator probe workers and queue capacity must be greater than zero"
                    .to_string(),
            ));
        }
        if self.keyed_store.registry_key.is_empty() {
            return Err(LockyardError::InvalidConfig(
                "keyed_store.registry_key must not be empty".to_string(),
            ));
        }
        if self.keyed_store.poll_interval_ms == 0 {
            return Err(LockyardError::InvalidConfig(
                "keyed_store.poll_interval_ms must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    pub fn home(&self) -> &Path {
        &self.home
    }

    /// Directory backing the file keyed store.
    pub fn store_dir(&self) -> PathBuf {
        self.keyed_store
            .store_dir
            .clone()
            .unwrap_or_else(|| self.home.join(STORE_DIR_NAME))
    }
}

/// Resolves the lockyard home from `LOCKYARD_HOME` or `~/.lockyard`.
pub fn resolve_home() -> Result<PathBuf> {
    if let Ok(home) = env::var(HOME_ENV_VAR) {
        if !home.trim().is_empty() {
            return Ok(PathBuf::from(home));
        }
    }

    dirs::home_dir()
        .map(|dir| dir.join(".lockyard"))
        .ok_or_else(|| {
            LockyardError::ConfigError(format!(
                "Unable to determine home directory; set {HOME_ENV_VAR}"
            ))
        })
}

/// Loads the configuration for the resolved lockyard home.
pub fn new_registry_config() -> Result<RegistryConfig> {
    let home = resolve_home()?;
    RegistryConfig::load(&home)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use tempfile::TempDir;

    #[test]
    fn test_default_config() {
        let config = RegistryConfig::new(PathBuf::from("/tmp/lockyard"));
        assert_eq!(config.coordinator.root, DEFAULT_COORDINATOR_ROOT);
        assert_eq!(config.coordinator.cache_capacity, 30_000);
        assert_eq!(config.keyed_store.expire_after(), Duration::from_secs(60));
        assert_eq!(config.keyed_store.poll_interval(), Duration::from_millis(100));
        assert_eq!(config.leader.heartbeat(), Duration::from_millis(500));
        assert_eq!(config.store_dir(), PathBuf::from("/tmp/lockyard/store"));
    }

    #[test]
    #[serial]
    fn test_load_missing_config() {
        let temp_dir = TempDir::new().unwrap();
        let config = RegistryConfig::load(temp_dir.path()).unwrap();
        assert_eq!(config.keyed_store.registry_key, DEFAULT_REGISTRY_KEY);
        assert_eq!(config.home(), temp_dir.path());
    }

    #[test]
    #[serial]
    fn test_save_and_load_config() {
        let temp_dir = TempDir::new().unwrap();

        let mut config = RegistryConfig::new(temp_dir.path().to_path_buf());
        config.keyed_store.expire_after_ms = 5_000;
        config.coordinator.cache_capacity = 16;
        config.keyed_store.host = Some("worker-7".to_string());

        config.save().unwrap();

        let loaded = RegistryConfig::load(temp_dir.path()).unwrap();
        assert_eq!(loaded.keyed_store.expire_after_ms, 5_000);
        assert_eq!(loaded.coordinator.cache_capacity, 16);
        assert_eq!(loaded.keyed_store.host.as_deref(), Some("worker-7"));
    }

    #[test]
    #[serial]
    fn test_partial_config() {
        let temp_dir = TempDir::new().unwrap();
        fs::write(
            temp_dir.path().join(CONFIG_FILE_NAME),
            r#"
[keyed_store]
registry_key = "orders"
"#,
        )
        .unwrap();

        let loaded = RegistryConfig::load(temp_dir.path()).unwrap();
        assert_eq!(loaded.keyed_store.registry_key, "orders");
        assert_eq!(loaded.keyed_store.expire_after_ms, DEFAULT_EXPIRE_AFTER_MS);
        assert_eq!(loaded.coordinator.root, DEFAULT_COORDINATOR_ROOT);
    }

    #[test]
    #[serial]
    fn test_environment_overrides_file() {
        let temp_dir = TempDir::new().unwrap();
        fs::write(
            temp_dir.path().join(CONFIG_FILE_NAME),
            r#"
[keyed_store]
expire_after_ms = 2000
"#,
        )
        .unwrap();

        // SAFETY: guarded by #[serial]; no other test touches the environment concurrently.
        unsafe { env::set_var("LOCKYARD_KEYED_STORE__EXPIRE_AFTER_MS", "9000") };
        let loaded = RegistryConfig::load(temp_dir.path());
        unsafe { env::remove_var("LOCKYARD_KEYED_STORE__EXPIRE_AFTER_MS") };

        assert_eq!(loaded.unwrap().keyed_store.expire_after_ms, 9_000);
    }

    #[test]
    #[serial]
    fn test_invalid_root_rejected() {
        let temp_dir = TempDir::new().unwrap();
        fs::write(
            temp_dir.path().join(CONFIG_FILE_NAME),
            r#"
[coordinator]
root = "relative"
"#,
        )
        .unwrap();

        let err = RegistryConfig::load(temp_dir.path()).unwrap_err();
        assert!(matches!(err, LockyardError::InvalidConfig(_)));
    }

    #[test]
    #[serial]
    fn test_resolve_home_prefers_environment() {
        unsafe { env::set_var(HOME_ENV_VAR, "/srv/locks") };
        let home = resolve_home();
        unsafe { env::remove_var(HOME_ENV_VAR) };

        assert_eq!(home.unwrap(), PathBuf::from("/srv/locks"));
    }
}
