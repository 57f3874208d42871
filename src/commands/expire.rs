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

use crate::commands::open_registry;
use crate::config::RegistryConfig;
use crate::error::Result;
use crate::keyed::LockExpiryReport;
use log::info;
use std::time::Duration;

pub struct ExpireCommand<'a> {
    config: &'a RegistryConfig,
}

impl<'a> ExpireCommand<'a> {
    pub fn new(config: &'a RegistryConfig) -> Result<Self> {
        Ok(Self { config })
    }

    /// Sweeps records older than `older_than_secs`, or the configured expiry when `None`.
    pub(crate) fn sweep(&self, older_than_secs: Option<u64>) -> Result<LockExpiryReport> {
        let registry = open_registry(self.config)?;
        let age = older_than_secs
            .map(Duration::from_secs)
            .unwrap_or_else(|| registry.expire_after());
        info!(
            "Expiring locks in '{}' older than {}s",
            registry.registry_key(),
            age.as_secs()
        );
        registry.expire_locks_older_than(age)
    }

    pub fn execute(&self, older_than_secs: Option<u64>) -> Result<()> {
        let report = self.sweep(older_than_secs)?;

        if report.expired.is_empty() {
            println!("No expired locks found");
        } else {
            println!("Expired {} lock(s):", report.removed_locks());
            for key in &report.expired {
                println!("  {key}");
            }
        }
        if report.removed_staging > 0 {
            println!("Removed {} stale staging file(s)", report.removed_staging);
        }
        if report.errors > 0 {
            eprintln!(
                "Warning: {} record(s) could not be read or removed; run with -v for details",
                report.errors
            );
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keyed::{FileKeyedStore, KeyedStore, LockRecord};
    use chrono::{Duration as ChronoDuration, Utc};
    use tempfile::TempDir;

    fn plant(config: &RegistryConfig, key: &str, age_secs: i64) {
        let store = FileKeyedStore::new(config.store_dir());
        let record = LockRecord::new(
            "crashed-host".to_string(),
            key.to_string(),
            "worker-1".to_string(),
            Utc::now() - ChronoDuration::seconds(age_secs),
        );
        assert!(
            store
                .put_if_absent(
                    &config.keyed_store.registry_key,
                    key,
                    &record.encode().unwrap()
                )
                .unwrap()
        );
    }

    #[test]
    fn test_expire_uses_configured_age_by_default() {
        let temp_dir = TempDir::new().unwrap();
        let config = RegistryConfig::new(temp_dir.path().to_path_buf());
        plant(&config, "old", 3_600);
        plant(&config, "recent", 5);

        let command = ExpireCommand::new(&config).unwrap();
        let report = command.sweep(None).unwrap();
        assert_eq!(report.expired, vec!["old".to_string()]);
        assert_eq!(report.errors, 0);
    }

    #[test]
    fn test_expire_with_explicit_age() {
        let temp_dir = TempDir::new().unwrap();
        let config = RegistryConfig::new(temp_dir.path().to_path_buf());
        plant(&config, "recent", 5);

        let command = ExpireCommand::new(&config).unwrap();
        assert!(command.execute(Some(1)).is_ok());
        assert!(command.sweep(Some(0)).unwrap().expired.is_empty());
    }
}
