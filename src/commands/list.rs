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
use crate::keyed::RemoteLock;
use crate::locking::wait_observer::format_duration;
use chrono::{DateTime, Utc};
use comfy_table::{Cell, Table, presets::UTF8_BORDERS_ONLY};
use serde::Serialize;

#[derive(Debug, Serialize, PartialEq, Eq)]
pub(crate) struct LockEntry {
    pub registry: String,
    pub key: String,
    pub locked_at: DateTime<Utc>,
    pub thread: String,
    pub host: String,
}

impl From<RemoteLock> for LockEntry {
    fn from(lock: RemoteLock) -> Self {
        Self {
            registry: lock.registry_key,
            key: lock.record.key,
            locked_at: lock.record.locked_at,
            thread: lock.record.thread_name,
            host: lock.record.host,
        }
    }
}

pub struct ListCommand<'a> {
    config: &'a RegistryConfig,
}

impl<'a> ListCommand<'a> {
    pub fn new(config: &'a RegistryConfig) -> Result<Self> {
        Ok(Self { config })
    }

    pub(crate) fn entries(&self) -> Result<Vec<LockEntry>> {
        let registry = open_registry(self.config)?;
        Ok(registry
            .list_locks()?
            .into_iter()
            .map(LockEntry::from)
            .collect())
    }

    pub fn execute(&self, json: bool) -> Result<()> {
        let entries = self.entries()?;

        if json {
            println!("{}", serde_json::to_string_pretty(&entries)?);
            return Ok(());
        }

        if entries.is_empty() {
            println!(
                "No locks held in registry '{}'",
                self.config.keyed_store.registry_key
            );
            return Ok(());
        }

        let now = Utc::now();
        let mut table = Table::new();
        table.load_preset(UTF8_BORDERS_ONLY);
        table.set_header(vec![
            Cell::new("Key"),
            Cell::new("Locked at (UTC)"),
            Cell::new("Held for"),
            Cell::new("Thread"),
            Cell::new("Host"),
        ]);

        for entry in &entries {
            let held_for = (now - entry.locked_at).to_std().unwrap_or_default();
            table.add_row(vec![
                Cell::new(&entry.key),
                Cell::new(entry.locked_at.format("%Y-%m-%d %H:%M:%S%.3f")),
                Cell::new(format_duration(held_for)),
                Cell::new(&entry.thread),
                Cell::new(&entry.host),
            ]);
        }

        println!("{table}");
        println!();
        println!(
            "{} lock{} in registry '{}'",
            entries.len(),
            if entries.len() == 1 { "" } else { "s" },
            self.config.keyed_store.registry_key
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::locking::{DistributedLock, LockRegistry};
    use tempfile::TempDir;

    #[test]
    fn test_list_empty_store() {
        let temp_dir = TempDir::new().unwrap();
        let config = RegistryConfig::new(temp_dir.path().to_path_buf());

        let command = ListCommand::new(&config).unwrap();
        assert!(command.entries().unwrap().is_empty());
        assert!(command.execute(false).is_ok());
        assert!(command.execute(true).is_ok());
    }

    #[test]
    fn test_list_reports_held_locks() {
        let temp_dir = TempDir::new().unwrap();
        let mut config = RegistryConfig::new(temp_dir.path().to_path_buf());
        config.keyed_store.host = Some("build-agent".to_string());

        let registry = open_registry(&config).unwrap();
        let second = registry.obtain("reports/b");
        let first = registry.obtain("reports/a");
        assert!(second.try_lock().unwrap());
        assert!(first.try_lock().unwrap());

        let command = ListCommand::new(&config).unwrap();
        let entries = command.entries().unwrap();
        let keys: Vec<_> = entries.iter().map(|entry| entry.key.as_str()).collect();
        assert_eq!(keys, vec!["reports/a", "reports/b"]);
        assert!(entries.iter().all(|entry| entry.host == "build-agent"));
        assert!(entries.iter().all(|entry| entry.registry == "lockyard"));
        assert!(command.execute(false).is_ok());

        first.unlock().unwrap();
        second.unlock().unwrap();
        assert!(command.entries().unwrap().is_empty());
    }
}
