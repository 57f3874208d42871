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

use crate::commands::list::LockEntry;
use crate::commands::open_registry;
use crate::config::RegistryConfig;
use crate::error::Result;
use colored::Colorize;

pub struct StatusCommand<'a> {
    config: &'a RegistryConfig,
}

impl<'a> StatusCommand<'a> {
    pub fn new(config: &'a RegistryConfig) -> Result<Self> {
        Ok(Self { config })
    }

    pub(crate) fn holder(&self, key: &str) -> Result<Option<LockEntry>> {
        let registry = open_registry(self.config)?;
        Ok(registry.remote_lock(key)?.map(LockEntry::from))
    }

    pub fn execute(&self, key: &str, json: bool) -> Result<()> {
        let holder = self.holder(key)?;

        if json {
            let output = serde_json::json!({
                "key": key,
                "registry": self.config.keyed_store.registry_key,
                "locked": holder.is_some(),
                "holder": holder,
            });
            println!("{}", serde_json::to_string_pretty(&output)?);
            return Ok(());
        }

        match holder {
            Some(entry) => {
                println!("{} '{key}' is {}", "Lock".bold(), "held".yellow());
                println!(
                    "  Locked at: {}",
                    entry.locked_at.format("%Y-%m-%d %H:%M:%S%.3f UTC")
                );
                println!("  Thread:    {}", entry.thread);
                println!("  Host:      {}", entry.host);
            }
            None => println!("{} '{key}' is {}", "Lock".bold(), "free".green()),
        }
        Ok(())
    }
}
