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

use super::KeyedStore;
use crate::error::Result;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

/// Keyed store held in process memory.
#[derive(Debug, Default)]
pub struct MemoryKeyedStore {
    hashes: Mutex<HashMap<String, HashMap<String, Vec<u8>>>>,
}

impl MemoryKeyedStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn hashes(&self) -> MutexGuard<'_, HashMap<String, HashMap<String, Vec<u8>>>> {
        self.hashes
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Overwrites a field unconditionally.
    pub fn put(&self, hash: &str, field: &str, value: &[u8]) {
        self.hashes()
            .entry(hash.to_string())
            .or_default()
            .insert(field.to_string(), value.to_vec());
    }

    pub fn len(&self, hash: &str) -> usize {
        self.hashes().get(hash).map_or(0, HashMap::len)
    }
}

impl KeyedStore for MemoryKeyedStore {
    fn put_if_absent(&self, hash: &str, field: &str, value: &[u8]) -> Result<bool> {
        let mut hashes = self.hashes();
        let fields = hashes.entry(hash.to_string()).or_default();
        if fields.contains_key(field) {
            return Ok(false);
        }
        fields.insert(field.to_string(), value.to_vec());
        Ok(true)
    }

    fn get(&self, hash: &str, field: &str) -> Result<Option<Vec<u8>>> {
        Ok(self
            .hashes()
            .get(hash)
            .and_then(|fields| fields.get(field))
            .cloned())
    }

    fn remove(&self, hash: &str, field: &str) -> Result<bool> {
        let mut hashes = self.hashes();
        let Some(fields) = hashes.get_mut(hash) else {
            return Ok(false);
        };
        let removed = fields.remove(field).is_some();
        if fields.is_empty() {
            hashes.remove(hash);
        }
        Ok(removed)
    }

    fn entries(&self, hash: &str) -> Result<Vec<(String, Vec<u8>)>> {
        Ok(self
            .hashes()
            .get(hash)
            .map(|fields| {
                fields
                    .iter()
                    .map(|(field, value)| (field.clone(), value.clone()))
                    .collect()
            })
            .unwrap_or_default())
    }
}
