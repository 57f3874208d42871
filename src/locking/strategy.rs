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

//! Mapping of logical lock keys onto remote addresses.

use std::fmt;

/// Maps a lock key to the address used by the remote store.
///
/// Implementations must be injective over the keys they accept: two distinct
/// keys never share an address.
pub trait KeyStrategy: Send + Sync + fmt::Debug {
    fn address_for(&self, key: &str) -> String;

    /// `true` when the key space is finite, in which case cached handles are never expired.
    fn bounded(&self) -> bool {
        false
    }
}

/// Places every lock under `root` in a hierarchical namespace: `<root>/<key>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathStrategy {
    root: String,
}

impl PathStrategy {
    pub fn new(root: impl Into<String>) -> Self {
        let root = root.into();
        let trimmed = root.trim_end_matches('/');
        Self {
            root: if trimmed.is_empty() {
                String::new()
            } else {
                trimmed.to_string()
            },
        }
    }

    pub fn root(&self) -> &str {
        if self.root.is_empty() { "/" } else { &self.root }
    }
}

impl KeyStrategy for PathStrategy {
    fn address_for(&self, key: &str) -> String {
        format!("{}/{key}", self.root)
    }
}

/// Uses the key itself as the hash field name.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FieldStrategy;

impl KeyStrategy for FieldStrategy {
    fn address_for(&self, key: &str) -> String {
        key.to_string()
    }
}
