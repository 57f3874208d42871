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

//! Registry backed by a shared keyed store.
//!
//! Every lock of a registry is a field of one hash named by the registry key.
//! A field is claimed with an atomic insert-if-absent and released by
//! deleting it after checking that it still holds the record this process
//! wrote.

pub mod expiry;
pub mod file;
pub mod memory;
pub mod registry;
pub mod serializer;

pub use expiry::LockExpiryReport;
pub use file::FileKeyedStore;
pub use memory::MemoryKeyedStore;
pub use registry::{KeyedStoreLock, KeyedStoreLockRegistry, KeyedStoreRegistryBuilder, RemoteLock};
pub use serializer::LockRecord;

use crate::error::Result;
use std::time::Duration;

/// Hash-of-fields storage shared by every participating process.
#[cfg_attr(test, mockall::automock)]
pub trait KeyedStore: Send + Sync {
    /// Stores `value` under `field` unless the field already exists. Must be atomic.
    fn put_if_absent(&self, hash: &str, field: &str, value: &[u8]) -> Result<bool>;

    fn get(&self, hash: &str, field: &str) -> Result<Option<Vec<u8>>>;

    /// Returns `true` when the field existed.
    fn remove(&self, hash: &str, field: &str) -> Result<bool>;

    /// Every field of `hash` with its value, in no particular order.
    fn entries(&self, hash: &str) -> Result<Vec<(String, Vec<u8>)>>;

    /// Removes store-internal leftovers older than `older_than`. Returns how many were removed.
    fn sweep_artifacts(&self, _hash: &str, _older_than: Duration) -> Result<usize> {
        Ok(0)
    }
}
