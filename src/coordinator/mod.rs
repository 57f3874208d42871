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

//! Registry backed by a hierarchical coordination service.
//!
//! Exclusivity comes from the sequential-ephemeral-node protocol implemented
//! by [`InterProcessMutex`]; the service itself is reached through the
//! [`Coordinator`] capability trait.

pub mod cache;
pub mod memory;
pub mod mutex;
pub mod probe;
pub mod registry;

pub use cache::LruCache;
pub use memory::{MemoryCoordinator, MemoryEnsemble};
pub use mutex::InterProcessMutex;
pub use probe::{ProbeExecutor, ProbeTicket};
pub use registry::{CoordinatorLock, CoordinatorLockRegistry};

use crate::error::Result;
use std::time::Duration;

/// Operations the lock protocol needs from a coordination service session.
///
/// Paths are absolute and `/`-separated. Ephemeral nodes belong to the
/// session that created them and vanish when it closes.
#[cfg_attr(test, mockall::automock)]
pub trait Coordinator: Send + Sync {
    fn exists(&self, path: &str) -> Result<bool>;

    /// Creates `<prefix><sequence>` as an ephemeral node, creating missing
    /// parents as persistent nodes. Returns the full path of the new node.
    fn create_sequential_ephemeral(&self, prefix: &str, data: &[u8]) -> Result<String>;

    /// Names (not paths) of the direct children of `path`.
    fn children(&self, path: &str) -> Result<Vec<String>>;

    /// Deletes `path`. Deleting a missing node succeeds.
    fn delete(&self, path: &str) -> Result<()>;

    /// Blocks until `path` no longer exists. Returns `false` if `timeout` elapsed first.
    fn wait_for_deletion(&self, path: &str, timeout: Option<Duration>) -> Result<bool>;
}
