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

use crate::error::Result;
use crate::locking::lock::DistributedLock;
use std::sync::Arc;
use std::time::Duration;

/// Hands out lock handles by key.
pub trait LockRegistry: Send + Sync {
    type Lock: DistributedLock + 'static;

    /// Returns the handle for `key`, creating it on first use. Never acquires the lock.
    fn obtain(&self, key: &str) -> Arc<Self::Lock>;
}

/// A registry whose cached handles can be pruned when unused.
pub trait ExpirableLockRegistry: LockRegistry {
    /// Removes cached handles unused for longer than `age` and not held in this process.
    fn expire_unused_older_than(&self, age: Duration) -> Result<()>;
}
