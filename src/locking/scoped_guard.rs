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
use log::warn;
use std::time::Duration;

/// RAII guard that releases one hold of a lock when dropped.
///
/// Must be dropped on the thread that acquired it.
pub struct ScopedLock<'a, L: DistributedLock + ?Sized> {
    lock: Option<&'a L>,
}

impl<'a, L: DistributedLock + ?Sized> ScopedLock<'a, L> {
    /// Blocks until `lock` is acquired.
    pub fn acquire(lock: &'a L) -> Result<Self> {
        lock.lock()?;
        Ok(Self { lock: Some(lock) })
    }

    /// Returns `None` when the lock could not be acquired within `timeout`.
    pub fn try_acquire_for(lock: &'a L, timeout: Duration) -> Result<Option<Self>> {
        Ok(lock
            .try_lock_for(timeout)?
            .then_some(Self { lock: Some(lock) }))
    }

    pub fn key(&self) -> &str {
        self.lock.map(|lock| lock.key()).unwrap_or_default()
    }

    /// Releases now and reports the outcome instead of logging it.
    pub fn release(mut self) -> Result<()> {
        match self.lock.take() {
            Some(lock) => lock.unlock(),
            None => Ok(()),
        }
    }
}

impl<L: DistributedLock + ?Sized> Drop for ScopedLock<'_, L> {
    fn drop(&mut self) {
        if let Some(lock) = self.lock.take()
            && let Err(err) = lock.unlock()
        {
            warn!("Failed to release lock '{}': {err}", lock.key());
        }
    }
}
