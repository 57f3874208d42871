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

//! Process-local reentrant locks.
//!
//! The keyed-store registry queues threads of one process on these before
//! polling the shared store, so remote polling only arbitrates between
//! processes.

use crate::error::{LockyardError, Result};
use crate::locking::cancellation::{CANCELLATION_CHECK_INTERVAL, CancellationToken};
use crate::locking::lock::{DistributedLock, LockState, Reentrancy, Release};
use crate::locking::registry::LockRegistry;
use crate::platform::current_thread_name;
use log::trace;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::thread::{self, ThreadId};
use std::time::{Duration, Instant};

pub const DEFAULT_STRIPES: usize = 256;

/// Reentrant in-process lock built on a mutex and condition variable.
#[derive(Debug)]
pub struct LocalLock {
    key: String,
    state: Mutex<Reentrancy>,
    released: Condvar,
}

impl LocalLock {
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            state: Mutex::new(Reentrancy::new()),
            released: Condvar::new(),
        }
    }

    fn state_guard(&self) -> MutexGuard<'_, Reentrancy> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Takes the lock if free or already ours. Callers hold the state mutex.
    fn take(state: &mut Reentrancy) -> bool {
        let me = thread::current().id();
        if state.try_reenter(me) {
            return true;
        }
        if state.is_held() {
            return false;
        }
        state.claim(me, current_thread_name());
        true
    }

    /// Waits for the lock until `deadline`, checking `cancellation` between wakeups.
    fn acquire_until(
        &self,
        deadline: Option<Instant>,
        cancellation: Option<&CancellationToken>,
    ) -> Result<bool> {
        let started = Instant::now();
        let mut state = self.state_guard();
        loop {
            if cancellation.is_some_and(CancellationToken::is_cancelled) {
                return Err(LockyardError::Interrupted {
                    key: self.key.clone(),
                    waited_secs: started.elapsed().as_secs_f64(),
                });
            }
            if Self::take(&mut state) {
                return Ok(true);
            }

            let now = Instant::now();
            let mut slice = match deadline {
                Some(deadline) if now >= deadline => return Ok(false),
                Some(deadline) => deadline - now,
                None => Duration::MAX,
            };
            if cancellation.is_some() {
                slice = slice.min(CANCELLATION_CHECK_INTERVAL);
            }

            state = if slice == Duration::MAX {
                self.released
                    .wait(state)
                    .unwrap_or_else(|poisoned| poisoned.into_inner())
            } else {
                self.released
                    .wait_timeout(state, slice)
                    .unwrap_or_else(|poisoned| poisoned.into_inner())
                    .0
            };
        }
    }

    /// Releases one hold of `owner`, which need not be the calling thread.
    ///
    /// Used when a handle that wrapped this lock is torn down on a thread
    /// other than its owner.
    pub(crate) fn release_for(&self, owner: ThreadId) -> Result<()> {
        let mut state = self.state_guard();
        if state.release(&self.key, owner)? == Release::Released {
            trace!("Released local lock {}", self.key);
            self.released.notify_all();
        }
        Ok(())
    }
}

impl DistributedLock for LocalLock {
    fn key(&self) -> &str {
        &self.key
    }

    fn lock(&self) -> Result<()> {
        self.acquire_until(None, None).map(|_| ())
    }

    fn lock_interruptibly(&self, cancellation: &CancellationToken) -> Result<()> {
        self.acquire_until(None, Some(cancellation)).map(|_| ())
    }

    fn try_lock(&self) -> Result<bool> {
        Ok(Self::take(&mut self.state_guard()))
    }

    fn try_lock_for(&self, timeout: Duration) -> Result<bool> {
        let deadline = Instant::now().checked_add(timeout);
        self.acquire_until(deadline, None)
    }

    fn unlock(&self) -> Result<()> {
        self.release_for(thread::current().id())
    }

    fn state(&self) -> LockState {
        self.state_guard().state()
    }
}

/// Fixed set of [`LocalLock`] stripes selected by key hash.
///
/// Distinct keys may share a stripe; that only serializes them within this process.
#[derive(Debug)]
pub struct LocalLockRegistry {
    stripes: Vec<Arc<LocalLock>>,
    mask: usize,
}

impl LocalLockRegistry {
    pub fn new() -> Self {
        Self::with_stripes(DEFAULT_STRIPES)
    }

    /// `stripes` is rounded up to a power of two.
    pub fn with_stripes(stripes: usize) -> Self {
        let count = stripes.max(1).next_power_of_two();
        Self {
            stripes: (0..count)
                .map(|index| Arc::new(LocalLock::new(format!("local-stripe-{index}"))))
                .collect(),
            mask: count - 1,
        }
    }

    pub fn stripe_count(&self) -> usize {
        self.stripes.len()
    }

    fn stripe_index(&self, key: &str) -> usize {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        (hasher.finish() as usize) & self.mask
    }
}

impl Default for LocalLockRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl LockRegistry for LocalLockRegistry {
    type Lock = LocalLock;

    fn obtain(&self, key: &str) -> Arc<LocalLock> {
        Arc::clone(&self.stripes[self.stripe_index(key)])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn registry_returns_same_stripe_for_same_key() {
        let registry = LocalLockRegistry::new();
        assert_eq!(registry.stripe_count(), 256);
        let first = registry.obtain("order-42");
        let second = registry.obtain("order-42");
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[test]
    fn stripe_count_rounds_to_power_of_two() {
        assert_eq!(LocalLockRegistry::with_stripes(100).stripe_count(), 128);
        assert_eq!(LocalLockRegistry::with_stripes(0).stripe_count(), 1);
    }

    #[test]
    fn reentrant_lock_and_unlock() {
        let lock = LocalLock::new("k");
        lock.lock().unwrap();
        assert!(lock.try_lock().unwrap());
        assert_eq!(lock.state().holds(), 2);
        lock.unlock().unwrap();
        assert!(lock.state().is_held_by_current_thread());
        lock.unlock().unwrap();
        assert_eq!(lock.state(), LockState::Unlocked);
        assert!(lock.unlock().is_err());
    }

    #[test]
    fn other_thread_cannot_take_or_release() {
        let lock = Arc::new(LocalLock::new("k"));
        lock.lock().unwrap();

        let contender = Arc::clone(&lock);
        let (took, unlock_failed) = thread::spawn(move || {
            let took = contender.try_lock_for(Duration::from_millis(30)).unwrap();
            let unlock_failed = contender.unlock().is_err();
            (took, unlock_failed)
        })
        .join()
        .unwrap();

        assert!(!took);
        assert!(unlock_failed);
        lock.unlock().unwrap();
    }

    #[test]
    fn waiter_acquires_after_release() {
        let lock = Arc::new(LocalLock::new("k"));
        lock.lock().unwrap();

        let waiter = Arc::clone(&lock);
        let handle = thread::spawn(move || {
            waiter.lock().unwrap();
            waiter.unlock().unwrap();
        });

        thread::sleep(Duration::from_millis(20));
        lock.unlock().unwrap();
        handle.join().unwrap();
        assert_eq!(lock.state(), LockState::Unlocked);
    }

    #[test]
    fn interruptible_wait_observes_cancellation() {
        let lock = Arc::new(LocalLock::new("k"));
        lock.lock().unwrap();

        let token = CancellationToken::new();
        let waiter = Arc::clone(&lock);
        let waiter_token = token.clone();
        let handle = thread::spawn(move || waiter.lock_interruptibly(&waiter_token));

        thread::sleep(Duration::from_millis(20));
        token.cancel();
        let result = handle.join().unwrap();
        assert!(matches!(result, Err(LockyardError::Interrupted { .. })));
        lock.unlock().unwrap();
    }

    #[test]
    fn release_for_drops_one_foreign_hold() {
        let lock = Arc::new(LocalLock::new("k"));
        let holder = Arc::clone(&lock);
        let owner = thread::spawn(move || {
            holder.lock().unwrap();
            holder.lock().unwrap();
            thread::current().id()
        })
        .join()
        .unwrap();

        lock.release_for(owner).unwrap();
        assert_eq!(lock.state(), LockState::Locked { owner, holds: 1 });
        assert!(!lock.try_lock().unwrap());

        lock.release_for(owner).unwrap();
        assert!(lock.try_lock().unwrap());
        assert!(lock.release_for(owner).is_err());
        lock.unlock().unwrap();
    }

    #[test]
    fn mutual_exclusion_under_contention() {
        let lock = Arc::new(LocalLock::new("counter"));
        let inside = Arc::new(AtomicUsize::new(0));
        let max_inside = Arc::new(AtomicUsize::new(0));

        let workers: Vec<_> = (0..8)
            .map(|_| {
                let lock = Arc::clone(&lock);
                let inside = Arc::clone(&inside);
                let max_inside = Arc::clone(&max_inside);
                thread::spawn(move || {
                    for _ in 0..50 {
                        lock.lock().unwrap();
                        let now = inside.fetch_add(1, Ordering::SeqCst) + 1;
                        max_inside.fetch_max(now, Ordering::SeqCst);
                        inside.fetch_sub(1, Ordering::SeqCst);
                        lock.unlock().unwrap();
                    }
                })
            })
            .collect();
        for worker in workers {
            worker.join().unwrap();
        }

        assert_eq!(max_inside.load(Ordering::SeqCst), 1);
    }
}
