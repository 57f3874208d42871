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

use super::Coordinator;
use super::cache::LruCache;
use super::mutex::InterProcessMutex;
use super::probe::ProbeExecutor;
use crate::config::CoordinatorConfig;
use crate::error::{LockyardError, Result};
use crate::locking::acquisition::LockTimeoutBudget;
use crate::locking::cancellation::CancellationToken;
use crate::locking::lock::{DistributedLock, LockState, Reentrancy, Release};
use crate::locking::registry::{ExpirableLockRegistry, LockRegistry};
use crate::locking::strategy::{KeyStrategy, PathStrategy};
use crate::platform::{current_thread_name, resolve_host_name};
use log::debug;
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread;
use std::time::{Duration, Instant};

struct Shared {
    coordinator: Arc<dyn Coordinator>,
    strategy: Arc<dyn KeyStrategy>,
    probe_path: String,
    probes: ProbeExecutor,
    retry_interval: Duration,
    immediate_probe: Duration,
    lease_data: Vec<u8>,
}

impl Shared {
    /// Resolves once the service answers a probe, failing if it does not within `wait`.
    fn check_connectivity(&self, wait: Duration) -> Result<()> {
        let coordinator = Arc::clone(&self.coordinator);
        let path = self.probe_path.clone();
        let ticket = self.probes.submit(move || coordinator.exists(&path))?;
        match ticket.wait(wait) {
            Some(outcome) => outcome.map(|_| ()),
            None => Err(LockyardError::Connectivity(format!(
                "connectivity probe did not complete within {}ms",
                wait.as_millis()
            ))),
        }
    }
}

/// Registry whose locks are arbitrated by a coordination service.
///
/// Handles are cached in an LRU map keyed by remote path. Handles that are
/// held in this process are never evicted.
pub struct CoordinatorLockRegistry {
    shared: Arc<Shared>,
    cache: Mutex<LruCache<String, Arc<CoordinatorLock>>>,
}

impl CoordinatorLockRegistry {
    /// Locks live under `config.root` with one child path per key.
    pub fn new(coordinator: Arc<dyn Coordinator>, config: &CoordinatorConfig) -> Result<Self> {
        let strategy = Arc::new(PathStrategy::new(config.root.clone()));
        Self::with_strategy(coordinator, strategy, config)
    }

    pub fn with_strategy(
        coordinator: Arc<dyn Coordinator>,
        strategy: Arc<dyn KeyStrategy>,
        config: &CoordinatorConfig,
    ) -> Result<Self> {
        let probes = ProbeExecutor::new(config.probe_workers, config.probe_queue_capacity)?;
        let shared = Arc::new(Shared {
            coordinator,
            strategy,
            probe_path: PathStrategy::new(config.root.clone()).root().to_string(),
            probes,
            retry_interval: config.retry_interval(),
            immediate_probe: config.immediate_probe(),
            lease_data: resolve_host_name().into_bytes(),
        });

        let cache = LruCache::new(config.cache_capacity).with_eviction_listener(
            |path: &String, _lock: &Arc<CoordinatorLock>| {
                debug!("Evicted cached lock handle for {path}");
            },
        );

        Ok(Self {
            shared,
            cache: Mutex::new(cache),
        })
    }

    fn cache(&self) -> MutexGuard<'_, LruCache<String, Arc<CoordinatorLock>>> {
        self.cache
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn cached_handles(&self) -> usize {
        self.cache().len()
    }

    pub fn is_cached(&self, key: &str) -> bool {
        let address = self.shared.strategy.address_for(key);
        self.cache().contains_key(&address)
    }

    /// Stops the connectivity probe workers.
    pub fn shutdown(&self) {
        self.shared.probes.shutdown();
    }
}

impl LockRegistry for CoordinatorLockRegistry {
    type Lock = CoordinatorLock;

    fn obtain(&self, key: &str) -> Arc<CoordinatorLock> {
        let address = self.shared.strategy.address_for(key);
        let mut cache = self.cache();
        if let Some(existing) = cache.get(&address) {
            existing.touch();
            return Arc::clone(existing);
        }

        let lock = Arc::new(CoordinatorLock::new(
            key.to_string(),
            address.clone(),
            Arc::clone(&self.shared),
        ));
        cache.insert(address, Arc::clone(&lock), |cached| cached.state().is_locked());
        lock
    }
}

impl ExpirableLockRegistry for CoordinatorLockRegistry {
    fn expire_unused_older_than(&self, age: Duration) -> Result<()> {
        if self.shared.strategy.bounded() {
            return Err(LockyardError::Unsupported(
                "Lock expiry is not supported for bounded key strategies".to_string(),
            ));
        }

        let removed = self.cache().retain(|_, lock| {
            lock.state().is_locked() || lock.last_used().elapsed() <= age
        });
        if !removed.is_empty() {
            debug!("Expired {} unused lock handle(s)", removed.len());
        }
        Ok(())
    }
}

#[derive(Debug, Default)]
struct Slot {
    reentrancy: Reentrancy,
    lease: Option<String>,
}

/// How long the mutex may wait once connectivity is confirmed.
enum AcquireWait<'a> {
    Exactly(Duration),
    /// Whatever is left of the probe budget.
    RemainingBudget,
    UntilCancelled(&'a CancellationToken),
}

/// Reentrant handle over an [`InterProcessMutex`].
pub struct CoordinatorLock {
    key: String,
    mutex: InterProcessMutex,
    shared: Arc<Shared>,
    slot: Mutex<Slot>,
    last_used: Mutex<Instant>,
}

impl CoordinatorLock {
    fn new(key: String, path: String, shared: Arc<Shared>) -> Self {
        let mutex = InterProcessMutex::new(
            Arc::clone(&shared.coordinator),
            path,
            shared.lease_data.clone(),
        );
        Self {
            key,
            mutex,
            shared,
            slot: Mutex::new(Slot::default()),
            last_used: Mutex::new(Instant::now()),
        }
    }

    /// Remote path of the lock's node directory.
    pub fn path(&self) -> &str {
        self.mutex.path()
    }

    pub fn last_used(&self) -> Instant {
        *self
            .last_used
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn touch(&self) {
        *self
            .last_used
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Instant::now();
    }

    fn slot(&self) -> MutexGuard<'_, Slot> {
        self.slot
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Probes within `probe_wait`, then waits for the mutex as `wait` says.
    fn acquire(&self, probe_wait: Duration, wait: AcquireWait<'_>) -> Result<bool> {
        self.touch();
        let me = thread::current().id();
        if self.slot().reentrancy.try_reenter(me) {
            return Ok(true);
        }

        let budget = LockTimeoutBudget::new(probe_wait.into());
        if let Err(err) = self.shared.check_connectivity(probe_wait) {
            if err.is_connectivity() {
                debug!("Cannot reach coordination service for '{}': {err}", self.key);
                return Ok(false);
            }
            return Err(err);
        }

        let acquired = match wait {
            AcquireWait::Exactly(wait) => self.mutex.acquire(Some(wait)),
            AcquireWait::RemainingBudget => self
                .mutex
                .acquire(Some(budget.remaining().unwrap_or_default())),
            AcquireWait::UntilCancelled(cancellation) => {
                self.mutex.acquire_interruptibly(cancellation)
            }
        };
        let lease = match acquired {
            Ok(Some(lease)) => lease,
            Ok(None) => return Ok(false),
            Err(err) if err.is_connectivity() => {
                debug!("Lost coordination service while acquiring '{}': {err}", self.key);
                return Ok(false);
            }
            Err(err) => return Err(err),
        };

        let mut slot = self.slot();
        slot.reentrancy.claim(me, current_thread_name());
        slot.lease = Some(lease);
        debug!("Acquired lock '{}' at {}", self.key, self.path());
        Ok(true)
    }
}

impl DistributedLock for CoordinatorLock {
    fn key(&self) -> &str {
        &self.key
    }

    fn lock(&self) -> Result<()> {
        while !self.try_lock_for(self.shared.retry_interval)? {}
        Ok(())
    }

    fn lock_interruptibly(&self, cancellation: &CancellationToken) -> Result<()> {
        let started = Instant::now();
        loop {
            if cancellation.is_cancelled() {
                return Err(LockyardError::Interrupted {
                    key: self.key.clone(),
                    waited_secs: started.elapsed().as_secs_f64(),
                });
            }
            let wait = AcquireWait::UntilCancelled(cancellation);
            if self.acquire(self.shared.immediate_probe, wait)? {
                return Ok(());
            }
            // Cancelled, or the service could not be reached; back off before probing again.
            cancellation.sleep(self.shared.retry_interval);
        }
    }

    fn try_lock(&self) -> Result<bool> {
        self.acquire(
            self.shared.immediate_probe,
            AcquireWait::Exactly(Duration::ZERO),
        )
    }

    fn try_lock_for(&self, timeout: Duration) -> Result<bool> {
        self.acquire(timeout, AcquireWait::RemainingBudget)
    }

    fn unlock(&self) -> Result<()> {
        self.touch();
        let lease = {
            let mut slot = self.slot();
            match slot.reentrancy.release(&self.key, thread::current().id())? {
                Release::Retained { .. } => return Ok(()),
                Release::Released => slot.lease.take(),
            }
        };

        if let Some(lease) = lease {
            self.mutex.release(&lease)?;
            debug!("Released lock '{}'", self.key);
        }
        Ok(())
    }

    fn state(&self) -> LockState {
        self.slot().reentrancy.state()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coordinator::{MemoryEnsemble, MockCoordinator};

    fn config(capacity: usize) -> CoordinatorConfig {
        CoordinatorConfig {
            cache_capacity: capacity,
            ..CoordinatorConfig::default()
        }
    }

    fn registry(ensemble: &MemoryEnsemble, capacity: usize) -> CoordinatorLockRegistry {
        CoordinatorLockRegistry::new(Arc::new(ensemble.connect()), &config(capacity)).unwrap()
    }

    #[derive(Debug)]
    struct BoundedStrategy;

    impl KeyStrategy for BoundedStrategy {
        fn address_for(&self, key: &str) -> String {
            format!("/bounded/{key}")
        }

        fn bounded(&self) -> bool {
            true
        }
    }

    #[test]
    fn obtain_returns_cached_handle() {
        let ensemble = MemoryEnsemble::new();
        let registry = registry(&ensemble, 10);
        let first = registry.obtain("order-42");
        let second = registry.obtain("order-42");
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(first.path(), "/lockyard-registry/order-42");
        assert_eq!(registry.cached_handles(), 1);
    }

    #[test]
    fn reentrant_acquire_touches_remote_once() {
        let ensemble = MemoryEnsemble::new();
        let registry = registry(&ensemble, 10);
        let lock = registry.obtain("job");

        lock.lock().unwrap();
        assert!(lock.try_lock().unwrap());
        assert_eq!(ensemble.list_children("/lockyard-registry/job").len(), 1);
        assert_eq!(lock.state().holds(), 2);

        lock.unlock().unwrap();
        assert_eq!(ensemble.list_children("/lockyard-registry/job").len(), 1);
        lock.unlock().unwrap();
        assert!(ensemble.list_children("/lockyard-registry/job").is_empty());
        assert!(lock.unlock().is_err());
    }

    #[test]
    fn capacity_one_evicts_previous_key() {
        let ensemble = MemoryEnsemble::new();
        let registry = registry(&ensemble, 1);
        let first = registry.obtain("order-42");
        registry.obtain("order-99");
        assert!(!registry.is_cached("order-42"));

        let again = registry.obtain("order-42");
        assert!(!Arc::ptr_eq(&first, &again));
        assert!(again.try_lock().unwrap());
        again.unlock().unwrap();
    }

    #[test]
    fn held_handle_is_not_evicted() {
        let ensemble = MemoryEnsemble::new();
        let registry = registry(&ensemble, 1);
        let held = registry.obtain("held");
        held.lock().unwrap();

        registry.obtain("other");
        assert!(registry.is_cached("held"));
        assert!(Arc::ptr_eq(&held, &registry.obtain("held")));
        held.unlock().unwrap();
    }

    #[test]
    fn expire_keeps_held_and_recent_handles() {
        let ensemble = MemoryEnsemble::new();
        let registry = registry(&ensemble, 10);
        let held = registry.obtain("held");
        held.lock().unwrap();
        registry.obtain("idle");

        thread::sleep(Duration::from_millis(40));
        registry.obtain("fresh");
        registry
            .expire_unused_older_than(Duration::from_millis(20))
            .unwrap();

        assert!(registry.is_cached("held"));
        assert!(registry.is_cached("fresh"));
        assert!(!registry.is_cached("idle"));
        held.unlock().unwrap();
    }

    #[test]
    fn expire_is_unsupported_for_bounded_strategy() {
        let ensemble = MemoryEnsemble::new();
        let registry = CoordinatorLockRegistry::with_strategy(
            Arc::new(ensemble.connect()),
            Arc::new(BoundedStrategy),
            &config(10),
        )
        .unwrap();
        assert_eq!(registry.obtain("a").path(), "/bounded/a");

        let err = registry
            .expire_unused_older_than(Duration::from_secs(1))
            .unwrap_err();
        assert!(matches!(err, LockyardError::Unsupported(_)));
        assert!(err.to_string().contains("not supported"));
    }

    #[test]
    fn failed_probe_is_reported_as_not_acquired() {
        let mut coordinator = MockCoordinator::new();
        coordinator
            .expect_exists()
            .returning(|_| Err(LockyardError::Connectivity("refused".to_string())));
        coordinator.expect_create_sequential_ephemeral().never();

        let registry =
            CoordinatorLockRegistry::new(Arc::new(coordinator), &config(10)).unwrap();
        let lock = registry.obtain("job");
        assert!(!lock.try_lock_for(Duration::from_millis(200)).unwrap());
        assert!(!lock.try_lock().unwrap());
        assert_eq!(lock.state(), LockState::Unlocked);
    }

    #[test]
    fn release_error_surfaces_after_local_state_is_cleared() {
        let mut coordinator = MockCoordinator::new();
        coordinator.expect_exists().returning(|_| Ok(true));
        coordinator
            .expect_create_sequential_ephemeral()
            .returning(|prefix, _| Ok(format!("{prefix}0000000000")));
        coordinator
            .expect_children()
            .returning(|_| Ok(vec!["lock-0000000000".to_string()]));
        coordinator
            .expect_delete()
            .returning(|_| Err(LockyardError::Coordination("session expired".to_string())));

        let registry =
            CoordinatorLockRegistry::new(Arc::new(coordinator), &config(10)).unwrap();
        let lock = registry.obtain("job");
        assert!(lock.try_lock_for(Duration::from_secs(1)).unwrap());

        let err = lock.unlock().unwrap_err();
        assert!(matches!(err, LockyardError::Coordination(_)));
        assert_eq!(lock.state(), LockState::Unlocked);
    }

    #[test]
    fn interruptible_wait_leaves_no_node_behind() {
        let ensemble = MemoryEnsemble::new();
        let holder_registry = registry(&ensemble, 10);
        let waiter_registry = registry(&ensemble, 10);
        let held = holder_registry.obtain("job");
        held.lock().unwrap();

        let cancellation = CancellationToken::new();
        let canceller = cancellation.clone();
        let started = Instant::now();
        let err = thread::scope(|scope| {
            scope.spawn(move || {
                thread::sleep(Duration::from_millis(50));
                canceller.cancel();
            });
            waiter_registry
                .obtain("job")
                .lock_interruptibly(&cancellation)
                .unwrap_err()
        });

        assert!(matches!(err, LockyardError::Interrupted { ref key, .. } if key == "job"));
        assert!(started.elapsed() < Duration::from_millis(500));
        assert_eq!(ensemble.list_children("/lockyard-registry/job").len(), 1);
        held.unlock().unwrap();
        assert!(ensemble.list_children("/lockyard-registry/job").is_empty());
    }

    #[test]
    fn other_thread_cannot_unlock() {
        let ensemble = MemoryEnsemble::new();
        let registry = registry(&ensemble, 10);
        let lock = registry.obtain("job");
        lock.lock().unwrap();

        let foreign = Arc::clone(&lock);
        let err = thread::spawn(move || foreign.unlock().unwrap_err())
            .join()
            .unwrap();
        assert!(matches!(err, LockyardError::OwnershipViolation { .. }));
        lock.unlock().unwrap();
    }
}
