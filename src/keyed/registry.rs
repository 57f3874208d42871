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
use super::expiry::{self, LockExpiryReport};
use super::serializer::LockRecord;
use crate::config::KeyedStoreConfig;
use crate::error::{LockyardError, Result};
use crate::locking::acquisition::{AcquireMode, LockAcquisitionRequest, PollingBackoff};
use crate::locking::cancellation::CancellationToken;
use crate::locking::local::{LocalLock, LocalLockRegistry};
use crate::locking::lock::{DistributedLock, LockState, Reentrancy, Release};
use crate::locking::registry::LockRegistry;
use crate::locking::strategy::{FieldStrategy, KeyStrategy};
use crate::locking::timeout::LockTimeoutValue;
use crate::locking::wait_observer::{LockWaitObserver, LoggingWaitObserver};
use crate::platform::{current_thread_name, resolve_host_name, truncate_identity};
use chrono::Utc;
use log::{debug, warn};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::thread::{self, ThreadId};
use std::time::Duration;

/// Per-thread handle bookkeeping. Guarded by a mutex that is never held across store calls.
#[derive(Default)]
struct TrackedHandles {
    known: HashMap<ThreadId, Vec<Weak<KeyedStoreLock>>>,
    /// Handles a thread holds stay alive here until their last unlock.
    held: HashMap<ThreadId, Vec<Arc<KeyedStoreLock>>>,
}

impl TrackedHandles {
    fn find(&mut self, thread: ThreadId, key: &str) -> Option<Arc<KeyedStoreLock>> {
        self.known.retain(|_, handles| {
            handles.retain(|handle| handle.strong_count() > 0);
            !handles.is_empty()
        });
        self.known.get(&thread).and_then(|handles| {
            handles
                .iter()
                .filter_map(Weak::upgrade)
                .find(|handle| handle.key == key)
        })
    }

    fn remember(&mut self, thread: ThreadId, handle: &Arc<KeyedStoreLock>) {
        self.known
            .entry(thread)
            .or_default()
            .push(Arc::downgrade(handle));
    }

    fn hold(&mut self, thread: ThreadId, handle: Arc<KeyedStoreLock>) {
        self.held.entry(thread).or_default().push(handle);
    }

    /// Takes `handle` out of the held list of `thread`. The caller drops it after unlocking.
    fn release(
        &mut self,
        thread: ThreadId,
        handle: &KeyedStoreLock,
    ) -> Option<Arc<KeyedStoreLock>> {
        let handles = self.held.get_mut(&thread)?;
        let index = handles
            .iter()
            .position(|candidate| std::ptr::eq(Arc::as_ptr(candidate), handle))?;
        let released = handles.swap_remove(index);
        if handles.is_empty() {
            self.held.remove(&thread);
        }
        Some(released)
    }

    fn forget(
        &mut self,
        thread: ThreadId,
        handle: &Arc<KeyedStoreLock>,
    ) -> Option<Arc<KeyedStoreLock>> {
        if let Some(handles) = self.known.get_mut(&thread) {
            handles.retain(|candidate| !std::ptr::eq(candidate.as_ptr(), Arc::as_ptr(handle)));
        }
        self.release(thread, handle)
    }
}

struct Shared {
    store: Arc<dyn KeyedStore>,
    registry_key: String,
    strategy: Arc<dyn KeyStrategy>,
    host: String,
    expire_after: Duration,
    poll_interval: Duration,
    local: LocalLockRegistry,
    observer: Arc<dyn LockWaitObserver>,
    tracked: Mutex<TrackedHandles>,
}

impl Shared {
    fn tracked(&self) -> MutexGuard<'_, TrackedHandles> {
        self.tracked
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Configures a [`KeyedStoreLockRegistry`].
pub struct KeyedStoreRegistryBuilder {
    store: Arc<dyn KeyedStore>,
    config: KeyedStoreConfig,
    strategy: Arc<dyn KeyStrategy>,
    observer: Arc<dyn LockWaitObserver>,
}

impl KeyedStoreRegistryBuilder {
    pub fn strategy(mut self, strategy: Arc<dyn KeyStrategy>) -> Self {
        self.strategy = strategy;
        self
    }

    pub fn observer(mut self, observer: Arc<dyn LockWaitObserver>) -> Self {
        self.observer = observer;
        self
    }

    pub fn build(self) -> KeyedStoreLockRegistry {
        let host = self
            .config
            .host
            .clone()
            .unwrap_or_else(resolve_host_name);
        KeyedStoreLockRegistry {
            shared: Arc::new(Shared {
                store: self.store,
                registry_key: self.config.registry_key.clone(),
                strategy: self.strategy,
                host: truncate_identity(&host),
                expire_after: self.config.expire_after(),
                poll_interval: self.config.poll_interval(),
                local: LocalLockRegistry::new(),
                observer: self.observer,
                tracked: Mutex::new(TrackedHandles::default()),
            }),
        }
    }
}

/// A lock record found in the store, tagged with the registry it belongs to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteLock {
    pub registry_key: String,
    pub record: LockRecord,
}

impl fmt::Display for RemoteLock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Lock [key={}:{}, lockedAt={}, thread={}, host={}]",
            self.registry_key,
            self.record.key,
            self.record.locked_at_display(),
            self.record.thread_name,
            self.record.host
        )
    }
}

/// Registry whose locks are fields of one hash in a shared keyed store.
///
/// Threads of this process first queue on a striped local lock, so only one
/// of them polls the store for a given key at a time. Waiting is by polling
/// and is not fair.
pub struct KeyedStoreLockRegistry {
    shared: Arc<Shared>,
}

impl KeyedStoreLockRegistry {
    pub fn new(store: Arc<dyn KeyedStore>, config: &KeyedStoreConfig) -> Self {
        Self::builder(store, config).build()
    }

    pub fn builder(
        store: Arc<dyn KeyedStore>,
        config: &KeyedStoreConfig,
    ) -> KeyedStoreRegistryBuilder {
        KeyedStoreRegistryBuilder {
            store,
            config: config.clone(),
            strategy: Arc::new(FieldStrategy),
            observer: Arc::new(LoggingWaitObserver),
        }
    }

    pub fn registry_key(&self) -> &str {
        &self.shared.registry_key
    }

    /// Host identifier written into this registry's lock records.
    pub fn host(&self) -> &str {
        &self.shared.host
    }

    pub fn expire_after(&self) -> Duration {
        self.shared.expire_after
    }

    /// Removes every record older than the configured expiry.
    pub fn expire_locks(&self) -> Result<LockExpiryReport> {
        self.expire_locks_older_than(self.shared.expire_after)
    }

    pub fn expire_locks_older_than(&self, age: Duration) -> Result<LockExpiryReport> {
        expiry::sweep(
            self.shared.store.as_ref(),
            &self.shared.registry_key,
            age,
            Utc::now(),
        )
    }

    /// Every readable lock record of this registry, ordered by key.
    pub fn list_locks(&self) -> Result<Vec<RemoteLock>> {
        let mut locks = Vec::new();
        for (field, bytes) in self.shared.store.entries(&self.shared.registry_key)? {
            match LockRecord::decode(&bytes) {
                Ok(Some(record)) => locks.push(RemoteLock {
                    registry_key: self.shared.registry_key.clone(),
                    record,
                }),
                Ok(None) => {}
                Err(err) => warn!("Skipping unreadable lock record '{field}': {err}"),
            }
        }
        locks.sort_by(|a, b| a.record.key.cmp(&b.record.key));
        Ok(locks)
    }

    /// The record currently stored for `key`, if any.
    pub fn remote_lock(&self, key: &str) -> Result<Option<RemoteLock>> {
        let field = self.shared.strategy.address_for(key);
        let Some(bytes) = self.shared.store.get(&self.shared.registry_key, &field)? else {
            return Ok(None);
        };
        Ok(LockRecord::decode(&bytes)?.map(|record| RemoteLock {
            registry_key: self.shared.registry_key.clone(),
            record,
        }))
    }
}

impl LockRegistry for KeyedStoreLockRegistry {
    type Lock = KeyedStoreLock;

    /// Returns the handle this thread already tracks for `key`, unless that
    /// handle is held but its record has vanished or changed in the store.
    fn obtain(&self, key: &str) -> Arc<KeyedStoreLock> {
        let me = thread::current().id();
        let existing = self.shared.tracked().find(me, key);
        if let Some(handle) = existing {
            if handle.is_fresh() {
                return handle;
            }
            warn!(
                "Discarding stale handle for lock '{key}'; its record is no longer in the store"
            );
            let discarded = self.shared.tracked().forget(me, &handle);
            drop(discarded);
        }

        let handle = KeyedStoreLock::new(key, Arc::clone(&self.shared));
        self.shared.tracked().remember(me, &handle);
        handle
    }
}

impl Drop for KeyedStoreLockRegistry {
    fn drop(&mut self) {
        let held = std::mem::take(&mut self.shared.tracked().held);
        if !held.is_empty() {
            debug!(
                "Registry '{}' dropped with locks still held",
                self.shared.registry_key
            );
        }
        drop(held);
    }
}

#[derive(Debug, Default)]
struct Slot {
    reentrancy: Reentrancy,
    written: Option<Vec<u8>>,
}

/// Reentrant handle over one field of the registry hash.
///
/// While held, the registry keeps the handle alive for its owner thread, so a
/// handle obtained again by key can still be unlocked after the caller dropped
/// the one it locked with.
pub struct KeyedStoreLock {
    key: String,
    field: String,
    local: Arc<LocalLock>,
    shared: Arc<Shared>,
    slot: Mutex<Slot>,
    this: Weak<KeyedStoreLock>,
}

impl KeyedStoreLock {
    fn new(key: &str, shared: Arc<Shared>) -> Arc<Self> {
        Arc::new_cyclic(|this| Self {
            key: key.to_string(),
            field: shared.strategy.address_for(key),
            local: shared.local.obtain(key),
            shared,
            slot: Mutex::new(Slot::default()),
            this: this.clone(),
        })
    }

    fn slot(&self) -> MutexGuard<'_, Slot> {
        self.slot
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Hash field holding this lock's record.
    pub fn field(&self) -> &str {
        &self.field
    }

    /// `false` when the handle is held but the store no longer holds its record.
    fn is_fresh(&self) -> bool {
        let Some(written) = self.slot().written.clone() else {
            return true;
        };
        match self.shared.store.get(&self.shared.registry_key, &self.field) {
            Ok(current) => current.as_deref() == Some(written.as_slice()),
            Err(err) => {
                warn!("Could not verify lock '{}' against the store: {err}", self.key);
                true
            }
        }
    }

    fn claim_remote(&self, written: &mut Option<Vec<u8>>) -> Result<bool> {
        let record = LockRecord::new(
            self.shared.host.clone(),
            self.key.clone(),
            truncate_identity(&current_thread_name()),
            Utc::now(),
        );
        let bytes = record.encode()?;
        let claimed =
            self.shared
                .store
                .put_if_absent(&self.shared.registry_key, &self.field, &bytes)?;
        if claimed {
            *written = Some(bytes);
        }
        Ok(claimed)
    }

    /// Takes the local lock with `local`, then polls the store within `timeout`.
    fn acquire<F>(
        &self,
        timeout: LockTimeoutValue,
        mode: AcquireMode,
        cancellation: CancellationToken,
        retry_store_errors: bool,
        local: F,
    ) -> Result<bool>
    where
        F: FnOnce(&LocalLock) -> Result<bool>,
    {
        let me = thread::current().id();
        if self.slot().reentrancy.try_reenter(me) {
            return Ok(true);
        }

        let request = LockAcquisitionRequest::new(&self.key, timeout)
            .with_mode(mode)
            .with_cancellation(cancellation)
            .with_backoff(PollingBackoff::fixed(self.shared.poll_interval))
            .with_observer(Some(self.shared.observer.as_ref()));

        if !local(&self.local)? {
            return Ok(false);
        }

        let mut written = None;
        let outcome = request.run(|| match self.claim_remote(&mut written) {
            Err(LockyardError::Store(details)) if retry_store_errors => {
                warn!("Store unavailable while acquiring '{}': {details}", self.key);
                Ok(false)
            }
            other => other,
        });

        match (outcome, written) {
            (Ok(true), Some(bytes)) => {
                let mut slot = self.slot();
                slot.reentrancy.claim(me, current_thread_name());
                slot.written = Some(bytes);
                drop(slot);
                if let Some(this) = self.this.upgrade() {
                    self.shared.tracked().hold(me, this);
                }
                debug!("Acquired lock '{}' in '{}'", self.key, self.shared.registry_key);
                Ok(true)
            }
            (outcome, _) => {
                if let Err(err) = self.local.unlock() {
                    warn!("Failed to release local lock for '{}': {err}", self.key);
                }
                outcome.map(|_| false)
            }
        }
    }

    /// Removes the store record if it is still the one this handle wrote.
    fn release_remote(&self, written: Option<Vec<u8>>) -> Result<()> {
        let registry_key = &self.shared.registry_key;
        let current = self.shared.store.get(registry_key, &self.field)?;
        if current.is_some() && current == written {
            self.shared.store.remove(registry_key, &self.field)?;
            debug!("Released lock '{}' in '{registry_key}'", self.key);
            return Ok(());
        }

        let in_store = match current.as_deref().map(LockRecord::decode) {
            None => "none".to_string(),
            Some(Ok(Some(record))) => record.to_string(),
            Some(Ok(None)) => "empty".to_string(),
            Some(Err(err)) => format!("unreadable ({err})"),
        };
        Err(LockyardError::StaleLock {
            key: self.key.clone(),
            details: format!(
                "the integrity of data protected by this lock may have been compromised; \
                 lock in store: {in_store}"
            ),
        })
    }
}

impl DistributedLock for KeyedStoreLock {
    fn key(&self) -> &str {
        &self.key
    }

    fn lock(&self) -> Result<()> {
        self.acquire(
            LockTimeoutValue::Infinite,
            AcquireMode::Blocking,
            CancellationToken::new(),
            true,
            |local| local.lock().map(|_| true),
        )
        .map(|_| ())
    }

    fn lock_interruptibly(&self, cancellation: &CancellationToken) -> Result<()> {
        self.acquire(
            LockTimeoutValue::Infinite,
            AcquireMode::Blocking,
            cancellation.clone(),
            false,
            |local| local.lock_interruptibly(cancellation).map(|_| true),
        )
        .map(|_| ())
    }

    fn try_lock(&self) -> Result<bool> {
        self.acquire(
            LockTimeoutValue::from_secs(0),
            AcquireMode::NonBlocking,
            CancellationToken::new(),
            false,
            |local| local.try_lock(),
        )
    }

    fn try_lock_for(&self, timeout: Duration) -> Result<bool> {
        self.acquire(
            timeout.into(),
            AcquireMode::Blocking,
            CancellationToken::new(),
            false,
            |local| local.try_lock_for(timeout),
        )
    }

    fn unlock(&self) -> Result<()> {
        let me = thread::current().id();
        let written = {
            let mut slot = self.slot();
            match slot.reentrancy.release(&self.key, me)? {
                Release::Retained { .. } => return Ok(()),
                Release::Released => slot.written.take(),
            }
        };

        let outcome = self.release_remote(written);
        if let Err(err) = self.local.unlock() {
            warn!("Failed to release local lock for '{}': {err}", self.key);
        }
        let untracked = self.shared.tracked().release(me, self);
        drop(untracked);
        outcome
    }

    fn state(&self) -> LockState {
        self.slot().reentrancy.state()
    }
}

impl Drop for KeyedStoreLock {
    fn drop(&mut self) {
        let slot = std::mem::take(&mut *self.slot());
        let Some(owner) = slot.reentrancy.owner() else {
            return;
        };

        warn!("Lock '{}' dropped while held; releasing it", self.key);
        if let Err(err) = self.release_remote(slot.written) {
            warn!("Failed to release lock '{}' on drop: {err}", self.key);
        }
        // One hold per remote claim; the owner may hold the stripe for other keys too.
        if let Err(err) = self.local.release_for(owner) {
            warn!("Failed to release local lock for '{}': {err}", self.key);
        }
    }
}
