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

use lockyard::config::KeyedStoreConfig;
use lockyard::error::LockyardError;
use lockyard::keyed::{FileKeyedStore, KeyedStore, KeyedStoreLockRegistry};
use lockyard::locking::{CancellationToken, DistributedLock, LockRegistry};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tempfile::TempDir;

fn config(host: &str) -> KeyedStoreConfig {
    KeyedStoreConfig {
        registry_key: "jobs".to_string(),
        poll_interval_ms: 10,
        host: Some(host.to_string()),
        ..KeyedStoreConfig::default()
    }
}

type Registry = Arc<KeyedStoreLockRegistry>;

/// Two registries over one directory stand in for two processes.
fn two_processes(dir: &TempDir) -> (Registry, Registry) {
    let store: Arc<dyn KeyedStore> = Arc::new(FileKeyedStore::new(dir.path()));
    (
        Arc::new(KeyedStoreLockRegistry::new(Arc::clone(&store), &config("node-a"))),
        Arc::new(KeyedStoreLockRegistry::new(store, &config("node-b"))),
    )
}

#[test]
fn lock_is_exclusive_across_registries() {
    let dir = TempDir::new().unwrap();
    let (node_a, node_b) = two_processes(&dir);

    let held = node_a.obtain("nightly");
    assert!(held.try_lock().unwrap());

    let contender = node_b.obtain("nightly");
    assert!(!contender.try_lock().unwrap());
    assert!(!contender.try_lock_for(Duration::from_millis(50)).unwrap());

    let holder = node_b.remote_lock("nightly").unwrap().unwrap();
    assert_eq!(holder.record.host, "node-a");

    let waiter = {
        let node_b = Arc::clone(&node_b);
        thread::spawn(move || {
            let lock = node_b.obtain("nightly");
            let acquired = lock.try_lock_for(Duration::from_secs(5)).unwrap();
            let host = node_b.remote_lock("nightly").unwrap().map(|lock| lock.record.host);
            if acquired {
                lock.unlock().unwrap();
            }
            (acquired, host)
        })
    };

    thread::sleep(Duration::from_millis(50));
    held.unlock().unwrap();

    let (acquired, host) = waiter.join().unwrap();
    assert!(acquired);
    assert_eq!(host.as_deref(), Some("node-b"));
    assert!(node_a.list_locks().unwrap().is_empty());
}

#[test]
fn expired_lock_is_reported_stale_on_unlock() {
    let dir = TempDir::new().unwrap();
    let (node_a, node_b) = two_processes(&dir);

    let lock = node_a.obtain("invoice-17");
    lock.lock().unwrap();
    thread::sleep(Duration::from_millis(5));

    let report = node_b
        .expire_locks_older_than(Duration::from_millis(1))
        .unwrap();
    assert_eq!(report.expired, vec!["invoice-17".to_string()]);

    let taken = node_b.obtain("invoice-17");
    assert!(taken.try_lock().unwrap());

    match lock.unlock() {
        Err(LockyardError::StaleLock { key, details }) => {
            assert_eq!(key, "invoice-17");
            assert!(details.contains("host=node-b"));
        }
        other => panic!("Expected stale lock error, got {other:?}"),
    }
    assert!(!lock.state().is_locked());

    let remaining = node_a.list_locks().unwrap();
    assert_eq!(remaining.len(), 1);
    assert_eq!(remaining[0].record.host, "node-b");
    assert!(remaining[0].to_string().starts_with("Lock [key=jobs:invoice-17, lockedAt="));
    taken.unlock().unwrap();
}

#[test]
fn obtain_replaces_handle_whose_record_vanished() {
    let dir = TempDir::new().unwrap();
    let (node_a, node_b) = two_processes(&dir);

    let first = node_a.obtain("sync");
    assert!(Arc::ptr_eq(&first, &node_a.obtain("sync")));
    assert!(first.try_lock().unwrap());
    assert!(Arc::ptr_eq(&first, &node_a.obtain("sync")));

    thread::sleep(Duration::from_millis(5));
    node_b.expire_locks_older_than(Duration::ZERO).unwrap();

    let second = node_a.obtain("sync");
    assert!(!Arc::ptr_eq(&first, &second));
    assert!(!second.state().is_locked());
    assert!(first.unlock().is_err());
}

#[test]
fn interruptible_wait_stops_on_cancellation() {
    let dir = TempDir::new().unwrap();
    let (node_a, node_b) = two_processes(&dir);

    let held = node_a.obtain("export");
    assert!(held.try_lock().unwrap());

    let cancellation = CancellationToken::new();
    let waiter = {
        let node_b = Arc::clone(&node_b);
        let cancellation = cancellation.clone();
        thread::spawn(move || node_b.obtain("export").lock_interruptibly(&cancellation))
    };

    thread::sleep(Duration::from_millis(50));
    cancellation.cancel();
    let err = waiter.join().unwrap().unwrap_err();
    assert!(matches!(err, LockyardError::Interrupted { ref key, .. } if key == "export"));
    held.unlock().unwrap();
}

#[test]
fn lock_taken_through_temporary_handle_stays_held() {
    let dir = TempDir::new().unwrap();
    let (node_a, node_b) = two_processes(&dir);

    node_a.obtain("report").lock().unwrap();
    assert!(!node_b.obtain("report").try_lock().unwrap());
    assert_eq!(node_b.list_locks().unwrap().len(), 1);

    node_a.obtain("report").unlock().unwrap();
    assert!(node_b.obtain("report").try_lock().unwrap());
    node_b.obtain("report").unlock().unwrap();
}

#[test]
fn long_keys_lock_on_file_store() {
    let dir = TempDir::new().unwrap();
    let (node_a, node_b) = two_processes(&dir);
    let key = "k".repeat(255);

    let lock = node_a.obtain(&key);
    lock.lock().unwrap();
    assert!(!node_b.obtain(&key).try_lock().unwrap());

    let listed = node_b.list_locks().unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].record.key, key);

    lock.unlock().unwrap();
    assert!(node_b.list_locks().unwrap().is_empty());
}
