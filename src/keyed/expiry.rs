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

//! Operator sweep that force-removes lock records past their expiry.
//!
//! Removing a record whose owner is still working breaks mutual exclusion,
//! so this only runs on explicit request.

use super::KeyedStore;
use super::serializer::LockRecord;
use crate::error::Result;
use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use std::time::{Duration, Instant};

/// Summary of an expiry sweep.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct LockExpiryReport {
    /// Keys whose records were removed.
    pub expired: Vec<String>,
    pub removed_staging: usize,
    pub errors: usize,
    pub duration: Duration,
}

impl LockExpiryReport {
    pub fn removed_locks(&self) -> usize {
        self.expired.len()
    }
}

pub(crate) fn sweep(
    store: &dyn KeyedStore,
    hash: &str,
    older_than: Duration,
    now: DateTime<Utc>,
) -> Result<LockExpiryReport> {
    let start = Instant::now();
    let mut report = LockExpiryReport::default();
    let cutoff = chrono::Duration::from_std(older_than)
        .ok()
        .and_then(|age| now.checked_sub_signed(age));

    for (field, bytes) in store.entries(hash)? {
        let record = match LockRecord::decode(&bytes) {
            Ok(Some(record)) => record,
            Ok(None) => continue,
            Err(err) => {
                warn!("Skipping unreadable lock record '{field}' in '{hash}': {err}");
                report.errors += 1;
                continue;
            }
        };

        let expired = cutoff.is_some_and(|cutoff| record.locked_at < cutoff);
        if !expired {
            continue;
        }

        match store.remove(hash, &field) {
            Ok(true) => {
                debug!("Expired {record}");
                report.expired.push(record.key);
            }
            Ok(false) => {}
            Err(err) => {
                warn!("Failed to expire lock '{}': {err}", record.key);
                report.errors += 1;
            }
        }
    }

    match store.sweep_artifacts(hash, older_than) {
        Ok(removed) => report.removed_staging = removed,
        Err(err) => {
            warn!("Failed to sweep store artifacts for '{hash}': {err}");
            report.errors += 1;
        }
    }

    report.duration = start.elapsed();
    info!(
        "Lock expiry removed {} lock(s) and {} staging file(s) in {:.3}s (errors: {})",
        report.removed_locks(),
        report.removed_staging,
        report.duration.as_secs_f64(),
        report.errors
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::LockyardError;
    use crate::keyed::{MemoryKeyedStore, MockKeyedStore};

    fn record_bytes(key: &str, locked_at: DateTime<Utc>) -> Vec<u8> {
        LockRecord::new("host", key, "main", locked_at)
            .encode()
            .unwrap()
    }

    #[test]
    fn removes_only_records_older_than_cutoff() {
        let now = Utc::now();
        let store = MemoryKeyedStore::new();
        store.put("reg", "old", &record_bytes("old", now - chrono::Duration::seconds(120)));
        store.put("reg", "new", &record_bytes("new", now - chrono::Duration::seconds(5)));

        let report = sweep(&store, "reg", Duration::from_secs(60), now).unwrap();
        assert_eq!(report.expired, vec!["old".to_string()]);
        assert_eq!(report.errors, 0);
        assert!(store.get("reg", "old").unwrap().is_none());
        assert!(store.get("reg", "new").unwrap().is_some());
    }

    #[test]
    fn corrupt_records_are_counted_not_removed() {
        let store = MemoryKeyedStore::new();
        store.put("reg", "junk", &[3, b'a']);

        let report = sweep(&store, "reg", Duration::ZERO, Utc::now()).unwrap();
        assert_eq!(report.errors, 1);
        assert!(report.expired.is_empty());
        assert!(store.get("reg", "junk").unwrap().is_some());
    }

    #[test]
    fn remove_failures_are_counted() {
        let old = record_bytes("stuck", Utc::now() - chrono::Duration::seconds(600));
        let mut store = MockKeyedStore::new();
        store
            .expect_entries()
            .times(1)
            .returning(move |_| Ok(vec![("stuck".to_string(), old.clone())]));
        store
            .expect_remove()
            .returning(|_, _| Err(LockyardError::Store("read-only".to_string())));
        store.expect_sweep_artifacts().returning(|_, _| Ok(2));

        let report = sweep(&store, "reg", Duration::from_secs(60), Utc::now()).unwrap();
        assert_eq!(report.errors, 1);
        assert_eq!(report.removed_staging, 2);
        assert_eq!(report.removed_locks(), 0);
    }

    #[test]
    fn listing_failure_aborts_sweep() {
        let mut store = MockKeyedStore::new();
        store
            .expect_entries()
            .returning(|_| Err(LockyardError::Store("unreachable".to_string())));

        assert!(sweep(&store, "reg", Duration::from_secs(60), Utc::now()).is_err());
    }
}
