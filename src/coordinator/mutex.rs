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
use crate::error::{LockyardError, Result};
use crate::locking::cancellation::{CANCELLATION_CHECK_INTERVAL, CancellationToken};
use log::{trace, warn};
use std::sync::Arc;
use std::time::{Duration, Instant};

const LOCK_NAME: &str = "lock-";

/// Non-reentrant mutex over the sequential-ephemeral-node protocol.
///
/// Each contender creates `<path>/lock-<seq>`. The lowest live sequence owns
/// the lock; every other contender waits for the deletion of the node just
/// below its own, so waiters are woken one at a time in creation order.
pub struct InterProcessMutex {
    coordinator: Arc<dyn Coordinator>,
    path: String,
    lease_data: Vec<u8>,
}

impl InterProcessMutex {
    pub fn new(
        coordinator: Arc<dyn Coordinator>,
        path: impl Into<String>,
        lease_data: Vec<u8>,
    ) -> Self {
        Self {
            coordinator,
            path: path.into(),
            lease_data,
        }
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// Returns the lease node path once acquired, or `None` when `timeout` elapsed.
    ///
    /// A `None` timeout waits indefinitely. On timeout or error the
    /// contender's own node is removed before returning.
    pub fn acquire(&self, timeout: Option<Duration>) -> Result<Option<String>> {
        let deadline = timeout.and_then(|timeout| Instant::now().checked_add(timeout));
        self.acquire_until(deadline, None)
    }

    /// Waits without a deadline until acquired, or returns `None` once
    /// `cancellation` fires. The contender's node is removed on cancellation.
    pub fn acquire_interruptibly(
        &self,
        cancellation: &CancellationToken,
    ) -> Result<Option<String>> {
        self.acquire_until(None, Some(cancellation))
    }

    fn acquire_until(
        &self,
        deadline: Option<Instant>,
        cancellation: Option<&CancellationToken>,
    ) -> Result<Option<String>> {
        let prefix = format!("{}/{LOCK_NAME}", self.path);
        let lease = self
            .coordinator
            .create_sequential_ephemeral(&prefix, &self.lease_data)?;
        trace!("Created lock node {lease}");

        match self.wait_for_turn(&lease, deadline, cancellation) {
            Ok(true) => Ok(Some(lease)),
            Ok(false) => {
                self.abandon(&lease);
                Ok(None)
            }
            Err(err) => {
                self.abandon(&lease);
                Err(err)
            }
        }
    }

    /// Gives up a lease returned by [`acquire`](Self::acquire).
    pub fn release(&self, lease: &str) -> Result<()> {
        self.coordinator.delete(lease)
    }

    fn wait_for_turn(
        &self,
        lease: &str,
        deadline: Option<Instant>,
        cancellation: Option<&CancellationToken>,
    ) -> Result<bool> {
        let own_name = lease.rsplit('/').next().unwrap_or(lease);
        loop {
            let mut contenders: Vec<String> = self
                .coordinator
                .children(&self.path)?
                .into_iter()
                .filter(|name| name.starts_with(LOCK_NAME))
                .collect();
            contenders.sort_by_key(|name| sequence_of(name));

            let position = contenders
                .iter()
                .position(|name| name == own_name)
                .ok_or_else(|| {
                    LockyardError::Coordination(format!(
                        "lock node {lease} disappeared while waiting"
                    ))
                })?;
            if position == 0 {
                return Ok(true);
            }

            if cancellation.is_some_and(CancellationToken::is_cancelled) {
                return Ok(false);
            }
            let mut remaining = match deadline {
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return Ok(false);
                    }
                    Some(deadline - now)
                }
                None => None,
            };
            if cancellation.is_some() {
                remaining = Some(
                    remaining.map_or(CANCELLATION_CHECK_INTERVAL, |remaining| {
                        remaining.min(CANCELLATION_CHECK_INTERVAL)
                    }),
                );
            }

            let predecessor = format!("{}/{}", self.path, contenders[position - 1]);
            trace!("Waiting for {predecessor} to be released");
            self.coordinator.wait_for_deletion(&predecessor, remaining)?;
        }
    }

    fn abandon(&self, lease: &str) {
        if let Err(err) = self.coordinator.delete(lease) {
            warn!("Failed to remove abandoned lock node {lease}: {err}");
        }
    }
}

fn sequence_of(name: &str) -> u64 {
    name.strip_prefix(LOCK_NAME)
        .and_then(|suffix| suffix.parse().ok())
        .unwrap_or(u64::MAX)
}
