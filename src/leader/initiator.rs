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

use super::candidate::{Candidate, LeaderContext, LeaderEventListener};
use crate::config::LeaderConfig;
use crate::error::Result;
use crate::locking::cancellation::CancellationToken;
use crate::locking::lock::DistributedLock;
use crate::locking::registry::LockRegistry;
use log::{debug, info, warn};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::Duration;

struct Running {
    stop: CancellationToken,
    handle: JoinHandle<()>,
}

/// Runs a background thread that keeps trying to take the role's lock and
/// notifies the candidate when leadership is granted or revoked.
pub struct LockRegistryLeaderInitiator<R: LockRegistry + 'static> {
    registry: Arc<R>,
    candidate: Arc<dyn Candidate>,
    listener: Option<Arc<dyn LeaderEventListener>>,
    heartbeat: Duration,
    busy_wait: Duration,
    context: LeaderContext,
    running: Mutex<Option<Running>>,
}

impl<R: LockRegistry + 'static> LockRegistryLeaderInitiator<R> {
    pub fn new(registry: Arc<R>, candidate: Arc<dyn Candidate>, config: &LeaderConfig) -> Self {
        let context = LeaderContext::new(candidate.role());
        Self {
            registry,
            candidate,
            listener: None,
            heartbeat: config.heartbeat(),
            busy_wait: config.busy_wait(),
            context,
            running: Mutex::new(None),
        }
    }

    pub fn with_listener(mut self, listener: Arc<dyn LeaderEventListener>) -> Self {
        self.listener = Some(listener);
        self
    }

    pub fn context(&self) -> LeaderContext {
        self.context.clone()
    }

    pub fn is_leader(&self) -> bool {
        self.context.is_leader()
    }

    fn running(&self) -> MutexGuard<'_, Option<Running>> {
        self.running
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn is_running(&self) -> bool {
        self.running().is_some()
    }

    /// Starts the election thread. Calling it while running does nothing.
    pub fn start(&self) -> Result<()> {
        let mut running = self.running();
        if running.is_some() {
            return Ok(());
        }

        let stop = CancellationToken::new();
        let election = Election {
            lock: self.registry.obtain(self.candidate.role()),
            candidate: Arc::clone(&self.candidate),
            listener: self.listener.clone(),
            context: self.context.clone(),
            heartbeat: self.heartbeat,
            busy_wait: self.busy_wait,
            stop: stop.clone(),
        };
        let handle = thread::Builder::new()
            .name(format!("lockyard-leader-{}", self.candidate.role()))
            .spawn(move || election.run())?;

        debug!(
            "Started leader election for role '{}' as {}",
            self.candidate.role(),
            self.candidate.id()
        );
        *running = Some(Running { stop, handle });
        Ok(())
    }

    /// Stops the election thread, revoking and releasing leadership if held.
    pub fn stop(&self) {
        let Some(running) = self.running().take() else {
            return;
        };
        running.stop.cancel();
        if running.handle.join().is_err() {
            warn!(
                "Leader election thread for role '{}' panicked",
                self.candidate.role()
            );
        }
    }
}

impl<R: LockRegistry + 'static> Drop for LockRegistryLeaderInitiator<R> {
    fn drop(&mut self) {
        self.stop();
    }
}

struct Election<L: DistributedLock> {
    lock: Arc<L>,
    candidate: Arc<dyn Candidate>,
    listener: Option<Arc<dyn LeaderEventListener>>,
    context: LeaderContext,
    heartbeat: Duration,
    busy_wait: Duration,
    stop: CancellationToken,
}

impl<L: DistributedLock> Election<L> {
    fn run(self) {
        while !self.stop.is_cancelled() {
            if self.context.take_yield_request() && self.context.is_leader() {
                info!("Yielding leadership for role '{}'", self.context.role());
                self.give_up();
                self.stop.sleep(self.heartbeat);
                continue;
            }

            match self.lock.try_lock_for(self.heartbeat) {
                Ok(true) if self.context.is_leader() => {
                    // Re-acquisition was reentrant; drop the extra hold.
                    if let Err(err) = self.lock.unlock() {
                        warn!("Failed to release reentrant hold on '{}': {err}", self.lock.key());
                        self.give_up();
                    }
                    self.stop.sleep(self.heartbeat);
                }
                Ok(true) => self.grant(),
                Ok(false) => {
                    if self.context.is_leader() {
                        warn!("Lost the lock for role '{}'", self.context.role());
                        self.revoke();
                    }
                    self.stop.sleep(self.busy_wait);
                }
                Err(err) => {
                    warn!(
                        "Leader election for role '{}' failed: {err}",
                        self.context.role()
                    );
                    if self.context.is_leader() {
                        self.give_up();
                    }
                    self.stop.sleep(self.busy_wait);
                }
            }
        }

        if self.context.is_leader() {
            self.give_up();
        }
    }

    fn grant(&self) {
        self.context.set_leader(true);
        if let Some(listener) = &self.listener {
            listener.on_granted(self.context.role(), self.candidate.id());
        }
        if let Err(err) = self.candidate.on_granted(&self.context) {
            warn!(
                "Candidate {} rejected leadership for role '{}': {err}",
                self.candidate.id(),
                self.context.role()
            );
            self.give_up();
        }
    }

    fn revoke(&self) {
        self.context.set_leader(false);
        self.candidate.on_revoked(&self.context);
        if let Some(listener) = &self.listener {
            listener.on_revoked(self.context.role(), self.candidate.id());
        }
    }

    /// Revokes leadership and releases every hold on the role lock.
    fn give_up(&self) {
        self.revoke();
        while self.lock.state().is_held_by_current_thread() {
            if let Err(err) = self.lock.unlock() {
                warn!("Failed to release leadership lock '{}': {err}", self.lock.key());
                break;
            }
        }
    }
}
