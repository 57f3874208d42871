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

//! The lock handle contract shared by every backend.
//!
//! A handle is reentrant per owning thread: the owner may acquire it again
//! without touching the remote store and must release it as many times as it
//! acquired it. Only the final release gives up the remote claim.

use crate::error::{LockyardError, Result};
use crate::locking::cancellation::CancellationToken;
use std::thread::{self, ThreadId};
use std::time::{Duration, SystemTime};

/// Wait/notify conditions are not supported by any handle, so this type has no values.
#[derive(Debug)]
pub enum Condition {}

/// Observable state of a handle within this process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockState {
    Unlocked,
    Locked { owner: ThreadId, holds: usize },
}

impl LockState {
    pub fn is_locked(&self) -> bool {
        matches!(self, LockState::Locked { .. })
    }

    pub fn holds(&self) -> usize {
        match self {
            LockState::Unlocked => 0,
            LockState::Locked { holds, .. } => *holds,
        }
    }

    pub fn is_held_by_current_thread(&self) -> bool {
        matches!(self, LockState::Locked { owner, .. } if *owner == thread::current().id())
    }
}

/// A named, reentrant mutual-exclusion handle.
pub trait DistributedLock: Send + Sync {
    /// The logical key this handle was obtained for.
    fn key(&self) -> &str;

    /// Blocks until the lock is acquired. Transient backend failures are retried.
    fn lock(&self) -> Result<()>;

    /// Blocks until the lock is acquired or `cancellation` fires.
    fn lock_interruptibly(&self, cancellation: &CancellationToken) -> Result<()>;

    /// Attempts to acquire the lock without waiting for another holder.
    fn try_lock(&self) -> Result<bool>;

    /// Attempts to acquire the lock, waiting at most `timeout`.
    fn try_lock_for(&self, timeout: Duration) -> Result<bool>;

    /// Releases one hold. Fails when the calling thread does not own the lock.
    fn unlock(&self) -> Result<()>;

    fn state(&self) -> LockState;

    fn new_condition(&self) -> Result<Condition> {
        Err(LockyardError::Unsupported(
            "Conditions are not supported".to_string(),
        ))
    }
}

/// Outcome of releasing one hold.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Release {
    /// The owner still holds the lock this many times.
    Retained { remaining: usize },
    /// That was the last hold; the remote claim must be given up.
    Released,
}

/// Owner thread and hold count of a handle.
///
/// Invariant: `owner.is_some()` if and only if `holds >= 1`.
#[derive(Debug, Clone, Default)]
pub struct Reentrancy {
    owner: Option<ThreadId>,
    owner_name: Option<String>,
    holds: usize,
    acquired_at: Option<SystemTime>,
}

impl Reentrancy {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> LockState {
        match self.owner {
            Some(owner) => LockState::Locked {
                owner,
                holds: self.holds,
            },
            None => LockState::Unlocked,
        }
    }

    pub fn owner(&self) -> Option<ThreadId> {
        self.owner
    }

    pub fn owner_name(&self) -> Option<&str> {
        self.owner_name.as_deref()
    }

    pub fn holds(&self) -> usize {
        self.holds
    }

    pub fn acquired_at(&self) -> Option<SystemTime> {
        self.acquired_at
    }

    pub fn is_held(&self) -> bool {
        self.owner.is_some()
    }

    pub fn is_held_by(&self, thread: ThreadId) -> bool {
        self.owner == Some(thread)
    }

    /// Adds a hold when `thread` already owns the handle.
    pub fn try_reenter(&mut self, thread: ThreadId) -> bool {
        if self.is_held_by(thread) {
            self.holds += 1;
            true
        } else {
            false
        }
    }

    /// Records the first hold after the backend granted the claim.
    pub fn claim(&mut self, thread: ThreadId, thread_name: String) {
        debug_assert!(self.owner.is_none(), "claim on a handle that is still owned");
        self.owner = Some(thread);
        self.owner_name = Some(thread_name);
        self.holds = 1;
        self.acquired_at = Some(SystemTime::now());
    }

    /// Drops one hold of `thread`, clearing ownership on the last one.
    pub fn release(&mut self, key: &str, thread: ThreadId) -> Result<Release> {
        match self.owner {
            None => Err(LockyardError::OwnershipViolation {
                key: key.to_string(),
                details: "lock is not locked".to_string(),
            }),
            Some(owner) if owner != thread => Err(LockyardError::OwnershipViolation {
                key: key.to_string(),
                details: format!(
                    "lock is owned by thread '{}'",
                    self.owner_name.as_deref().unwrap_or("unknown")
                ),
            }),
            Some(_) if self.holds > 1 => {
                self.holds -= 1;
                Ok(Release::Retained {
                    remaining: self.holds,
                })
            }
            Some(_) => {
                self.clear();
                Ok(Release::Released)
            }
        }
    }

    /// Forgets ownership regardless of the hold count.
    pub fn clear(&mut self) {
        self.owner = None;
        self.owner_name = None;
        self.holds = 0;
        self.acquired_at = None;
    }
}
