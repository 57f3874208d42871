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
use log::info;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use uuid::Uuid;

/// A participant in leader election for one role.
pub trait Candidate: Send + Sync {
    /// Role name; also the lock key contended for.
    fn role(&self) -> &str;

    fn id(&self) -> &str;

    /// Called on the election thread right after the lock was acquired.
    /// An error gives leadership up again.
    fn on_granted(&self, context: &LeaderContext) -> Result<()>;

    fn on_revoked(&self, context: &LeaderContext);
}

/// Receives leadership transitions in addition to the candidate.
pub trait LeaderEventListener: Send + Sync {
    fn on_granted(&self, _role: &str, _candidate_id: &str) {}

    fn on_revoked(&self, _role: &str, _candidate_id: &str) {}
}

/// Candidate that only logs its transitions.
#[derive(Debug, Clone)]
pub struct DefaultCandidate {
    id: String,
    role: String,
}

impl DefaultCandidate {
    pub fn new(id: impl Into<String>, role: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            role: role.into(),
        }
    }

    /// Candidate with a random id.
    pub fn for_role(role: impl Into<String>) -> Self {
        Self::new(Uuid::new_v4().to_string(), role)
    }
}

impl Candidate for DefaultCandidate {
    fn role(&self) -> &str {
        &self.role
    }

    fn id(&self) -> &str {
        &self.id
    }

    fn on_granted(&self, _context: &LeaderContext) -> Result<()> {
        info!("{} is now leader for role '{}'", self.id, self.role);
        Ok(())
    }

    fn on_revoked(&self, _context: &LeaderContext) {
        info!("{} is no longer leader for role '{}'", self.id, self.role);
    }
}

/// Leadership view handed to candidates; cheap to clone.
#[derive(Debug, Clone)]
pub struct LeaderContext {
    role: Arc<str>,
    leader: Arc<AtomicBool>,
    yield_requested: Arc<AtomicBool>,
}

impl LeaderContext {
    pub(crate) fn new(role: &str) -> Self {
        Self {
            role: Arc::from(role),
            leader: Arc::new(AtomicBool::new(false)),
            yield_requested: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn role(&self) -> &str {
        &self.role
    }

    pub fn is_leader(&self) -> bool {
        self.leader.load(Ordering::Acquire)
    }

    /// Asks the election thread to give up leadership. Ignored when not leader.
    pub fn yield_leadership(&self) {
        if self.is_leader() {
            self.yield_requested.store(true, Ordering::Release);
        }
    }

    pub(crate) fn set_leader(&self, leader: bool) {
        self.leader.store(leader, Ordering::Release);
    }

    pub(crate) fn take_yield_request(&self) -> bool {
        self.yield_requested.swap(false, Ordering::AcqRel)
    }
}
