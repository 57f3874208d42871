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

//! In-process coordination service.
//!
//! A [`MemoryEnsemble`] is the shared service; every [`MemoryCoordinator`]
//! is one client session on it. Closing a session drops its ephemeral nodes,
//! which is how a crashed process looks to the other participants. The
//! ensemble can also be made unavailable to reproduce an outage: calls then
//! block for the session timeout and fail with a connectivity error.

use super::Coordinator;
use crate::error::{LockyardError, Result};
use log::debug;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::time::{Duration, Instant};
use uuid::Uuid;

pub const DEFAULT_SESSION_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone)]
struct Node {
    data: Vec<u8>,
    ephemeral_owner: Option<Uuid>,
}

#[derive(Debug)]
struct EnsembleState {
    nodes: BTreeMap<String, Node>,
    sequences: HashMap<String, u64>,
    available: bool,
}

#[derive(Debug)]
struct EnsembleInner {
    state: Mutex<EnsembleState>,
    changed: Condvar,
}

impl EnsembleInner {
    fn guard(&self) -> MutexGuard<'_, EnsembleState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Shared in-memory coordination service.
#[derive(Debug, Clone)]
pub struct MemoryEnsemble {
    inner: Arc<EnsembleInner>,
}

impl MemoryEnsemble {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(EnsembleInner {
                state: Mutex::new(EnsembleState {
                    nodes: BTreeMap::new(),
                    sequences: HashMap::new(),
                    available: true,
                }),
                changed: Condvar::new(),
            }),
        }
    }

    /// Opens a session with the default session timeout.
    pub fn connect(&self) -> MemoryCoordinator {
        self.connect_with_timeout(DEFAULT_SESSION_TIMEOUT)
    }

    pub fn connect_with_timeout(&self, session_timeout: Duration) -> MemoryCoordinator {
        let session = Uuid::new_v4();
        debug!("Opened coordination session {session}");
        MemoryCoordinator {
            inner: Arc::clone(&self.inner),
            session,
            session_timeout,
            closed: AtomicBool::new(false),
        }
    }

    /// Simulates the service going down (`false`) or coming back (`true`).
    pub fn set_available(&self, available: bool) {
        self.inner.guard().available = available;
        self.inner.changed.notify_all();
    }

    pub fn is_available(&self) -> bool {
        self.inner.guard().available
    }

    /// Number of nodes currently stored, including persistent parents.
    pub fn node_count(&self) -> usize {
        self.inner.guard().nodes.len()
    }

    /// Payload stored at `path`, bypassing availability checks.
    pub fn node_data(&self, path: &str) -> Option<Vec<u8>> {
        self.inner.guard().nodes.get(path).map(|node| node.data.clone())
    }

    /// Sorted child names of `path`, bypassing availability checks.
    pub fn list_children(&self, path: &str) -> Vec<String> {
        let mut names = child_names(&self.inner.guard(), path);
        names.sort();
        names
    }
}

impl Default for MemoryEnsemble {
    fn default() -> Self {
        Self::new()
    }
}

/// One client session on a [`MemoryEnsemble`].
#[derive(Debug)]
pub struct MemoryCoordinator {
    inner: Arc<EnsembleInner>,
    session: Uuid,
    session_timeout: Duration,
    closed: AtomicBool,
}

impl MemoryCoordinator {
    pub fn session_id(&self) -> Uuid {
        self.session
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Ends the session and deletes every ephemeral node it owns.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        let mut state = self.inner.guard();
        let before = state.nodes.len();
        state
            .nodes
            .retain(|_, node| node.ephemeral_owner != Some(self.session));
        let removed = before - state.nodes.len();
        drop(state);
        self.inner.changed.notify_all();
        debug!(
            "Closed coordination session {} ({removed} ephemeral node(s) removed)",
            self.session
        );
    }

    /// Waits for the service to be reachable, up to the session timeout.
    fn connected(&self) -> Result<MutexGuard<'_, EnsembleState>> {
        if self.is_closed() {
            return Err(LockyardError::Coordination(format!(
                "session {} is closed",
                self.session
            )));
        }

        let deadline = Instant::now() + self.session_timeout;
        let mut state = self.inner.guard();
        while !state.available {
            let now = Instant::now();
            if now >= deadline {
                return Err(LockyardError::Connectivity(format!(
                    "no response within the {}ms session timeout",
                    self.session_timeout.as_millis()
                )));
            }
            state = self
                .inner
                .changed
                .wait_timeout(state, deadline - now)
                .unwrap_or_else(|poisoned| poisoned.into_inner())
                .0;
        }
        Ok(state)
    }
}

impl Drop for MemoryCoordinator {
    fn drop(&mut self) {
        self.close();
    }
}

impl Coordinator for MemoryCoordinator {
    fn exists(&self, path: &str) -> Result<bool> {
        let state = self.connected()?;
        Ok(path == "/" || state.nodes.contains_key(path))
    }

    fn create_sequential_ephemeral(&self, prefix: &str, data: &[u8]) -> Result<String> {
        let parent = parent_of(prefix).ok_or_else(|| {
            LockyardError::Coordination(format!("'{prefix}' is not an absolute path"))
        })?;

        let mut state = self.connected()?;
        ensure_parents(&mut state, parent);

        let counter = state.sequences.entry(parent.to_string()).or_insert(0);
        let path = format!("{prefix}{:010}", *counter);
        *counter += 1;

        state.nodes.insert(
            path.clone(),
            Node {
                data: data.to_vec(),
                ephemeral_owner: Some(self.session),
            },
        );
        Ok(path)
    }

    fn children(&self, path: &str) -> Result<Vec<String>> {
        let state = self.connected()?;
        Ok(child_names(&state, path))
    }

    fn delete(&self, path: &str) -> Result<()> {
        let mut state = self.connected()?;
        if state.nodes.remove(path).is_some() {
            drop(state);
            self.inner.changed.notify_all();
        }
        Ok(())
    }

    fn wait_for_deletion(&self, path: &str, timeout: Option<Duration>) -> Result<bool> {
        let deadline = timeout.and_then(|timeout| Instant::now().checked_add(timeout));
        let mut state = self.connected()?;
        loop {
            if !state.nodes.contains_key(path) {
                return Ok(true);
            }
            if self.is_closed() {
                return Err(LockyardError::Coordination(format!(
                    "session {} closed while waiting on {path}",
                    self.session
                )));
            }
            state = match deadline {
                None => self
                    .inner
                    .changed
                    .wait(state)
                    .unwrap_or_else(|poisoned| poisoned.into_inner()),
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return Ok(false);
                    }
                    self.inner
                        .changed
                        .wait_timeout(state, deadline - now)
                        .unwrap_or_else(|poisoned| poisoned.into_inner())
                        .0
                }
            };
        }
    }
}

fn parent_of(path: &str) -> Option<&str> {
    if !path.starts_with('/') {
        return None;
    }
    let index = path.rfind('/')?;
    Some(if index == 0 { "/" } else { &path[..index] })
}

fn ensure_parents(state: &mut EnsembleState, path: &str) {
    let mut current = String::new();
    for segment in path.split('/').filter(|segment| !segment.is_empty()) {
        current.push('/');
        current.push_str(segment);
        state.nodes.entry(current.clone()).or_insert_with(|| Node {
            data: Vec::new(),
            ephemeral_owner: None,
        });
    }
}

fn child_names(state: &EnsembleState, path: &str) -> Vec<String> {
    let prefix = if path.ends_with('/') {
        path.to_string()
    } else {
        format!("{path}/")
    };
    state
        .nodes
        .range(prefix.clone()..)
        .take_while(|(candidate, _)| candidate.starts_with(&prefix))
        .filter_map(|(candidate, _)| {
            let rest = &candidate[prefix.len()..];
            (!rest.is_empty() && !rest.contains('/')).then(|| rest.to_string())
        })
        .collect()
}
