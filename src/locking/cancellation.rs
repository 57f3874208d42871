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

//! Cooperative cancellation for blocking lock waits.

use log::warn;
use signal_hook::SigId;
use signal_hook::consts::signal::{SIGINT, SIGTERM};
use signal_hook::flag;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};
use std::thread;
use std::time::{Duration, Instant};

#[cfg(windows)]
use signal_hook::consts::signal::SIGBREAK;

/// Upper bound on how long a cancellable sleep goes without checking its token.
pub const CANCELLATION_CHECK_INTERVAL: Duration = Duration::from_millis(10);

/// Shared flag observed by interruptible waits.
#[derive(Debug, Clone)]
pub struct CancellationToken {
    flag: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self {
            flag: Arc::new(AtomicBool::new(false)),
        }
    }

    pub(crate) fn from_shared(flag: Arc<AtomicBool>) -> Self {
        Self { flag }
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::Acquire)
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::Release);
    }

    /// Sleeps for `duration` unless cancelled first. Returns `false` when cancelled.
    pub fn sleep(&self, duration: Duration) -> bool {
        let deadline = Instant::now() + duration;
        loop {
            if self.is_cancelled() {
                return false;
            }
            let now = Instant::now();
            if now >= deadline {
                return true;
            }
            thread::sleep((deadline - now).min(CANCELLATION_CHECK_INTERVAL));
        }
    }
}

impl Default for CancellationToken {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug)]
struct SignalRegistry {
    flag: Arc<AtomicBool>,
    _handles: Vec<SigId>,
}

impl SignalRegistry {
    fn install() -> Self {
        let flag = Arc::new(AtomicBool::new(false));
        let handles = registered_signals()
            .iter()
            .filter_map(|signal| match flag::register(*signal, flag.clone()) {
                Ok(handle) => Some(handle),
                Err(err) => {
                    warn!("Failed to register cancellation handler for signal {signal}: {err}");
                    None
                }
            })
            .collect();

        Self {
            flag,
            _handles: handles,
        }
    }
}

fn registered_signals() -> &'static [i32] {
    #[cfg(windows)]
    {
        static SIGNALS: [i32; 3] = [SIGINT, SIGTERM, SIGBREAK];
        &SIGNALS
    }

    #[cfg(not(windows))]
    {
        static SIGNALS: [i32; 2] = [SIGINT, SIGTERM];
        &SIGNALS
    }
}

static SIGNAL_REGISTRY: OnceLock<SignalRegistry> = OnceLock::new();

/// Returns a token that fires on SIGINT or SIGTERM. Handlers are installed on first call.
pub fn global_token() -> CancellationToken {
    let registry = SIGNAL_REGISTRY.get_or_init(SignalRegistry::install);
    CancellationToken::from_shared(registry.flag.clone())
}
