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

use crate::commands::registry_builder;
use crate::config::{LockingConfig, RegistryConfig};
use crate::error::{LockyardError, Result};
use crate::locking::{
    CancellationToken, DistributedLock, LockAcquisitionRequest, LockRegistry, LockStatusSink,
    LockTimeoutResolver, NoopLockWaitObserver, PollingBackoff, StatusReporterObserver,
    StderrStatusSink, global_token,
};
use crate::platform::current_thread_name;
use log::debug;
use std::env;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Environment variable overriding the hold timeout.
pub const LOCK_TIMEOUT_ENV: &str = "LOCKYARD_LOCK_TIMEOUT";

const HOLD_CHECK_INTERVAL: Duration = Duration::from_millis(250);

pub struct HoldCommand<'a> {
    config: &'a RegistryConfig,
}

impl<'a> HoldCommand<'a> {
    pub fn new(config: &'a RegistryConfig) -> Result<Self> {
        Ok(Self { config })
    }

    /// Acquires `key` and holds it until Ctrl-C, or for `hold_for` when given.
    pub fn execute(&self, key: &str, timeout: Option<&str>, hold_for: Option<u64>) -> Result<()> {
        let sink = StderrStatusSink;
        self.run(
            key,
            timeout,
            hold_for.map(Duration::from_secs),
            &global_token(),
            &sink,
        )
    }

    pub(crate) fn run(
        &self,
        key: &str,
        timeout: Option<&str>,
        hold_for: Option<Duration>,
        cancellation: &CancellationToken,
        sink: &dyn LockStatusSink,
    ) -> Result<()> {
        let env_timeout = env::var(LOCK_TIMEOUT_ENV).ok();
        let resolution = LockTimeoutResolver::new(
            timeout,
            env_timeout.as_deref(),
            self.config.locking.timeout_value(),
            LockingConfig::default().timeout_value(),
        )
        .resolve()
        .map_err(|err| LockyardError::InvalidConfig(err.to_string()))?;
        debug!(
            "Hold timeout for '{key}' is {} from {}",
            resolution.value, resolution.source
        );

        // The status observer below reports the wait; the handle itself stays quiet.
        let registry = registry_builder(self.config)?
            .observer(Arc::new(NoopLockWaitObserver))
            .build();
        let lock = registry.obtain(key);

        let observer = StatusReporterObserver::new(sink, resolution.source);
        let started = Instant::now();
        let acquired = LockAcquisitionRequest::new(key, resolution.value)
            .with_cancellation(cancellation.clone())
            .with_backoff(PollingBackoff::fixed(
                self.config.keyed_store.poll_interval(),
            ))
            .with_timeout_source(resolution.source)
            .with_observer(Some(&observer))
            .run(|| lock.try_lock())?;

        if !acquired {
            return Err(LockyardError::LockingTimeout {
                key: key.to_string(),
                waited_secs: started.elapsed().as_secs_f64(),
            });
        }

        sink.success(&format!(
            "Holding lock '{key}' as thread '{}' on host '{}'",
            current_thread_name(),
            registry.host()
        ));

        match hold_for {
            Some(duration) => {
                cancellation.sleep(duration);
            }
            None => {
                sink.step("Press Ctrl-C to release");
                while cancellation.sleep(HOLD_CHECK_INTERVAL) {}
            }
        }

        lock.unlock()?;
        sink.success(&format!("Released lock '{key}'"));
        Ok(())
    }
}
