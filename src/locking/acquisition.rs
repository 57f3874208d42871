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

use crate::error::{LockyardError, Result};
use crate::locking::cancellation::CancellationToken;
use crate::locking::timeout::{LockTimeoutSource, LockTimeoutValue};
use crate::locking::wait_observer::LockWaitObserver;
use std::cmp;
use std::time::{Duration, Instant};

/// Whether a request may wait for contention to clear.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcquireMode {
    Blocking,
    NonBlocking,
}

impl AcquireMode {
    pub fn is_blocking(self) -> bool {
        matches!(self, AcquireMode::Blocking)
    }
}

/// Delay sequence used between polling attempts.
#[derive(Debug, Clone)]
pub struct PollingBackoff {
    initial: Duration,
    factor: u32,
    cap: Duration,
    current: Duration,
}

impl PollingBackoff {
    pub fn new(initial: Duration, factor: u32, cap: Duration) -> Self {
        Self {
            initial,
            factor: cmp::max(factor, 1),
            cap,
            current: initial,
        }
    }

    /// A constant delay between attempts.
    pub fn fixed(interval: Duration) -> Self {
        Self::new(interval, 1, interval)
    }

    /// Returns the current delay and advances the sequence.
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.current;
        self.current = cmp::min(self.current.saturating_mul(self.factor), self.cap);
        delay
    }

    pub fn reset(&mut self) {
        self.current = self.initial;
    }
}

impl Default for PollingBackoff {
    fn default() -> Self {
        Self::fixed(Duration::from_millis(100))
    }
}

/// Elapsed and remaining time of one wait budget.
#[derive(Debug, Clone)]
pub struct LockTimeoutBudget {
    value: LockTimeoutValue,
    started_at: Instant,
}

impl LockTimeoutBudget {
    pub fn new(value: LockTimeoutValue) -> Self {
        Self::with_start(value, Instant::now())
    }

    pub fn with_start(value: LockTimeoutValue, started_at: Instant) -> Self {
        Self { value, started_at }
    }

    pub fn value(&self) -> LockTimeoutValue {
        self.value
    }

    pub fn elapsed(&self) -> Duration {
        self.started_at.elapsed()
    }

    /// Time left, or `None` for an infinite budget.
    pub fn remaining(&self) -> Option<Duration> {
        self.value
            .as_duration()
            .map(|limit| limit.saturating_sub(self.elapsed()))
    }

    pub fn is_expired(&self) -> bool {
        matches!(self.value, LockTimeoutValue::Finite(limit) if self.elapsed() >= limit)
    }
}

/// One acquisition attempt against a polling backend.
///
/// `run` calls the supplied attempt until it reports success, the budget is
/// spent, or the cancellation token fires.
pub struct LockAcquisitionRequest<'a> {
    key: &'a str,
    budget: LockTimeoutBudget,
    cancellation: CancellationToken,
    backoff: PollingBackoff,
    observer: Option<&'a dyn LockWaitObserver>,
    source: LockTimeoutSource,
    mode: AcquireMode,
    retries: usize,
    wait_started: bool,
}

impl<'a> LockAcquisitionRequest<'a> {
    pub fn new(key: &'a str, timeout: LockTimeoutValue) -> Self {
        Self {
            key,
            budget: LockTimeoutBudget::new(timeout),
            cancellation: CancellationToken::new(),
            backoff: PollingBackoff::default(),
            observer: None,
            source: LockTimeoutSource::Default,
            mode: AcquireMode::Blocking,
            retries: 0,
            wait_started: false,
        }
    }

    pub fn with_mode(mut self, mode: AcquireMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_cancellation(mut self, cancellation: CancellationToken) -> Self {
        self.cancellation = cancellation;
        self
    }

    pub fn with_backoff(mut self, backoff: PollingBackoff) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn with_timeout_source(mut self, source: LockTimeoutSource) -> Self {
        self.source = source;
        self
    }

    pub fn with_observer(mut self, observer: Option<&'a dyn LockWaitObserver>) -> Self {
        self.observer = observer;
        self
    }

    pub fn key(&self) -> &str {
        self.key
    }

    pub fn mode(&self) -> AcquireMode {
        self.mode
    }

    pub fn timeout_value(&self) -> LockTimeoutValue {
        self.budget.value()
    }

    pub fn timeout_source(&self) -> LockTimeoutSource {
        self.source
    }

    pub fn elapsed(&self) -> Duration {
        self.budget.elapsed()
    }

    pub fn remaining(&self) -> Option<Duration> {
        self.budget.remaining()
    }

    pub fn retries(&self) -> usize {
        self.retries
    }

    /// Next sleep, clipped to the remaining budget. `None` once the budget is spent.
    pub fn next_sleep_interval(&mut self) -> Option<Duration> {
        let remaining = self.remaining();
        let mut delay = self.backoff.next_delay();
        if let Some(remaining_budget) = remaining {
            delay = cmp::min(delay, remaining_budget);
            if delay.is_zero() {
                return None;
            }
        }
        Some(delay)
    }

    /// Polls `attempt` until it succeeds (`Ok(true)`) or the budget runs out (`Ok(false)`).
    ///
    /// Cancellation surfaces as [`LockyardError::Interrupted`]. Errors from
    /// `attempt` are returned unchanged.
    pub fn run<F>(mut self, mut attempt: F) -> Result<bool>
    where
        F: FnMut() -> Result<bool>,
    {
        loop {
            if self.cancellation.is_cancelled() {
                self.notify_cancelled();
                return Err(self.interrupted());
            }

            if attempt()? {
                self.notify_acquired();
                return Ok(true);
            }

            if !self.mode.is_blocking() {
                return Ok(false);
            }

            self.record_wait_start();
            let Some(delay) = self.next_sleep_interval() else {
                self.notify_timeout();
                return Ok(false);
            };

            if !self.cancellation.sleep(delay) {
                self.notify_cancelled();
                return Err(self.interrupted());
            }
            self.record_retry();
        }
    }

    fn interrupted(&self) -> LockyardError {
        LockyardError::Interrupted {
            key: self.key.to_string(),
            waited_secs: self.elapsed().as_secs_f64(),
        }
    }

    fn record_wait_start(&mut self) {
        if !self.wait_started {
            if let Some(observer) = self.observer {
                observer.on_wait_start(self.key, self.timeout_value());
            }
            self.wait_started = true;
        }
    }

    fn record_retry(&mut self) {
        self.retries = self.retries.saturating_add(1);
        if let Some(observer) = self.observer {
            observer.on_retry(self.key, self.retries, self.elapsed(), self.remaining());
        }
    }

    fn notify_acquired(&self) {
        if let Some(observer) = self.observer {
            observer.on_acquired(self.key, self.elapsed());
        }
    }

    fn notify_timeout(&self) {
        if let Some(observer) = self.observer {
            observer.on_timeout(self.key, self.elapsed());
        }
    }

    fn notify_cancelled(&self) {
        if let Some(observer) = self.observer {
            observer.on_cancelled(self.key, self.elapsed());
        }
    }
}
