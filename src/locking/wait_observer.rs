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

//! Observer hooks for lock wait instrumentation.
//!
//! Observers keep polling loops free of user-facing output. The registries
//! log through [`LoggingWaitObserver`]; the command line reports through
//! [`StatusReporterObserver`].

use crate::locking::timeout::{LockTimeoutSource, LockTimeoutValue};
use colored::Colorize;
use log::{debug, info, warn};
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Observer hooks for lock wait events.
pub trait LockWaitObserver: Send + Sync {
    fn on_wait_start(&self, _key: &str, _timeout: LockTimeoutValue) {}

    fn on_retry(
        &self,
        _key: &str,
        _attempt: usize,
        _elapsed: Duration,
        _remaining: Option<Duration>,
    ) {
    }

    fn on_acquired(&self, _key: &str, _waited: Duration) {}

    fn on_timeout(&self, _key: &str, _waited: Duration) {}

    fn on_cancelled(&self, _key: &str, _waited: Duration) {}
}

/// Observer implementation that performs no work.
#[derive(Debug, Default)]
pub struct NoopLockWaitObserver;

impl LockWaitObserver for NoopLockWaitObserver {}

/// Writes wait events to the `log` facade.
#[derive(Debug, Default)]
pub struct LoggingWaitObserver;

impl LockWaitObserver for LoggingWaitObserver {
    fn on_wait_start(&self, key: &str, timeout: LockTimeoutValue) {
        debug!("Lock '{key}' is held elsewhere; waiting (timeout {timeout})");
    }

    fn on_retry(
        &self,
        key: &str,
        attempt: usize,
        elapsed: Duration,
        _remaining: Option<Duration>,
    ) {
        if attempt % 50 == 0 {
            info!(
                "Still waiting for lock '{key}' after {} (attempt {attempt})",
                format_duration(elapsed)
            );
        }
    }

    fn on_acquired(&self, key: &str, waited: Duration) {
        debug!("Acquired lock '{key}' after {}", format_duration(waited));
    }

    fn on_timeout(&self, key: &str, waited: Duration) {
        debug!(
            "Gave up on lock '{key}' after {}",
            format_duration(waited)
        );
    }

    fn on_cancelled(&self, key: &str, waited: Duration) {
        warn!(
            "Wait for lock '{key}' cancelled after {}",
            format_duration(waited)
        );
    }
}

/// Destination for user-facing wait messages.
pub trait LockStatusSink: Send + Sync {
    fn step(&self, message: &str);
    fn success(&self, message: &str);
    fn error(&self, message: &str);
}

/// Colored status lines on standard error.
#[derive(Debug, Default)]
pub struct StderrStatusSink;

impl LockStatusSink for StderrStatusSink {
    fn step(&self, message: &str) {
        eprintln!("{} {message}", "…".dimmed());
    }

    fn success(&self, message: &str) {
        eprintln!("{} {message}", "✓".green().bold());
    }

    fn error(&self, message: &str) {
        eprintln!("{} {message}", "✗".red().bold());
    }
}

/// Turns wait events into throttled status lines.
pub struct StatusReporterObserver<'a> {
    sink: &'a dyn LockStatusSink,
    source: LockTimeoutSource,
    progress_interval: Duration,
    last_emit: Mutex<Option<Instant>>,
}

impl<'a> StatusReporterObserver<'a> {
    pub fn new(sink: &'a dyn LockStatusSink, source: LockTimeoutSource) -> Self {
        Self {
            sink,
            source,
            progress_interval: Duration::from_secs(5),
            last_emit: Mutex::new(None),
        }
    }

    pub fn with_progress_interval(mut self, interval: Duration) -> Self {
        self.progress_interval = interval;
        self
    }
}

impl LockWaitObserver for StatusReporterObserver<'_> {
    fn on_wait_start(&self, key: &str, timeout: LockTimeoutValue) {
        *self
            .last_emit
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(Instant::now());
        self.sink.step(&format!(
            "Waiting for lock '{key}' (timeout {timeout}, source {}); Ctrl-C to cancel",
            self.source
        ));
    }

    fn on_retry(
        &self,
        key: &str,
        _attempt: usize,
        elapsed: Duration,
        remaining: Option<Duration>,
    ) {
        let now = Instant::now();
        let mut last_emit = self
            .last_emit
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let due = last_emit
            .map(|last| now.duration_since(last) >= self.progress_interval)
            .unwrap_or(true);
        if !due {
            return;
        }
        *last_emit = Some(now);
        drop(last_emit);

        let remaining_text = remaining
            .map(format_duration)
            .map(|value| format!(" (~{value} remaining)"))
            .unwrap_or_default();
        self.sink.step(&format!(
            "Still waiting for lock '{key}' after {}{remaining_text}",
            format_duration(elapsed)
        ));
    }

    fn on_acquired(&self, key: &str, waited: Duration) {
        self.sink.success(&format!(
            "Acquired lock '{key}' after {}",
            format_duration(waited)
        ));
    }

    fn on_timeout(&self, key: &str, waited: Duration) {
        self.sink.error(&format!(
            "Timed out waiting for lock '{key}' after {}",
            format_duration(waited)
        ));
    }

    fn on_cancelled(&self, key: &str, waited: Duration) {
        self.sink.error(&format!(
            "Cancelled wait for lock '{key}' after {}",
            format_duration(waited)
        ));
    }
}

pub(crate) fn format_duration(duration: Duration) -> String {
    if duration.as_secs() >= 1 {
        format!("{:.1}s", duration.as_secs_f32())
    } else {
        format!("{}ms", duration.as_millis())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct RecordingSink {
        lines: Mutex<Vec<String>>,
    }

    impl LockStatusSink for RecordingSink {
        fn step(&self, message: &str) {
            self.lines.lock().unwrap().push(format!("step:{message}"));
        }

        fn success(&self, message: &str) {
            self.lines.lock().unwrap().push(format!("ok:{message}"));
        }

        fn error(&self, message: &str) {
            self.lines.lock().unwrap().push(format!("err:{message}"));
        }
    }

    #[test]
    fn reporter_throttles_retry_lines() {
        let sink = RecordingSink::default();
        let observer = StatusReporterObserver::new(&sink, LockTimeoutSource::Cli)
            .with_progress_interval(Duration::from_secs(3600));

        observer.on_wait_start("batch", LockTimeoutValue::from_secs(30));
        for attempt in 1..=20 {
            observer.on_retry("batch", attempt, Duration::from_millis(100), None);
        }
        observer.on_acquired("batch", Duration::from_millis(1500));

        let lines = sink.lines.lock().unwrap();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].starts_with("step:Waiting for lock 'batch' (timeout 30s, source command-line flag)"));
        assert_eq!(lines[1], "ok:Acquired lock 'batch' after 1.5s");
    }

    #[test]
    fn reporter_emits_progress_when_interval_elapses() {
        let sink = RecordingSink::default();
        let observer = StatusReporterObserver::new(&sink, LockTimeoutSource::Default)
            .with_progress_interval(Duration::ZERO);

        observer.on_retry(
            "batch",
            1,
            Duration::from_secs(2),
            Some(Duration::from_secs(8)),
        );
        observer.on_timeout("batch", Duration::from_secs(10));

        let lines = sink.lines.lock().unwrap();
        assert_eq!(
            lines.as_slice(),
            [
                "step:Still waiting for lock 'batch' after 2.0s (~8.0s remaining)",
                "err:Timed out waiting for lock 'batch' after 10.0s",
            ]
        );
    }

    #[test]
    fn durations_render_compactly() {
        assert_eq!(format_duration(Duration::from_millis(250)), "250ms");
        assert_eq!(format_duration(Duration::from_millis(2500)), "2.5s");
    }
}
