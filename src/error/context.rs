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

use crate::error::LockyardError;
use std::fmt;

pub struct ErrorContext<'a> {
    pub error: &'a LockyardError,
    pub suggestion: Option<String>,
    pub details: Option<String>,
}

impl<'a> ErrorContext<'a> {
    pub fn new(error: &'a LockyardError) -> Self {
        let (suggestion, details) = match error {
            LockyardError::OwnershipViolation { key, details } => {
                let suggestion = Some(
                    "Only the thread that acquired a lock may release it. Check that every \
                     unlock is paired with a successful lock on the same thread."
                        .to_string(),
                );
                let details = Some(format!("Lock '{key}': {details}"));
                (suggestion, details)
            }
            LockyardError::StaleLock { key, details } => {
                let suggestion = Some(
                    "The critical section may have run without exclusivity. Verify the protected \
                     resource and raise 'keyed_store.expire_after_ms' above the longest hold time."
                        .to_string(),
                );
                let details = Some(format!("Remote claim for '{key}' changed: {details}"));
                (suggestion, details)
            }
            LockyardError::Unsupported(msg) => {
                let suggestion = None;
                let details = Some(msg.clone());
                (suggestion, details)
            }
            LockyardError::Interrupted { key, waited_secs } => {
                let suggestion = None;
                let details = Some(format!(
                    "Gave up waiting for '{key}' after {waited_secs:.1}s because the attempt \
                     was cancelled."
                ));
                (suggestion, details)
            }
            LockyardError::LockingTimeout { key, .. } => {
                let suggestion = Some(format!(
                    "Another process holds '{key}'. Run 'lockyard status {key}' to see the \
                     holder, retry with a larger --timeout, or use --timeout infinite."
                ));
                let details = None;
                (suggestion, details)
            }
            LockyardError::Connectivity(msg) => {
                let suggestion = Some(
                    "Check that the coordination service is reachable and retry.".to_string(),
                );
                let details = Some(format!("Connectivity issue: {msg}"));
                (suggestion, details)
            }
            LockyardError::Store(msg) => {
                let suggestion =
                    Some("Check that the lock store is reachable and writable.".to_string());
                let details = Some(format!("Store issue: {msg}"));
                (suggestion, details)
            }
            LockyardError::StoreRejected(msg) => {
                let suggestion = Some(
                    "Retrying will not help. Check the lock store location and its permissions."
                        .to_string(),
                );
                let details = Some(msg.clone());
                (suggestion, details)
            }
            LockyardError::Serialization(msg) => {
                let suggestion = Some(
                    "A lock record in the store is corrupt. Run 'lockyard expire' to sweep it."
                        .to_string(),
                );
                let details = Some(msg.clone());
                (suggestion, details)
            }
            LockyardError::ConfigError(msg) | LockyardError::InvalidConfig(msg) => {
                let suggestion = Some(
                    "Check lockyard.toml in the lockyard home and any LOCKYARD_* environment \
                     variables."
                        .to_string(),
                );
                let details = Some(msg.clone());
                (suggestion, details)
            }
            LockyardError::Io(io_err) => {
                let suggestion = match io_err.kind() {
                    std::io::ErrorKind::PermissionDenied => {
                        if cfg!(unix) {
                            Some("Check the permissions of the lock store directory.".to_string())
                        } else {
                            Some("Run as Administrator or check file permissions.".to_string())
                        }
                    }
                    std::io::ErrorKind::NotFound => Some(
                        "Ensure the lock store directory exists and the path is correct."
                            .to_string(),
                    ),
                    _ => None,
                };
                let details = Some(format!("I/O error: {io_err}"));
                (suggestion, details)
            }
            _ => (None, None),
        };

        ErrorContext {
            error,
            suggestion,
            details,
        }
    }

    pub fn with_suggestion(mut self, suggestion: String) -> Self {
        self.suggestion = Some(suggestion);
        self
    }

    pub fn with_details(mut self, details: String) -> Self {
        self.details = Some(details);
        self
    }
}

impl<'a> fmt::Display for ErrorContext<'a> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Error: {}", self.error)?;

        if let Some(details) = &self.details {
            write!(f, "\n\nDetails: {details}")?;
        }

        if let Some(suggestion) = &self.suggestion {
            write!(f, "\n\nSuggestion: {suggestion}")?;
        }

        Ok(())
    }
}
