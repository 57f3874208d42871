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

mod context;
mod exit_codes;
mod format;

pub use context::ErrorContext;
pub use exit_codes::get_exit_code;
pub use format::{format_error_chain, format_error_with_color};

use thiserror::Error;

#[derive(Error, Debug)]
pub enum LockyardError {
    #[error("You do not own the lock '{key}': {details}")]
    OwnershipViolation { key: String, details: String },

    #[error("Lock '{key}' was released due to expiration: {details}")]
    StaleLock { key: String, details: String },

    #[error("Unsupported operation: {0}")]
    Unsupported(String),

    #[error("Acquisition of lock '{key}' was interrupted after {waited_secs:.3}s")]
    Interrupted { key: String, waited_secs: f64 },

    #[error("Timed out after {waited_secs:.3}s waiting for lock '{key}'")]
    LockingTimeout { key: String, waited_secs: f64 },

    #[error("Coordination service unavailable: {0}")]
    Connectivity(String),

    #[error("Coordination error: {0}")]
    Coordination(String),

    #[error("Lock store error: {0}")]
    Store(String),

    /// The store refused the request for a reason that retrying cannot fix.
    #[error("Lock store rejected the request: {0}")]
    StoreRejected(String),

    #[error("Invalid lock record: {0}")]
    Serialization(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl LockyardError {
    /// Connectivity failures are reported as "not acquired" instead of errors.
    pub fn is_connectivity(&self) -> bool {
        matches!(self, LockyardError::Connectivity(_))
    }
}

pub type Result<T> = std::result::Result<T, LockyardError>;
