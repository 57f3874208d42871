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

//! Backend-independent locking primitives.

pub mod acquisition;
pub mod cancellation;
pub mod local;
pub mod lock;
pub mod registry;
pub mod scoped_guard;
pub mod strategy;
pub mod timeout;
pub mod wait_observer;

pub use acquisition::{AcquireMode, LockAcquisitionRequest, LockTimeoutBudget, PollingBackoff};
pub use cancellation::{CancellationToken, global_token};
pub use local::{LocalLock, LocalLockRegistry};
pub use lock::{Condition, DistributedLock, LockState, Reentrancy, Release};
pub use registry::{ExpirableLockRegistry, LockRegistry};
pub use scoped_guard::ScopedLock;
pub use strategy::{FieldStrategy, KeyStrategy, PathStrategy};
pub use timeout::{
    LockTimeoutResolution, LockTimeoutResolver, LockTimeoutSource, LockTimeoutValue,
    parse_timeout_override,
};
pub use wait_observer::{
    LockStatusSink, LockWaitObserver, LoggingWaitObserver, NoopLockWaitObserver,
    StatusReporterObserver, StderrStatusSink,
};
