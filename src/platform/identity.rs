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

//! Host and thread identity.

use log::debug;
use std::thread;
use sysinfo::System;

/// Host identifier used when the operating system does not report a host name.
pub const UNKNOWN_HOST: &str = "unknownHost";

/// Longest identity that fits a single length byte of the lock record layout.
pub const MAX_IDENTITY_LEN: usize = u8::MAX as usize;

/// Resolves the host name of this machine. Called once per registry.
pub fn resolve_host_name() -> String {
    match System::host_name() {
        Some(name) if !name.trim().is_empty() => truncate_identity(name.trim()),
        _ => {
            debug!("Host name unavailable; using '{UNKNOWN_HOST}'");
            UNKNOWN_HOST.to_string()
        }
    }
}

/// Name of the calling thread, falling back to its id for unnamed threads.
pub fn current_thread_name() -> String {
    let current = thread::current();
    let name = match current.name() {
        Some(name) => name.to_string(),
        None => format!("{:?}", current.id()),
    };
    truncate_identity(&name)
}

/// Truncates `value` to at most 255 bytes on a character boundary.
pub fn truncate_identity(value: &str) -> String {
    if value.len() <= MAX_IDENTITY_LEN {
        return value.to_string();
    }
    let mut end = MAX_IDENTITY_LEN;
    while !value.is_char_boundary(end) {
        end -= 1;
    }
    value[..end].to_string()
}
