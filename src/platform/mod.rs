//! Platform utilities for the entire application.
//!
//! This module resolves the identity of the current host and thread, which is
//! written into remote lock records and used for ownership checks.

mod identity;

pub use identity::{
    MAX_IDENTITY_LEN, UNKNOWN_HOST, current_thread_name, resolve_host_name, truncate_identity,
};
