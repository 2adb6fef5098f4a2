//! Synchronization primitives module
//!
//! This module provides the synchronization primitives the shim needs on top
//! of host threads, most notably the recursive process lock that serializes
//! process-wide mutation (address-space teardown, descriptor flush, exec).

pub mod recursive;

pub use recursive::{RecursiveGuard, RecursiveLock};
