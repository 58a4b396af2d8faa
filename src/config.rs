//! Environment-driven debug configuration, resolved once.
//!
//! Grounded on `nebula-memory`'s "resolve once, expose a cheap snapshot"
//! shape (`core::sync_cell::SyncUnsafeCell` backing a lazily-initialized
//! singleton). We use `std::sync::OnceLock` directly since the config here
//! is `Copy` and small enough that no custom cell is worth it.
//!
//! A lazy `OnceLock` is used rather than a link-time constructor: the
//! observable contract ("resolved once, before any caller sees an
//! inconsistent value") is identical either way for every call that goes
//! through this crate's own entry points, and a `#[ctor]`-style hook is not
//! part of this crate's dependency stack.

use std::env;
use std::sync::OnceLock;

/// Debug toggles resolved from the process environment.
#[derive(Debug, Clone, Copy)]
pub struct DebugConfig {
    /// `MallocScribble`: fill freshly allocated/freed payload bytes with a
    /// recognizable pattern (0xAA on alloc, 0x55 on free).
    pub scribble: bool,
    /// `MallocDebug`: emit one allocation-free trace line per public call
    /// to standard error (see [`crate::fmt`]).
    pub debug: bool,
}

static CONFIG: OnceLock<DebugConfig> = OnceLock::new();

/// Truthiness rule shared by both environment variables: present, non-empty,
/// and not literally `"0"`.
fn is_truthy(value: &str) -> bool {
    !value.is_empty() && value != "0"
}

fn resolve() -> DebugConfig {
    DebugConfig {
        scribble: env::var("MallocScribble").is_ok_and(|v| is_truthy(&v)),
        debug: env::var("MallocDebug").is_ok_and(|v| is_truthy(&v)),
    }
}

/// Get the process-wide debug configuration, resolving it from the
/// environment on first call and caching it for the lifetime of the
/// process.
#[must_use]
pub fn get() -> DebugConfig {
    *CONFIG.get_or_init(resolve)
}
