//! Error types for extension hooks.
use thiserror::Error;

/// Represents a failure raised by a registered extension hook.
///
/// Before-hooks abort the operation that invoked them; after-hooks are
/// surfaced as non-fatal warnings since the write already committed.
#[derive(Debug, Error)]
#[error("Hook \"{hook}\" failed: {reason}")]
pub struct HookError {
    pub hook: String,
    pub reason: String,
}

impl HookError {
    pub fn new(hook: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            hook: hook.into(),
            reason: reason.into(),
        }
    }
}
