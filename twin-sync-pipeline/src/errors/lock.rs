//! Error types for the named lock registry.
use thiserror::Error;

/// Represents errors that can occur while acquiring a per-entity lock.
#[derive(Debug, Error)]
pub enum LockError {
    /// The lock could not be acquired within the caller's deadline. The
    /// caller may retry; nothing was written.
    #[error("Could not acquire lock \"{key}\" within {timeout_ms}ms")]
    AcquireTimeout { key: String, timeout_ms: u64 },
}
