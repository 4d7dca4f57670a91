//! Typed errors for the synchronous edges of the API.
//!
//! Asynchronous failures (pool exhaustion, shutdown races, connection death)
//! never surface here; they arrive as completions with `success == false`.

use thiserror::Error;

/// Synchronous validation failures from the request entry points.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum CallError {
    /// The notification queue was never registered with this server.
    #[error("notification queue was not registered with this server")]
    NotServerCompletionQueue,
}
