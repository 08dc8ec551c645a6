//! Engine lifecycle state and statistics.

use std::fmt;
use std::time::Instant;

/// The lifecycle state of the sync engine.
///
/// `Uninitialized → Bootstrapping → Ready → Stopped`. A failed bootstrap
/// returns to `Uninitialized`; `Stopped` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    /// `init` has not completed.
    Uninitialized,
    /// Fetching the initial snapshot.
    Bootstrapping,
    /// Accepting mutations and polling.
    Ready,
    /// Stopped; no further polls or notifications.
    Stopped,
}

impl EngineState {
    /// Returns true if the engine accepts mutations.
    pub fn is_ready(&self) -> bool {
        matches!(self, EngineState::Ready)
    }

    /// Returns true if `init` may start from this state.
    pub fn can_init(&self) -> bool {
        matches!(self, EngineState::Uninitialized)
    }
}

impl fmt::Display for EngineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Statistics about sync operations.
#[derive(Debug, Clone, Default)]
pub struct SyncStats {
    /// Total number of polls completed.
    pub polls_completed: u64,
    /// Total number of log entries applied from polls.
    pub transactions_pulled: u64,
    /// Total number of local transactions acknowledged by the server.
    pub transactions_pushed: u64,
    /// Total number of push retries.
    pub retries: u64,
    /// Last successful poll.
    pub last_poll_time: Option<Instant>,
    /// Last error message.
    pub last_error: Option<String>,
}
