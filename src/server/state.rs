//! Process-wide server state.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};

/// Lifecycle position of the server. Only ever moves forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum ServerState {
    Starting = 0,
    Listening = 1,
    Draining = 2,
    Stopped = 3,
}

impl ServerState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Starting,
            1 => Self::Listening,
            2 => Self::Draining,
            _ => Self::Stopped,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Starting => "starting",
            Self::Listening => "listening",
            Self::Draining => "draining",
            Self::Stopped => "stopped",
        }
    }
}

impl fmt::Display for ServerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Shared handle to the server state, cloned into the signal path and the
/// readiness handler.
#[derive(Clone, Default)]
pub struct StateCell(Arc<AtomicU8>);

impl fmt::Debug for StateCell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("StateCell").field(&self.get()).finish()
    }
}

impl StateCell {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self) -> ServerState {
        ServerState::from_u8(self.0.load(Ordering::Acquire))
    }

    /// Move to `next` if it is later than the current state.
    ///
    /// Returns `false` (and changes nothing) for backward or repeated moves.
    pub fn advance(&self, next: ServerState) -> bool {
        let next = next as u8;
        self.0
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                (next > current).then_some(next)
            })
            .is_ok()
    }

    pub fn is_ready(&self) -> bool {
        self.get() == ServerState::Listening
    }

    /// New sessions are only accepted until draining starts.
    pub fn accepts_sessions(&self) -> bool {
        self.get() <= ServerState::Listening
    }
}
