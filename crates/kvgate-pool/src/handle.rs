//! Connection handles and their lifecycle.
//!
//! ```text
//! Connecting ──ok──▶ Connected ──request_disconnect──▶ Disconnecting
//!     │                  │                                  │
//!     └──fail──▶ Gone ◀──┴──────────drop / error────────────┘
//! ```
//!
//! A handle is never resurrected: the next attempt gets a fresh handle.

use std::fmt;
use std::sync::Arc;

use crate::backend::Link;
use crate::error::TransitionError;

/// Identifies a pool process-wide (one per worker).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PoolId(pub usize);

/// Identifies a handle within its pool; never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HandleId(pub u64);

impl fmt::Display for PoolId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "pool-{}", self.0)
    }
}

impl fmt::Display for HandleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandleState {
    Connecting,
    Connected,
    Disconnecting,
    Gone,
}

impl HandleState {
    pub fn can_transition_to(self, next: HandleState) -> bool {
        use HandleState::*;
        matches!(
            (self, next),
            (Connecting, Connected)
                | (Connecting, Gone)
                | (Connected, Disconnecting)
                | (Connected, Gone)
                | (Disconnecting, Gone)
        )
    }
}

/// One in-flight or established link to the backend.
pub struct ConnectionHandle {
    id: HandleId,
    pool: PoolId,
    state: HandleState,
    link: Option<Arc<dyn Link>>,
}

impl fmt::Debug for ConnectionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionHandle")
            .field("id", &self.id)
            .field("pool", &self.pool)
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

impl ConnectionHandle {
    /// A handle for a connect request that has just been issued.
    pub fn connecting(id: HandleId, pool: PoolId) -> Self {
        Self {
            id,
            pool,
            state: HandleState::Connecting,
            link: None,
        }
    }

    pub fn id(&self) -> HandleId {
        self.id
    }

    pub fn state(&self) -> HandleState {
        self.state
    }

    pub fn is_connected(&self) -> bool {
        self.state == HandleState::Connected
    }

    /// The backend link, present once connected and until gone.
    pub fn link(&self) -> Option<&Arc<dyn Link>> {
        self.link.as_ref()
    }

    fn transition(&mut self, next: HandleState) -> Result<(), TransitionError> {
        if !self.state.can_transition_to(next) {
            return Err(TransitionError {
                from: self.state,
                to: next,
            });
        }
        self.state = next;
        Ok(())
    }

    pub fn mark_connected(&mut self, link: Arc<dyn Link>) -> Result<(), TransitionError> {
        self.transition(HandleState::Connected)?;
        self.link = Some(link);
        Ok(())
    }

    /// Ask the link to close. The disconnect event finishes the job.
    pub fn request_disconnect(&mut self) -> Result<(), TransitionError> {
        self.transition(HandleState::Disconnecting)?;
        if let Some(link) = &self.link {
            link.close();
        }
        Ok(())
    }

    /// Terminal state; releases the link.
    pub fn mark_gone(&mut self) -> Result<(), TransitionError> {
        self.transition(HandleState::Gone)?;
        self.link = None;
        Ok(())
    }
}
