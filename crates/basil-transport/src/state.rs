//! Connection state machine and state-change observers

use std::fmt;
use std::sync::{Mutex, MutexGuard, PoisonError};
use tokio::sync::mpsc;
use tracing::{debug, trace};

/// Lifecycle state of a channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    /// Created but not yet open
    Initializing,
    /// Ready to carry frames
    Open,
    /// Orderly shutdown in progress
    Closing,
    /// The channel faulted
    Error,
    /// Terminal state
    Closed,
}

impl ConnectionState {
    /// Whether moving from `self` to `next` is a legal transition
    pub fn can_transition_to(self, next: ConnectionState) -> bool {
        use ConnectionState::*;
        matches!(
            (self, next),
            (Initializing, Open)
                | (Initializing, Closing)
                | (Open, Closing)
                | (Closing, Closed)
                | (Initializing | Open | Closing, Error)
                | (Error, Closed)
        )
    }

    /// Whether no further transitions can happen
    pub fn is_terminal(self) -> bool {
        self == ConnectionState::Closed
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConnectionState::Initializing => "INITIALIZING",
            ConnectionState::Open => "OPEN",
            ConnectionState::Closing => "CLOSING",
            ConnectionState::Error => "ERROR",
            ConnectionState::Closed => "CLOSED",
        };
        f.write_str(name)
    }
}

/// A state transition event
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateChange {
    /// State before the transition
    pub old: ConnectionState,
    /// State after the transition
    pub new: ConnectionState,
    /// Fault description for transitions into [`ConnectionState::Error`]
    pub reason: Option<String>,
}

/// Receiver of state-change events for one observer
pub type StateReceiver = mpsc::UnboundedReceiver<StateChange>;

struct StateInner {
    state: ConnectionState,
    observers: Vec<mpsc::UnboundedSender<StateChange>>,
}

/// Shared state cell that validates transitions and fans events out to observers.
///
/// Events are pushed while the lock is held, so every observer sees
/// transitions in the order they happened.
pub struct StateCell {
    name: String,
    inner: Mutex<StateInner>,
}

impl StateCell {
    /// Create a cell in [`ConnectionState::Initializing`]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            inner: Mutex::new(StateInner {
                state: ConnectionState::Initializing,
                observers: Vec::new(),
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, StateInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Current state
    pub fn get(&self) -> ConnectionState {
        self.lock().state
    }

    /// Register an observer. Returns the state at registration time; every
    /// later transition arrives on the receiver.
    pub fn subscribe(&self) -> (ConnectionState, StateReceiver) {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut inner = self.lock();
        inner.observers.push(tx);
        (inner.state, rx)
    }

    /// Attempt a transition. Illegal transitions are ignored and return `false`.
    pub fn transition(&self, next: ConnectionState, reason: Option<String>) -> bool {
        let mut inner = self.lock();
        let old = inner.state;
        if !old.can_transition_to(next) {
            trace!(transport = %self.name, from = %old, to = %next, "Ignoring transition");
            return false;
        }
        inner.state = next;
        debug!(transport = %self.name, from = %old, to = %next, "State transition");

        let change = StateChange {
            old,
            new: next,
            reason,
        };
        inner
            .observers
            .retain(|observer| observer.send(change.clone()).is_ok());
        if next.is_terminal() {
            inner.observers.clear();
        }
        true
    }
}

impl fmt::Debug for StateCell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StateCell")
            .field("name", &self.name)
            .field("state", &self.get())
            .finish()
    }
}
