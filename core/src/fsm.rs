//! Ride lifecycle state machine.
//!
//! A [`TransitionTable`] lists every legal `(state, event) -> state` step. Each
//! ride owns a [`RideFsm`] that holds its current state and a shared handle to
//! the table; [`RideFsm::apply`] is the only way to change that state.
//!
//! ```text
//!                 RideAccepted          TripStarted          TripCompleted
//!   Requested ───────────────▶ Accepted ──────────▶ InProgress ────────────▶ Completed
//!       │                         │                     │
//!       │ TripCancelled           │ TripCancelled       │ TripCancelled
//!       ▼                         ▼                     ▼
//!   Cancelled                 Cancelled             Cancelled
//! ```
//!
//! # Example
//!
//! ```
//! use rideshare_core::event::{RideEventType, RideState};
//! use rideshare_core::fsm::{RideFsm, TransitionTable};
//! use std::sync::Arc;
//!
//! let table = Arc::new(TransitionTable::standard());
//! let mut fsm = RideFsm::new(table);
//!
//! fsm.apply(RideEventType::RideAccepted).unwrap();
//! assert_eq!(fsm.state(), RideState::Accepted);
//! assert!(fsm.is_cancelable());
//! ```

use crate::event::{RideEventType, RideState};
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;

/// Errors returned by [`RideFsm::apply`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransitionError {
    /// The table has no entry at all for the current state.
    #[error("No transitions defined for state {state}")]
    UndefinedState {
        /// State with no outgoing transitions registered
        state: RideState,
    },

    /// The event is not valid from the current state.
    #[error("Event {event} not valid from state {state}")]
    InvalidTransition {
        /// Current state
        state: RideState,
        /// Rejected event
        event: RideEventType,
    },
}

/// Legal transitions of the ride lifecycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransitionTable {
    transitions: HashMap<RideState, HashMap<RideEventType, RideState>>,
}

impl TransitionTable {
    /// A table with no transitions.
    #[must_use]
    pub fn empty() -> Self {
        Self {
            transitions: HashMap::new(),
        }
    }

    /// The ride lifecycle table.
    ///
    /// Cancellation is allowed from every non-terminal state, including
    /// `InProgress`.
    #[must_use]
    pub fn standard() -> Self {
        Self::empty()
            .with_transition(RideState::Requested, RideEventType::RideAccepted, RideState::Accepted)
            .with_transition(RideState::Requested, RideEventType::TripCancelled, RideState::Cancelled)
            .with_transition(RideState::Accepted, RideEventType::TripStarted, RideState::InProgress)
            .with_transition(RideState::Accepted, RideEventType::TripCancelled, RideState::Cancelled)
            .with_transition(RideState::InProgress, RideEventType::TripCompleted, RideState::Completed)
            .with_transition(RideState::InProgress, RideEventType::TripCancelled, RideState::Cancelled)
    }

    /// Add (or replace) one transition.
    #[must_use]
    pub fn with_transition(mut self, from: RideState, event: RideEventType, to: RideState) -> Self {
        self.transitions.entry(from).or_default().insert(event, to);
        self
    }

    /// Resolve the state reached by applying `event` in state `from`.
    ///
    /// # Errors
    ///
    /// - [`TransitionError::UndefinedState`] if `from` has no entry
    /// - [`TransitionError::InvalidTransition`] if `event` is not valid from `from`
    pub fn next_state(
        &self,
        from: RideState,
        event: RideEventType,
    ) -> Result<RideState, TransitionError> {
        let valid = self
            .transitions
            .get(&from)
            .ok_or(TransitionError::UndefinedState { state: from })?;

        valid
            .get(&event)
            .copied()
            .ok_or(TransitionError::InvalidTransition { state: from, event })
    }

    /// Whether an event of this type can legitimately carry this resulting state.
    ///
    /// True for any transition result in the table, and for the seed
    /// `RideRequested` event which starts every ride in `Requested`.
    #[must_use]
    pub fn produces(&self, event: RideEventType, state: RideState) -> bool {
        if event == RideEventType::RideRequested && state == RideState::Requested {
            return true;
        }
        self.transitions
            .values()
            .any(|valid| valid.get(&event) == Some(&state))
    }

    /// Number of registered transitions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.transitions.values().map(HashMap::len).sum()
    }

    /// True when no transitions are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for TransitionTable {
    fn default() -> Self {
        Self::standard()
    }
}

/// State machine for one ride.
#[derive(Debug, Clone)]
pub struct RideFsm {
    state: RideState,
    table: Arc<TransitionTable>,
}

impl RideFsm {
    /// Start a machine in `Requested`, the initial state of every ride.
    #[must_use]
    pub const fn new(table: Arc<TransitionTable>) -> Self {
        Self {
            state: RideState::Requested,
            table,
        }
    }

    /// Start a machine in an arbitrary state.
    #[must_use]
    pub const fn with_state(table: Arc<TransitionTable>, state: RideState) -> Self {
        Self { state, table }
    }

    /// Current state.
    #[must_use]
    pub const fn state(&self) -> RideState {
        self.state
    }

    /// Apply an event, moving to the state the table resolves.
    ///
    /// The state is left untouched on error.
    ///
    /// # Errors
    ///
    /// See [`TransitionTable::next_state`].
    pub fn apply(&mut self, event: RideEventType) -> Result<(), TransitionError> {
        self.state = self.table.next_state(self.state, event)?;
        Ok(())
    }

    /// True once the ride is `Completed` or `Cancelled`.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    /// True while the ride may still be cancelled by the passenger
    /// (`Requested` or `Accepted`).
    #[must_use]
    pub const fn is_cancelable(&self) -> bool {
        matches!(self.state, RideState::Requested | RideState::Accepted)
    }
}
