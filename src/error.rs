//! Error types for ombaro-booking

use thiserror::Error;

use crate::booking::BookingEvent;
use crate::types::BookingStatus;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    /// Capacity contention. Retryable by the client with a new slot or
    /// therapist.
    #[error("Slot conflict: {0}")]
    SlotConflict(String),

    /// A tentative hold lapsed before it was confirmed. Retryable by
    /// re-holding.
    #[error("Hold expired: {0}")]
    HoldExpired(String),

    /// The requested event is not legal from the booking's current state.
    /// Signals a bug or stale client state, not retryable.
    #[error("Invalid transition: cannot apply '{event}' in state '{from}'")]
    InvalidTransition {
        from: BookingStatus,
        event: BookingEvent,
    },

    /// No qualified therapist is free for the requested window. Retryable
    /// on backoff until the assignment cutoff.
    #[error("No therapist available: {0}")]
    NoTherapistAvailable(String),

    #[error("Not found: {0}")]
    NotFound(String),

    /// Malformed input, rejected before any lock is acquired.
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    pub fn slot_conflict(msg: impl Into<String>) -> Self {
        Error::SlotConflict(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Error::NotFound(msg.into())
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        Error::Validation(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Error::Internal(msg.into())
    }

    /// Whether the client may retry the same operation (possibly with a
    /// different slot or therapist).
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::SlotConflict(_) | Error::HoldExpired(_) | Error::NoTherapistAvailable(_)
        )
    }
}
