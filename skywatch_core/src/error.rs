//! Error taxonomy shared by the engine, transport and reconciliation layers.

use std::fmt;
use thiserror::Error;

/// Lifecycle violations of the simulation state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvalidState {
    /// `start` while already running
    AlreadyRunning,
    /// `stop`/`snapshot` (or any transport call but `start`) while stopped
    NotRunning,
}

impl fmt::Display for InvalidState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InvalidState::AlreadyRunning => write!(f, "simulation is already running"),
            InvalidState::NotRunning => write!(f, "simulation is not running"),
        }
    }
}

/// Which limit a configuration value broke.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RangeBound {
    Below { min: f64 },
    Above { max: f64 },
    /// Value must be a positive, finite number
    NotPositive,
}

impl fmt::Display for RangeBound {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RangeBound::Below { min } => write!(f, "is below the minimum of {}", min),
            RangeBound::Above { max } => write!(f, "is above the maximum of {}", max),
            RangeBound::NotPositive => write!(f, "must be a positive finite number"),
        }
    }
}

/// Coarse classification used by callers that only care about the bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    InvalidState,
    RangeValidation,
    TransientFetch,
}

/// Errors surfaced by the Skywatch core.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ArenaError {
    /// Operation not allowed in the current engine state
    #[error("Invalid state: {0}")]
    InvalidState(InvalidState),

    /// Configuration value outside its bounds
    #[error("{field} = {value} {bound}")]
    OutOfRange {
        field: &'static str,
        value: f64,
        bound: RangeBound,
    },

    /// Generic failure while fetching a snapshot
    #[error("Snapshot fetch failed: {0}")]
    TransientFetch(String),
}

impl ArenaError {
    /// Creates an already-running error.
    pub fn already_running() -> Self {
        Self::InvalidState(InvalidState::AlreadyRunning)
    }

    /// Creates a not-running error.
    pub fn not_running() -> Self {
        Self::InvalidState(InvalidState::NotRunning)
    }

    /// Creates a transient fetch error.
    pub fn fetch(msg: impl Into<String>) -> Self {
        Self::TransientFetch(msg.into())
    }

    /// Returns the taxonomy bucket of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            ArenaError::InvalidState(_) => ErrorKind::InvalidState,
            ArenaError::OutOfRange { .. } => ErrorKind::RangeValidation,
            ArenaError::TransientFetch(_) => ErrorKind::TransientFetch,
        }
    }
}

pub type Result<T> = std::result::Result<T, ArenaError>;
