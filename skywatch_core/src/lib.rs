//! Skywatch Core - Arena Target Simulation and Reconciliation
//!
//! This library provides the two engines behind the Skywatch arena:
//! 1. **Simulation**: a fixed-rate tick loop moving targets across a bounded
//!    square arena, with wall reflection and random attrition
//! 2. **Reconciliation**: a tracker that polls snapshots over a laggy
//!    transport, discards out-of-order results, and keeps vanished targets
//!    visible as offline until they expire
//!
//! Both engines run against [`skywatch_env::ArenaContext`], so the same code
//! drives production tokio tasks and deterministic simulated time.

pub mod config;
pub mod error;
pub mod physics;
pub mod reconcile;
pub mod session;
pub mod simulation;
pub mod target;
pub mod transport;

// Re-export key types for convenience
pub use config::{
    EngineConfig, Limits, ReconciliationConfig, SessionConfig, SimulationConfig, TransportConfig,
    AREA_SIZE,
};
pub use error::{ArenaError, ErrorKind, Result};
pub use reconcile::{
    EntityView, Liveness, MergeSummary, PollOutcome, Tracker, TrackerStats, ViewUpdate,
};
pub use session::{Session, SessionStatus};
pub use simulation::{Phase, SimulationEngine};
pub use target::{Snapshot, Target, TargetId};
pub use transport::Transport;
