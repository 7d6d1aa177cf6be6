//! Skywatch Deterministic Scenario Harness
//!
//! Runs the simulation and reconciliation engines end to end under
//! controlled conditions and checks their invariants while they run.
//!
//! # Core Principle: Paused Time
//!
//! All sources of non-determinism are pinned down:
//! - **Time**: the tokio clock is paused and jumps to the next timer
//! - **Latency**: transport jitter is drawn from a seeded stream
//! - **Randomness**: every stream derives from a single 64-bit seed
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                       ScenarioRunner                        │
//! │  ┌──────────────────────────────────────────────────────┐   │
//! │  │ current-thread runtime (paused clock) + SimContext   │   │
//! │  └──────────────────────────────────────────────────────┘   │
//! │       │                                                     │
//! │  ┌────▼─────────────────────────────┐      ┌────────────┐   │
//! │  │ Session                          │      │  Sampler   │   │
//! │  │  Engine ◄── Transport ◄── Tracker│◄─────│ invariants │   │
//! │  └──────────────────────────────────┘      │ + frames   │   │
//! │                                            └────────────┘   │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Usage
//!
//! ```ignore
//! use skywatch_sim::{ScenarioRunner, scenarios::ScenarioId};
//!
//! let result = ScenarioRunner::new(42)
//!     .with_duration(10.0)
//!     .run(ScenarioId::Jitter);
//! assert!(result.passed);
//! ```

mod context;
mod exporter;
mod format;
mod runner;
pub mod scenarios;

pub use context::SimContext;
pub use exporter::{EntityFrame, SimEvent, SimExport, SimFrame, TargetPosition};
pub use format::format_timeout;
pub use runner::{ScenarioMetrics, ScenarioResult, ScenarioRunner};
