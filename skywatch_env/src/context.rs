//! Core environment context trait for Skywatch engines.

use crate::task::TaskHandle;
use async_trait::async_trait;
use rand_chacha::ChaCha8Rng;
use std::future::Future;
use std::time::{Duration, SystemTime};

/// The central interface for Environment Interaction.
///
/// This trait abstracts the clock, the scheduler and the entropy source so
/// that the simulation and reconciliation engines run unchanged against a
/// real tokio runtime or a seeded, paused-clock harness.
///
/// # Implementations
///
/// - **Production**: `TokioContext` - wraps `tokio::time`, OS entropy
/// - **Simulation**: `SimContext` (in `skywatch_sim`) - same clock, seeded RNG
///
/// # Determinism
///
/// All randomness an engine needs is obtained through [`derive_rng`], so a
/// seeded implementation reproduces a whole run from one 64-bit seed.
///
/// [`derive_rng`]: ArenaContext::derive_rng
#[async_trait]
pub trait ArenaContext: Send + Sync + 'static {
    /// Returns the current monotonic time since context creation.
    ///
    /// Used for tick deltas, merge timestamps and liveness deadlines.
    fn now(&self) -> Duration;

    /// Returns the wall-clock time (used for export metadata only).
    fn system_time(&self) -> SystemTime;

    /// Suspends execution for the given duration.
    ///
    /// Must be a suspension point, never a busy wait.
    async fn sleep(&self, duration: Duration);

    /// Spawns a background task.
    ///
    /// The returned handle aborts the task when dropped; call
    /// [`TaskHandle::detach`] to let it run to completion on its own.
    fn spawn<F>(&self, name: &str, future: F) -> TaskHandle
    where
        F: Future<Output = ()> + Send + 'static;

    /// Derives an RNG for one subsystem.
    ///
    /// `stream` separates subsystems (physics, transport, ...) so that
    /// changing how often one of them draws does not shift the others.
    fn derive_rng(&self, stream: u64) -> ChaCha8Rng;

    /// Returns the context's seed (for logging/debugging).
    ///
    /// In production, returns 0 (not seeded).
    fn seed(&self) -> u64;
}
