//! Production implementation of ArenaContext using Tokio.

use crate::{ArenaContext, TaskHandle};
use async_trait::async_trait;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tokio::time::Instant;

/// Production context backed by Tokio and OS entropy.
///
/// Time comes from `tokio::time::Instant`, so a runtime started with a
/// paused clock drives it exactly like the simulation harness does.
pub struct TokioContext {
    /// Start time for monotonic duration calculations
    start: Instant,
}

impl TokioContext {
    /// Creates a new TokioContext.
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    /// Creates an Arc-wrapped context for sharing across tasks.
    pub fn shared() -> Arc<Self> {
        Arc::new(Self::new())
    }
}

impl Default for TokioContext {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ArenaContext for TokioContext {
    fn now(&self) -> Duration {
        self.start.elapsed()
    }

    fn system_time(&self) -> SystemTime {
        SystemTime::now()
    }

    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }

    fn spawn<F>(&self, name: &str, future: F) -> TaskHandle
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        TaskHandle::from_tokio(name, tokio::spawn(future))
    }

    fn derive_rng(&self, stream: u64) -> ChaCha8Rng {
        // Production draws fresh entropy per subsystem
        ChaCha8Rng::seed_from_u64(rand::random::<u64>() ^ stream)
    }

    fn seed(&self) -> u64 {
        0
    }
}
