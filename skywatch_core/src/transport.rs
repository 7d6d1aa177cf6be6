//! Latency-emulating transport between the engine and its observers.
//!
//! # Call Flow
//!
//! ```text
//! Caller                 Transport                   Engine
//!   |                        |                          |
//!   |-- fetch_snapshot() --->|                          |
//!   |                        |-- [request leg] -------->|
//!   |                        |                          |-- snapshot()
//!   |                        |<------- [response leg] --|
//!   |<-- Result<Snapshot> ---|                          |
//! ```
//!
//! Each call samples one round trip of `latency * [1 - jitter, 1 + jitter]`
//! and spends half of it on each leg, so overlapping calls can complete in a
//! different order than they were issued.

use crate::config::{SimulationConfig, TransportConfig};
use crate::error::{ArenaError, Result};
use crate::simulation::SimulationEngine;
use crate::target::Snapshot;

use rand::Rng;
use rand_chacha::ChaCha8Rng;
use skywatch_env::ArenaContext;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tracing::{debug, warn};

/// RNG stream reserved for latency and fault sampling.
const TRANSPORT_STREAM: u64 = 0x517cc1b727220a95;

/// Simulated network shim in front of a [`SimulationEngine`].
pub struct Transport<Ctx: ArenaContext> {
    context: Arc<Ctx>,
    engine: Arc<SimulationEngine<Ctx>>,
    config: TransportConfig,

    /// Current latency in milliseconds
    latency_ms: AtomicU64,

    rng: Mutex<ChaCha8Rng>,
}

impl<Ctx: ArenaContext> Transport<Ctx> {
    /// Creates a transport in front of `engine`.
    pub fn new(
        context: Arc<Ctx>,
        engine: Arc<SimulationEngine<Ctx>>,
        config: TransportConfig,
    ) -> Self {
        let rng = context.derive_rng(TRANSPORT_STREAM);
        let latency_ms = AtomicU64::new(config.default_latency_ms);

        Self {
            context,
            engine,
            config,
            latency_ms,
            rng: Mutex::new(rng),
        }
    }

    /// Returns the engine behind this transport.
    pub fn engine(&self) -> &Arc<SimulationEngine<Ctx>> {
        &self.engine
    }

    pub fn config(&self) -> &TransportConfig {
        &self.config
    }

    /// Returns the nominal round-trip latency.
    pub fn latency(&self) -> Duration {
        Duration::from_millis(self.latency_ms.load(Ordering::SeqCst))
    }

    /// Overrides the latency of a running session.
    pub fn set_latency(&self, latency_ms: u64) -> Result<()> {
        self.engine
            .config()
            .limits
            .latency_ms
            .check("latency_ms", latency_ms as f64)?;
        self.latency_ms.store(latency_ms, Ordering::SeqCst);
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        self.engine.is_running()
    }

    /// Samples one jittered round trip.
    fn sample_round_trip(&self) -> Duration {
        let base = self.latency_ms.load(Ordering::SeqCst) as f64;
        let jitter = self.config.jitter_ratio;
        let factor = if jitter > 0.0 {
            let mut rng = self.rng.lock().unwrap_or_else(PoisonError::into_inner);
            rng.gen_range(1.0 - jitter..=1.0 + jitter)
        } else {
            1.0
        };
        Duration::from_secs_f64(base * factor / 1000.0)
    }

    /// Decides whether an injected fault hits this call.
    fn injected_failure(&self) -> bool {
        let rate = self.config.failure_rate;
        if rate <= 0.0 {
            return false;
        }
        let mut rng = self.rng.lock().unwrap_or_else(PoisonError::into_inner);
        rng.gen_bool(rate.min(1.0))
    }

    /// Runs `call` between the two legs of a simulated round trip.
    async fn round_trip<T>(&self, call: impl FnOnce() -> Result<T>) -> Result<T> {
        let rtt = self.sample_round_trip();
        let request_leg = rtt / 2;

        self.context.sleep(request_leg).await;
        let result = call();
        self.context.sleep(rtt - request_leg).await;

        result
    }

    /// Starts the simulation and adopts the requested latency.
    ///
    /// Rejects the call atomically: a running engine or any out-of-range
    /// field leaves everything unchanged.
    pub async fn start(&self, config: &SimulationConfig) -> Result<()> {
        self.round_trip(|| {
            if self.engine.is_running() {
                return Err(ArenaError::already_running());
            }
            config.validate(&self.engine.config().limits)?;
            self.engine.start(config)?;
            self.latency_ms.store(config.latency_ms, Ordering::SeqCst);
            Ok(())
        })
        .await
    }

    /// Stops the simulation and resets the latency to its default.
    pub async fn stop(&self) -> Result<()> {
        self.round_trip(|| {
            self.engine.stop()?;
            self.latency_ms
                .store(self.config.default_latency_ms, Ordering::SeqCst);
            Ok(())
        })
        .await
    }

    /// Fetches a snapshot of the current targets.
    pub async fn fetch_snapshot(&self) -> Result<Snapshot> {
        let result = self
            .round_trip(|| {
                let snapshot = self.engine.snapshot()?;
                if self.injected_failure() {
                    return Err(ArenaError::fetch("injected transport fault"));
                }
                Ok(snapshot)
            })
            .await;

        match &result {
            Ok(snapshot) => debug!("Fetched tick {} ({} targets)", snapshot.tick, snapshot.len()),
            Err(err) => warn!("Fetch failed: {}", err),
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::error::ErrorKind;
    use skywatch_env::TokioContext;

    fn transport(config: TransportConfig) -> Transport<TokioContext> {
        let ctx = TokioContext::shared();
        let engine = Arc::new(SimulationEngine::new(Arc::clone(&ctx), EngineConfig::default()));
        Transport::new(ctx, engine, config)
    }

    #[tokio::test(start_paused = true)]
    async fn test_calls_fail_while_stopped() {
        let transport = transport(TransportConfig::default());

        let err = transport.fetch_snapshot().await.unwrap_err();
        assert_eq!(err, ArenaError::not_running());

        let err = transport.stop().await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidState);
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_adopts_latency_and_stop_resets_it() {
        let transport = transport(TransportConfig::default());

        transport.start(&SimulationConfig::new(20, 20.0, 150)).await.unwrap();
        assert_eq!(transport.latency(), Duration::from_millis(150));
        assert!(transport.is_running());

        transport.stop().await.unwrap();
        assert_eq!(transport.latency(), Duration::from_millis(20));
    }

    #[tokio::test(start_paused = true)]
    async fn test_invalid_latency_rejects_start() {
        let transport = transport(TransportConfig::default());

        let err = transport
            .start(&SimulationConfig::new(20, 20.0, 5))
            .await
            .unwrap_err();
        assert!(matches!(err, ArenaError::OutOfRange { field: "latency_ms", .. }));
        assert!(!transport.is_running());
        assert_eq!(transport.latency(), Duration::from_millis(20));
    }

    #[tokio::test(start_paused = true)]
    async fn test_fetch_suspends_for_jittered_latency() {
        let transport = transport(TransportConfig::default());
        transport.start(&SimulationConfig::new(20, 20.0, 100)).await.unwrap();

        for _ in 0..10 {
            let started = tokio::time::Instant::now();
            transport.fetch_snapshot().await.unwrap();
            let elapsed = started.elapsed();
            assert!(elapsed >= Duration::from_millis(75), "{:?}", elapsed);
            assert!(elapsed <= Duration::from_millis(126), "{:?}", elapsed);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_jitter_is_exact() {
        let transport = transport(TransportConfig::default().with_jitter(0.0));
        transport.start(&SimulationConfig::new(20, 20.0, 40)).await.unwrap();

        let started = tokio::time::Instant::now();
        let snapshot = transport.fetch_snapshot().await.unwrap();
        assert_eq!(started.elapsed(), Duration::from_millis(40));
        assert_eq!(snapshot.len(), 20);
    }

    #[tokio::test(start_paused = true)]
    async fn test_injected_failures_are_transient() {
        let transport = transport(TransportConfig::default().with_failure_rate(1.0));
        transport.start(&SimulationConfig::new(20, 20.0, 20)).await.unwrap();

        let err = transport.fetch_snapshot().await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::TransientFetch);
        assert!(transport.is_running());
    }

    #[tokio::test(start_paused = true)]
    async fn test_set_latency_validates() {
        let transport = transport(TransportConfig::default());
        assert!(transport.set_latency(500).is_err());
        assert!(transport.set_latency(180).is_ok());
        assert_eq!(transport.latency(), Duration::from_millis(180));
    }
}
