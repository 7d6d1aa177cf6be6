//! The simulation engine: authoritative owner of the target population.
//!
//! # State machine
//!
//! ```text
//!   Stopped ──start()──► Running ──stop()──► Stopped
//! ```
//!
//! Any other transition fails with [`ArenaError::InvalidState`] and leaves
//! the engine untouched. While running, a background tick loop advances the
//! physics using the *measured* time since the previous tick, so scheduling
//! jitter never changes how far targets travel per second of real time.
//!
//! The tick loop is the only writer of the target list. It publishes each
//! tick as a fresh `Arc<Vec<Target>>`; [`SimulationEngine::snapshot`] hands
//! out a clone of that `Arc`, so a reader can never observe a half-written
//! tick.

use crate::config::{EngineConfig, SimulationConfig};
use crate::error::{ArenaError, Result};
use crate::physics;
use crate::target::{Snapshot, Target};

use rand_chacha::ChaCha8Rng;
use skywatch_env::{ArenaContext, TaskHandle};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;
use tracing::{debug, info};

/// RNG stream reserved for physics.
const PHYSICS_STREAM: u64 = 0x9e3779b97f4a7c15;

/// Lifecycle phase of the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Stopped,
    Running,
}

/// Mutable engine state, shared with the tick loop.
struct EngineState {
    phase: Phase,

    /// Incremented on every start; a tick loop exits once it is stale
    run_id: u64,

    /// Published target list (replaced, never mutated in place)
    targets: Arc<Vec<Target>>,

    rng: ChaCha8Rng,

    /// Context time of the previous tick
    last_tick_at: Duration,

    /// Time accumulated toward the next attrition pass
    since_cull: Duration,

    tick_count: u64,

    /// Handle of the running tick loop (aborts on drop)
    ticker: Option<TaskHandle>,
}

impl EngineState {
    /// Advances the population by `dt`.
    fn advance(&mut self, dt: Duration, config: &EngineConfig) {
        self.since_cull += dt;

        let survivors = if self.since_cull >= config.cull_interval {
            self.since_cull = Duration::ZERO;
            let kept = physics::cull(
                self.targets.as_slice(),
                config.cull_probability,
                &mut self.rng,
            );
            let removed = self.targets.len() - kept.len();
            if removed > 0 {
                debug!("Culled {} targets ({} remaining)", removed, kept.len());
            }
            Some(kept)
        } else {
            None
        };

        let current: &[Target] = survivors.as_deref().unwrap_or(self.targets.as_slice());
        let next = physics::step(current, dt.as_secs_f64(), config, &mut self.rng);

        self.targets = Arc::new(next);
        self.tick_count += 1;
    }
}

/// The simulation engine.
///
/// Generic over the context so the same engine runs on a live tokio
/// runtime or in the seeded simulator.
pub struct SimulationEngine<Ctx: ArenaContext> {
    context: Arc<Ctx>,
    config: EngineConfig,
    state: Arc<Mutex<EngineState>>,
}

impl<Ctx: ArenaContext> SimulationEngine<Ctx> {
    /// Creates a stopped engine.
    pub fn new(context: Arc<Ctx>, config: EngineConfig) -> Self {
        let rng = context.derive_rng(PHYSICS_STREAM);
        let state = EngineState {
            phase: Phase::Stopped,
            run_id: 0,
            targets: Arc::new(Vec::new()),
            rng,
            last_tick_at: Duration::ZERO,
            since_cull: Duration::ZERO,
            tick_count: 0,
            ticker: None,
        };

        Self {
            context,
            config,
            state: Arc::new(Mutex::new(state)),
        }
    }

    fn lock(&self) -> MutexGuard<'_, EngineState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Returns the engine configuration.
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Returns the current phase.
    pub fn phase(&self) -> Phase {
        self.lock().phase
    }

    pub fn is_running(&self) -> bool {
        self.phase() == Phase::Running
    }

    /// Returns the number of ticks since the last start.
    pub fn tick_count(&self) -> u64 {
        self.lock().tick_count
    }

    /// Starts the simulation.
    ///
    /// Validates `target_count` and `base_speed`, spawns a fresh population
    /// and launches the tick loop. On error nothing changes.
    pub fn start(&self, config: &SimulationConfig) -> Result<()> {
        let mut state = self.lock();

        if state.phase == Phase::Running {
            return Err(ArenaError::already_running());
        }

        let limits = &self.config.limits;
        limits
            .target_count
            .check("target_count", config.target_count as f64)?;
        limits.base_speed.check("base_speed", config.base_speed)?;

        state.targets = Arc::new(physics::spawn_targets(
            &mut state.rng,
            config.target_count,
            config.base_speed,
            &self.config,
        ));
        state.run_id += 1;
        state.phase = Phase::Running;
        state.last_tick_at = self.context.now();
        state.since_cull = Duration::ZERO;
        state.tick_count = 0;

        let ticker = self.context.spawn(
            "simulation-tick",
            tick_loop(
                Arc::clone(&self.context),
                Arc::downgrade(&self.state),
                self.config.clone(),
                state.run_id,
            ),
        );
        state.ticker = Some(ticker);

        info!(
            "Simulation started: {} targets, base speed {:.1}, tick {:?} (run {})",
            config.target_count, config.base_speed, self.config.tick_period, state.run_id
        );
        Ok(())
    }

    /// Stops the simulation and cancels the tick loop.
    pub fn stop(&self) -> Result<()> {
        let mut state = self.lock();

        if state.phase != Phase::Running {
            return Err(ArenaError::not_running());
        }

        state.phase = Phase::Stopped;
        if let Some(ticker) = state.ticker.take() {
            ticker.abort();
        }

        info!(
            "Simulation stopped after {} ticks ({} targets left)",
            state.tick_count,
            state.targets.len()
        );
        Ok(())
    }

    /// Returns an immutable copy of the current targets.
    pub fn snapshot(&self) -> Result<Snapshot> {
        let state = self.lock();

        if state.phase != Phase::Running {
            return Err(ArenaError::not_running());
        }

        Ok(Snapshot::new(
            state.tick_count,
            self.context.now(),
            Arc::clone(&state.targets),
        ))
    }

    /// Advances the simulation by an explicit `dt`, outside the tick loop.
    ///
    /// Used by deterministic harnesses; pair it with a long tick period so
    /// the background loop stays idle.
    pub fn step(&self, dt: Duration) -> Result<()> {
        let mut state = self.lock();

        if state.phase != Phase::Running {
            return Err(ArenaError::not_running());
        }

        state.last_tick_at += dt;
        state.advance(dt, &self.config);
        Ok(())
    }
}

/// Background tick loop for one run.
async fn tick_loop<Ctx: ArenaContext>(
    context: Arc<Ctx>,
    state: Weak<Mutex<EngineState>>,
    config: EngineConfig,
    run_id: u64,
) {
    loop {
        context.sleep(config.tick_period).await;

        let Some(shared) = state.upgrade() else {
            break;
        };
        let mut state = shared.lock().unwrap_or_else(PoisonError::into_inner);

        if state.run_id != run_id || state.phase != Phase::Running {
            break;
        }

        let now = context.now();
        let dt = now.saturating_sub(state.last_tick_at);
        state.last_tick_at = now;
        state.advance(dt, &config);
    }

    debug!("Tick loop for run {} exited", run_id);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AREA_SIZE;
    use crate::error::{ErrorKind, InvalidState};
    use approx::assert_relative_eq;
    use skywatch_env::TokioContext;
    use std::collections::HashMap;

    fn engine(config: EngineConfig) -> SimulationEngine<TokioContext> {
        SimulationEngine::new(TokioContext::shared(), config)
    }

    /// Tick period long enough that the background loop never fires.
    fn manual() -> EngineConfig {
        EngineConfig::default().with_tick_period(Duration::from_secs(3600))
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_stop_lifecycle() {
        let engine = engine(EngineConfig::default());
        assert_eq!(engine.phase(), Phase::Stopped);

        engine.start(&SimulationConfig::new(50, 20.0, 20)).unwrap();
        assert!(engine.is_running());
        assert_eq!(engine.snapshot().unwrap().len(), 50);

        let err = engine.start(&SimulationConfig::default()).unwrap_err();
        assert_eq!(err, ArenaError::InvalidState(InvalidState::AlreadyRunning));

        engine.stop().unwrap();
        assert!(!engine.is_running());
        assert_eq!(engine.snapshot().unwrap_err(), ArenaError::not_running());
    }

    #[tokio::test(start_paused = true)]
    async fn test_double_stop_is_invalid_state() {
        let engine = engine(EngineConfig::default());
        engine.start(&SimulationConfig::default()).unwrap();

        assert!(engine.stop().is_ok());
        let err = engine.stop().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidState);
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_below_min_count_leaves_engine_stopped() {
        let engine = engine(EngineConfig::default());

        let err = engine.start(&SimulationConfig::new(3, 20.0, 20)).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::RangeValidation);
        assert!(matches!(err, ArenaError::OutOfRange { field: "target_count", .. }));
        assert_eq!(engine.phase(), Phase::Stopped);
        assert!(engine.snapshot().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_start_while_running_keeps_population() {
        let engine = engine(manual());
        engine.start(&SimulationConfig::new(40, 20.0, 20)).unwrap();
        let before = engine.snapshot().unwrap();

        assert!(engine.start(&SimulationConfig::new(80, 20.0, 20)).is_err());
        let after = engine.snapshot().unwrap();
        assert_eq!(before.targets(), after.targets());
    }

    #[tokio::test(start_paused = true)]
    async fn test_single_tick_displacement() {
        let engine = engine(manual().with_bounce_perturbation(0.0));
        engine.start(&SimulationConfig::new(50, 20.0, 20)).unwrap();

        let before = engine.snapshot().unwrap();
        engine.step(Duration::from_millis(100)).unwrap();
        let after = engine.snapshot().unwrap();

        let moved: HashMap<_, _> = after.targets().iter().map(|t| (t.id, t)).collect();
        let mut checked = 0;
        for t in before.targets() {
            let Some(next) = moved.get(&t.id) else { continue };
            assert_eq!(next.speed, t.speed);

            let expected = t.position() + t.direction() * (t.speed * 0.1);
            let inside = (0.0..=AREA_SIZE).contains(&expected.x)
                && (0.0..=AREA_SIZE).contains(&expected.y);
            if inside {
                assert_relative_eq!(next.x, expected.x, epsilon = 1e-9);
                assert_relative_eq!(next.y, expected.y, epsilon = 1e-9);
                let distance = (next.position() - t.position()).norm();
                assert_relative_eq!(distance, t.speed * 0.1, epsilon = 1e-9);
                checked += 1;
            }
        }
        assert!(checked > 40);
    }

    #[tokio::test(start_paused = true)]
    async fn test_tick_uses_measured_elapsed_time() {
        let engine = engine(EngineConfig::default().with_bounce_perturbation(0.0));
        engine.start(&SimulationConfig::new(50, 20.0, 20)).unwrap();
        let before = engine.snapshot().unwrap();

        // Let the tick loop arm its 10ms timer, then jump well past it
        tokio::task::yield_now().await;
        tokio::time::advance(Duration::from_millis(300)).await;

        let after = engine.snapshot().unwrap();
        assert_eq!(after.tick, 1);

        let mut checked = 0;
        for t in before.targets() {
            let Some(next) = after.get(t.id) else { continue };
            if next.heading != t.heading {
                continue;
            }
            let distance = (next.position() - t.position()).norm();
            assert_relative_eq!(distance, t.speed * 0.3, epsilon = 1e-9);
            checked += 1;
        }
        assert!(checked > 40);
    }

    #[tokio::test(start_paused = true)]
    async fn test_snapshot_is_not_mutated_by_ticks() {
        let engine = engine(EngineConfig::default());
        engine.start(&SimulationConfig::new(20, 50.0, 20)).unwrap();

        let first = engine.snapshot().unwrap();
        let frozen = first.targets().to_vec();

        tokio::time::sleep(Duration::from_millis(200)).await;
        let later = engine.snapshot().unwrap();

        assert_eq!(first.targets(), frozen.as_slice());
        assert!(later.tick > first.tick);
        assert_ne!(later.targets(), frozen.as_slice());
    }

    #[tokio::test(start_paused = true)]
    async fn test_tick_loop_halts_on_stop() {
        let engine = engine(EngineConfig::default());
        engine.start(&SimulationConfig::default()).unwrap();

        tokio::time::sleep(Duration::from_millis(105)).await;
        engine.stop().unwrap();
        let ticks = engine.tick_count();
        assert!(ticks >= 9);

        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(engine.tick_count(), ticks);
    }

    #[tokio::test(start_paused = true)]
    async fn test_restart_replaces_population() {
        let engine = engine(manual());
        engine.start(&SimulationConfig::new(30, 20.0, 20)).unwrap();
        let first = engine.snapshot().unwrap();
        engine.stop().unwrap();

        engine.start(&SimulationConfig::new(30, 20.0, 20)).unwrap();
        let second = engine.snapshot().unwrap();

        assert_eq!(second.tick, 0);
        assert!(second
            .targets()
            .iter()
            .all(|t| first.get(t.id).is_none()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_attrition_is_permanent() {
        let config = manual().with_attrition(Duration::from_millis(100), 1.0);
        let engine = engine(config);
        engine.start(&SimulationConfig::new(25, 20.0, 20)).unwrap();

        engine.step(Duration::from_millis(50)).unwrap();
        assert_eq!(engine.snapshot().unwrap().len(), 25);

        engine.step(Duration::from_millis(50)).unwrap();
        assert!(engine.snapshot().unwrap().is_empty());

        engine.step(Duration::from_millis(500)).unwrap();
        assert!(engine.snapshot().unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_bounds_hold_over_many_ticks() {
        let engine = engine(EngineConfig::default());
        engine.start(&SimulationConfig::new(200, 100.0, 20)).unwrap();

        for _ in 0..50 {
            tokio::time::sleep(Duration::from_millis(100)).await;
            for t in engine.snapshot().unwrap().targets() {
                assert!((0.0..=AREA_SIZE).contains(&t.x));
                assert!((0.0..=AREA_SIZE).contains(&t.y));
                assert!((0.0..360.0).contains(&t.heading));
            }
        }
    }
}
