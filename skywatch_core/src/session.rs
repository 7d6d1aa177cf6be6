//! Session - wires the engines together for the operator control surface.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                         Session                          │
//! │                                                          │
//! │   start/stop ──► Transport ──► SimulationEngine          │
//! │                      ▲              (tick loop)          │
//! │                      │                                   │
//! │   poll cadence ──► Tracker ──► EntityView map ──► reads  │
//! │   (TaskHandle)                                           │
//! └──────────────────────────────────────────────────────────┘
//! ```
//!
//! The session owns the poll cadence: once a simulation starts, a background
//! task spawns one `poll()` per interval without waiting for the previous one,
//! which is what makes overlapping fetches (and the ordering guard) matter.
//!
//! Start and stop requests are serialized: each one runs its transport round
//! trip and its poller/tracking changes as a single step, so a request issued
//! while another is in flight observes the state the first one left behind.

use crate::config::{EngineConfig, ReconciliationConfig, SessionConfig, TransportConfig};
use crate::error::{ArenaError, Result};
use crate::reconcile::{EntityView, Tracker, ViewUpdate};
use crate::simulation::SimulationEngine;
use crate::transport::Transport;

use skywatch_env::{ArenaContext, TaskHandle};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::{watch, Mutex as ControlLock};
use tracing::{info, warn};

/// Point-in-time read of the session's flags and errors.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionStatus {
    /// Simulation engine is running
    pub running: bool,

    /// A start or stop request is in flight
    pub loading: bool,

    /// At least one snapshot fetch is in flight
    pub fetching: bool,

    /// Error from the most recent failed start/stop
    pub last_control_error: Option<ArenaError>,

    /// Error from the most recent failed fetch
    pub last_fetch_error: Option<ArenaError>,

    /// Entities currently in the view
    pub entity_count: usize,
}

/// Counts a control request as pending until it finishes (queued included).
struct Loading<'a>(&'a AtomicUsize);

impl<'a> Loading<'a> {
    fn enter(pending: &'a AtomicUsize) -> Self {
        pending.fetch_add(1, Ordering::SeqCst);
        Self(pending)
    }
}

impl Drop for Loading<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// One operator session over a simulation engine.
pub struct Session<Ctx: ArenaContext> {
    context: Arc<Ctx>,
    transport: Arc<Transport<Ctx>>,
    tracker: Arc<Tracker<Ctx>>,
    /// Start/stop requests in flight or queued
    loading: AtomicUsize,

    /// Held for the whole of a start or stop request
    control: ControlLock<()>,

    last_control_error: Mutex<Option<ArenaError>>,
    poller: Mutex<Option<TaskHandle>>,
}

impl<Ctx: ArenaContext> Session<Ctx> {
    /// Creates a session with a stopped engine.
    pub fn new(
        context: Arc<Ctx>,
        engine_config: EngineConfig,
        transport_config: TransportConfig,
    ) -> Self {
        let engine = Arc::new(SimulationEngine::new(Arc::clone(&context), engine_config));
        let transport = Arc::new(Transport::new(Arc::clone(&context), engine, transport_config));
        let tracker = Arc::new(Tracker::new(
            Arc::clone(&context),
            Arc::clone(&transport),
            ReconciliationConfig::default(),
        ));

        Self {
            context,
            transport,
            tracker,
            loading: AtomicUsize::new(0),
            control: ControlLock::new(()),
            last_control_error: Mutex::new(None),
            poller: Mutex::new(None),
        }
    }

    fn control_error(&self) -> MutexGuard<'_, Option<ArenaError>> {
        self.last_control_error
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn poller(&self) -> MutexGuard<'_, Option<TaskHandle>> {
        self.poller.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn record(&self, result: &Result<()>) {
        *self.control_error() = result.as_ref().err().cloned();
    }

    pub fn engine(&self) -> &Arc<SimulationEngine<Ctx>> {
        self.transport.engine()
    }

    pub fn transport(&self) -> &Arc<Transport<Ctx>> {
        &self.transport
    }

    pub fn tracker(&self) -> &Arc<Tracker<Ctx>> {
        &self.tracker
    }

    /// Starts the simulation and the poll cadence.
    ///
    /// Fails without side effects if the engine is already running or any
    /// parameter is out of range.
    pub async fn start_simulation(&self, config: SessionConfig) -> Result<()> {
        let _loading = Loading::enter(&self.loading);
        let _control = self.control.lock().await;

        let result = self.try_start(config).await;
        if let Err(err) = &result {
            warn!("Start rejected: {}", err);
        }
        self.record(&result);
        result
    }

    async fn try_start(&self, config: SessionConfig) -> Result<()> {
        config.reconciliation.validate()?;
        self.transport.start(&config.simulation).await?;

        let interval = config.reconciliation.poll_interval;
        self.tracker.reconfigure(config.reconciliation);
        self.tracker.start_tracking();

        let poller = self.context.spawn(
            "reconcile-poll",
            poll_loop(Arc::clone(&self.context), Arc::clone(&self.tracker), interval),
        );
        *self.poller() = Some(poller);

        info!("Session started, polling every {:?}", interval);
        Ok(())
    }

    /// Stops the poll cadence and the simulation.
    pub async fn stop_simulation(&self) -> Result<()> {
        let _loading = Loading::enter(&self.loading);
        let _control = self.control.lock().await;

        let result = self.transport.stop().await;
        match &result {
            Ok(()) => {
                // Dropping the handle cancels the cadence; polls already in
                // flight complete into a fresh generation and are discarded.
                self.poller().take();
                self.tracker.start_tracking();
                info!("Session stopped");
            }
            Err(err) => warn!("Stop rejected: {}", err),
        }
        self.record(&result);
        result
    }

    /// Current reconciled view.
    pub fn entities(&self) -> Vec<EntityView> {
        self.tracker.entities()
    }

    /// Subscribes to view updates.
    pub fn subscribe(&self) -> watch::Receiver<ViewUpdate> {
        self.tracker.subscribe()
    }

    pub fn status(&self) -> SessionStatus {
        SessionStatus {
            running: self.transport.is_running(),
            loading: self.loading.load(Ordering::SeqCst) > 0,
            fetching: self.tracker.is_fetching(),
            last_control_error: self.control_error().clone(),
            last_fetch_error: self.tracker.last_fetch_error(),
            entity_count: self.tracker.len(),
        }
    }

    /// True while the poll cadence is active.
    pub fn is_polling(&self) -> bool {
        self.poller().as_ref().is_some_and(|h| !h.is_finished())
    }
}

/// Issues one detached poll per interval.
async fn poll_loop<Ctx: ArenaContext>(
    context: Arc<Ctx>,
    tracker: Arc<Tracker<Ctx>>,
    interval: Duration,
) {
    loop {
        let tracker = Arc::clone(&tracker);
        context
            .spawn("poll", async move {
                tracker.poll().await;
            })
            .detach();
        context.sleep(interval).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SimulationConfig;
    use crate::error::ErrorKind;
    use crate::reconcile::Liveness;
    use skywatch_env::TokioContext;

    fn session() -> Session<TokioContext> {
        Session::new(TokioContext::shared(), EngineConfig::default(), TransportConfig::default())
    }

    fn config(count: u32) -> SessionConfig {
        SessionConfig {
            simulation: SimulationConfig::new(count, 20.0, 20),
            reconciliation: ReconciliationConfig::default()
                .with_refresh_rate(10.0)
                .unwrap(),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_session_start_polls_and_populates_view() {
        let session = session();
        session.start_simulation(config(50)).await.unwrap();
        assert!(session.is_polling());

        tokio::time::sleep(Duration::from_millis(500)).await;
        let status = session.status();
        assert!(status.running);
        assert!(!status.loading);
        assert!(status.last_control_error.is_none());

        let entities = session.entities();
        assert!(!entities.is_empty());
        assert!(entities.len() <= 50);
        assert!(session.tracker().stats().applied >= 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_session_stop_halts_polling_and_clears_view() {
        let session = session();
        session.start_simulation(config(30)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(300)).await;

        session.stop_simulation().await.unwrap();
        assert!(!session.is_polling());
        assert!(session.entities().is_empty());

        let issued = session.tracker().stats().polls_issued;
        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(session.tracker().stats().polls_issued, issued);
        assert!(session.entities().is_empty());
        assert!(!session.status().fetching);
    }

    #[tokio::test(start_paused = true)]
    async fn test_session_records_control_errors() {
        let session = session();

        let err = session.stop_simulation().await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidState);
        assert_eq!(session.status().last_control_error, Some(err));

        let err = session.start_simulation(config(2)).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::RangeValidation);
        assert!(!session.status().running);
        assert!(!session.is_polling());

        session.start_simulation(config(20)).await.unwrap();
        assert!(session.status().last_control_error.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_session_rejects_zero_poll_interval() {
        let session = session();
        let mut cfg = config(20);
        cfg.reconciliation = cfg.reconciliation.with_poll_interval(Duration::ZERO);

        assert!(session.start_simulation(cfg).await.is_err());
        assert!(!session.status().running);
    }

    #[tokio::test(start_paused = true)]
    async fn test_session_restart_tracks_new_population_only() {
        let session = session();
        session.start_simulation(config(20)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(300)).await;
        let first: Vec<_> = session.entities().iter().map(|e| e.id()).collect();
        assert!(!first.is_empty());

        session.stop_simulation().await.unwrap();
        session.start_simulation(config(20)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(300)).await;

        let second = session.entities();
        assert!(!second.is_empty());
        assert!(second.iter().all(|e| !first.contains(&e.id())));
        assert!(second.iter().all(|e| e.liveness == Liveness::Active));
    }
    fn slow_session() -> Arc<Session<TokioContext>> {
        Arc::new(Session::new(
            TokioContext::shared(),
            EngineConfig::default(),
            TransportConfig::default().with_jitter(0.0),
        ))
    }

    fn slow_config() -> SessionConfig {
        SessionConfig {
            simulation: SimulationConfig::new(20, 20.0, 100),
            ..config(20)
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_during_stop_round_trip_keeps_polling() {
        let session = slow_session();
        session.start_simulation(slow_config()).await.unwrap();
        tokio::time::sleep(Duration::from_millis(300)).await;

        let stopping = tokio::spawn({
            let session = Arc::clone(&session);
            async move { session.stop_simulation().await }
        });
        // Past the request leg: the engine itself is already stopped
        tokio::time::sleep(Duration::from_millis(51)).await;
        assert!(!session.status().running);
        assert!(session.status().loading);

        let starting = tokio::spawn({
            let session = Arc::clone(&session);
            async move { session.start_simulation(slow_config()).await }
        });
        assert!(stopping.await.unwrap().is_ok());
        assert!(starting.await.unwrap().is_ok());

        tokio::time::sleep(Duration::from_millis(500)).await;
        let status = session.status();
        assert!(status.running);
        assert!(!status.loading);
        assert!(session.is_polling());
        assert!(status.entity_count > 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_during_start_round_trip_leaves_no_poller() {
        let session = slow_session();
        session.transport().set_latency(100).unwrap();

        let starting = tokio::spawn({
            let session = Arc::clone(&session);
            async move { session.start_simulation(slow_config()).await }
        });
        // Engine started, response leg still pending
        tokio::time::sleep(Duration::from_millis(51)).await;
        assert!(session.status().running);
        assert!(session.status().loading);
        assert!(!session.is_polling());

        let stopping = tokio::spawn({
            let session = Arc::clone(&session);
            async move { session.stop_simulation().await }
        });
        assert!(starting.await.unwrap().is_ok());
        assert!(stopping.await.unwrap().is_ok());

        tokio::time::sleep(Duration::from_millis(500)).await;
        let status = session.status();
        assert!(!status.running);
        assert!(!session.is_polling());
        assert_eq!(status.entity_count, 0);
    }
}
