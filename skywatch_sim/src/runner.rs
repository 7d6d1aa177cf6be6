//! Scenario runner - executes harness scenarios on a paused clock.
//!
//! Every run builds a fresh current-thread runtime with the clock paused,
//! so virtual time jumps straight to the next timer and a 10-second scenario
//! finishes in milliseconds. Combined with [`SimContext`] streams, a seed
//! reproduces the whole run.

use crate::context::SimContext;
use crate::exporter::{EntityFrame, SimEvent, SimExport, SimFrame, TargetPosition};
use crate::format::format_timeout;
use crate::scenarios::ScenarioId;

use serde::Serialize;
use skywatch_core::{
    EngineConfig, ErrorKind, Liveness, ReconciliationConfig, Session, SessionConfig, TargetId,
    TransportConfig, ViewUpdate,
};
use skywatch_env::ArenaContext;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info};

/// Restart cycles in the restart scenario.
const RESTART_CYCLES: u32 = 3;

/// Shortest run that still lets attrition victims expire.
const MIN_ATTRITION_SECS: f64 = 5.0;

/// Results from running a scenario.
#[derive(Debug, Clone)]
pub struct ScenarioResult {
    /// Scenario that was run
    pub scenario: ScenarioId,

    /// Seed used
    pub seed: u64,

    /// Whether scenario passed all assertions
    pub passed: bool,

    /// Engine ticks executed (summed over restarts)
    pub total_ticks: u64,

    /// Final simulation time in seconds
    pub final_time_secs: f64,

    /// Entities in the reconciled view when the scenario ended
    pub final_entity_count: usize,

    /// Failure message if any
    pub failure_reason: Option<String>,

    /// Metrics collected during run
    pub metrics: ScenarioMetrics,
}

impl ScenarioResult {
    fn aborted(scenario: ScenarioId, seed: u64, reason: String) -> Self {
        Self {
            scenario,
            seed,
            passed: false,
            total_ticks: 0,
            final_time_secs: 0.0,
            final_entity_count: 0,
            failure_reason: Some(reason),
            metrics: ScenarioMetrics::default(),
        }
    }
}

/// Metrics collected during scenario execution.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ScenarioMetrics {
    pub polls_issued: u64,
    pub polls_applied: u64,
    pub polls_superseded: u64,
    pub polls_stale: u64,
    pub fetch_failures: u64,
    pub offline_transitions: u64,
    pub expired: u64,

    /// Changes observed by a view subscriber
    pub view_updates: u64,

    /// Largest active/offline populations seen at a sample
    pub max_active: usize,
    pub max_offline: usize,

    /// Applied ticks that went backwards within one tracking session
    pub rollbacks: u64,

    /// Times the view came back after a failed fetch emptied it
    pub recoveries: u64,

    pub restarts: u64,

    /// Start/stop requests rejected with an invalid-state error
    pub rejected_controls: u64,
}

/// Runs harness scenarios.
pub struct ScenarioRunner {
    /// Configuration seed
    seed: u64,

    /// Operator parameters (scenarios override what they exercise)
    session: SessionConfig,

    /// Duration in seconds
    max_duration_secs: f64,

    /// Virtual time between invariant checks
    sample_interval: Duration,

    /// Virtual time between exported frames
    frame_interval: Duration,
}

impl ScenarioRunner {
    /// Creates a new scenario runner.
    pub fn new(seed: u64) -> Self {
        Self {
            seed,
            session: SessionConfig::default(),
            max_duration_secs: 10.0,
            sample_interval: Duration::from_millis(10),
            frame_interval: Duration::from_millis(100),
        }
    }

    /// Sets the operator parameters.
    pub fn with_session(mut self, session: SessionConfig) -> Self {
        self.session = session;
        self
    }

    /// Sets the duration.
    pub fn with_duration(mut self, secs: f64) -> Self {
        self.max_duration_secs = secs.max(0.0);
        self
    }

    /// Sets the interval between exported frames.
    pub fn with_frame_interval(mut self, interval: Duration) -> Self {
        self.frame_interval = interval;
        self
    }

    /// Runs a scenario and returns the result.
    pub fn run(&self, scenario: ScenarioId) -> ScenarioResult {
        self.execute(scenario, false).0
    }

    /// Runs a scenario and records frames along the way.
    pub fn run_with_export(&self, scenario: ScenarioId) -> (ScenarioResult, SimExport) {
        let (result, export) = self.execute(scenario, true);
        let export = export.unwrap_or_else(|| {
            SimExport::new(
                scenario.name(),
                self.seed,
                format_timeout(self.session.reconciliation.offline_timeout),
            )
        });
        (result, export)
    }

    fn execute(&self, scenario: ScenarioId, record: bool) -> (ScenarioResult, Option<SimExport>) {
        info!("Starting scenario: {} (seed={})", scenario.name(), self.seed);

        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_time()
            .start_paused(true)
            .build();

        match runtime {
            Ok(runtime) => runtime.block_on(self.run_async(scenario, record)),
            Err(err) => {
                let reason = format!("Runtime failed to start: {}", err);
                (ScenarioResult::aborted(scenario, self.seed, reason), None)
            }
        }
    }

    /// Per-scenario engine, transport and session parameters.
    fn configure(&self, scenario: ScenarioId) -> (EngineConfig, TransportConfig, SessionConfig) {
        let mut engine = EngineConfig::default();
        let mut transport = TransportConfig::default();
        let mut session = self.session.clone();

        match scenario {
            ScenarioId::Steady | ScenarioId::Restart => {}
            ScenarioId::Attrition => {
                engine = engine.with_attrition(Duration::from_millis(500), 0.05);
                session.simulation.target_count = session.simulation.target_count.max(100);
                session.reconciliation = session
                    .reconciliation
                    .with_offline_timeout(Duration::from_secs(2));
            }
            ScenarioId::Jitter => {
                session.simulation.latency_ms = 150;
                session.reconciliation = ReconciliationConfig::default()
                    .with_offline_timeout(session.reconciliation.offline_timeout);
            }
            ScenarioId::Flaky => {
                transport = transport.with_failure_rate(0.3);
            }
        }

        (engine, transport, session)
    }

    fn duration(&self, scenario: ScenarioId) -> Duration {
        let secs = match scenario {
            ScenarioId::Attrition => self.max_duration_secs.max(MIN_ATTRITION_SECS),
            _ => self.max_duration_secs,
        };
        Duration::from_secs_f64(secs)
    }

    async fn run_async(
        &self,
        scenario: ScenarioId,
        record: bool,
    ) -> (ScenarioResult, Option<SimExport>) {
        let (engine, transport, session) = self.configure(scenario);
        let mut run = Run::new(
            SimContext::shared(self.seed),
            engine,
            transport,
            session,
            self.sample_interval,
        );
        if record {
            run.record(scenario, self.seed, self.frame_interval);
        }

        let duration = self.duration(scenario);
        let outcome = match scenario {
            ScenarioId::Steady => run.steady(duration).await,
            ScenarioId::Attrition => run.attrition(duration).await,
            ScenarioId::Jitter => run.jitter(duration).await,
            ScenarioId::Flaky => run.flaky(duration).await,
            ScenarioId::Restart => run.restart(duration).await,
        };

        run.finish(scenario, self.seed, outcome.err())
    }
}

/// One scenario execution: the session under test plus its observers.
struct Run {
    context: Arc<SimContext>,
    session: Session<SimContext>,
    config: SessionConfig,
    updates: watch::Receiver<ViewUpdate>,
    metrics: ScenarioMetrics,
    sample_interval: Duration,

    /// Ticks of finished runs
    ticks_before: u64,

    /// Last applied tick of the current tracking session
    last_tick: Option<u64>,

    /// View was emptied by a failed fetch and has not refilled yet
    cleared_by_failure: bool,

    export: Option<SimExport>,
    frame_interval: Duration,
    next_frame_at: Duration,
}

type Check = std::result::Result<(), String>;

impl Run {
    fn new(
        context: Arc<SimContext>,
        engine: EngineConfig,
        transport: TransportConfig,
        config: SessionConfig,
        sample_interval: Duration,
    ) -> Self {
        let session = Session::new(Arc::clone(&context), engine, transport);
        let updates = session.subscribe();

        Self {
            context,
            session,
            config,
            updates,
            metrics: ScenarioMetrics::default(),
            sample_interval,
            ticks_before: 0,
            last_tick: None,
            cleared_by_failure: false,
            export: None,
            frame_interval: Duration::ZERO,
            next_frame_at: Duration::ZERO,
        }
    }

    fn record(&mut self, scenario: ScenarioId, seed: u64, frame_interval: Duration) {
        let timeout = format_timeout(self.config.reconciliation.offline_timeout);
        self.export = Some(SimExport::new(scenario.name(), seed, timeout));
        self.frame_interval = frame_interval;
    }

    fn event(&mut self, event: SimEvent) {
        if let Some(export) = &mut self.export {
            export.add_event(event);
        }
    }

    async fn start(&mut self) -> Check {
        self.session
            .start_simulation(self.config.clone())
            .await
            .map_err(|err| format!("Start failed: {}", err))?;
        self.last_tick = None;
        self.cleared_by_failure = false;
        self.event(SimEvent::info(format!(
            "started: {} targets, latency {}ms",
            self.config.simulation.target_count, self.config.simulation.latency_ms
        )));
        Ok(())
    }

    async fn stop(&mut self) -> Check {
        let ticks = self.session.engine().tick_count();
        self.session
            .stop_simulation()
            .await
            .map_err(|err| format!("Stop failed: {}", err))?;
        self.ticks_before += ticks;
        self.last_tick = None;
        self.event(SimEvent::info("stopped"));

        if !self.session.entities().is_empty() {
            return Err("View not cleared after stop".to_string());
        }
        Ok(())
    }

    /// Advances virtual time by `duration`, checking invariants as it goes.
    async fn observe(&mut self, duration: Duration) -> Check {
        let end = self.context.now() + duration;
        while self.context.now() < end {
            let step = self.sample_interval.min(end - self.context.now());
            self.context.sleep(step).await;
            self.sample()?;
        }
        Ok(())
    }

    fn sample(&mut self) -> Check {
        let now = self.context.now();
        let engine = self.session.engine();
        let area = engine.config().area_size;

        let live = engine.snapshot().ok();
        if let Some(snapshot) = &live {
            for t in snapshot.targets() {
                let inside = (0.0..=area).contains(&t.x) && (0.0..=area).contains(&t.y);
                if !inside || !(0.0..360.0).contains(&t.heading) {
                    return Err(format!(
                        "{} out of bounds at tick {}: ({:.2}, {:.2}) heading {:.2}",
                        t.id, snapshot.tick, t.x, t.y, t.heading
                    ));
                }
            }
        }

        let tracker = self.session.tracker();
        let entities = tracker.entities();
        let timeout = self.config.reconciliation.offline_timeout;

        if let Some(merged_at) = tracker.last_merge_at() {
            for view in &entities {
                match view.liveness {
                    Liveness::Active if view.last_seen_at != merged_at => {
                        return Err(format!("{} active but missing from the last merge", view.id()));
                    }
                    Liveness::Offline if view.absent_for(merged_at) >= timeout => {
                        return Err(format!("{} kept past the offline timeout", view.id()));
                    }
                    _ => {}
                }
            }
        }

        let active = entities.iter().filter(|e| e.is_active()).count();
        let offline = entities.len() - active;
        if active > self.config.simulation.target_count as usize {
            return Err(format!("{} active entities exceed the population", active));
        }
        self.metrics.max_active = self.metrics.max_active.max(active);
        self.metrics.max_offline = self.metrics.max_offline.max(offline);

        if let Some(tick) = tracker.last_applied_tick() {
            if self.last_tick.is_some_and(|prev| tick < prev) {
                self.metrics.rollbacks += 1;
            }
            self.last_tick = Some(tick);
        }

        if entities.is_empty() && tracker.last_fetch_error().is_some() {
            self.cleared_by_failure = true;
        } else if !entities.is_empty() && self.cleared_by_failure {
            self.cleared_by_failure = false;
            self.metrics.recoveries += 1;
        }

        if self.updates.has_changed().unwrap_or(false) {
            self.updates.borrow_and_update();
            self.metrics.view_updates += 1;
        }

        if let Some(export) = &mut self.export {
            if now >= self.next_frame_at {
                export.add_frame(SimFrame {
                    time_sec: now.as_secs_f64(),
                    tick: live.as_ref().map_or(0, |s| s.tick),
                    targets: live
                        .as_ref()
                        .map(|s| s.targets().iter().map(TargetPosition::from).collect())
                        .unwrap_or_default(),
                    entities: entities.iter().map(|e| EntityFrame::new(e, now)).collect(),
                    events: Vec::new(),
                });
                self.next_frame_at = now + self.frame_interval;
            }
        }

        Ok(())
    }

    /// SKY-001: Default parameters, everything should just flow.
    async fn steady(&mut self, duration: Duration) -> Check {
        self.start().await?;
        self.observe(duration).await?;

        let stats = self.session.tracker().stats();
        if stats.applied == 0 {
            return Err("No poll was ever applied".to_string());
        }
        if stats.failed > 0 {
            return Err(format!("{} fetches failed on a healthy transport", stats.failed));
        }
        if self.metrics.view_updates == 0 {
            return Err("Subscriber never saw an update".to_string());
        }
        debug!("steady: {} polls applied", stats.applied);

        self.stop().await
    }

    /// SKY-002: Culled targets must show up offline, then disappear.
    async fn attrition(&mut self, duration: Duration) -> Check {
        self.start().await?;
        self.observe(duration).await?;

        let stats = self.session.tracker().stats();
        if stats.offline_transitions == 0 || self.metrics.max_offline == 0 {
            return Err("No entity ever went offline".to_string());
        }
        if stats.expired == 0 {
            return Err(format!(
                "No entity expired within {}",
                format_timeout(self.config.reconciliation.offline_timeout)
            ));
        }
        debug!(
            "attrition: {} went offline, {} expired",
            stats.offline_transitions, stats.expired
        );

        self.stop().await
    }

    /// SKY-003: Overlapping slow fetches.
    async fn jitter(&mut self, duration: Duration) -> Check {
        self.start().await?;
        self.observe(duration).await?;

        let stats = self.session.tracker().stats();
        if self.metrics.rollbacks > 0 {
            return Err(format!("View rolled back {} times", self.metrics.rollbacks));
        }
        if stats.superseded == 0 {
            return Err("No out-of-order result was superseded".to_string());
        }
        if stats.applied == 0 {
            return Err("No poll was ever applied".to_string());
        }

        self.stop().await
    }

    /// SKY-004: Transport loses fetches.
    async fn flaky(&mut self, duration: Duration) -> Check {
        self.start().await?;
        self.observe(duration).await?;

        let stats = self.session.tracker().stats();
        if stats.failed == 0 {
            return Err("No fetch failed".to_string());
        }
        if stats.applied == 0 || self.metrics.recoveries == 0 {
            return Err("View never recovered after a failed fetch".to_string());
        }
        self.event(SimEvent::warn(format!(
            "{} failed fetches, {} recoveries",
            stats.failed, self.metrics.recoveries
        )));

        self.stop().await
    }

    /// SKY-005: Stop/start cycles with control misuse in between.
    async fn restart(&mut self, duration: Duration) -> Check {
        let cycle = duration / RESTART_CYCLES;
        let mut seen: HashSet<TargetId> = HashSet::new();

        for round in 0..RESTART_CYCLES {
            self.start().await?;
            if round > 0 {
                self.metrics.restarts += 1;
            }

            let ids: HashSet<TargetId> = self
                .session
                .engine()
                .snapshot()
                .map_err(|err| format!("Snapshot after start failed: {}", err))?
                .targets()
                .iter()
                .map(|t| t.id)
                .collect();
            if !ids.is_disjoint(&seen) {
                return Err(format!("Round {} reused target ids", round));
            }
            seen.extend(ids);

            self.expect_rejected(true).await?;
            self.observe(cycle).await?;
            self.stop().await?;
            self.expect_rejected(false).await?;
        }

        self.observe(self.sample_interval * 10).await?;
        if !self.session.entities().is_empty() {
            return Err("Stale poll leaked into a stopped session".to_string());
        }
        Ok(())
    }

    /// Issues a start (while running) or a stop (while stopped) and
    /// expects it to be rejected without side effects.
    async fn expect_rejected(&mut self, running: bool) -> Check {
        let result = if running {
            self.session.start_simulation(self.config.clone()).await
        } else {
            self.session.stop_simulation().await
        };

        match result {
            Err(err) if err.kind() == ErrorKind::InvalidState => {
                self.metrics.rejected_controls += 1;
            }
            Err(err) => return Err(format!("Unexpected control error: {}", err)),
            Ok(()) => return Err("Invalid control request was accepted".to_string()),
        }

        let status = self.session.status();
        if status.running != running || status.last_control_error.is_none() {
            return Err("Rejected control request changed the session".to_string());
        }
        Ok(())
    }

    fn finish(
        mut self,
        scenario: ScenarioId,
        seed: u64,
        failure: Option<String>,
    ) -> (ScenarioResult, Option<SimExport>) {
        let stats = self.session.tracker().stats();
        self.metrics.polls_issued = stats.polls_issued;
        self.metrics.polls_applied = stats.applied;
        self.metrics.polls_superseded = stats.superseded;
        self.metrics.polls_stale = stats.stale;
        self.metrics.fetch_failures = stats.failed;
        self.metrics.offline_transitions = stats.offline_transitions;
        self.metrics.expired = stats.expired;

        let running_ticks = if self.session.status().running {
            self.session.engine().tick_count()
        } else {
            0
        };

        let passed = failure.is_none();
        if let Some(export) = &mut self.export {
            export.finalize(passed, failure.clone());
        }

        let result = ScenarioResult {
            scenario,
            seed,
            passed,
            total_ticks: self.ticks_before + running_ticks,
            final_time_secs: self.context.now().as_secs_f64(),
            final_entity_count: self.session.entities().len(),
            failure_reason: failure,
            metrics: self.metrics,
        };
        (result, self.export)
    }
}
