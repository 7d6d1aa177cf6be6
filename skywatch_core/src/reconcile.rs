//! The "RECONCILIATION" Engine - latency-tolerant entity view
//!
//! Pulls snapshots through the [`Transport`] and folds them into a keyed
//! view that outlives the targets themselves:
//!
//! 1. **Upsert** every target present in the snapshot as `Active`
//! 2. **Demote** entities missing from the snapshot to `Offline`
//! 3. **Expire** entities missing for at least `offline_timeout`
//!
//! Polls overlap freely. Instead of holding a lock across the fetch, every
//! poll carries a sequence number and the tracking generation it was issued
//! in; the completion path uses both to discard results that would roll the
//! view back or leak into a reset session.

use crate::config::ReconciliationConfig;
use crate::error::{ArenaError, ErrorKind};
use crate::target::{Target, TargetId};
use crate::transport::Transport;

use serde::{Deserialize, Serialize};
use skywatch_env::ArenaContext;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, warn};

// ============================================================================
// ENTITY VIEW
// ============================================================================

/// Liveness classification of a reconciled entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Liveness {
    /// Present in the most recent applied snapshot
    Active,
    /// Missing from the latest snapshot but within the offline timeout
    Offline,
}

/// Reconciled state of one target id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityView {
    /// Last reported target state
    #[serde(flatten)]
    pub target: Target,

    /// Context time of the most recent snapshot containing this id
    pub last_seen_at: Duration,

    pub liveness: Liveness,
}

impl EntityView {
    /// A fresh sighting.
    pub fn seen(target: Target, now: Duration) -> Self {
        Self {
            target,
            last_seen_at: now,
            liveness: Liveness::Active,
        }
    }

    pub fn id(&self) -> TargetId {
        self.target.id
    }

    pub fn is_active(&self) -> bool {
        self.liveness == Liveness::Active
    }

    /// How long the entity has been missing as of `now`.
    pub fn absent_for(&self, now: Duration) -> Duration {
        now.saturating_sub(self.last_seen_at)
    }
}

/// The keyed view; ordered so iteration is deterministic.
pub type EntityMap = BTreeMap<TargetId, EntityView>;

// ============================================================================
// MERGE
// ============================================================================

/// Counts produced by one merge.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MergeSummary {
    /// Ids present in the snapshot
    pub active: usize,
    /// Ids kept as offline
    pub offline: usize,
    /// Ids seen for the first time (or again after expiring)
    pub appeared: usize,
    /// Previously offline ids that came back
    pub returned: usize,
    /// Ids that just went offline
    pub went_offline: usize,
    /// Ids dropped because their absence reached the timeout
    pub expired: usize,
}

/// Builds the next view from the previous one and a snapshot.
pub fn merge(
    previous: &EntityMap,
    snapshot: &[Target],
    now: Duration,
    offline_timeout: Duration,
) -> (EntityMap, MergeSummary) {
    let mut next = EntityMap::new();
    let mut summary = MergeSummary::default();

    for target in snapshot {
        match previous.get(&target.id) {
            None => summary.appeared += 1,
            Some(old) if !old.is_active() => summary.returned += 1,
            Some(_) => {}
        }
        next.insert(target.id, EntityView::seen(target.clone(), now));
    }
    summary.active = next.len();

    for (id, view) in previous {
        if next.contains_key(id) {
            continue;
        }
        if view.absent_for(now) < offline_timeout {
            if view.is_active() {
                summary.went_offline += 1;
            }
            next.insert(
                *id,
                EntityView {
                    liveness: Liveness::Offline,
                    ..view.clone()
                },
            );
            summary.offline += 1;
        } else {
            summary.expired += 1;
        }
    }

    (next, summary)
}

// ============================================================================
// POLLING
// ============================================================================

/// What a single [`Tracker::poll`] did.
#[derive(Debug, Clone, PartialEq)]
pub enum PollOutcome {
    /// Snapshot merged into the view
    Applied { seq: u64, tick: u64, summary: MergeSummary },
    /// A newer poll was issued and the view was updated too recently
    Superseded { seq: u64 },
    /// Tracking was reset while the fetch was in flight
    Stale { seq: u64 },
    /// Engine not running; the view was cleared
    NotRunning,
    /// Fetch failed; the view was cleared
    FetchFailed(ArenaError),
}

impl PollOutcome {
    pub fn is_applied(&self) -> bool {
        matches!(self, PollOutcome::Applied { .. })
    }
}

/// Running counters over the tracker's lifetime.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TrackerStats {
    pub polls_issued: u64,
    pub applied: u64,
    pub superseded: u64,
    pub stale: u64,
    pub failed: u64,
    pub not_running: u64,
    pub offline_transitions: u64,
    pub expired: u64,
}

/// Shared view published to subscribers after every change.
pub type ViewUpdate = Arc<Vec<EntityView>>;

struct TrackerState {
    config: ReconciliationConfig,

    /// Bumped by every reset; in-flight polls from older generations are stale
    generation: u64,

    /// Highest sequence number handed out
    latest_issued: u64,

    /// Sequence number and snapshot tick of the last applied merge
    last_applied_seq: u64,
    last_applied_tick: Option<u64>,

    /// Context time of the last applied merge
    last_merge_at: Option<Duration>,

    view: EntityMap,
    last_fetch_error: Option<ArenaError>,
    stats: TrackerStats,
}

/// Decrements the in-flight counter when a poll finishes or is cancelled.
struct InFlight<'a>(&'a AtomicUsize);

impl<'a> InFlight<'a> {
    fn enter(counter: &'a AtomicUsize) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(counter)
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// The reconciliation engine.
pub struct Tracker<Ctx: ArenaContext> {
    context: Arc<Ctx>,
    transport: Arc<Transport<Ctx>>,
    in_flight: AtomicUsize,
    state: Mutex<TrackerState>,
    updates: watch::Sender<ViewUpdate>,
}

impl<Ctx: ArenaContext> Tracker<Ctx> {
    /// Creates a tracker with an empty view.
    pub fn new(
        context: Arc<Ctx>,
        transport: Arc<Transport<Ctx>>,
        config: ReconciliationConfig,
    ) -> Self {
        let (updates, _) = watch::channel(Arc::new(Vec::new()));

        Self {
            context,
            transport,
            in_flight: AtomicUsize::new(0),
            state: Mutex::new(TrackerState {
                config,
                generation: 0,
                latest_issued: 0,
                last_applied_seq: 0,
                last_applied_tick: None,
                last_merge_at: None,
                view: EntityMap::new(),
                last_fetch_error: None,
                stats: TrackerStats::default(),
            }),
            updates,
        }
    }

    fn lock(&self) -> MutexGuard<'_, TrackerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn publish(&self, view: &EntityMap) {
        self.updates
            .send_replace(Arc::new(view.values().cloned().collect()));
    }

    /// Replaces the configuration used by subsequent merges.
    pub fn reconfigure(&self, config: ReconciliationConfig) {
        self.lock().config = config;
    }

    pub fn config(&self) -> ReconciliationConfig {
        self.lock().config.clone()
    }

    /// Begins a new tracking session.
    ///
    /// Empties the view and the sequencing state. Polls still in flight
    /// belong to the previous generation and are discarded on completion.
    pub fn start_tracking(&self) {
        let mut state = self.lock();
        state.generation += 1;
        state.last_applied_seq = 0;
        state.last_applied_tick = None;
        state.last_merge_at = None;
        state.last_fetch_error = None;
        state.view.clear();
        self.publish(&state.view);

        info!("Tracking started (generation {})", state.generation);
    }

    /// Clears the view when the engine is gone, without touching sequencing.
    fn clear_view(&self, state: &mut TrackerState) {
        if !state.view.is_empty() {
            state.view.clear();
            self.publish(&state.view);
        }
    }

    /// Runs one fetch-and-merge cycle.
    ///
    /// Safe to call repeatedly and concurrently; see [`PollOutcome`] for
    /// the possible results. Never fails: fetch errors are recorded and
    /// reported through the outcome.
    pub async fn poll(&self) -> PollOutcome {
        if !self.transport.is_running() {
            let mut state = self.lock();
            state.stats.not_running += 1;
            self.clear_view(&mut state);
            return PollOutcome::NotRunning;
        }

        let (seq, generation) = {
            let mut state = self.lock();
            state.latest_issued += 1;
            state.stats.polls_issued += 1;
            (state.latest_issued, state.generation)
        };

        let fetched = {
            let _flight = InFlight::enter(&self.in_flight);
            self.transport.fetch_snapshot().await
        };

        let now = self.context.now();
        let mut state = self.lock();

        if state.generation != generation {
            state.stats.stale += 1;
            debug!("Poll #{} completed after a reset, discarded", seq);
            return PollOutcome::Stale { seq };
        }

        let newer_issued = seq < state.latest_issued;
        let too_soon = state
            .last_merge_at
            .is_some_and(|at| now.saturating_sub(at) < state.config.min_update_interval);
        if newer_issued && too_soon {
            state.stats.superseded += 1;
            debug!(
                "Poll #{} superseded (latest #{}, last applied #{})",
                seq, state.latest_issued, state.last_applied_seq
            );
            return PollOutcome::Superseded { seq };
        }

        let snapshot = match fetched {
            Ok(snapshot) => snapshot,
            Err(err) if err.kind() == ErrorKind::InvalidState => {
                // Engine stopped while the request was in flight
                state.stats.not_running += 1;
                self.clear_view(&mut state);
                return PollOutcome::NotRunning;
            }
            Err(err) => {
                warn!("Poll #{} failed, clearing {} entities: {}", seq, state.view.len(), err);
                state.stats.failed += 1;
                state.last_fetch_error = Some(err.clone());
                self.clear_view(&mut state);
                return PollOutcome::FetchFailed(err);
            }
        };

        // Merge timestamps never run backwards
        let now = state.last_merge_at.map_or(now, |at| now.max(at));
        let offline_timeout = state.config.offline_timeout;
        let (view, summary) = merge(&state.view, snapshot.targets(), now, offline_timeout);

        state.view = view;
        state.last_merge_at = Some(now);
        state.last_applied_seq = seq;
        state.last_applied_tick = Some(snapshot.tick);
        state.last_fetch_error = None;
        state.stats.applied += 1;
        state.stats.offline_transitions += summary.went_offline as u64;
        state.stats.expired += summary.expired as u64;
        self.publish(&state.view);

        debug!(
            "Poll #{} applied tick {}: {} active, {} offline, {} expired",
            seq, snapshot.tick, summary.active, summary.offline, summary.expired
        );
        PollOutcome::Applied {
            seq,
            tick: snapshot.tick,
            summary,
        }
    }

    /// Current view as a list ordered by id.
    pub fn entities(&self) -> Vec<EntityView> {
        self.lock().view.values().cloned().collect()
    }

    pub fn entity(&self, id: TargetId) -> Option<EntityView> {
        self.lock().view.get(&id).cloned()
    }

    pub fn len(&self) -> usize {
        self.lock().view.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().view.is_empty()
    }

    /// True while at least one fetch is in flight.
    pub fn is_fetching(&self) -> bool {
        self.in_flight.load(Ordering::SeqCst) > 0
    }

    pub fn last_fetch_error(&self) -> Option<ArenaError> {
        self.lock().last_fetch_error.clone()
    }

    pub fn last_merge_at(&self) -> Option<Duration> {
        self.lock().last_merge_at
    }

    pub fn last_applied_tick(&self) -> Option<u64> {
        self.lock().last_applied_tick
    }

    pub fn stats(&self) -> TrackerStats {
        self.lock().stats
    }

    /// Subscribes to view updates (published after every merge or clear).
    pub fn subscribe(&self) -> watch::Receiver<ViewUpdate> {
        self.updates.subscribe()
    }
}
