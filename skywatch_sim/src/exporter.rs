//! JSON exporter for external renderers.
//!
//! Exports the engine's targets next to the reconciled view, frame by frame.

use serde::{Deserialize, Serialize};
use skywatch_core::{EntityView, Liveness, Target};
use std::fs::File;
use std::io::Write;
use std::path::Path;
use std::time::Duration;

/// A single frame of simulation data.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimFrame {
    /// Simulation time in seconds
    pub time_sec: f64,

    /// Engine tick at capture time
    pub tick: u64,

    /// Targets as the engine holds them
    pub targets: Vec<TargetPosition>,

    /// Reconciled view as an operator would see it
    pub entities: Vec<EntityFrame>,

    /// Events (restarts, failures, etc.)
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub events: Vec<SimEvent>,
}

/// Position of an engine target.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TargetPosition {
    pub id: String,
    pub x: f64,
    pub y: f64,
    pub heading: f64,
}

impl From<&Target> for TargetPosition {
    fn from(target: &Target) -> Self {
        Self {
            id: target.id.as_uuid().to_string(),
            x: target.x,
            y: target.y,
            heading: target.heading,
        }
    }
}

/// One reconciled entity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntityFrame {
    pub id: String,
    pub x: f64,
    pub y: f64,
    pub heading: f64,
    pub liveness: Liveness,

    /// Seconds since the entity was last seen (0 while active)
    pub absent_sec: f64,
}

impl EntityFrame {
    pub fn new(view: &EntityView, now: Duration) -> Self {
        Self {
            id: view.id().as_uuid().to_string(),
            x: view.target.x,
            y: view.target.y,
            heading: view.target.heading,
            liveness: view.liveness,
            absent_sec: view.absent_for(now).as_secs_f64(),
        }
    }
}

/// Simulation event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimEvent {
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub level: Option<String>,
}

impl SimEvent {
    pub fn info(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            level: None,
        }
    }

    pub fn warn(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            level: Some("warn".to_string()),
        }
    }
}

/// Complete simulation export.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimExport {
    /// Scenario name
    pub scenario: String,

    /// Seed used
    pub seed: u64,

    /// Offline timeout in human form
    pub offline_timeout: String,

    /// Duration in seconds
    pub duration_sec: f64,

    /// All frames
    pub frames: Vec<SimFrame>,

    /// Final results
    pub passed: bool,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<String>,

    /// Events waiting for the next frame
    #[serde(skip)]
    pending_events: Vec<SimEvent>,
}

impl SimExport {
    /// Creates a new export container.
    pub fn new(scenario: &str, seed: u64, offline_timeout: String) -> Self {
        Self {
            scenario: scenario.to_string(),
            seed,
            offline_timeout,
            duration_sec: 0.0,
            frames: Vec::new(),
            passed: false,
            failure_reason: None,
            pending_events: Vec::new(),
        }
    }

    /// Adds a frame, carrying any events recorded since the previous one.
    pub fn add_frame(&mut self, mut frame: SimFrame) {
        if !self.pending_events.is_empty() {
            let mut events = std::mem::take(&mut self.pending_events);
            events.append(&mut frame.events);
            frame.events = events;
        }
        self.duration_sec = frame.time_sec;
        self.frames.push(frame);
    }

    /// Records an event; it is attached to the next frame added.
    pub fn add_event(&mut self, event: SimEvent) {
        self.pending_events.push(event);
    }

    /// Finalizes the export.
    ///
    /// Events with no later frame go to the last frame.
    pub fn finalize(&mut self, passed: bool, failure_reason: Option<String>) {
        let pending = std::mem::take(&mut self.pending_events);
        if let Some(frame) = self.frames.last_mut() {
            frame.events.extend(pending);
        }
        self.passed = passed;
        self.failure_reason = failure_reason;
    }

    /// Writes to a JSON file.
    pub fn write_to_file(&self, path: impl AsRef<Path>) -> std::io::Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        let mut file = File::create(path)?;
        file.write_all(json.as_bytes())?;
        Ok(())
    }
}
