//! Configuration for the simulation, transport and reconciliation engines.

use crate::error::{ArenaError, RangeBound, Result};
use std::time::Duration;

// ============================================================================
// CONSTANTS
// ============================================================================

/// Side length of the square arena, in arena units.
pub const AREA_SIZE: f64 = 800.0;

// ============================================================================
// BOUNDS
// ============================================================================

/// Inclusive bounds plus the default used when the operator supplies nothing.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Bounds {
    pub min: f64,
    pub max: f64,
    pub default: f64,
}

impl Bounds {
    pub const fn new(min: f64, max: f64, default: f64) -> Self {
        Self { min, max, default }
    }

    /// Checks `value` against the bounds, naming `field` on failure.
    pub fn check(&self, field: &'static str, value: f64) -> Result<()> {
        if value.is_nan() {
            return Err(ArenaError::OutOfRange {
                field,
                value,
                bound: RangeBound::NotPositive,
            });
        }
        if value < self.min {
            return Err(ArenaError::OutOfRange {
                field,
                value,
                bound: RangeBound::Below { min: self.min },
            });
        }
        if value > self.max {
            return Err(ArenaError::OutOfRange {
                field,
                value,
                bound: RangeBound::Above { max: self.max },
            });
        }
        Ok(())
    }
}

/// Operator-facing limits checked when a simulation starts.
#[derive(Debug, Clone, PartialEq)]
pub struct Limits {
    pub target_count: Bounds,
    pub base_speed: Bounds,
    pub latency_ms: Bounds,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            target_count: Bounds::new(10.0, 500.0, 100.0),
            base_speed: Bounds::new(10.0, 100.0, 20.0),
            latency_ms: Bounds::new(10.0, 200.0, 20.0),
        }
    }
}

// ============================================================================
// SIMULATION (operator parameters)
// ============================================================================

/// Parameters supplied by the operator at start time.
#[derive(Debug, Clone, PartialEq)]
pub struct SimulationConfig {
    /// Number of targets to spawn
    pub target_count: u32,

    /// Base speed in units/second (jittered per target)
    pub base_speed: f64,

    /// Simulated round-trip latency of the transport
    pub latency_ms: u64,
}

impl SimulationConfig {
    pub fn new(target_count: u32, base_speed: f64, latency_ms: u64) -> Self {
        Self {
            target_count,
            base_speed,
            latency_ms,
        }
    }

    /// Validates every field against `limits`.
    pub fn validate(&self, limits: &Limits) -> Result<()> {
        limits
            .target_count
            .check("target_count", self.target_count as f64)?;
        limits.base_speed.check("base_speed", self.base_speed)?;
        limits.latency_ms.check("latency_ms", self.latency_ms as f64)?;
        Ok(())
    }
}

impl Default for SimulationConfig {
    fn default() -> Self {
        let limits = Limits::default();
        Self {
            target_count: limits.target_count.default as u32,
            base_speed: limits.base_speed.default,
            latency_ms: limits.latency_ms.default as u64,
        }
    }
}

// ============================================================================
// ENGINE
// ============================================================================

/// Physics and scheduling parameters of the simulation engine.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Arena side length (default: 800)
    pub area_size: f64,

    /// Nominal tick period (default: 10ms)
    pub tick_period: Duration,

    /// Interval between attrition passes (default: 1s)
    pub cull_interval: Duration,

    /// Per-target removal probability per attrition pass (default: 1%)
    pub cull_probability: f64,

    /// Relative speed jitter applied at creation (default: ±30%)
    pub speed_jitter: f64,

    /// Chance of a heading perturbation after a bounce (default: 30%)
    pub bounce_perturb_probability: f64,

    /// Maximum heading perturbation in degrees (default: 2.5)
    pub bounce_perturb_deg: f64,

    /// Operator limits
    pub limits: Limits,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            area_size: AREA_SIZE,
            tick_period: Duration::from_millis(10),
            cull_interval: Duration::from_millis(1000),
            cull_probability: 0.01,
            speed_jitter: 0.3,
            bounce_perturb_probability: 0.3,
            bounce_perturb_deg: 2.5,
            limits: Limits::default(),
        }
    }
}

impl EngineConfig {
    /// Sets the tick period.
    pub fn with_tick_period(mut self, period: Duration) -> Self {
        self.tick_period = period;
        self
    }

    /// Sets the attrition interval and per-pass probability.
    pub fn with_attrition(mut self, interval: Duration, probability: f64) -> Self {
        self.cull_interval = interval;
        self.cull_probability = probability.clamp(0.0, 1.0);
        self
    }

    /// Sets the bounce perturbation chance.
    pub fn with_bounce_perturbation(mut self, probability: f64) -> Self {
        self.bounce_perturb_probability = probability.clamp(0.0, 1.0);
        self
    }

    /// Sets the operator limits.
    pub fn with_limits(mut self, limits: Limits) -> Self {
        self.limits = limits;
        self
    }
}

// ============================================================================
// TRANSPORT
// ============================================================================

/// Parameters of the latency-emulating transport.
#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// Latency used while no simulation is running (default: 20ms)
    pub default_latency_ms: u64,

    /// Relative jitter around the latency (default: ±25%)
    pub jitter_ratio: f64,

    /// Probability that a fetch fails after its delay (default: 0)
    pub failure_rate: f64,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            default_latency_ms: 20,
            jitter_ratio: 0.25,
            failure_rate: 0.0,
        }
    }
}

impl TransportConfig {
    /// Sets the relative latency jitter.
    pub fn with_jitter(mut self, ratio: f64) -> Self {
        self.jitter_ratio = ratio.clamp(0.0, 1.0);
        self
    }

    /// Sets the injected fetch failure rate (0.0 - 1.0).
    pub fn with_failure_rate(mut self, rate: f64) -> Self {
        self.failure_rate = rate.clamp(0.0, 1.0);
        self
    }
}

// ============================================================================
// RECONCILIATION
// ============================================================================

/// Parameters of the reconciliation engine and its poll cadence.
#[derive(Debug, Clone, PartialEq)]
pub struct ReconciliationConfig {
    /// Absence after which an entity is dropped (default: 10s)
    pub offline_timeout: Duration,

    /// Interval between polls (default: 30 fps)
    pub poll_interval: Duration,

    /// Minimum spacing between merges before overlapping results are
    /// discarded (default: 100ms)
    pub min_update_interval: Duration,
}

impl Default for ReconciliationConfig {
    fn default() -> Self {
        Self {
            offline_timeout: Duration::from_secs(10),
            poll_interval: Duration::from_secs_f64(1.0 / 30.0),
            min_update_interval: Duration::from_millis(100),
        }
    }
}

impl ReconciliationConfig {
    /// Sets the offline timeout.
    pub fn with_offline_timeout(mut self, timeout: Duration) -> Self {
        self.offline_timeout = timeout;
        self
    }

    /// Derives the poll interval from a refresh rate in frames per second.
    pub fn with_refresh_rate(mut self, fps: f64) -> Result<Self> {
        self.poll_interval = fps_to_interval(fps)?;
        Ok(self)
    }

    /// Sets the poll interval directly.
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Sets the minimum update interval of the ordering guard.
    pub fn with_min_update_interval(mut self, interval: Duration) -> Self {
        self.min_update_interval = interval;
        self
    }

    /// Rejects a zero poll interval (it would spin the poll loop).
    pub fn validate(&self) -> Result<()> {
        if self.poll_interval.is_zero() {
            return Err(ArenaError::OutOfRange {
                field: "poll_interval_ms",
                value: 0.0,
                bound: RangeBound::NotPositive,
            });
        }
        Ok(())
    }
}

/// Converts frames per second to the interval between frames.
pub fn fps_to_interval(fps: f64) -> Result<Duration> {
    if !fps.is_finite() || fps <= 0.0 {
        return Err(ArenaError::OutOfRange {
            field: "fps",
            value: fps,
            bound: RangeBound::NotPositive,
        });
    }
    Ok(Duration::from_secs_f64(1.0 / fps))
}

// ============================================================================
// SESSION
// ============================================================================

/// Everything the control surface hands over when starting a session.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SessionConfig {
    pub simulation: SimulationConfig,
    pub reconciliation: ReconciliationConfig,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_simulation_config_is_valid() {
        let config = SimulationConfig::default();
        assert_eq!(config.target_count, 100);
        assert_eq!(config.latency_ms, 20);
        assert!(config.validate(&Limits::default()).is_ok());
    }

    #[test]
    fn test_validate_reports_first_violation() {
        let limits = Limits::default();

        let err = SimulationConfig::new(5, 20.0, 20).validate(&limits).unwrap_err();
        assert!(matches!(
            err,
            ArenaError::OutOfRange { field: "target_count", bound: RangeBound::Below { .. }, .. }
        ));

        let err = SimulationConfig::new(50, 101.0, 20).validate(&limits).unwrap_err();
        assert!(matches!(
            err,
            ArenaError::OutOfRange { field: "base_speed", bound: RangeBound::Above { .. }, .. }
        ));

        let err = SimulationConfig::new(50, 20.0, 500).validate(&limits).unwrap_err();
        assert!(matches!(err, ArenaError::OutOfRange { field: "latency_ms", .. }));
    }

    #[test]
    fn test_bounds_are_inclusive() {
        let limits = Limits::default();
        assert!(SimulationConfig::new(10, 10.0, 10).validate(&limits).is_ok());
        assert!(SimulationConfig::new(500, 100.0, 200).validate(&limits).is_ok());
    }

    #[test]
    fn test_nan_speed_rejected() {
        let err = SimulationConfig::new(50, f64::NAN, 20)
            .validate(&Limits::default())
            .unwrap_err();
        assert!(matches!(err, ArenaError::OutOfRange { field: "base_speed", .. }));
    }

    #[test]
    fn test_fps_to_interval() {
        assert_eq!(fps_to_interval(10.0).unwrap(), Duration::from_millis(100));
        assert!(fps_to_interval(0.0).is_err());
        assert!(fps_to_interval(-5.0).is_err());
        assert!(fps_to_interval(f64::INFINITY).is_err());
        assert!(fps_to_interval(f64::NAN).is_err());
    }

    #[test]
    fn test_refresh_rate_builder() {
        let config = ReconciliationConfig::default().with_refresh_rate(20.0).unwrap();
        assert_eq!(config.poll_interval, Duration::from_millis(50));

        let zero = ReconciliationConfig::default().with_poll_interval(Duration::ZERO);
        assert!(zero.validate().is_err());
    }
}
