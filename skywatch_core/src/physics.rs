//! Target kinematics: spawning, displacement, boundary reflection, attrition.
//!
//! Everything here is a pure function of its inputs plus an explicit RNG,
//! so the engine's tick loop and the tests drive exactly the same code.
//!
//! # Reflection model
//!
//! ```text
//!   heading' = 180 - heading    (left/right wall, mirrors the x component)
//!   heading' = -heading         (top/bottom wall, mirrors the y component)
//! ```
//!
//! The overshoot past a wall is folded back inside. A corner applies both
//! mirrors in sequence, which turns the heading around by 180°.

use crate::config::EngineConfig;
use crate::target::{normalize_heading, Target, TargetId};
use rand::Rng;

/// Which walls a target bounced off during one step.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Reflection {
    pub horizontal: bool,
    pub vertical: bool,
}

impl Reflection {
    pub fn bounced(&self) -> bool {
        self.horizontal || self.vertical
    }
}

/// Creates one target at a uniformly random position and heading.
pub fn spawn_target<R: Rng + ?Sized>(
    rng: &mut R,
    base_speed: f64,
    config: &EngineConfig,
) -> Target {
    let jitter = config.speed_jitter;
    let factor = if jitter > 0.0 {
        1.0 + rng.gen_range(-jitter..=jitter)
    } else {
        1.0
    };

    Target::new(
        TargetId::from_rng(rng),
        rng.gen_range(0.0..=config.area_size),
        rng.gen_range(0.0..=config.area_size),
        rng.gen_range(0.0..360.0),
        base_speed * factor,
    )
}

/// Creates `count` fresh targets.
pub fn spawn_targets<R: Rng + ?Sized>(
    rng: &mut R,
    count: u32,
    base_speed: f64,
    config: &EngineConfig,
) -> Vec<Target> {
    (0..count)
        .map(|_| spawn_target(rng, base_speed, config))
        .collect()
}

/// Removes each target independently with probability `probability`.
pub fn cull<R: Rng + ?Sized>(targets: &[Target], probability: f64, rng: &mut R) -> Vec<Target> {
    let p = probability.clamp(0.0, 1.0);
    targets
        .iter()
        .filter(|_| !rng.gen_bool(p))
        .cloned()
        .collect()
}

/// Folds a coordinate back into `[0, max]`.
fn reflect_axis(value: f64, max: f64) -> (f64, bool) {
    if value < 0.0 {
        ((-value).min(max), true)
    } else if value > max {
        ((max - (value - max)).max(0.0), true)
    } else {
        (value, false)
    }
}

/// Moves a target for `dt_secs` and applies wall reflections.
///
/// Deterministic: no heading perturbation is applied here.
pub fn advance(target: &Target, dt_secs: f64, area_size: f64) -> (Target, Reflection) {
    let projected = target.position() + target.direction() * (target.speed * dt_secs);
    let mut heading = target.heading;

    let (x, horizontal) = reflect_axis(projected.x, area_size);
    if horizontal {
        heading = 180.0 - heading;
    }

    let (y, vertical) = reflect_axis(projected.y, area_size);
    if vertical {
        heading = -heading;
    }

    let next = Target {
        x,
        y,
        heading: normalize_heading(heading),
        ..target.clone()
    };

    (next, Reflection { horizontal, vertical })
}

/// Advances every target by one tick, perturbing headings after bounces.
pub fn step<R: Rng + ?Sized>(
    targets: &[Target],
    dt_secs: f64,
    config: &EngineConfig,
    rng: &mut R,
) -> Vec<Target> {
    let perturb = config.bounce_perturb_deg;
    let chance = config.bounce_perturb_probability.clamp(0.0, 1.0);

    targets
        .iter()
        .map(|target| {
            let (mut next, reflection) = advance(target, dt_secs, config.area_size);
            if reflection.bounced() && perturb > 0.0 && rng.gen_bool(chance) {
                next.heading = normalize_heading(next.heading + rng.gen_range(-perturb..=perturb));
            }
            next
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AREA_SIZE;
    use approx::assert_relative_eq;
    use proptest::prelude::*;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    fn target(x: f64, y: f64, heading: f64, speed: f64) -> Target {
        Target::new(TargetId::from_seed(1), x, y, heading, speed)
    }

    #[test]
    fn test_free_flight_displacement() {
        let t = target(100.0, 100.0, 90.0, 20.0);
        let (next, reflection) = advance(&t, 0.5, AREA_SIZE);

        assert!(!reflection.bounced());
        assert_relative_eq!(next.x, 100.0, epsilon = 1e-9);
        assert_relative_eq!(next.y, 110.0, epsilon = 1e-9);
        assert_eq!(next.heading, 90.0);
        assert_eq!(next.speed, 20.0);
    }

    #[test]
    fn test_right_wall_reflection() {
        // Displacement 3 from x = 799 overshoots by 2
        let t = target(AREA_SIZE - 1.0, 400.0, 0.0, 30.0);
        let (next, reflection) = advance(&t, 0.1, AREA_SIZE);

        assert!(reflection.horizontal);
        assert!(!reflection.vertical);
        assert_relative_eq!(next.x, AREA_SIZE - 2.0, epsilon = 1e-9);
        assert_relative_eq!(next.heading, 180.0, epsilon = 1e-9);
    }

    #[test]
    fn test_left_wall_reflection() {
        let t = target(1.0, 400.0, 180.0, 30.0);
        let (next, reflection) = advance(&t, 0.1, AREA_SIZE);

        assert!(reflection.horizontal);
        assert_relative_eq!(next.x, 2.0, epsilon = 1e-9);
        assert_relative_eq!(next.heading, 0.0, epsilon = 1e-9);
    }

    #[test]
    fn test_top_wall_reflection() {
        let t = target(400.0, 1.0, 270.0, 30.0);
        let (next, reflection) = advance(&t, 0.1, AREA_SIZE);

        assert!(reflection.vertical);
        assert_relative_eq!(next.y, 2.0, epsilon = 1e-9);
        assert_relative_eq!(next.heading, 90.0, epsilon = 1e-9);
    }

    #[test]
    fn test_corner_reflection_reverses_heading() {
        let t = target(AREA_SIZE - 1.0, AREA_SIZE - 1.0, 45.0, 100.0);
        let (next, reflection) = advance(&t, 0.1, AREA_SIZE);

        assert!(reflection.horizontal && reflection.vertical);
        assert_relative_eq!(next.heading, 225.0, epsilon = 1e-9);
        assert!(next.x <= AREA_SIZE && next.y <= AREA_SIZE);
    }

    #[test]
    fn test_huge_overshoot_is_clamped() {
        let t = target(10.0, 400.0, 180.0, 10_000.0);
        let (next, _) = advance(&t, 1.0, AREA_SIZE);
        assert_eq!(next.x, AREA_SIZE);
    }

    #[test]
    fn test_perturbation_only_after_bounce() {
        let config = EngineConfig::default().with_bounce_perturbation(1.0);
        let mut rng = ChaCha8Rng::seed_from_u64(3);

        let free = vec![target(400.0, 400.0, 10.0, 20.0)];
        let moved = step(&free, 0.1, &config, &mut rng);
        assert_eq!(moved[0].heading, 10.0);

        let bouncing = vec![target(AREA_SIZE - 0.5, 400.0, 0.0, 20.0)];
        let bounced = step(&bouncing, 0.1, &config, &mut rng);
        let offset = (bounced[0].heading - 180.0).abs();
        assert!(offset <= 2.5 + 1e-9);
    }

    #[test]
    fn test_spawned_targets_respect_bounds() {
        let config = EngineConfig::default();
        let mut rng = ChaCha8Rng::seed_from_u64(11);
        let targets = spawn_targets(&mut rng, 200, 20.0, &config);

        assert_eq!(targets.len(), 200);
        for t in &targets {
            assert!((0.0..=AREA_SIZE).contains(&t.x));
            assert!((0.0..=AREA_SIZE).contains(&t.y));
            assert!((0.0..360.0).contains(&t.heading));
            assert!(t.speed >= 14.0 - 1e-9 && t.speed <= 26.0 + 1e-9);
        }
    }

    #[test]
    fn test_cull_extremes() {
        let mut rng = ChaCha8Rng::seed_from_u64(5);
        let targets = spawn_targets(&mut rng, 50, 20.0, &EngineConfig::default());

        assert_eq!(cull(&targets, 0.0, &mut rng).len(), 50);
        assert!(cull(&targets, 1.0, &mut rng).is_empty());

        let survivors = cull(&targets, 0.5, &mut rng);
        assert!(survivors.iter().all(|s| targets.contains(s)));
    }

    proptest! {
        #[test]
        fn prop_step_keeps_targets_in_arena(
            x in 0.0..=AREA_SIZE,
            y in 0.0..=AREA_SIZE,
            heading in 0.0..360.0f64,
            speed in 0.0..200.0f64,
            dt in 0.0..2.0f64,
            seed in any::<u64>(),
        ) {
            let config = EngineConfig::default();
            let mut rng = ChaCha8Rng::seed_from_u64(seed);
            let next = step(&[target(x, y, heading, speed)], dt, &config, &mut rng);

            prop_assert!((0.0..=AREA_SIZE).contains(&next[0].x));
            prop_assert!((0.0..=AREA_SIZE).contains(&next[0].y));
            prop_assert!((0.0..360.0).contains(&next[0].heading));
        }
    }
}
