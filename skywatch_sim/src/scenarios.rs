//! Scenario catalogue for the harness.

/// Scenario identifiers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScenarioId {
    /// SKY-001: Default run, bounds and steady polling
    Steady,

    /// SKY-002: Aggressive culling with a short offline timeout
    Attrition,

    /// SKY-003: High latency with a fast poll cadence
    Jitter,

    /// SKY-004: Transport drops 30% of fetches
    Flaky,

    /// SKY-005: Stop/start cycles
    Restart,
}

impl ScenarioId {
    /// Returns a list of all scenarios.
    pub fn all() -> Vec<ScenarioId> {
        vec![
            ScenarioId::Steady,
            ScenarioId::Attrition,
            ScenarioId::Jitter,
            ScenarioId::Flaky,
            ScenarioId::Restart,
        ]
    }

    /// Returns the scenario name.
    pub fn name(&self) -> &'static str {
        match self {
            ScenarioId::Steady => "steady",
            ScenarioId::Attrition => "attrition",
            ScenarioId::Jitter => "jitter",
            ScenarioId::Flaky => "flaky",
            ScenarioId::Restart => "restart",
        }
    }

    /// Returns a description of the scenario.
    pub fn description(&self) -> &'static str {
        match self {
            ScenarioId::Steady => "Targets stay in the arena and every poll lands in the view",
            ScenarioId::Attrition => "Culled targets go offline, then expire after the timeout",
            ScenarioId::Jitter => "Out-of-order fetches are superseded, the view never rolls back",
            ScenarioId::Flaky => "Failed fetches clear the view and later polls recover it",
            ScenarioId::Restart => "Restarts bring fresh ids, double stop is rejected",
        }
    }
}

impl std::fmt::Display for ScenarioId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl std::str::FromStr for ScenarioId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "steady" | "sky-001" => Ok(ScenarioId::Steady),
            "attrition" | "sky-002" => Ok(ScenarioId::Attrition),
            "jitter" | "sky-003" => Ok(ScenarioId::Jitter),
            "flaky" | "sky-004" => Ok(ScenarioId::Flaky),
            "restart" | "sky-005" => Ok(ScenarioId::Restart),
            _ => Err(format!("Unknown scenario: {}", s)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_names_round_trip_through_from_str() {
        for scenario in ScenarioId::all() {
            assert_eq!(scenario.name().parse::<ScenarioId>(), Ok(scenario));
            assert_eq!(scenario.to_string(), scenario.name());
        }
    }

    #[test]
    fn test_from_str_accepts_codes_and_case() {
        assert_eq!("SKY-003".parse::<ScenarioId>(), Ok(ScenarioId::Jitter));
        assert_eq!("Flaky".parse::<ScenarioId>(), Ok(ScenarioId::Flaky));
        assert!("time_warp".parse::<ScenarioId>().is_err());
    }
}
