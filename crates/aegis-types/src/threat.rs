//! Threat levels and monitor state snapshots.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Discrete threat level. Transitions are always single-step: the
/// monitor never jumps a level in one transition.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ThreatLevel {
    Normal,
    Elevated,
    High,
    Critical,
}

impl ThreatLevel {
    /// The next level up, saturating at `Critical`.
    pub fn step_up(self) -> ThreatLevel {
        match self {
            ThreatLevel::Normal => ThreatLevel::Elevated,
            ThreatLevel::Elevated => ThreatLevel::High,
            ThreatLevel::High => ThreatLevel::Critical,
            ThreatLevel::Critical => ThreatLevel::Critical,
        }
    }

    /// The next level down, saturating at `Normal`.
    pub fn step_down(self) -> ThreatLevel {
        match self {
            ThreatLevel::Normal => ThreatLevel::Normal,
            ThreatLevel::Elevated => ThreatLevel::Normal,
            ThreatLevel::High => ThreatLevel::Elevated,
            ThreatLevel::Critical => ThreatLevel::High,
        }
    }

    /// Whether this level warrants opening an incident.
    pub fn is_dispatchable(self) -> bool {
        matches!(self, ThreatLevel::High | ThreatLevel::Critical)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ThreatLevel::Normal => "NORMAL",
            ThreatLevel::Elevated => "ELEVATED",
            ThreatLevel::High => "HIGH",
            ThreatLevel::Critical => "CRITICAL",
        }
    }
}

/// Snapshot of the monitor's running threat assessment.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct ThreatState {
    pub level: ThreatLevel,
    /// Smoothed risk score in [0, 100].
    pub score: f64,
    pub updated_at: DateTime<Utc>,
}

/// One hysteresis transition between adjacent levels.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct ThreatTransition {
    pub from: ThreatLevel,
    pub to: ThreatLevel,
    /// Smoothed score at the moment of transition.
    pub score: f64,
    pub at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn levels_are_ordered() {
        assert!(ThreatLevel::Normal < ThreatLevel::Elevated);
        assert!(ThreatLevel::High < ThreatLevel::Critical);
    }

    #[test]
    fn stepping_saturates_at_the_ends() {
        assert_eq!(ThreatLevel::Critical.step_up(), ThreatLevel::Critical);
        assert_eq!(ThreatLevel::Normal.step_down(), ThreatLevel::Normal);
    }

    #[test]
    fn only_high_and_critical_dispatch() {
        assert!(!ThreatLevel::Normal.is_dispatchable());
        assert!(!ThreatLevel::Elevated.is_dispatchable());
        assert!(ThreatLevel::High.is_dispatchable());
        assert!(ThreatLevel::Critical.is_dispatchable());
    }
}
