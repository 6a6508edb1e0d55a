//! Engine configuration.
//!
//! One struct per concern, composed into [`EngineConfig`]. Defaults
//! carry the documented operating values; deployments override through
//! serde (the whole tree round-trips as JSON).

use serde::{Deserialize, Serialize};

use crate::action::ActionKind;

/// Complete engine configuration.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct EngineConfig {
    pub threat: ThreatConfig,
    pub dispatch: DispatchConfig,
    pub ranking: RankingConfig,
    pub actions: ActionConfig,
}

/// Threat monitor smoothing and hysteresis.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ThreatConfig {
    /// EWMA weight given to each new sample.
    pub ewma_alpha: f64,
    /// Smoothed-score thresholds for ELEVATED / HIGH / CRITICAL.
    pub escalate_thresholds: [f64; 3],
    /// Consecutive qualifying samples required to step up one level.
    pub escalate_streak: u32,
    /// Consecutive qualifying samples required to step down one level.
    pub deescalate_streak: u32,
    /// De-escalation requires the score below `threshold - margin`,
    /// which keeps the level from flapping around a boundary.
    pub deescalate_margin: f64,
}

impl Default for ThreatConfig {
    fn default() -> Self {
        Self {
            ewma_alpha: 0.3,
            escalate_thresholds: [30.0, 60.0, 85.0],
            escalate_streak: 2,
            deescalate_streak: 3,
            deescalate_margin: 10.0,
        }
    }
}

/// Dispatch rounds, escalation, and deadlines.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DispatchConfig {
    /// Search radius for the first round, in meters.
    pub initial_radius_meters: f64,
    /// Radius growth factor per escalation round.
    pub radius_multiplier: f64,
    /// Hard cap on the widened radius.
    pub max_radius_meters: f64,
    /// Maximum number of dispatch rounds before the incident expires.
    pub max_rounds: u32,
    /// Per-round acknowledgement deadline, in seconds.
    pub round_deadline_secs: u64,
    /// Overall incident maximum from OPEN, in seconds.
    pub incident_max_secs: u64,
    /// Tier-1 candidate count for a HIGH incident.
    pub high_candidates: usize,
    /// Tier-1 candidate count for a CRITICAL incident.
    pub critical_candidates: usize,
    /// Acknowledgement threshold: `min(min_acks, ceil(fraction * candidates))`.
    pub min_acks: usize,
    pub ack_fraction: f64,
    /// Actions auto-started when a HIGH incident opens.
    pub auto_actions_high: Vec<ActionKind>,
    /// Actions auto-started when a CRITICAL incident opens (the
    /// original panic-button burst).
    pub auto_actions_critical: Vec<ActionKind>,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            initial_radius_meters: 500.0,
            radius_multiplier: 1.5,
            max_radius_meters: 5_000.0,
            max_rounds: 3,
            round_deadline_secs: 60,
            incident_max_secs: 30 * 60,
            high_candidates: 5,
            critical_candidates: 10,
            min_acks: 1,
            ack_fraction: 0.3,
            auto_actions_high: vec![ActionKind::LocationShare, ActionKind::SendSms],
            auto_actions_critical: vec![
                ActionKind::Siren,
                ActionKind::LocationShare,
                ActionKind::RecordAudio,
                ActionKind::SendSms,
            ],
        }
    }
}

impl DispatchConfig {
    /// Acks needed before a round is considered answered.
    pub fn ack_threshold(&self, candidates: usize) -> usize {
        let fractional = (self.ack_fraction * candidates as f64).ceil() as usize;
        self.min_acks.min(fractional).max(1)
    }

    pub fn candidates_for(&self, level: crate::threat::ThreatLevel) -> usize {
        match level {
            crate::threat::ThreatLevel::Critical => self.critical_candidates,
            _ => self.high_candidates,
        }
    }
}

/// Guardian ranking weights and history windows.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RankingConfig {
    pub distance_weight: f64,
    pub rating_weight: f64,
    pub latency_weight: f64,
    /// Bounded moving-average window for response latency.
    pub latency_window: u32,
    /// Rating gained per acknowledgement, clamped to [0, 5].
    pub rating_recovery: f64,
    /// Rating lost per timeout, clamped to [0, 5].
    pub rating_decay: f64,
}

impl Default for RankingConfig {
    fn default() -> Self {
        Self {
            distance_weight: 0.5,
            rating_weight: 0.3,
            latency_weight: 0.2,
            latency_window: 20,
            rating_recovery: 0.1,
            rating_decay: 0.25,
        }
    }
}

/// Side-action retry policy.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ActionConfig {
    /// Maximum automatic retries of a transient collaborator failure.
    pub max_retries: u32,
    pub retry_backoff_ms: u64,
}

impl Default for ActionConfig {
    fn default() -> Self {
        Self {
            max_retries: 2,
            retry_backoff_ms: 250,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::threat::ThreatLevel;

    #[test]
    fn defaults_match_documented_values() {
        let cfg = EngineConfig::default();
        assert_eq!(cfg.threat.ewma_alpha, 0.3);
        assert_eq!(cfg.threat.escalate_thresholds, [30.0, 60.0, 85.0]);
        assert_eq!(cfg.dispatch.max_rounds, 3);
        assert_eq!(cfg.dispatch.round_deadline_secs, 60);
        assert_eq!(cfg.dispatch.incident_max_secs, 1800);
        assert_eq!(cfg.ranking.distance_weight, 0.5);
        assert_eq!(cfg.actions.max_retries, 2);
    }

    #[test]
    fn ack_threshold_takes_the_smaller_rule() {
        let cfg = DispatchConfig::default();
        // min_acks = 1 beats 30% of 10.
        assert_eq!(cfg.ack_threshold(10), 1);

        let strict = DispatchConfig {
            min_acks: 5,
            ..DispatchConfig::default()
        };
        // 30% of 5 candidates = 2, smaller than min_acks = 5.
        assert_eq!(strict.ack_threshold(5), 2);
    }

    #[test]
    fn candidate_counts_follow_level() {
        let cfg = DispatchConfig::default();
        assert_eq!(cfg.candidates_for(ThreatLevel::High), 5);
        assert_eq!(cfg.candidates_for(ThreatLevel::Critical), 10);
    }

    #[test]
    fn config_round_trips_as_json() {
        let cfg = EngineConfig::default();
        let json = serde_json::to_string(&cfg).unwrap();
        let back: EngineConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back.dispatch.high_candidates, cfg.dispatch.high_candidates);
    }
}
