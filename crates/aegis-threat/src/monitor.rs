use chrono::Utc;

use aegis_types::{ThreatConfig, ThreatLevel, ThreatState, ThreatTransition};

use crate::error::ThreatError;

/// Result of folding one sample into the monitor.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SampleOutcome {
    pub state: ThreatState,
    /// Present only when this sample crossed a hysteresis boundary.
    pub transition: Option<ThreatTransition>,
}

/// Hysteresis-based threat state machine.
///
/// Each sample is folded into an exponentially weighted moving average
/// (the first sample initializes it). Escalation requires the smoothed
/// score at or above the next level's threshold for a configured run of
/// consecutive samples; de-escalation requires it below the current
/// level's threshold minus a margin for a longer run. Both runs reset
/// whenever a sample breaks them, so the level cannot flap around a
/// boundary, and every transition moves exactly one level.
pub struct ThreatMonitor {
    cfg: ThreatConfig,
    score: Option<f64>,
    level: ThreatLevel,
    up_streak: u32,
    down_streak: u32,
    updated_at: chrono::DateTime<Utc>,
}

impl ThreatMonitor {
    pub fn new(cfg: ThreatConfig) -> Self {
        Self {
            cfg,
            score: None,
            level: ThreatLevel::Normal,
            up_streak: 0,
            down_streak: 0,
            updated_at: Utc::now(),
        }
    }

    /// Current smoothed assessment. A monitor that has seen no samples
    /// reports NORMAL with a zero score.
    pub fn state(&self) -> ThreatState {
        ThreatState {
            level: self.level,
            score: self.score.unwrap_or(0.0),
            updated_at: self.updated_at,
        }
    }

    /// Fold one bounded-range risk signal into the running score.
    pub fn sample(&mut self, signal: f64) -> Result<SampleOutcome, ThreatError> {
        if !signal.is_finite() || !(0.0..=100.0).contains(&signal) {
            return Err(ThreatError::SignalOutOfRange(signal));
        }

        let score = match self.score {
            None => signal,
            Some(previous) => {
                self.cfg.ewma_alpha * signal + (1.0 - self.cfg.ewma_alpha) * previous
            }
        };
        self.score = Some(score);
        self.updated_at = Utc::now();

        match self.escalation_threshold() {
            Some(threshold) if score >= threshold => self.up_streak += 1,
            _ => self.up_streak = 0,
        }
        match self.deescalation_floor() {
            Some(floor) if score < floor => self.down_streak += 1,
            _ => self.down_streak = 0,
        }

        let transition = if self.up_streak >= self.cfg.escalate_streak {
            Some(self.shift(self.level.step_up(), score))
        } else if self.down_streak >= self.cfg.deescalate_streak {
            Some(self.shift(self.level.step_down(), score))
        } else {
            None
        };

        Ok(SampleOutcome {
            state: self.state(),
            transition,
        })
    }

    /// Threshold the smoothed score must reach to step up from the
    /// current level, if any level remains above.
    fn escalation_threshold(&self) -> Option<f64> {
        let [elevated, high, critical] = self.cfg.escalate_thresholds;
        match self.level {
            ThreatLevel::Normal => Some(elevated),
            ThreatLevel::Elevated => Some(high),
            ThreatLevel::High => Some(critical),
            ThreatLevel::Critical => None,
        }
    }

    /// Score the monitor must stay below to step down from the current
    /// level: the threshold that admitted this level, minus the margin.
    fn deescalation_floor(&self) -> Option<f64> {
        let [elevated, high, critical] = self.cfg.escalate_thresholds;
        let threshold = match self.level {
            ThreatLevel::Normal => return None,
            ThreatLevel::Elevated => elevated,
            ThreatLevel::High => high,
            ThreatLevel::Critical => critical,
        };
        Some(threshold - self.cfg.deescalate_margin)
    }

    fn shift(&mut self, to: ThreatLevel, score: f64) -> ThreatTransition {
        let from = self.level;
        self.level = to;
        self.up_streak = 0;
        self.down_streak = 0;
        tracing::info!(from = from.as_str(), to = to.as_str(), score, "threat level changed");
        ThreatTransition {
            from,
            to,
            score,
            at: self.updated_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn feed(monitor: &mut ThreatMonitor, signals: &[f64]) -> Vec<ThreatTransition> {
        signals
            .iter()
            .filter_map(|s| monitor.sample(*s).unwrap().transition)
            .collect()
    }

    #[test]
    fn rejects_out_of_range_signals() {
        let mut monitor = ThreatMonitor::new(ThreatConfig::default());
        assert_eq!(
            monitor.sample(101.0),
            Err(ThreatError::SignalOutOfRange(101.0))
        );
        assert!(monitor.sample(-0.1).is_err());
        assert!(monitor.sample(f64::NAN).is_err());
        // A rejected sample leaves the state untouched.
        assert_eq!(monitor.state().score, 0.0);
    }

    #[test]
    fn rising_samples_escalate_one_level_at_a_time() {
        // Smoothed trace (alpha 0.3, first sample initializes):
        //   20, 21.5, 25.55, 29.885, 40.42, 49.29, 58.51, 66.45, 72.02
        // Crosses 30 at the 5th sample and transitions on the 6th
        // (second consecutive), crosses 60 at the 8th and transitions
        // on the 9th.
        let mut monitor = ThreatMonitor::new(ThreatConfig::default());
        let signals = [20.0, 25.0, 35.0, 40.0, 65.0, 70.0, 80.0, 85.0, 85.0];

        let mut levels = Vec::new();
        for (i, signal) in signals.iter().enumerate() {
            if let Some(t) = monitor.sample(*signal).unwrap().transition {
                levels.push((i, t.from, t.to));
            }
        }

        assert_eq!(
            levels,
            vec![
                (5, ThreatLevel::Normal, ThreatLevel::Elevated),
                (8, ThreatLevel::Elevated, ThreatLevel::High),
            ]
        );
        assert_eq!(monitor.state().level, ThreatLevel::High);
    }

    #[test]
    fn single_spike_does_not_escalate() {
        let mut monitor = ThreatMonitor::new(ThreatConfig::default());
        // One extreme sample, then quiet: the streak requirement holds
        // the level down.
        let transitions = feed(&mut monitor, &[100.0, 0.0, 0.0]);
        assert!(transitions.is_empty());
        assert_eq!(monitor.state().level, ThreatLevel::Normal);
    }

    #[test]
    fn deescalation_requires_margin_below_threshold() {
        let mut monitor = ThreatMonitor::new(ThreatConfig::default());
        feed(&mut monitor, &[20.0, 25.0, 35.0, 40.0, 65.0, 70.0]);
        assert_eq!(monitor.state().level, ThreatLevel::Elevated);

        // Smoothed score decays 49.29 -> 34.51 -> 24.15 -> 16.91 ->
        // 11.83 -> 8.28; only the last three fall below 30 - 10 = 20,
        // and the third consecutive one steps the level down.
        let transitions = feed(&mut monitor, &[0.0, 0.0, 0.0, 0.0, 0.0]);
        assert_eq!(transitions.len(), 1);
        assert_eq!(transitions[0].from, ThreatLevel::Elevated);
        assert_eq!(transitions[0].to, ThreatLevel::Normal);
    }

    #[test]
    fn score_inside_margin_band_does_not_flap() {
        let mut monitor = ThreatMonitor::new(ThreatConfig::default());
        feed(&mut monitor, &[20.0, 25.0, 35.0, 40.0, 65.0, 70.0]);
        assert_eq!(monitor.state().level, ThreatLevel::Elevated);

        // Holding the smoothed score inside the [20, 30) hysteresis
        // band: below the threshold, above the de-escalation floor.
        let transitions = feed(&mut monitor, &[25.0; 10]);
        assert!(transitions.is_empty());
        assert_eq!(monitor.state().level, ThreatLevel::Elevated);
    }

    proptest! {
        /// No sequence of in-range samples ever produces a transition
        /// that skips a level.
        #[test]
        fn transitions_are_single_step(signals in proptest::collection::vec(0.0f64..=100.0, 1..200)) {
            let mut monitor = ThreatMonitor::new(ThreatConfig::default());
            let mut level = ThreatLevel::Normal;
            for signal in signals {
                let outcome = monitor.sample(signal).unwrap();
                if let Some(t) = outcome.transition {
                    prop_assert_eq!(t.from, level);
                    prop_assert!(t.to == t.from.step_up() || t.to == t.from.step_down());
                    prop_assert_ne!(t.to, t.from);
                    level = t.to;
                }
                prop_assert_eq!(outcome.state.level, level);
                prop_assert!((0.0..=100.0).contains(&outcome.state.score));
            }
        }
    }
}
