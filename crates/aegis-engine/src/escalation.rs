//! Round-deadline decision logic, kept pure so the policy is testable
//! without timers or channels.

use aegis_types::DispatchConfig;

/// What the coordinator knows about an incident when a round deadline
/// fires.
#[derive(Clone, Copy, Debug)]
pub(crate) struct RoundReview {
    /// Rounds whose deadline has already fired, this one included.
    pub elapsed_rounds: u32,
    /// Radius of the round that just elapsed.
    pub radius_meters: f64,
    /// Acknowledgements across all rounds so far.
    pub total_acks: usize,
    /// Acks required for the round to count as answered.
    pub ack_threshold: usize,
}

/// What to do when a round deadline fires.
#[derive(Clone, Copy, Debug, PartialEq)]
pub(crate) enum RoundDecision {
    /// Enough responders are en route; stop opening rounds and wait
    /// for the user to resolve or cancel.
    Hold,
    /// Widen the search and open the next round at this radius.
    Widen { radius_meters: f64 },
    /// Nobody answered within the round budget; the incident is a hard
    /// failure.
    Expire,
}

pub(crate) fn review_round(cfg: &DispatchConfig, review: RoundReview) -> RoundDecision {
    if review.total_acks >= review.ack_threshold {
        return RoundDecision::Hold;
    }
    if review.elapsed_rounds >= cfg.max_rounds {
        // Past the round budget a partial response still means someone
        // is coming; only total silence expires the incident.
        return if review.total_acks == 0 {
            RoundDecision::Expire
        } else {
            RoundDecision::Hold
        };
    }
    RoundDecision::Widen {
        radius_meters: (review.radius_meters * cfg.radius_multiplier).min(cfg.max_radius_meters),
    }
}
