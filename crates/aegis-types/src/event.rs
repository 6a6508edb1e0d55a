//! Engine events surfaced to the calling layer.
//!
//! Every terminal incident state and every failed side-action must be
//! observable by the caller; the engine never fails silently on a
//! transition it has committed.

use serde::{Deserialize, Serialize};

use crate::action::ActionKind;
use crate::ids::{GuardianId, IncidentId, UserId};
use crate::incident::IncidentState;
use crate::threat::ThreatTransition;

#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum EngineEvent {
    /// The monitor crossed a hysteresis boundary.
    ThreatChanged {
        user: UserId,
        transition: ThreatTransition,
    },
    /// A new incident opened for `user`.
    IncidentOpened {
        incident: IncidentId,
        user: UserId,
    },
    /// A dispatch round went out (round 1 or an escalation).
    DispatchRoundOpened {
        incident: IncidentId,
        round: u32,
        candidates: usize,
    },
    /// A guardian acknowledged an alert ("responder en route", not
    /// closure).
    GuardianAcked {
        incident: IncidentId,
        guardian: GuardianId,
    },
    /// The incident reached a terminal state. `Expired` is the hard
    /// failure that should trigger an external fallback.
    IncidentTerminal {
        incident: IncidentId,
        state: IncidentState,
    },
    /// A side-action exhausted its retries.
    ActionFailed {
        incident: IncidentId,
        kind: ActionKind,
        reason: String,
    },
}
