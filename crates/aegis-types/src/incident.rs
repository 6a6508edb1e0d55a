//! Incident aggregate: one emergency episode and its dispatch rounds.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::{GuardianId, IncidentId, UserId};
use crate::threat::ThreatState;

/// Incident lifecycle. Terminal states are final; a new incident may
/// open for the same user only after the previous one is terminal.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum IncidentState {
    Open,
    Escalating,
    Resolved,
    Cancelled,
    Expired,
}

impl IncidentState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            IncidentState::Resolved | IncidentState::Cancelled | IncidentState::Expired
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            IncidentState::Open => "OPEN",
            IncidentState::Escalating => "ESCALATING",
            IncidentState::Resolved => "RESOLVED",
            IncidentState::Cancelled => "CANCELLED",
            IncidentState::Expired => "EXPIRED",
        }
    }
}

/// Per-guardian status within one dispatch round.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum DispatchStatus {
    Sent,
    Acked,
    Declined,
    TimedOut,
}

/// Outcome of one alert as seen by the directory, used to update a
/// guardian's rating and latency history.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub enum AttemptOutcome {
    Acked { latency_secs: f64 },
    Declined,
    TimedOut,
}

/// One escalation tier's alert round. Append-only: statuses may change
/// while the round is live (late acks included), but no guardian is
/// ever removed and no round is discarded.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DispatchAttempt {
    pub round: u32,
    pub radius_meters: f64,
    pub statuses: BTreeMap<GuardianId, DispatchStatus>,
    pub sent_at: DateTime<Utc>,
    pub deadline: DateTime<Utc>,
    /// Set once the round's deadline has fired.
    pub expired: bool,
}

impl DispatchAttempt {
    pub fn new(
        round: u32,
        radius_meters: f64,
        candidates: impl IntoIterator<Item = GuardianId>,
        sent_at: DateTime<Utc>,
        deadline: DateTime<Utc>,
    ) -> Self {
        Self {
            round,
            radius_meters,
            statuses: candidates
                .into_iter()
                .map(|id| (id, DispatchStatus::Sent))
                .collect(),
            sent_at,
            deadline,
            expired: false,
        }
    }

    pub fn ack_count(&self) -> usize {
        self.statuses
            .values()
            .filter(|s| **s == DispatchStatus::Acked)
            .count()
    }
}

/// Aggregate root for one emergency episode.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Incident {
    pub id: IncidentId,
    pub user: UserId,
    pub opened_with: ThreatState,
    pub attempts: Vec<DispatchAttempt>,
    pub state: IncidentState,
    pub opened_at: DateTime<Utc>,
    pub closed_at: Option<DateTime<Utc>>,
}

impl Incident {
    pub fn open(user: UserId, opened_with: ThreatState) -> Self {
        Self {
            id: IncidentId::generate(),
            user,
            opened_with,
            attempts: Vec::new(),
            state: IncidentState::Open,
            opened_at: Utc::now(),
            closed_at: None,
        }
    }

    /// Total acknowledgements across all rounds.
    pub fn total_acks(&self) -> usize {
        self.attempts.iter().map(DispatchAttempt::ack_count).sum()
    }

    /// Rounds whose deadline has already fired.
    pub fn elapsed_rounds(&self) -> usize {
        self.attempts.iter().filter(|a| a.expired).count()
    }

    /// Every guardian alerted so far, across all rounds. Escalation
    /// must select candidate sets disjoint from this.
    pub fn contacted(&self) -> BTreeSet<GuardianId> {
        self.attempts
            .iter()
            .flat_map(|a| a.statuses.keys().cloned())
            .collect()
    }

    /// The most recent status entry for `guardian`, searching newest
    /// round first.
    pub fn latest_status_mut(&mut self, guardian: &GuardianId) -> Option<&mut DispatchStatus> {
        self.attempts
            .iter_mut()
            .rev()
            .find_map(|a| a.statuses.get_mut(guardian))
    }

    pub fn close(&mut self, state: IncidentState) {
        debug_assert!(state.is_terminal());
        self.state = state;
        self.closed_at = Some(Utc::now());
    }
}
