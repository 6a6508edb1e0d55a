//! Per-incident actor task.
//!
//! Each open incident is owned by exactly one spawned task; every
//! mutation flows through its command queue, so round deadlines, acks,
//! and cancellation never race on incident state. The actor exits once
//! the incident reaches a terminal state; the final snapshot stays
//! readable through the watch channel.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::future::join_all;
use serde_json::json;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::time::Instant;

use aegis_actions::ActionOrchestrator;
use aegis_directory::GuardianDirectory;
use aegis_ledger::{EntryKind, LedgerWriter};
use aegis_types::{
    AlertTransport, AttemptOutcome, DispatchAttempt, DispatchConfig, DispatchStatus, EngineEvent,
    GeoPoint, GuardianAlert, GuardianId, Incident, IncidentId, IncidentState, ThreatLevel, UserId,
};

use crate::error::DispatchError;
use crate::escalation::{review_round, RoundDecision, RoundReview};

pub(crate) enum Command {
    Ack {
        guardian: GuardianId,
        reply: oneshot::Sender<Result<(), DispatchError>>,
    },
    Decline {
        guardian: GuardianId,
        reply: oneshot::Sender<Result<(), DispatchError>>,
    },
    Cancel {
        reply: oneshot::Sender<Result<(), DispatchError>>,
    },
    Resolve {
        reply: oneshot::Sender<Result<(), DispatchError>>,
    },
}

pub(crate) struct IncidentActor {
    pub incident: Incident,
    pub origin: GeoPoint,
    pub cfg: DispatchConfig,
    pub directory: Arc<GuardianDirectory>,
    pub ledger: Arc<dyn LedgerWriter>,
    pub transport: Arc<dyn AlertTransport>,
    pub actions: Arc<ActionOrchestrator>,
    pub events: broadcast::Sender<EngineEvent>,
    pub commands: mpsc::Receiver<Command>,
    pub snapshot: watch::Sender<Incident>,
    /// Set once enough acks arrived; no further rounds open, only the
    /// incident maximum still runs.
    pub holding: bool,
}

impl IncidentActor {
    pub(crate) async fn run(mut self) {
        let incident_deadline = Instant::now() + Duration::from_secs(self.cfg.incident_max_secs);
        let mut round_deadline = Instant::now() + Duration::from_secs(self.cfg.round_deadline_secs);

        loop {
            tokio::select! {
                command = self.commands.recv() => match command {
                    Some(command) => self.handle_command(command),
                    None => break,
                },
                _ = tokio::time::sleep_until(round_deadline), if !self.holding => {
                    if let Some(next) = self.on_round_deadline() {
                        round_deadline = next;
                    }
                }
                _ = tokio::time::sleep_until(incident_deadline) => {
                    self.expire("incident maximum elapsed");
                }
            }

            let _ = self.snapshot.send(self.incident.clone());
            if self.incident.state.is_terminal() {
                break;
            }
        }
        let _ = self.snapshot.send(self.incident.clone());
    }

    fn handle_command(&mut self, command: Command) {
        match command {
            Command::Ack { guardian, reply } => {
                let _ = reply.send(self.handle_ack(guardian));
            }
            Command::Decline { guardian, reply } => {
                let _ = reply.send(self.handle_decline(guardian));
            }
            Command::Cancel { reply } => {
                let _ = reply.send(self.handle_cancel());
            }
            Command::Resolve { reply } => {
                let _ = reply.send(self.handle_resolve());
            }
        }
    }

    fn handle_ack(&mut self, guardian: GuardianId) -> Result<(), DispatchError> {
        let attempt = self
            .incident
            .attempts
            .iter_mut()
            .rev()
            .find(|a| a.statuses.contains_key(&guardian))
            .ok_or_else(|| DispatchError::UnknownGuardian(guardian.clone()))?;

        let sent_at = attempt.sent_at;
        let status = attempt
            .statuses
            .get_mut(&guardian)
            .ok_or_else(|| DispatchError::UnknownGuardian(guardian.clone()))?;
        if *status == DispatchStatus::Acked {
            // Duplicate delivery of the same ack; already recorded.
            return Ok(());
        }
        // A late ack flips an earlier TimedOut mark.
        *status = DispatchStatus::Acked;

        let latency_secs = (Utc::now() - sent_at).num_milliseconds().max(0) as f64 / 1000.0;
        self.directory
            .record_outcome(&guardian, AttemptOutcome::Acked { latency_secs })?;
        self.ledger.append(
            self.incident.id,
            EntryKind::GuardianAcked,
            json!({ "guardian": guardian.as_str(), "latency_secs": latency_secs }),
        )?;
        tracing::info!(incident = %self.incident.id, %guardian, "guardian acknowledged");
        let _ = self.events.send(EngineEvent::GuardianAcked {
            incident: self.incident.id,
            guardian,
        });
        Ok(())
    }

    fn handle_decline(&mut self, guardian: GuardianId) -> Result<(), DispatchError> {
        let status = self
            .incident
            .latest_status_mut(&guardian)
            .ok_or_else(|| DispatchError::UnknownGuardian(guardian.clone()))?;
        if *status == DispatchStatus::Acked {
            // A decline never retracts an acknowledgement.
            return Ok(());
        }
        *status = DispatchStatus::Declined;
        self.directory
            .record_outcome(&guardian, AttemptOutcome::Declined)?;
        tracing::debug!(incident = %self.incident.id, %guardian, "guardian declined");
        Ok(())
    }

    fn handle_cancel(&mut self) -> Result<(), DispatchError> {
        let cancelled = self.actions.cancel_all(self.incident.id);
        self.ledger.append(
            self.incident.id,
            EntryKind::IncidentCancelled,
            json!({
                "cancelled_actions": cancelled.iter().map(|k| k.as_str()).collect::<Vec<_>>(),
            }),
        )?;
        self.incident.close(IncidentState::Cancelled);
        tracing::info!(incident = %self.incident.id, "incident cancelled by the user");
        let _ = self.events.send(EngineEvent::IncidentTerminal {
            incident: self.incident.id,
            state: IncidentState::Cancelled,
        });
        Ok(())
    }

    fn handle_resolve(&mut self) -> Result<(), DispatchError> {
        if self.incident.total_acks() == 0 && self.incident.elapsed_rounds() == 0 {
            return Err(DispatchError::PrematureResolution);
        }
        self.ledger.append(
            self.incident.id,
            EntryKind::IncidentResolved,
            json!({ "acks": self.incident.total_acks() }),
        )?;
        self.incident.close(IncidentState::Resolved);
        tracing::info!(incident = %self.incident.id, "incident resolved");
        let _ = self.events.send(EngineEvent::IncidentTerminal {
            incident: self.incident.id,
            state: IncidentState::Resolved,
        });
        Ok(())
    }

    /// The current round's deadline fired. Returns the next round's
    /// deadline when another round opens.
    fn on_round_deadline(&mut self) -> Option<Instant> {
        let timed_out: Vec<GuardianId> = match self.incident.attempts.last_mut() {
            Some(attempt) => {
                attempt.expired = true;
                attempt
                    .statuses
                    .iter_mut()
                    .filter(|(_, status)| **status == DispatchStatus::Sent)
                    .map(|(id, status)| {
                        *status = DispatchStatus::TimedOut;
                        id.clone()
                    })
                    .collect()
            }
            None => Vec::new(),
        };
        for guardian in &timed_out {
            if let Err(error) = self.directory.record_outcome(guardian, AttemptOutcome::TimedOut) {
                tracing::warn!(%guardian, %error, "failed to record timeout outcome");
            }
        }

        let (radius, candidates) = match self.incident.attempts.last() {
            Some(attempt) => (attempt.radius_meters, attempt.statuses.len()),
            None => return None,
        };
        let review = RoundReview {
            elapsed_rounds: self.incident.elapsed_rounds() as u32,
            radius_meters: radius,
            total_acks: self.incident.total_acks(),
            ack_threshold: self.cfg.ack_threshold(candidates),
        };

        match review_round(&self.cfg, review) {
            RoundDecision::Hold => {
                tracing::info!(
                    incident = %self.incident.id,
                    acks = review.total_acks,
                    "responders en route, no further rounds"
                );
                self.holding = true;
                None
            }
            RoundDecision::Expire => {
                self.expire("no guardian acknowledged within the round budget");
                None
            }
            RoundDecision::Widen { radius_meters } => self.open_next_round(radius_meters),
        }
    }

    fn open_next_round(&mut self, radius_meters: f64) -> Option<Instant> {
        let contacted = self.incident.contacted();
        let limit = self.cfg.candidates_for(self.incident.opened_with.level);
        let ranked = match self
            .directory
            .nearest(self.origin, radius_meters, limit + contacted.len())
        {
            Ok(ranked) => ranked,
            Err(error) => {
                tracing::error!(incident = %self.incident.id, %error, "directory query failed");
                Vec::new()
            }
        };
        let fresh: Vec<GuardianId> = ranked
            .into_iter()
            .map(|g| g.id)
            .filter(|id| !contacted.contains(id))
            .take(limit)
            .collect();

        if fresh.is_empty() {
            if self.incident.total_acks() == 0 {
                self.expire("search widened to no fresh candidates");
            } else {
                self.holding = true;
            }
            return None;
        }

        // Both entries must persist before the round is committed; an
        // escalation the ledger cannot record does not happen.
        let round = (self.incident.attempts.len() + 1) as u32;
        let persisted = self
            .ledger
            .append(
                self.incident.id,
                EntryKind::Escalated,
                json!({ "round": round, "radius_meters": radius_meters }),
            )
            .and_then(|_| {
                self.ledger.append(
                    self.incident.id,
                    EntryKind::DispatchSent,
                    json!({
                        "round": round,
                        "candidates": fresh.len(),
                        "radius_meters": radius_meters,
                    }),
                )
            });
        if let Err(error) = persisted {
            tracing::error!(incident = %self.incident.id, %error, "failed to persist escalation");
            self.expire("evidence ledger unavailable");
            return None;
        }

        let now = Utc::now();
        let deadline = now + chrono::Duration::seconds(self.cfg.round_deadline_secs as i64);
        self.incident.attempts.push(DispatchAttempt::new(
            round,
            radius_meters,
            fresh.iter().cloned(),
            now,
            deadline,
        ));
        self.incident.state = IncidentState::Escalating;

        spawn_alert_fanout(
            Arc::clone(&self.transport),
            self.incident.id,
            self.incident.user.clone(),
            self.incident.opened_with.level,
            round,
            self.origin,
            fresh.clone(),
        );

        tracing::info!(
            incident = %self.incident.id,
            round,
            radius_meters,
            candidates = fresh.len(),
            "escalated to a wider round"
        );
        let _ = self.events.send(EngineEvent::DispatchRoundOpened {
            incident: self.incident.id,
            round,
            candidates: fresh.len(),
        });

        Some(Instant::now() + Duration::from_secs(self.cfg.round_deadline_secs))
    }

    fn expire(&mut self, reason: &str) {
        if self.incident.state.is_terminal() {
            return;
        }
        // Expiry is timer-driven; with the deadline already elapsed the
        // incident must close even if the ledger cannot take the entry.
        if let Err(error) = self.ledger.append(
            self.incident.id,
            EntryKind::IncidentExpired,
            json!({ "reason": reason }),
        ) {
            tracing::error!(incident = %self.incident.id, %error, "failed to persist expiry");
        }
        self.incident.close(IncidentState::Expired);
        tracing::error!(incident = %self.incident.id, reason, "incident expired unanswered");
        let _ = self.events.send(EngineEvent::IncidentTerminal {
            incident: self.incident.id,
            state: IncidentState::Expired,
        });
    }
}

/// Fan one round's alerts out on a detached task, so neither the
/// coordinator nor the incident actor ever waits on the transport and
/// commands stay responsive while delivery is slow.
pub(crate) fn spawn_alert_fanout(
    transport: Arc<dyn AlertTransport>,
    incident: IncidentId,
    user: UserId,
    level: ThreatLevel,
    round: u32,
    location: GeoPoint,
    guardians: Vec<GuardianId>,
) {
    tokio::spawn(async move {
        send_alerts(transport.as_ref(), incident, &user, level, round, location, &guardians).await;
    });
}

/// Fan one round's alerts out through the transport. Delivery failures
/// are logged; the round stands regardless.
async fn send_alerts(
    transport: &dyn AlertTransport,
    incident: IncidentId,
    user: &UserId,
    level: ThreatLevel,
    round: u32,
    location: GeoPoint,
    guardians: &[GuardianId],
) {
    let alerts: Vec<GuardianAlert> = guardians
        .iter()
        .map(|guardian| GuardianAlert {
            incident,
            user: user.clone(),
            guardian: guardian.clone(),
            level,
            round,
            location,
        })
        .collect();

    let results = join_all(alerts.iter().map(|alert| transport.send_alert(alert))).await;
    for (alert, result) in alerts.iter().zip(results) {
        if let Err(error) = result {
            tracing::warn!(%incident, guardian = %alert.guardian, %error, "alert delivery failed");
        }
    }
}
