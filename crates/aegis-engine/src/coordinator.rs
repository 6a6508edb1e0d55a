//! Dispatch coordinator: owns the set of open incidents and the public
//! command surface over them.
//!
//! Each open incident runs as its own actor task; the coordinator maps
//! command calls onto the right actor's queue and enforces the
//! one-open-incident-per-user rule at open time.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use serde_json::json;
use tokio::sync::{broadcast, mpsc, oneshot, watch, Mutex};

use aegis_actions::ActionOrchestrator;
use aegis_directory::GuardianDirectory;
use aegis_ledger::{EntryKind, LedgerWriter};
use aegis_types::{
    AlertTransport, DispatchAttempt, DispatchConfig, EngineEvent, GeoPoint, GuardianId, Incident,
    IncidentId, ThreatLevel, ThreatState, UserId,
};

use crate::actor::{spawn_alert_fanout, Command, IncidentActor};
use crate::error::DispatchError;

struct IncidentHandle {
    user: UserId,
    commands: mpsc::Sender<Command>,
    snapshot: watch::Receiver<Incident>,
}

pub struct DispatchCoordinator {
    cfg: DispatchConfig,
    directory: Arc<GuardianDirectory>,
    ledger: Arc<dyn LedgerWriter>,
    transport: Arc<dyn AlertTransport>,
    actions: Arc<ActionOrchestrator>,
    events: broadcast::Sender<EngineEvent>,
    incidents: Mutex<HashMap<IncidentId, IncidentHandle>>,
}

impl DispatchCoordinator {
    pub fn new(
        cfg: DispatchConfig,
        directory: Arc<GuardianDirectory>,
        ledger: Arc<dyn LedgerWriter>,
        transport: Arc<dyn AlertTransport>,
        actions: Arc<ActionOrchestrator>,
        events: broadcast::Sender<EngineEvent>,
    ) -> Self {
        Self {
            cfg,
            directory,
            ledger,
            transport,
            actions,
            events,
            incidents: Mutex::new(HashMap::new()),
        }
    }

    /// Open an incident for `user` and send the first dispatch round.
    ///
    /// Rejected when the threat level is below HIGH, when the user
    /// already has a non-terminal incident, or when no guardian is in
    /// range for the first round.
    pub async fn open_incident(
        &self,
        user: UserId,
        threat: ThreatState,
        origin: GeoPoint,
    ) -> Result<IncidentId, DispatchError> {
        if !threat.level.is_dispatchable() {
            return Err(DispatchError::ThreatBelowDispatchLevel(threat.level));
        }

        let mut incidents = self.incidents.lock().await;
        if incidents
            .values()
            .any(|h| h.user == user && !h.snapshot.borrow().state.is_terminal())
        {
            return Err(DispatchError::IncidentAlreadyOpen(user));
        }

        let limit = self.cfg.candidates_for(threat.level);
        let candidates = self
            .directory
            .nearest(origin, self.cfg.initial_radius_meters, limit)?;
        if candidates.is_empty() {
            return Err(DispatchError::NoCandidatesAvailable);
        }
        let candidate_ids: Vec<GuardianId> = candidates.into_iter().map(|g| g.id).collect();

        let mut incident = Incident::open(user.clone(), threat);
        let id = incident.id;
        self.ledger.append(
            id,
            EntryKind::ThreatChanged,
            json!({ "level": threat.level.as_str(), "score": threat.score }),
        )?;

        let now = Utc::now();
        let deadline = now + chrono::Duration::seconds(self.cfg.round_deadline_secs as i64);
        incident.attempts.push(DispatchAttempt::new(
            1,
            self.cfg.initial_radius_meters,
            candidate_ids.iter().cloned(),
            now,
            deadline,
        ));

        self.ledger.append(
            id,
            EntryKind::DispatchSent,
            json!({
                "round": 1,
                "candidates": candidate_ids.len(),
                "radius_meters": self.cfg.initial_radius_meters,
            }),
        )?;

        spawn_alert_fanout(
            Arc::clone(&self.transport),
            id,
            user.clone(),
            threat.level,
            1,
            origin,
            candidate_ids.clone(),
        );

        let auto_actions = match threat.level {
            ThreatLevel::Critical => &self.cfg.auto_actions_critical,
            _ => &self.cfg.auto_actions_high,
        };
        for kind in auto_actions {
            self.actions.start(id, *kind);
        }

        tracing::info!(
            incident = %id,
            %user,
            level = threat.level.as_str(),
            candidates = candidate_ids.len(),
            "incident opened"
        );
        let _ = self.events.send(EngineEvent::IncidentOpened { incident: id, user: user.clone() });
        let _ = self.events.send(EngineEvent::DispatchRoundOpened {
            incident: id,
            round: 1,
            candidates: candidate_ids.len(),
        });

        let (command_tx, command_rx) = mpsc::channel(32);
        let (snapshot_tx, snapshot_rx) = watch::channel(incident.clone());
        tokio::spawn(
            IncidentActor {
                incident,
                origin,
                cfg: self.cfg.clone(),
                directory: Arc::clone(&self.directory),
                ledger: Arc::clone(&self.ledger),
                transport: Arc::clone(&self.transport),
                actions: Arc::clone(&self.actions),
                events: self.events.clone(),
                commands: command_rx,
                snapshot: snapshot_tx,
                holding: false,
            }
            .run(),
        );
        incidents.insert(
            id,
            IncidentHandle {
                user,
                commands: command_tx,
                snapshot: snapshot_rx,
            },
        );
        Ok(id)
    }

    /// A guardian acknowledged an alert. Idempotent; late acks after a
    /// round deadline are accepted.
    pub async fn ack(&self, incident: IncidentId, guardian: GuardianId) -> Result<(), DispatchError> {
        self.send(incident, |reply| Command::Ack { guardian, reply })
            .await
    }

    /// A guardian explicitly declined an alert.
    pub async fn decline(
        &self,
        incident: IncidentId,
        guardian: GuardianId,
    ) -> Result<(), DispatchError> {
        self.send(incident, |reply| Command::Decline { guardian, reply })
            .await
    }

    /// User-initiated cancellation. Accepted from any non-terminal
    /// state; running side-actions are cancelled cooperatively.
    pub async fn cancel(&self, incident: IncidentId) -> Result<(), DispatchError> {
        self.send(incident, |reply| Command::Cancel { reply }).await
    }

    /// User-confirmed safe. Rejected while no guardian has responded
    /// and no round has elapsed, so a pocket press cannot silently
    /// close a live dispatch.
    pub async fn resolve(&self, incident: IncidentId) -> Result<(), DispatchError> {
        self.send(incident, |reply| Command::Resolve { reply }).await
    }

    /// Current state of an incident, terminal ones included.
    pub async fn snapshot(&self, incident: IncidentId) -> Result<Incident, DispatchError> {
        let incidents = self.incidents.lock().await;
        let handle = incidents
            .get(&incident)
            .ok_or(DispatchError::UnknownIncident(incident))?;
        let snapshot = handle.snapshot.borrow().clone();
        Ok(snapshot)
    }

    /// The user's non-terminal incident, if one is open.
    pub async fn live_incident(&self, user: &UserId) -> Option<IncidentId> {
        let incidents = self.incidents.lock().await;
        incidents
            .iter()
            .find_map(|(id, h)| {
                (h.user == *user && !h.snapshot.borrow().state.is_terminal()).then_some(*id)
            })
    }

    async fn send(
        &self,
        incident: IncidentId,
        make: impl FnOnce(oneshot::Sender<Result<(), DispatchError>>) -> Command,
    ) -> Result<(), DispatchError> {
        let (commands, snapshot) = {
            let incidents = self.incidents.lock().await;
            let handle = incidents
                .get(&incident)
                .ok_or(DispatchError::UnknownIncident(incident))?;
            (handle.commands.clone(), handle.snapshot.clone())
        };

        let closed = || DispatchError::IncidentClosed {
            incident,
            state: snapshot.borrow().state,
        };
        let (reply_tx, reply_rx) = oneshot::channel();
        commands
            .send(make(reply_tx))
            .await
            .map_err(|_| closed())?;
        reply_rx.await.map_err(|_| closed())?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex as StdMutex;
    use std::time::Duration;

    use async_trait::async_trait;

    use aegis_actions::NoopRunner;
    use aegis_directory::Guardian;
    use aegis_ledger::{InMemoryLedger, LedgerEntry, LedgerError, LedgerReader};
    use aegis_types::{
        ActionConfig, CollaboratorError, DispatchStatus, GuardianAlert, IncidentState,
        RankingConfig,
    };

    const ORIGIN: GeoPoint = GeoPoint {
        lat: 28.7041,
        lon: 77.1025,
    };

    #[derive(Default)]
    struct RecordingTransport {
        alerts: StdMutex<Vec<GuardianAlert>>,
    }

    #[async_trait]
    impl AlertTransport for RecordingTransport {
        async fn send_alert(&self, alert: &GuardianAlert) -> Result<(), CollaboratorError> {
            self.alerts.lock().unwrap().push(alert.clone());
            Ok(())
        }
    }

    impl RecordingTransport {
        fn guardians_in_round(&self, round: u32) -> Vec<GuardianId> {
            self.alerts
                .lock()
                .unwrap()
                .iter()
                .filter(|a| a.round == round)
                .map(|a| a.guardian.clone())
                .collect()
        }
    }

    struct Fixture {
        coordinator: DispatchCoordinator,
        directory: Arc<GuardianDirectory>,
        ledger: Arc<InMemoryLedger>,
        transport: Arc<RecordingTransport>,
        events: broadcast::Receiver<EngineEvent>,
    }

    fn guardian_north(id: &str, meters: f64) -> Guardian {
        Guardian::new(
            GuardianId::new(id),
            GeoPoint::new(ORIGIN.lat + meters / 111_320.0, ORIGIN.lon),
        )
    }

    fn fixture(cfg: DispatchConfig, guardians: Vec<Guardian>) -> Fixture {
        let directory = Arc::new(GuardianDirectory::new(RankingConfig::default()));
        for guardian in guardians {
            directory.register(guardian).unwrap();
        }
        let ledger = Arc::new(InMemoryLedger::new());
        let transport = Arc::new(RecordingTransport::default());
        let (events_tx, events) = broadcast::channel(64);
        let actions = Arc::new(ActionOrchestrator::new(
            ActionConfig::default(),
            ledger.clone() as Arc<dyn LedgerWriter>,
            Arc::new(NoopRunner),
            events_tx.clone(),
        ));
        let coordinator = DispatchCoordinator::new(
            cfg,
            directory.clone(),
            ledger.clone() as Arc<dyn LedgerWriter>,
            transport.clone(),
            actions,
            events_tx,
        );
        Fixture {
            coordinator,
            directory,
            ledger,
            transport,
            events,
        }
    }

    /// Like `fixture`, but with caller-supplied ledger and transport.
    fn coordinator_with(
        cfg: DispatchConfig,
        guardians: Vec<Guardian>,
        ledger: Arc<dyn LedgerWriter>,
        transport: Arc<dyn AlertTransport>,
    ) -> DispatchCoordinator {
        let directory = Arc::new(GuardianDirectory::new(RankingConfig::default()));
        for guardian in guardians {
            directory.register(guardian).unwrap();
        }
        let (events_tx, _events) = broadcast::channel(64);
        let actions = Arc::new(ActionOrchestrator::new(
            ActionConfig::default(),
            ledger.clone(),
            Arc::new(NoopRunner),
            events_tx.clone(),
        ));
        DispatchCoordinator::new(cfg, directory, ledger, transport, actions, events_tx)
    }

    fn high() -> ThreatState {
        ThreatState {
            level: ThreatLevel::High,
            score: 70.0,
            updated_at: Utc::now(),
        }
    }

    fn small_rounds() -> DispatchConfig {
        DispatchConfig {
            high_candidates: 2,
            ..DispatchConfig::default()
        }
    }

    fn drain(events: &mut broadcast::Receiver<EngineEvent>) -> Vec<EngineEvent> {
        let mut out = Vec::new();
        while let Ok(event) = events.try_recv() {
            out.push(event);
        }
        out
    }

    /// Let detached fan-out and action tasks run to their next await.
    async fn settle() {
        for _ in 0..4 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test]
    async fn open_rejects_sub_dispatch_levels() {
        let fx = fixture(small_rounds(), vec![guardian_north("g1", 100.0)]);
        let below = ThreatState {
            level: ThreatLevel::Elevated,
            score: 40.0,
            updated_at: Utc::now(),
        };
        let err = fx
            .coordinator
            .open_incident(UserId::new("u1"), below, ORIGIN)
            .await
            .unwrap_err();
        assert!(matches!(err, DispatchError::ThreatBelowDispatchLevel(_)));
    }

    #[tokio::test]
    async fn open_requires_candidates_in_range() {
        let fx = fixture(small_rounds(), vec![guardian_north("far", 10_000.0)]);
        let err = fx
            .coordinator
            .open_incident(UserId::new("u1"), high(), ORIGIN)
            .await
            .unwrap_err();
        assert!(matches!(err, DispatchError::NoCandidatesAvailable));
    }

    #[tokio::test]
    async fn one_open_incident_per_user() {
        let fx = fixture(small_rounds(), vec![guardian_north("g1", 100.0)]);
        let user = UserId::new("u1");

        let id = fx
            .coordinator
            .open_incident(user.clone(), high(), ORIGIN)
            .await
            .unwrap();
        let err = fx
            .coordinator
            .open_incident(user.clone(), high(), ORIGIN)
            .await
            .unwrap_err();
        assert!(matches!(err, DispatchError::IncidentAlreadyOpen(_)));

        // A terminal incident frees the slot.
        fx.coordinator.cancel(id).await.unwrap();
        fx.coordinator
            .open_incident(user, high(), ORIGIN)
            .await
            .unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn silent_rounds_widen_then_expire() {
        let fx = fixture(
            small_rounds(),
            vec![
                guardian_north("g1", 100.0),
                guardian_north("g2", 200.0),
                guardian_north("g3", 600.0),
                guardian_north("g4", 700.0),
                guardian_north("g5", 1_000.0),
            ],
        );
        let mut events = fx.events.resubscribe();
        let id = fx
            .coordinator
            .open_incident(UserId::new("u1"), high(), ORIGIN)
            .await
            .unwrap();

        // Round 1: the two guardians within 500 m.
        settle().await;
        assert_eq!(
            fx.transport.guardians_in_round(1),
            vec![GuardianId::new("g1"), GuardianId::new("g2")]
        );

        // Deadline 1 fires: radius widens to 750 m, disjoint candidates.
        tokio::time::sleep(Duration::from_secs(61)).await;
        assert_eq!(
            fx.transport.guardians_in_round(2),
            vec![GuardianId::new("g3"), GuardianId::new("g4")]
        );

        // Deadline 2: radius 1125 m reaches the last guardian.
        tokio::time::sleep(Duration::from_secs(61)).await;
        assert_eq!(fx.transport.guardians_in_round(3), vec![GuardianId::new("g5")]);

        // Deadline 3 with zero acks across three rounds: hard failure.
        tokio::time::sleep(Duration::from_secs(61)).await;
        let snapshot = fx.coordinator.snapshot(id).await.unwrap();
        assert_eq!(snapshot.state, IncidentState::Expired);
        assert_eq!(
            snapshot
                .attempts
                .iter()
                .map(|a| a.radius_meters)
                .collect::<Vec<_>>(),
            vec![500.0, 750.0, 1_125.0]
        );

        let entries = fx.ledger.read_all(id).unwrap();
        assert_eq!(entries.last().unwrap().kind, EntryKind::IncidentExpired);
        fx.ledger.verify(id).unwrap();

        assert!(drain(&mut events).iter().any(|e| matches!(
            e,
            EngineEvent::IncidentTerminal { state: IncidentState::Expired, .. }
        )));
    }

    #[tokio::test]
    async fn ack_records_and_resolve_closes() {
        let fx = fixture(
            small_rounds(),
            vec![guardian_north("g1", 100.0), guardian_north("g2", 200.0)],
        );
        let mut events = fx.events.resubscribe();
        let id = fx
            .coordinator
            .open_incident(UserId::new("u1"), high(), ORIGIN)
            .await
            .unwrap();

        fx.coordinator.ack(id, GuardianId::new("g1")).await.unwrap();
        // Duplicate delivery is a no-op.
        fx.coordinator.ack(id, GuardianId::new("g1")).await.unwrap();

        let acked: Vec<_> = fx
            .ledger
            .read_all(id)
            .unwrap()
            .into_iter()
            .filter(|e| e.kind == EntryKind::GuardianAcked)
            .collect();
        assert_eq!(acked.len(), 1);

        // An ack rewards the guardian's rating.
        let g1 = fx.directory.get(&GuardianId::new("g1")).unwrap().unwrap();
        assert!(g1.rating > 2.5);

        fx.coordinator.resolve(id).await.unwrap();
        let snapshot = fx.coordinator.snapshot(id).await.unwrap();
        assert_eq!(snapshot.state, IncidentState::Resolved);
        assert_eq!(
            fx.ledger.read_all(id).unwrap().last().unwrap().kind,
            EntryKind::IncidentResolved
        );

        let events = drain(&mut events);
        assert!(events
            .iter()
            .any(|e| matches!(e, EngineEvent::GuardianAcked { .. })));
        assert!(events.iter().any(|e| matches!(
            e,
            EngineEvent::IncidentTerminal { state: IncidentState::Resolved, .. }
        )));
    }

    #[tokio::test]
    async fn resolve_before_any_response_is_rejected() {
        let fx = fixture(small_rounds(), vec![guardian_north("g1", 100.0)]);
        let id = fx
            .coordinator
            .open_incident(UserId::new("u1"), high(), ORIGIN)
            .await
            .unwrap();

        let err = fx.coordinator.resolve(id).await.unwrap_err();
        assert!(matches!(err, DispatchError::PrematureResolution));

        // The incident is still live and cancellable.
        fx.coordinator.cancel(id).await.unwrap();
    }

    #[tokio::test]
    async fn ack_from_unalerted_guardian_is_rejected() {
        let fx = fixture(
            small_rounds(),
            vec![guardian_north("g1", 100.0), guardian_north("far", 4_000.0)],
        );
        let id = fx
            .coordinator
            .open_incident(UserId::new("u1"), high(), ORIGIN)
            .await
            .unwrap();

        let err = fx
            .coordinator
            .ack(id, GuardianId::new("far"))
            .await
            .unwrap_err();
        assert!(matches!(err, DispatchError::UnknownGuardian(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn late_ack_flips_timed_out() {
        let fx = fixture(
            small_rounds(),
            vec![guardian_north("g1", 100.0), guardian_north("g2", 600.0)],
        );
        let id = fx
            .coordinator
            .open_incident(UserId::new("u1"), high(), ORIGIN)
            .await
            .unwrap();

        // Round 1 times out; round 2 goes to g2.
        tokio::time::sleep(Duration::from_secs(61)).await;
        let snapshot = fx.coordinator.snapshot(id).await.unwrap();
        assert_eq!(
            snapshot.attempts[0].statuses[&GuardianId::new("g1")],
            DispatchStatus::TimedOut
        );
        assert_eq!(snapshot.state, IncidentState::Escalating);

        // The late ack still counts.
        fx.coordinator.ack(id, GuardianId::new("g1")).await.unwrap();
        let snapshot = fx.coordinator.snapshot(id).await.unwrap();
        assert_eq!(
            snapshot.attempts[0].statuses[&GuardianId::new("g1")],
            DispatchStatus::Acked
        );

        fx.coordinator.resolve(id).await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn enough_acks_stop_escalation() {
        let fx = fixture(
            small_rounds(),
            vec![
                guardian_north("g1", 100.0),
                guardian_north("g2", 200.0),
                guardian_north("g3", 600.0),
            ],
        );
        let id = fx
            .coordinator
            .open_incident(UserId::new("u1"), high(), ORIGIN)
            .await
            .unwrap();
        fx.coordinator.ack(id, GuardianId::new("g1")).await.unwrap();

        // Well past several round deadlines, but short of the maximum.
        tokio::time::sleep(Duration::from_secs(300)).await;

        let snapshot = fx.coordinator.snapshot(id).await.unwrap();
        assert!(!snapshot.state.is_terminal());
        assert_eq!(snapshot.attempts.len(), 1);
        assert!(fx.transport.guardians_in_round(2).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn incident_maximum_expires_even_with_acks() {
        let cfg = DispatchConfig {
            high_candidates: 2,
            incident_max_secs: 300,
            ..DispatchConfig::default()
        };
        let fx = fixture(
            cfg,
            vec![guardian_north("g1", 100.0), guardian_north("g2", 200.0)],
        );
        let id = fx
            .coordinator
            .open_incident(UserId::new("u1"), high(), ORIGIN)
            .await
            .unwrap();
        fx.coordinator.ack(id, GuardianId::new("g1")).await.unwrap();

        tokio::time::sleep(Duration::from_secs(301)).await;

        let snapshot = fx.coordinator.snapshot(id).await.unwrap();
        assert_eq!(snapshot.state, IncidentState::Expired);
        assert_eq!(
            fx.ledger.read_all(id).unwrap().last().unwrap().kind,
            EntryKind::IncidentExpired
        );
    }

    #[tokio::test]
    async fn commands_after_terminal_fail_with_the_final_state() {
        let fx = fixture(small_rounds(), vec![guardian_north("g1", 100.0)]);
        let id = fx
            .coordinator
            .open_incident(UserId::new("u1"), high(), ORIGIN)
            .await
            .unwrap();
        fx.coordinator.cancel(id).await.unwrap();

        // Let the actor observe the terminal state and exit.
        tokio::task::yield_now().await;
        let err = fx
            .coordinator
            .ack(id, GuardianId::new("g1"))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            DispatchError::IncidentClosed { state: IncidentState::Cancelled, .. }
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn widening_into_emptiness_with_zero_acks_expires() {
        // Only one guardian exists at all; round 2 has nobody fresh.
        let fx = fixture(small_rounds(), vec![guardian_north("g1", 100.0)]);
        let id = fx
            .coordinator
            .open_incident(UserId::new("u1"), high(), ORIGIN)
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_secs(61)).await;

        let snapshot = fx.coordinator.snapshot(id).await.unwrap();
        assert_eq!(snapshot.state, IncidentState::Expired);
        assert_eq!(snapshot.attempts.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn timed_out_guardians_lose_rating() {
        let fx = fixture(
            small_rounds(),
            vec![guardian_north("g1", 100.0), guardian_north("g2", 600.0)],
        );
        fx.coordinator
            .open_incident(UserId::new("u1"), high(), ORIGIN)
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_secs(61)).await;

        let g1 = fx.directory.get(&GuardianId::new("g1")).unwrap().unwrap();
        assert!(g1.rating < 2.5);
    }

    #[tokio::test]
    async fn opening_starts_the_configured_auto_actions() {
        let fx = fixture(
            small_rounds(),
            vec![guardian_north("g1", 100.0), guardian_north("g2", 200.0)],
        );
        let id = fx
            .coordinator
            .open_incident(UserId::new("u1"), high(), ORIGIN)
            .await
            .unwrap();

        // Give the NoopRunner tasks a chance to record their entries.
        settle().await;

        let started: Vec<_> = fx
            .ledger
            .read_all(id)
            .unwrap()
            .into_iter()
            .filter(|e| e.kind == EntryKind::ActionStarted)
            .map(|e| e.payload["kind"].as_str().unwrap().to_string())
            .collect();
        assert!(started.contains(&"LOCATION_SHARE".to_string()));
        assert!(started.contains(&"SEND_SMS".to_string()));
    }

    #[tokio::test(start_paused = true)]
    async fn partial_acks_widen_without_losing_the_ack() {
        let cfg = DispatchConfig {
            high_candidates: 3,
            min_acks: 2,
            ack_fraction: 1.0,
            ..DispatchConfig::default()
        };
        let fx = fixture(
            cfg,
            vec![
                guardian_north("g1", 100.0),
                guardian_north("g2", 200.0),
                guardian_north("g3", 300.0),
                guardian_north("g4", 600.0),
            ],
        );
        let id = fx
            .coordinator
            .open_incident(UserId::new("u1"), high(), ORIGIN)
            .await
            .unwrap();
        fx.coordinator.ack(id, GuardianId::new("g1")).await.unwrap();

        // One ack against a threshold of two: the round still widens.
        tokio::time::sleep(Duration::from_secs(61)).await;

        let snapshot = fx.coordinator.snapshot(id).await.unwrap();
        assert_eq!(snapshot.state, IncidentState::Escalating);
        assert_eq!(snapshot.attempts.len(), 2);

        let first = &snapshot.attempts[0];
        assert_eq!(
            first.statuses[&GuardianId::new("g1")],
            DispatchStatus::Acked
        );
        assert_eq!(
            first.statuses[&GuardianId::new("g2")],
            DispatchStatus::TimedOut
        );
        assert_eq!(
            first.statuses[&GuardianId::new("g3")],
            DispatchStatus::TimedOut
        );

        // Round 2 reaches only the guardian not already contacted.
        assert_eq!(
            fx.transport.guardians_in_round(2),
            vec![GuardianId::new("g4")]
        );
    }

    struct StalledTransport;

    #[async_trait]
    impl AlertTransport for StalledTransport {
        async fn send_alert(&self, _alert: &GuardianAlert) -> Result<(), CollaboratorError> {
            std::future::pending::<()>().await;
            Ok(())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_is_not_blocked_by_stalled_alert_delivery() {
        let coordinator = coordinator_with(
            small_rounds(),
            vec![guardian_north("g1", 100.0), guardian_north("g2", 200.0)],
            Arc::new(InMemoryLedger::new()),
            Arc::new(StalledTransport),
        );
        let id = coordinator
            .open_incident(UserId::new("u1"), high(), ORIGIN)
            .await
            .unwrap();

        // Delivery never completes; commands must still go through.
        tokio::time::timeout(Duration::from_millis(500), coordinator.cancel(id))
            .await
            .expect("cancel waited on alert delivery")
            .unwrap();
        assert_eq!(
            coordinator.snapshot(id).await.unwrap().state,
            IncidentState::Cancelled
        );
    }

    struct EscalationFailingLedger {
        inner: InMemoryLedger,
    }

    impl LedgerWriter for EscalationFailingLedger {
        fn append(
            &self,
            incident: IncidentId,
            kind: EntryKind,
            payload: serde_json::Value,
        ) -> Result<LedgerEntry, LedgerError> {
            if kind == EntryKind::Escalated {
                return Err(LedgerError::Serialization("evidence store offline".into()));
            }
            self.inner.append(incident, kind, payload)
        }
    }

    #[tokio::test(start_paused = true)]
    async fn unpersistable_escalation_expires_the_incident() {
        let ledger = Arc::new(EscalationFailingLedger {
            inner: InMemoryLedger::new(),
        });
        let transport = Arc::new(RecordingTransport::default());
        let coordinator = coordinator_with(
            small_rounds(),
            vec![guardian_north("g1", 100.0), guardian_north("g2", 600.0)],
            ledger.clone(),
            transport.clone(),
        );
        let id = coordinator
            .open_incident(UserId::new("u1"), high(), ORIGIN)
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_secs(61)).await;

        // The widened round never goes out when its entries cannot land.
        let snapshot = coordinator.snapshot(id).await.unwrap();
        assert_eq!(snapshot.state, IncidentState::Expired);
        assert_eq!(snapshot.attempts.len(), 1);
        assert!(transport.guardians_in_round(2).is_empty());
        assert_eq!(
            ledger.inner.read_all(id).unwrap().last().unwrap().kind,
            EntryKind::IncidentExpired
        );
    }
}
