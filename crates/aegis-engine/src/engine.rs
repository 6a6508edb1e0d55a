//! `SafetyEngine`: the single entry point that wires threat monitoring,
//! dispatch, evidence, and side-actions together.
//!
//! Collaborators (text generation, telephony, alert delivery, action
//! execution) are injected at construction. The engine owns one threat
//! monitor per user and opens an incident automatically when a user's
//! level crosses into dispatch territory.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use serde_json::json;
use tokio::sync::broadcast;

use aegis_actions::{ActionHandle, ActionOrchestrator};
use aegis_directory::GuardianDirectory;
use aegis_ledger::{EntryKind, ExportScope, InMemoryLedger, LedgerExport, LedgerReader, LedgerWriter};
use aegis_threat::ThreatMonitor;
use aegis_types::{
    helplines, ActionKind, ActionRunner, AlertTransport, EngineConfig, EngineEvent, GeoPoint,
    GuardianId, Incident, IncidentId, Telephony, TextGenerator, ThreatState, ThreatTransition,
    UserId,
};

use crate::coordinator::DispatchCoordinator;
use crate::error::{DispatchError, EngineError};

/// Framing handed to the text collaborator when a user asks for
/// guidance mid-incident.
const GUIDANCE_CONTEXT: &str = "You are a calm personal-safety assistant. Give short, \
     practical steps for the situation described. Never speculate about legal or medical \
     questions; point those at professionals.";

/// Injected external collaborators.
pub struct Collaborators {
    pub text: Arc<dyn TextGenerator>,
    pub telephony: Arc<dyn Telephony>,
    pub transport: Arc<dyn AlertTransport>,
    pub runner: Arc<dyn ActionRunner>,
}

/// Result of folding one risk signal into a user's monitor.
#[derive(Clone, Debug)]
pub struct SignalReport {
    pub state: ThreatState,
    pub transition: Option<ThreatTransition>,
    /// Present when this sample pushed the user into dispatch territory
    /// and an incident was opened for it.
    pub opened: Option<IncidentId>,
}

pub struct SafetyEngine {
    cfg: EngineConfig,
    monitors: Mutex<HashMap<UserId, ThreatMonitor>>,
    coordinator: DispatchCoordinator,
    directory: Arc<GuardianDirectory>,
    ledger: Arc<InMemoryLedger>,
    actions: Arc<ActionOrchestrator>,
    text: Arc<dyn TextGenerator>,
    telephony: Arc<dyn Telephony>,
    events: broadcast::Sender<EngineEvent>,
}

impl SafetyEngine {
    pub fn new(cfg: EngineConfig, collaborators: Collaborators) -> Self {
        let (events, _) = broadcast::channel(256);
        let directory = Arc::new(GuardianDirectory::new(cfg.ranking.clone()));
        let ledger = Arc::new(InMemoryLedger::new());
        let actions = Arc::new(ActionOrchestrator::new(
            cfg.actions.clone(),
            Arc::clone(&ledger) as Arc<dyn LedgerWriter>,
            collaborators.runner,
            events.clone(),
        ));
        let coordinator = DispatchCoordinator::new(
            cfg.dispatch.clone(),
            Arc::clone(&directory),
            Arc::clone(&ledger) as Arc<dyn LedgerWriter>,
            collaborators.transport,
            Arc::clone(&actions),
            events.clone(),
        );
        Self {
            cfg,
            monitors: Mutex::new(HashMap::new()),
            coordinator,
            directory,
            ledger,
            actions,
            text: collaborators.text,
            telephony: collaborators.telephony,
            events,
        }
    }

    /// Fold one risk signal into `user`'s monitor. A transition into
    /// HIGH or CRITICAL opens an incident at `position` unless one is
    /// already open for the user.
    pub async fn sample_signal(
        &self,
        user: &UserId,
        signal: f64,
        position: GeoPoint,
    ) -> Result<SignalReport, EngineError> {
        let outcome = {
            let mut monitors = self.monitors.lock().map_err(|_| EngineError::LockPoisoned)?;
            monitors
                .entry(user.clone())
                .or_insert_with(|| ThreatMonitor::new(self.cfg.threat.clone()))
                .sample(signal)?
        };

        let mut opened = None;
        if let Some(transition) = outcome.transition {
            let _ = self.events.send(EngineEvent::ThreatChanged {
                user: user.clone(),
                transition,
            });
            if let Some(live) = self.coordinator.live_incident(user).await {
                // The live incident's chain records every transition,
                // not just the opening snapshot.
                self.ledger.append(
                    live,
                    EntryKind::ThreatChanged,
                    json!({
                        "from": transition.from.as_str(),
                        "to": transition.to.as_str(),
                        "score": transition.score,
                    }),
                )?;
            } else if transition.to.is_dispatchable() {
                match self
                    .coordinator
                    .open_incident(user.clone(), outcome.state, position)
                    .await
                {
                    Ok(id) => opened = Some(id),
                    // Lost the race to another opener for this user.
                    Err(DispatchError::IncidentAlreadyOpen(_)) => {}
                    Err(error) => return Err(error.into()),
                }
            }
        }

        Ok(SignalReport {
            state: outcome.state,
            transition: outcome.transition,
            opened,
        })
    }

    /// Current smoothed assessment for `user`. A user the engine has
    /// never sampled reports NORMAL with a zero score.
    pub fn threat_snapshot(&self, user: &UserId) -> Result<ThreatState, EngineError> {
        let mut monitors = self.monitors.lock().map_err(|_| EngineError::LockPoisoned)?;
        Ok(monitors
            .entry(user.clone())
            .or_insert_with(|| ThreatMonitor::new(self.cfg.threat.clone()))
            .state())
    }

    /// Panic button: open an incident immediately at the given threat
    /// state, bypassing the monitor.
    pub async fn trigger_sos(
        &self,
        user: UserId,
        threat: ThreatState,
        position: GeoPoint,
    ) -> Result<IncidentId, EngineError> {
        Ok(self.coordinator.open_incident(user, threat, position).await?)
    }

    pub async fn ack(&self, incident: IncidentId, guardian: GuardianId) -> Result<(), EngineError> {
        Ok(self.coordinator.ack(incident, guardian).await?)
    }

    pub async fn decline(
        &self,
        incident: IncidentId,
        guardian: GuardianId,
    ) -> Result<(), EngineError> {
        Ok(self.coordinator.decline(incident, guardian).await?)
    }

    pub async fn cancel(&self, incident: IncidentId) -> Result<(), EngineError> {
        Ok(self.coordinator.cancel(incident).await?)
    }

    pub async fn resolve(&self, incident: IncidentId) -> Result<(), EngineError> {
        Ok(self.coordinator.resolve(incident).await?)
    }

    pub async fn incident(&self, incident: IncidentId) -> Result<Incident, EngineError> {
        Ok(self.coordinator.snapshot(incident).await?)
    }

    /// Manually start a side-action for a live incident.
    pub fn start_action(&self, incident: IncidentId, kind: ActionKind) -> ActionHandle {
        self.actions.start(incident, kind)
    }

    /// Scoped export of an incident's evidence chain.
    pub fn export_evidence(
        &self,
        incident: IncidentId,
        scope: ExportScope,
    ) -> Result<LedgerExport, EngineError> {
        Ok(self.ledger.export(incident, scope)?)
    }

    /// Verify an incident's evidence chain end to end.
    pub fn verify_evidence(&self, incident: IncidentId) -> Result<(), EngineError> {
        Ok(self.ledger.verify(incident)?)
    }

    /// Short situational guidance from the text collaborator.
    pub async fn guidance(&self, user_message: &str) -> Result<String, EngineError> {
        Ok(self.text.generate(GUIDANCE_CONTEXT, user_message).await?)
    }

    /// Dial an emergency service. Defaults to the general emergency
    /// number when none is given.
    pub async fn dial_emergency(&self, number: Option<&str>) -> Result<(), EngineError> {
        let number = number.unwrap_or(helplines::EMERGENCY);
        tracing::info!(number, "dialing emergency service");
        Ok(self.telephony.dial(number).await?)
    }

    /// Guardian registration, heartbeats, and availability go straight
    /// to the directory.
    pub fn directory(&self) -> &GuardianDirectory {
        &self.directory
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.events.subscribe()
    }
}
