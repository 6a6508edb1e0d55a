//! Collaborator boundaries: the narrow interfaces through which the
//! engine reaches screen/audio/radio/storage facilities it does not
//! own. Implementations are injected at construction; there are no
//! process-wide singletons.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::watch;

use crate::action::ActionKind;
use crate::geo::GeoPoint;
use crate::ids::{GuardianId, IncidentId, UserId};
use crate::threat::ThreatLevel;

/// Errors surfaced by external collaborators.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CollaboratorError {
    #[error("collaborator unavailable: {0}")]
    Unavailable(String),

    #[error("collaborator rejected the request: {0}")]
    Rejected(String),
}

/// Well-known emergency service numbers carried over from the original
/// deployment region.
pub mod helplines {
    pub const EMERGENCY: &str = "112";
    pub const POLICE: &str = "100";
    pub const AMBULANCE: &str = "102";
    pub const WOMEN_HELPLINE: &str = "1091";
    pub const FIRE: &str = "101";
}

/// One alert handed to the push/mesh delivery layer.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct GuardianAlert {
    pub incident: IncidentId,
    pub user: UserId,
    pub guardian: GuardianId,
    pub level: ThreatLevel,
    pub round: u32,
    pub location: GeoPoint,
}

/// Opaque request/response text service. The crisis score fed into the
/// threat monitor is derived externally from this collaborator's
/// output; the engine never parses natural language itself.
#[async_trait]
pub trait TextGenerator: Send + Sync {
    async fn generate(
        &self,
        system_context: &str,
        user_message: &str,
    ) -> Result<String, CollaboratorError>;
}

/// Dial-out and SMS delivery.
#[async_trait]
pub trait Telephony: Send + Sync {
    async fn dial(&self, number: &str) -> Result<(), CollaboratorError>;

    async fn send_sms(&self, recipients: &[String], body: &str) -> Result<(), CollaboratorError>;
}

/// Push-notification delivery of guardian alerts. Delivery mechanics
/// (push, SMS fallback, radio mesh) are outside the engine.
#[async_trait]
pub trait AlertTransport: Send + Sync {
    async fn send_alert(&self, alert: &GuardianAlert) -> Result<(), CollaboratorError>;
}

/// Device-side execution of a side-action (siren, recording,
/// flashlight pattern). The runner must observe `cancel` at its safe
/// checkpoints; the orchestrator never force-kills a runner mid-write.
#[async_trait]
pub trait ActionRunner: Send + Sync {
    async fn run(
        &self,
        incident: &IncidentId,
        kind: ActionKind,
        cancel: watch::Receiver<bool>,
    ) -> Result<(), CollaboratorError>;
}

/// Durable key-value/blob store for incidents and ledger entries. The
/// engine assumes at-least-once delivery from this layer and stays
/// idempotent against duplicate replays.
#[async_trait]
pub trait IncidentStore: Send + Sync {
    async fn put(&self, key: &str, value: Vec<u8>) -> Result<(), CollaboratorError>;

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, CollaboratorError>;
}
