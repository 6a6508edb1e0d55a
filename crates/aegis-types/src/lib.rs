//! Shared domain model for the Aegis Safety Coordination Engine.
//!
//! This crate holds the types that cross component boundaries:
//! identifiers, geo positions, threat states, incident aggregates,
//! action tasks, engine configuration, engine events, and the
//! collaborator traits through which the engine reaches the outside
//! world (text generation, telephony, alert delivery, storage).
//! No component logic lives here.

#![deny(unsafe_code)]

pub mod action;
pub mod collab;
pub mod config;
pub mod event;
pub mod geo;
pub mod ids;
pub mod incident;
pub mod threat;

pub use action::{ActionKind, ActionStatus};
pub use collab::{
    helplines, ActionRunner, AlertTransport, CollaboratorError, GuardianAlert, IncidentStore,
    Telephony, TextGenerator,
};
pub use config::{ActionConfig, DispatchConfig, EngineConfig, RankingConfig, ThreatConfig};
pub use event::EngineEvent;
pub use geo::GeoPoint;
pub use ids::{ActionTaskId, GuardianId, IncidentId, UserId};
pub use incident::{AttemptOutcome, DispatchAttempt, DispatchStatus, Incident, IncidentState};
pub use threat::{ThreatLevel, ThreatState, ThreatTransition};
