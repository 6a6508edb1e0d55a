//! Dispatch coordination and the engine facade.
//!
//! The coordinator turns a dispatch-worthy threat state into alert
//! rounds against the guardian directory, escalating outward until
//! enough guardians acknowledge, the user closes the incident, or the
//! time budget runs out. [`SafetyEngine`] wires the coordinator to the
//! threat monitor, the evidence ledger, and the action orchestrator
//! behind one API.

#![deny(unsafe_code)]

mod actor;
mod escalation;

pub mod coordinator;
pub mod engine;
pub mod error;

pub use coordinator::DispatchCoordinator;
pub use engine::{Collaborators, SafetyEngine, SignalReport};
pub use error::{DispatchError, EngineError};
