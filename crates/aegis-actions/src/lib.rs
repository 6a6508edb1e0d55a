//! Action orchestrator: runs the emergency side-actions (siren,
//! location share, recording, SMS) as independently tracked,
//! cooperatively cancellable tasks.
//!
//! The `(incident, kind)` pair is the idempotency key: starting the
//! same action kind twice within one incident returns the existing
//! task, so retried dispatch rounds never duplicate a siren or a
//! recording. A failed side-action never blocks dispatch or escalation
//! of the core alert.

#![deny(unsafe_code)]

mod orchestrator;
mod runners;

pub use orchestrator::{ActionHandle, ActionOrchestrator};
pub use runners::{NoopRunner, TelephonyRunner};
