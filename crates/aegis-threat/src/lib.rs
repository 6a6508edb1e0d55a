//! Threat monitor: folds periodic risk signals into a smoothed score
//! and drives a hysteresis state machine over the threat levels.
//!
//! The monitor emits transitions; it never calls dispatch logic. The
//! coordinator decides what a transition means.

#![deny(unsafe_code)]

mod error;
mod monitor;

pub use error::ThreatError;
pub use monitor::{SampleOutcome, ThreatMonitor};
