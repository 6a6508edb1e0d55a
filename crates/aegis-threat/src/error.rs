use thiserror::Error;

/// Errors from the threat monitor.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ThreatError {
    #[error("risk signal {0} outside the accepted range 0..=100")]
    SignalOutOfRange(f64),
}
