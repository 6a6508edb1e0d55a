use aegis_types::IncidentId;
use thiserror::Error;

/// Errors returned by evidence ledger interfaces.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LedgerError {
    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("no chain exists for {0}")]
    UnknownIncident(IncidentId),

    #[error("entry hash collision")]
    HashCollision,

    #[error("chain verification failed at seq {seq}: {reason}")]
    ChainVerificationFailed { seq: u64, reason: String },

    #[error("redacted export cannot be re-verified")]
    ExportRedacted,

    #[error("ledger lock poisoned")]
    LockPoisoned,
}
