use thiserror::Error;

use aegis_directory::DirectoryError;
use aegis_ledger::LedgerError;
use aegis_threat::ThreatError;
use aegis_types::{CollaboratorError, GuardianId, IncidentId, IncidentState, ThreatLevel, UserId};

/// Errors surfaced by the dispatch coordinator.
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("threat level {} does not warrant dispatch", .0.as_str())]
    ThreatBelowDispatchLevel(ThreatLevel),

    #[error("{0} already has an open incident")]
    IncidentAlreadyOpen(UserId),

    #[error("no guardians available for the first dispatch round")]
    NoCandidatesAvailable,

    #[error("unknown incident {0}")]
    UnknownIncident(IncidentId),

    #[error("{0} was never alerted for this incident")]
    UnknownGuardian(GuardianId),

    #[error("{incident} is already {}", state.as_str())]
    IncidentClosed {
        incident: IncidentId,
        state: IncidentState,
    },

    #[error("an incident cannot be resolved before any guardian responded or any round elapsed")]
    PrematureResolution,

    #[error(transparent)]
    Directory(#[from] DirectoryError),

    #[error(transparent)]
    Ledger(#[from] LedgerError),
}

/// Top-level error for the engine facade.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Threat(#[from] ThreatError),

    #[error(transparent)]
    Dispatch(#[from] DispatchError),

    #[error(transparent)]
    Directory(#[from] DirectoryError),

    #[error(transparent)]
    Ledger(#[from] LedgerError),

    #[error(transparent)]
    Collaborator(#[from] CollaboratorError),

    #[error("threat monitor state lock poisoned")]
    LockPoisoned,
}
