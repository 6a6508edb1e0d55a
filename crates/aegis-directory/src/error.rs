use aegis_types::GuardianId;
use thiserror::Error;

/// Errors from the guardian directory. Structural problems surface
/// directly to the caller; they are never silently swallowed.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DirectoryError {
    #[error("unknown guardian: {0}")]
    UnknownGuardian(GuardianId),

    #[error("directory lock poisoned")]
    LockPoisoned,
}
