use aegis_types::IncidentId;

use crate::error::LedgerError;
use crate::export::{ExportScope, LedgerExport};
use crate::records::{EntryKind, LedgerEntry};

/// Write boundary: `append` is the only mutation a ledger offers.
/// There is no update and no delete.
pub trait LedgerWriter: Send + Sync {
    fn append(
        &self,
        incident: IncidentId,
        kind: EntryKind,
        payload: serde_json::Value,
    ) -> Result<LedgerEntry, LedgerError>;
}

/// Read boundary: chain queries, verification, and scoped export.
pub trait LedgerReader: Send + Sync {
    fn read_all(&self, incident: IncidentId) -> Result<Vec<LedgerEntry>, LedgerError>;

    fn head(&self, incident: IncidentId) -> Result<Option<LedgerEntry>, LedgerError>;

    /// Recompute the hash chain from the first entry and compare with
    /// what is stored.
    fn verify(&self, incident: IncidentId) -> Result<(), LedgerError>;

    /// Produce a redacted or full view for the requested audience.
    /// Export never alters the underlying chain.
    fn export(&self, incident: IncidentId, scope: ExportScope) -> Result<LedgerExport, LedgerError>;

    fn incidents(&self) -> Result<Vec<IncidentId>, LedgerError>;
}
