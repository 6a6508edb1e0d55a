//! Ledger entry records and chain verification.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use aegis_types::IncidentId;

use crate::error::LedgerError;

/// Domain-separation prefix hashed ahead of every canonical entry.
const HASH_PREFIX: &[u8] = b"aegis-evidence-entry-v1:";

/// Every kind of event an incident chain records.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EntryKind {
    ThreatChanged,
    DispatchSent,
    GuardianAcked,
    Escalated,
    ActionStarted,
    ActionCompleted,
    ActionFailed,
    IncidentResolved,
    IncidentCancelled,
    IncidentExpired,
}

impl EntryKind {
    pub fn as_str(self) -> &'static str {
        match self {
            EntryKind::ThreatChanged => "THREAT_CHANGED",
            EntryKind::DispatchSent => "DISPATCH_SENT",
            EntryKind::GuardianAcked => "GUARDIAN_ACKED",
            EntryKind::Escalated => "ESCALATED",
            EntryKind::ActionStarted => "ACTION_STARTED",
            EntryKind::ActionCompleted => "ACTION_COMPLETED",
            EntryKind::ActionFailed => "ACTION_FAILED",
            EntryKind::IncidentResolved => "INCIDENT_RESOLVED",
            EntryKind::IncidentCancelled => "INCIDENT_CANCELLED",
            EntryKind::IncidentExpired => "INCIDENT_EXPIRED",
        }
    }
}

/// One immutable, hash-linked record in an incident chain.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub incident: IncidentId,
    /// Strictly increasing within one incident, starting at 1.
    pub seq: u64,
    pub kind: EntryKind,
    pub payload: serde_json::Value,
    pub timestamp: DateTime<Utc>,
    /// Hash of the previous entry; `None` only for the first entry.
    pub prev_hash: Option<[u8; 32]>,
    /// blake3 over the canonical entry with this field zeroed.
    pub entry_hash: [u8; 32],
}

/// Recompute what an entry's hash should be from its own contents.
pub(crate) fn recompute_entry_hash(entry: &LedgerEntry) -> Result<[u8; 32], LedgerError> {
    let mut canonical = entry.clone();
    canonical.entry_hash = [0; 32];

    let encoded = serde_json::to_vec(&canonical)
        .map_err(|error| LedgerError::Serialization(error.to_string()))?;

    let mut hasher = blake3::Hasher::new();
    hasher.update(HASH_PREFIX);
    hasher.update(&encoded);
    Ok(*hasher.finalize().as_bytes())
}

/// Validate sequence monotonicity, link integrity, and entry hashes
/// for one chain. Detects any retroactive edit or reordering.
pub fn verify_entries(entries: &[LedgerEntry]) -> Result<(), LedgerError> {
    for (index, entry) in entries.iter().enumerate() {
        let expected_seq = (index + 1) as u64;
        if entry.seq != expected_seq {
            return Err(LedgerError::ChainVerificationFailed {
                seq: entry.seq,
                reason: format!("expected seq {}, found {}", expected_seq, entry.seq),
            });
        }

        let expected_prev = if index == 0 {
            None
        } else {
            Some(entries[index - 1].entry_hash)
        };
        if entry.prev_hash != expected_prev {
            return Err(LedgerError::ChainVerificationFailed {
                seq: entry.seq,
                reason: "previous hash link mismatch".into(),
            });
        }

        let computed = recompute_entry_hash(entry)?;
        if computed != entry.entry_hash {
            return Err(LedgerError::ChainVerificationFailed {
                seq: entry.seq,
                reason: "entry hash mismatch".into(),
            });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entry_kinds_serialize_screaming_snake() {
        let json = serde_json::to_string(&EntryKind::GuardianAcked).unwrap();
        assert_eq!(json, "\"GUARDIAN_ACKED\"");
        assert_eq!(EntryKind::IncidentExpired.as_str(), "INCIDENT_EXPIRED");
    }

    #[test]
    fn verifying_an_empty_chain_is_ok() {
        assert!(verify_entries(&[]).is_ok());
    }
}
