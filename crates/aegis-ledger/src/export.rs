//! Scoped export views of an incident chain.
//!
//! Redaction is a configuration concern; the default policy masks
//! payloads for the guardian audience and gives everyone else the full
//! record. An export is a copy: producing one never alters the chain.

use std::fmt::Write as _;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use aegis_types::IncidentId;

use crate::error::LedgerError;
use crate::records::{verify_entries, EntryKind, LedgerEntry};

/// Audience requesting the export.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ExportScope {
    SelfView,
    Guardian,
    Lawyer,
    Police,
}

impl ExportScope {
    pub fn as_str(self) -> &'static str {
        match self {
            ExportScope::SelfView => "self",
            ExportScope::Guardian => "guardian",
            ExportScope::Lawyer => "lawyer",
            ExportScope::Police => "police",
        }
    }
}

/// Which audiences see masked payloads.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RedactionPolicy {
    pub mask_payloads_for: Vec<ExportScope>,
}

impl Default for RedactionPolicy {
    fn default() -> Self {
        Self {
            mask_payloads_for: vec![ExportScope::Guardian],
        }
    }
}

impl RedactionPolicy {
    pub fn masks(&self, scope: ExportScope) -> bool {
        self.mask_payloads_for.contains(&scope)
    }
}

/// One entry as seen by an export audience. Hashes are always carried
/// verbatim so a full export can be re-verified against the live chain.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ExportedEntry {
    pub seq: u64,
    pub kind: EntryKind,
    pub timestamp: DateTime<Utc>,
    /// `None` when the policy masked it for this audience.
    pub payload: Option<serde_json::Value>,
    pub prev_hash: Option<[u8; 32]>,
    pub entry_hash: [u8; 32],
    pub redacted: bool,
}

/// A scoped view of one incident chain.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LedgerExport {
    pub incident: IncidentId,
    pub scope: ExportScope,
    pub exported_at: DateTime<Utc>,
    pub entries: Vec<ExportedEntry>,
    /// Hash of the chain head at export time.
    pub head_hash: Option<[u8; 32]>,
}

impl LedgerExport {
    pub(crate) fn build(
        incident: IncidentId,
        scope: ExportScope,
        policy: &RedactionPolicy,
        chain: &[LedgerEntry],
    ) -> Self {
        let mask = policy.masks(scope);
        let entries = chain
            .iter()
            .map(|entry| ExportedEntry {
                seq: entry.seq,
                kind: entry.kind,
                timestamp: entry.timestamp,
                payload: (!mask).then(|| entry.payload.clone()),
                prev_hash: entry.prev_hash,
                entry_hash: entry.entry_hash,
                redacted: mask,
            })
            .collect();

        Self {
            incident,
            scope,
            exported_at: Utc::now(),
            entries,
            head_hash: chain.last().map(|e| e.entry_hash),
        }
    }

    /// Rebuild full ledger entries and re-verify the hash chain. Only
    /// possible for exports whose payloads were not redacted.
    pub fn reverify(&self) -> Result<(), LedgerError> {
        let entries = self
            .entries
            .iter()
            .map(|e| {
                Ok(LedgerEntry {
                    incident: self.incident,
                    seq: e.seq,
                    kind: e.kind,
                    payload: e.payload.clone().ok_or(LedgerError::ExportRedacted)?,
                    timestamp: e.timestamp,
                    prev_hash: e.prev_hash,
                    entry_hash: e.entry_hash,
                })
            })
            .collect::<Result<Vec<_>, LedgerError>>()?;
        verify_entries(&entries)
    }

    /// Human-readable chronological view of the incident.
    pub fn timeline(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(
            out,
            "Incident timeline for {} ({} scope)",
            self.incident,
            self.scope.as_str()
        );
        for entry in &self.entries {
            let detail = match (&entry.payload, entry.redacted) {
                (Some(payload), _) => payload.to_string(),
                (None, true) => "[redacted]".to_string(),
                (None, false) => String::new(),
            };
            let _ = writeln!(
                out,
                "{} - {} {}",
                entry.timestamp.format("%H:%M:%S"),
                entry.kind.as_str(),
                detail
            );
        }
        out
    }
}
