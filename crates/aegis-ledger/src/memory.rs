use std::collections::{HashMap, HashSet};
use std::sync::RwLock;

use chrono::Utc;

use aegis_types::IncidentId;

use crate::error::LedgerError;
use crate::export::{ExportScope, LedgerExport, RedactionPolicy};
use crate::records::{recompute_entry_hash, verify_entries, EntryKind, LedgerEntry};
use crate::traits::{LedgerReader, LedgerWriter};

/// In-memory evidence ledger: one hash chain per incident.
///
/// Appends take the write lock, so entries within a chain are
/// serialized and sequence numbers match true arrival order; chains
/// for independent incidents contend only on the map lock itself.
pub struct InMemoryLedger {
    inner: RwLock<LedgerState>,
    policy: RedactionPolicy,
}

#[derive(Default)]
struct LedgerState {
    chains: HashMap<IncidentId, Vec<LedgerEntry>>,
    hash_index: HashSet<[u8; 32]>,
}

impl InMemoryLedger {
    pub fn new() -> Self {
        Self::with_policy(RedactionPolicy::default())
    }

    pub fn with_policy(policy: RedactionPolicy) -> Self {
        Self {
            inner: RwLock::new(LedgerState::default()),
            policy,
        }
    }

    #[cfg(test)]
    pub(crate) fn tamper<F>(&self, incident: IncidentId, mutate: F)
    where
        F: FnOnce(&mut Vec<LedgerEntry>),
    {
        let mut state = self.inner.write().unwrap();
        mutate(state.chains.get_mut(&incident).unwrap());
    }
}

impl Default for InMemoryLedger {
    fn default() -> Self {
        Self::new()
    }
}

impl LedgerWriter for InMemoryLedger {
    fn append(
        &self,
        incident: IncidentId,
        kind: EntryKind,
        payload: serde_json::Value,
    ) -> Result<LedgerEntry, LedgerError> {
        let mut state = self.inner.write().map_err(|_| LedgerError::LockPoisoned)?;

        let chain = state.chains.entry(incident).or_default();
        let seq = (chain.len() + 1) as u64;
        let prev_hash = chain.last().map(|e| e.entry_hash);

        let mut entry = LedgerEntry {
            incident,
            seq,
            kind,
            payload,
            timestamp: Utc::now(),
            prev_hash,
            entry_hash: [0; 32],
        };
        entry.entry_hash = recompute_entry_hash(&entry)?;

        if !state.hash_index.insert(entry.entry_hash) {
            return Err(LedgerError::HashCollision);
        }
        // hash_index insert borrowed state mutably, re-borrow the chain.
        state
            .chains
            .get_mut(&incident)
            .ok_or(LedgerError::UnknownIncident(incident))?
            .push(entry.clone());

        tracing::debug!(incident = %incident, seq, kind = kind.as_str(), "ledger entry appended");
        Ok(entry)
    }
}

impl LedgerReader for InMemoryLedger {
    fn read_all(&self, incident: IncidentId) -> Result<Vec<LedgerEntry>, LedgerError> {
        let state = self.inner.read().map_err(|_| LedgerError::LockPoisoned)?;
        Ok(state.chains.get(&incident).cloned().unwrap_or_default())
    }

    fn head(&self, incident: IncidentId) -> Result<Option<LedgerEntry>, LedgerError> {
        let state = self.inner.read().map_err(|_| LedgerError::LockPoisoned)?;
        Ok(state
            .chains
            .get(&incident)
            .and_then(|chain| chain.last())
            .cloned())
    }

    fn verify(&self, incident: IncidentId) -> Result<(), LedgerError> {
        let state = self.inner.read().map_err(|_| LedgerError::LockPoisoned)?;
        let chain = state
            .chains
            .get(&incident)
            .ok_or(LedgerError::UnknownIncident(incident))?;
        verify_entries(chain)
    }

    fn export(&self, incident: IncidentId, scope: ExportScope) -> Result<LedgerExport, LedgerError> {
        let state = self.inner.read().map_err(|_| LedgerError::LockPoisoned)?;
        let chain = state
            .chains
            .get(&incident)
            .ok_or(LedgerError::UnknownIncident(incident))?;
        Ok(LedgerExport::build(incident, scope, &self.policy, chain))
    }

    fn incidents(&self) -> Result<Vec<IncidentId>, LedgerError> {
        let state = self.inner.read().map_err(|_| LedgerError::LockPoisoned)?;
        let mut ids: Vec<_> = state.chains.keys().copied().collect();
        ids.sort();
        Ok(ids)
    }
}
