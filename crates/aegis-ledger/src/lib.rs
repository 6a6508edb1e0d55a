//! Evidence ledger: the tamper-evident record of everything that
//! happened during an incident.
//!
//! This crate provides:
//! - append-only reader/writer trait boundaries for incident chains
//! - an in-memory hash-chained ledger implementation
//! - chain verification that detects retroactive edits and reordering
//! - scoped export views (self / guardian / lawyer / police) that never
//!   touch the underlying chain

#![deny(unsafe_code)]

pub mod error;
pub mod export;
pub mod memory;
pub mod records;
pub mod traits;

pub use error::LedgerError;
pub use export::{ExportScope, ExportedEntry, LedgerExport, RedactionPolicy};
pub use memory::InMemoryLedger;
pub use records::{verify_entries, EntryKind, LedgerEntry};
pub use traits::{LedgerReader, LedgerWriter};
