//! Guardian directory: the set of known volunteer responders and the
//! proximity/ranking queries the dispatcher runs against it.
//!
//! Leaf component with no dependencies on the rest of the engine.
//! Reads run in parallel behind a read lock; writes serialize per call
//! but are independent across guardians in effect, since each write
//! touches a single record.

#![deny(unsafe_code)]

mod directory;
mod error;

pub use directory::{Guardian, GuardianDirectory};
pub use error::DirectoryError;
