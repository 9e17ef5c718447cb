//! Storage collaborator interface for the transaction core.
//!
//! The physical key-value engine lives outside this workspace. The core only
//! needs byte-oriented get/put/scan by row key within one partition, which is
//! what [`Partition`] describes, plus the versioned-cell layout in [`si`] used
//! by read resolution and conflict detection.
#![deny(missing_docs)]

pub mod engine;
pub mod si;

pub use engine::{MemoryPartition, Partition, Result, Row, StorageError};
pub use si::{CellVersion, SiTable, Stamp};
