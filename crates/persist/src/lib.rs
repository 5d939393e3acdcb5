//! Snapshot capture and restore of cell graphs.
//!
//! Only cells flagged `SERIALIZE` are captured. Field values travel through
//! the kernel's export/import seam, so behaviors never see a byte format.
//!
//! # Invariants
//! - A snapshot is content-addressed: `verify` recomputes its sha256.
//! - Restoring never reuses recorded identifiers; the caller gets an
//!   old-to-new map instead.
//! - Edges are rebuilt only between cells present in the snapshot.

mod factory;
mod snapshot;

pub use factory::CellFactory;
pub use snapshot::{CellRecord, PersistError, Snapshot};
