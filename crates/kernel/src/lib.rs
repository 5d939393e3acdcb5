//! Cell kernel: registry of identified cells, paired reference/owner edges,
//! gated destruction, per-cell notifications and a field reflection seam.
//!
//! # Invariants
//! - `A` references `B` exactly when `B` lists `A` as owner, once per relation.
//! - Identifiers are unique among live cells; a destroyed identifier never
//!   resolves again.
//! - A cell is destroyed only through the kernel, and only with no owners.
//! - A locked cell rejects edge changes and field writes.
//!
//! The kernel is a plain context object: there is no global registry, and
//! independent kernels never share cells.

mod behavior;
mod block;
mod cell;
mod error;
pub mod field;
mod graph;
mod kernel;
pub mod notify;

#[cfg(test)]
mod testing;

pub use behavior::{BasicCell, CellBehavior, CellMessage, DestructContext, KernelRequest};
pub use block::DataBlock;
pub use cell::{Cell, Edge};
pub use cellgraph_common::{CellFlags, Kid, RelationType, TypeTag};
pub use error::{KernelError, Result};
pub use field::{
    ExportContext, FieldDescriptor, FieldFilter, FieldFlags, FieldMap, FieldType, FieldValue,
    ImportContext,
};
pub use graph::Dispatch;
pub use kernel::{Kernel, KernelConfig, KernelEvent};
pub use notify::{NotifCallback, NotifEvent, NotifOutcome};
