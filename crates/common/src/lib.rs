//! Shared types for the cell kernel: identifiers, interned type tags, flags.

mod types;

pub use types::{CellFlags, Kid, RelationType, SymbolTable, TypeTag};
