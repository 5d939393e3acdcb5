use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Kernel identifier of a cell.
///
/// The low 32 bits address a slot in the registry table, the high 32 bits
/// carry the slot generation. A slot is only ever reused with a bumped
/// generation, so an identifier held past its cell's destruction never
/// resolves to the cell that later occupies the same slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Kid(pub u64);

impl Kid {
    pub const fn new(index: u32, generation: u32) -> Self {
        Self(((generation as u64) << 32) | index as u64)
    }

    /// Slot index inside the registry table.
    pub const fn index(self) -> u32 {
        self.0 as u32
    }

    /// Generation of the slot when this identifier was issued.
    pub const fn generation(self) -> u32 {
        (self.0 >> 32) as u32
    }
}

impl fmt::Display for Kid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}v{}", self.index(), self.generation())
    }
}

/// Interned cell type name. Comparing two tags is a single integer compare.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TypeTag(pub u32);

/// Relation carried by a typed reference edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RelationType(pub u32);

/// Interner mapping type names to [`TypeTag`]s.
///
/// Tags are dense and stable for the lifetime of the table.
#[derive(Debug, Clone, Default)]
pub struct SymbolTable {
    names: Vec<String>,
    lookup: HashMap<String, TypeTag>,
}

impl SymbolTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Intern `name`, returning the existing tag when already known.
    pub fn intern(&mut self, name: &str) -> TypeTag {
        if let Some(tag) = self.lookup.get(name) {
            return *tag;
        }
        let tag = TypeTag(self.names.len() as u32);
        self.names.push(name.to_owned());
        self.lookup.insert(name.to_owned(), tag);
        tag
    }

    /// Tag of an already interned name.
    pub fn get(&self, name: &str) -> Option<TypeTag> {
        self.lookup.get(name).copied()
    }

    pub fn resolve(&self, tag: TypeTag) -> Option<&str> {
        self.names.get(tag.0 as usize).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

bitflags::bitflags! {
    /// Per-cell state and capability flags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
    pub struct CellFlags: u32 {
        /// Construction finished successfully. Only the kernel sets it.
        const VALID = 1 << 0;
        /// The kernel may write declared fields directly.
        const KERNEL_MODIF = 1 << 1;
        /// The kernel may destroy the cell directly.
        const KERNEL_DESTRUCT = 1 << 2;
        /// The cell answers kernel requests.
        const KERNEL_MSGS = 1 << 3;
        /// The cell is told when one of its references goes away.
        const KERNEL_INVALIDREF = 1 << 4;
        /// The cell takes part in snapshots.
        const SERIALIZE = 1 << 5;
        /// Structural mutation is rejected.
        const LOCKED = 1 << 6;
    }
}

impl CellFlags {
    /// Flags owned by the kernel's state machine; callers can't toggle them.
    pub const STATE: Self = Self::VALID.union(Self::LOCKED);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kid_packs_index_and_generation() {
        let kid = Kid::new(7, 3);
        assert_eq!(kid.index(), 7);
        assert_eq!(kid.generation(), 3);
        assert_ne!(kid, Kid::new(7, 4));
        assert_eq!(kid.to_string(), "#7v3");
    }

    #[test]
    fn interning_is_stable() {
        let mut table = SymbolTable::new();
        let mesh = table.intern("Mesh");
        let light = table.intern("Light");
        assert_ne!(mesh, light);
        assert_eq!(table.intern("Mesh"), mesh);
        assert_eq!(table.resolve(light), Some("Light"));
        assert_eq!(table.get("Camera"), None);
        assert_eq!(table.len(), 2);
    }

    #[test]
    fn state_flags_cover_valid_and_locked() {
        assert!(CellFlags::STATE.contains(CellFlags::VALID));
        assert!(CellFlags::STATE.contains(CellFlags::LOCKED));
        assert!(!CellFlags::STATE.contains(CellFlags::SERIALIZE));
    }
}
