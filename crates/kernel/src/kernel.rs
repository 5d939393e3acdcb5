use cellgraph_common::{CellFlags, Kid, RelationType, SymbolTable, TypeTag};
use serde::{Deserialize, Serialize};

use crate::behavior::{CellBehavior, KernelRequest};
use crate::cell::{Cell, Edge};
use crate::error::{KernelError, Result};
use crate::field::{FieldDescriptor, FieldFlags, FieldValue, ImportContext};

/// A record produced by every structural mutation of the graph.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum KernelEvent {
    Registered { kid: Kid, type_tag: TypeTag },
    Unregistered { kid: Kid },
    RefCreated {
        from: Kid,
        to: Kid,
        relation: Option<RelationType>,
    },
    RefDeleted {
        from: Kid,
        to: Kid,
        relation: Option<RelationType>,
    },
    /// `owner` still referenced `target` when `target` was torn down.
    InvalidReference { owner: Kid, target: Kid },
}

/// Kernel construction options.
#[derive(Debug, Clone)]
pub struct KernelConfig {
    /// Slots reserved up front. The table grows past it on demand.
    pub initial_capacity: usize,
    /// Capability flags given to every new cell. State flags are ignored.
    pub default_flags: CellFlags,
    /// Keep a `KernelEvent` log.
    pub log_events: bool,
}

impl Default for KernelConfig {
    fn default() -> Self {
        Self {
            initial_capacity: 64,
            default_flags: CellFlags::empty(),
            log_events: true,
        }
    }
}

#[derive(Debug)]
struct Slot {
    generation: u32,
    cell: Option<Cell>,
}

/// Registry of live cells.
///
/// Owns identifier allocation, the type-name interner and every edge
/// mutation. Cells are stored in a slot table indexed by the low half of
/// their [`Kid`]; freed slots are reused with a bumped generation, so lookups
/// stay O(1) and a retired identifier never resolves again.
///
/// Not thread safe: callers serialize structural changes.
#[derive(Debug)]
pub struct Kernel {
    slots: Vec<Slot>,
    free: Vec<u32>,
    live: usize,
    symbols: SymbolTable,
    config: KernelConfig,
    events: Vec<KernelEvent>,
}

impl Default for Kernel {
    fn default() -> Self {
        Self::with_config(KernelConfig::default())
    }
}

impl Kernel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: KernelConfig) -> Self {
        Self {
            slots: Vec::with_capacity(config.initial_capacity),
            free: Vec::new(),
            live: 0,
            symbols: SymbolTable::new(),
            config,
            events: Vec::new(),
        }
    }

    pub fn config(&self) -> &KernelConfig {
        &self.config
    }

    // --- Registration ---

    /// Construct and register a cell. Returns its identifier.
    pub fn create(&mut self, behavior: impl CellBehavior) -> Result<Kid> {
        self.create_boxed(Box::new(behavior))
    }

    /// Construct and register a named cell.
    pub fn create_named(&mut self, name: &str, behavior: impl CellBehavior) -> Result<Kid> {
        let kid = self.create(behavior)?;
        self.cell_mut(kid)?.set_name(name);
        Ok(kid)
    }

    /// Construct and register an already boxed behavior.
    ///
    /// A construction refused by `on_construct` leaves the registry untouched.
    pub fn create_boxed(&mut self, mut behavior: Box<dyn CellBehavior>) -> Result<Kid> {
        let type_name = behavior.type_name();
        if let Err(reason) = behavior.on_construct() {
            tracing::debug!(type_name, %reason, "construction refused");
            return Err(KernelError::Construction { type_name, reason });
        }

        let tag = self.symbols.intern(type_name);
        let kid = self.allocate();
        let flags = self.config.default_flags.difference(CellFlags::STATE) | CellFlags::VALID;
        self.slots[kid.index() as usize].cell = Some(Cell::new(kid, tag, flags, behavior));
        self.live += 1;

        tracing::debug!(%kid, type_name, "cell registered");
        self.record(KernelEvent::Registered { kid, type_tag: tag });
        Ok(kid)
    }

    fn allocate(&mut self) -> Kid {
        if let Some(index) = self.free.pop() {
            return Kid::new(index, self.slots[index as usize].generation);
        }
        let index = self.slots.len() as u32;
        self.slots.push(Slot {
            generation: 0,
            cell: None,
        });
        Kid::new(index, 0)
    }

    /// Clear the slot of `kid` and retire the identifier.
    pub(crate) fn unregister(&mut self, kid: Kid) -> Result<Cell> {
        self.cell(kid)?;
        let slot = &mut self.slots[kid.index() as usize];
        let cell = slot.cell.take().ok_or(KernelError::UnknownCell(kid))?;
        // A slot whose generations are used up is never handed out again.
        if slot.generation == u32::MAX {
            tracing::debug!(%kid, "slot generations exhausted, slot retired");
        } else {
            slot.generation += 1;
            self.free.push(kid.index());
        }
        self.live -= 1;

        tracing::debug!(%kid, "cell unregistered");
        self.record(KernelEvent::Unregistered { kid });
        Ok(cell)
    }

    // --- Lookup ---

    /// Live cell for `kid`, or `None`.
    pub fn get(&self, kid: Kid) -> Option<&Cell> {
        let slot = self.slots.get(kid.index() as usize)?;
        if slot.generation != kid.generation() {
            return None;
        }
        slot.cell.as_ref()
    }

    pub fn get_mut(&mut self, kid: Kid) -> Option<&mut Cell> {
        let slot = self.slots.get_mut(kid.index() as usize)?;
        if slot.generation != kid.generation() {
            return None;
        }
        slot.cell.as_mut()
    }

    /// Live cell for `kid`; a destroyed or never issued identifier is an error.
    pub fn cell(&self, kid: Kid) -> Result<&Cell> {
        match self.get(kid) {
            Some(cell) => Ok(cell),
            None => Err(self.lookup_error(kid)),
        }
    }

    pub fn cell_mut(&mut self, kid: Kid) -> Result<&mut Cell> {
        let err = self.lookup_error(kid);
        self.get_mut(kid).ok_or(err)
    }

    fn lookup_error(&self, kid: Kid) -> KernelError {
        match self.slots.get(kid.index() as usize) {
            Some(slot) if kid.generation() < slot.generation => KernelError::Retired(kid),
            Some(slot) if kid.generation() == u32::MAX && slot.generation == u32::MAX && slot.cell.is_none() => {
                KernelError::Retired(kid)
            }
            _ => KernelError::UnknownCell(kid),
        }
    }

    pub fn contains(&self, kid: Kid) -> bool {
        self.get(kid).is_some()
    }

    /// Number of live cells.
    pub fn len(&self) -> usize {
        self.live
    }

    pub fn is_empty(&self) -> bool {
        self.live == 0
    }

    /// Live cells in slot order. The borrow forbids mutation while iterating;
    /// use [`Kernel::kids`] to walk and mutate.
    pub fn cells(&self) -> impl Iterator<Item = &Cell> {
        self.slots.iter().filter_map(|s| s.cell.as_ref())
    }

    /// Snapshot of the live identifiers.
    pub fn kids(&self) -> Vec<Kid> {
        self.cells().map(Cell::kid).collect()
    }

    pub fn cells_of_type(&self, tag: TypeTag) -> impl Iterator<Item = &Cell> {
        self.cells().filter(move |c| c.type_tag() == tag)
    }

    // --- Type tags ---

    pub fn intern(&mut self, type_name: &str) -> TypeTag {
        self.symbols.intern(type_name)
    }

    pub fn type_tag(&self, type_name: &str) -> Option<TypeTag> {
        self.symbols.get(type_name)
    }

    pub fn type_name(&self, tag: TypeTag) -> Option<&str> {
        self.symbols.resolve(tag)
    }

    // --- Lock state ---

    /// Move a cell between the valid and locked states.
    pub fn set_locked(&mut self, kid: Kid, locked: bool) -> Result<()> {
        let cell = self.cell_mut(kid)?;
        cell.flags.set(CellFlags::LOCKED, locked);
        tracing::debug!(%kid, locked, "lock state changed");
        Ok(())
    }

    // --- Event log ---

    pub(crate) fn record(&mut self, event: KernelEvent) {
        if self.config.log_events {
            self.events.push(event);
        }
    }

    pub fn events(&self) -> &[KernelEvent] {
        &self.events
    }

    /// Drain and return the event log.
    pub fn drain_events(&mut self) -> Vec<KernelEvent> {
        std::mem::take(&mut self.events)
    }

    // --- Privileged access ---

    /// Ask a cell for dynamic information. Only cells with
    /// `CellFlags::KERNEL_MSGS` are asked; the others answer `None`.
    pub fn request(&mut self, kid: Kid, request: KernelRequest, context: u32) -> Result<Option<u32>> {
        let cell = self.cell_mut(kid)?;
        if !cell.is_set(CellFlags::KERNEL_MSGS) {
            return Ok(None);
        }
        Ok(cell.behavior.on_kernel_request(request, context))
    }

    /// Byte size of field `name`: the static size, or for dynamically sized
    /// fields the answer to a `KernelRequest::FieldSize`.
    pub fn field_size(&mut self, kid: Kid, name: &str) -> Result<Option<usize>> {
        let cell = self.cell(kid)?;
        let fields = cell.behavior.fields();
        let Some(position) = fields.iter().position(|f| f.name == name) else {
            return Ok(None);
        };
        if let Some(size) = fields[position].size() {
            return Ok(Some(size));
        }
        let answer = self.request(kid, KernelRequest::FieldSize, position as u32)?;
        Ok(answer.map(|size| size as usize))
    }

    /// Write field `name` of a cell.
    ///
    /// With `CellFlags::KERNEL_MODIF` the value goes straight to the raw store
    /// and `on_modified_field` fires; otherwise the cell's validating
    /// `set_field` decides. Unknown and read-only fields answer `Ok(false)`.
    pub fn write_field(&mut self, kid: Kid, name: &str, value: FieldValue) -> Result<bool> {
        let cell = self.cell_mut(kid)?;
        if cell.is_locked() {
            return Err(KernelError::Locked(kid));
        }
        let Some(field) = cell.field_descriptor(name) else {
            return Ok(false);
        };
        if value.field_type() != field.ty {
            return Err(KernelError::FieldType {
                field: name.to_owned(),
                expected: field.ty,
                found: value.field_type(),
            });
        }
        if field.flags.contains(FieldFlags::READ_ONLY) {
            return Ok(false);
        }
        Ok(store_field(cell, field, value))
    }

    /// Pull field values from `ctx` into a cell; returns how many were stored.
    pub fn import(&mut self, kid: Kid, ctx: &mut dyn ImportContext) -> Result<usize> {
        let cell = self.cell_mut(kid)?;
        if cell.is_locked() {
            return Err(KernelError::Locked(kid));
        }
        let mut imported = 0;
        for field in cell.behavior.fields() {
            if field.flags.contains(FieldFlags::TRANSIENT) {
                continue;
            }
            let Some(value) = ctx.import_field(field) else {
                continue;
            };
            if value.field_type() == field.ty && store_field(cell, field, value) {
                imported += 1;
            }
        }
        Ok(imported)
    }

    // --- Integrity ---

    /// Check every edge is mirrored exactly once on the other side and every
    /// slot holds the cell its identifier names.
    pub fn check_integrity(&self) -> Result<()> {
        for (index, slot) in self.slots.iter().enumerate() {
            let Some(cell) = slot.cell.as_ref() else {
                continue;
            };
            if cell.kid != Kid::new(index as u32, slot.generation) {
                return Err(KernelError::UnknownCell(cell.kid));
            }
            for edge in &cell.refs {
                let target = self.cell(edge.kid)?;
                let mirrored = count(&target.owners, Edge::new(cell.kid, edge.relation));
                if mirrored != 1 || count(&cell.refs, *edge) != 1 {
                    return Err(KernelError::EdgeInvariant {
                        from: cell.kid,
                        to: edge.kid,
                    });
                }
            }
            for edge in &cell.owners {
                let owner = self.cell(edge.kid)?;
                if count(&owner.refs, Edge::new(cell.kid, edge.relation)) != 1 {
                    return Err(KernelError::EdgeInvariant {
                        from: edge.kid,
                        to: cell.kid,
                    });
                }
            }
        }
        Ok(())
    }
}

fn count(edges: &[Edge], edge: Edge) -> usize {
    edges.iter().filter(|e| **e == edge).count()
}

/// Route a type-checked value to the privileged store or the public setter.
fn store_field(cell: &mut Cell, field: &FieldDescriptor, value: FieldValue) -> bool {
    if cell.is_set(CellFlags::KERNEL_MODIF) {
        if !cell.behavior.write_field(field, value) {
            return false;
        }
        cell.behavior.on_modified_field(field);
        true
    } else {
        cell.behavior.set_field(field, value)
    }
}
