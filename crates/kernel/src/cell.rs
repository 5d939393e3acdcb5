use cellgraph_common::{CellFlags, Kid, RelationType, TypeTag};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::behavior::CellBehavior;
use crate::block::DataBlock;
use crate::field::{ExportContext, FieldDescriptor, FieldFilter, FieldFlags, FieldType, FieldValue};
use crate::notify::{self, EVENT_INVALIDATED, EVENT_VALIDATED, NotifBundle, NotifCallback, NotifOutcome};

/// One side of a reference/owner pair.
///
/// In a reference list `kid` is the referenced cell; in an owner list it is
/// the referencing cell. `relation` is `None` for untyped edges.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Edge {
    pub kid: Kid,
    pub relation: Option<RelationType>,
}

impl Edge {
    pub const fn new(kid: Kid, relation: Option<RelationType>) -> Self {
        Self { kid, relation }
    }
}

/// A node of the cell graph.
///
/// Cells are created and destroyed by the [`Kernel`](crate::Kernel), which also
/// owns every edge mutation. Through a `&mut Cell` callers can only touch
/// cell-local state: name, capability flags, notifications, named data and
/// data blocks.
pub struct Cell {
    pub(crate) kid: Kid,
    pub(crate) tag: TypeTag,
    pub(crate) name: String,
    pub(crate) flags: CellFlags,
    pub(crate) refs: Vec<Edge>,
    pub(crate) owners: Vec<Edge>,
    pub(crate) notifs: Option<NotifBundle>,
    /// Next notification entry id. Lives outside the bundle so ids stay
    /// unique across `clear_notifs`.
    pub(crate) next_notif: u64,
    pub(crate) named: Option<BTreeMap<String, u32>>,
    pub(crate) blocks: Vec<DataBlock>,
    pub(crate) behavior: Box<dyn CellBehavior>,
}

impl Cell {
    pub(crate) fn new(kid: Kid, tag: TypeTag, flags: CellFlags, behavior: Box<dyn CellBehavior>) -> Self {
        Self {
            kid,
            tag,
            name: String::new(),
            flags,
            refs: Vec::new(),
            owners: Vec::new(),
            notifs: None,
            next_notif: 0,
            named: None,
            blocks: Vec::new(),
            behavior,
        }
    }

    pub fn kid(&self) -> Kid {
        self.kid
    }

    pub fn type_tag(&self) -> TypeTag {
        self.tag
    }

    pub fn type_name(&self) -> &'static str {
        self.behavior.type_name()
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn set_name(&mut self, name: impl Into<String>) {
        self.name = name.into();
    }

    // --- Flags ---

    pub fn flags(&self) -> CellFlags {
        self.flags
    }

    pub fn is_set(&self, flags: CellFlags) -> bool {
        self.flags.contains(flags)
    }

    pub fn is_valid(&self) -> bool {
        self.flags.contains(CellFlags::VALID)
    }

    pub fn is_locked(&self) -> bool {
        self.flags.contains(CellFlags::LOCKED)
    }

    /// Enable capability flags. `VALID` and `LOCKED` are ignored here; the
    /// kernel drives them (see `Kernel::set_locked`).
    pub fn enable(&mut self, flags: CellFlags) -> &mut Self {
        self.flags |= flags.difference(CellFlags::STATE);
        self
    }

    pub fn disable(&mut self, flags: CellFlags) -> &mut Self {
        self.flags &= !flags.difference(CellFlags::STATE);
        self
    }

    // --- References & owners ---

    pub fn nb_refs(&self) -> usize {
        self.refs.len()
    }

    /// Referenced cell at position `i`. Positions shift when an edge is removed.
    pub fn get_ref(&self, i: usize) -> Option<Kid> {
        self.refs.get(i).map(|e| e.kid)
    }

    pub fn ref_edges(&self) -> &[Edge] {
        &self.refs
    }

    pub fn refs(&self) -> impl Iterator<Item = Kid> + '_ {
        self.refs.iter().map(|e| e.kid)
    }

    /// References carrying `relation`.
    pub fn typed_refs(&self, relation: RelationType) -> impl Iterator<Item = Kid> + '_ {
        self.refs
            .iter()
            .filter(move |e| e.relation == Some(relation))
            .map(|e| e.kid)
    }

    pub fn references(&self, target: Kid) -> bool {
        self.refs.iter().any(|e| e.kid == target)
    }

    pub fn nb_owners(&self) -> usize {
        self.owners.len()
    }

    pub fn get_owner(&self, i: usize) -> Option<Kid> {
        self.owners.get(i).map(|e| e.kid)
    }

    pub fn owner_edges(&self) -> &[Edge] {
        &self.owners
    }

    pub fn owners(&self) -> impl Iterator<Item = Kid> + '_ {
        self.owners.iter().map(|e| e.kid)
    }

    pub fn is_owned_by(&self, owner: Kid) -> bool {
        self.owners.iter().any(|e| e.kid == owner)
    }

    // --- Behavior ---

    pub fn behavior(&self) -> &dyn CellBehavior {
        self.behavior.as_ref()
    }

    /// Mutable access to the behavior; `None` while the cell is locked.
    pub fn behavior_mut(&mut self) -> Option<&mut dyn CellBehavior> {
        if self.is_locked() {
            return None;
        }
        Some(self.behavior.as_mut())
    }

    pub fn downcast_ref<T: CellBehavior>(&self) -> Option<&T> {
        self.behavior.as_any().downcast_ref()
    }

    /// `None` on a type mismatch or while the cell is locked.
    pub fn downcast_mut<T: CellBehavior>(&mut self) -> Option<&mut T> {
        self.behavior_mut()?.as_any_mut().downcast_mut()
    }

    // --- Notifications ---

    /// Subscribe `callback` to notification `index` for the bits in `bitmask`.
    /// Refused on a locked cell.
    pub fn register_notif(
        &mut self,
        index: u32,
        bitmask: u32,
        callback: NotifCallback,
        user_data: u64,
    ) -> bool {
        if self.is_locked() {
            tracing::debug!(kid = %self.kid, index, "notification refused on locked cell");
            return false;
        }
        let id = self.next_notif;
        self.next_notif += 1;
        self.notifs
            .get_or_insert_with(NotifBundle::default)
            .push(id, index, bitmask, callback, user_data);
        true
    }

    /// Remove the entries at `index`, only those using `callback` when given.
    /// Returns whether anything was removed.
    pub fn remove_notif(&mut self, index: u32, callback: Option<&NotifCallback>) -> bool {
        let Some(bundle) = self.notifs.as_mut() else {
            return false;
        };
        bundle.remove(index, callback) > 0
    }

    /// Drop the whole notification bundle.
    pub fn clear_notifs(&mut self) -> bool {
        self.notifs.take().is_some()
    }

    pub fn nb_notifs(&self) -> usize {
        self.notifs.as_ref().map_or(0, NotifBundle::len)
    }

    pub fn execute_notif(&mut self, index: u32, bitmask: u32, param: u32) -> NotifOutcome {
        notify::execute(self, index, bitmask, param)
    }

    /// Set the `bitmask` bits of event `index` and notify subscribers.
    pub fn validate_event(&mut self, index: u32, bitmask: u32) -> NotifOutcome {
        self.notifs
            .get_or_insert_with(NotifBundle::default)
            .set_event_bits(index, bitmask, true);
        self.execute_notif(index, bitmask, EVENT_VALIDATED)
    }

    /// Clear the `bitmask` bits of event `index` and notify subscribers.
    pub fn invalidate_event(&mut self, index: u32, bitmask: u32) -> NotifOutcome {
        if let Some(bundle) = self.notifs.as_mut() {
            bundle.set_event_bits(index, bitmask, false);
        }
        self.execute_notif(index, bitmask, EVENT_INVALIDATED)
    }

    pub fn event_state(&self, index: u32) -> u32 {
        self.notifs.as_ref().map_or(0, |b| b.event_state(index))
    }

    // --- Named data ---

    /// Bind `value` under `name`, replacing any previous binding.
    pub fn bind_data(&mut self, name: impl Into<String>, value: u32) -> bool {
        self.named.get_or_insert_with(BTreeMap::new).insert(name.into(), value);
        true
    }

    pub fn get_data(&self, name: &str) -> Option<u32> {
        self.named.as_ref()?.get(name).copied()
    }

    pub fn remove_data(&mut self, name: &str) -> Option<u32> {
        let table = self.named.as_mut()?;
        let value = table.remove(name);
        if table.is_empty() {
            self.named = None;
        }
        value
    }

    pub fn nb_data(&self) -> usize {
        self.named.as_ref().map_or(0, BTreeMap::len)
    }

    // --- Data blocks ---

    pub fn create_data_block(&mut self, len: usize) -> DataBlock {
        let block = DataBlock::new(len);
        self.blocks.push(block.clone());
        block
    }

    /// Hold on to a block created elsewhere.
    pub fn share_data_block(&mut self, block: &DataBlock) -> DataBlock {
        if !self.blocks.iter().any(|b| b.same_block(block)) {
            self.blocks.push(block.clone());
        }
        block.clone()
    }

    pub fn data_blocks(&self) -> &[DataBlock] {
        &self.blocks
    }

    // --- Fields ---

    /// Append the descriptors matching `filter`; returns how many were added.
    pub fn get_fields(
        &self,
        out: &mut Vec<&'static FieldDescriptor>,
        filter: FieldFilter,
    ) -> usize {
        let before = out.len();
        out.extend(self.behavior.fields().iter().filter(|f| f.matches(filter)));
        out.len() - before
    }

    pub fn field_descriptor(&self, name: &str) -> Option<&'static FieldDescriptor> {
        self.behavior.fields().iter().find(|f| f.name == name)
    }

    pub fn field_descriptor_by_type(&self, ty: FieldType, user: u32) -> Option<&'static FieldDescriptor> {
        self.behavior
            .fields()
            .iter()
            .find(|f| f.matches(FieldFilter::TypeAndUser(ty, user)))
    }

    pub fn read_field(&self, name: &str) -> Option<FieldValue> {
        let field = self.field_descriptor(name)?;
        self.behavior.read_field(field)
    }

    /// Feed every non-transient field to `ctx`; returns the number exported.
    pub fn export(&self, ctx: &mut dyn ExportContext) -> usize {
        let mut exported = 0;
        for field in self.behavior.fields() {
            if field.flags.contains(FieldFlags::TRANSIENT) {
                continue;
            }
            if let Some(value) = self.behavior.read_field(field) {
                ctx.export_field(field, value);
                exported += 1;
            }
        }
        exported
    }

    // --- Commands ---

    /// Run `command`, or with `None` walk the command list through the
    /// behavior's discovery hook. Returns whether the command was recognized
    /// (or, for discovery, whether any command exists).
    pub fn exec_command(&mut self, command: Option<&str>, user_data: u64) -> bool {
        match command {
            Some(command) => self.behavior.exec_command(command, user_data),
            None => {
                let commands = self.behavior.commands();
                for command in commands {
                    self.behavior.enum_command(command, user_data);
                }
                !commands.is_empty()
            }
        }
    }

    pub(crate) fn release_auxiliary(&mut self) {
        self.notifs = None;
        self.named = None;
        self.blocks.clear();
    }
}

impl fmt::Debug for Cell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Cell")
            .field("kid", &self.kid)
            .field("type", &self.behavior.type_name())
            .field("name", &self.name)
            .field("flags", &self.flags)
            .field("refs", &self.refs)
            .field("owners", &self.owners)
            .field("notifs", &self.nb_notifs())
            .field("named", &self.named)
            .field("blocks", &self.blocks.len())
            .finish()
    }
}
