//! Reference graph protocol: paired edge maintenance, dependency queries,
//! gated destruction, cloning and one-hop command dispatch.

use cellgraph_common::{CellFlags, Kid, RelationType, TypeTag};

use crate::behavior::{CellMessage, DestructContext};
use crate::cell::Edge;
use crate::error::{KernelError, Result};
use crate::kernel::{Kernel, KernelEvent};

/// Direction of a `Kernel::dispatch_command` broadcast.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatch {
    /// Cells this cell references.
    Refs,
    /// Cells referencing this cell.
    Owners,
}

/// Which edges between two cells an unlink touches.
#[derive(Debug, Clone, Copy)]
enum RelationFilter {
    Any,
    Exactly(Option<RelationType>),
}

impl RelationFilter {
    fn accepts(self, relation: Option<RelationType>) -> bool {
        match self {
            Self::Any => true,
            Self::Exactly(wanted) => wanted == relation,
        }
    }
}

impl Kernel {
    // --- Edge creation ---

    /// Make `from` reference `to`.
    ///
    /// Returns `Ok(true)` when the edge exists afterwards (creating an
    /// existing edge is a no-op) and `Ok(false)` for a rejected
    /// self-reference. A locked endpoint is an error.
    pub fn create_ref(&mut self, from: Kid, to: Kid) -> Result<bool> {
        self.link(from, to, None)
    }

    /// Like [`Kernel::create_ref`], tagging the edge with `relation`.
    ///
    /// The same target may be referenced once per distinct relation, each
    /// edge mirrored by its own owner entry.
    pub fn create_typed_ref(&mut self, from: Kid, to: Kid, relation: RelationType) -> Result<bool> {
        self.link(from, to, Some(relation))
    }

    fn link(&mut self, from: Kid, to: Kid, relation: Option<RelationType>) -> Result<bool> {
        let source = self.cell(from)?;
        let target = self.cell(to)?;
        if from == to {
            tracing::debug!(kid = %from, "self reference rejected");
            return Ok(false);
        }
        if source.is_locked() {
            return Err(KernelError::Locked(from));
        }
        if target.is_locked() {
            return Err(KernelError::Locked(to));
        }

        let edge = Edge::new(to, relation);
        let mirror = Edge::new(from, relation);
        if source.refs.contains(&edge) {
            if !target.owners.contains(&mirror) {
                return Err(KernelError::EdgeInvariant { from, to });
            }
            return Ok(true);
        }

        self.cell_mut(from)?.refs.push(edge);
        self.cell_mut(to)?.owners.push(mirror);
        tracing::debug!(%from, %to, ?relation, "reference created");
        self.record(KernelEvent::RefCreated { from, to, relation });
        Ok(true)
    }

    // --- Edge removal ---

    /// Remove every edge from `from` to `to`, on both sides.
    /// Returns `Ok(false)` and changes nothing when there was none.
    pub fn delete_ref(&mut self, from: Kid, to: Kid) -> Result<bool> {
        self.unlink(from, to, RelationFilter::Any)
    }

    /// Remove only the edge from `from` to `to` tagged `relation`.
    pub fn delete_typed_ref(&mut self, from: Kid, to: Kid, relation: RelationType) -> Result<bool> {
        self.unlink(from, to, RelationFilter::Exactly(Some(relation)))
    }

    fn unlink(&mut self, from: Kid, to: Kid, filter: RelationFilter) -> Result<bool> {
        let source = self.cell(from)?;
        let target = self.cell(to)?;
        let present = source
            .refs
            .iter()
            .any(|e| e.kid == to && filter.accepts(e.relation));
        if !present {
            return Ok(false);
        }
        if source.is_locked() {
            return Err(KernelError::Locked(from));
        }
        if target.is_locked() {
            return Err(KernelError::Locked(to));
        }

        let mut removed = Vec::new();
        self.cell_mut(from)?.refs.retain(|e| {
            let hit = e.kid == to && filter.accepts(e.relation);
            if hit {
                removed.push(e.relation);
            }
            !hit
        });
        for relation in removed {
            self.drop_owner(to, Edge::new(from, relation))?;
            tracing::debug!(%from, %to, ?relation, "reference deleted");
            self.record(KernelEvent::RefDeleted { from, to, relation });
        }
        Ok(true)
    }

    /// Remove one owner entry from `target`.
    fn drop_owner(&mut self, target: Kid, mirror: Edge) -> Result<()> {
        let owners = &mut self.cell_mut(target)?.owners;
        match owners.iter().position(|e| *e == mirror) {
            Some(i) => {
                owners.remove(i);
                Ok(())
            }
            None => Err(KernelError::EdgeInvariant {
                from: mirror.kid,
                to: target,
            }),
        }
    }

    /// Re-point every edge from `from` to `old` at `new`, keeping relations
    /// and positions. An edge that would duplicate an existing one collapses
    /// into it. Returns `Ok(false)` when `from` had no edge to `old` or when
    /// `new` is `from` itself.
    pub fn replace_ref(&mut self, from: Kid, old: Kid, new: Kid) -> Result<bool> {
        let source = self.cell(from)?;
        let old_target = self.cell(old)?;
        let new_target = self.cell(new)?;
        if !source.references(old) || new == from {
            return Ok(false);
        }
        if old == new {
            return Ok(true);
        }
        for (kid, cell) in [(from, source), (old, old_target), (new, new_target)] {
            if cell.is_locked() {
                return Err(KernelError::Locked(kid));
            }
        }

        let mut moved = Vec::new();
        let mut collapsed = Vec::new();
        let refs = &mut self.cell_mut(from)?.refs;
        let mut i = 0;
        while i < refs.len() {
            if refs[i].kid != old {
                i += 1;
                continue;
            }
            let relation = refs[i].relation;
            let replacement = Edge::new(new, relation);
            if refs.contains(&replacement) {
                refs.remove(i);
                collapsed.push(relation);
            } else {
                refs[i] = replacement;
                moved.push(relation);
                i += 1;
            }
        }

        for &relation in moved.iter().chain(&collapsed) {
            self.drop_owner(old, Edge::new(from, relation))?;
            self.record(KernelEvent::RefDeleted {
                from,
                to: old,
                relation,
            });
        }
        for relation in moved {
            self.cell_mut(new)?.owners.push(Edge::new(from, relation));
            self.record(KernelEvent::RefCreated {
                from,
                to: new,
                relation,
            });
        }
        tracing::debug!(%from, %old, %new, "reference replaced");
        Ok(true)
    }

    // --- Queries ---

    /// Append the cells `kid` references whose type is `of_type` (all when
    /// `None`) to `out`. A target reached through several relations is
    /// listed once. Returns the number appended.
    pub fn get_dependencies(&self, kid: Kid, out: &mut Vec<Kid>, of_type: Option<TypeTag>) -> Result<usize> {
        let cell = self.cell(kid)?;
        let start = out.len();
        for target in cell.refs() {
            if out[start..].contains(&target) {
                continue;
            }
            let matches = match of_type {
                Some(tag) => self.cell(target)?.type_tag() == tag,
                None => true,
            };
            if matches {
                out.push(target);
            }
        }
        Ok(out.len() - start)
    }

    // --- Destruction ---

    /// Whether `kid` may be destroyed now: no owners left, and the behavior's
    /// own precondition holds.
    pub fn can_destruct(&self, kid: Kid) -> Result<bool> {
        let cell = self.cell(kid)?;
        Ok(cell.owners.is_empty() && cell.behavior.can_destruct())
    }

    /// The sanctioned destruction path.
    ///
    /// Returns `Ok(false)` and leaves everything untouched when the cell is
    /// still owned or refuses. Otherwise releases every outgoing reference,
    /// the notification bundle, named data and data blocks, unregisters the
    /// identifier and drops the cell.
    pub fn self_destruct(&mut self, kid: Kid, context: u32, user_data: u64) -> Result<bool> {
        if !self.can_destruct(kid)? {
            tracing::debug!(%kid, owners = self.cell(kid)?.nb_owners(), "destruction refused");
            return Ok(false);
        }
        self.teardown(kid, DestructContext { context, user_data })?;
        Ok(true)
    }

    /// Kernel-initiated destruction.
    ///
    /// A cell flagged `CellFlags::KERNEL_DESTRUCT` is destroyed without
    /// consulting its behavior, as soon as it has no owners. Other cells go
    /// through [`Kernel::self_destruct`].
    pub fn destroy(&mut self, kid: Kid) -> Result<bool> {
        let cell = self.cell(kid)?;
        if !cell.is_set(CellFlags::KERNEL_DESTRUCT) {
            return self.self_destruct(kid, 0, 0);
        }
        if !cell.owners.is_empty() {
            return Ok(false);
        }
        self.teardown(kid, DestructContext::default())?;
        Ok(true)
    }

    fn teardown(&mut self, kid: Kid, context: DestructContext) -> Result<()> {
        if self.cell(kid)?.is_locked() {
            tracing::warn!(%kid, "refusing to destroy a locked cell");
            return Err(KernelError::Locked(kid));
        }

        // Each pair is removed on both sides before the next is touched.
        let refs = self.cell(kid)?.refs.clone();
        for edge in refs {
            self.drop_owner(edge.kid, Edge::new(kid, edge.relation))?;
            let own = &mut self.cell_mut(kid)?.refs;
            if let Some(i) = own.iter().position(|e| *e == edge) {
                own.remove(i);
            }
            self.record(KernelEvent::RefDeleted {
                from: kid,
                to: edge.kid,
                relation: edge.relation,
            });
        }

        // Owners are normally gone by now; anything left is a one-sided edge.
        let owners = std::mem::take(&mut self.cell_mut(kid)?.owners);
        for edge in owners {
            tracing::warn!(%kid, owner = %edge.kid, "owner still attached at destruction");
            let Some(owner) = self.get_mut(edge.kid) else {
                continue;
            };
            let notified = owner.is_set(CellFlags::KERNEL_INVALIDREF);
            if notified {
                owner.behavior.on_invalid_reference(kid);
            }
            let mirror = Edge::new(kid, edge.relation);
            if let Some(i) = owner.refs.iter().position(|e| *e == mirror) {
                owner.refs.remove(i);
            }
            if notified {
                self.record(KernelEvent::InvalidReference {
                    owner: edge.kid,
                    target: kid,
                });
            }
            self.record(KernelEvent::RefDeleted {
                from: edge.kid,
                to: kid,
                relation: edge.relation,
            });
        }

        let cell = self.cell_mut(kid)?;
        cell.behavior.on_destruct(context);
        cell.release_auxiliary();
        let cell = self.unregister(kid)?;
        tracing::debug!(%kid, type_name = cell.type_name(), "cell destroyed");
        Ok(())
    }

    // --- Cloning ---

    /// Create a new cell of the same type as `kid`, with the same name and
    /// capability flags. With `copy_members` every readable field is copied
    /// through the reflection contract. Edges, notifications, named data and
    /// data blocks are never copied.
    pub fn clone_cell(&mut self, kid: Kid, copy_members: bool) -> Result<Kid> {
        let source = self.cell(kid)?;
        let behavior = source.behavior.instantiate();
        let name = source.name.clone();
        let flags = source.flags.difference(CellFlags::STATE);
        let values: Vec<_> = if copy_members {
            source
                .behavior
                .fields()
                .iter()
                .filter_map(|f| source.behavior.read_field(f).map(|v| (f, v)))
                .collect()
        } else {
            Vec::new()
        };

        let copy = self.create_boxed(behavior)?;
        let cell = self.cell_mut(copy)?;
        cell.name = name;
        cell.flags |= flags;
        let wanted = values.len();
        let mut copied = 0;
        for (field, value) in values {
            if cell.behavior.write_field(field, value) {
                copied += 1;
            } else {
                tracing::debug!(source = %kid, %copy, field = field.name, "member not copied");
            }
        }
        tracing::debug!(source = %kid, %copy, copied, wanted, "cell cloned");
        Ok(copy)
    }

    // --- Commands & messages ---

    /// Direct references or owners of `kid`, each listed once, restricted to
    /// `of_type` when given.
    fn neighbors(&self, kid: Kid, to: Dispatch, of_type: Option<TypeTag>) -> Result<Vec<Kid>> {
        let cell = self.cell(kid)?;
        let candidates: Vec<Kid> = match to {
            Dispatch::Refs => cell.refs().collect(),
            Dispatch::Owners => cell.owners().collect(),
        };
        let mut out = Vec::with_capacity(candidates.len());
        for candidate in candidates {
            if out.contains(&candidate) {
                continue;
            }
            if of_type.is_none_or(|tag| self.cell(candidate).is_ok_and(|c| c.type_tag() == tag)) {
                out.push(candidate);
            }
        }
        Ok(out)
    }

    /// Send `command` to the direct references or owners of `kid`. One hop
    /// only. Returns how many recipients recognized the command.
    pub fn dispatch_command(&mut self, kid: Kid, command: &str, user_data: u64, to: Dispatch) -> Result<usize> {
        let mut recognized = 0;
        for recipient in self.neighbors(kid, to, None)? {
            if self.cell_mut(recipient)?.exec_command(Some(command), user_data) {
                recognized += 1;
            }
        }
        tracing::debug!(%kid, command, recognized, "command dispatched");
        Ok(recognized)
    }

    /// Deliver `msg` to one cell. Returns whether it was caught.
    pub fn message(&mut self, kid: Kid, msg: &CellMessage) -> Result<bool> {
        Ok(self.cell_mut(kid)?.behavior.on_message(msg))
    }

    /// Broadcast `msg` one hop from `kid`, to cells of type `of_type` (all
    /// when `None`). Recipients are served by ascending
    /// [`CellBehavior::priority`](crate::CellBehavior::priority), ties in edge order. Returns how many
    /// caught the message.
    pub fn send_msg(&mut self, kid: Kid, msg: &CellMessage, to: Dispatch, of_type: Option<TypeTag>) -> Result<usize> {
        let mut recipients = self.neighbors(kid, to, of_type)?;
        let mut ranked = Vec::with_capacity(recipients.len());
        for recipient in recipients.drain(..) {
            ranked.push((self.cell(recipient)?.behavior.priority(), recipient));
        }
        ranked.sort_by_key(|(priority, _)| *priority);

        let mut caught = 0;
        for (_, recipient) in ranked {
            if self.message(recipient, msg)? {
                caught += 1;
            }
        }
        tracing::debug!(%kid, code = msg.code, ?to, caught, "message sent");
        Ok(caught)
    }
}
