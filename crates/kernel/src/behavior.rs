use cellgraph_common::Kid;
use std::any::Any;

use crate::field::{FieldDescriptor, FieldValue};

/// Dynamic information the kernel can ask a cell for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KernelRequest {
    /// Byte size of a dynamically sized field. The context is the field's
    /// position in `CellBehavior::fields`.
    FieldSize,
}

/// Arguments forwarded from `Kernel::self_destruct` to `on_destruct`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DestructContext {
    pub context: u32,
    pub user_data: u64,
}

/// A typed message routed between cells by `Kernel::message` and
/// `Kernel::send_msg`. The meaning of `code` and `param` is up to the
/// cell variants exchanging it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CellMessage {
    pub sender: Kid,
    pub code: u32,
    pub param: u64,
}

impl CellMessage {
    pub const fn new(sender: Kid, code: u32, param: u64) -> Self {
        Self { sender, code, param }
    }
}

/// Capability interface implemented by every concrete cell variant.
///
/// The kernel owns the graph bookkeeping (identifier, name, flags, edges,
/// notifications); a behavior only carries the variant's own state and
/// answers the hooks below. Every hook except the identity methods has a
/// default meaning "not overridden".
pub trait CellBehavior: Any {
    /// Type name, interned by the kernel into the cell's `TypeTag`.
    fn type_name(&self) -> &'static str;

    /// Fresh, default-initialized instance of the same variant.
    fn instantiate(&self) -> Box<dyn CellBehavior>;

    fn as_any(&self) -> &dyn Any;

    fn as_any_mut(&mut self) -> &mut dyn Any;

    /// Last chance to refuse construction. A refused cell is never registered.
    fn on_construct(&mut self) -> Result<(), String> {
        Ok(())
    }

    /// Declared fields, in a stable order.
    fn fields(&self) -> &'static [FieldDescriptor] {
        &[]
    }

    fn read_field(&self, _field: &FieldDescriptor) -> Option<FieldValue> {
        None
    }

    /// Raw store, used by the kernel's privileged path, clones and imports.
    fn write_field(&mut self, _field: &FieldDescriptor, _value: FieldValue) -> bool {
        false
    }

    fn validate_field(&self, _field: &FieldDescriptor, _value: &FieldValue) -> bool {
        true
    }

    /// Public write contract used when the kernel holds no write privilege.
    fn set_field(&mut self, field: &FieldDescriptor, value: FieldValue) -> bool {
        self.validate_field(field, &value) && self.write_field(field, value)
    }

    /// Called after a privileged direct write. Returns true if handled.
    fn on_modified_field(&mut self, _field: &FieldDescriptor) -> bool {
        false
    }

    fn on_kernel_request(&mut self, _request: KernelRequest, _context: u32) -> Option<u32> {
        None
    }

    /// Called when a referenced cell is torn down while still referenced.
    /// Only delivered to cells with `CellFlags::KERNEL_INVALIDREF`.
    fn on_invalid_reference(&mut self, _invalid: Kid) -> bool {
        false
    }

    /// Extra destruction precondition on top of the zero-owner rule.
    fn can_destruct(&self) -> bool {
        true
    }

    fn on_destruct(&mut self, _context: DestructContext) {}

    /// Names of the commands `exec_command` recognizes.
    fn commands(&self) -> &'static [&'static str] {
        &[]
    }

    fn exec_command(&mut self, _command: &str, _user_data: u64) -> bool {
        false
    }

    /// Discovery hook, called once per entry of `commands`.
    fn enum_command(&mut self, _command: &str, _user_data: u64) {}

    /// Returns true if the message was caught.
    fn on_message(&mut self, _msg: &CellMessage) -> bool {
        false
    }

    /// Delivery rank for broadcast messages; lower values are served first.
    fn priority(&self) -> u32 {
        0
    }
}

/// Plain cell with no fields and no commands.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BasicCell {
    type_name: &'static str,
}

impl BasicCell {
    pub fn new() -> Self {
        Self::default()
    }

    /// A plain cell filed under its own type name.
    pub fn typed(type_name: &'static str) -> Self {
        Self { type_name }
    }
}

impl Default for BasicCell {
    fn default() -> Self {
        Self { type_name: "Cell" }
    }
}

impl CellBehavior for BasicCell {
    fn type_name(&self) -> &'static str {
        self.type_name
    }

    fn instantiate(&self) -> Box<dyn CellBehavior> {
        Box::new(self.clone())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}
