//! Cell variants shared by the unit tests.

use cellgraph_common::Kid;
use glam::Vec3;
use std::any::Any;
use std::cell::RefCell;
use std::rc::Rc;

use crate::behavior::{CellBehavior, CellMessage, DestructContext, KernelRequest};
use crate::block::DataBlock;
use crate::field::{FieldDescriptor, FieldFlags, FieldType, FieldValue};

pub const LIGHT_FIELDS: &[FieldDescriptor] = &[
    FieldDescriptor::new("intensity", FieldType::F32),
    FieldDescriptor::new("color", FieldType::Vec3).with_user(1),
    FieldDescriptor::new("enabled", FieldType::Bool),
    FieldDescriptor::new("serial", FieldType::U32).with_flags(FieldFlags::READ_ONLY),
    FieldDescriptor::new("cache", FieldType::Bytes).with_flags(FieldFlags::TRANSIENT),
];

/// A light with a handful of reflectable fields and two commands.
#[derive(Debug, Clone, PartialEq)]
pub struct Light {
    pub intensity: f32,
    pub color: Vec3,
    pub enabled: bool,
    pub serial: u32,
    pub cache: Vec<u8>,
    pub modified: Vec<&'static str>,
    pub invalid_refs: Vec<Kid>,
    pub discovered: Vec<&'static str>,
    pub pinned: bool,
}

impl Default for Light {
    fn default() -> Self {
        Self {
            intensity: 1.0,
            color: Vec3::ONE,
            enabled: true,
            serial: 0,
            cache: Vec::new(),
            modified: Vec::new(),
            invalid_refs: Vec::new(),
            discovered: Vec::new(),
            pinned: false,
        }
    }
}

impl CellBehavior for Light {
    fn type_name(&self) -> &'static str {
        "Light"
    }

    fn instantiate(&self) -> Box<dyn CellBehavior> {
        Box::new(Light::default())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }

    fn fields(&self) -> &'static [FieldDescriptor] {
        LIGHT_FIELDS
    }

    fn read_field(&self, field: &FieldDescriptor) -> Option<FieldValue> {
        Some(match field.name {
            "intensity" => FieldValue::F32(self.intensity),
            "color" => FieldValue::Vec3(self.color),
            "enabled" => FieldValue::Bool(self.enabled),
            "serial" => FieldValue::U32(self.serial),
            "cache" => FieldValue::Bytes(self.cache.clone()),
            _ => return None,
        })
    }

    fn write_field(&mut self, field: &FieldDescriptor, value: FieldValue) -> bool {
        match (field.name, value) {
            ("intensity", FieldValue::F32(v)) => self.intensity = v,
            ("color", FieldValue::Vec3(v)) => self.color = v,
            ("enabled", FieldValue::Bool(v)) => self.enabled = v,
            ("serial", FieldValue::U32(v)) => self.serial = v,
            ("cache", FieldValue::Bytes(v)) => self.cache = v,
            _ => return false,
        }
        true
    }

    fn validate_field(&self, field: &FieldDescriptor, value: &FieldValue) -> bool {
        match (field.name, value) {
            ("intensity", FieldValue::F32(v)) => *v >= 0.0,
            _ => true,
        }
    }

    fn on_modified_field(&mut self, field: &FieldDescriptor) -> bool {
        self.modified.push(field.name);
        true
    }

    fn on_kernel_request(&mut self, request: KernelRequest, context: u32) -> Option<u32> {
        match request {
            KernelRequest::FieldSize if LIGHT_FIELDS[context as usize].name == "cache" => {
                Some(self.cache.len() as u32)
            }
            KernelRequest::FieldSize => None,
        }
    }

    fn on_invalid_reference(&mut self, invalid: Kid) -> bool {
        self.invalid_refs.push(invalid);
        true
    }

    fn can_destruct(&self) -> bool {
        !self.pinned
    }

    fn commands(&self) -> &'static [&'static str] {
        &["on", "off"]
    }

    fn exec_command(&mut self, command: &str, _user_data: u64) -> bool {
        match command {
            "on" => self.enabled = true,
            "off" => self.enabled = false,
            _ => return false,
        }
        true
    }

    fn enum_command(&mut self, command: &str, _user_data: u64) {
        if let Some(name) = self.commands().iter().find(|c| **c == command) {
            self.discovered.push(*name);
        }
    }
}

/// Refuses construction.
#[derive(Debug, Default)]
pub struct Broken;

impl CellBehavior for Broken {
    fn type_name(&self) -> &'static str {
        "Broken"
    }

    fn instantiate(&self) -> Box<dyn CellBehavior> {
        Box::new(Broken)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }

    fn on_construct(&mut self) -> Result<(), String> {
        Err("missing resource".into())
    }
}

/// `label` is readable but refuses writes.
pub const WITNESS_FIELDS: &[FieldDescriptor] = &[
    FieldDescriptor::new("label", FieldType::String),
    FieldDescriptor::new("priority", FieldType::U32),
];

/// A hook call seen by a [`Witness`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Seen {
    Message {
        label: &'static str,
        code: u32,
    },
    Destruct {
        label: &'static str,
        context: DestructContext,
        /// Live handles to the witness's data block at `on_destruct` time.
        block_holders: Option<usize>,
        /// Strong count of the witness's marker at `on_destruct` time.
        marker_holders: usize,
    },
}

/// Reports hook calls into a log shared with the test, so they remain
/// observable after the cell is gone.
#[derive(Debug, Clone, Default)]
pub struct Witness {
    pub label: &'static str,
    pub priority: u32,
    /// Message code this witness catches; others are logged but refused.
    pub catches: u32,
    pub log: Rc<RefCell<Vec<Seen>>>,
    pub marker: Rc<()>,
    pub block: Option<DataBlock>,
}

impl Witness {
    pub fn new(label: &'static str, log: &Rc<RefCell<Vec<Seen>>>) -> Self {
        Self {
            label,
            log: log.clone(),
            ..Self::default()
        }
    }
}

impl CellBehavior for Witness {
    fn type_name(&self) -> &'static str {
        "Witness"
    }

    fn instantiate(&self) -> Box<dyn CellBehavior> {
        Box::new(Witness::default())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }

    fn fields(&self) -> &'static [FieldDescriptor] {
        WITNESS_FIELDS
    }

    fn read_field(&self, field: &FieldDescriptor) -> Option<FieldValue> {
        match field.name {
            "label" => Some(FieldValue::String(self.label.to_owned())),
            "priority" => Some(FieldValue::U32(self.priority)),
            _ => None,
        }
    }

    fn write_field(&mut self, field: &FieldDescriptor, value: FieldValue) -> bool {
        match (field.name, value) {
            ("priority", FieldValue::U32(v)) => self.priority = v,
            _ => return false,
        }
        true
    }

    fn on_destruct(&mut self, context: DestructContext) {
        self.log.borrow_mut().push(Seen::Destruct {
            label: self.label,
            context,
            block_holders: self.block.as_ref().map(DataBlock::holders),
            marker_holders: Rc::strong_count(&self.marker),
        });
    }

    fn on_message(&mut self, msg: &CellMessage) -> bool {
        self.log.borrow_mut().push(Seen::Message {
            label: self.label,
            code: msg.code,
        });
        msg.code == self.catches
    }

    fn priority(&self) -> u32 {
        self.priority
    }
}
