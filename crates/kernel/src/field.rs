//! Field reflection: static descriptors for a cell type's attributes and the
//! import/export contexts an external serializer plugs into.

use cellgraph_common::Kid;
use glam::Vec3;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Type code of a reflectable field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FieldType {
    Bool,
    U32,
    I32,
    F32,
    Vec3,
    String,
    Kid,
    Bytes,
}

impl FieldType {
    /// Size in bytes of one element, `None` when the size depends on the value.
    pub const fn size(self) -> Option<usize> {
        match self {
            Self::Bool => Some(1),
            Self::U32 | Self::I32 | Self::F32 => Some(4),
            Self::Vec3 => Some(12),
            Self::Kid => Some(8),
            Self::String | Self::Bytes => None,
        }
    }
}

bitflags::bitflags! {
    /// Per-field attributes.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
    pub struct FieldFlags: u32 {
        /// External writes are refused. Clones and imports still copy it.
        const READ_ONLY = 1 << 0;
        /// Skipped by export.
        const TRANSIENT = 1 << 1;
    }
}

/// Static description of one attribute of a cell type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldDescriptor {
    pub name: &'static str,
    pub ty: FieldType,
    /// Number of elements, 1 for scalars.
    pub count: u32,
    /// Free user code, used to tell apart several fields of the same type.
    pub user: u32,
    pub flags: FieldFlags,
}

impl FieldDescriptor {
    pub const fn new(name: &'static str, ty: FieldType) -> Self {
        Self {
            name,
            ty,
            count: 1,
            user: 0,
            flags: FieldFlags::empty(),
        }
    }

    pub const fn with_count(mut self, count: u32) -> Self {
        self.count = count;
        self
    }

    pub const fn with_user(mut self, user: u32) -> Self {
        self.user = user;
        self
    }

    pub const fn with_flags(mut self, flags: FieldFlags) -> Self {
        self.flags = flags;
        self
    }

    /// Static size of the whole field, `None` for dynamically sized fields.
    pub const fn size(&self) -> Option<usize> {
        match self.ty.size() {
            Some(size) => Some(size * self.count as usize),
            None => None,
        }
    }

    pub fn matches(&self, filter: FieldFilter) -> bool {
        match filter {
            FieldFilter::All => true,
            FieldFilter::Flags(flags) => self.flags.contains(flags),
            FieldFilter::Type(ty) => self.ty == ty,
            FieldFilter::TypeAndUser(ty, user) => self.ty == ty && self.user == user,
        }
    }
}

/// Selection applied by `Cell::get_fields`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FieldFilter {
    #[default]
    All,
    /// Fields carrying all of the given flags.
    Flags(FieldFlags),
    Type(FieldType),
    TypeAndUser(FieldType, u32),
}

/// A field value moving through the reflection seam.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum FieldValue {
    Bool(bool),
    U32(u32),
    I32(i32),
    F32(f32),
    Vec3(Vec3),
    String(String),
    Kid(Kid),
    Bytes(Vec<u8>),
}

impl FieldValue {
    pub fn field_type(&self) -> FieldType {
        match self {
            Self::Bool(_) => FieldType::Bool,
            Self::U32(_) => FieldType::U32,
            Self::I32(_) => FieldType::I32,
            Self::F32(_) => FieldType::F32,
            Self::Vec3(_) => FieldType::Vec3,
            Self::String(_) => FieldType::String,
            Self::Kid(_) => FieldType::Kid,
            Self::Bytes(_) => FieldType::Bytes,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_u32(&self) -> Option<u32> {
        match self {
            Self::U32(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_f32(&self) -> Option<f32> {
        match self {
            Self::F32(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_vec3(&self) -> Option<Vec3> {
        match self {
            Self::Vec3(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_kid(&self) -> Option<Kid> {
        match self {
            Self::Kid(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Self::Bytes(v) => Some(v),
            _ => None,
        }
    }
}

/// Sink for `Cell::export`. The concrete encoding belongs to the implementor.
pub trait ExportContext {
    fn export_field(&mut self, field: &FieldDescriptor, value: FieldValue);
}

/// Source for `Kernel::import`.
pub trait ImportContext {
    /// Value for `field`, or `None` to leave the field untouched.
    fn import_field(&mut self, field: &FieldDescriptor) -> Option<FieldValue>;
}

/// Name-keyed in-memory field values; both an import and an export context.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FieldMap {
    values: BTreeMap<String, FieldValue>,
}

impl FieldMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, value: FieldValue) -> Option<FieldValue> {
        self.values.insert(name.into(), value)
    }

    pub fn get(&self, name: &str) -> Option<&FieldValue> {
        self.values.get(name)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &FieldValue)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Rewrite every `Kid` value through `map`, dropping unmapped ones.
    pub fn remap_kids(&mut self, map: impl Fn(Kid) -> Option<Kid>) {
        self.values.retain(|_, value| match value {
            FieldValue::Kid(kid) => match map(*kid) {
                Some(mapped) => {
                    *kid = mapped;
                    true
                }
                None => false,
            },
            _ => true,
        });
    }
}

impl ExportContext for FieldMap {
    fn export_field(&mut self, field: &FieldDescriptor, value: FieldValue) {
        self.values.insert(field.name.to_owned(), value);
    }
}

impl ImportContext for FieldMap {
    fn import_field(&mut self, field: &FieldDescriptor) -> Option<FieldValue> {
        self.values
            .get(field.name)
            .filter(|value| value.field_type() == field.ty)
            .cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const POSITION: FieldDescriptor = FieldDescriptor::new("position", FieldType::Vec3);
    const WEIGHTS: FieldDescriptor = FieldDescriptor::new("weights", FieldType::F32)
        .with_count(4)
        .with_user(2)
        .with_flags(FieldFlags::READ_ONLY);

    #[test]
    fn descriptor_sizes() {
        assert_eq!(POSITION.size(), Some(12));
        assert_eq!(WEIGHTS.size(), Some(16));
        assert_eq!(FieldDescriptor::new("blob", FieldType::Bytes).size(), None);
    }

    #[test]
    fn filters_select_descriptors() {
        assert!(POSITION.matches(FieldFilter::All));
        assert!(WEIGHTS.matches(FieldFilter::Flags(FieldFlags::READ_ONLY)));
        assert!(!POSITION.matches(FieldFilter::Flags(FieldFlags::READ_ONLY)));
        assert!(WEIGHTS.matches(FieldFilter::TypeAndUser(FieldType::F32, 2)));
        assert!(!WEIGHTS.matches(FieldFilter::TypeAndUser(FieldType::F32, 0)));
        assert!(POSITION.matches(FieldFilter::Type(FieldType::Vec3)));
    }

    #[test]
    fn every_field_flag_has_a_reader() {
        // READ_ONLY gates Kernel::write_field, TRANSIENT gates export/import.
        assert_eq!(FieldFlags::all(), FieldFlags::READ_ONLY | FieldFlags::TRANSIENT);
    }

    #[test]
    fn field_map_ignores_mismatched_types_on_import() {
        let mut map = FieldMap::new();
        map.insert("position", FieldValue::F32(1.0));
        assert_eq!(map.import_field(&POSITION), None);

        map.export_field(&POSITION, FieldValue::Vec3(Vec3::X));
        assert_eq!(map.import_field(&POSITION), Some(FieldValue::Vec3(Vec3::X)));
    }

    #[test]
    fn remap_kids_drops_unmapped() {
        let mut map = FieldMap::new();
        map.insert("a", FieldValue::Kid(Kid::new(1, 0)));
        map.insert("b", FieldValue::Kid(Kid::new(2, 0)));
        map.insert("c", FieldValue::U32(9));
        map.remap_kids(|kid| (kid.index() == 1).then(|| Kid::new(10, 0)));
        assert_eq!(map.get("a"), Some(&FieldValue::Kid(Kid::new(10, 0))));
        assert_eq!(map.get("b"), None);
        assert_eq!(map.len(), 2);
    }
}
