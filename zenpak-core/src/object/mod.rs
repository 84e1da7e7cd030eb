//! Runtime object graph materialized from a package: handles, references,
//! flags, and decoded property values.

pub mod session;

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use bitflags::bitflags;

use crate::format::zen::index::PackageId;

bitflags! {
    /// Engine object flags carried by export entries and OR-ed in during
    /// the load pass.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct ObjectFlags: u32 {
        const PUBLIC = 0x0000_0001;
        const STANDALONE = 0x0000_0002;
        const TRANSACTIONAL = 0x0000_0008;
        const CLASS_DEFAULT_OBJECT = 0x0000_0010;
        const ARCHETYPE_OBJECT = 0x0000_0020;
        const TRANSIENT = 0x0000_0040;
        const NEED_LOAD = 0x0000_0400;
        const NEED_POST_LOAD = 0x0000_1000;
        const NEED_POST_LOAD_SUBOBJECTS = 0x0000_2000;
        const DEFAULT_SUB_OBJECT = 0x0004_0000;
        const WAS_LOADED = 0x0008_0000;
        const LOAD_COMPLETED = 0x0020_0000;
    }
}

/// Object kind, as far as the loader cares: plain objects, composite
/// (struct-like) objects that carry a super reference, and the package
/// object that owns the exports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ObjectKind {
    #[default]
    Object,
    Struct,
    Package,
}

/// A decoded property value.
#[derive(Debug, Clone, PartialEq)]
pub enum PropertyValue {
    Bool(bool),
    Int(i32),
    Int64(i64),
    Float(f32),
    Double(f64),
    Name(String),
    Str(String),
    Object(ObjectRef),
}

impl fmt::Display for PropertyValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PropertyValue::Bool(v) => write!(f, "{}", v),
            PropertyValue::Int(v) => write!(f, "{}", v),
            PropertyValue::Int64(v) => write!(f, "{}", v),
            PropertyValue::Float(v) => write!(f, "{}", v),
            PropertyValue::Double(v) => write!(f, "{}", v),
            PropertyValue::Name(v) => write!(f, "{}", v),
            PropertyValue::Str(v) => write!(f, "{:?}", v),
            PropertyValue::Object(v) => write!(f, "{:?}", v),
        }
    }
}

/// A live object being materialized by a load.
#[derive(Debug, Default)]
pub struct ObjectData {
    pub name: String,
    pub kind: ObjectKind,
    pub class: ObjectRef,
    pub outer: ObjectRef,
    pub super_struct: ObjectRef,
    pub flags: ObjectFlags,
    /// Decoded properties in the order they were read.
    pub properties: Vec<(String, PropertyValue)>,
}

/// Shared handle to a live object. Identity (pointer equality) is stable
/// for the duration of a load.
pub type ObjectHandle = Rc<RefCell<ObjectData>>;

impl ObjectData {
    pub fn new_shell() -> ObjectHandle {
        Rc::new(RefCell::new(ObjectData::default()))
    }

    pub fn named(name: impl Into<String>, kind: ObjectKind) -> ObjectHandle {
        Rc::new(RefCell::new(ObjectData {
            name: name.into(),
            kind,
            ..ObjectData::default()
        }))
    }
}

/// A reference slot in the object graph.
///
/// `Deferred` stands for an export owned by another, not-yet-loaded package;
/// only an external package loader may upgrade it to `Object`.
#[derive(Clone, Default)]
pub enum ObjectRef {
    #[default]
    Null,
    Object(ObjectHandle),
    Deferred(PackageId),
}

impl ObjectRef {
    pub fn is_null(&self) -> bool {
        matches!(self, ObjectRef::Null)
    }

    pub fn as_object(&self) -> Option<&ObjectHandle> {
        match self {
            ObjectRef::Object(handle) => Some(handle),
            _ => None,
        }
    }

    pub fn deferred_package(&self) -> Option<PackageId> {
        match self {
            ObjectRef::Deferred(id) => Some(*id),
            _ => None,
        }
    }

    pub fn ptr_eq(&self, other: &ObjectHandle) -> bool {
        matches!(self, ObjectRef::Object(handle) if Rc::ptr_eq(handle, other))
    }
}

impl fmt::Debug for ObjectRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ObjectRef::Null => write!(f, "null"),
            ObjectRef::Object(handle) => match handle.try_borrow() {
                Ok(data) => write!(f, "object({})", data.name),
                Err(_) => write!(f, "object(<borrowed>)"),
            },
            ObjectRef::Deferred(id) => write!(f, "deferred(0x{:X})", id.0),
        }
    }
}

impl PartialEq for ObjectRef {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (ObjectRef::Null, ObjectRef::Null) => true,
            (ObjectRef::Object(a), ObjectRef::Object(b)) => Rc::ptr_eq(a, b),
            (ObjectRef::Deferred(a), ObjectRef::Deferred(b)) => a == b,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ref_identity() {
        let a = ObjectData::named("A", ObjectKind::Object);
        let b = ObjectData::named("A", ObjectKind::Object);
        assert_eq!(ObjectRef::Object(a.clone()), ObjectRef::Object(a.clone()));
        assert_ne!(ObjectRef::Object(a), ObjectRef::Object(b));
        assert_eq!(ObjectRef::Null, ObjectRef::Null);
    }

    #[test]
    fn flags_accumulate() {
        let handle = ObjectData::new_shell();
        handle.borrow_mut().flags |= ObjectFlags::NEED_LOAD | ObjectFlags::WAS_LOADED;
        handle.borrow_mut().flags.remove(ObjectFlags::NEED_LOAD);
        assert_eq!(handle.borrow().flags, ObjectFlags::WAS_LOADED);
    }
}
