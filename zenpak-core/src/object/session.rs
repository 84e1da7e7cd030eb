use std::collections::{HashMap, HashSet};

use anyhow::{bail, Result};

use crate::format::zen::fields::FieldReader;
use crate::format::zen::index::ScriptObjectId;
use crate::format::zen::properties::{PropertyKind, StructSchema};
use crate::object::{ObjectHandle, PropertyValue};

/// Registry row for a natively-registered (script) object: its bare name and
/// the id of its outer, if any.
#[derive(Debug, Clone)]
pub struct ScriptObjectEntry {
    pub name: String,
    pub outer: Option<ScriptObjectId>,
}

/// Mutable state shared by every resolution within one load session.
///
/// Each concurrent load owns its own session; nothing here is global.
#[derive(Default)]
pub struct LoadSession {
    script_objects: HashMap<ScriptObjectId, ScriptObjectEntry>,
    objects_by_name: HashMap<String, ObjectHandle>,
}

const MAX_OUTER_DEPTH: usize = 64;

impl LoadSession {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_script_object(
        &mut self,
        id: ScriptObjectId,
        name: impl Into<String>,
        outer: Option<ScriptObjectId>,
    ) {
        self.script_objects.insert(
            id,
            ScriptObjectEntry {
                name: name.into(),
                outer,
            },
        );
    }

    pub fn script_object(&self, id: ScriptObjectId) -> Option<&ScriptObjectEntry> {
        self.script_objects.get(&id)
    }

    pub fn script_object_count(&self) -> usize {
        self.script_objects.len()
    }

    /// Fully-qualified name of a script object: the outer chain joined with
    /// `.`, innermost last.
    pub fn qualified_name(&self, id: ScriptObjectId) -> Option<String> {
        let mut parts = Vec::new();
        let mut cursor = Some(id);
        while let Some(current) = cursor {
            if parts.len() >= MAX_OUTER_DEPTH {
                log::warn!("outer chain of script object 0x{:X} is too deep", id.0);
                return None;
            }
            let entry = self.script_objects.get(&current)?;
            parts.push(entry.name.clone());
            cursor = entry.outer;
        }
        parts.reverse();
        Some(parts.join("."))
    }

    pub fn object_by_name(&self, qualified: &str) -> Option<&ObjectHandle> {
        self.objects_by_name.get(qualified)
    }

    pub fn insert_object(&mut self, qualified: impl Into<String>, object: ObjectHandle) {
        self.objects_by_name.insert(qualified.into(), object);
    }
}

pub type ClassSerializerFn =
    Box<dyn Fn(&mut FieldReader<'_>, &ObjectHandle) -> Result<()> + Send + Sync>;
pub type PropertyDecoderFn =
    Box<dyn Fn(&mut FieldReader<'_>) -> Result<Option<PropertyValue>> + Send + Sync>;

/// Dispatch tables for field-level deserialization, keyed by class name and
/// property kind. Populated once at startup and shared read-only by loads.
pub struct SerializerRegistry {
    classes: HashMap<String, ClassSerializerFn>,
    property_decoders: HashMap<PropertyKind, PropertyDecoderFn>,
    schemas: HashMap<String, StructSchema>,
    struct_classes: HashSet<String>,
}

impl Default for SerializerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl SerializerRegistry {
    /// A registry with the built-in property decoders and the default
    /// struct-kind class set.
    pub fn new() -> Self {
        let mut registry = Self {
            classes: HashMap::new(),
            property_decoders: HashMap::new(),
            schemas: HashMap::new(),
            struct_classes: ["Class", "ScriptStruct", "Function"]
                .into_iter()
                .map(str::to_string)
                .collect(),
        };
        registry.register_default_decoders();
        registry
    }

    pub fn register_class(&mut self, name: impl Into<String>, serializer: ClassSerializerFn) {
        self.classes.insert(name.into(), serializer);
    }

    pub fn register_property_decoder(&mut self, kind: PropertyKind, decoder: PropertyDecoderFn) {
        self.property_decoders.insert(kind, decoder);
    }

    pub fn register_schema(&mut self, class: impl Into<String>, schema: StructSchema) {
        self.schemas.insert(class.into(), schema);
    }

    pub fn register_struct_class(&mut self, name: impl Into<String>) {
        self.struct_classes.insert(name.into());
    }

    pub fn class_serializer(&self, name: &str) -> Option<&ClassSerializerFn> {
        self.classes.get(name)
    }

    pub fn property_decoder(&self, kind: PropertyKind) -> Option<&PropertyDecoderFn> {
        self.property_decoders.get(&kind)
    }

    pub fn schema(&self, class: &str) -> Option<&StructSchema> {
        self.schemas.get(class)
    }

    pub fn is_struct_class(&self, name: &str) -> bool {
        self.struct_classes.contains(name)
    }

    fn register_default_decoders(&mut self) {
        self.register_property_decoder(
            PropertyKind::Bool,
            Box::new(|fields| Ok(Some(PropertyValue::Bool(fields.reader.read_u8()? != 0)))),
        );
        self.register_property_decoder(
            PropertyKind::Int,
            Box::new(|fields| Ok(Some(PropertyValue::Int(fields.reader.read_i32()?)))),
        );
        self.register_property_decoder(
            PropertyKind::Int64,
            Box::new(|fields| Ok(Some(PropertyValue::Int64(fields.reader.read_i64()?)))),
        );
        self.register_property_decoder(
            PropertyKind::Float,
            Box::new(|fields| Ok(Some(PropertyValue::Float(fields.reader.read_f32()?)))),
        );
        self.register_property_decoder(
            PropertyKind::Double,
            Box::new(|fields| Ok(Some(PropertyValue::Double(fields.reader.read_f64()?)))),
        );
        self.register_property_decoder(
            PropertyKind::Name,
            Box::new(|fields| Ok(Some(PropertyValue::Name(fields.read_name()?)))),
        );
        self.register_property_decoder(
            PropertyKind::Str,
            Box::new(|fields| Ok(Some(PropertyValue::Str(read_string(fields)?)))),
        );
        self.register_property_decoder(
            PropertyKind::Object,
            Box::new(|fields| Ok(Some(PropertyValue::Object(fields.read_object()?)))),
        );
    }
}

/// Length-prefixed string: i32 byte count including the terminator, then
/// the bytes. Negative counts mark wide-char strings, which are not
/// supported.
fn read_string(fields: &mut FieldReader<'_>) -> Result<String> {
    let len = fields.reader.read_i32()?;
    if len < 0 {
        bail!("wide-char string values are not supported");
    }
    if len == 0 {
        return Ok(String::new());
    }
    let bytes = fields.reader.read_bytes(len as usize)?;
    let bytes = bytes.strip_suffix(&[0]).unwrap_or(bytes);
    Ok(std::str::from_utf8(bytes)?.to_string())
}
