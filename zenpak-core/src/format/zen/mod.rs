//! Zen package format: the pre-resolved binary asset container.
//!
//! Parsing happens in two stages: [`ZenHeader::parse`] decodes the summary
//! and every table out of the raw image, then [`ZenPackageReader::make_package`]
//! walks the export bundle to materialize and wire the package's objects.
//! [`rebuild::rebuild_with_name_map`] goes the other way: byte-exact
//! re-serialization after name-table edits.

pub mod fields;
pub mod header;
pub mod index;
pub mod name_map;
pub mod properties;
pub mod reader;
pub mod rebuild;
pub mod summary;

use anyhow::{Context, Result};
use bytes::Bytes;

use crate::object::session::{LoadSession, SerializerRegistry};
use crate::object::{ObjectData, ObjectFlags, ObjectHandle, ObjectKind, ObjectRef};

use self::fields::FieldReader;
use self::header::{ExportCommand, ZenHeader};
use self::index::{ObjectIndex, ScriptObjectId};
use self::name_map::NameMap;
use self::properties::load_properties;
use self::reader::{LoadStatus, ZenReader};
use self::summary::PackageSummary;

/// Runtime slot for one export. The slot vector is sized to the export
/// count before any bundle step runs and never resized, so handles are
/// stable for the whole load.
pub struct ExportObject {
    pub object: ObjectHandle,
    pub template: ObjectRef,
}

impl ExportObject {
    fn new() -> Self {
        Self {
            object: ObjectData::new_shell(),
            template: ObjectRef::Null,
        }
    }
}

/// Caller-supplied constraints on the export pass: substitute a known
/// object for the export with a matching name, optionally skipping every
/// other export.
#[derive(Default)]
pub struct ExportState {
    pub target_object_name: Option<String>,
    pub target_object: Option<ObjectHandle>,
    pub load_target_only: bool,
}

/// Result of a full export pass.
pub struct LoadedPackage {
    pub package: ObjectHandle,
    pub exports: Vec<ExportObject>,
    pub status: LoadStatus,
}

/// A package image together with its decoded header.
pub struct ZenPackageReader {
    reader: ZenReader,
    header: ZenHeader,
}

impl ZenPackageReader {
    pub fn new(data: Bytes) -> Result<Self> {
        let header = ZenHeader::parse(&data).context("parse zen package header")?;
        Ok(Self {
            reader: ZenReader::new(data),
            header,
        })
    }

    pub fn header(&self) -> &ZenHeader {
        &self.header
    }

    pub fn summary(&self) -> &PackageSummary {
        self.header.summary()
    }

    pub fn package_name(&self) -> &str {
        self.header.package_name()
    }

    pub fn name_map(&self) -> &NameMap {
        self.header.name_map()
    }

    pub fn name_map_mut(&mut self) -> &mut NameMap {
        self.header.name_map_mut()
    }

    pub fn export_count(&self) -> usize {
        self.header.export_count()
    }

    pub fn cooked_header_size(&self) -> u32 {
        self.header.cooked_header_size()
    }

    pub fn status(&self) -> &LoadStatus {
        self.reader.status()
    }

    /// Materialize the package's object graph by walking the export bundle
    /// in file order. Structural failures accumulate in the returned
    /// status; the pass itself always runs to completion.
    pub fn make_package(
        &mut self,
        session: &mut LoadSession,
        registry: &SerializerRegistry,
        state: ExportState,
    ) -> LoadedPackage {
        let Self { reader, header } = self;

        let package = ObjectData::named(header.package_name(), ObjectKind::Package);
        let mut exports: Vec<ExportObject> =
            (0..header.export_count()).map(|_| ExportObject::new()).collect();

        for step in header.export_bundle_entries() {
            let local_index = step.local_export_index as usize;
            match step.command {
                ExportCommand::Create => create_export(
                    header,
                    reader,
                    &mut exports,
                    &package,
                    session,
                    registry,
                    &state,
                    local_index,
                ),
                ExportCommand::Serialize => serialize_export(
                    header,
                    reader,
                    &exports,
                    session,
                    registry,
                    &state,
                    local_index,
                ),
                ExportCommand::Count => {}
            }
        }

        LoadedPackage {
            package,
            exports,
            status: reader.status().clone(),
        }
    }

    /// Re-encode the package image against the current (possibly edited)
    /// name table. With an unchanged table the output is byte-identical to
    /// the input.
    pub fn rebuild(&self) -> Result<Vec<u8>> {
        rebuild::rebuild_with_name_map(self.reader.data(), self.header.name_map())
    }
}

#[allow(clippy::too_many_arguments)]
fn create_export(
    header: &ZenHeader,
    reader: &mut ZenReader,
    exports: &mut [ExportObject],
    package: &ObjectHandle,
    session: &mut LoadSession,
    registry: &SerializerRegistry,
    state: &ExportState,
    local_index: usize,
) {
    let Some(entry) = header.export_map().get(local_index) else {
        reader.set_error(format!(
            "create step addresses export {} of {}",
            local_index,
            header.export_count()
        ));
        return;
    };

    let object_name = header
        .name_map()
        .get(&entry.object_name)
        .unwrap_or_default()
        .to_string();
    if object_name.is_empty() {
        log::warn!("export {} has an empty or unresolvable name", local_index);
    }

    match (&state.target_object, &state.target_object_name) {
        (Some(target), Some(target_name)) if *target_name == object_name => {
            exports[local_index].object = target.clone();
        }
        _ if state.load_target_only => return,
        _ => {}
    }

    let template = index_to_object(header, exports, session, entry.template_index);
    if template.is_null() {
        reader.set_error(format!(
            "template object could not be resolved for export {}",
            local_index
        ));
        return;
    }
    exports[local_index].template = template;

    let object = exports[local_index].object.clone();
    object.borrow_mut().name = object_name;

    if object.borrow().class.is_null() {
        let class = index_to_object(header, exports, session, entry.class_index);
        object.borrow_mut().class = class;
    }

    if object.borrow().outer.is_null() {
        // a null outer index means the package itself
        let outer = if entry.outer_index.is_null() {
            ObjectRef::Object(package.clone())
        } else {
            index_to_object(header, exports, session, entry.outer_index)
        };
        object.borrow_mut().outer = outer;
    }

    let class_name = object
        .borrow()
        .class
        .as_object()
        .map(|class| class.borrow().name.clone());
    if class_name.as_deref().is_some_and(|name| registry.is_struct_class(name)) {
        let needs_super = {
            let mut data = object.borrow_mut();
            if data.kind == ObjectKind::Object {
                data.kind = ObjectKind::Struct;
            }
            data.super_struct.is_null()
        };
        if needs_super {
            let super_struct = index_to_object(header, exports, session, entry.super_index);
            object.borrow_mut().super_struct = super_struct;
        }
    }

    object.borrow_mut().flags |= ObjectFlags::from_bits_retain(entry.object_flags)
        | ObjectFlags::NEED_LOAD
        | ObjectFlags::NEED_POST_LOAD
        | ObjectFlags::NEED_POST_LOAD_SUBOBJECTS
        | ObjectFlags::WAS_LOADED;
}

fn serialize_export(
    header: &ZenHeader,
    reader: &mut ZenReader,
    exports: &[ExportObject],
    session: &mut LoadSession,
    registry: &SerializerRegistry,
    state: &ExportState,
    local_index: usize,
) {
    let Some(entry) = header.export_map().get(local_index) else {
        reader.set_error(format!(
            "serialize step addresses export {} of {}",
            local_index,
            header.export_count()
        ));
        return;
    };
    let object = exports[local_index].object.clone();

    if state.load_target_only
        && !state
            .target_object
            .as_ref()
            .is_some_and(|target| std::rc::Rc::ptr_eq(target, &object))
    {
        return;
    }

    object.borrow_mut().flags.remove(ObjectFlags::NEED_LOAD);

    let position = header.export_offset() + entry.serial_offset as usize;
    if let Err(err) = reader.seek(position) {
        reader.set_error(format!(
            "payload of export {} is out of bounds: {:#}",
            local_index, err
        ));
        return;
    }

    let class_name = object
        .borrow()
        .class
        .as_object()
        .map(|class| class.borrow().name.clone())
        .unwrap_or_default();

    if let Some(serializer) = registry.class_serializer(&class_name) {
        let mut fields = FieldReader {
            reader: &mut *reader,
            header,
            exports,
            session,
            registry,
        };
        if let Err(err) = serializer(&mut fields, &object) {
            reader.set_error(format!(
                "error deserializing export {} ({}): {:#}",
                local_index, class_name, err
            ));
        }
    } else if let Some(schema) = registry.schema(&class_name) {
        let mut fields = FieldReader {
            reader: &mut *reader,
            header,
            exports,
            session,
            registry,
        };
        if let Err(err) = load_properties(&mut fields, &object, schema) {
            reader.set_error(format!(
                "error reading properties of export {} ({}): {:#}",
                local_index, class_name, err
            ));
        }
    } else {
        log::trace!(
            "no serializer for class {:?}; skipping {} payload bytes of export {}",
            class_name,
            entry.serial_size,
            local_index
        );
    }
}

/// Resolve a header-table reference to a live handle, a deferred
/// cross-package placeholder, or nothing.
pub fn index_to_object(
    header: &ZenHeader,
    exports: &[ExportObject],
    session: &mut LoadSession,
    index: ObjectIndex,
) -> ObjectRef {
    match index {
        ObjectIndex::Null => ObjectRef::Null,
        ObjectIndex::Export(i) => match exports.get(i as usize) {
            Some(slot) => ObjectRef::Object(slot.object.clone()),
            None => {
                log::error!("export index {} is out of range ({} slots)", i, exports.len());
                ObjectRef::Null
            }
        },
        ObjectIndex::ScriptImport(id) => match create_script_object(session, id) {
            Some(handle) => ObjectRef::Object(handle),
            None => ObjectRef::Null,
        },
        ObjectIndex::PackageImport { package, .. } => {
            match header.imported_package_ids().get(package as usize) {
                Some(id) => ObjectRef::Deferred(*id),
                None => ObjectRef::Null,
            }
        }
    }
}

/// Materialize (or reuse) the object standing for a natively-registered
/// type. Objects are deduplicated by fully-qualified name within the
/// session, and outer chains are attached recursively.
pub fn create_script_object(session: &mut LoadSession, id: ScriptObjectId) -> Option<ObjectHandle> {
    let Some(entry) = session.script_object(id).cloned() else {
        log::error!(
            "failed to find script object 0x{:X}; registry has {} entries",
            id.0,
            session.script_object_count()
        );
        return None;
    };
    let qualified = session.qualified_name(id)?;

    if let Some(existing) = session.object_by_name(&qualified).cloned() {
        if existing.borrow().outer.is_null() {
            if let Some(outer_id) = entry.outer {
                if let Some(outer) = create_script_object(session, outer_id) {
                    existing.borrow_mut().outer = ObjectRef::Object(outer);
                }
            }
        }
        return Some(existing);
    }

    let object = ObjectData::named(entry.name.clone(), ObjectKind::Object);
    if let Some(outer_id) = entry.outer {
        if let Some(outer) = create_script_object(session, outer_id) {
            object.borrow_mut().outer = ObjectRef::Object(outer);
        }
    }
    object.borrow_mut().flags |= ObjectFlags::NEED_LOAD;
    session.insert_object(qualified, object.clone());
    Some(object)
}
