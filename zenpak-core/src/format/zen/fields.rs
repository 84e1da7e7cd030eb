use anyhow::Result;

use crate::object::session::{LoadSession, SerializerRegistry};
use crate::object::ObjectRef;

use super::header::ZenHeader;
use super::index::PackageIndex;
use super::name_map::{trailing_instance_number, MappedName};
use super::reader::ZenReader;
use super::{index_to_object, ExportObject};

/// Borrowed view over everything a field-level read needs: the positioned
/// reader, the package tables, the live export slots, and the session.
///
/// Registered per-class serializers and per-kind property decoders receive
/// this as their only window into the load.
pub struct FieldReader<'a> {
    pub reader: &'a mut ZenReader,
    pub header: &'a ZenHeader,
    pub exports: &'a [ExportObject],
    pub session: &'a mut LoadSession,
    pub registry: &'a SerializerRegistry,
}

impl<'a> FieldReader<'a> {
    /// Read an object reference from the payload.
    ///
    /// Out-of-range export or import indices record a read error on the
    /// reader and yield `Null`; a null index is not an error.
    pub fn read_object(&mut self) -> Result<ObjectRef> {
        let index = PackageIndex(self.reader.read_i32()?);

        if index.is_null() {
            return Ok(ObjectRef::Null);
        }

        if let Some(export) = index.to_export() {
            return match self.exports.get(export as usize) {
                Some(slot) => Ok(ObjectRef::Object(slot.object.clone())),
                None => {
                    self.reader
                        .set_error(format!("export index {} read is not a valid index", export));
                    Ok(ObjectRef::Null)
                }
            };
        }

        // the remaining case is an import reference
        let import = index.to_import().unwrap_or_default();
        match self.header.import_map().get(import as usize) {
            Some(object_index) => Ok(index_to_object(
                self.header,
                self.exports,
                self.session,
                *object_index,
            )),
            None => {
                self.reader
                    .set_error(format!("bad object import index {}", import));
                Ok(ObjectRef::Null)
            }
        }
    }

    /// Read a struct reference. Structs travel on the wire exactly like any
    /// other object reference.
    pub fn read_struct(&mut self) -> Result<ObjectRef> {
        self.read_object()
    }

    /// Read a name reference and resolve it against this package's own name
    /// table. Unresolvable names degrade to the empty string.
    pub fn read_name(&mut self) -> Result<String> {
        let index = self.reader.read_u32()?;
        let number = self.reader.read_u32()?;
        let mapped = MappedName::new(index, number);

        match self.header.name_map().get(&mapped) {
            Some(name) if !name.is_empty() => Ok(name.to_string()),
            _ => {
                log::warn!("name read at index {} is empty or invalid", mapped.index());
                Ok(String::new())
            }
        }
    }

    /// Write-direction lookup: reconstruct the `(index, number)` pair for an
    /// already-known name by scanning the package's name table.
    ///
    /// A trailing `_<digits>` suffix is taken as the instance number plus
    /// one, so it is decremented (saturating) before use. Names outside
    /// that convention get instance number zero.
    pub fn name_for_write(&self, name: &str) -> Option<(u32, u32)> {
        let number = trailing_instance_number(name)
            .map(|n| n.saturating_sub(1))
            .unwrap_or(0);

        match self.header.name_map().position(name) {
            Some(index) => Some((index, number)),
            None => {
                log::warn!("failed to find name {} in the name map", name);
                None
            }
        }
    }
}
