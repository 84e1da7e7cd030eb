use std::fmt;

/// Id of a package known to the loader, used to refer to not-yet-loaded
/// packages from import tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PackageId(pub u64);

/// Global id of a natively-registered (script) object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ScriptObjectId(pub u64);

/// A reference stored in the header tables, packed into a `u64` on disk.
///
/// Tag mapping (top 2 bits of the raw value):
/// - 0: export in this package (low bits: local export index)
/// - 1: script import (low 62 bits: global script object id)
/// - 2: package import (bits 32..62: imported-package slot, low 32: export hash slot)
/// - 3: null (the raw value is all ones)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectIndex {
    Null,
    Export(u32),
    ScriptImport(ScriptObjectId),
    PackageImport { package: u32, export_hash: u32 },
}

const TYPE_SHIFT: u32 = 62;
const ID_MASK: u64 = (1 << TYPE_SHIFT) - 1;
const PACKAGE_SLOT_MASK: u64 = (1 << 30) - 1;

impl ObjectIndex {
    pub fn from_raw(raw: u64) -> Self {
        match raw >> TYPE_SHIFT {
            0 => ObjectIndex::Export((raw & ID_MASK) as u32),
            1 => ObjectIndex::ScriptImport(ScriptObjectId(raw & ID_MASK)),
            2 => ObjectIndex::PackageImport {
                package: ((raw >> 32) & PACKAGE_SLOT_MASK) as u32,
                export_hash: raw as u32,
            },
            _ => ObjectIndex::Null,
        }
    }

    pub fn to_raw(self) -> u64 {
        match self {
            ObjectIndex::Null => u64::MAX,
            ObjectIndex::Export(i) => i as u64,
            ObjectIndex::ScriptImport(id) => (1 << TYPE_SHIFT) | (id.0 & ID_MASK),
            ObjectIndex::PackageImport {
                package,
                export_hash,
            } => (2 << TYPE_SHIFT) | ((package as u64 & PACKAGE_SLOT_MASK) << 32) | export_hash as u64,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, ObjectIndex::Null)
    }
}

impl fmt::Display for ObjectIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ObjectIndex::Null => write!(f, "null"),
            ObjectIndex::Export(i) => write!(f, "export:{}", i),
            ObjectIndex::ScriptImport(id) => write!(f, "script:0x{:X}", id.0),
            ObjectIndex::PackageImport {
                package,
                export_hash,
            } => write!(f, "package:{}#{}", package, export_hash),
        }
    }
}

/// A reference read from an export payload: a signed index where zero is
/// null, positive values address the export map (`v - 1`) and negative
/// values address the import map (`-v - 1`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PackageIndex(pub i32);

impl PackageIndex {
    pub fn is_null(&self) -> bool {
        self.0 == 0
    }

    pub fn to_export(&self) -> Option<u32> {
        (self.0 > 0).then(|| (self.0 - 1) as u32)
    }

    pub fn to_import(&self) -> Option<u32> {
        (self.0 < 0).then(|| (-self.0 - 1) as u32)
    }

    pub fn from_export(index: u32) -> Self {
        PackageIndex(index as i32 + 1)
    }

    pub fn from_import(index: u32) -> Self {
        PackageIndex(-(index as i32) - 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn raw_roundtrip() {
        let cases = [
            ObjectIndex::Null,
            ObjectIndex::Export(0),
            ObjectIndex::Export(42),
            ObjectIndex::ScriptImport(ScriptObjectId(0xDEAD_BEEF)),
            ObjectIndex::PackageImport {
                package: 3,
                export_hash: 7,
            },
        ];
        for case in cases {
            assert_eq!(ObjectIndex::from_raw(case.to_raw()), case);
        }
    }

    #[test]
    fn all_ones_is_null() {
        assert!(ObjectIndex::from_raw(u64::MAX).is_null());
    }

    #[test]
    fn package_index_signs() {
        assert!(PackageIndex(0).is_null());
        assert_eq!(PackageIndex(1).to_export(), Some(0));
        assert_eq!(PackageIndex(-1).to_import(), Some(0));
        assert_eq!(PackageIndex::from_export(4).0, 5);
        assert_eq!(PackageIndex::from_import(4).0, -5);
    }
}
