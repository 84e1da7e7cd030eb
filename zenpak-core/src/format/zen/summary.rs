use anyhow::{bail, Context, Result};

use super::name_map::MappedName;
use super::reader::ZenReader;

/// Fixed-size summary at the start of every package image.
///
/// Layout (little-endian, 52 bytes):
/// - 0x00: u32 has_versioning_info (nonzero is rejected)
/// - 0x04: u32 header_size
/// - 0x08: MappedName name (u32 index, u32 number)
/// - 0x10: u32 package_flags
/// - 0x14: u32 cooked_header_size
/// - 0x18: i32 imported_public_export_hashes_offset
/// - 0x1C: i32 import_map_offset
/// - 0x20: i32 export_map_offset
/// - 0x24: i32 export_bundle_entries_offset
/// - 0x28: i32 dependency_bundle_headers_offset
/// - 0x2C: i32 dependency_bundle_entries_offset
/// - 0x30: i32 imported_package_names_offset
#[derive(Debug, Clone)]
pub struct PackageSummary {
    pub has_versioning_info: u32,
    pub header_size: u32,
    pub name: MappedName,
    pub package_flags: u32,
    pub cooked_header_size: u32,
    pub imported_public_export_hashes_offset: i32,
    pub import_map_offset: i32,
    pub export_map_offset: i32,
    pub export_bundle_entries_offset: i32,
    pub dependency_bundle_headers_offset: i32,
    pub dependency_bundle_entries_offset: i32,
    pub imported_package_names_offset: i32,
}

pub const SUMMARY_SIZE: usize = 52;

/// Byte positions of every summary field that addresses a section past the
/// name table. These all shift by the same delta when the name table is
/// re-encoded at a different length.
pub(crate) const SHIFTED_FIELD_POSITIONS: [usize; 8] = [4, 24, 28, 32, 36, 40, 44, 48];

impl PackageSummary {
    pub fn parse(r: &mut ZenReader) -> Result<Self> {
        let has_versioning_info = r.read_u32().context("read versioning flag")?;
        if has_versioning_info != 0 {
            bail!("versioned package images are not supported");
        }

        let header_size = r.read_u32().context("read header size")?;
        let name = MappedName::new(
            r.read_u32().context("read package name index")?,
            r.read_u32().context("read package name number")?,
        );
        let package_flags = r.read_u32().context("read package flags")?;
        let cooked_header_size = r.read_u32().context("read cooked header size")?;

        let summary = Self {
            has_versioning_info,
            header_size,
            name,
            package_flags,
            cooked_header_size,
            imported_public_export_hashes_offset: r.read_i32().context("read export hashes offset")?,
            import_map_offset: r.read_i32().context("read import map offset")?,
            export_map_offset: r.read_i32().context("read export map offset")?,
            export_bundle_entries_offset: r.read_i32().context("read export bundle offset")?,
            dependency_bundle_headers_offset: r.read_i32().context("read dependency headers offset")?,
            dependency_bundle_entries_offset: r.read_i32().context("read dependency entries offset")?,
            imported_package_names_offset: r.read_i32().context("read imported package names offset")?,
        };

        summary.validate(r.len())?;
        Ok(summary)
    }

    /// Every section offset must lie within the buffer and the sections must
    /// appear in file order.
    fn validate(&self, buffer_len: usize) -> Result<()> {
        let offsets = [
            ("imported public export hashes", self.imported_public_export_hashes_offset),
            ("import map", self.import_map_offset),
            ("export map", self.export_map_offset),
            ("export bundle entries", self.export_bundle_entries_offset),
            ("dependency bundle headers", self.dependency_bundle_headers_offset),
            ("dependency bundle entries", self.dependency_bundle_entries_offset),
            ("imported package names", self.imported_package_names_offset),
        ];

        let mut prev = SUMMARY_SIZE as i64;
        for (what, offset) in offsets {
            let offset = offset as i64;
            if offset < prev {
                bail!("{} offset {} is out of order (expected >= {})", what, offset, prev);
            }
            prev = offset;
        }

        if (self.header_size as i64) < prev || self.header_size as usize > buffer_len {
            bail!(
                "header size {} is inconsistent with the buffer (len={})",
                self.header_size,
                buffer_len
            );
        }
        Ok(())
    }
}
