use anyhow::{bail, Context, Result};
use bytes::Bytes;

use super::index::{ObjectIndex, PackageId, PackageIndex};
use super::name_map::{MappedName, NameMap};
use super::reader::ZenReader;
use super::summary::PackageSummary;

/// One row of the export map. Immutable once parsed.
#[derive(Debug, Clone)]
pub struct ExportEntry {
    /// Offset of this export's payload, relative to the export payload blob.
    pub serial_offset: u64,
    pub serial_size: u64,
    pub object_name: MappedName,
    pub outer_index: ObjectIndex,
    pub class_index: ObjectIndex,
    pub super_index: ObjectIndex,
    pub template_index: ObjectIndex,
    pub public_export_hash: u64,
    pub object_flags: u32,
    pub filter_flags: u8,
}

pub(crate) const EXPORT_ENTRY_SIZE: usize = 72;

/// Construction command carried by an export bundle step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportCommand {
    Create,
    Serialize,
    /// Reserved marker; never acted on.
    Count,
}

#[derive(Debug, Clone, Copy)]
pub struct ExportBundleEntry {
    pub local_export_index: u32,
    pub command: ExportCommand,
}

#[derive(Debug, Clone, Copy)]
pub struct DependencyBundleHeader {
    pub first_entry_index: i32,
    /// Counts in order: create-before-create, serialize-before-create,
    /// create-before-serialize, serialize-before-serialize.
    pub entry_counts: [u32; 4],
}

#[derive(Debug, Clone, Copy)]
pub struct BulkDataEntry {
    pub serial_offset: i64,
    pub duplicate_serial_offset: i64,
    pub serial_size: i64,
    pub flags: u32,
}

/// Fully decoded package header: the summary plus every table up to the
/// export payload blob. Parsing is pure; nothing here touches the payloads.
#[derive(Debug, Clone)]
pub struct ZenHeader {
    summary: PackageSummary,
    package_name: String,
    name_map: NameMap,
    bulk_data: Vec<BulkDataEntry>,
    imported_public_export_hashes: Vec<u64>,
    import_map: Vec<ObjectIndex>,
    export_map: Vec<ExportEntry>,
    export_bundle_entries: Vec<ExportBundleEntry>,
    dependency_bundle_headers: Vec<DependencyBundleHeader>,
    dependency_bundle_entries: Vec<PackageIndex>,
    imported_package_names: Vec<String>,
    imported_package_ids: Vec<PackageId>,
}

fn table_count(start: i32, end: i32, entry_size: usize, what: &str) -> Result<usize> {
    let span = (end - start) as usize;
    if span % entry_size != 0 {
        bail!(
            "{} span {} is not a multiple of the {}-byte entry size",
            what,
            span,
            entry_size
        );
    }
    Ok(span / entry_size)
}

impl ZenHeader {
    pub fn parse(data: &Bytes) -> Result<Self> {
        let mut r = ZenReader::new(data.clone());
        let summary = PackageSummary::parse(&mut r).context("parse package summary")?;

        let name_map = NameMap::parse(&mut r).context("parse name map")?;
        let package_name = name_map
            .get(&summary.name)
            .map(str::to_string)
            .unwrap_or_default();
        if package_name.is_empty() {
            log::warn!("package name does not resolve in the name map");
        }

        let bulk_data = Self::parse_bulk_data(&mut r).context("parse bulk data map")?;

        r.seek(summary.imported_public_export_hashes_offset as usize)?;
        let hash_count = table_count(
            summary.imported_public_export_hashes_offset,
            summary.import_map_offset,
            8,
            "export hash",
        )?;
        let mut imported_public_export_hashes = Vec::with_capacity(hash_count);
        for _ in 0..hash_count {
            imported_public_export_hashes.push(r.read_u64()?);
        }

        r.seek(summary.import_map_offset as usize)?;
        let import_count = table_count(
            summary.import_map_offset,
            summary.export_map_offset,
            8,
            "import map",
        )?;
        let mut import_map = Vec::with_capacity(import_count);
        for _ in 0..import_count {
            import_map.push(ObjectIndex::from_raw(r.read_u64()?));
        }

        r.seek(summary.export_map_offset as usize)?;
        let export_count = table_count(
            summary.export_map_offset,
            summary.export_bundle_entries_offset,
            EXPORT_ENTRY_SIZE,
            "export map",
        )?;
        let mut export_map = Vec::with_capacity(export_count);
        for i in 0..export_count {
            export_map.push(Self::parse_export_entry(&mut r).with_context(|| format!("parse export {i}"))?);
        }

        r.seek(summary.export_bundle_entries_offset as usize)?;
        let bundle_count = table_count(
            summary.export_bundle_entries_offset,
            summary.dependency_bundle_headers_offset,
            8,
            "export bundle",
        )?;
        let mut export_bundle_entries = Vec::with_capacity(bundle_count);
        for i in 0..bundle_count {
            let local_export_index = r.read_u32()?;
            let command = match r.read_u32()? {
                0 => ExportCommand::Create,
                1 => ExportCommand::Serialize,
                2 => ExportCommand::Count,
                other => bail!("unknown export bundle command {} in step {}", other, i),
            };
            export_bundle_entries.push(ExportBundleEntry {
                local_export_index,
                command,
            });
        }

        r.seek(summary.dependency_bundle_headers_offset as usize)?;
        let dep_header_count = table_count(
            summary.dependency_bundle_headers_offset,
            summary.dependency_bundle_entries_offset,
            20,
            "dependency bundle header",
        )?;
        let mut dependency_bundle_headers = Vec::with_capacity(dep_header_count);
        for _ in 0..dep_header_count {
            let first_entry_index = r.read_i32()?;
            let mut entry_counts = [0u32; 4];
            for slot in &mut entry_counts {
                *slot = r.read_u32()?;
            }
            dependency_bundle_headers.push(DependencyBundleHeader {
                first_entry_index,
                entry_counts,
            });
        }

        r.seek(summary.dependency_bundle_entries_offset as usize)?;
        let dep_entry_count = table_count(
            summary.dependency_bundle_entries_offset,
            summary.imported_package_names_offset,
            4,
            "dependency bundle entry",
        )?;
        let mut dependency_bundle_entries = Vec::with_capacity(dep_entry_count);
        for _ in 0..dep_entry_count {
            dependency_bundle_entries.push(PackageIndex(r.read_i32()?));
        }

        r.seek(summary.imported_package_names_offset as usize)?;
        let imported_count = r.read_u32().context("read imported package count")? as usize;
        if imported_count * 10 > r.len() - r.tell() {
            bail!("imported package count {} exceeds the remaining buffer", imported_count);
        }
        let mut imported_package_names = Vec::with_capacity(imported_count);
        let mut imported_package_ids = Vec::with_capacity(imported_count);
        for i in 0..imported_count {
            imported_package_ids.push(PackageId(r.read_u64().with_context(|| format!("read id of imported package {i}"))?));
            let header = r.read_u16_be()?;
            if header & 0x8000 != 0 {
                bail!("wide-char imported package name {i} is not supported");
            }
            let bytes = r.read_bytes((header & 0x7FFF) as usize)?;
            let name = std::str::from_utf8(bytes)
                .with_context(|| format!("imported package name {i} is not valid UTF-8"))?;
            imported_package_names.push(name.to_string());
        }
        if r.tell() > summary.header_size as usize {
            bail!(
                "imported package names overrun the declared header size ({} > {})",
                r.tell(),
                summary.header_size
            );
        }

        Ok(Self {
            summary,
            package_name,
            name_map,
            bulk_data,
            imported_public_export_hashes,
            import_map,
            export_map,
            export_bundle_entries,
            dependency_bundle_headers,
            dependency_bundle_entries,
            imported_package_names,
            imported_package_ids,
        })
    }

    fn parse_bulk_data(r: &mut ZenReader) -> Result<Vec<BulkDataEntry>> {
        let byte_size = r.read_u64().context("read bulk data map size")? as usize;
        if byte_size % 32 != 0 {
            bail!("bulk data map size {} is not a multiple of 32", byte_size);
        }
        if byte_size > r.len() - r.tell() {
            bail!(
                "bulk data map size {} exceeds the remaining buffer ({})",
                byte_size,
                r.len() - r.tell()
            );
        }
        let mut entries = Vec::with_capacity(byte_size / 32);
        for _ in 0..byte_size / 32 {
            let serial_offset = r.read_i64()?;
            let duplicate_serial_offset = r.read_i64()?;
            let serial_size = r.read_i64()?;
            let flags = r.read_u32()?;
            let _pad = r.read_u32()?;
            entries.push(BulkDataEntry {
                serial_offset,
                duplicate_serial_offset,
                serial_size,
                flags,
            });
        }
        Ok(entries)
    }

    fn parse_export_entry(r: &mut ZenReader) -> Result<ExportEntry> {
        let serial_offset = r.read_u64()?;
        let serial_size = r.read_u64()?;
        let object_name = MappedName::new(r.read_u32()?, r.read_u32()?);
        let outer_index = ObjectIndex::from_raw(r.read_u64()?);
        let class_index = ObjectIndex::from_raw(r.read_u64()?);
        let super_index = ObjectIndex::from_raw(r.read_u64()?);
        let template_index = ObjectIndex::from_raw(r.read_u64()?);
        let public_export_hash = r.read_u64()?;
        let object_flags = r.read_u32()?;
        let filter_flags = r.read_u8()?;
        let _pad = r.read_bytes(3)?;
        Ok(ExportEntry {
            serial_offset,
            serial_size,
            object_name,
            outer_index,
            class_index,
            super_index,
            template_index,
            public_export_hash,
            object_flags,
            filter_flags,
        })
    }

    pub fn summary(&self) -> &PackageSummary {
        &self.summary
    }

    pub fn package_name(&self) -> &str {
        &self.package_name
    }

    pub fn name_map(&self) -> &NameMap {
        &self.name_map
    }

    pub fn name_map_mut(&mut self) -> &mut NameMap {
        &mut self.name_map
    }

    pub fn bulk_data(&self) -> &[BulkDataEntry] {
        &self.bulk_data
    }

    pub fn imported_public_export_hashes(&self) -> &[u64] {
        &self.imported_public_export_hashes
    }

    pub fn import_map(&self) -> &[ObjectIndex] {
        &self.import_map
    }

    pub fn export_map(&self) -> &[ExportEntry] {
        &self.export_map
    }

    pub fn export_count(&self) -> usize {
        self.export_map.len()
    }

    pub fn export_bundle_entries(&self) -> &[ExportBundleEntry] {
        &self.export_bundle_entries
    }

    pub fn dependency_bundle_headers(&self) -> &[DependencyBundleHeader] {
        &self.dependency_bundle_headers
    }

    pub fn dependency_bundle_entries(&self) -> &[PackageIndex] {
        &self.dependency_bundle_entries
    }

    pub fn imported_package_names(&self) -> &[String] {
        &self.imported_package_names
    }

    pub fn imported_package_ids(&self) -> &[PackageId] {
        &self.imported_package_ids
    }

    pub fn cooked_header_size(&self) -> u32 {
        self.summary.cooked_header_size
    }

    /// Start of the export payload blob.
    pub fn export_offset(&self) -> usize {
        self.summary.header_size as usize
    }
}
