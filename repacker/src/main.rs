use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use bytes::Bytes;
use clap::{Parser as ClapParser, Subcommand};
use serde::Serialize;

use zenpak_core::format::zen::ZenPackageReader;

#[derive(Debug, Serialize)]
struct ExportReport {
    name: String,
    class: String,
    outer: String,
    template: String,
    serial_offset: u64,
    serial_size: u64,
    object_flags: u32,
}

#[derive(Debug, Serialize)]
struct ImportedPackageReport {
    id: String,
    name: String,
}

#[derive(Debug, Serialize)]
struct PackageReport {
    package_name: String,
    header_size: u32,
    cooked_header_size: u32,
    package_flags: u32,
    name_count: usize,
    names: Vec<String>,
    import_count: usize,
    imports: Vec<String>,
    export_count: usize,
    exports: Vec<ExportReport>,
    export_bundle_steps: usize,
    bulk_data_entries: usize,
    imported_packages: Vec<ImportedPackageReport>,
}

impl PackageReport {
    fn from_reader(reader: &ZenPackageReader) -> Self {
        let header = reader.header();
        let name_of = |mapped| {
            header
                .name_map()
                .get(mapped)
                .unwrap_or("<unresolved>")
                .to_string()
        };

        Self {
            package_name: reader.package_name().to_string(),
            header_size: reader.summary().header_size,
            cooked_header_size: reader.cooked_header_size(),
            package_flags: reader.summary().package_flags,
            name_count: header.name_map().len(),
            names: header.name_map().iter().map(str::to_string).collect(),
            import_count: header.import_map().len(),
            imports: header.import_map().iter().map(|i| i.to_string()).collect(),
            export_count: header.export_count(),
            exports: header
                .export_map()
                .iter()
                .map(|entry| ExportReport {
                    name: name_of(&entry.object_name),
                    class: entry.class_index.to_string(),
                    outer: entry.outer_index.to_string(),
                    template: entry.template_index.to_string(),
                    serial_offset: entry.serial_offset,
                    serial_size: entry.serial_size,
                    object_flags: entry.object_flags,
                })
                .collect(),
            export_bundle_steps: header.export_bundle_entries().len(),
            bulk_data_entries: header.bulk_data().len(),
            imported_packages: header
                .imported_package_ids()
                .iter()
                .zip(header.imported_package_names())
                .map(|(id, name)| ImportedPackageReport {
                    id: format!("0x{:X}", id.0),
                    name: name.clone(),
                })
                .collect(),
        }
    }
}

#[derive(ClapParser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Dump the package summary and tables as YAML.
    Info {
        #[arg(short, long, required = true)]
        input: PathBuf,

        /// Write the report here instead of stdout.
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Rename one name-table entry and write the rebuilt package.
    Rename {
        #[arg(short, long, required = true)]
        input: PathBuf,

        #[arg(short, long, required = true)]
        output: PathBuf,

        /// Name to replace.
        #[arg(long)]
        from: String,

        /// Replacement name.
        #[arg(long)]
        to: String,
    },
}

fn main() -> Result<()> {
    env_logger::init();
    let args = Args::parse();

    match args.command {
        Command::Info { input, output } => {
            let data = std::fs::read(&input).with_context(|| format!("read {:?}", input))?;
            let reader = ZenPackageReader::new(Bytes::from(data))?;
            let report = PackageReport::from_reader(&reader);
            let yaml = serde_yaml::to_string(&report)?;
            match output {
                Some(path) => {
                    std::fs::write(&path, yaml).with_context(|| format!("write {:?}", path))?
                }
                None => print!("{}", yaml),
            }
        }
        Command::Rename {
            input,
            output,
            from,
            to,
        } => {
            let data = std::fs::read(&input).with_context(|| format!("read {:?}", input))?;
            let mut reader = ZenPackageReader::new(Bytes::from(data))?;

            let Some(index) = reader.name_map().position(&from) else {
                bail!("name {:?} is not present in the name map", from);
            };
            reader.name_map_mut().rename(index, to.clone())?;

            let rebuilt = reader.rebuild()?;
            std::fs::write(&output, &rebuilt).with_context(|| format!("write {:?}", output))?;
            log::info!(
                "renamed {:?} to {:?} at name slot {}; wrote {} bytes",
                from,
                to,
                index,
                rebuilt.len()
            );
        }
    }

    Ok(())
}
