//! Versioned binary index file.
//!
//! Layout (big-endian, strings are u16-length-prefixed UTF-8):
//!
//! ```text
//! magic:i32 version:i32 mainClass:string archiveCount:u16
//! per archive:
//!   relativePath:string hasManifest:bool [6 x (present:bool [string])]
//!   generatedBytecode:bool transformedBytecode:bool
//!   directoryCount:u16 string*
//!   [generated|transformed: entryCount:i32 string*]
//! parentFirstPackageCount:u16 string*
//! directlyIndexedCount:u16 { resourceName:string matchCount:u16 u16* }
//! ```

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use std::collections::HashMap;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use crate::error::{IndexError, Result};
use crate::index::ClasspathIndex;
use crate::manifest::ManifestInfo;

pub const MAGIC: u32 = 0xF031_5432;
pub const VERSION: i32 = 2;

/// Per-archive metadata as read back from the index file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveMetadata {
    pub path: PathBuf,
    pub manifest: Option<ManifestInfo>,
    pub generated_bytecode: bool,
    pub transformed_bytecode: bool,
    pub directories: Vec<String>,
    pub entries: Option<Vec<String>>,
}

/// The deserialized index, ready to be turned into a runtime loader.
#[derive(Debug, Clone)]
pub struct SerializedApplication {
    pub main_class: String,
    pub archives: Vec<ArchiveMetadata>,
    pub parent_first_packages: Vec<String>,
    pub directly_indexed: HashMap<String, Vec<u16>>,
}

/// Indexes `archives` and writes the result to `out`.
pub fn write<W: Write>(
    out: &mut W,
    app_root: &Path,
    archives: &[PathBuf],
    main_class: &str,
    parent_first_roots: &[PathBuf],
) -> Result<ClasspathIndex> {
    let index = ClasspathIndex::build(archives, main_class, parent_first_roots)?;
    write_index(out, &index, app_root)?;
    Ok(index)
}

pub fn write_index<W: Write>(out: &mut W, index: &ClasspathIndex, app_root: &Path) -> Result<()> {
    // Built archive paths are canonical, so the root has to be as well.
    let app_root = std::fs::canonicalize(app_root).unwrap_or_else(|_| app_root.to_path_buf());
    let app_root = app_root.as_path();
    out.write_u32::<BigEndian>(MAGIC)?;
    out.write_i32::<BigEndian>(VERSION)?;
    write_string(out, &index.main_class)?;
    write_count(out, index.archives.len(), "archives")?;

    for archive in index.archives.iter() {
        write_string(out, &relative_path(app_root, &archive.path))?;
        match archive.manifest.as_ref() {
            Some(manifest) => {
                out.write_u8(1)?;
                for field in manifest.fields() {
                    write_nullable(out, field.as_deref())?;
                }
            }
            None => out.write_u8(0)?,
        }
        out.write_u8(archive.generated_bytecode as u8)?;
        out.write_u8(archive.transformed_bytecode as u8)?;

        write_count(out, archive.directories.len(), "directories")?;
        for dir in archive.directories.iter() {
            write_string(out, dir)?;
        }

        if archive.keeps_entry_list() {
            let entries = archive.entries.as_ref().map(|e| e.len()).unwrap_or(0);
            let count = i32::try_from(entries)
                .map_err(|_| IndexError::TooLarge(format!("{entries} archive entries")))?;
            out.write_i32::<BigEndian>(count)?;
            for entry in archive.entries.iter().flatten() {
                write_string(out, entry)?;
            }
        }
    }

    write_count(out, index.parent_first_packages.len(), "parent-first packages")?;
    for pkg in index.parent_first_packages.iter() {
        write_string(out, pkg)?;
    }

    write_count(out, index.directly_indexed.len(), "directly indexed resources")?;
    for (name, matches) in index.directly_indexed.iter() {
        write_string(out, name)?;
        write_count(out, matches.len(), "resource matches")?;
        for idx in matches {
            out.write_u16::<BigEndian>(*idx)?;
        }
    }
    out.flush()?;
    Ok(())
}

pub fn read<R: Read>(input: &mut R, app_root: &Path) -> Result<SerializedApplication> {
    read_header(input, MAGIC, VERSION)?;
    let main_class = read_string(input)?;

    let archive_count = input.read_u16::<BigEndian>()?;
    let mut archives = Vec::with_capacity(usize::from(archive_count));
    for _ in 0..archive_count {
        let path = resolve_path(app_root, &read_string(input)?);
        let manifest = if read_bool(input)? {
            let mut fields: [Option<String>; 6] = Default::default();
            for field in fields.iter_mut() {
                *field = read_nullable(input)?;
            }
            Some(ManifestInfo::from_fields(fields))
        } else {
            None
        };
        let generated_bytecode = read_bool(input)?;
        let transformed_bytecode = read_bool(input)?;

        let dir_count = input.read_u16::<BigEndian>()?;
        let directories = (0..dir_count)
            .map(|_| read_string(input))
            .collect::<Result<Vec<_>>>()?;

        let entries = if generated_bytecode || transformed_bytecode {
            let count = input.read_i32::<BigEndian>()?;
            if count < 0 {
                return Err(IndexError::Malformed(format!("negative entry count {count}")));
            }
            Some(
                (0..count)
                    .map(|_| read_string(input))
                    .collect::<Result<Vec<_>>>()?,
            )
        } else {
            None
        };

        archives.push(ArchiveMetadata {
            path,
            manifest,
            generated_bytecode,
            transformed_bytecode,
            directories,
            entries,
        });
    }

    let pkg_count = input.read_u16::<BigEndian>()?;
    let parent_first_packages = (0..pkg_count)
        .map(|_| read_string(input))
        .collect::<Result<Vec<_>>>()?;

    let direct_count = input.read_u16::<BigEndian>()?;
    let mut directly_indexed = HashMap::with_capacity(usize::from(direct_count));
    for _ in 0..direct_count {
        let name = read_string(input)?;
        let matches = input.read_u16::<BigEndian>()?;
        let mut indices = Vec::with_capacity(usize::from(matches));
        for _ in 0..matches {
            let idx = input.read_u16::<BigEndian>()?;
            if usize::from(idx) >= archives.len() {
                return Err(IndexError::Malformed(format!(
                    "{name} refers to archive {idx} of {}",
                    archives.len()
                )));
            }
            indices.push(idx);
        }
        directly_indexed.insert(name, indices);
    }

    tracing::debug!(
        archives = archives.len(),
        directly_indexed = directly_indexed.len(),
        "runner index read"
    );

    Ok(SerializedApplication {
        main_class,
        archives,
        parent_first_packages,
        directly_indexed,
    })
}

pub(crate) fn read_header<R: Read>(input: &mut R, magic: u32, version: i32) -> Result<()> {
    let actual = input.read_u32::<BigEndian>()?;
    if actual != magic {
        return Err(IndexError::BadMagic {
            expected: magic,
            actual,
        });
    }
    let actual = input.read_i32::<BigEndian>()?;
    if actual != version {
        return Err(IndexError::UnsupportedVersion {
            expected: version,
            actual,
        });
    }
    Ok(())
}

pub(crate) fn write_string<W: Write>(out: &mut W, value: &str) -> Result<()> {
    let len = u16::try_from(value.len()).map_err(|_| {
        IndexError::TooLarge(format!("string of {} bytes", value.len()))
    })?;
    out.write_u16::<BigEndian>(len)?;
    out.write_all(value.as_bytes())?;
    Ok(())
}

pub(crate) fn read_string<R: Read>(input: &mut R) -> Result<String> {
    let len = input.read_u16::<BigEndian>()?;
    let mut buf = vec![0u8; usize::from(len)];
    input.read_exact(&mut buf)?;
    String::from_utf8(buf).map_err(|e| IndexError::Malformed(format!("invalid UTF-8 string: {e}")))
}

fn write_nullable<W: Write>(out: &mut W, value: Option<&str>) -> Result<()> {
    match value {
        Some(v) => {
            out.write_u8(1)?;
            write_string(out, v)
        }
        None => {
            out.write_u8(0)?;
            Ok(())
        }
    }
}

fn read_nullable<R: Read>(input: &mut R) -> Result<Option<String>> {
    if read_bool(input)? {
        read_string(input).map(Some)
    } else {
        Ok(None)
    }
}

fn read_bool<R: Read>(input: &mut R) -> Result<bool> {
    Ok(input.read_u8()? != 0)
}

fn write_count<W: Write>(out: &mut W, count: usize, what: &str) -> Result<()> {
    let count = u16::try_from(count).map_err(|_| IndexError::TooLarge(format!("{count} {what}")))?;
    out.write_u16::<BigEndian>(count)?;
    Ok(())
}

fn relative_path(app_root: &Path, path: &Path) -> String {
    match path.strip_prefix(app_root) {
        Ok(rel) => rel
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/"),
        Err(_) => path.to_string_lossy().to_string(),
    }
}

fn resolve_path(app_root: &Path, stored: &str) -> PathBuf {
    let path = Path::new(stored);
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        app_root.join(path)
    }
}
