//! Reduced index for ahead-of-time compiled applications.
//!
//! Only service descriptors are cached (their bytes are embedded in the file)
//! together with the names found directly under the fully indexed
//! directories. Every other lookup goes to the platform loader.
//!
//! Layout (big-endian):
//!
//! ```text
//! magic:i32 version:i32 mainClass:string
//! indexedDirCount:i32 string*
//! indexedResourceCount:i32 string*
//! serviceFileCount:i32 { name:string length:i32 bytes }
//! ```

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use rayon::prelude::*;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::io::{Read, Write};
use std::path::PathBuf;
use std::sync::Arc;

use crate::error::{IndexError, Result};
use crate::format::{read_header, read_string, write_string};
use crate::index::{FULLY_INDEXED_DIRECTORIES, fully_indexed_names};
use crate::loader::{DefinedClass, ParentLoader};
use crate::resource::ResourceUrl;
use crate::visitor::{ArchiveVisitor, parent_dir, visit_archive};

pub const AOT_MAGIC: u32 = 0xF031_5433;
pub const AOT_VERSION: i32 = 1;

const SERVICES_DIR: &str = "META-INF/services";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AotIndex {
    pub main_class: String,
    pub indexed_directories: BTreeSet<String>,
    pub indexed_resources: BTreeSet<String>,
    /// Service descriptor name to the concatenated contents of every archive
    /// that ships it, in classpath order.
    pub service_files: BTreeMap<String, Vec<u8>>,
}

#[derive(Default)]
struct ServiceCollector {
    names: BTreeSet<String>,
    services: Vec<(String, Vec<u8>)>,
}

impl ArchiveVisitor for ServiceCollector {
    fn visit_entry(&mut self, name: &str, read: &mut dyn FnMut() -> Result<Vec<u8>>) -> Result<()> {
        self.names.extend(fully_indexed_names(name));
        if parent_dir(name) == SERVICES_DIR {
            self.services.push((name.to_string(), read()?));
        }
        Ok(())
    }
}

fn append_service(target: &mut Vec<u8>, content: &[u8]) {
    if !target.is_empty() && !target.ends_with(b"\n") {
        target.push(b'\n');
    }
    target.extend_from_slice(content);
}

impl AotIndex {
    pub fn build(archives: &[PathBuf], main_class: &str) -> Result<Self> {
        let collected = archives
            .par_iter()
            .map(|path| {
                let mut collector = ServiceCollector::default();
                visit_archive(path, &mut collector)?;
                Ok(collector)
            })
            .collect::<Result<Vec<_>>>()?;

        let mut index = AotIndex {
            main_class: main_class.to_string(),
            indexed_directories: FULLY_INDEXED_DIRECTORIES.iter().map(|d| d.to_string()).collect(),
            ..Default::default()
        };
        for collector in collected {
            index.indexed_resources.extend(collector.names);
            for (name, content) in collector.services {
                append_service(index.service_files.entry(name).or_default(), &content);
            }
        }
        tracing::info!(
            archives = archives.len(),
            services = index.service_files.len(),
            "aot index built"
        );
        Ok(index)
    }

    pub fn write<W: Write>(&self, out: &mut W) -> Result<()> {
        out.write_u32::<BigEndian>(AOT_MAGIC)?;
        out.write_i32::<BigEndian>(AOT_VERSION)?;
        write_string(out, &self.main_class)?;

        write_i32_len(out, self.indexed_directories.len())?;
        for dir in self.indexed_directories.iter() {
            write_string(out, dir)?;
        }
        write_i32_len(out, self.indexed_resources.len())?;
        for name in self.indexed_resources.iter() {
            write_string(out, name)?;
        }
        write_i32_len(out, self.service_files.len())?;
        for (name, content) in self.service_files.iter() {
            write_string(out, name)?;
            write_i32_len(out, content.len())?;
            out.write_all(content)?;
        }
        out.flush()?;
        Ok(())
    }

    pub fn read<R: Read>(input: &mut R) -> Result<Self> {
        read_header(input, AOT_MAGIC, AOT_VERSION)?;
        let main_class = read_string(input)?;

        let dirs = read_i32_len(input)?;
        let indexed_directories = (0..dirs)
            .map(|_| read_string(input))
            .collect::<Result<BTreeSet<_>>>()?;
        let resources = read_i32_len(input)?;
        let indexed_resources = (0..resources)
            .map(|_| read_string(input))
            .collect::<Result<BTreeSet<_>>>()?;

        let services = read_i32_len(input)?;
        let mut service_files = BTreeMap::new();
        for _ in 0..services {
            let name = read_string(input)?;
            let len = read_i32_len(input)?;
            // Grows with the bytes actually present, not the declared length.
            let mut content = Vec::new();
            input.by_ref().take(len as u64).read_to_end(&mut content)?;
            if content.len() != len {
                return Err(IndexError::Malformed(format!(
                    "service file {name} truncated: {} of {len} bytes",
                    content.len()
                )));
            }
            service_files.insert(name, content);
        }

        Ok(Self {
            main_class,
            indexed_directories,
            indexed_resources,
            service_files,
        })
    }
}

fn write_i32_len<W: Write>(out: &mut W, len: usize) -> Result<()> {
    let len = i32::try_from(len).map_err(|_| IndexError::TooLarge(format!("length {len}")))?;
    out.write_i32::<BigEndian>(len)?;
    Ok(())
}

fn read_i32_len<R: Read>(input: &mut R) -> Result<usize> {
    let len = input.read_i32::<BigEndian>()?;
    usize::try_from(len).map_err(|_| IndexError::Malformed(format!("negative length {len}")))
}

/// Loader for the reduced index: cached service descriptors plus negative
/// answers under the indexed directories; everything else is the parent's.
pub struct AotRunnerClassLoader {
    main_class: String,
    indexed_directories: HashSet<String>,
    indexed_resources: HashSet<String>,
    service_files: HashMap<String, Arc<[u8]>>,
    parent: Arc<dyn ParentLoader>,
}

impl std::fmt::Debug for AotRunnerClassLoader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AotRunnerClassLoader")
            .field("main_class", &self.main_class)
            .field("service_files", &self.service_files.len())
            .finish()
    }
}

impl AotRunnerClassLoader {
    pub fn new(index: AotIndex, parent: Arc<dyn ParentLoader>) -> Self {
        Self {
            main_class: index.main_class,
            indexed_directories: index.indexed_directories.into_iter().collect(),
            indexed_resources: index.indexed_resources.into_iter().collect(),
            service_files: index
                .service_files
                .into_iter()
                .map(|(name, bytes)| (name, Arc::from(bytes)))
                .collect(),
            parent,
        }
    }

    pub fn main_class(&self) -> &str {
        &self.main_class
    }

    pub fn load_class(&self, name: &str) -> Result<Arc<DefinedClass>> {
        self.parent
            .load_class(name)
            .ok_or_else(|| IndexError::ClassNotFound(name.to_string()))
    }

    fn service_url(&self, name: &str) -> Option<ResourceUrl> {
        self.service_files.get(name).map(|bytes| ResourceUrl::Memory {
            name: name.to_string(),
            bytes: Arc::clone(bytes),
        })
    }

    fn known_missing(&self, name: &str) -> bool {
        self.indexed_directories.contains(parent_dir(name)) && !self.indexed_resources.contains(name)
    }

    pub fn find_resource(&self, name: &str) -> Option<ResourceUrl> {
        let name = name.strip_prefix('/').unwrap_or(name);
        if let Some(url) = self.service_url(name) {
            return Some(url);
        }
        if self.known_missing(name) {
            return None;
        }
        self.parent.resource(name)
    }

    pub fn find_resources(&self, name: &str) -> Vec<ResourceUrl> {
        let name = name.strip_prefix('/').unwrap_or(name);
        if let Some(url) = self.service_url(name) {
            return vec![url];
        }
        if self.known_missing(name) {
            return Vec::new();
        }
        self.parent.resources(name)
    }

    pub fn resource_bytes(&self, name: &str) -> Result<Option<Vec<u8>>> {
        match self.find_resource(name) {
            Some(url) => url.read_bytes().map(Some),
            None => Ok(None),
        }
    }
}
