//! One classpath element as seen by the runtime loader.

use std::collections::HashSet;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};

use crate::archive::{ArchiveHandle, read_archive_entry};
use crate::buffer::BufferPool;
use crate::error::{IndexError, Result};
use crate::format::ArchiveMetadata;
use crate::handle::{HandleSlot, OpenStats};
use crate::manifest::ManifestInfo;

/// Where a defined class came from, derived from the archive's file URL.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct ProtectionDomain {
    pub code_source: String,
}

impl ProtectionDomain {
    fn for_path(path: &Path, is_dir: bool) -> Self {
        let mut code_source = format!("file:{}", path.display());
        if is_dir && !code_source.ends_with('/') {
            code_source.push('/');
        }
        Self { code_source }
    }
}

/// A locator for one resource. It can be opened without the loader that
/// produced it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResourceUrl {
    Jar { archive: PathBuf, name: String },
    File { path: PathBuf },
    Memory { name: String, bytes: Arc<[u8]> },
}

impl ResourceUrl {
    pub fn read_bytes(&self) -> Result<Vec<u8>> {
        match self {
            Self::Jar { archive, name } => read_archive_entry(archive, name)?.ok_or_else(|| {
                IndexError::io(
                    archive.join(name),
                    std::io::Error::new(std::io::ErrorKind::NotFound, "entry no longer present"),
                )
            }),
            Self::File { path } => std::fs::read(path).map_err(|e| IndexError::io(path, e)),
            Self::Memory { bytes, .. } => Ok(bytes.to_vec()),
        }
    }
}

impl fmt::Display for ResourceUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Jar { archive, name } => write!(f, "jar:file:{}!/{name}", archive.display()),
            Self::File { path } => write!(f, "file:{}", path.display()),
            Self::Memory { name, .. } => write!(f, "memory:/{name}"),
        }
    }
}

pub struct ArchiveResource {
    index: usize,
    path: PathBuf,
    manifest: Option<ManifestInfo>,
    generated_bytecode: bool,
    transformed_bytecode: bool,
    entries: Option<HashSet<String>>,
    protection_domain: OnceLock<ProtectionDomain>,
    slot: Arc<HandleSlot>,
    pool: Arc<BufferPool>,
}

impl fmt::Debug for ArchiveResource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ArchiveResource")
            .field("index", &self.index)
            .field("path", &self.path)
            .field("slot", &self.slot)
            .finish()
    }
}

impl ArchiveResource {
    pub fn new(
        index: usize,
        metadata: ArchiveMetadata,
        pool: Arc<BufferPool>,
        stats: Arc<OpenStats>,
    ) -> Self {
        let slot = HandleSlot::new(metadata.path.clone(), stats);
        Self {
            index,
            path: metadata.path,
            manifest: metadata.manifest,
            generated_bytecode: metadata.generated_bytecode,
            transformed_bytecode: metadata.transformed_bytecode,
            entries: metadata.entries.map(|e| e.into_iter().collect()),
            protection_domain: OnceLock::new(),
            slot,
            pool,
        }
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn manifest(&self) -> Option<&ManifestInfo> {
        self.manifest.as_ref()
    }

    pub fn is_generated_bytecode(&self) -> bool {
        self.generated_bytecode
    }

    pub fn is_transformed_bytecode(&self) -> bool {
        self.transformed_bytecode
    }

    /// Materializes the protection domain. Later calls are no-ops.
    pub fn init(&self) -> &ProtectionDomain {
        self.protection_domain
            .get_or_init(|| ProtectionDomain::for_path(&self.path, self.path.is_dir()))
    }

    pub fn protection_domain(&self) -> &ProtectionDomain {
        self.init()
    }

    /// `false` only when the archive's full entry list is known and lacks
    /// `name`.
    pub fn may_contain(&self, name: &str) -> bool {
        self.entries.as_ref().is_none_or(|e| e.contains(name))
    }

    pub fn has_entry_list(&self) -> bool {
        self.entries.is_some()
    }

    pub fn is_open(&self) -> bool {
        self.slot.is_open()
    }

    fn with_handle<R>(&self, op: impl FnOnce(&ArchiveHandle) -> Result<R>) -> Result<R> {
        self.slot.with_handle(op)
    }

    /// Runs `f` over the entry's bytes in a pooled buffer.
    pub fn with_entry<R>(&self, name: &str, f: impl FnOnce(&[u8]) -> Result<R>) -> Result<Option<R>> {
        if !self.may_contain(name) {
            return Ok(None);
        }
        self.with_handle(|handle| handle.with_entry(name, &self.pool, f))
    }

    pub fn resource_bytes(&self, name: &str) -> Result<Option<Vec<u8>>> {
        self.with_entry(name, |bytes| Ok(bytes.to_vec()))
    }

    pub fn resource_url(&self, name: &str) -> Result<Option<ResourceUrl>> {
        if !self.may_contain(name) {
            return Ok(None);
        }
        self.with_handle(|handle| {
            if !handle.contains(name) {
                return Ok(None);
            }
            Ok(Some(if handle.is_directory() {
                ResourceUrl::File {
                    path: handle.path().join(name),
                }
            } else {
                ResourceUrl::Jar {
                    archive: handle.path().to_path_buf(),
                    name: name.to_string(),
                }
            }))
        })
    }

    /// Drops this resource's hold on its handle. Readers that are still
    /// inside an access keep the handle alive until they finish.
    pub fn reset_internal_caches(&self) {
        self.slot.reset();
    }

    pub fn close(&self) {
        self.slot.reset();
    }
}
