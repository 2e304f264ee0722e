//! Build-time classpath index.
//!
//! Every archive is visited exactly once. The visit yields the archive's
//! manifest, its directory set, the names it contributes to the fully indexed
//! directories and, for build-generated archives, its complete entry list.

use rayon::prelude::*;
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::time::Instant;

use crate::error::{IndexError, Result};
use crate::manifest::ManifestInfo;
use crate::visitor::{ArchiveVisitor, parent_dir, visit_archive};

/// Directories whose complete contents are recorded at build time.
pub const FULLY_INDEXED_DIRECTORIES: [&str; 3] = ["", "META-INF", "META-INF/services"];

pub const GENERATED_BYTECODE_JAR: &str = "generated-bytecode.jar";
pub const TRANSFORMED_BYTECODE_JAR: &str = "transformed-bytecode.jar";

pub fn is_fully_indexed(dir: &str) -> bool {
    FULLY_INDEXED_DIRECTORIES.contains(&dir)
}

/// Names an entry contributes to the fully indexed directories: the next
/// path segment below each matching prefix, or the entry itself when it sits
/// directly in that directory.
pub fn fully_indexed_names(name: &str) -> Vec<String> {
    let mut names = Vec::new();
    for prefix in FULLY_INDEXED_DIRECTORIES {
        let rest = if prefix.is_empty() {
            name
        } else {
            match name.strip_prefix(prefix).and_then(|r| r.strip_prefix('/')) {
                Some(rest) => rest,
                None => continue,
            }
        };
        if rest.is_empty() {
            continue;
        }
        match rest.find('/') {
            Some(idx) if prefix.is_empty() => names.push(rest[..idx].to_string()),
            Some(idx) => names.push(format!("{prefix}/{}", &rest[..idx])),
            None => names.push(name.to_string()),
        }
    }
    names
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveInfo {
    pub path: PathBuf,
    pub manifest: Option<ManifestInfo>,
    pub generated_bytecode: bool,
    pub transformed_bytecode: bool,
    pub directories: BTreeSet<String>,
    /// Complete entry list, kept only for generated or transformed archives.
    pub entries: Option<BTreeSet<String>>,
    pub fully_indexed: BTreeSet<String>,
    pub class_directories: BTreeSet<String>,
}

impl ArchiveInfo {
    pub fn keeps_entry_list(&self) -> bool {
        self.generated_bytecode || self.transformed_bytecode
    }
}

struct ArchiveInspector {
    info: ArchiveInfo,
}

impl ArchiveVisitor for ArchiveInspector {
    fn visit_manifest(&mut self, manifest: ManifestInfo) {
        self.info.manifest = Some(manifest);
    }

    fn visit_directory(&mut self, dir: &str) {
        if !self.info.directories.contains(dir) {
            self.info.directories.insert(dir.to_string());
        }
    }

    fn visit_entry(&mut self, name: &str, _read: &mut dyn FnMut() -> Result<Vec<u8>>) -> Result<()> {
        self.info.fully_indexed.extend(fully_indexed_names(name));
        if name.ends_with(".class") && !name.starts_with("META-INF/") {
            let dir = parent_dir(name);
            if !self.info.class_directories.contains(dir) {
                self.info.class_directories.insert(dir.to_string());
            }
        }
        if let Some(entries) = self.info.entries.as_mut() {
            entries.insert(name.to_string());
        }
        Ok(())
    }
}

pub fn inspect_archive(path: &Path) -> Result<ArchiveInfo> {
    let file_name = path.file_name().and_then(|n| n.to_str()).unwrap_or("");
    let generated_bytecode = file_name == GENERATED_BYTECODE_JAR;
    let transformed_bytecode = file_name == TRANSFORMED_BYTECODE_JAR;

    let mut inspector = ArchiveInspector {
        info: ArchiveInfo {
            path: path.to_path_buf(),
            manifest: None,
            generated_bytecode,
            transformed_bytecode,
            directories: BTreeSet::new(),
            entries: (generated_bytecode || transformed_bytecode).then(BTreeSet::new),
            fully_indexed: BTreeSet::new(),
            class_directories: BTreeSet::new(),
        },
    };
    visit_archive(path, &mut inspector)?;
    Ok(inspector.info)
}

/// The build-time view of a whole classpath.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClasspathIndex {
    pub main_class: String,
    pub archives: Vec<ArchiveInfo>,
    pub parent_first_packages: BTreeSet<String>,
    /// Fully indexed resource name to the ascending indices of the archives
    /// that contain it.
    pub directly_indexed: BTreeMap<String, Vec<u16>>,
}

impl ClasspathIndex {
    pub fn build(
        archives: &[PathBuf],
        main_class: &str,
        parent_first_roots: &[PathBuf],
    ) -> Result<Self> {
        if archives.len() > usize::from(u16::MAX) {
            return Err(IndexError::TooLarge(format!(
                "{} classpath archives",
                archives.len()
            )));
        }

        let start = Instant::now();
        let infos = archives
            .par_iter()
            .map(|path| {
                let path = std::fs::canonicalize(path).map_err(|e| IndexError::io(path, e))?;
                inspect_archive(&path)
            })
            .collect::<Result<Vec<_>>>()?;

        // Roots that do not exist cannot match an archive, so keep them as given.
        let parent_first_roots = parent_first_roots
            .iter()
            .map(|root| std::fs::canonicalize(root).unwrap_or_else(|_| root.clone()))
            .collect::<Vec<_>>();
        let mut parent_first_packages = BTreeSet::new();
        for info in infos.iter() {
            if parent_first_roots.iter().any(|root| root == &info.path) {
                parent_first_packages.extend(info.class_directories.iter().cloned());
            }
        }

        let mut directly_indexed: BTreeMap<String, Vec<u16>> = BTreeMap::new();
        for (idx, info) in infos.iter().enumerate() {
            // Bounded by the u16 check above.
            let idx = idx as u16;
            for name in info.fully_indexed.iter() {
                directly_indexed.entry(name.clone()).or_default().push(idx);
            }
        }

        tracing::info!(
            archives = infos.len(),
            directly_indexed = directly_indexed.len(),
            parent_first = parent_first_packages.len(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "classpath index built"
        );

        Ok(Self {
            main_class: main_class.to_string(),
            archives: infos,
            parent_first_packages,
            directly_indexed,
        })
    }
}
