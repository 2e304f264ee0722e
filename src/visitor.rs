//! Archive traversal protocol.
//!
//! A single walk over a jar or an exploded directory reports the manifest,
//! every directory that holds entries, and every file entry. The index
//! builder and the reduced AOT builder are both visitors.

use ignore::WalkBuilder;
use std::path::Path;

use crate::archive::ArchiveHandle;
use crate::buffer::BufferPool;
use crate::error::{IndexError, Result};
use crate::manifest::{MANIFEST_NAME, ManifestInfo};

pub trait ArchiveVisitor {
    fn visit_manifest(&mut self, _manifest: ManifestInfo) {}

    /// A directory that contains at least one entry, `""` for the root. May
    /// be reported more than once.
    fn visit_directory(&mut self, _dir: &str) {}

    /// A file entry with its full `/`-separated name. `read` fetches the
    /// entry's bytes on demand.
    fn visit_entry(&mut self, _name: &str, _read: &mut dyn FnMut() -> Result<Vec<u8>>) -> Result<()> {
        Ok(())
    }
}

pub fn parent_dir(name: &str) -> &str {
    match name.trim_end_matches('/').rfind('/') {
        Some(idx) => &name[..idx],
        None => "",
    }
}

pub fn visit_archive(path: &Path, visitor: &mut dyn ArchiveVisitor) -> Result<()> {
    if path.is_dir() {
        return visit_directory_tree(path, visitor);
    }

    let handle = ArchiveHandle::open(path)?;
    let pool = BufferPool::new(0);
    for name in handle.jar_entry_names()? {
        if let Some(dir) = name.strip_suffix('/') {
            visitor.visit_directory(dir);
            continue;
        }
        if name == MANIFEST_NAME
            && let Some(bytes) = handle.read_entry(&name, &pool)?
        {
            visitor.visit_manifest(ManifestInfo::parse(&bytes));
        }
        visitor.visit_directory(parent_dir(&name));
        let mut read = || {
            handle
                .read_entry(&name, &pool)?
                .ok_or_else(|| IndexError::Malformed(format!("entry {name} vanished")))
        };
        visitor.visit_entry(&name, &mut read)?;
    }
    Ok(())
}

fn visit_directory_tree(root: &Path, visitor: &mut dyn ArchiveVisitor) -> Result<()> {
    let walker = WalkBuilder::new(root)
        .hidden(false)
        .git_ignore(false)
        .git_global(false)
        .git_exclude(false)
        .ignore(false)
        .parents(false)
        .sort_by_file_name(|a, b| a.cmp(b))
        .build();

    for entry in walker {
        let entry = entry.map_err(|e| {
            IndexError::io(root, std::io::Error::other(e.to_string()))
        })?;
        let path = entry.path();
        let Ok(relative) = path.strip_prefix(root) else {
            continue;
        };
        let name = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");
        if name.is_empty() {
            continue;
        }

        if entry.file_type().is_some_and(|t| t.is_dir()) {
            visitor.visit_directory(&name);
            continue;
        }

        if name == MANIFEST_NAME {
            let bytes = std::fs::read(path).map_err(|e| IndexError::io(path, e))?;
            visitor.visit_manifest(ManifestInfo::parse(&bytes));
        }
        visitor.visit_directory(parent_dir(&name));
        let mut read = || std::fs::read(path).map_err(|e| IndexError::io(path, e));
        visitor.visit_entry(&name, &mut read)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{temp_path, write_jar};
    use std::collections::BTreeSet;

    #[derive(Default)]
    struct Recorder {
        dirs: BTreeSet<String>,
        entries: Vec<String>,
        manifest: Option<ManifestInfo>,
    }

    impl ArchiveVisitor for Recorder {
        fn visit_manifest(&mut self, manifest: ManifestInfo) {
            self.manifest = Some(manifest);
        }

        fn visit_directory(&mut self, dir: &str) {
            self.dirs.insert(dir.to_string());
        }

        fn visit_entry(&mut self, name: &str, _read: &mut dyn FnMut() -> Result<Vec<u8>>) -> Result<()> {
            self.entries.push(name.to_string());
            Ok(())
        }
    }

    #[test]
    fn jar_and_directory_visits_agree() -> anyhow::Result<()> {
        let entries: &[(&str, &[u8])] = &[
            ("META-INF/MANIFEST.MF", b"Manifest-Version: 1.0\nImplementation-Title: t\n"),
            ("app.properties", b"a=b"),
            ("org/acme/Foo.class", b"x"),
        ];
        let jar = temp_path("visitor.jar");
        write_jar(&jar, entries)?;
        let dir = temp_path("visitor_dir");
        for (name, content) in entries {
            let p = dir.join(name);
            std::fs::create_dir_all(p.parent().unwrap())?;
            std::fs::write(p, content)?;
        }

        let mut from_jar = Recorder::default();
        visit_archive(&jar, &mut from_jar)?;
        let mut from_dir = Recorder::default();
        visit_archive(&dir, &mut from_dir)?;

        let mut jar_entries = from_jar.entries.clone();
        jar_entries.sort();
        assert_eq!(jar_entries, from_dir.entries);
        assert!(from_jar.dirs.is_subset(&from_dir.dirs));
        assert!(from_dir.dirs.contains("org/acme"));
        assert!(from_dir.dirs.contains(""));
        assert_eq!(
            from_jar.manifest.and_then(|m| m.implementation_title),
            Some("t".to_string())
        );
        assert!(from_dir.manifest.is_some());

        std::fs::remove_file(jar)?;
        std::fs::remove_dir_all(dir)?;
        Ok(())
    }

    #[test]
    fn parent_dir_of_root_entry_is_empty() {
        assert_eq!(parent_dir("a.txt"), "");
        assert_eq!(parent_dir("a/b/c.txt"), "a/b");
        assert_eq!(parent_dir("a/b/"), "a");
    }
}
