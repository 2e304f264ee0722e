//! Physical access to one classpath element: a memory-mapped jar or an
//! exploded directory.

use memmap2::Mmap;
use std::fs::File;
use std::io::{Cursor, Read};
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use zip::ZipArchive;
use zip::result::ZipError;

use crate::buffer::BufferPool;
use crate::error::{IndexError, Result};

/// A read-only mapping shared by every clone of a jar reader.
#[derive(Debug, Clone)]
pub struct SharedMap(Arc<Mmap>);

impl AsRef<[u8]> for SharedMap {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

/// An opened classpath element. Cloning the inner zip reader is cheap, so
/// concurrent readers each work on their own cursor over the same mapping.
#[derive(Debug)]
pub enum ArchiveHandle {
    Jar {
        path: PathBuf,
        zip: ZipArchive<Cursor<SharedMap>>,
    },
    Directory {
        root: PathBuf,
    },
}

impl ArchiveHandle {
    pub fn open(path: &Path) -> Result<Self> {
        if path.is_dir() {
            return Ok(Self::Directory {
                root: path.to_path_buf(),
            });
        }

        let file = File::open(path).map_err(|e| IndexError::io(path, e))?;
        // SAFETY: the archive is an immutable packaged artifact opened
        // read-only; the mapping lives as long as every clone of the reader.
        let mmap = unsafe { Mmap::map(&file) }.map_err(|e| IndexError::io(path, e))?;
        let zip = ZipArchive::new(Cursor::new(SharedMap(Arc::new(mmap))))
            .map_err(|e| IndexError::zip(path, e))?;
        Ok(Self::Jar {
            path: path.to_path_buf(),
            zip,
        })
    }

    pub fn path(&self) -> &Path {
        match self {
            Self::Jar { path, .. } => path,
            Self::Directory { root } => root,
        }
    }

    pub fn is_directory(&self) -> bool {
        matches!(self, Self::Directory { .. })
    }

    pub fn contains(&self, name: &str) -> bool {
        match self {
            Self::Jar { zip, .. } => zip.clone().by_name(name).is_ok(),
            Self::Directory { root } => {
                safe_join(root, name).is_some_and(|p| p.is_file())
            }
        }
    }

    /// Reads one entry into a pooled buffer and hands the bytes to `f`.
    /// Returns `Ok(None)` when the entry does not exist.
    pub fn with_entry<R>(
        &self,
        name: &str,
        pool: &BufferPool,
        f: impl FnOnce(&[u8]) -> Result<R>,
    ) -> Result<Option<R>> {
        match self {
            Self::Jar { path, zip } => {
                let mut zip = zip.clone();
                let mut entry = match zip.by_name(name) {
                    Ok(entry) => entry,
                    Err(ZipError::FileNotFound) => return Ok(None),
                    Err(e) => return Err(IndexError::zip(path, e)),
                };
                if entry.is_dir() {
                    return Ok(None);
                }
                let size = usize::try_from(entry.size()).map_err(|_| {
                    IndexError::TooLarge(format!("{name} in {}", path.display()))
                })?;
                let mut buf = pool.allocate(size);
                let read = entry.read_exact(buf.as_mut_slice());
                let result = match read {
                    Ok(()) => f(buf.as_slice()).map(Some),
                    Err(e) => Err(IndexError::io(path.join(name), e)),
                };
                pool.release(buf);
                result
            }
            Self::Directory { root } => {
                let Some(file) = safe_join(root, name).filter(|p| p.is_file()) else {
                    return Ok(None);
                };
                let bytes = std::fs::read(&file).map_err(|e| IndexError::io(&file, e))?;
                f(&bytes).map(Some)
            }
        }
    }

    pub fn read_entry(&self, name: &str, pool: &BufferPool) -> Result<Option<Vec<u8>>> {
        self.with_entry(name, pool, |bytes| Ok(bytes.to_vec()))
    }

    /// Entry names of a jar in central-directory order. Directory entries
    /// keep their trailing `/`.
    pub fn jar_entry_names(&self) -> Result<Vec<String>> {
        let Self::Jar { path, zip } = self else {
            return Ok(Vec::new());
        };
        let mut zip = zip.clone();
        let mut names = Vec::with_capacity(zip.len());
        for i in 0..zip.len() {
            let entry = zip.by_index_raw(i).map_err(|e| IndexError::zip(path, e))?;
            names.push(entry.name().to_string());
        }
        Ok(names)
    }
}

/// Reads a single entry from an archive without going through a loader.
pub fn read_archive_entry(archive: &Path, name: &str) -> Result<Option<Vec<u8>>> {
    let handle = ArchiveHandle::open(archive)?;
    handle.read_entry(name, &BufferPool::new(0))
}

fn safe_join(root: &Path, name: &str) -> Option<PathBuf> {
    let relative = Path::new(name);
    if relative
        .components()
        .any(|c| !matches!(c, Component::Normal(_)))
    {
        return None;
    }
    Some(root.join(relative))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{temp_path, write_jar};

    #[test]
    fn jar_handle_reads_entries_and_misses_cleanly() -> anyhow::Result<()> {
        let jar = temp_path("archive_read.jar");
        write_jar(&jar, &[("a/b.txt", b"hello"), ("c/", b"")])?;

        let handle = ArchiveHandle::open(&jar)?;
        let pool = BufferPool::default();
        assert!(handle.contains("a/b.txt"));
        assert!(!handle.contains("a/missing.txt"));
        assert_eq!(handle.read_entry("a/b.txt", &pool)?, Some(b"hello".to_vec()));
        assert_eq!(handle.read_entry("nope", &pool)?, None);
        assert_eq!(handle.read_entry("c/", &pool)?, None);
        assert_eq!(handle.jar_entry_names()?, vec!["a/b.txt", "c/"]);

        std::fs::remove_file(jar)?;
        Ok(())
    }

    #[test]
    fn directory_handle_rejects_escaping_names() -> anyhow::Result<()> {
        let dir = temp_path("archive_dir");
        std::fs::create_dir_all(dir.join("x"))?;
        std::fs::write(dir.join("x/y.txt"), b"yy")?;

        let handle = ArchiveHandle::open(&dir)?;
        let pool = BufferPool::default();
        assert!(handle.is_directory());
        assert_eq!(handle.read_entry("x/y.txt", &pool)?, Some(b"yy".to_vec()));
        assert_eq!(handle.read_entry("../x/y.txt", &pool)?, None);
        assert!(!handle.contains("x"));

        std::fs::remove_dir_all(dir)?;
        Ok(())
    }

    #[test]
    fn opening_a_non_zip_file_is_a_zip_error() -> anyhow::Result<()> {
        let path = temp_path("not_a.jar");
        std::fs::write(&path, b"definitely not a zip")?;
        let err = ArchiveHandle::open(&path).unwrap_err();
        assert!(matches!(err, IndexError::Zip { .. }));
        std::fs::remove_file(path)?;
        Ok(())
    }
}
