//! Error types for index building and runtime resolution.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum IndexError {
    /// The index file does not start with the expected magic number.
    #[error("not a runner index: expected magic {expected:#010x}, got {actual:#010x}")]
    BadMagic { expected: u32, actual: u32 },

    /// The index file was written by an incompatible version.
    #[error("unsupported runner index version {actual} (this build reads version {expected})")]
    UnsupportedVersion { expected: i32, actual: i32 },

    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to read archive structure of {}: {source}", path.display())]
    Zip {
        path: PathBuf,
        #[source]
        source: zip::result::ZipError,
    },

    #[error("index stream I/O error: {0}")]
    Stream(#[from] std::io::Error),

    #[error("malformed index data: {0}")]
    Malformed(String),

    #[error("value too large for index format: {0}")]
    TooLarge(String),

    #[error("class format error in {class}: {reason}")]
    ClassFormat { class: String, reason: String },

    #[error("class not found: {0}")]
    ClassNotFound(String),

    /// A handle reference was released more often than it was acquired.
    #[error("handle reference for {} released below zero", path.display())]
    ReleaseUnderflow { path: PathBuf },
}

impl IndexError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    pub fn zip(path: impl Into<PathBuf>, source: zip::result::ZipError) -> Self {
        Self::Zip {
            path: path.into(),
            source,
        }
    }

    pub fn class_format(class: &str, reason: impl Into<String>) -> Self {
        Self::ClassFormat {
            class: class.to_string(),
            reason: reason.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, IndexError>;
