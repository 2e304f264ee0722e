//! # runner-index
//!
//! Build-time classpath index and the runtime loader that consumes it, for
//! packaged Java applications whose start-up cost is dominated by class and
//! resource lookups.
//!
//! ## Architecture
//!
//! - **visitor**: single-pass walk over a jar or exploded directory
//! - **index**: per-archive metadata and the directly indexed table
//! - **format**: binary index file (writer and reader)
//! - **aot**: reduced index for ahead-of-time compiled images
//! - **archive**: memory-mapped jar or directory handle
//! - **handle**: reference-counted handle lifecycle shared by readers
//! - **buffer**: lock-free pool of read buffers used during bootstrap
//! - **resource**: one classpath element as the loader sees it
//! - **loader**: class and resource resolution against the index
//! - **classfile**: class-file header parsing (name and super class)
//! - **manifest**: the manifest attributes packages are defined from

pub mod aot;
pub mod archive;
pub mod buffer;
pub mod classfile;
pub mod cli;
pub mod config;
pub mod error;
pub mod format;
pub mod handle;
pub mod index;
pub mod loader;
pub mod manifest;
pub mod resource;
pub mod visitor;

pub use error::{IndexError, Result};
