use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::buffer::DEFAULT_MAX_POOLED_CAPACITY;
use crate::cli::Cli;

pub const DEFAULT_INDEX_FILE: &str = "runner-index.dat";
pub const DEFAULT_AOT_INDEX_FILE: &str = "runner-index-aot.dat";

/// Runtime tuning for [`crate::loader::RunnerClassLoader`]. Every field has
/// a default, so a config file only needs the keys it overrides.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct LoaderConfig {
    /// Class-name prefixes that always go to the parent loader.
    pub platform_prefixes: Vec<String>,
    /// Resource names probed on hot paths. Those provably absent from the
    /// index are answered from a negative set without any lookup.
    pub negative_probes: Vec<String>,
    pub hot_window_size: usize,
    pub max_pooled_buffer: usize,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            platform_prefixes: vec!["java.".to_string(), "jdk.".to_string(), "sun.".to_string()],
            negative_probes: [
                "META-INF/services/java.nio.file.spi.FileSystemProvider",
                "META-INF/services/javax.xml.parsers.DocumentBuilderFactory",
                "META-INF/services/org.jboss.logmanager.EmbeddedConfigurator",
                "logging.properties",
                "org/slf4j/impl/StaticLoggerBinder.class",
                "log4j2.component.properties",
            ]
            .into_iter()
            .map(str::to_string)
            .collect(),
            hot_window_size: 4,
            max_pooled_buffer: DEFAULT_MAX_POOLED_CAPACITY,
        }
    }
}

impl LoaderConfig {
    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        serde_json::from_str(&raw)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))
    }
}

/// `--config`, else the per-user config file if one exists, else defaults.
pub fn resolve_loader_config(cli: &Cli) -> Result<LoaderConfig> {
    if let Some(p) = cli.config.as_deref() {
        return LoaderConfig::from_file(p);
    }
    match default_config_path() {
        Some(p) if p.is_file() => LoaderConfig::from_file(&p),
        _ => Ok(LoaderConfig::default()),
    }
}

pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|base| base.join("runner-index").join("config.json"))
}

pub fn resolve_output_path(root: &Path, output: Option<&Path>, default_name: &str) -> PathBuf {
    match output {
        Some(p) => p.to_path_buf(),
        None => root.join(default_name),
    }
}

/// Writes `bytes` next to `target` and renames it into place.
pub fn publish_file(target: &Path, bytes: &[u8]) -> Result<()> {
    if let Some(parent) = target.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
    }

    let mut tmp_os = target.as_os_str().to_os_string();
    tmp_os.push(".tmp");
    let tmp = PathBuf::from(tmp_os);
    std::fs::write(&tmp, bytes)
        .with_context(|| format!("Failed to write index file: {}", tmp.display()))?;
    std::fs::rename(&tmp, target).with_context(|| {
        format!("Failed to atomically replace index file: {}", target.display())
    })?;
    Ok(())
}
