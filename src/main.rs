use anyhow::{Context, Result};
use clap::Parser;
use runner_index::aot::AotIndex;
use runner_index::cli::{BuildArgs, Cli, Commands};
use runner_index::config::{
    DEFAULT_AOT_INDEX_FILE, DEFAULT_INDEX_FILE, publish_file, resolve_loader_config,
    resolve_output_path,
};
use runner_index::format::{self, SerializedApplication};
use runner_index::loader::{
    DefinedClass, HeaderDefiner, LoaderContext, PlatformParent, RunnerClassLoader,
};
use runner_index::manifest::ManifestInfo;
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tracing_subscriber::EnvFilter;

fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();

    match cli.command.clone() {
        Commands::Build(args) => {
            let report = build(&args)?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Commands::BuildAot(args) => {
            let report = build_aot(&args)?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Commands::Inspect { index, root } => {
            let report = inspect(&index, root.as_deref())?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Commands::Resolve {
            index,
            root,
            class,
            resource,
        } => {
            let config = resolve_loader_config(&cli)?;
            let root = app_root(&index, root.as_deref());
            let loader = RunnerClassLoader::from_index_file(
                &index,
                &root,
                LoaderContext::new(config.clone()),
                Arc::new(PlatformParent::new(config.platform_prefixes.clone())),
                Arc::new(HeaderDefiner),
            )
            .with_context(|| format!("Failed to load index: {}", index.display()))?;

            let output = match (class, resource) {
                (Some(class), _) => {
                    let defined = loader
                        .load_class(&class)
                        .with_context(|| format!("Failed to load class: {class}"))?;
                    ResolveOutput::Class {
                        class: DefinedClass::clone(&defined),
                    }
                }
                (None, Some(resource)) => {
                    let lookup = || format!("Failed to look up resource: {resource}");
                    let first = loader.get_resource(&resource).with_context(lookup)?;
                    let urls = loader.get_resources(&resource).with_context(lookup)?;
                    ResolveOutput::Resource {
                        first: first.map(|u| u.to_string()),
                        urls: urls.iter().map(ToString::to_string).collect(),
                        name: resource,
                    }
                }
                (None, None) => {
                    let defined = loader.load_main_class().with_context(|| {
                        format!("Failed to load main class: {}", loader.main_class())
                    })?;
                    ResolveOutput::Class {
                        class: DefinedClass::clone(&defined),
                    }
                }
            };
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
    }

    Ok(())
}

fn init_tracing() {
    let filter = EnvFilter::try_from_env("RUNNER_INDEX_LOG").unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn app_root(index: &Path, root: Option<&Path>) -> PathBuf {
    match root {
        Some(r) => r.to_path_buf(),
        None => index
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from(".")),
    }
}

fn hash_bytes(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

#[derive(Debug, Serialize)]
struct BuildReport {
    output: String,
    main_class: String,
    archives: usize,
    bytes: usize,
    sha256: String,
    elapsed_ms: u64,
}

fn build(args: &BuildArgs) -> Result<BuildReport> {
    let start = Instant::now();
    let mut bytes = Vec::new();
    let index = format::write(
        &mut bytes,
        &args.root,
        &args.archives,
        &args.main_class,
        &args.parent_first,
    )
    .context("Failed to build classpath index")?;

    let output = resolve_output_path(&args.root, args.output.as_deref(), DEFAULT_INDEX_FILE);
    publish_file(&output, &bytes)?;
    Ok(BuildReport {
        output: output.display().to_string(),
        main_class: index.main_class,
        archives: index.archives.len(),
        bytes: bytes.len(),
        sha256: hash_bytes(&bytes),
        elapsed_ms: start.elapsed().as_millis() as u64,
    })
}

fn build_aot(args: &BuildArgs) -> Result<BuildReport> {
    let start = Instant::now();
    let index = AotIndex::build(&args.archives, &args.main_class)
        .context("Failed to build ahead-of-time index")?;
    let mut bytes = Vec::new();
    index.write(&mut bytes)?;

    let output = resolve_output_path(&args.root, args.output.as_deref(), DEFAULT_AOT_INDEX_FILE);
    publish_file(&output, &bytes)?;
    Ok(BuildReport {
        output: output.display().to_string(),
        main_class: index.main_class,
        archives: args.archives.len(),
        bytes: bytes.len(),
        sha256: hash_bytes(&bytes),
        elapsed_ms: start.elapsed().as_millis() as u64,
    })
}

#[derive(Debug, Serialize)]
struct ArchiveSummary {
    path: String,
    generated_bytecode: bool,
    transformed_bytecode: bool,
    directories: usize,
    entries: Option<usize>,
    manifest: Option<ManifestInfo>,
}

#[derive(Debug, Serialize)]
struct InspectReport {
    main_class: String,
    sha256: String,
    archives: Vec<ArchiveSummary>,
    parent_first_packages: Vec<String>,
    directly_indexed: usize,
}

fn inspect(index: &Path, root: Option<&Path>) -> Result<InspectReport> {
    let bytes = std::fs::read(index)
        .with_context(|| format!("Failed to read index file: {}", index.display()))?;
    let root = app_root(index, root);
    let app: SerializedApplication = format::read(&mut bytes.as_slice(), &root)
        .with_context(|| format!("Failed to parse index file: {}", index.display()))?;

    let mut parent_first_packages = app.parent_first_packages;
    parent_first_packages.sort();
    Ok(InspectReport {
        main_class: app.main_class,
        sha256: hash_bytes(&bytes),
        archives: app
            .archives
            .into_iter()
            .map(|a| ArchiveSummary {
                path: a.path.display().to_string(),
                generated_bytecode: a.generated_bytecode,
                transformed_bytecode: a.transformed_bytecode,
                directories: a.directories.len(),
                entries: a.entries.as_ref().map(Vec::len),
                manifest: a.manifest,
            })
            .collect(),
        parent_first_packages,
        directly_indexed: app.directly_indexed.len(),
    })
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
enum ResolveOutput {
    Class { class: DefinedClass },
    Resource {
        name: String,
        first: Option<String>,
        urls: Vec<String>,
    },
}
