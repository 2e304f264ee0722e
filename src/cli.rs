use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

#[derive(Debug, Clone, Parser)]
#[command(name = "runner-index")]
#[command(about = "Build and query the start-up classpath index of a packaged Java application")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Loader configuration (JSON).
    #[arg(long, value_name = "FILE", global = true)]
    pub config: Option<PathBuf>,
}

#[derive(Debug, Clone, Args)]
pub struct BuildArgs {
    /// Application root; archive paths are stored relative to it.
    #[arg(long, value_name = "DIR")]
    pub root: PathBuf,

    #[arg(long = "main", value_name = "CLASS")]
    pub main_class: String,

    #[arg(long = "parent-first", value_name = "JAR")]
    pub parent_first: Vec<PathBuf>,

    #[arg(short = 'o', long, value_name = "FILE")]
    pub output: Option<PathBuf>,

    /// Classpath archives or directories, in classpath order.
    #[arg(value_name = "ARCHIVE", required = true)]
    pub archives: Vec<PathBuf>,
}

#[derive(Debug, Clone, Subcommand)]
pub enum Commands {
    Build(BuildArgs),
    BuildAot(BuildArgs),
    Inspect {
        index: PathBuf,

        #[arg(long, value_name = "DIR")]
        root: Option<PathBuf>,
    },
    Resolve {
        index: PathBuf,

        #[arg(long, value_name = "DIR")]
        root: Option<PathBuf>,

        /// Class to load. Without `--class` or `--resource` the main class is
        /// loaded.
        #[arg(long, value_name = "NAME", conflicts_with = "resource")]
        class: Option<String>,

        #[arg(long, value_name = "NAME")]
        resource: Option<String>,
    },
}
