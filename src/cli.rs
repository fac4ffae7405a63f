use clap::{Parser as ClapParser, Subcommand};
use std::path::PathBuf;

#[derive(ClapParser, Debug)]
#[command(
    author,
    version,
    about = "Declaration index for Kotlin and Java workspaces",
    long_about = None
)]
pub struct Args {
    /// Log level (trace, debug, info, warn, error); RUST_LOG takes precedence
    #[arg(short, long, global = true, default_value = "info")]
    pub log_level: String,

    /// Print results as JSON
    #[arg(long, global = true)]
    pub json: bool,

    /// Directory holding the index caches (defaults to the platform cache dir)
    #[arg(long = "cache-dir", global = true)]
    pub cache_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Scan and index a workspace in the foreground
    Index {
        /// Workspace root
        workspace: PathBuf,

        /// Source roots (Kotlin/Java sources); defaults to the workspace root
        #[arg(short, long = "source")]
        sources: Vec<PathBuf>,

        /// Library roots (jars, class files, dependency sources)
        #[arg(short = 'L', long = "library")]
        libraries: Vec<PathBuf>,

        /// Number of index workers
        #[arg(short, long)]
        workers: Option<usize>,
    },

    /// Declarations whose name starts with a prefix
    Search {
        workspace: PathBuf,
        prefix: String,
    },

    /// Completion candidates for a prefix (top-level, visible declarations)
    Complete {
        workspace: PathBuf,
        prefix: String,
    },

    /// Direct subpackages of a package (root packages when omitted)
    Packages {
        workspace: PathBuf,
        #[arg(default_value = "")]
        base: String,
    },

    /// Files indexed under a package
    Files {
        workspace: PathBuf,
        package: String,
    },

    /// Source files discovered for a package
    Sources {
        workspace: PathBuf,
        package: String,
    },

    /// Counts of files, packages, declarations and sources
    Stats { workspace: PathBuf },

    /// Delete the index of a workspace
    Clear { workspace: PathBuf },
}
