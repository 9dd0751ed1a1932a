use clap::{ArgAction, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

#[derive(Debug, Clone, Parser)]
#[command(name = "jar-viewer")]
#[command(about = "Browse Java archives and view decompiled classes or text resources")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    #[arg(long, global = true, value_name = "FILE")]
    pub cfr: Option<PathBuf>,

    #[arg(long, global = true, value_name = "FILE")]
    pub db: Option<PathBuf>,

    /// Do not read or write the persistent source cache.
    #[arg(long, global = true)]
    pub no_cache: bool,

    #[arg(long, global = true, value_name = "BYTES")]
    pub max_archive_size: Option<u64>,

    #[arg(long, global = true, value_name = "BYTES")]
    pub max_entry_size: Option<u64>,

    /// Keep CFR's explanatory comments in decompiled output.
    #[arg(long, global = true)]
    pub comments: bool,

    /// Drop the "Decompiled with CFR" header.
    #[arg(long, global = true)]
    pub hide_version: bool,

    /// Extra CFR option passed through as `--KEY VALUE`.
    #[arg(long, global = true, value_name = "KEY=VALUE")]
    pub cfr_option: Vec<String>,

    #[arg(short = 'v', long, global = true, action = ArgAction::Count)]
    pub verbose: u8,

    #[arg(short = 'q', long, global = true)]
    pub quiet: bool,
}

#[derive(Debug, Clone, Subcommand)]
pub enum Commands {
    /// Print the entry tree of an archive.
    Tree {
        archive: PathBuf,

        #[arg(short = 'f', long, value_enum, default_value_t = OutputFormat::Text)]
        format: OutputFormat,
    },
    /// Print the ordered entry list as JSON.
    Entries { archive: PathBuf },
    /// Open entries (archive-relative paths) as tabs and print them.
    Open {
        archive: PathBuf,

        #[arg(value_name = "ENTRY")]
        entries: Vec<String>,

        #[arg(short = 'f', long, value_enum, default_value_t = OutputFormat::Json)]
        format: OutputFormat,

        #[arg(short = 'o', long, value_name = "FILE")]
        output: Option<PathBuf>,
    },
    /// Interactive browsing loop on stdin.
    Browse { archive: PathBuf },
    Stats,
    Clear,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Json,
    Text,
    Code,
}
