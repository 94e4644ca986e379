use clap::Parser;
use std::path::PathBuf;

/// Walk directory trees through a three-stage traverse → process → upload pipeline.
#[derive(Clone, Parser)]
#[command(name = "pipewalk")]
#[command(about = "Traverse directories, process each file and hand it to an upload stage.")]
pub struct Cli {
    /// Root directories to traverse. Default: roots from the config file, else current directory.
    #[arg(value_name = "ROOTS")]
    pub roots: Vec<PathBuf>,

    /// Config file. Default: `.pipewalk.toml` in the current directory, if present.
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Worker threads for the traverse stage.
    #[arg(long, value_parser = clap::value_parser!(usize))]
    pub traverse_workers: Option<usize>,

    /// Worker threads for the process stage.
    #[arg(long, value_parser = clap::value_parser!(usize))]
    pub process_workers: Option<usize>,

    /// Worker threads for the upload stage.
    #[arg(long, value_parser = clap::value_parser!(usize))]
    pub upload_workers: Option<usize>,

    /// Queue capacity for every stage.
    #[arg(long, short = 'q', value_parser = clap::value_parser!(usize))]
    pub queue_capacity: Option<usize>,

    /// How long an idle worker waits for an item before re-checking (milliseconds).
    #[arg(long, value_parser = clap::value_parser!(u64))]
    pub take_timeout_ms: Option<u64>,

    /// Grace window before a quiet stage is declared complete (milliseconds).
    #[arg(long, value_parser = clap::value_parser!(u64))]
    pub grace_ms: Option<u64>,

    /// Exclude patterns (glob syntax). Can specify multiple: -e pattern1 pattern2 pattern3
    #[arg(long, short = 'e', num_args = 1..)]
    pub exclude: Vec<String>,

    /// Follow symbolic links.
    #[arg(long, short = 'f', num_args = 0..=1, default_missing_value = "true", value_parser = clap::value_parser!(bool))]
    pub follow_links: Option<bool>,

    /// Compute blake3 hash for files in the process stage.
    #[arg(long, short = 'c', num_args = 0..=1, default_missing_value = "true", value_parser = clap::value_parser!(bool))]
    pub hash: Option<bool>,

    /// Write one JSON line per uploaded file to this path.
    #[arg(long, short = 'o')]
    pub manifest: Option<PathBuf>,

    /// Show per-stage progress bars.
    #[arg(long, short = 'p', num_args = 0..=1, default_missing_value = "true", value_parser = clap::value_parser!(bool))]
    pub progress: Option<bool>,

    /// Verbose output.
    #[arg(long, short = 'v', num_args = 0..=1, default_missing_value = "true", value_parser = clap::value_parser!(bool))]
    pub verbose: Option<bool>,

    /// Strict mode: fail the run if any path was skipped or any item failed.
    #[arg(long, num_args = 0..=1, default_missing_value = "true", value_parser = clap::value_parser!(bool))]
    pub strict: Option<bool>,
}
