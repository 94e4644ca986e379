//! Engine module: CLI, hashing, progress display and path tools

pub mod arg_parser;
pub mod cli;
pub mod hashing;
pub mod progress;
pub mod tools;

// Re-export commonly used functions
pub use arg_parser::Cli;
pub use cli::handle_run;
pub use hashing::{hash_file, hash_to_hex};
pub use progress::ProgressMonitor;
pub use tools::{glob_match, should_include_in_walk};
