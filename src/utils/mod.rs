pub mod config;
pub mod fd_limit;
pub mod logger;
pub mod pipewalk_toml;

pub use config::*;
pub use fd_limit::{FDS_PER_WORKER, cap_by_fd_limit, max_open_fds};
pub use logger::setup_logging;
