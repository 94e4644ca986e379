use colored::Colorize;
use env_logger::Builder;
use log::Level;
use std::io::Write;

/// Install the global logger. Our crate logs at Info (Debug with `verbose`); dependencies only
/// at Warn. `RUST_LOG` still applies on top.
///
/// Safe to call again once the config file is loaded: the logger is only installed once, later
/// calls just move the max level.
pub fn setup_logging(verbose: bool) {
    use log::LevelFilter;

    let level = if verbose {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    };

    let _ = Builder::from_default_env()
        .filter_level(LevelFilter::Warn)
        .filter_module(env!("CARGO_PKG_NAME"), LevelFilter::Debug)
        .format(|buf, record| {
            let name = env!("CARGO_PKG_NAME");
            let line = match record.level() {
                Level::Error | Level::Warn => {
                    let level_str = match record.level() {
                        Level::Warn => "WARN".yellow(),
                        _ => "ERROR".red(),
                    };
                    let target = record.target().to_string().white();
                    format!("[{} {} {}] {}", name.cyan(), level_str, target, record.args())
                }
                Level::Debug | Level::Trace => {
                    // Worker threads are named `<stage>-<id>`; show which one logged.
                    let thread = std::thread::current();
                    let thread = thread.name().unwrap_or("main").dimmed();
                    format!("[{} {}] {}", name.cyan(), thread, record.args())
                }
                Level::Info => format!("[{}] {}", name.cyan(), record.args()),
            };
            writeln!(buf, "{}", line)
        })
        .try_init();

    if std::env::var_os("RUST_LOG").is_none() {
        log::set_max_level(level);
    }
}
