//! Path and filter utilities

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

/// Check if a file should be excluded based on OS-specific hidden files
pub fn is_os_hidden_file(path: &Path) -> bool {
    let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
        return false;
    };
    match name {
        // macOS
        ".DS_Store" | ".AppleDouble" | ".LSOverride" => true,
        // Windows
        "Thumbs.db" | "ehthumbs.db" | "Desktop.ini" | "$RECYCLE.BIN" => true,
        // Linux
        ".directory" => true,
        // macOS resource forks, Linux trash dirs
        _ => name.starts_with("._") || name.starts_with(".Trash-"),
    }
}

/// Returns true if the traverse stage should pass `path` on (not hidden, not excluded).
/// Patterns are matched against both the file name and the full path.
pub fn should_include_in_walk(path: &Path, exclude_patterns: &[String]) -> bool {
    if is_os_hidden_file(path) {
        return false;
    }
    if exclude_patterns.is_empty() {
        return true;
    }
    let name = match path.file_name().and_then(|n| n.to_str()) {
        Some(n) => n,
        None => return true,
    };
    let path_str = path.to_str().unwrap_or("");
    !exclude_patterns
        .iter()
        .any(|pattern| glob_match(pattern, name) || glob_match(pattern, path_str))
}

/// Simple glob pattern matching (supports * and ?)
pub fn glob_match(pattern: &str, text: &str) -> bool {
    // Leading '!' is tolerated and ignored
    let pattern = pattern.strip_prefix('!').unwrap_or(pattern);
    let pattern: Vec<char> = pattern.chars().collect();
    let text: Vec<char> = text.chars().collect();
    glob_match_chars(&pattern, &text)
}

fn glob_match_chars(pattern: &[char], text: &[char]) -> bool {
    match pattern.split_first() {
        None => text.is_empty(),
        Some(('*', rest)) => {
            if rest.is_empty() {
                return true; // trailing * matches everything
            }
            (0..=text.len()).any(|skip| glob_match_chars(rest, &text[skip..]))
        }
        Some(('?', rest)) => !text.is_empty() && glob_match_chars(rest, &text[1..]),
        Some((c, rest)) => text.first() == Some(c) && glob_match_chars(rest, &text[1..]),
    }
}

/// Canonicalize a root directory and make sure it can be listed.
pub fn canonicalize_root(path: &Path) -> Result<PathBuf> {
    let root = path
        .canonicalize()
        .with_context(|| format!("canonicalize root {}", path.display()))?;
    if !root.is_dir() {
        anyhow::bail!("root is not a directory: {}", root.display());
    }
    Ok(root)
}

/// Modification time in nanoseconds since epoch, 0 when unavailable.
pub fn mtime_ns(meta: &std::fs::Metadata) -> i64 {
    meta.modified()
        .ok()
        .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
        .map(|d| d.as_nanos() as i64)
        .unwrap_or(0)
}
