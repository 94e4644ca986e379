//! File descriptor limit detection for capping traverse workers (Unix).

use log::debug;

/// Directory handles a traverse worker may hold open at once, with headroom for the rest.
pub const FDS_PER_WORKER: usize = 10;

/// Fraction of the process FD limit the traverse stage may use.
const FD_LIMIT_FRACTION: f64 = 0.8;

/// Soft limit for open file descriptors, or `None` if unavailable or unlimited.
#[cfg(unix)]
pub fn max_open_fds() -> Option<u64> {
    use std::mem::MaybeUninit;
    let mut rlim = MaybeUninit::<libc::rlimit>::uninit();
    if unsafe { libc::getrlimit(libc::RLIMIT_NOFILE, rlim.as_mut_ptr()) } != 0 {
        return None;
    }
    let soft = unsafe { rlim.assume_init() }.rlim_cur;
    if soft == libc::RLIM_INFINITY || soft > i64::MAX as u64 {
        return None;
    }
    Some(soft)
}

#[cfg(not(unix))]
pub fn max_open_fds() -> Option<u64> {
    None
}

/// Cap a requested worker count so the workers stay under the usable share of the FD limit.
pub fn cap_by_fd_limit(requested: usize) -> usize {
    let Some(limit) = max_open_fds() else {
        return requested;
    };
    let usable = (limit as f64 * FD_LIMIT_FRACTION) as usize;
    let cap = (usable / FDS_PER_WORKER).max(1);
    if cap < requested {
        debug!("Capping workers {requested} -> {cap} (FD limit {limit})");
        cap
    } else {
        requested
    }
}
