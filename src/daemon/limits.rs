//! Open file descriptor limit tuning.
//!
//! Every platform connection and every client connection holds a
//! descriptor, so workers try to raise `RLIMIT_NOFILE` before loading
//! listeners. Failure is logged and ignored.

use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FdLimits {
    pub soft: u64,
    pub hard: u64,
}

#[cfg(unix)]
pub fn current_fd_limits() -> std::io::Result<FdLimits> {
    let mut rlim = libc::rlimit {
        rlim_cur: 0,
        rlim_max: 0,
    };
    // SAFETY: `rlim` is a valid, writable rlimit struct.
    let rc = unsafe { libc::getrlimit(libc::RLIMIT_NOFILE, &mut rlim) };
    if rc != 0 {
        return Err(std::io::Error::last_os_error());
    }
    Ok(FdLimits {
        soft: rlim.rlim_cur as u64,
        hard: rlim.rlim_max as u64,
    })
}

#[cfg(unix)]
pub fn set_fd_limits(limits: FdLimits) -> std::io::Result<()> {
    let rlim = libc::rlimit {
        rlim_cur: limits.soft as libc::rlim_t,
        rlim_max: limits.hard as libc::rlim_t,
    };
    // SAFETY: `rlim` is a valid rlimit struct that outlives the call.
    let rc = unsafe { libc::setrlimit(libc::RLIMIT_NOFILE, &rlim) };
    if rc != 0 {
        return Err(std::io::Error::last_os_error());
    }
    Ok(())
}

#[cfg(not(unix))]
pub fn current_fd_limits() -> std::io::Result<FdLimits> {
    Err(std::io::Error::new(
        std::io::ErrorKind::Unsupported,
        "file descriptor limits are not supported on this platform",
    ))
}

#[cfg(not(unix))]
pub fn set_fd_limits(_limits: FdLimits) -> std::io::Result<()> {
    Err(std::io::Error::new(
        std::io::ErrorKind::Unsupported,
        "file descriptor limits are not supported on this platform",
    ))
}

/// Best-effort: set both soft and hard limits to `target`.
///
/// Returns the limits in effect afterwards, or `None` if they could not
/// even be read.
pub fn tune_fd_limit(target: u64) -> Option<FdLimits> {
    let current = match current_fd_limits() {
        Ok(limits) => limits,
        Err(e) => {
            warn!(error = %e, "Unable to read file descriptor limits, skipping");
            return None;
        }
    };
    debug!(soft = current.soft, hard = current.hard, "Current file descriptor limits");

    let wanted = FdLimits {
        soft: target,
        hard: target,
    };
    if let Err(e) = set_fd_limits(wanted) {
        warn!(
            wanted = target,
            error = %e,
            "Unable to set file descriptor limit, resource issues could arise"
        );
        return Some(current);
    }

    match current_fd_limits() {
        Ok(adjusted) => {
            debug!(soft = adjusted.soft, hard = adjusted.hard, "Adjusted file descriptor limits");
            Some(adjusted)
        }
        Err(_) => Some(wanted),
    }
}
