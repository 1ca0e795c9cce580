//! Double-fork daemonization (§4.6 step 5): detaches the process from its
//! controlling terminal before the pidfile is written.

use std::os::fd::AsRawFd;

use nix::unistd::{self, ForkResult};
use tracing::warn;

use crate::error::FatalError;

/// Forks twice and calls `setsid` in between so the final process has no
/// controlling terminal, then redirects stdio to `/dev/null`. Must be
/// called before the tokio runtime is started, since `fork` in a
/// multi-threaded process only leaves the calling thread alive in the
/// child.
pub fn daemonize() -> Result<(), FatalError> {
    // SAFETY: fork() is called before the async runtime and any additional
    // threads exist, so only the calling thread survives into the child.
    match unsafe { unistd::fork() }.map_err(|e| FatalError::Unhandled(std::io::Error::from(e)))? {
        ForkResult::Parent { .. } => std::process::exit(0),
        ForkResult::Child => {}
    }

    unistd::setsid().map_err(|e| FatalError::Unhandled(std::io::Error::from(e)))?;

    // SAFETY: same single-threaded precondition as above.
    match unsafe { unistd::fork() }.map_err(|e| FatalError::Unhandled(std::io::Error::from(e)))? {
        ForkResult::Parent { .. } => std::process::exit(0),
        ForkResult::Child => {}
    }

    redirect_stdio_to_dev_null()
}

fn redirect_stdio_to_dev_null() -> Result<(), FatalError> {
    let dev_null = std::fs::OpenOptions::new()
        .read(true)
        .write(true)
        .open("/dev/null")
        .map_err(FatalError::Unhandled)?;
    let fd = dev_null.as_raw_fd();

    for target in [
        std::io::stdin().as_raw_fd(),
        std::io::stdout().as_raw_fd(),
        std::io::stderr().as_raw_fd(),
    ] {
        if let Err(e) = unistd::dup2(fd, target) {
            warn!(error = %e, "failed to redirect stdio to /dev/null");
        }
    }
    Ok(())
}
