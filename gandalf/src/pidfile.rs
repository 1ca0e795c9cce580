//! Pidfile handling (§4.6, §6): written on boot, consulted by the control
//! modes (`--reload`, `--shutdown`, `--status`) to find the running daemon.

use std::path::{Path, PathBuf};

use nix::errno::Errno;
use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use tracing::{debug, warn};

use crate::error::FatalError;

pub const DEFAULT_PIDFILE: &str = "/var/run/gandalf.pid";

pub fn default_path() -> PathBuf {
    PathBuf::from(DEFAULT_PIDFILE)
}

/// Writes the current process's PID to `path`, truncating any existing
/// content. An `EACCES`/`EPERM` writing this file is fatal at boot (exit 2).
pub async fn write(path: &Path, pid: u32) -> Result<(), FatalError> {
    tokio::fs::write(path, pid.to_string())
        .await
        .map_err(|e| match e.kind() {
            std::io::ErrorKind::PermissionDenied => FatalError::PidfilePermission {
                path: path.to_path_buf(),
            },
            _ => FatalError::Unhandled(e),
        })
}

pub async fn remove(path: &Path) {
    if let Err(e) = tokio::fs::remove_file(path).await {
        if e.kind() != std::io::ErrorKind::NotFound {
            warn!(path = %path.display(), error = %e, "failed to remove pidfile");
        }
    }
}

/// Reads and parses the pid recorded at `path`.
pub async fn read(path: &Path) -> Result<i32, FatalError> {
    let contents = tokio::fs::read_to_string(path)
        .await
        .map_err(FatalError::Unhandled)?;
    contents
        .trim()
        .parse()
        .map_err(|_| FatalError::MappingParse {
            path: path.to_path_buf(),
            reason: format!("pidfile does not contain a valid pid: {contents:?}"),
        })
}

/// The outcome of delivering a control signal to the pid recorded in the
/// pidfile, mapped onto the control-mode exit codes (§6).
#[derive(Debug, PartialEq, Eq)]
pub enum SignalOutcome {
    Delivered,
    /// `ESRCH`: no such process. The pidfile is stale.
    NoSuchProcess,
    /// `EPERM`: a process exists but we may not signal it.
    PermissionDenied,
}

impl SignalOutcome {
    pub fn exit_code(&self) -> i32 {
        match self {
            SignalOutcome::Delivered => 0,
            SignalOutcome::NoSuchProcess => 5,
            SignalOutcome::PermissionDenied => 3,
        }
    }
}

/// Sends `sig` to the pid recorded at `path`, classifying the three
/// possible outcomes a control-mode invocation can observe (§4.6.2).
pub async fn signal_running_daemon(path: &Path, sig: Signal) -> Result<SignalOutcome, FatalError> {
    let pid = read(path).await?;
    debug!(pid, ?sig, "delivering control signal");

    match signal::kill(Pid::from_raw(pid), sig) {
        Ok(()) => Ok(SignalOutcome::Delivered),
        Err(Errno::ESRCH) => Ok(SignalOutcome::NoSuchProcess),
        Err(Errno::EPERM) => Ok(SignalOutcome::PermissionDenied),
        Err(e) => Err(FatalError::Unhandled(std::io::Error::from(e))),
    }
}
