use thiserror::Error;

/// Errors that can terminate the daemon outright. Per-connection and
/// per-device errors never reach this type; they are logged and contained
/// at their own boundary (§7).
#[derive(Error, Debug)]
pub enum FatalError {
    #[error("failed to bind {addr}: address already in use")]
    AddressInUse { addr: std::net::SocketAddr },

    #[error("pidfile {path}: permission denied")]
    PidfilePermission { path: std::path::PathBuf },

    #[error("signal delivery denied")]
    SignalPermission,

    #[error("mapping file {path} could not be parsed: {reason}")]
    MappingParse {
        path: std::path::PathBuf,
        reason: String,
    },

    #[error("unhandled error: {0}")]
    Unhandled(#[from] std::io::Error),
}

impl FatalError {
    /// Maps a fatal error onto the process exit code it dictates (§6).
    pub fn exit_code(&self) -> i32 {
        match self {
            FatalError::PidfilePermission { .. } => 2,
            FatalError::SignalPermission => 3,
            FatalError::Unhandled(_) => 4,
            FatalError::AddressInUse { .. } => 6,
            FatalError::MappingParse { .. } => 4,
        }
    }
}
