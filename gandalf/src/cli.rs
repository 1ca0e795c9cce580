//! Command-line parsing (C10, §4.10), modeled on the teacher's tool
//! binaries.

use std::net::SocketAddr;
use std::path::PathBuf;

use clap::Parser;

const DEFAULT_USBMUXD_SOCKET: &str = "/var/run/usbmuxd";

#[derive(Parser, Debug)]
#[command(name = "gandalf", about = "Relay TCP connections to usbmuxd-attached iOS devices")]
pub struct Args {
    /// Path to the UDID:LOCAL_PORT[:DEVICE_PORT] mapping file.
    #[arg(long, required_unless_present_any = ["reload", "shutdown", "status"])]
    pub mapping: Option<PathBuf>,

    /// Path to the usbmuxd UNIX domain socket.
    #[arg(long, env = "USBMUXD_SOCKET_ADDRESS", default_value = DEFAULT_USBMUXD_SOCKET)]
    pub usbmuxd_socket: PathBuf,

    /// Seconds of one-directional silence before a tunnel connection is torn down.
    #[arg(long, default_value_t = 60)]
    pub idle_timeout: u64,

    /// Address the status server listens on.
    #[arg(long, default_value = "127.0.0.1:5000")]
    pub status_addr: SocketAddr,

    /// Disable the status server entirely.
    #[arg(long)]
    pub no_status: bool,

    /// Path to the pidfile written at boot / consulted by control modes.
    #[arg(long, default_value = crate::pidfile::DEFAULT_PIDFILE)]
    pub pidfile: PathBuf,

    /// Detach from the controlling terminal and run in the background.
    #[arg(long)]
    pub daemonize: bool,

    /// Maximum consecutive retries for any supervised task (1..20).
    #[arg(long, default_value_t = 5, value_parser = clap::value_parser!(u32).range(1..20))]
    pub max_retries: u32,

    /// Seconds to sleep between retries (0.0, 10.0).
    #[arg(long, default_value_t = 1.0, value_parser = parse_retry_wait)]
    pub retry_wait_secs: f64,

    /// Raise the default log filter from info to debug.
    #[arg(short, long)]
    pub verbose: bool,

    /// Ask the running daemon to reload its mapping and restart tunnels.
    #[arg(long, conflicts_with_all = ["shutdown", "status"])]
    pub reload: bool,

    /// Ask the running daemon to shut down gracefully.
    #[arg(long, conflicts_with_all = ["reload", "status"])]
    pub shutdown: bool,

    /// Print the running daemon's current tunnel status and exit.
    #[arg(long, conflicts_with_all = ["reload", "shutdown"])]
    pub status: bool,
}

fn parse_retry_wait(raw: &str) -> Result<f64, String> {
    let value: f64 = raw
        .parse()
        .map_err(|_| format!("{raw:?} is not a valid number of seconds"))?;
    if value <= 0.0 || value >= 10.0 {
        return Err(format!("retry wait must be within (0.0, 10.0), got {value}"));
    }
    Ok(value)
}

impl Args {
    pub fn is_control_mode(&self) -> bool {
        self.reload || self.shutdown || self.status
    }

    pub fn idle_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.idle_timeout)
    }

    pub fn retry_wait(&self) -> std::time::Duration {
        std::time::Duration::from_secs_f64(self.retry_wait_secs)
    }

    pub fn status_addr(&self) -> Option<SocketAddr> {
        if self.no_status {
            None
        } else {
            Some(self.status_addr)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_minimal_daemon_invocation() {
        let args = Args::parse_from(["gandalf", "--mapping", "/etc/gandalf/mapping"]);
        assert_eq!(args.mapping, Some(PathBuf::from("/etc/gandalf/mapping")));
        assert_eq!(args.idle_timeout, 60);
        assert_eq!(args.max_retries, 5);
        assert!(!args.is_control_mode());
    }

    #[test]
    fn control_mode_does_not_require_mapping() {
        let args = Args::parse_from(["gandalf", "--reload"]);
        assert!(args.is_control_mode());
        assert!(args.mapping.is_none());
    }

    #[test]
    fn reload_and_shutdown_are_mutually_exclusive() {
        let result = Args::try_parse_from(["gandalf", "--reload", "--shutdown"]);
        assert!(result.is_err());
    }

    #[test]
    fn no_status_suppresses_status_addr() {
        let args = Args::parse_from(["gandalf", "--mapping", "m", "--no-status"]);
        assert_eq!(args.status_addr(), None);
    }

    #[test]
    fn retry_wait_secs_rejects_out_of_range_values() {
        assert!(Args::try_parse_from(["gandalf", "--mapping", "m", "--retry-wait-secs", "0"]).is_err());
        assert!(Args::try_parse_from(["gandalf", "--mapping", "m", "--retry-wait-secs", "10"]).is_err());
        assert!(Args::try_parse_from(["gandalf", "--mapping", "m", "--retry-wait-secs", "500"]).is_err());
    }

    #[test]
    fn retry_wait_secs_accepts_in_range_value() {
        let args = Args::parse_from(["gandalf", "--mapping", "m", "--retry-wait-secs", "2.5"]);
        assert_eq!(args.retry_wait_secs, 2.5);
    }
}
