//! Logging setup (C9, §4.9): `tracing` with an `EnvFilter` honoring
//! `RUST_LOG`, raised to `debug` by `--verbose` when the user hasn't set
//! `RUST_LOG` themselves.
//!
//! When daemonized, stdio is redirected to `/dev/null` (§4.6 step 5), so a
//! subscriber writing to stdout would be discarded silently. The daemon
//! case writes to the system log instead, matching "redirect stdio to the
//! system log."

use std::io;
use std::sync::Mutex;

use syslog::{Facility, Formatter3164, Logger, LoggerBackend};
use tracing_subscriber::fmt::MakeWriter;

use crate::error::FatalError;

struct SyslogWriter {
    logger: Mutex<Logger<LoggerBackend, Formatter3164>>,
}

impl io::Write for &SyslogWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let line = String::from_utf8_lossy(buf);
        self.logger
            .lock()
            .unwrap()
            .info(line.trim_end())
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e.to_string()))?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl<'a> MakeWriter<'a> for SyslogWriter {
    type Writer = &'a SyslogWriter;

    fn make_writer(&'a self) -> Self::Writer {
        self
    }
}

fn env_filter(verbose: bool) -> tracing_subscriber::EnvFilter {
    let default_level = if verbose { "debug" } else { "info" };
    tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(format!("gandalf={default_level}")))
}

/// Initializes the global subscriber. `daemonized` selects the writer:
/// stdout in the foreground, syslog once stdio has been redirected to
/// `/dev/null` so log output isn't lost.
pub fn init(verbose: bool, daemonized: bool) -> Result<(), FatalError> {
    let filter = env_filter(verbose);

    if daemonized {
        let formatter = Formatter3164 {
            facility: Facility::LOG_DAEMON,
            hostname: None,
            process: "gandalf".into(),
            pid: std::process::id() as i32,
        };
        let logger = syslog::unix(formatter)
            .map_err(|e| FatalError::Unhandled(io::Error::new(io::ErrorKind::Other, e.to_string())))?;

        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(true)
            .with_writer(SyslogWriter {
                logger: Mutex::new(logger),
            })
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(true)
            .init();
    }

    Ok(())
}
