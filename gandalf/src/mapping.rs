//! The `UDID:LOCAL_PORT[:DEVICE_PORT]` mapping file (§4.8, §6).

use std::fmt;
use std::path::Path;

/// Device port assumed when a mapping line omits it.
pub const DEFAULT_DEVICE_PORT: u16 = 22;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MappingEntry {
    pub udid: String,
    pub local_port: u16,
    pub device_port: u16,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Mapping {
    pub entries: Vec<MappingEntry>,
}

impl Mapping {
    /// All entries whose UDID matches `udid`.
    pub fn entries_for_udid<'a>(&'a self, udid: &'a str) -> impl Iterator<Item = &'a MappingEntry> {
        self.entries.iter().filter(move |e| e.udid == udid)
    }
}

#[derive(Debug, Clone)]
pub struct ParseError {
    pub line_number: usize,
    pub line: String,
    pub reason: String,
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "line {}: {:?}: {}",
            self.line_number, self.line, self.reason
        )
    }
}

impl std::error::Error for ParseError {}

/// Parses mapping file contents. Each non-empty, non-`#`-prefixed line is
/// `UDID:LOCAL_PORT` or `UDID:LOCAL_PORT:DEVICE_PORT`. A malformed line is a
/// hard error; the caller decides whether that aborts boot or discards a
/// hot re-read (§4.5, §4.8).
pub fn parse(contents: &str) -> Result<Mapping, ParseError> {
    let mut entries = Vec::new();

    for (idx, raw_line) in contents.lines().enumerate() {
        let line = raw_line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let parts: Vec<&str> = line.split(':').collect();
        if parts.len() != 2 && parts.len() != 3 {
            return Err(ParseError {
                line_number: idx + 1,
                line: raw_line.to_string(),
                reason: "expected UDID:LOCAL_PORT or UDID:LOCAL_PORT:DEVICE_PORT".to_string(),
            });
        }

        let udid = parts[0].to_string();
        if udid.is_empty() {
            return Err(ParseError {
                line_number: idx + 1,
                line: raw_line.to_string(),
                reason: "UDID must not be empty".to_string(),
            });
        }

        let local_port = parse_port(parts[1]).map_err(|reason| ParseError {
            line_number: idx + 1,
            line: raw_line.to_string(),
            reason,
        })?;

        let device_port = if let Some(raw) = parts.get(2) {
            parse_port(raw).map_err(|reason| ParseError {
                line_number: idx + 1,
                line: raw_line.to_string(),
                reason,
            })?
        } else {
            DEFAULT_DEVICE_PORT
        };

        entries.push(MappingEntry {
            udid,
            local_port,
            device_port,
        });
    }

    Ok(Mapping { entries })
}

fn parse_port(raw: &str) -> Result<u16, String> {
    let port: u32 = raw
        .parse()
        .map_err(|_| format!("{raw:?} is not a valid port number"))?;
    if port == 0 || port > 65535 {
        return Err(format!("port {port} out of range 1..65535"));
    }
    Ok(port as u16)
}

/// Reads and parses the mapping file at `path`.
pub async fn load(path: &Path) -> Result<Mapping, ParseError> {
    let contents = tokio::fs::read_to_string(path).await.map_err(|e| ParseError {
        line_number: 0,
        line: String::new(),
        reason: format!("failed to read {}: {e}", path.display()),
    })?;
    parse(&contents)
}
