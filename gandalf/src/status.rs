//! The status server (§4.7): a loopback TCP listener that answers every
//! connection with one JSON line describing the current tunnel set, then
//! closes.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;

use serde::Serialize;
use tokio::io::{self, AsyncWriteExt};
use tokio::net::TcpListener;
use tracing::{debug, error, warn};

use crate::inventory::Inventory;

pub const DEFAULT_STATUS_PORT: u16 = 5000;

#[derive(Debug, Serialize)]
struct StatusEntry {
    #[serde(rename = "Port")]
    port: u16,
    #[serde(rename = "DeviceID")]
    device_id: u32,
    #[serde(rename = "UDID")]
    udid: String,
}

/// Runs forever, serving one status line per accepted connection. Intended
/// to be spawned as its own task and aborted on shutdown, the same way the
/// tunnels are (§4.6.2).
pub async fn run(addr: SocketAddr, inventory: Arc<Inventory>) -> io::Result<()> {
    let listener = TcpListener::bind(addr).await?;
    debug!(%addr, "status server listening");

    loop {
        let (mut stream, peer) = listener.accept().await?;
        let inventory = Arc::clone(&inventory);
        tokio::spawn(async move {
            if let Err(e) = respond(&mut stream, &inventory).await {
                warn!(%peer, error = %e, "status response failed");
            }
        });
    }
}

async fn respond(stream: &mut tokio::net::TcpStream, inventory: &Inventory) -> io::Result<()> {
    let entries: Vec<StatusEntry> = inventory
        .snapshot()
        .await
        .into_iter()
        .map(|spec| StatusEntry {
            port: spec.local_port,
            device_id: spec.device_id,
            udid: spec.udid,
        })
        .collect();

    let mut line = serde_json::to_string(&entries).map_err(|e| {
        error!(error = %e, "failed to serialize status entries");
        io::Error::new(io::ErrorKind::Other, e)
    })?;
    line.push('\n');

    stream.write_all(line.as_bytes()).await?;
    stream.shutdown().await
}

pub fn default_addr() -> SocketAddr {
    SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), DEFAULT_STATUS_PORT)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mapping::{Mapping, MappingEntry};
    use gandalf_usbmuxd::{Device, Reply};
    use tokio::io::AsyncReadExt;
    use tokio::net::TcpStream;

    #[tokio::test]
    async fn responds_with_json_line_of_active_tunnels() {
        let mapping = Mapping {
            entries: vec![MappingEntry {
                udid: "UDID_A".into(),
                local_port: 2222,
                device_port: 22,
            }],
        };
        let inventory = Arc::new(Inventory::new(
            std::path::PathBuf::from("/nonexistent"),
            mapping,
        ));
        inventory
            .apply_event(Reply::Attached(Device {
                serial_number: "UDID_A".into(),
                connection_speed: 480_000_000,
                connection_type: "USB".into(),
                product_id: 4776,
                location_id: 1,
                device_id: 7,
            }))
            .await;

        let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).await.unwrap();
        let addr = listener.local_addr().unwrap();
        let inventory_clone = Arc::clone(&inventory);
        tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            respond(&mut stream, &inventory_clone).await.unwrap();
        });

        let mut client = TcpStream::connect(addr).await.unwrap();
        let mut buf = String::new();
        client.read_to_string(&mut buf).await.unwrap();

        let parsed: serde_json::Value = serde_json::from_str(buf.trim_end()).unwrap();
        assert_eq!(parsed[0]["Port"], 2222);
        assert_eq!(parsed[0]["DeviceID"], 7);
        assert_eq!(parsed[0]["UDID"], "UDID_A");
    }

    #[tokio::test]
    async fn responds_with_empty_array_when_nothing_attached() {
        let inventory = Arc::new(Inventory::new(
            std::path::PathBuf::from("/nonexistent"),
            Mapping::default(),
        ));

        let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            respond(&mut stream, &inventory).await.unwrap();
        });

        let mut client = TcpStream::connect(addr).await.unwrap();
        let mut buf = String::new();
        client.read_to_string(&mut buf).await.unwrap();
        assert_eq!(buf.trim_end(), "[]");
    }
}
