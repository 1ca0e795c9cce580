//! The live device inventory (§4.5): attach/detach bookkeeping joined
//! against the mapping file to decide which tunnels should be running.

use std::collections::HashMap;
use std::path::PathBuf;

use gandalf_usbmuxd::{Device, MuxSession, Reply};
use tokio::sync::{mpsc, RwLock};
use tracing::{info, warn};

use crate::mapping::{self, Mapping};

/// One tunnel that should be running right now, per the current inventory
/// joined against the mapping (§3, §4.5).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TunnelSpec {
    pub local_port: u16,
    pub device_id: u32,
    pub udid: String,
    pub device_port: u16,
}

pub struct Inventory {
    devices: RwLock<HashMap<u32, Device>>,
    mapping: RwLock<Mapping>,
    mapping_path: PathBuf,
}

impl Inventory {
    pub fn new(mapping_path: PathBuf, initial_mapping: Mapping) -> Self {
        Self {
            devices: RwLock::new(HashMap::new()),
            mapping: RwLock::new(initial_mapping),
            mapping_path,
        }
    }

    /// Applies one `Attached`/`Detached` event and re-reads the mapping
    /// file from disk, so edits take effect without a full reload (§4.5).
    /// Other event variants (`Result`) are ignored here; they never reach
    /// this path in practice since `listen_events` only forwards events
    /// after its own Listen handshake succeeds.
    pub async fn apply_event(&self, event: Reply) {
        match event {
            Reply::Attached(device) => {
                let mut devices = self.devices.write().await;
                devices.entry(device.device_id).or_insert(device);
            }
            Reply::Detached(device_id) => {
                self.devices.write().await.remove(&device_id);
            }
            Reply::Result(_) => {}
        }
        self.reread_mapping().await;
    }

    async fn reread_mapping(&self) {
        match mapping::load(&self.mapping_path).await {
            Ok(new_mapping) => {
                *self.mapping.write().await = new_mapping;
            }
            Err(e) => {
                warn!(
                    path = %self.mapping_path.display(),
                    error = %e,
                    "mapping re-read failed, keeping previous mapping"
                );
            }
        }
    }

    /// Clears every attached device and replaces the mapping. Used at boot
    /// and on reload so the Inventory is rebuilt from scratch rather than
    /// carrying forward attach/detach state from a subscription that is
    /// about to be torn down and replaced (§3: "on reload it is rebuilt
    /// from scratch").
    pub async fn reset(&self, mapping: Mapping) {
        self.devices.write().await.clear();
        *self.mapping.write().await = mapping;
    }

    /// Returns the current joined view: one [`TunnelSpec`] per mapping
    /// entry whose UDID is currently attached. UDIDs in the mapping but
    /// not attached are dropped silently (logged at info).
    pub async fn snapshot(&self) -> Vec<TunnelSpec> {
        let devices = self.devices.read().await;
        let mapping = self.mapping.read().await;

        let mut specs = Vec::new();
        for entry in &mapping.entries {
            let attached = devices.values().find(|d| d.serial_number == entry.udid);
            match attached {
                Some(device) => specs.push(TunnelSpec {
                    local_port: entry.local_port,
                    device_id: device.device_id,
                    udid: entry.udid.clone(),
                    device_port: entry.device_port,
                }),
                None => info!(udid = %entry.udid, "mapped device not currently attached"),
            }
        }
        specs
    }
}

/// Runs a single usbmuxd event subscription, forwarding every event to
/// `tx`. Returns when the socket errors or the subscription's Listen
/// handshake is refused; the caller (the retry wrapper, §4.6.1) decides
/// whether to reconnect.
pub async fn subscribe(
    socket_path: std::path::PathBuf,
    tx: mpsc::UnboundedSender<Reply>,
) -> Result<(), gandalf_usbmuxd::Error> {
    let session = MuxSession::connect(&socket_path).await?;
    session.listen_events(move |event| {
        let _ = tx.send(event);
    })
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mapping::MappingEntry;

    fn device(udid: &str, device_id: u32) -> Device {
        Device {
            serial_number: udid.to_string(),
            connection_speed: 480_000_000,
            connection_type: "USB".to_string(),
            product_id: 4776,
            location_id: 1,
            device_id,
        }
    }

    #[tokio::test]
    async fn snapshot_joins_attached_devices_with_mapping() {
        let mapping = Mapping {
            entries: vec![
                MappingEntry {
                    udid: "UDID_A".into(),
                    local_port: 2222,
                    device_port: 22,
                },
                MappingEntry {
                    udid: "UDID_X".into(),
                    local_port: 2223,
                    device_port: 22,
                },
            ],
        };
        let inventory = Inventory::new(std::path::PathBuf::from("/nonexistent"), mapping);
        inventory.apply_event(Reply::Attached(device("UDID_A", 4))).await;

        // UDID_X has no Attached event; only UDID_A should show up.
        let snapshot = inventory.snapshot().await;
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].udid, "UDID_A");
        assert_eq!(snapshot[0].device_id, 4);
    }

    #[tokio::test]
    async fn detach_removes_device_from_snapshot() {
        let mapping = Mapping {
            entries: vec![MappingEntry {
                udid: "UDID_A".into(),
                local_port: 2222,
                device_port: 22,
            }],
        };
        let inventory = Inventory::new(std::path::PathBuf::from("/nonexistent"), mapping);
        inventory.apply_event(Reply::Attached(device("UDID_A", 4))).await;
        assert_eq!(inventory.snapshot().await.len(), 1);

        inventory.apply_event(Reply::Detached(4)).await;
        assert_eq!(inventory.snapshot().await.len(), 0);
    }

    #[tokio::test]
    async fn reset_clears_attached_devices_and_replaces_mapping() {
        let mapping = Mapping {
            entries: vec![MappingEntry {
                udid: "UDID_A".into(),
                local_port: 2222,
                device_port: 22,
            }],
        };
        let inventory = Inventory::new(std::path::PathBuf::from("/nonexistent"), mapping);
        inventory.apply_event(Reply::Attached(device("UDID_A", 4))).await;
        assert_eq!(inventory.snapshot().await.len(), 1);

        inventory
            .reset(Mapping {
                entries: vec![MappingEntry {
                    udid: "UDID_A".into(),
                    local_port: 3333,
                    device_port: 22,
                }],
            })
            .await;

        // The old Attached event must not survive a reset: nothing is
        // attached until a fresh event arrives, even though the mapping
        // still names the same UDID.
        assert_eq!(inventory.snapshot().await.len(), 0);
    }
}
