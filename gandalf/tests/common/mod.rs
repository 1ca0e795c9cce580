//! A mock usbmuxd: a `UnixListener` on a temp-dir socket, driven by test
//! code using the same frame/message codec the production client speaks
//! (§4.11).

use std::path::PathBuf;

use gandalf_usbmuxd::Device;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::UnixStream;

const HEADER_LEN: usize = 16;

pub struct MockUsbmuxd {
    pub socket_path: PathBuf,
    _dir: tempfile::TempDir,
}

impl MockUsbmuxd {
    pub fn bind() -> (Self, tokio::net::UnixListener) {
        let dir = tempfile::tempdir().unwrap();
        let socket_path = dir.path().join("usbmuxd.sock");
        let listener = tokio::net::UnixListener::bind(&socket_path).unwrap();
        (
            Self {
                socket_path,
                _dir: dir,
            },
            listener,
        )
    }
}

pub async fn read_request(stream: &mut UnixStream) -> plist::Dictionary {
    let mut header = [0u8; HEADER_LEN];
    stream.read_exact(&mut header).await.unwrap();
    let total_length = u32::from_le_bytes(header[0..4].try_into().unwrap()) as usize;
    let mut payload = vec![0u8; total_length - HEADER_LEN];
    stream.read_exact(&mut payload).await.unwrap();
    plist::from_bytes(&payload).unwrap()
}

pub async fn write_reply(stream: &mut UnixStream, dict: plist::Dictionary) {
    let mut payload = Vec::new();
    plist::to_writer_xml(&mut payload, &dict).unwrap();
    let total_length = (HEADER_LEN + payload.len()) as u32;

    let mut header = Vec::with_capacity(HEADER_LEN);
    header.extend_from_slice(&total_length.to_le_bytes());
    header.extend_from_slice(&1u32.to_le_bytes()); // version
    header.extend_from_slice(&8u32.to_le_bytes()); // request
    header.extend_from_slice(&1u32.to_le_bytes()); // tag

    stream.write_all(&header).await.unwrap();
    stream.write_all(&payload).await.unwrap();
}

pub async fn write_result(stream: &mut UnixStream, number: i64) {
    let mut dict = plist::Dictionary::new();
    dict.insert("MessageType".into(), "Result".into());
    dict.insert("Number".into(), number.into());
    write_reply(stream, dict).await;
}

pub async fn write_attached(stream: &mut UnixStream, device: &Device) {
    let mut properties = plist::Dictionary::new();
    properties.insert("SerialNumber".into(), device.serial_number.clone().into());
    properties.insert("ConnectionSpeed".into(), (device.connection_speed as i64).into());
    properties.insert("ConnectionType".into(), device.connection_type.clone().into());
    properties.insert("ProductID".into(), device.product_id.into());
    properties.insert("LocationID".into(), device.location_id.into());
    properties.insert("DeviceID".into(), (device.device_id as i64).into());

    let mut dict = plist::Dictionary::new();
    dict.insert("MessageType".into(), "Attached".into());
    dict.insert("Properties".into(), properties.into());
    write_reply(stream, dict).await;
}

pub fn test_device(udid: &str, device_id: u32) -> Device {
    Device {
        serial_number: udid.to_string(),
        connection_speed: 480_000_000,
        connection_type: "USB".to_string(),
        product_id: 4776,
        location_id: 1,
        device_id,
    }
}
