//! Listen/Connect request payloads and Result/Attached/Detached reply
//! parsing, all carried as XML-plist dictionaries (§4.2).

use crate::device::Device;
use crate::error::Error;

const CLIENT_VERSION_STRING: &str = "gandalf-usbmuxd";
const PROG_NAME: &str = "gandalf";

/// Swaps the low and high byte of a 16-bit port number. usbmuxd expects
/// `PortNumber` in network byte order even though the surrounding plist
/// dictionary carries it as a little-endian integer field; reproduce the
/// quirk exactly rather than "fixing" it.
pub fn swap_port(port: u16) -> u16 {
    ((port & 0xFF) << 8) | ((port >> 8) & 0xFF)
}

/// One of the two requests this relay ever sends to usbmuxd.
#[derive(Debug, Clone)]
pub enum Request {
    Listen,
    Connect { device_id: u32, device_port: u16 },
}

impl Request {
    fn to_dictionary(&self) -> plist::Dictionary {
        let mut dict = plist::Dictionary::new();
        dict.insert(
            "ClientVersionString".into(),
            CLIENT_VERSION_STRING.into(),
        );
        dict.insert("ProgName".into(), PROG_NAME.into());
        match self {
            Request::Listen => {
                dict.insert("MessageType".into(), "Listen".into());
            }
            Request::Connect {
                device_id,
                device_port,
            } => {
                dict.insert("MessageType".into(), "Connect".into());
                dict.insert("DeviceID".into(), (*device_id as i64).into());
                dict.insert(
                    "PortNumber".into(),
                    (swap_port(*device_port) as i64).into(),
                );
            }
        }
        dict
    }

    /// Serializes this request to an XML-plist byte payload (sans header).
    pub fn encode(&self) -> Result<Vec<u8>, Error> {
        let dict = self.to_dictionary();
        let mut buf = Vec::new();
        plist::to_writer_xml(&mut buf, &dict)?;
        Ok(buf)
    }
}

/// The four closed `Result` outcomes usbmuxd ever sends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResultCode {
    Success,
    DeviceRequestedNotConnected,
    PortRequestedNotAvailable,
    MalformedRequest,
}

impl ResultCode {
    fn from_number(n: i64) -> Result<Self, Error> {
        match n {
            0 => Ok(ResultCode::Success),
            2 => Ok(ResultCode::DeviceRequestedNotConnected),
            3 => Ok(ResultCode::PortRequestedNotAvailable),
            5 => Ok(ResultCode::MalformedRequest),
            other => Err(Error::UnknownResultCode(other)),
        }
    }
}

/// A parsed reply or event read off the usbmuxd socket.
#[derive(Debug, Clone)]
pub enum Reply {
    Result(ResultCode),
    Attached(Device),
    Detached(u32),
}

fn get_int(dict: &plist::Dictionary, key: &'static str) -> Result<i64, Error> {
    dict.get(key)
        .and_then(|v| v.as_signed_integer())
        .ok_or(Error::MissingField(key))
}

fn get_str(dict: &plist::Dictionary, key: &'static str) -> Result<String, Error> {
    dict.get(key)
        .and_then(|v| v.as_string())
        .map(str::to_owned)
        .ok_or(Error::MissingField(key))
}

fn parse_device(properties: &plist::Dictionary) -> Result<Device, Error> {
    Ok(Device {
        serial_number: get_str(properties, "SerialNumber")?,
        connection_speed: get_int(properties, "ConnectionSpeed")? as u64,
        connection_type: get_str(properties, "ConnectionType")?,
        product_id: get_int(properties, "ProductID")?,
        location_id: get_int(properties, "LocationID")?,
        device_id: get_int(properties, "DeviceID")? as u32,
    })
}

/// Decodes one usbmuxd reply payload.
pub fn decode(payload: &[u8]) -> Result<Reply, Error> {
    let dict: plist::Dictionary = plist::from_bytes(payload)?;
    let message_type = get_str(&dict, "MessageType")?;

    match message_type.as_str() {
        "Result" => {
            let number = get_int(&dict, "Number")?;
            Ok(Reply::Result(ResultCode::from_number(number)?))
        }
        "Attached" => {
            let properties = dict
                .get("Properties")
                .and_then(|v| v.as_dictionary())
                .ok_or(Error::MissingField("Properties"))?;
            Ok(Reply::Attached(parse_device(properties)?))
        }
        "Detached" => {
            let device_id = get_int(&dict, "DeviceID")?;
            Ok(Reply::Detached(device_id as u32))
        }
        other => Err(Error::UnknownReply(other.to_string())),
    }
}
