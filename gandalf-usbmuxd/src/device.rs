/// A device attached to usbmuxd, as reported by an `Attached` event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Device {
    pub serial_number: String,
    pub connection_speed: u64,
    pub connection_type: String,
    pub product_id: i64,
    pub location_id: i64,
    pub device_id: u32,
}
