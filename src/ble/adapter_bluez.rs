/// System-bus BLE adapter: scans via BlueZ's `org.bluez.Adapter1` and reads
/// advertisements off `PropertiesChanged` signals on `Device1` objects,
/// using the blocking `dbus` API in a dedicated thread.
use std::time::Duration;

use dbus::arg::RefArg;
use dbus::blocking::{BlockingSender, Connection};
use dbus::Message;

use super::{AdvertRecord, BleAdapter};
use crate::error::Error;

const BLUEZ_SERVICE: &str = "org.bluez";
const ADAPTER_PATH: &str = "/org/bluez/hci0";
const DEV_PATH_PREFIX: &str = "/org/bluez/hci0/dev_";
const MAX_AD_DATA: usize = crate::proto::MAX_ADV_DATA;

pub struct BluezAdapter {
    conn: Option<Connection>,
    started: bool,
}

impl BluezAdapter {
    pub fn new() -> Self {
        BluezAdapter { conn: None, started: false }
    }

    fn start_discovery(conn: &Connection) -> Result<(), Error> {
        let msg = Message::new_method_call(BLUEZ_SERVICE, ADAPTER_PATH, "org.bluez.Adapter1", "StartDiscovery")
            .map_err(|e| Error::ScannerUnavailable(e))?;
        conn.send_with_reply_and_block(msg, Duration::from_secs(5))
            .map_err(|e| Error::ScannerUnavailable(e.to_string()))?;
        Ok(())
    }

    fn stop_discovery(conn: &Connection) {
        if let Ok(msg) = Message::new_method_call(BLUEZ_SERVICE, ADAPTER_PATH, "org.bluez.Adapter1", "StopDiscovery") {
            let _ = conn.send_with_reply_and_block(msg, Duration::from_secs(5));
        }
    }
}

impl Default for BluezAdapter {
    fn default() -> Self {
        Self::new()
    }
}

impl BleAdapter for BluezAdapter {
    fn name(&self) -> &'static str {
        "bluez-dbus"
    }

    fn start(&mut self) -> Result<(), Error> {
        if self.started {
            return Ok(());
        }
        let conn = Connection::new_system().map_err(|e| Error::ScannerUnavailable(e.to_string()))?;
        conn.add_match(
            dbus::message::MatchRule::new_signal("org.freedesktop.DBus.Properties", "PropertiesChanged"),
        )
        .map_err(|e| Error::ScannerUnavailable(e.to_string()))?;
        Self::start_discovery(&conn)?;
        self.conn = Some(conn);
        self.started = true;
        Ok(())
    }

    fn stop(&mut self) {
        if let Some(conn) = &self.conn {
            Self::stop_discovery(conn);
        }
        self.conn = None;
        self.started = false;
    }

    fn next_event(&mut self, timeout: Duration) -> Option<AdvertRecord> {
        let conn = self.conn.as_ref()?;
        let msg = conn.channel().blocking_pop_message(timeout).ok()??;
        parse_properties_changed(&msg)
    }
}

/// Parses one `PropertiesChanged` signal on a `/org/bluez/hci0/dev_*` path
/// into an `AdvertRecord`, synthesizing AD-structure bytes from the parsed
/// properties (manufacturer data -> 0xFF, service data -> 0x16, service
/// UUIDs -> 0x03).
fn parse_properties_changed(msg: &Message) -> Option<AdvertRecord> {
    let path = msg.path()?;
    let path_str = path.to_string();
    if !path_str.starts_with(DEV_PATH_PREFIX) {
        return None;
    }
    let address = mac_from_path(&path_str)?;

    let (interface, changed): (String, dbus::arg::PropMap) = msg.read2().ok()?;
    if interface != "org.bluez.Device1" {
        return None;
    }

    let mut rssi: i32 = 0;
    let mut address_type: u32 = 0;
    let mut data = Vec::with_capacity(MAX_AD_DATA);

    if let Some(v) = changed.get("RSSI") {
        if let Some(i) = v.0.as_i64() {
            rssi = i as i32;
        }
    }
    if let Some(v) = changed.get("AddressType") {
        if let Some(s) = v.0.as_str() {
            address_type = if s == "random" { 1 } else { 0 };
        }
    }
    if let Some(v) = changed.get("ManufacturerData") {
        append_manufacturer_data(&v.0, &mut data);
    }
    if let Some(v) = changed.get("ServiceData") {
        append_service_data(&v.0, &mut data);
    }
    if let Some(v) = changed.get("UUIDs") {
        append_service_uuids(&v.0, &mut data);
    }

    if data.is_empty() && rssi == 0 {
        return None;
    }

    Some(AdvertRecord { address, rssi, address_type, data })
}

fn mac_from_path(path: &str) -> Option<u64> {
    let suffix = path.strip_prefix(DEV_PATH_PREFIX)?;
    let mut mac = [0u8; 6];
    let parts: Vec<&str> = suffix.splitn(6, '_').collect();
    if parts.len() != 6 {
        return None;
    }
    for (i, part) in parts.iter().enumerate() {
        mac[i] = u8::from_str_radix(part, 16).ok()?;
    }
    Some(crate::proto::mac_to_u64(&mac))
}

fn append_ad_element(data: &mut Vec<u8>, ad_type: u8, value: &[u8]) {
    if data.len() + 2 + value.len() > MAX_AD_DATA {
        return;
    }
    data.push((value.len() + 1) as u8);
    data.push(ad_type);
    data.extend_from_slice(value);
}

/// `ManufacturerData` arrives as `a{qv}`: company id -> byte array.
fn append_manufacturer_data(value: &dyn RefArg, data: &mut Vec<u8>) {
    let Some(mut iter) = value.as_iter() else { return };
    while let (Some(company), Some(bytes_variant)) = (iter.next(), iter.next()) {
        let Some(company_id) = company.as_u64() else { continue };
        let mut bytes = vec![(company_id & 0xFF) as u8, ((company_id >> 8) & 0xFF) as u8];
        if let Some(arr) = bytes_variant.as_iter() {
            for b in arr {
                if let Some(byte) = b.as_u64() {
                    bytes.push(byte as u8);
                }
            }
        }
        append_ad_element(data, 0xFF, &bytes);
    }
}

/// `ServiceData` arrives as `a{sv}`: UUID string -> byte array.
fn append_service_data(value: &dyn RefArg, data: &mut Vec<u8>) {
    let Some(mut iter) = value.as_iter() else { return };
    while let (Some(uuid), Some(bytes_variant)) = (iter.next(), iter.next()) {
        let Some(uuid_str) = uuid.as_str() else { continue };
        let Some(uuid16) = parse_uuid16(uuid_str) else { continue };
        let mut bytes = vec![(uuid16 & 0xFF) as u8, ((uuid16 >> 8) & 0xFF) as u8];
        if let Some(arr) = bytes_variant.as_iter() {
            for b in arr {
                if let Some(byte) = b.as_u64() {
                    bytes.push(byte as u8);
                }
            }
        }
        append_ad_element(data, 0x16, &bytes);
    }
}

/// `UUIDs` arrives as `as`: a flat array of UUID strings.
fn append_service_uuids(value: &dyn RefArg, data: &mut Vec<u8>) {
    let Some(iter) = value.as_iter() else { return };
    let mut list = Vec::new();
    for uuid in iter {
        let Some(uuid_str) = uuid.as_str() else { continue };
        if let Some(uuid16) = parse_uuid16(uuid_str) {
            list.push((uuid16 & 0xFF) as u8);
            list.push(((uuid16 >> 8) & 0xFF) as u8);
        }
    }
    if !list.is_empty() {
        append_ad_element(data, 0x03, &list);
    }
}

/// Parses a 16-bit UUID from either its 4-hex-char shorthand or the full
/// Bluetooth Base UUID form (`0000XXXX-0000-1000-8000-00805F9B34FB`).
fn parse_uuid16(uuid: &str) -> Option<u16> {
    if uuid.len() == 4 {
        return u16::from_str_radix(uuid, 16).ok();
    }
    if uuid.len() >= 8 && uuid.as_bytes().get(8) == Some(&b'-') {
        return u16::from_str_radix(&uuid[4..8], 16).ok();
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mac_from_path_parses_uppercase_underscored_address() {
        let addr = mac_from_path("/org/bluez/hci0/dev_AA_BB_CC_DD_EE_FF").unwrap();
        assert_eq!(addr, crate::proto::mac_to_u64(&[0xAA, 0xBB, 0xCC, 0xDD, 0xEE, 0xFF]));
    }

    #[test]
    fn mac_from_path_rejects_non_device_paths() {
        assert!(mac_from_path("/org/bluez/hci0").is_none());
    }

    #[test]
    fn parse_uuid16_shorthand() {
        assert_eq!(parse_uuid16("180D"), Some(0x180D));
    }

    #[test]
    fn parse_uuid16_full_base_uuid() {
        assert_eq!(parse_uuid16("0000180D-0000-1000-8000-00805F9B34FB"), Some(0x180D));
    }

    #[test]
    fn parse_uuid16_rejects_garbage() {
        assert_eq!(parse_uuid16("not-a-uuid"), None);
    }

    #[test]
    fn append_ad_element_respects_max_len() {
        let mut data = vec![0u8; MAX_AD_DATA - 1];
        append_ad_element(&mut data, 0xFF, &[1, 2, 3]);
        assert_eq!(data.len(), MAX_AD_DATA - 1);
    }
}
