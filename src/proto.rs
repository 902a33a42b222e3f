/// Typed request/response records for the ESPHome Native API messages this
/// gateway handles, plus the full message-type number table so components
/// added later can reference the right wire number without guessing.
use crate::codec::{
    Reader, WIRE_TYPE_LENGTH, WIRE_TYPE_VARINT, write_bool_field, write_bytes_field,
    write_message_field, write_sint32_field, write_string_field, write_u32_field, write_u64_field,
};
use crate::error::CodecError;

// ── Message type numbers ────────────────────────────────────────────────

pub const MSG_HELLO_REQUEST: u32 = 1;
pub const MSG_HELLO_RESPONSE: u32 = 2;
pub const MSG_CONNECT_REQUEST: u32 = 3;
pub const MSG_CONNECT_RESPONSE: u32 = 4;
pub const MSG_DISCONNECT_REQUEST: u32 = 5;
pub const MSG_DISCONNECT_RESPONSE: u32 = 6;
pub const MSG_PING_REQUEST: u32 = 7;
pub const MSG_PING_RESPONSE: u32 = 8;
pub const MSG_DEVICE_INFO_REQUEST: u32 = 9;
pub const MSG_DEVICE_INFO_RESPONSE: u32 = 10;
pub const MSG_LIST_ENTITIES_REQUEST: u32 = 11;
pub const MSG_LIST_ENTITIES_BINARY_SENSOR_RESPONSE: u32 = 12;
pub const MSG_LIST_ENTITIES_COVER_RESPONSE: u32 = 13;
pub const MSG_LIST_ENTITIES_FAN_RESPONSE: u32 = 14;
pub const MSG_LIST_ENTITIES_LIGHT_RESPONSE: u32 = 15;
pub const MSG_LIST_ENTITIES_SENSOR_RESPONSE: u32 = 16;
pub const MSG_LIST_ENTITIES_SWITCH_RESPONSE: u32 = 17;
pub const MSG_LIST_ENTITIES_TEXT_SENSOR_RESPONSE: u32 = 18;
pub const MSG_LIST_ENTITIES_DONE_RESPONSE: u32 = 19;
pub const MSG_SUBSCRIBE_STATES_REQUEST: u32 = 20;

// Entity state/command messages (21-65) — reserved for entity kinds this
// gateway does not implement. Kept as named constants (not implemented)
// so a future component can reference the correct wire number.
pub const MSG_BINARY_SENSOR_STATE_RESPONSE: u32 = 21;
pub const MSG_COVER_STATE_RESPONSE: u32 = 22;
pub const MSG_FAN_STATE_RESPONSE: u32 = 23;
pub const MSG_LIGHT_STATE_RESPONSE: u32 = 24;
pub const MSG_SENSOR_STATE_RESPONSE: u32 = 25;
pub const MSG_SWITCH_STATE_RESPONSE: u32 = 26;
pub const MSG_TEXT_SENSOR_STATE_RESPONSE: u32 = 27;
pub const MSG_COVER_COMMAND_REQUEST: u32 = 30;
pub const MSG_FAN_COMMAND_REQUEST: u32 = 31;
pub const MSG_LIGHT_COMMAND_REQUEST: u32 = 32;
pub const MSG_SWITCH_COMMAND_REQUEST: u32 = 33;
pub const MSG_SUBSCRIBE_HOMEASSISTANT_SERVICES_REQUEST: u32 = 34;
pub const MSG_HOMEASSISTANT_SERVICE_RESPONSE: u32 = 35;
pub const MSG_HOMEASSISTANT_SERVICE_CALL: u32 = 36;
pub const MSG_HOMEASSISTANT_STATE_RESPONSE: u32 = 37;
pub const MSG_SUBSCRIBE_HOMEASSISTANT_STATES_REQUEST: u32 = 38;
pub const MSG_CLIMATE_STATE_RESPONSE: u32 = 40;
pub const MSG_CLIMATE_COMMAND_REQUEST: u32 = 41;
pub const MSG_NUMBER_STATE_RESPONSE: u32 = 42;
pub const MSG_NUMBER_COMMAND_REQUEST: u32 = 43;
pub const MSG_SELECT_STATE_RESPONSE: u32 = 44;
pub const MSG_SELECT_COMMAND_REQUEST: u32 = 45;
pub const MSG_BUTTON_COMMAND_REQUEST: u32 = 46;
pub const MSG_LOCK_STATE_RESPONSE: u32 = 47;
pub const MSG_LOCK_COMMAND_REQUEST: u32 = 48;
pub const MSG_VALVE_STATE_RESPONSE: u32 = 49;
pub const MSG_VALVE_COMMAND_REQUEST: u32 = 50;
pub const MSG_MEDIA_PLAYER_STATE_RESPONSE: u32 = 51;
pub const MSG_MEDIA_PLAYER_COMMAND_REQUEST: u32 = 52;
pub const MSG_ALARM_CONTROL_PANEL_STATE_RESPONSE: u32 = 53;
pub const MSG_ALARM_CONTROL_PANEL_COMMAND_REQUEST: u32 = 54;
pub const MSG_TEXT_STATE_RESPONSE: u32 = 55;
pub const MSG_TEXT_COMMAND_REQUEST: u32 = 56;
pub const MSG_DATE_STATE_RESPONSE: u32 = 57;
pub const MSG_DATE_COMMAND_REQUEST: u32 = 58;
pub const MSG_TIME_STATE_RESPONSE: u32 = 59;
pub const MSG_TIME_COMMAND_REQUEST: u32 = 60;
pub const MSG_DATETIME_STATE_RESPONSE: u32 = 61;
pub const MSG_DATETIME_COMMAND_REQUEST: u32 = 62;
pub const MSG_EVENT_RESPONSE: u32 = 63;
pub const MSG_UPDATE_STATE_RESPONSE: u32 = 64;
pub const MSG_UPDATE_COMMAND_REQUEST: u32 = 65;

// Bluetooth proxy messages (66-93).
pub const MSG_SUBSCRIBE_BLUETOOTH_LE_ADVERTISEMENTS_REQUEST: u32 = 66;
pub const MSG_BLUETOOTH_LE_ADVERTISEMENT_RESPONSE: u32 = 67;
pub const MSG_BLUETOOTH_DEVICE_REQUEST: u32 = 68;
pub const MSG_BLUETOOTH_DEVICE_CONNECTION_RESPONSE: u32 = 69;
pub const MSG_BLUETOOTH_GATT_GET_SERVICES_REQUEST: u32 = 70;
pub const MSG_BLUETOOTH_GATT_GET_SERVICES_RESPONSE: u32 = 71;
pub const MSG_BLUETOOTH_GATT_GET_SERVICES_DONE_RESPONSE: u32 = 72;
pub const MSG_BLUETOOTH_GATT_READ_REQUEST: u32 = 73;
pub const MSG_BLUETOOTH_GATT_READ_RESPONSE: u32 = 74;
pub const MSG_BLUETOOTH_GATT_WRITE_REQUEST: u32 = 75;
pub const MSG_BLUETOOTH_GATT_READ_DESCRIPTOR_REQUEST: u32 = 76;
pub const MSG_BLUETOOTH_GATT_WRITE_DESCRIPTOR_REQUEST: u32 = 77;
pub const MSG_BLUETOOTH_GATT_NOTIFY_REQUEST: u32 = 78;
pub const MSG_BLUETOOTH_GATT_NOTIFY_DATA_RESPONSE: u32 = 79;
// NOTE: some ESPHome builds carry a stale `80` for this request; this
// numbering matches the handler wiring, where unsubscribe is 87.
pub const MSG_UNSUBSCRIBE_BLUETOOTH_LE_ADVERTISEMENTS_REQUEST: u32 = 87;
pub const MSG_BLUETOOTH_DEVICE_PAIRING_RESPONSE: u32 = 81;
pub const MSG_BLUETOOTH_DEVICE_UNPAIRING_RESPONSE: u32 = 82;
pub const MSG_BLUETOOTH_DEVICE_CLEAR_CACHE_RESPONSE: u32 = 83;
pub const MSG_SUBSCRIBE_BLUETOOTH_CONNECTIONS_FREE_REQUEST: u32 = 84;
pub const MSG_BLUETOOTH_CONNECTIONS_FREE_RESPONSE: u32 = 85;
pub const MSG_BLUETOOTH_GATT_GET_DESCRIPTOR_REQUEST: u32 = 86;
pub const MSG_BLUETOOTH_GATT_NOTIFY_RESPONSE: u32 = 88;
pub const MSG_BLUETOOTH_GATT_ERROR_RESPONSE: u32 = 89;
pub const MSG_BLUETOOTH_GATT_WRITE_RESPONSE: u32 = 90;
pub const MSG_BLUETOOTH_GATT_WRITE_DESCRIPTOR_RESPONSE: u32 = 91;
pub const MSG_BLUETOOTH_LE_RAW_ADVERTISEMENTS_RESPONSE: u32 = 93;

// Voice assistant messages (94-103) — reserved, not specified here.
pub const MSG_SUBSCRIBE_VOICE_ASSISTANT_REQUEST: u32 = 94;
pub const MSG_VOICE_ASSISTANT_RESPONSE: u32 = 95;
pub const MSG_VOICE_ASSISTANT_REQUEST: u32 = 96;
pub const MSG_VOICE_ASSISTANT_AUDIO: u32 = 97;
pub const MSG_VOICE_ASSISTANT_EVENT_RESPONSE: u32 = 98;
pub const MSG_VOICE_ASSISTANT_ANNOUNCE_REQUEST: u32 = 99;
pub const MSG_VOICE_ASSISTANT_ANNOUNCE_FINISHED: u32 = 100;
pub const MSG_VOICE_ASSISTANT_CONFIGURATION_REQUEST: u32 = 101;
pub const MSG_VOICE_ASSISTANT_CONFIGURATION_RESPONSE: u32 = 102;
pub const MSG_VOICE_ASSISTANT_TIMER_EVENT_RESPONSE: u32 = 103;

pub const MAX_ADV_DATA: usize = 62;
pub const MAX_ADV_BATCH: usize = 16;

// ── BLE proxy feature flags (DeviceInfoResponse field 15) ───────────────

pub const BLE_FEATURE_PASSIVE_SCAN: u32 = 1 << 0;
pub const BLE_FEATURE_ACTIVE_SCAN: u32 = 1 << 1;
pub const BLE_FEATURE_REMOTE_CACHE: u32 = 1 << 2;
pub const BLE_FEATURE_PAIRING: u32 = 1 << 3;
pub const BLE_FEATURE_CACHE_CLEARING: u32 = 1 << 4;
pub const BLE_FEATURE_RAW_ADVERTISEMENTS: u32 = 1 << 5;

// ── HelloRequest / HelloResponse ─────────────────────────────────────────

#[derive(Debug, Default)]
pub struct HelloRequest {
    pub client_info: String,
}

pub fn decode_hello_request(payload: &[u8]) -> Result<HelloRequest, CodecError> {
    let mut msg = HelloRequest::default();
    let mut r = Reader::new(payload);
    while !r.is_empty() {
        let (field, wt) = r.read_tag()?;
        match field {
            1 if wt == WIRE_TYPE_LENGTH => msg.client_info = r.read_string()?.to_string(),
            _ => r.skip_field(wt)?,
        }
    }
    Ok(msg)
}

pub struct HelloResponse {
    pub api_version_major: u32,
    pub api_version_minor: u32,
    pub server_info: String,
    pub name: String,
}

pub fn encode_hello_response(msg: &HelloResponse) -> Vec<u8> {
    let mut out = Vec::new();
    write_u32_field(&mut out, 1, msg.api_version_major);
    write_u32_field(&mut out, 2, msg.api_version_minor);
    write_string_field(&mut out, 3, &msg.server_info);
    write_string_field(&mut out, 4, &msg.name);
    out
}

// ── ConnectRequest / ConnectResponse ─────────────────────────────────────

#[derive(Debug, Default)]
pub struct ConnectRequest {
    pub password: String,
}

pub fn decode_connect_request(payload: &[u8]) -> Result<ConnectRequest, CodecError> {
    let mut msg = ConnectRequest::default();
    let mut r = Reader::new(payload);
    while !r.is_empty() {
        let (field, wt) = r.read_tag()?;
        match field {
            1 if wt == WIRE_TYPE_LENGTH => msg.password = r.read_string()?.to_string(),
            _ => r.skip_field(wt)?,
        }
    }
    Ok(msg)
}

pub struct ConnectResponse {
    pub invalid_password: bool,
}

pub fn encode_connect_response(msg: &ConnectResponse) -> Vec<u8> {
    let mut out = Vec::new();
    write_bool_field(&mut out, 1, msg.invalid_password);
    out
}

// ── DeviceInfoResponse ────────────────────────────────────────────────────

/// Mutable device-info record passed to each component's contribution hook.
/// Feature-flag fields are bitwise-OR'd across components; string fields are
/// last-writer-wins.
#[derive(Debug, Default, Clone)]
pub struct DeviceInfo {
    pub uses_password: bool,
    pub name: String,
    pub mac_address: String,
    pub esphome_version: String,
    pub compilation_time: String,
    pub model: String,
    pub has_deep_sleep: bool,
    pub project_name: String,
    pub project_version: String,
    pub webserver_port: u32,
    pub manufacturer: String,
    pub friendly_name: String,
    pub bluetooth_proxy_feature_flags: u32,
    pub suggested_area: String,
    pub voice_assistant_feature_flags: u32,
    pub bluetooth_mac_address: String,
    pub api_encryption_supported: bool,
    pub zwave_proxy_feature_flags: u32,
    pub zwave_home_id: u32,
}

pub fn encode_device_info_response(msg: &DeviceInfo) -> Vec<u8> {
    let mut out = Vec::new();
    write_bool_field(&mut out, 1, msg.uses_password);
    write_string_field(&mut out, 2, &msg.name);
    write_string_field(&mut out, 3, &msg.mac_address);
    write_string_field(&mut out, 4, &msg.esphome_version);
    write_string_field(&mut out, 5, &msg.compilation_time);
    write_string_field(&mut out, 6, &msg.model);
    write_bool_field(&mut out, 7, msg.has_deep_sleep);
    write_string_field(&mut out, 8, &msg.project_name);
    write_string_field(&mut out, 9, &msg.project_version);
    if msg.webserver_port != 0 {
        write_u32_field(&mut out, 10, msg.webserver_port);
    }
    write_string_field(&mut out, 12, &msg.manufacturer);
    write_string_field(&mut out, 13, &msg.friendly_name);
    if msg.bluetooth_proxy_feature_flags != 0 {
        write_u32_field(&mut out, 15, msg.bluetooth_proxy_feature_flags);
    }
    write_string_field(&mut out, 16, &msg.suggested_area);
    if msg.voice_assistant_feature_flags != 0 {
        write_u32_field(&mut out, 17, msg.voice_assistant_feature_flags);
    }
    write_string_field(&mut out, 18, &msg.bluetooth_mac_address);
    if msg.api_encryption_supported {
        write_bool_field(&mut out, 19, msg.api_encryption_supported);
    }
    if msg.zwave_proxy_feature_flags != 0 {
        write_u32_field(&mut out, 23, msg.zwave_proxy_feature_flags);
    }
    if msg.zwave_home_id != 0 {
        write_u32_field(&mut out, 24, msg.zwave_home_id);
    }
    out
}

// ── ListEntitiesSwitchResponse / SwitchStateResponse / SwitchCommandRequest ──

pub struct ListEntitiesSwitchResponse {
    pub object_id: String,
    pub key: u32,
    pub name: String,
    pub icon: String,
    pub assumed_state: bool,
}

pub fn encode_list_entities_switch_response(msg: &ListEntitiesSwitchResponse) -> Vec<u8> {
    let mut out = Vec::new();
    write_string_field(&mut out, 1, &msg.object_id);
    write_u32_field(&mut out, 2, msg.key);
    write_string_field(&mut out, 3, &msg.name);
    write_string_field(&mut out, 7, &msg.icon);
    write_bool_field(&mut out, 8, msg.assumed_state);
    out
}

pub struct SwitchStateResponse {
    pub key: u32,
    pub state: bool,
}

pub fn encode_switch_state_response(msg: &SwitchStateResponse) -> Vec<u8> {
    let mut out = Vec::new();
    write_u32_field(&mut out, 1, msg.key);
    write_bool_field(&mut out, 2, msg.state);
    out
}

#[derive(Debug, Default)]
pub struct SwitchCommandRequest {
    pub key: u32,
    pub state: bool,
}

pub fn decode_switch_command_request(payload: &[u8]) -> Result<SwitchCommandRequest, CodecError> {
    let mut msg = SwitchCommandRequest::default();
    let mut r = Reader::new(payload);
    while !r.is_empty() {
        let (field, wt) = r.read_tag()?;
        match field {
            1 if wt == WIRE_TYPE_VARINT => msg.key = r.read_u32()?,
            2 if wt == WIRE_TYPE_VARINT => msg.state = r.read_bool()?,
            _ => r.skip_field(wt)?,
        }
    }
    Ok(msg)
}

// ── BluetoothLERawAdvertisementsResponse ─────────────────────────────────

/// One advertisement inside a raw-advertisements batch.
pub struct RawAdvertisement {
    /// 48-bit MAC packed big-endian into the low 48 bits of a u64.
    pub address: u64,
    pub rssi: i32,
    pub address_type: u32,
    pub data: Vec<u8>,
}

fn encode_raw_advertisement(adv: &RawAdvertisement) -> Vec<u8> {
    let mut out = Vec::new();
    write_u64_field(&mut out, 1, adv.address);
    write_sint32_field(&mut out, 2, adv.rssi);
    write_u32_field(&mut out, 3, adv.address_type);
    write_bytes_field(&mut out, 4, &adv.data);
    out
}

/// Encodes a full batch as the repeated-field-1 message.
pub fn encode_raw_advertisements_response(batch: &[RawAdvertisement]) -> Vec<u8> {
    let mut out = Vec::new();
    for adv in batch {
        let nested = encode_raw_advertisement(adv);
        write_message_field(&mut out, 1, &nested);
    }
    out
}

/// Packs a 6-byte MAC, most-significant byte first, into a u64.
pub fn mac_to_u64(mac: &[u8; 6]) -> u64 {
    let mut out: u64 = 0;
    for &b in mac {
        out = (out << 8) | b as u64;
    }
    out
}

pub fn u64_to_mac(addr: u64) -> [u8; 6] {
    let mut mac = [0u8; 6];
    for (i, slot) in mac.iter_mut().enumerate() {
        let shift = (5 - i) * 8;
        *slot = ((addr >> shift) & 0xFF) as u8;
    }
    mac
}
