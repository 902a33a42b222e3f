/// Bluetooth LE proxy component: exposes one switch entity ("BLE Scanning")
/// that starts/stops the BLE observer, contributes the bluetooth proxy
/// feature flags to `DeviceInfoResponse`, and handles the
/// subscribe/unsubscribe/switch-command messages for raw advertisements.
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::ble::observer::Observer;
use crate::proto::{
    decode_switch_command_request, encode_list_entities_switch_response, encode_switch_state_response,
    DeviceInfo, ListEntitiesSwitchResponse, SwitchStateResponse, BLE_FEATURE_PASSIVE_SCAN,
    BLE_FEATURE_RAW_ADVERTISEMENTS, MSG_LIST_ENTITIES_SWITCH_RESPONSE, MSG_SWITCH_COMMAND_REQUEST,
    MSG_SWITCH_STATE_RESPONSE, MSG_SUBSCRIBE_BLUETOOTH_LE_ADVERTISEMENTS_REQUEST,
    MSG_UNSUBSCRIBE_BLUETOOTH_LE_ADVERTISEMENTS_REQUEST,
};
use crate::registry::{Component, InboundMessage, RuntimeContext};

pub const SWITCH_OBJECT_ID: &str = "ble_scanning";
pub const SWITCH_KEY: u32 = 100;
pub const SWITCH_NAME: &str = "BLE Scanning";

pub struct BleProxyComponent {
    observer: Arc<Observer>,
    /// The switch's logical on/off state, distinct from whether the scanner
    /// is actually running right now. Defaults to enabled so a bare
    /// `SubscribeBluetoothLEAdvertisementsRequest` (no prior switch command)
    /// starts the scanner. When the switch has been turned off, subscribe
    /// requests are a no-op until it's turned back on (§4.4, §8 scenario 6).
    switch_enabled: AtomicBool,
}

impl BleProxyComponent {
    pub fn new(observer: Arc<Observer>) -> Self {
        BleProxyComponent { observer, switch_enabled: AtomicBool::new(true) }
    }
}

impl Component for BleProxyComponent {
    fn name(&self) -> &'static str {
        "ble_proxy"
    }

    fn contribute_device_info(&self, info: &mut DeviceInfo) {
        info.bluetooth_proxy_feature_flags |= BLE_FEATURE_PASSIVE_SCAN | BLE_FEATURE_RAW_ADVERTISEMENTS;
    }

    fn list_entities(&self, ctx: &RuntimeContext, session_id: u32) {
        let payload = encode_list_entities_switch_response(&ListEntitiesSwitchResponse {
            object_id: SWITCH_OBJECT_ID.to_string(),
            key: SWITCH_KEY,
            name: SWITCH_NAME.to_string(),
            icon: "mdi:bluetooth".to_string(),
            assumed_state: false,
        });
        let _ = ctx.server.unicast(session_id, MSG_LIST_ENTITIES_SWITCH_RESPONSE, &payload);
    }

    fn subscribe_states(&self, ctx: &RuntimeContext, session_id: u32) {
        let payload = encode_switch_state_response(&SwitchStateResponse {
            key: SWITCH_KEY,
            state: self.observer.is_enabled(),
        });
        let _ = ctx.server.unicast(session_id, MSG_SWITCH_STATE_RESPONSE, &payload);
    }

    fn handle_message(&self, ctx: &RuntimeContext, msg: &InboundMessage<'_>) -> bool {
        match msg.message_type {
            MSG_SUBSCRIBE_BLUETOOTH_LE_ADVERTISEMENTS_REQUEST => {
                if self.switch_enabled.load(Ordering::SeqCst) {
                    self.observer.enable();
                }
                true
            }
            MSG_UNSUBSCRIBE_BLUETOOTH_LE_ADVERTISEMENTS_REQUEST => {
                self.observer.disable();
                true
            }
            MSG_SWITCH_COMMAND_REQUEST => {
                let Ok(cmd) = decode_switch_command_request(msg.payload) else { return false };
                if cmd.key != SWITCH_KEY {
                    return false;
                }
                self.switch_enabled.store(cmd.state, Ordering::SeqCst);
                if cmd.state {
                    self.observer.enable();
                } else {
                    self.observer.disable();
                }
                let payload = encode_switch_state_response(&SwitchStateResponse { key: SWITCH_KEY, state: cmd.state });
                ctx.server.broadcast(MSG_SWITCH_STATE_RESPONSE, &payload);
                true
            }
            _ => false,
        }
    }
}
