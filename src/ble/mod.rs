/// BLE observer: a uniform adapter interface behind which exactly one real
/// scanner is compiled in, plus the cache/batch pipeline that turns a stream
/// of advertisements into `BluetoothLERawAdvertisementsResponse` batches.
pub mod cache;
pub mod observer;

#[cfg(feature = "ble-bluez")]
pub mod adapter_bluez;

#[cfg(feature = "ble-hci")]
pub mod adapter_hci;

use std::time::Duration;

/// One observed advertisement, already normalized to the shape the raw
/// advertisements response needs: a packed MAC, signal strength, address
/// type, and the AD-structure byte string.
#[derive(Debug, Clone)]
pub struct AdvertRecord {
    pub address: u64,
    pub rssi: i32,
    pub address_type: u32,
    pub data: Vec<u8>,
}

/// A BLE scanning backend. Exactly one implementation is compiled in,
/// selected by Cargo feature (`ble-bluez` or `ble-hci`); callers never branch
/// on which one is active.
pub trait BleAdapter: Send {
    fn name(&self) -> &'static str;

    /// Starts scanning. Idempotent: calling it while already started is a
    /// no-op.
    fn start(&mut self) -> Result<(), crate::error::Error>;

    /// Stops scanning. Idempotent.
    fn stop(&mut self);

    /// Blocks up to `timeout` for the next advertisement, returning `None`
    /// on timeout (not an error — the caller just loops again).
    fn next_event(&mut self, timeout: Duration) -> Option<AdvertRecord>;
}
