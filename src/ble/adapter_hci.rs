/// Raw-HCI-style BLE adapter: a cross-platform central manager
/// (`btleplug`) run inside a dedicated single-threaded tokio runtime
/// confined to its own OS thread, so the rest of the gateway stays on plain
/// blocking threads.
use std::sync::mpsc::{sync_channel, Receiver, SyncSender};
use std::time::Duration;

use btleplug::api::{Central, CentralEvent, Manager as _, Peripheral as _, ScanFilter};
use btleplug::platform::Manager;
use futures_util::StreamExt;

use super::{AdvertRecord, BleAdapter};
use crate::error::Error;
use crate::proto::MAX_ADV_DATA;

pub struct HciAdapter {
    events: Option<Receiver<AdvertRecord>>,
    shutdown: Option<SyncSender<()>>,
    runtime_thread: Option<std::thread::JoinHandle<()>>,
}

impl HciAdapter {
    pub fn new() -> Self {
        HciAdapter { events: None, shutdown: None, runtime_thread: None }
    }
}

impl Default for HciAdapter {
    fn default() -> Self {
        Self::new()
    }
}

impl BleAdapter for HciAdapter {
    fn name(&self) -> &'static str {
        "btleplug-hci"
    }

    fn start(&mut self) -> Result<(), Error> {
        if self.runtime_thread.is_some() {
            return Ok(());
        }
        let (event_tx, event_rx) = sync_channel::<AdvertRecord>(256);
        let (shutdown_tx, shutdown_rx) = sync_channel::<()>(1);

        let handle = std::thread::spawn(move || {
            let rt = match tokio::runtime::Builder::new_current_thread().enable_time().build() {
                Ok(rt) => rt,
                Err(e) => {
                    log::error!("failed to build BLE adapter runtime: {e}");
                    return;
                }
            };
            rt.block_on(run_scan_loop(event_tx, shutdown_rx));
        });

        self.events = Some(event_rx);
        self.shutdown = Some(shutdown_tx);
        self.runtime_thread = Some(handle);
        Ok(())
    }

    fn stop(&mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        if let Some(handle) = self.runtime_thread.take() {
            let _ = handle.join();
        }
        self.events = None;
    }

    fn next_event(&mut self, timeout: Duration) -> Option<AdvertRecord> {
        self.events.as_ref()?.recv_timeout(timeout).ok()
    }
}

async fn run_scan_loop(event_tx: SyncSender<AdvertRecord>, shutdown_rx: Receiver<()>) {
    let manager = match Manager::new().await {
        Ok(m) => m,
        Err(e) => {
            log::error!("btleplug manager init failed: {e}");
            return;
        }
    };
    let adapters = match manager.adapters().await {
        Ok(a) => a,
        Err(e) => {
            log::error!("btleplug adapter enumeration failed: {e}");
            return;
        }
    };
    let Some(central) = adapters.into_iter().next() else {
        log::error!("no Bluetooth adapter available for raw-HCI-style scanning");
        return;
    };

    if let Err(e) = central.start_scan(ScanFilter::default()).await {
        log::error!("btleplug start_scan failed: {e}");
        return;
    }

    let mut events = match central.events().await {
        Ok(s) => s,
        Err(e) => {
            log::error!("btleplug event stream failed: {e}");
            return;
        }
    };

    loop {
        if shutdown_rx.try_recv().is_ok() {
            break;
        }
        tokio::select! {
            event = events.next() => {
                match event {
                    Some(CentralEvent::DeviceUpdated(id)) | Some(CentralEvent::DeviceDiscovered(id)) => {
                        if let Ok(peripheral) = central.peripheral(&id).await {
                            if let Ok(Some(props)) = peripheral.properties().await {
                                if let Some(record) = synthesize_record(&props) {
                                    let _ = event_tx.try_send(record);
                                }
                            }
                        }
                    }
                    None => break,
                    _ => {}
                }
            }
            _ = tokio::time::sleep(Duration::from_millis(200)) => {}
        }
    }

    let _ = central.stop_scan().await;
}

fn append_ad_element(data: &mut Vec<u8>, ad_type: u8, value: &[u8]) {
    if data.len() + 2 + value.len() > MAX_ADV_DATA {
        return;
    }
    data.push((value.len() + 1) as u8);
    data.push(ad_type);
    data.extend_from_slice(value);
}

/// Re-synthesizes AD-structure bytes from `btleplug`'s parsed
/// `PeripheralProperties`, the same way the system-bus adapter re-synthesizes
/// them from BlueZ's parsed D-Bus properties: manufacturer data as 0xFF,
/// service data as 0x16, local name as 0x09 (complete local name).
fn synthesize_record(props: &btleplug::api::PeripheralProperties) -> Option<AdvertRecord> {
    let address = mac_to_u64(props.address.into_inner());
    let rssi = props.rssi.unwrap_or(0) as i32;
    let mut data = Vec::with_capacity(MAX_ADV_DATA);

    for (company_id, bytes) in &props.manufacturer_data {
        let mut mfg = vec![(*company_id & 0xFF) as u8, ((*company_id >> 8) & 0xFF) as u8];
        mfg.extend_from_slice(bytes);
        append_ad_element(&mut data, 0xFF, &mfg);
    }
    for (uuid, bytes) in &props.service_data {
        let uuid16 = uuid16_from_uuid(*uuid);
        let mut svc = vec![(uuid16 & 0xFF) as u8, ((uuid16 >> 8) & 0xFF) as u8];
        svc.extend_from_slice(bytes);
        append_ad_element(&mut data, 0x16, &svc);
    }
    if let Some(name) = &props.local_name {
        append_ad_element(&mut data, 0x09, name.as_bytes());
    }

    if data.is_empty() && rssi == 0 {
        return None;
    }

    Some(AdvertRecord { address, rssi, address_type: 0, data })
}

fn mac_to_u64(mac: [u8; 6]) -> u64 {
    crate::proto::mac_to_u64(&mac)
}

/// Extracts the low 16 bits of a 128-bit service UUID, mirroring the
/// system-bus adapter's string-based extraction.
fn uuid16_from_uuid(uuid: uuid::Uuid) -> u16 {
    let bytes = uuid.as_bytes();
    u16::from_be_bytes([bytes[2], bytes[3]])
}
