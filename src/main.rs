/// Entry point: loads device identity, wires up the component registry and
/// BLE observer, starts the listener, and blocks until SIGINT/SIGTERM, then
/// shuts everything down in order.
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use esphome_gateway::ble::observer::{Observer, FLUSH_INTERVAL_BLUEZ, FLUSH_INTERVAL_HCI};
#[cfg(feature = "ble-bluez")]
use esphome_gateway::ble::adapter_bluez::BluezAdapter;
#[cfg(feature = "ble-hci")]
use esphome_gateway::ble::adapter_hci::HciAdapter;
use esphome_gateway::ble::BleAdapter;
use esphome_gateway::components::ble_proxy::BleProxyComponent;
use esphome_gateway::config::DeviceConfig;
use esphome_gateway::registry::RuntimeContext;
use esphome_gateway::server::Server;
use esphome_gateway::worker;

fn build_adapter() -> (Box<dyn BleAdapter>, std::time::Duration) {
    #[cfg(feature = "ble-bluez")]
    {
        (Box::new(BluezAdapter::new()), FLUSH_INTERVAL_BLUEZ)
    }
    #[cfg(all(feature = "ble-hci", not(feature = "ble-bluez")))]
    {
        (Box::new(HciAdapter::new()), FLUSH_INTERVAL_HCI)
    }
    #[cfg(not(any(feature = "ble-bluez", feature = "ble-hci")))]
    {
        compile_error!("exactly one of the `ble-bluez` or `ble-hci` features must be enabled");
    }
}

fn main() {
    env_logger::init();

    let device_config = DeviceConfig::from_env();
    log::info!(
        "starting {} v{} as '{}' ({})",
        env!("CARGO_PKG_NAME"),
        env!("CARGO_PKG_VERSION"),
        device_config.name,
        device_config.mac_address
    );

    let server = Server::new();

    let (adapter, flush_interval) = build_adapter();
    let observer = Observer::new(adapter, flush_interval);
    observer.attach_server(Arc::downgrade(&server));
    server.set_ble_observer(Arc::clone(&observer));
    server.register_component(Arc::new(BleProxyComponent::new(observer)));

    let init_ctx = RuntimeContext { server: Arc::clone(&server), device_config: device_config.clone() };
    server.init_components(&init_ctx);

    let bind_addr = format!("0.0.0.0:{}", device_config.port);
    let accept_device_config = device_config.clone();
    let start_result = server.start(&bind_addr, move |server, reader, session| {
        let device_config = accept_device_config.clone();
        let server_for_track = Arc::clone(&server);
        let handle = std::thread::spawn(move || {
            worker::run_session(server, device_config, reader, session);
        });
        server_for_track.track_worker(handle);
    });

    match start_result {
        Ok(addr) => log::info!("listening on {addr}"),
        Err(e) => {
            log::error!("failed to bind {bind_addr}: {e}");
            std::process::exit(1);
        }
    }

    wait_for_shutdown_signal();

    log::info!("shutting down");
    server.shutdown();
    server.cleanup_components(&init_ctx);
    log::info!("shutdown complete");
}

/// Blocks until SIGINT or SIGTERM arrives.
fn wait_for_shutdown_signal() {
    let term = Arc::new(AtomicBool::new(false));
    for sig in [signal_hook::consts::SIGINT, signal_hook::consts::SIGTERM] {
        if let Err(e) = signal_hook::flag::register(sig, Arc::clone(&term)) {
            log::warn!("failed to register signal handler for {sig}: {e}");
        }
    }
    while !term.load(Ordering::SeqCst) {
        std::thread::sleep(std::time::Duration::from_millis(200));
    }
}
