use std::io::{Read, Write};
use std::net::{SocketAddr, TcpStream};
use std::sync::Arc;
use std::time::Duration;

use esphome_gateway::ble::observer::{Observer, FLUSH_INTERVAL_BLUEZ};
use esphome_gateway::ble::{AdvertRecord, BleAdapter};
use esphome_gateway::components::ble_proxy::BleProxyComponent;
use esphome_gateway::config::DeviceConfig;
use esphome_gateway::error::Error;
use esphome_gateway::frame::{decode_frame, encode_frame};
use esphome_gateway::registry::RuntimeContext;
use esphome_gateway::server::Server;
use esphome_gateway::worker;

/// A scripted adapter: replays a fixed sequence of advertisements (one per
/// `next_event` call) and then reports timeouts, so tests control exactly
/// which events the observer sees.
pub struct ScriptedAdapter {
    events: std::sync::Mutex<std::collections::VecDeque<AdvertRecord>>,
    started: std::sync::atomic::AtomicBool,
}

impl ScriptedAdapter {
    pub fn new(events: Vec<AdvertRecord>) -> Self {
        ScriptedAdapter {
            events: std::sync::Mutex::new(events.into()),
            started: std::sync::atomic::AtomicBool::new(false),
        }
    }
}

impl BleAdapter for ScriptedAdapter {
    fn name(&self) -> &'static str {
        "scripted"
    }
    fn start(&mut self) -> Result<(), Error> {
        self.started.store(true, std::sync::atomic::Ordering::SeqCst);
        Ok(())
    }
    fn stop(&mut self) {
        self.started.store(false, std::sync::atomic::Ordering::SeqCst);
    }
    fn next_event(&mut self, timeout: Duration) -> Option<AdvertRecord> {
        if let Some(event) = self.events.lock().unwrap().pop_front() {
            return Some(event);
        }
        std::thread::sleep(timeout.min(Duration::from_millis(10)));
        None
    }
}

pub fn record(mac: [u8; 6], rssi: i32) -> AdvertRecord {
    AdvertRecord { address: esphome_gateway::proto::mac_to_u64(&mac), rssi, address_type: 0, data: vec![] }
}

/// Starts a `Server` bound to an ephemeral loopback port with a BLE proxy
/// component wired to `adapter`. Returns the server, its bound address, and
/// the observer (so tests can assert on its enabled state directly).
pub fn start_test_server(adapter: Box<dyn BleAdapter>) -> (Arc<Server>, SocketAddr, Arc<Observer>) {
    let server = Server::new();
    let observer = Observer::new(adapter, FLUSH_INTERVAL_BLUEZ);
    observer.attach_server(Arc::downgrade(&server));
    server.set_ble_observer(Arc::clone(&observer));
    server.register_component(Arc::new(BleProxyComponent::new(Arc::clone(&observer))));

    let device_config = DeviceConfig {
        name: "test-gateway".to_string(),
        mac_address: "AA:BB:CC:DD:EE:FF".to_string(),
        esphome_version: "0.1.0-test".to_string(),
        model: "test-model".to_string(),
        manufacturer: "test".to_string(),
        friendly_name: "Test Gateway".to_string(),
        suggested_area: String::new(),
        port: 0,
        compilation_time: "2026-01-01 00:00:00".to_string(),
    };

    let ctx = RuntimeContext { server: Arc::clone(&server), device_config: device_config.clone() };
    server.init_components(&ctx);

    let addr = server
        .start("127.0.0.1:0", move |server, reader, session| {
            let device_config = device_config.clone();
            let server_for_track = Arc::clone(&server);
            let handle = std::thread::spawn(move || {
                worker::run_session(server, device_config, reader, session);
            });
            server_for_track.track_worker(handle);
        })
        .expect("server should bind to an ephemeral port");

    (server, addr, observer)
}

/// A minimal client harness performing the ESPHome handshake
/// (Hello/Connect) and exposing raw frame send/receive for test bodies.
pub struct TestClient {
    stream: TcpStream,
}

impl TestClient {
    pub fn connect(addr: SocketAddr) -> Self {
        let stream = TcpStream::connect(addr).expect("client should connect");
        stream.set_read_timeout(Some(Duration::from_secs(2))).unwrap();
        TestClient { stream }
    }

    pub fn send(&mut self, message_type: u32, payload: &[u8]) {
        let framed = encode_frame(message_type, payload);
        self.stream.write_all(&framed).unwrap();
    }

    /// Reads exactly one frame, retrying partial reads until a full frame is
    /// buffered (mirroring what the session worker does on the server side).
    pub fn recv(&mut self) -> (u32, Vec<u8>) {
        let mut buf = Vec::new();
        let mut chunk = [0u8; 512];
        loop {
            if let Ok(Some(frame)) = decode_frame(&buf) {
                let message_type = frame.message_type;
                let payload = frame.payload.to_vec();
                return (message_type, payload);
            }
            let n = self.stream.read(&mut chunk).expect("client read should not error");
            assert!(n > 0, "peer closed before a full frame arrived");
            buf.extend_from_slice(&chunk[..n]);
        }
    }

    pub fn handshake(&mut self) {
        self.send(1, &[]); // HelloRequest
        let (mt, _) = self.recv();
        assert_eq!(mt, 2, "expected HelloResponse");
        self.send(3, &[]); // ConnectRequest
        let (mt, _) = self.recv();
        assert_eq!(mt, 4, "expected ConnectResponse");
    }
}
