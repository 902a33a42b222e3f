mod common;

use common::{record, start_test_server, ScriptedAdapter, TestClient};
use esphome_gateway::codec::Reader;

const SUBSCRIBE_BLE_ADVERTISEMENTS: u32 = 66;
const RAW_ADVERTISEMENTS_RESPONSE: u32 = 93;

fn count_nested_advertisements(payload: &[u8]) -> usize {
    let mut count = 0;
    let mut r = Reader::new(payload);
    while !r.is_empty() {
        let (_field, wt) = r.read_tag().unwrap();
        r.skip_field(wt).unwrap();
        count += 1;
    }
    count
}

#[test]
fn subscribing_starts_scanning_and_forwards_a_batch() {
    // 16 distinct MACs triggers the batcher's eager flush at capacity,
    // so the test doesn't have to wait out the 10s timer-driven flush.
    let events: Vec<_> = (0u64..16).map(|i| record([0, 0, 0, 0, 0, i as u8], -40 - i as i32)).collect();
    let (server, addr, observer) = start_test_server(Box::new(ScriptedAdapter::new(events)));
    let mut client = TestClient::connect(addr);
    client.handshake();

    client.send(SUBSCRIBE_BLE_ADVERTISEMENTS, &[]);

    let (mt, payload) = client.recv();
    assert!(observer.is_enabled());
    assert_eq!(mt, RAW_ADVERTISEMENTS_RESPONSE);
    assert_eq!(count_nested_advertisements(&payload), 16);

    server.shutdown();
}

#[test]
fn two_clients_both_receive_the_broadcast_batch() {
    let events: Vec<_> = (0u64..16).map(|i| record([0, 0, 0, 0, 1, i as u8], -50)).collect();
    let (server, addr, _observer) = start_test_server(Box::new(ScriptedAdapter::new(events)));

    let mut client_a = TestClient::connect(addr);
    client_a.handshake();
    let mut client_b = TestClient::connect(addr);
    client_b.handshake();

    client_a.send(SUBSCRIBE_BLE_ADVERTISEMENTS, &[]);

    let (mt_a, payload_a) = client_a.recv();
    let (mt_b, payload_b) = client_b.recv();
    assert_eq!(mt_a, RAW_ADVERTISEMENTS_RESPONSE);
    assert_eq!(mt_b, RAW_ADVERTISEMENTS_RESPONSE);
    assert_eq!(payload_a, payload_b, "both clients should see the identical batch, not interleaved halves");

    server.shutdown();
}

#[test]
fn unsubscribe_stops_forwarding_new_batches() {
    let events: Vec<_> = (0u64..16).map(|i| record([0, 0, 0, 0, 2, i as u8], -50)).collect();
    let (server, addr, observer) = start_test_server(Box::new(ScriptedAdapter::new(events)));
    let mut client = TestClient::connect(addr);
    client.handshake();

    client.send(SUBSCRIBE_BLE_ADVERTISEMENTS, &[]);
    let (mt, _) = client.recv();
    assert_eq!(mt, RAW_ADVERTISEMENTS_RESPONSE);

    client.send(87, &[]); // UnsubscribeBluetoothLEAdvertisementsRequest
    std::thread::sleep(std::time::Duration::from_millis(100));
    assert!(!observer.is_enabled());

    server.shutdown();
}
