mod common;

use common::{start_test_server, TestClient, ScriptedAdapter};
use esphome_gateway::codec::Reader;
use esphome_gateway::proto::{BLE_FEATURE_PASSIVE_SCAN, BLE_FEATURE_RAW_ADVERTISEMENTS};

#[test]
fn hello_then_connect_then_device_info() {
    let (server, addr, _observer) = start_test_server(Box::new(ScriptedAdapter::new(vec![])));
    let mut client = TestClient::connect(addr);

    client.handshake();

    client.send(9, &[]); // DeviceInfoRequest
    let (mt, payload) = client.recv();
    assert_eq!(mt, 10, "expected DeviceInfoResponse");

    let mut flags = None;
    let mut r = Reader::new(&payload);
    while !r.is_empty() {
        let (field, wt) = r.read_tag().unwrap();
        if field == 15 {
            flags = Some(r.read_u32().unwrap());
        } else {
            r.skip_field(wt).unwrap();
        }
    }
    assert_eq!(flags, Some(BLE_FEATURE_PASSIVE_SCAN | BLE_FEATURE_RAW_ADVERTISEMENTS));

    server.shutdown();
}

#[test]
fn messages_before_hello_are_silently_ignored_not_closed() {
    let (server, addr, _observer) = start_test_server(Box::new(ScriptedAdapter::new(vec![])));
    let mut client = TestClient::connect(addr);

    // A DeviceInfoRequest before HelloRequest gets no reply and no state
    // transition (§4.2 state diagram) — the connection stays open and a
    // subsequent, well-ordered handshake still succeeds.
    client.send(9, &[]);
    let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| client.recv()));
    assert!(result.is_err(), "out-of-order message should not produce a reply");

    client.handshake();

    server.shutdown();
}

#[test]
fn ping_request_gets_ping_response() {
    let (server, addr, _observer) = start_test_server(Box::new(ScriptedAdapter::new(vec![])));
    let mut client = TestClient::connect(addr);
    client.handshake();

    client.send(7, &[]); // PingRequest
    let (mt, payload) = client.recv();
    assert_eq!(mt, 8);
    assert!(payload.is_empty());

    server.shutdown();
}

#[test]
fn disconnect_request_gets_response_and_closes() {
    let (server, addr, _observer) = start_test_server(Box::new(ScriptedAdapter::new(vec![])));
    let mut client = TestClient::connect(addr);
    client.handshake();

    client.send(5, &[]); // DisconnectRequest
    let (mt, _) = client.recv();
    assert_eq!(mt, 6, "expected DisconnectResponse");

    server.shutdown();
}
