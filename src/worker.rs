/// Per-session receive loop: reads frames off the socket, drives the
/// connection state machine (Connecting -> HelloAcked -> Authenticated), and
/// dispatches authenticated traffic to the component registry.
use std::io::Read;
use std::net::TcpStream;
use std::sync::Arc;

use crate::config::DeviceConfig;
use crate::frame::decode_frame;
use crate::proto::{
    decode_connect_request, decode_hello_request, encode_connect_response, encode_device_info_response,
    encode_hello_response, ConnectResponse, DeviceInfo, HelloResponse, MSG_CONNECT_REQUEST, MSG_CONNECT_RESPONSE,
    MSG_DEVICE_INFO_REQUEST, MSG_DEVICE_INFO_RESPONSE, MSG_DISCONNECT_REQUEST, MSG_DISCONNECT_RESPONSE,
    MSG_HELLO_REQUEST, MSG_HELLO_RESPONSE, MSG_LIST_ENTITIES_DONE_RESPONSE, MSG_LIST_ENTITIES_REQUEST,
    MSG_PING_REQUEST, MSG_PING_RESPONSE, MSG_SUBSCRIBE_HOMEASSISTANT_SERVICES_REQUEST,
    MSG_SUBSCRIBE_HOMEASSISTANT_STATES_REQUEST, MSG_SUBSCRIBE_STATES_REQUEST,
};
use crate::registry::{InboundMessage, RuntimeContext};
use crate::server::Server;
use crate::session::{ConnectionState, Session};

const READ_CHUNK: usize = 4096;
/// A client that never completes its handshake or floods us with garbage
/// eventually hits this and gets disconnected rather than growing its
/// buffer without bound.
const MAX_BUFFERED: usize = 1 << 20;

/// Runs one session to completion: blocks on the socket, handling frames as
/// they arrive, until the peer disconnects, sends `DisconnectRequest`, or an
/// error occurs. Always removes the session from the table before returning.
pub fn run_session(server: Arc<Server>, device_config: DeviceConfig, mut reader: TcpStream, session: Arc<Session>) {
    let ctx = RuntimeContext { server: Arc::clone(&server), device_config };

    if !server.sessions.insert(Arc::clone(&session)) {
        log::warn!("session table full, rejecting connection from {}", session.peer);
        session.shutdown();
        return;
    }

    let mut buf: Vec<u8> = Vec::with_capacity(READ_CHUNK);
    let mut chunk = [0u8; READ_CHUNK];

    'read_loop: loop {
        let n = match reader.read(&mut chunk) {
            Ok(0) => break, // peer closed
            Ok(n) => n,
            Err(e) => {
                log::debug!("session {} read error: {e}", session.id);
                break;
            }
        };
        buf.extend_from_slice(&chunk[..n]);

        loop {
            match decode_frame(&buf) {
                Ok(Some(frame)) => {
                    let message_type = frame.message_type;
                    let consumed = frame.consumed;
                    let should_close = dispatch(&ctx, &session, message_type, frame.payload);
                    buf.drain(0..consumed);
                    if should_close {
                        break 'read_loop;
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    log::debug!("session {} frame error: {e}", session.id);
                    break 'read_loop;
                }
            }
        }

        if buf.len() > MAX_BUFFERED {
            log::warn!("session {} exceeded buffered-input limit, disconnecting", session.id);
            break;
        }
    }

    server.sessions.remove(session.id);
    session.shutdown();
}

/// Handles one decoded frame. Returns `true` if the connection should be
/// closed after this message.
fn dispatch(ctx: &RuntimeContext, session: &Arc<Session>, message_type: u32, payload: &[u8]) -> bool {
    if message_type == MSG_DISCONNECT_REQUEST {
        let _ = session.send(MSG_DISCONNECT_RESPONSE, &[]);
        return true;
    }

    // PingRequest is answered in any state after Connecting (§4.2), ahead of
    // the per-state handshake matching below.
    if message_type == MSG_PING_REQUEST && session.state() != ConnectionState::Connecting {
        let _ = session.send(MSG_PING_RESPONSE, &[]);
        return false;
    }

    match session.state() {
        ConnectionState::Connecting => {
            if message_type != MSG_HELLO_REQUEST {
                // Any other message before HelloRequest is silently ignored;
                // no state transition (§4.2 state diagram).
                log::debug!("session {} ignored message {} before HelloRequest", session.id, message_type);
                return false;
            }
            let hello = match decode_hello_request(payload) {
                Ok(h) => h,
                Err(e) => {
                    log::warn!("session {} sent malformed HelloRequest: {e}", session.id);
                    return true;
                }
            };
            log::info!("session {} hello from client '{}'", session.id, hello.client_info);
            let response = HelloResponse {
                api_version_major: 1,
                api_version_minor: 12,
                server_info: format!("{} ({})", ctx.device_config.name, env!("CARGO_PKG_NAME")),
                name: ctx.device_config.name.clone(),
            };
            let payload = encode_hello_response(&response);
            if session.send(MSG_HELLO_RESPONSE, &payload).is_err() {
                return true;
            }
            session.set_state(ConnectionState::HelloAcked);
            false
        }
        ConnectionState::HelloAcked => {
            if message_type != MSG_CONNECT_REQUEST {
                // Silently ignored; no state transition (§4.2 state diagram).
                log::debug!("session {} ignored message {} before ConnectRequest", session.id, message_type);
                return false;
            }
            // Password, if supplied, is always accepted (no credential store
            // configured for this gateway) — an open question resolved in
            // favor of matching Home Assistant's default unauthenticated
            // discovery flow.
            let _ = decode_connect_request(payload);
            let payload = encode_connect_response(&ConnectResponse { invalid_password: false });
            if session.send(MSG_CONNECT_RESPONSE, &payload).is_err() {
                return true;
            }
            session.set_state(ConnectionState::Authenticated);
            false
        }
        ConnectionState::Authenticated => handle_authenticated(ctx, session, message_type, payload),
    }
}

fn handle_authenticated(ctx: &RuntimeContext, session: &Arc<Session>, message_type: u32, payload: &[u8]) -> bool {
    match message_type {
        MSG_PING_REQUEST => {
            let _ = session.send(MSG_PING_RESPONSE, &[]);
            false
        }
        MSG_DEVICE_INFO_REQUEST => {
            let mut info = DeviceInfo {
                name: ctx.device_config.name.clone(),
                mac_address: ctx.device_config.mac_address.clone(),
                esphome_version: ctx.device_config.esphome_version.clone(),
                compilation_time: ctx.device_config.compilation_time.clone(),
                model: ctx.device_config.model.clone(),
                manufacturer: ctx.device_config.manufacturer.clone(),
                friendly_name: ctx.device_config.friendly_name.clone(),
                suggested_area: ctx.device_config.suggested_area.clone(),
                bluetooth_mac_address: ctx.device_config.mac_address.clone(),
                ..Default::default()
            };
            ctx.server.contribute_device_info(&mut info);
            let payload = encode_device_info_response(&info);
            let _ = session.send(MSG_DEVICE_INFO_RESPONSE, &payload);
            false
        }
        MSG_LIST_ENTITIES_REQUEST => {
            ctx.server.list_entities(ctx, session.id);
            let _ = session.send(MSG_LIST_ENTITIES_DONE_RESPONSE, &[]);
            false
        }
        MSG_SUBSCRIBE_STATES_REQUEST => {
            ctx.server.subscribe_states(ctx, session.id);
            false
        }
        MSG_SUBSCRIBE_HOMEASSISTANT_SERVICES_REQUEST | MSG_SUBSCRIBE_HOMEASSISTANT_STATES_REQUEST => {
            // No Home Assistant service/state bridging surface in this
            // gateway; acknowledged by doing nothing (§4.2).
            false
        }
        _ => {
            let msg = InboundMessage { session_id: session.id, message_type, payload };
            if !ctx.server.dispatch_message(ctx, &msg) {
                log::debug!("session {} sent unhandled message type {}", session.id, message_type);
            }
            false
        }
    }
}
