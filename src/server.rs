/// The gateway server facade: listener thread, session table, component
/// registry, and the send-side API components use to talk back to clients.
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::thread::JoinHandle;
use std::time::Duration;

use crate::ble::observer::Observer as BleObserver;
use crate::proto::DeviceInfo;
use crate::registry::{Component, InboundMessage, Registry, RuntimeContext};
use crate::session::{Session, SessionTable};

pub struct Server {
    pub sessions: SessionTable,
    registry: RwLock<Registry>,
    running: AtomicBool,
    listener_handle: Mutex<Option<JoinHandle<()>>>,
    listener_addr: Mutex<Option<SocketAddr>>,
    worker_handles: Mutex<Vec<JoinHandle<()>>>,
    ble: Mutex<Option<Arc<BleObserver>>>,
}

impl Server {
    pub fn new() -> Arc<Self> {
        Arc::new(Server::new_for_test())
    }

    /// Builds a `Server` with no listener bound yet — used directly by unit
    /// tests that only exercise the registry/session-table facade.
    pub fn new_for_test() -> Self {
        Server {
            sessions: SessionTable::new(),
            registry: RwLock::new(Registry::new()),
            running: AtomicBool::new(false),
            listener_handle: Mutex::new(None),
            listener_addr: Mutex::new(None),
            worker_handles: Mutex::new(Vec::new()),
            ble: Mutex::new(None),
        }
    }

    pub fn register_component(&self, component: Arc<dyn Component>) {
        self.registry.write().unwrap().register(component);
    }

    pub fn set_ble_observer(&self, observer: Arc<BleObserver>) {
        *self.ble.lock().unwrap() = Some(observer);
    }

    pub fn ble_observer(&self) -> Option<Arc<BleObserver>> {
        self.ble.lock().unwrap().clone()
    }

    pub fn init_components(&self, ctx: &RuntimeContext) {
        self.registry.write().unwrap().init_all(ctx);
    }

    pub fn cleanup_components(&self, ctx: &RuntimeContext) {
        self.registry.read().unwrap().cleanup_all(ctx);
    }

    pub fn contribute_device_info(&self, info: &mut DeviceInfo) {
        self.registry.read().unwrap().contribute_device_info(info);
    }

    pub fn list_entities(&self, ctx: &RuntimeContext, session_id: u32) {
        self.registry.read().unwrap().list_entities(ctx, session_id);
    }

    pub fn subscribe_states(&self, ctx: &RuntimeContext, session_id: u32) {
        self.registry.read().unwrap().subscribe_states(ctx, session_id);
    }

    /// Gives every registered component a chance to claim an inbound
    /// message. Returns `true` if one did.
    pub fn dispatch_message(&self, ctx: &RuntimeContext, msg: &InboundMessage<'_>) -> bool {
        self.registry.read().unwrap().handle_message(ctx, msg)
    }

    /// Sends one message to every authenticated session. Best-effort: a
    /// write failure on one session does not stop delivery to the others,
    /// and is left for that session's worker thread to notice and close.
    pub fn broadcast(&self, message_type: u32, payload: &[u8]) {
        for session in self.sessions.snapshot() {
            if session.is_authenticated() {
                if let Err(e) = session.send(message_type, payload) {
                    log::debug!("broadcast send to session {} failed: {e}", session.id);
                }
            }
        }
    }

    pub fn unicast(&self, session_id: u32, message_type: u32, payload: &[u8]) -> std::io::Result<()> {
        match self.sessions.get(session_id) {
            Some(session) => session.send(message_type, payload),
            None => Ok(()),
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Binds the listener and starts accepting connections, spawning one
    /// worker thread per accepted client via `on_accept`. Returns once the
    /// listener socket is bound; accept loop runs on its own thread.
    pub fn start<F>(self: &Arc<Self>, bind_addr: &str, on_accept: F) -> std::io::Result<std::net::SocketAddr>
    where
        F: Fn(Arc<Server>, std::net::TcpStream, Arc<Session>) + Send + Sync + 'static,
    {
        let listener = TcpListener::bind(bind_addr)?;
        let local_addr = listener.local_addr()?;
        self.running.store(true, Ordering::SeqCst);

        let on_accept = Arc::new(on_accept);
        let server = Arc::clone(self);
        let handle = std::thread::spawn(move || {
            for incoming in listener.incoming() {
                if !server.running.load(Ordering::SeqCst) {
                    break;
                }
                match incoming {
                    Ok(socket) => {
                        if let Err(e) = socket.set_nodelay(true) {
                            log::warn!("failed to set TCP_NODELAY: {e}");
                        }
                        let peer = match socket.peer_addr() {
                            Ok(p) => p,
                            Err(e) => {
                                log::warn!("accepted socket with no peer address: {e}");
                                continue;
                            }
                        };
                        let reader = match socket.try_clone() {
                            Ok(r) => r,
                            Err(e) => {
                                log::warn!("failed to clone accepted socket: {e}");
                                continue;
                            }
                        };
                        let id = server.sessions.next_id();
                        let session = Arc::new(Session::new(id, peer, socket));
                        on_accept(Arc::clone(&server), reader, session);
                    }
                    Err(e) => {
                        if server.running.load(Ordering::SeqCst) {
                            log::warn!("accept failed: {e}");
                        }
                    }
                }
            }
        });
        *self.listener_handle.lock().unwrap() = Some(handle);
        *self.listener_addr.lock().unwrap() = Some(local_addr);
        Ok(local_addr)
    }

    pub fn track_worker(&self, handle: JoinHandle<()>) {
        self.worker_handles.lock().unwrap().push(handle);
    }

    /// Orderly shutdown: stop accepting, close every session socket, stop
    /// the BLE observer, then join every thread we spawned, in that order.
    pub fn shutdown(&self) {
        self.running.store(false, Ordering::SeqCst);

        // `TcpListener::accept` has no portable shutdown call; nudge it by
        // connecting to ourselves so the blocked listener thread wakes up,
        // observes `running == false`, and exits instead of joining forever.
        if let Some(addr) = *self.listener_addr.lock().unwrap() {
            let _ = TcpStream::connect_timeout(&addr, Duration::from_millis(500));
        }

        for session in self.sessions.snapshot() {
            session.shutdown();
        }

        if let Some(ble) = self.ble.lock().unwrap().take() {
            ble.stop();
        }

        if let Some(handle) = self.listener_handle.lock().unwrap().take() {
            let _ = handle.join();
        }
        for handle in self.worker_handles.lock().unwrap().drain(..) {
            let _ = handle.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_server_is_not_running_until_start() {
        let server = Server::new();
        assert!(!server.is_running());
    }

    #[test]
    fn broadcast_to_no_sessions_is_a_no_op() {
        let server = Server::new();
        server.broadcast(93, &[1, 2, 3]);
    }

    #[test]
    fn unicast_to_unknown_session_is_ok() {
        let server = Server::new();
        assert!(server.unicast(42, 8, &[]).is_ok());
    }
}
