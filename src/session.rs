/// Per-connection state and the session table.
///
/// One worker thread per session reads frames into a growing receive buffer,
/// dispatches complete frames as they appear, and compacts the buffer after
/// each dispatch. Writes go through a per-session mutex so broadcast and
/// reply writes never interleave on the wire.
use std::io::Write;
use std::net::TcpStream;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::{Mutex, RwLock};

use crate::frame::encode_frame;

/// Default capacity of the session table: a small, fixed number of Home
/// Assistant connections (the core connection plus at most one companion
/// client).
pub const MAX_SESSIONS: usize = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connecting,
    HelloAcked,
    Authenticated,
}

/// One connected client. Holds a cloned socket handle and write mutex for
/// sending; the receive loop owns the other half of the clone.
pub struct Session {
    pub id: u32,
    pub peer: std::net::SocketAddr,
    state: RwLock<ConnectionState>,
    send_lock: Mutex<TcpStream>,
}

impl Session {
    pub fn new(id: u32, peer: std::net::SocketAddr, socket: TcpStream) -> Self {
        Session {
            id,
            peer,
            state: RwLock::new(ConnectionState::Connecting),
            send_lock: Mutex::new(socket),
        }
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.read().unwrap()
    }

    pub fn set_state(&self, state: ConnectionState) {
        *self.state.write().unwrap() = state;
    }

    pub fn is_authenticated(&self) -> bool {
        self.state() == ConnectionState::Authenticated
    }

    /// Frames and writes one message to this session's socket. Held behind
    /// `send_lock` so concurrent broadcasts and direct replies never
    /// interleave bytes on the wire. Never called while the session table
    /// lock is held.
    pub fn send(&self, message_type: u32, payload: &[u8]) -> std::io::Result<()> {
        let framed = encode_frame(message_type, payload);
        let mut sock = self.send_lock.lock().unwrap();
        sock.write_all(&framed)
    }

    pub fn shutdown(&self) {
        let sock = self.send_lock.lock().unwrap();
        let _ = sock.shutdown(std::net::Shutdown::Both);
    }
}

/// Fixed-capacity table of active sessions. The table lock is only ever held
/// for bookkeeping (insert/remove/iterate-to-collect); it is released before
/// any per-session socket write.
pub struct SessionTable {
    slots: Mutex<Vec<Option<std::sync::Arc<Session>>>>,
    next_id: AtomicU32,
    len: AtomicUsize,
}

impl SessionTable {
    pub fn new() -> Self {
        SessionTable::with_capacity(MAX_SESSIONS)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let mut slots = Vec::with_capacity(capacity);
        slots.resize_with(capacity, || None);
        SessionTable {
            slots: Mutex::new(slots),
            next_id: AtomicU32::new(1),
            len: AtomicUsize::new(0),
        }
    }

    /// Reserves the next session id, without yet inserting into a slot.
    pub fn next_id(&self) -> u32 {
        self.next_id.fetch_add(1, Ordering::SeqCst)
    }

    /// Inserts a session into the first empty slot. Returns `false` if the
    /// table is full — caller should close the connection immediately.
    pub fn insert(&self, session: std::sync::Arc<Session>) -> bool {
        let mut slots = self.slots.lock().unwrap();
        for slot in slots.iter_mut() {
            if slot.is_none() {
                *slot = Some(session);
                self.len.fetch_add(1, Ordering::SeqCst);
                return true;
            }
        }
        false
    }

    pub fn remove(&self, id: u32) {
        let mut slots = self.slots.lock().unwrap();
        for slot in slots.iter_mut() {
            if slot.as_ref().map(|s| s.id) == Some(id) {
                *slot = None;
                self.len.fetch_sub(1, Ordering::SeqCst);
                return;
            }
        }
    }

    pub fn get(&self, id: u32) -> Option<std::sync::Arc<Session>> {
        let slots = self.slots.lock().unwrap();
        slots.iter().flatten().find(|s| s.id == id).cloned()
    }

    /// Returns a snapshot of every active session, for broadcast. The table
    /// lock is released before the caller writes to any of them.
    pub fn snapshot(&self) -> Vec<std::sync::Arc<Session>> {
        let slots = self.slots.lock().unwrap();
        slots.iter().flatten().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.len.load(Ordering::SeqCst)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.slots.lock().unwrap().len()
    }
}

impl Default for SessionTable {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{TcpListener, TcpStream};

    fn loopback_pair() -> (TcpStream, std::net::SocketAddr) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let client = TcpStream::connect(addr).unwrap();
        let (server_side, peer) = listener.accept().unwrap();
        let _ = client;
        (server_side, peer)
    }

    #[test]
    fn new_session_starts_connecting() {
        let (sock, peer) = loopback_pair();
        let session = Session::new(1, peer, sock);
        assert_eq!(session.state(), ConnectionState::Connecting);
        assert!(!session.is_authenticated());
    }

    #[test]
    fn state_transitions_are_observable() {
        let (sock, peer) = loopback_pair();
        let session = Session::new(1, peer, sock);
        session.set_state(ConnectionState::HelloAcked);
        assert_eq!(session.state(), ConnectionState::HelloAcked);
        session.set_state(ConnectionState::Authenticated);
        assert!(session.is_authenticated());
    }

    #[test]
    fn table_insert_and_remove_tracks_len() {
        let table = SessionTable::with_capacity(2);
        let (sock1, peer1) = loopback_pair();
        let (sock2, peer2) = loopback_pair();
        let s1 = std::sync::Arc::new(Session::new(table.next_id(), peer1, sock1));
        let s2 = std::sync::Arc::new(Session::new(table.next_id(), peer2, sock2));

        assert!(table.insert(s1.clone()));
        assert!(table.insert(s2.clone()));
        assert_eq!(table.len(), 2);

        table.remove(s1.id);
        assert_eq!(table.len(), 1);
        assert!(table.get(s1.id).is_none());
        assert!(table.get(s2.id).is_some());
    }

    #[test]
    fn table_rejects_insert_beyond_capacity() {
        let table = SessionTable::with_capacity(1);
        let (sock1, peer1) = loopback_pair();
        let (sock2, peer2) = loopback_pair();
        let s1 = std::sync::Arc::new(Session::new(table.next_id(), peer1, sock1));
        let s2 = std::sync::Arc::new(Session::new(table.next_id(), peer2, sock2));

        assert!(table.insert(s1));
        assert!(!table.insert(s2));
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn snapshot_reflects_current_sessions() {
        let table = SessionTable::with_capacity(2);
        let (sock, peer) = loopback_pair();
        let s = std::sync::Arc::new(Session::new(table.next_id(), peer, sock));
        table.insert(s.clone());
        let snap = table.snapshot();
        assert_eq!(snap.len(), 1);
        assert_eq!(snap[0].id, s.id);
    }
}
