//! # ConnectionManager: live client connections.
//!
//! ## Rules
//! - Connection ids are minted monotonically and never re-used within a
//!   process; recovery re-seats connections under their **original** ids
//!   (`add_with_id`) and bumps the counter past them so later mints cannot
//!   collide.
//! - Only logged-in connections with a bound user are carried through a
//!   copyover.
//! - Writes are best-effort: a peer that went away mid-copyover is logged
//!   and skipped, never an abort.

use std::io::Write;
use std::net::TcpStream;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::sync::{Arc, Mutex};

use dashmap::DashMap;

use crate::snapshot::Transport;
use crate::world::UserId;

/// Stable connection identifier.
pub type ConnectionId = u64;

/// The standard post-login input handler chain, attached in order to every
/// recovered connection: protocol negotiation first, line editing last.
pub const LOGIN_HANDLERS: [&str; 6] = [
    "telnet-iac",
    "ansi",
    "cleanse",
    "echo",
    "history",
    "signal",
];

struct ConnState {
    user_id: Option<UserId>,
    logged_in: bool,
    recovering: bool,
    handlers: Vec<&'static str>,
}

/// One live client connection.
pub struct Connection {
    /// Stable id, carried across copyover.
    pub id: ConnectionId,
    /// Transport kind; decides inheritability.
    pub transport: Transport,
    /// Peer address string.
    pub remote_addr: String,
    /// Kernel stream for plain-socket transports. `None` for upgraded
    /// transports whose socket cannot be handed to a successor.
    stream: Option<TcpStream>,
    state: Mutex<ConnState>,
}

impl Connection {
    /// Bound user id, if logged in.
    pub fn user_id(&self) -> Option<UserId> {
        self.state.lock().unwrap().user_id
    }

    /// Binds a user and marks the connection logged in.
    pub fn bind_user(&self, user_id: UserId) {
        let mut st = self.state.lock().unwrap();
        st.user_id = Some(user_id);
        st.logged_in = true;
    }

    /// Whether the connection has completed login.
    pub fn is_logged_in(&self) -> bool {
        self.state.lock().unwrap().logged_in
    }

    /// Per-connection recovering flag, set during recovery and cleared
    /// after world re-entry.
    pub fn set_recovering(&self, recovering: bool) {
        self.state.lock().unwrap().recovering = recovering;
    }

    /// Whether the connection is mid-recovery.
    pub fn is_recovering(&self) -> bool {
        self.state.lock().unwrap().recovering
    }

    /// Appends a named input handler.
    pub fn add_input_handler(&self, name: &'static str) {
        self.state.lock().unwrap().handlers.push(name);
    }

    /// The attached handler chain, in order.
    pub fn input_handlers(&self) -> Vec<&'static str> {
        self.state.lock().unwrap().handlers.clone()
    }

    /// The kernel stream, for FD extraction. `None` for non-inheritable
    /// transports.
    pub fn stream(&self) -> Option<&TcpStream> {
        self.stream.as_ref()
    }

    /// Best-effort write to the peer.
    pub fn send_raw(&self, bytes: &[u8]) -> bool {
        match &self.stream {
            Some(stream) => {
                let mut stream = stream;
                match stream.write_all(bytes) {
                    Ok(()) => true,
                    Err(err) => {
                        tracing::debug!(conn = self.id, error = %err, "write to peer failed");
                        false
                    }
                }
            }
            None => false,
        }
    }
}

/// Registry of live connections.
pub struct ConnectionManager {
    conns: DashMap<ConnectionId, Arc<Connection>>,
    counter: AtomicU64,
}

impl Default for ConnectionManager {
    fn default() -> Self {
        Self::new()
    }
}

impl ConnectionManager {
    /// Creates an empty manager.
    pub fn new() -> Self {
        Self {
            conns: DashMap::new(),
            counter: AtomicU64::new(0),
        }
    }

    /// Adds a freshly accepted connection, minting its id.
    pub fn add(
        &self,
        transport: Transport,
        stream: Option<TcpStream>,
        remote_addr: String,
    ) -> Arc<Connection> {
        let id = self.counter.fetch_add(1, AtomicOrdering::SeqCst) + 1;
        self.insert(id, transport, stream, remote_addr)
    }

    /// Re-creates a connection under its original id (recovery path) and
    /// advances the mint counter past it.
    pub fn add_with_id(
        &self,
        id: ConnectionId,
        transport: Transport,
        stream: Option<TcpStream>,
        remote_addr: String,
    ) -> Arc<Connection> {
        self.counter.fetch_max(id, AtomicOrdering::SeqCst);
        self.insert(id, transport, stream, remote_addr)
    }

    fn insert(
        &self,
        id: ConnectionId,
        transport: Transport,
        stream: Option<TcpStream>,
        remote_addr: String,
    ) -> Arc<Connection> {
        let conn = Arc::new(Connection {
            id,
            transport,
            remote_addr,
            stream,
            state: Mutex::new(ConnState {
                user_id: None,
                logged_in: false,
                recovering: false,
                handlers: Vec::new(),
            }),
        });
        self.conns.insert(id, Arc::clone(&conn));
        conn
    }

    /// Looks up a connection.
    pub fn get(&self, id: ConnectionId) -> Option<Arc<Connection>> {
        self.conns.get(&id).map(|c| Arc::clone(&c))
    }

    /// Removes a connection (peer gone or dropped at copyover).
    pub fn remove(&self, id: ConnectionId) -> Option<Arc<Connection>> {
        self.conns.remove(&id).map(|(_, c)| c)
    }

    /// Sorted ids of all live connections. The copyover gather walks this
    /// order, which therefore becomes the inherited-FD order after the
    /// listeners.
    pub fn ids(&self) -> Vec<ConnectionId> {
        let mut ids: Vec<ConnectionId> = self.conns.iter().map(|e| *e.key()).collect();
        ids.sort_unstable();
        ids
    }

    /// Number of live connections.
    pub fn len(&self) -> usize {
        self.conns.len()
    }

    /// True when no connections are live.
    pub fn is_empty(&self) -> bool {
        self.conns.is_empty()
    }

    /// Best-effort write to one peer.
    pub fn send_to(&self, id: ConnectionId, bytes: &[u8]) -> bool {
        match self.get(id) {
            Some(conn) => conn.send_raw(bytes),
            None => false,
        }
    }

    /// Best-effort write to every logged-in peer.
    pub fn broadcast(&self, text: &str) {
        let framed = format!("\r\n{text}\r\n");
        for entry in self.conns.iter() {
            let conn = entry.value();
            if conn.is_logged_in() {
                conn.send_raw(framed.as_bytes());
            }
        }
    }

    /// Attaches the standard post-login handler chain.
    pub fn attach_login_handlers(&self, conn: &Connection) {
        for handler in LOGIN_HANDLERS {
            conn.add_input_handler(handler);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn loopback_pair() -> (TcpStream, TcpStream) {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let client = TcpStream::connect(addr).unwrap();
        let (server, _) = listener.accept().unwrap();
        (client, server)
    }

    #[test]
    fn minted_ids_are_monotonic() {
        let mgr = ConnectionManager::new();
        let a = mgr.add(Transport::Telnet, None, "127.0.0.1:1".into());
        let b = mgr.add(Transport::Telnet, None, "127.0.0.1:2".into());
        assert_eq!((a.id, b.id), (1, 2));
        assert_eq!(mgr.ids(), vec![1, 2]);
    }

    #[test]
    fn recovery_ids_advance_the_counter() {
        let mgr = ConnectionManager::new();
        mgr.add_with_id(41, Transport::Telnet, None, "127.0.0.1:1".into());
        let next = mgr.add(Transport::Telnet, None, "127.0.0.1:2".into());
        assert_eq!(next.id, 42);
    }

    #[test]
    fn login_handler_chain_is_attached_in_order() {
        let mgr = ConnectionManager::new();
        let conn = mgr.add(Transport::Telnet, None, "127.0.0.1:1".into());
        mgr.attach_login_handlers(&conn);
        assert_eq!(conn.input_handlers(), LOGIN_HANDLERS.to_vec());
    }

    #[test]
    fn broadcast_reaches_only_logged_in_peers() {
        use std::io::Read;

        let mgr = ConnectionManager::new();
        let (mut logged_in_peer, server_a) = loopback_pair();
        let (anonymous_peer, server_b) = loopback_pair();

        let a = mgr.add(Transport::Telnet, Some(server_a), "a".into());
        a.bind_user(7);
        mgr.add(Transport::Telnet, Some(server_b), "b".into());

        mgr.broadcast("The world holds its breath.");
        drop(a);
        drop(mgr);

        let mut text = String::new();
        logged_in_peer.read_to_string(&mut text).unwrap();
        assert!(text.contains("The world holds its breath."));

        let mut anonymous_peer = anonymous_peer;
        anonymous_peer
            .set_read_timeout(Some(std::time::Duration::from_millis(50)))
            .unwrap();
        let mut buf = [0u8; 16];
        match anonymous_peer.read(&mut buf) {
            Ok(0) => {}
            Ok(n) => panic!("anonymous peer received {n} bytes"),
            Err(_) => {} // timeout: nothing was sent
        }
    }

    #[test]
    fn send_to_missing_connection_is_false() {
        let mgr = ConnectionManager::new();
        assert!(!mgr.send_to(99, b"hello"));
    }
}
