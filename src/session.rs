use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

use crate::proxy::{ProxySocket, VirtualConn};

/// Session pairs a virtual connection with its proxy-relayed socket.
///
/// The socket is exclusively owned by the session once created and is
/// closed exactly once on teardown. The idle deadline is shared between
/// the forwarding loop (refreshed on every successful read) and the send
/// path (refreshed before every write), so an active flow never times out
/// mid-conversation.
pub struct Session {
    /// Reference to the packet engine's connection, used for lookup
    /// and inbound delivery
    pub conn: Arc<dyn VirtualConn>,

    /// Proxy-relayed datagram socket for this flow
    pub socket: Arc<dyn ProxySocket>,

    /// Idle deadline; the forwarding loop terminates once it passes
    deadline: Mutex<Instant>,
}

/// Session implementation block
impl Session {
    /// new builds a session with its deadline armed `timeout` from now
    pub fn new(
        conn: Arc<dyn VirtualConn>,
        socket: Arc<dyn ProxySocket>,
        timeout: Duration,
    ) -> Self {
        Self {
            conn,
            socket,
            deadline: Mutex::new(Instant::now() + timeout),
        }
    }

    /// refresh pushes the idle deadline to now + `timeout`
    pub async fn refresh(&self, timeout: Duration) {
        let mut deadline = self.deadline.lock().await;
        *deadline = Instant::now() + timeout;
    }

    /// deadline returns the current idle deadline
    pub async fn deadline(&self) -> Instant {
        *self.deadline.lock().await
    }
}

/// SessionTable is the sole owner of the connection -> session mapping.
///
/// All access goes through put/get/remove; each operation holds the lock
/// for its full duration and the lock is never held across socket I/O.
#[derive(Default)]
pub struct SessionTable {
    /// Active sessions keyed by the virtual connection's local address
    sessions: Mutex<HashMap<SocketAddr, Arc<Session>>>,
}

/// SessionTable implementation block
impl SessionTable {
    /// new is a SessionTable constructor
    pub fn new() -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
        }
    }

    /// put inserts or replaces the session for a connection, returning any
    /// displaced session. Closing a displaced session is the caller's
    /// responsibility; no automatic displacement-close happens here.
    pub async fn put(&self, key: SocketAddr, session: Arc<Session>) -> Option<Arc<Session>> {
        self.sessions.lock().await.insert(key, session)
    }

    /// get resolves a connection to its active session, if any
    pub async fn get(&self, key: &SocketAddr) -> Option<Arc<Session>> {
        self.sessions.lock().await.get(key).cloned()
    }

    /// remove deletes and returns the entry; no-op when absent
    pub async fn remove(&self, key: &SocketAddr) -> Option<Arc<Session>> {
        self.sessions.lock().await.remove(key)
    }

    /// len returns the number of active sessions
    pub async fn len(&self) -> usize {
        self.sessions.lock().await.len()
    }

    /// is_empty reports whether no sessions are active
    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}
