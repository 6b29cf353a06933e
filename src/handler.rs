use anyhow::{Context, Result, bail};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{Instant, timeout_at};
use tracing::{debug, error, info};

use crate::pool::BufferPool;
use crate::proxy::{ProxyClient, VirtualConn};
use crate::session::{Session, SessionTable};

/// Default idle timeout for proxy-relayed sockets
pub const DEFAULT_UDP_TIMEOUT: Duration = Duration::from_secs(30);

/// UdpHandler relays UDP flows from a virtual packet engine through a
/// remote proxy.
///
/// Each connected flow gets its own proxy-relayed socket and one
/// forwarding task draining it. Sessions end on read error, idle
/// timeout, delivery error, or an explicit close from the engine; one
/// session's failure never affects the others.
pub struct UdpHandler {
    /// Proxy collaborator that opens relayed sockets
    client: Arc<dyn ProxyClient>,

    /// Idle timeout applied to every session's socket
    timeout: Duration,

    /// Registry of active sessions
    table: SessionTable,

    /// Pool supplying the forwarding loops' read buffers
    pool: Arc<BufferPool>,
}

/// UdpHandler implementation block
impl UdpHandler {
    /// new is a UdpHandler constructor
    pub fn new(client: Arc<dyn ProxyClient>, timeout: Duration) -> Self {
        Self {
            client,
            timeout,
            table: SessionTable::new(),
            pool: Arc::new(BufferPool::new()),
        }
    }

    /// with_pool applies a shared buffer pool
    pub fn with_pool(mut self, pool: Arc<BufferPool>) -> Self {
        self.pool = pool;
        self
    }

    /// connect establishes a session for a virtual connection.
    ///
    /// Opens a proxy-relayed socket, registers the session, and starts one
    /// forwarding task for it. On failure the error is returned and no
    /// state is created. Must be called exactly once before send.
    pub async fn connect(
        self: &Arc<Self>,
        conn: Arc<dyn VirtualConn>,
        target: SocketAddr,
    ) -> Result<()> {
        let local = conn.local_addr();

        // Open the relayed socket first; no table mutation on failure.
        // The socket is destination-agnostic, so `target` only informs
        // the engine's routing, not ours.
        let socket = self.client.open_relayed_socket().await?;

        // DEBUG
        info!("UDP session opened: {} (target {})", local, target);

        let session = Arc::new(Session::new(conn, socket, self.timeout));

        // Register the session. A displaced entry means the engine broke
        // the contract of closing before reconnecting.
        if self.table.put(local, Arc::clone(&session)).await.is_some() {
            error!("displaced a live session for {}", local);
        }

        // Spawn the one forwarding task for this session
        tokio::spawn(forward_loop(Arc::clone(self), session));

        Ok(())
    }

    /// send relays one outbound datagram to `dest` through the flow's
    /// proxy socket, refreshing the idle deadline before the write.
    ///
    /// Fails when no session exists for the connection. Write errors are
    /// surfaced to the caller but do not tear down the session; only the
    /// forwarding loop or an explicit close does that.
    pub async fn send(
        &self,
        conn: &dyn VirtualConn,
        payload: &[u8],
        dest: SocketAddr,
    ) -> Result<()> {
        let local = conn.local_addr();

        // Resolve the session under the table lock; I/O happens outside it
        let Some(session) = self.table.get(&local).await else {
            bail!("connection {}->{} does not exist", local, dest);
        };

        // Refresh the deadline so an active flow never times out, then
        // bound the write by the same deadline
        session.refresh(self.timeout).await;
        let deadline = session.deadline().await;

        match timeout_at(deadline, session.socket.send_to(payload, dest)).await {
            Ok(Ok(n)) => {
                // DEBUG
                debug!("forwarded {} bytes: {} -> {}", n, local, dest);
                Ok(())
            }
            Ok(Err(e)) => Err(e).with_context(|| format!("failed to relay datagram to {dest}")),
            Err(_) => bail!("relay to {dest} timed out"),
        }
    }

    /// close tears a session down: closes the virtual connection, removes
    /// the table entry, and closes the proxy socket exactly once.
    ///
    /// Idempotent; safe to call with no session present and safe to race
    /// with the forwarding loop's own teardown.
    pub async fn close(&self, conn: &dyn VirtualConn) {
        conn.close();

        if let Some(session) = self.table.remove(&conn.local_addr()).await {
            session.socket.close();

            // DEBUG
            debug!("UDP session closed: {}", conn.local_addr());
        }
    }

    /// active_sessions returns the number of live sessions
    pub async fn active_sessions(&self) -> usize {
        self.table.len().await
    }
}

/// forward_loop drains one session's proxy socket and delivers inbound
/// datagrams into the virtual connection, under the idle deadline.
///
/// Terminates on read error, deadline expiry, an un-parseable source
/// address, or a delivery error, then releases its buffer and runs the
/// idempotent teardown.
async fn forward_loop(handler: Arc<UdpHandler>, session: Arc<Session>) {
    let local = session.conn.local_addr();

    // One pooled buffer for the lifetime of the loop
    let mut buf = handler.pool.acquire().await;

    loop {
        // The deadline was armed at session creation and is refreshed by
        // every send and successful read
        let deadline = session.deadline().await;

        match timeout_at(deadline, session.socket.recv_from(&mut buf)).await {
            // Deadline passed while blocked; a concurrent send may have
            // pushed it forward, in which case the read is re-armed
            Err(_) => {
                if session.deadline().await > Instant::now() {
                    continue;
                }

                debug!("UDP session idle timeout: {}", local);
                break;
            }
            Ok(Err(e)) => {
                debug!("UDP read error for {}: {}", local, e);
                break;
            }
            Ok(Ok((n, from))) => {
                // Successful read; push the idle deadline forward
                session.refresh(handler.timeout).await;

                // The proxy reports resolved IPs, so the address is parsed
                // literally; no name resolution happens here
                let src: SocketAddr = match from.parse() {
                    Ok(addr) => addr,
                    Err(e) => {
                        error!("bad source address '{}' for {}: {}", from, local, e);
                        break;
                    }
                };

                // Deliver into the virtual stack, tagged with the source
                if let Err(e) = session.conn.write_from(&buf[..n], src).await {
                    debug!("delivery error for {}: {}", local, e);
                    break;
                }

                // DEBUG
                debug!("delivered {} bytes: {} -> {}", n, src, local);
            }
        }
    }

    // Return the buffer, then tear down; close is idempotent with any
    // external close racing this one
    handler.pool.release(buf).await;
    handler.close(session.conn.as_ref()).await;
}
