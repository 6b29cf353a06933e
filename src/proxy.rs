use anyhow::Result;
use async_trait::async_trait;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

/// ProxyClient is the boundary contract with the proxy collaborator.
///
/// Implementations own the authenticated, encrypted transport to the
/// remote proxy server; this layer only asks them for relayed datagram
/// sockets.
#[async_trait]
pub trait ProxyClient: Send + Sync {
    /// open_relayed_socket binds a new datagram socket whose traffic is
    /// routed through the proxy server. The socket is not bound to any
    /// destination and can reach any host the proxy relays to.
    ///
    /// Fails on authentication, transport, or resource exhaustion errors.
    async fn open_relayed_socket(&self) -> Result<Arc<dyn ProxySocket>>;
}

/// ProxySocket is a proxy-relayed datagram socket.
///
/// Sockets are exclusively owned by one session once created; this layer
/// never shares them across sessions. Read/write deadlines are enforced
/// by the session layer with `tokio::time::timeout_at`, so implementations
/// only need plain blocking semantics.
#[async_trait]
pub trait ProxySocket: Send + Sync {
    /// recv_from reads one inbound datagram into `buf` and returns the
    /// number of bytes read plus the source address as text.
    ///
    /// The proxy guarantees the address is an already-resolved IP; callers
    /// parse it literally and never perform DNS resolution.
    async fn recv_from(&self, buf: &mut [u8]) -> io::Result<(usize, String)>;

    /// send_to relays one datagram to `dest` through the proxy
    async fn send_to(&self, data: &[u8], dest: SocketAddr) -> io::Result<usize>;

    /// close releases the socket and unblocks any pending read.
    /// Must be safe to call more than once.
    fn close(&self);
}

/// VirtualConn is one UDP flow as seen by the external packet engine.
///
/// This layer treats it as an opaque key plus a write capability and a
/// close capability; the engine retains ownership of the connection.
#[async_trait]
pub trait VirtualConn: Send + Sync {
    /// local_addr identifies the flow; used as the session table key
    fn local_addr(&self) -> SocketAddr;

    /// write_from delivers an inbound datagram, tagged with its source
    /// address, back into the virtual protocol stack
    async fn write_from(&self, data: &[u8], src: SocketAddr) -> io::Result<usize>;

    /// close signals that this layer is done with the connection.
    /// Must be safe to call more than once.
    fn close(&self);
}

/// PacketSink is the output device handed over at tunnel bootstrap,
/// used by the packet engine to emit raw packets toward the TUN.
pub trait PacketSink: Send + Sync {
    /// write_packet outputs one raw packet
    fn write_packet(&self, packet: &[u8]) -> io::Result<usize>;

    /// close shuts the sink down; safe to call more than once
    fn close(&self) -> io::Result<()>;
}

/// ProxyConfig holds the parameters a proxy client is constructed from
#[derive(Debug, Clone)]
pub struct ProxyConfig {
    /// Proxy server IP address or hostname
    pub host: String,

    /// Proxy server port
    pub port: u16,

    /// Proxy credential
    pub password: String,

    /// Cipher identifier, validated by the client factory
    pub cipher: String,

    /// Optional fixed salt prefix for connection-establishment obfuscation
    pub prefix: Option<Vec<u8>>,
}

/// ProxyClientFactory constructs proxy clients at bootstrap time.
///
/// Fails with a descriptive error when the configuration cannot be turned
/// into a working client (e.g. an unsupported cipher).
pub trait ProxyClientFactory: Send + Sync {
    /// new_client builds a proxy client from the given configuration
    fn new_client(&self, config: &ProxyConfig) -> Result<Arc<dyn ProxyClient>>;
}
