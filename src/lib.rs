//! A UDP session relay between a virtual network interface and a remote proxy
//!
//! ## Session layer
//!
//! - Features:
//!     - One proxy-relayed datagram socket per virtual UDP flow
//!     - Mutex-guarded session table as the single source of truth
//!     - One async forwarding task per session -> inbound data flows back
//!       into the virtual stack tagged with its resolved source address
//!     - Shared idle-timeout deadline, refreshed on every send and read
//!     - Pooled packet buffers with guaranteed release
//!     - Proxy client, packet engine, and output sink stay behind traits
//!
//! # Example
//! ```no_run
//! use std::sync::Arc;
//! use tunrelay::{Tunnel, TunnelConfig};
//! # use tunrelay::{PacketSink, ProxyClientFactory};
//! # fn wire(sink: Arc<dyn PacketSink>, factory: &dyn ProxyClientFactory) -> anyhow::Result<()> {
//! let config = TunnelConfig {
//!     host: "198.51.100.7".to_string(),
//!     port: 8388,
//!     password: "secret".to_string(),
//!     cipher: "chacha20-ietf-poly1305".to_string(),
//!     prefix: None,
//!     udp_enabled: true,
//! };
//!
//! let tunnel = Tunnel::connect(config, sink, factory)?;
//! let _udp = tunnel.udp_handler().expect("udp enabled");
//! # Ok(())
//! # }
//! ```

pub mod handler;
pub mod pool;
pub mod proxy;
pub mod session;
pub mod tunnel;

// Re-export main types at crate root for convenience
pub use handler::{DEFAULT_UDP_TIMEOUT, UdpHandler};
pub use pool::{BufferPool, MAX_DATAGRAM};
pub use proxy::{
    PacketSink, ProxyClient, ProxyClientFactory, ProxyConfig, ProxySocket, VirtualConn,
};
pub use session::{Session, SessionTable};
pub use tunnel::{Tunnel, TunnelConfig};
