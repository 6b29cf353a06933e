use anyhow::{Context, Result, bail};
use std::sync::Arc;
use tracing::{error, info};

use crate::handler::{DEFAULT_UDP_TIMEOUT, UdpHandler};
use crate::proxy::{PacketSink, ProxyClientFactory, ProxyConfig};

/// TunnelConfig holds the construction-time parameters for a tunnel
#[derive(Debug, Clone)]
pub struct TunnelConfig {
    /// Proxy server IP address or hostname
    pub host: String,

    /// Proxy server port; must be in 1-65535
    pub port: u16,

    /// Proxy credential
    pub password: String,

    /// Encryption cipher identifier; validated by the proxy client factory
    pub cipher: String,

    /// Optional fixed salt prefix for connection-establishment obfuscation
    pub prefix: Option<Vec<u8>>,

    /// Whether UDP relaying is enabled for this tunnel
    pub udp_enabled: bool,
}

/// Tunnel wires a proxy client and an output sink into the UDP session
/// layer. Construction validates the configuration and fails fast; no
/// partial state is created on error.
pub struct Tunnel {
    /// Output device for the packet engine
    sink: Arc<dyn PacketSink>,

    /// UDP session handler; absent when UDP relaying is disabled
    udp: Option<Arc<UdpHandler>>,
}

impl std::fmt::Debug for Tunnel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Tunnel")
            .field("udp_enabled", &self.udp.is_some())
            .finish_non_exhaustive()
    }
}

/// Tunnel implementation block
impl Tunnel {
    /// connect validates `config`, constructs the proxy client through
    /// `factory`, and wires the session layer.
    ///
    /// Fails with a descriptive error on an invalid port or when the
    /// proxy client cannot be constructed (e.g. unsupported cipher).
    pub fn connect(
        config: TunnelConfig,
        sink: Arc<dyn PacketSink>,
        factory: &dyn ProxyClientFactory,
    ) -> Result<Self> {
        // Validate the port range up front
        if config.port == 0 {
            bail!("[ERR] invalid port number: {}", config.port);
        }

        // Build the proxy client; an unsupported cipher or bad transport
        // configuration surfaces here
        let proxy_config = ProxyConfig {
            host: config.host.clone(),
            port: config.port,
            password: config.password.clone(),
            cipher: config.cipher.clone(),
            prefix: config.prefix.clone(),
        };

        let client = factory
            .new_client(&proxy_config)
            .context("[ERR] failed to construct proxy client")?;

        // Wire the UDP session layer when relaying is enabled
        let udp = config.udp_enabled.then(|| {
            Arc::new(UdpHandler::new(
                Arc::clone(&client),
                DEFAULT_UDP_TIMEOUT,
            ))
        });

        // DEBUG
        info!(
            "tunnel connected: {}:{} (udp: {})",
            config.host, config.port, config.udp_enabled
        );

        Ok(Self { sink, udp })
    }

    /// udp_handler returns the UDP session handler, if UDP is enabled
    pub fn udp_handler(&self) -> Option<Arc<UdpHandler>> {
        self.udp.clone()
    }

    /// is_udp_enabled reports whether UDP relaying is active
    pub fn is_udp_enabled(&self) -> bool {
        self.udp.is_some()
    }

    /// disconnect closes the output sink; safe to call more than once
    pub fn disconnect(&self) {
        if let Err(e) = self.sink.close() {
            error!("failed to close packet sink: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proxy::{ProxyClient, ProxySocket};
    use anyhow::anyhow;
    use async_trait::async_trait;
    use std::io;
    use std::sync::atomic::{AtomicBool, Ordering};

    struct NullSink {
        closed: AtomicBool,
    }

    impl NullSink {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                closed: AtomicBool::new(false),
            })
        }
    }

    impl PacketSink for NullSink {
        fn write_packet(&self, packet: &[u8]) -> io::Result<usize> {
            Ok(packet.len())
        }

        fn close(&self) -> io::Result<()> {
            self.closed.store(true, Ordering::SeqCst);
            Ok(())
        }
    }

    struct NullClient;

    #[async_trait]
    impl ProxyClient for NullClient {
        async fn open_relayed_socket(&self) -> Result<Arc<dyn ProxySocket>> {
            Err(anyhow!("not implemented"))
        }
    }

    struct StubFactory {
        supported_cipher: &'static str,
    }

    impl ProxyClientFactory for StubFactory {
        fn new_client(&self, config: &ProxyConfig) -> Result<Arc<dyn ProxyClient>> {
            if config.cipher != self.supported_cipher {
                bail!("unsupported cipher: {}", config.cipher);
            }
            Ok(Arc::new(NullClient))
        }
    }

    fn config(port: u16, cipher: &str, udp_enabled: bool) -> TunnelConfig {
        TunnelConfig {
            host: "198.51.100.7".to_string(),
            port,
            password: "hunter2".to_string(),
            cipher: cipher.to_string(),
            prefix: None,
            udp_enabled,
        }
    }

    const CIPHER: &str = "chacha20-ietf-poly1305";

    #[test]
    fn rejects_port_zero() {
        let factory = StubFactory {
            supported_cipher: CIPHER,
        };
        let err = Tunnel::connect(config(0, CIPHER, true), NullSink::new(), &factory)
            .expect_err("port 0 must be rejected");
        assert!(err.to_string().contains("invalid port"));
    }

    #[test]
    fn surfaces_client_construction_failure() {
        let factory = StubFactory {
            supported_cipher: CIPHER,
        };
        let err = Tunnel::connect(config(8388, "rot13", true), NullSink::new(), &factory)
            .expect_err("unsupported cipher must be rejected");
        assert!(format!("{err:#}").contains("unsupported cipher"));
    }

    #[test]
    fn udp_disabled_leaves_no_handler() {
        let factory = StubFactory {
            supported_cipher: CIPHER,
        };
        let tunnel = Tunnel::connect(config(8388, CIPHER, false), NullSink::new(), &factory)
            .expect("tunnel should connect");
        assert!(!tunnel.is_udp_enabled());
        assert!(tunnel.udp_handler().is_none());
    }

    #[test]
    fn disconnect_closes_sink() {
        let factory = StubFactory {
            supported_cipher: CIPHER,
        };
        let sink = NullSink::new();
        let tunnel = Tunnel::connect(config(8388, CIPHER, true), sink.clone(), &factory)
            .expect("tunnel should connect");
        assert!(tunnel.is_udp_enabled());

        tunnel.disconnect();
        assert!(sink.closed.load(Ordering::SeqCst));

        // Idempotent
        tunnel.disconnect();
    }
}
