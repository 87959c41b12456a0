use std::{
    net::{IpAddr, Ipv4Addr, SocketAddr},
    time::Duration,
};

pub const DEFAULT_PORT: u16 = 13000;
/// Each read yields at most this many bytes and is decoded as one command.
pub const DEFAULT_READ_BUFFER: usize = 256;
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(300);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    pub bind: IpAddr,
    pub port: u16,
    pub read_buffer: usize,
    /// Connections silent for this long are closed. `None` waits forever.
    pub idle_timeout: Option<Duration>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            port: DEFAULT_PORT,
            read_buffer: DEFAULT_READ_BUFFER,
            idle_timeout: Some(DEFAULT_IDLE_TIMEOUT),
        }
    }
}

impl ServerConfig {
    pub fn new(bind: IpAddr, port: u16) -> Self {
        Self {
            bind,
            port,
            ..Self::default()
        }
    }

    pub fn with_idle_timeout(mut self, idle_timeout: Option<Duration>) -> Self {
        self.idle_timeout = idle_timeout;
        self
    }

    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind, self.port)
    }

    /// Whether the bind address is reachable only from a local network.
    pub fn is_local_network(&self) -> bool {
        match self.bind {
            IpAddr::V4(ip) => {
                ip.is_private() || ip.is_loopback() || ip.is_link_local() || ip.is_unspecified()
            }
            IpAddr::V6(ip) => {
                ip.is_loopback()
                    || ip.is_unspecified()
                    // fc00::/7 unique local, fe80::/10 link local
                    || (ip.segments()[0] & 0xfe00) == 0xfc00
                    || (ip.segments()[0] & 0xffc0) == 0xfe80
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_listen_on_any_address() {
        let config = ServerConfig::default();
        assert_eq!(config.socket_addr(), "0.0.0.0:13000".parse().unwrap());
        assert_eq!(config.read_buffer, 256);
    }

    #[test]
    fn classifies_bind_addresses() {
        for local in ["192.168.1.20", "172.16.0.1", "172.31.255.1", "10.1.2.3", "127.0.0.1", "::1"] {
            let config = ServerConfig::new(local.parse().unwrap(), 0);
            assert!(config.is_local_network(), "{local} should be local");
        }
        for public in ["172.32.0.1", "8.8.8.8", "2001:db8::1"] {
            let config = ServerConfig::new(public.parse().unwrap(), 0);
            assert!(!config.is_local_network(), "{public} should not be local");
        }
    }
}
