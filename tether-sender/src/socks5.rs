//! SOCKS5 tunnelling for [`crate::TcpConnector`].
//!
//! # Example
//! ```rust,no_run
//! use tether_sender::{Socks5Config, TcpConnector};
//!
//! let connector = TcpConnector {
//!     socks5: Some(Socks5Config::new("127.0.0.1:1080").with_credentials("user", "secret")),
//!     ..Default::default()
//! };
//! ```

use std::io;

use tokio::net::TcpStream;
use tokio_socks::tcp::Socks5Stream;

/// Username/password pair for proxies that require RFC 1929 auth.
#[derive(Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Socks5Credentials {
    pub username: String,
    pub password: String,
}

impl std::fmt::Debug for Socks5Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Socks5Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Proxy every connection through a SOCKS5 server.
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Socks5Config {
    /// `host:port` of the proxy.
    pub proxy_addr: String,
    pub credentials: Option<Socks5Credentials>,
}

impl Socks5Config {
    pub fn new(proxy_addr: impl Into<String>) -> Self {
        Self { proxy_addr: proxy_addr.into(), credentials: None }
    }

    pub fn with_credentials(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.credentials =
            Some(Socks5Credentials { username: username.into(), password: password.into() });
        self
    }

    /// A TCP stream to `target`, tunnelled through the proxy.
    pub async fn connect(&self, target: &str) -> io::Result<TcpStream> {
        tracing::debug!("[tether] socks5 {} -> {target}", self.proxy_addr);
        let proxy = self.proxy_addr.as_str();
        let tunnel = match &self.credentials {
            Some(c) => {
                Socks5Stream::connect_with_password(proxy, target, &c.username, &c.password).await
            }
            None => Socks5Stream::connect(proxy, target).await,
        };
        tunnel.map(Socks5Stream::into_inner).map_err(|e| match e {
            tokio_socks::Error::Io(e) => e,
            other => io::Error::new(io::ErrorKind::ConnectionRefused, other),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn debug_hides_password() {
        let config = Socks5Config::new("10.0.0.1:1080").with_credentials("alice", "hunter2");
        let shown = format!("{config:?}");
        assert!(shown.contains("alice"));
        assert!(!shown.contains("hunter2"));
    }

    #[tokio::test]
    async fn unreachable_proxy_is_an_io_error() {
        // Nothing listens on port 1 of the loopback interface.
        let config = Socks5Config::new("127.0.0.1:1");
        assert!(config.connect("149.154.167.51:443").await.is_err());
    }
}
