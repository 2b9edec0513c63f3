//! TCP reachability probe.

use std::time::Duration;
use tokio::net::TcpStream;
use tracing::debug;

/// Default connect timeout used when a caller has no better value.
pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(2);

/// Returns `true` if a TCP connection to `host:port` completes within
/// `timeout`. Never fails: every socket error maps to `false`. The
/// connection is dropped immediately.
pub async fn is_reachable(host: &str, port: u16, timeout: Duration) -> bool {
    match tokio::time::timeout(timeout, TcpStream::connect((host, port))).await {
        Ok(Ok(stream)) => {
            drop(stream);
            true
        }
        Ok(Err(e)) => {
            debug!(host, port, error = %e, "Port unreachable");
            false
        }
        Err(_) => {
            debug!(host, port, timeout_ms = timeout.as_millis() as u64, "Port probe timed out");
            false
        }
    }
}

/// Reachability probe with a fixed timeout, injected into the components
/// that need it.
#[derive(Debug, Clone, Copy)]
pub struct PortProbe {
    timeout: Duration,
}

impl PortProbe {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub async fn is_reachable(&self, host: &str, port: u16) -> bool {
        is_reachable(host, port, self.timeout).await
    }

    /// Probe a `host:port` address string. Unparseable addresses are
    /// unreachable.
    pub async fn is_address_reachable(&self, address: &str) -> bool {
        match split_address(address) {
            Some((host, port)) => self.is_reachable(host, port).await,
            None => false,
        }
    }
}

impl Default for PortProbe {
    fn default() -> Self {
        Self::new(DEFAULT_PROBE_TIMEOUT)
    }
}

/// Split `host:port` on the last colon.
pub fn split_address(address: &str) -> Option<(&str, u16)> {
    let (host, port) = address.rsplit_once(':')?;
    if host.is_empty() {
        return None;
    }
    port.parse().ok().map(|p| (host, p))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn test_reachable_when_listening() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        assert!(is_reachable("127.0.0.1", port, Duration::from_secs(1)).await);
    }

    #[tokio::test]
    async fn test_unreachable_after_listener_dropped() {
        let port = {
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            listener.local_addr().unwrap().port()
        };
        assert!(!is_reachable("127.0.0.1", port, Duration::from_millis(500)).await);
    }

    #[tokio::test]
    async fn test_unresolvable_host_is_false() {
        let probe = PortProbe::new(Duration::from_millis(500));
        assert!(!probe.is_reachable("host.invalid", 80).await);
        assert!(!probe.is_address_reachable("no-port-here").await);
    }

    #[tokio::test]
    async fn test_address_probe() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        assert!(PortProbe::default().is_address_reachable(&addr).await);
    }

    #[test]
    fn test_split_address() {
        assert_eq!(split_address("127.0.0.1:62001"), Some(("127.0.0.1", 62001)));
        assert_eq!(split_address("localhost:5555"), Some(("localhost", 5555)));
        assert_eq!(split_address("emulator-5554"), None);
        assert_eq!(split_address(":5555"), None);
        assert_eq!(split_address("127.0.0.1:notaport"), None);
    }
}
