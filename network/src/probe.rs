//! Liveness probing shared by discovery, routing and the coordinator.

use std::collections::HashSet;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::net::TcpStream;

/// Checks whether something is listening at an address.
#[async_trait]
pub trait Prober: Send + Sync {
    /// `true` if the address accepted a connection within `timeout`.
    async fn probe(&self, address: &str, timeout: Duration) -> bool;
}

/// Probes by opening (and immediately dropping) a TCP connection.
#[derive(Debug, Default, Clone, Copy)]
pub struct TcpProber;

#[async_trait]
impl Prober for TcpProber {
    async fn probe(&self, address: &str, timeout: Duration) -> bool {
        match tokio::time::timeout(timeout, TcpStream::connect(address)).await {
            Ok(Ok(_)) => true,
            Ok(Err(e)) => {
                tracing::trace!(address, "probe failed: {e}");
                false
            }
            Err(_) => {
                tracing::trace!(address, "probe timed out");
                false
            }
        }
    }
}

/// Nullable prober: an address is reachable only after
/// [`set_reachable`](Self::set_reachable). Counts every probe.
#[derive(Debug, Default)]
pub struct NullProber {
    reachable: Mutex<HashSet<String>>,
    probes: Mutex<Vec<String>>,
}

impl NullProber {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_reachable(&self, address: &str, up: bool) {
        let mut reachable = self.reachable.lock();
        if up {
            reachable.insert(address.to_string());
        } else {
            reachable.remove(address);
        }
    }

    /// Addresses probed so far, in order.
    pub fn probes(&self) -> Vec<String> {
        self.probes.lock().clone()
    }
}

#[async_trait]
impl Prober for NullProber {
    async fn probe(&self, address: &str, _timeout: Duration) -> bool {
        self.probes.lock().push(address.to_string());
        self.reachable.lock().contains(address)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn tcp_probe_detects_listener() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        assert!(TcpProber.probe(&addr, Duration::from_secs(1)).await);

        drop(listener);
        assert!(!TcpProber.probe(&addr, Duration::from_millis(200)).await);
    }

    #[tokio::test]
    async fn null_prober_follows_reachable_set() {
        let p = NullProber::new();
        assert!(!p.probe("a:1", Duration::ZERO).await);
        p.set_reachable("a:1", true);
        assert!(p.probe("a:1", Duration::ZERO).await);
        p.set_reachable("a:1", false);
        assert!(!p.probe("a:1", Duration::ZERO).await);
        assert_eq!(p.probes().len(), 3);
    }
}
