//! Connection pool: at most one live connection per peer identity.
//!
//! Dialing happens outside the pool lock. When two dials for the same peer
//! race, the connection registered first wins and the other is closed.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpStream;
use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;

use crate::connection::Connection;
use crate::NetworkError;

/// Pool limits and timeouts.
#[derive(Clone, Debug)]
pub struct PoolConfig {
    pub dial_timeout: Duration,
    pub max_idle: Duration,
    pub max_connections: usize,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            dial_timeout: Duration::from_secs(5),
            max_idle: Duration::from_secs(300),
            max_connections: 128,
        }
    }
}

pub struct ConnectionPool {
    config: PoolConfig,
    connections: Mutex<HashMap<String, Arc<Connection>>>,
    next_id: AtomicU64,
}

impl ConnectionPool {
    pub fn new(config: PoolConfig) -> Self {
        Self {
            config,
            connections: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    /// Id for a connection built outside the pool (inbound sessions).
    pub fn allocate_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Return the open connection for `peer_id`, dialing `address` if there
    /// is none. Dial failures are returned as-is; retrying is the caller's call.
    pub async fn acquire(
        &self,
        peer_id: &str,
        address: &str,
    ) -> Result<Arc<Connection>, NetworkError> {
        if let Some(existing) = self.get(peer_id).await {
            return Ok(existing);
        }

        let stream = self.dial(address).await?;
        let _ = stream.set_nodelay(true);
        let fresh = Arc::new(Connection::new(
            self.allocate_id(),
            peer_id,
            address,
            stream,
        ));

        let mut conns = self.connections.lock().await;
        if let Some(existing) = conns.get(peer_id).filter(|c| !c.is_closed()).cloned() {
            drop(conns);
            tracing::debug!(peer = peer_id, "lost dial race, keeping existing connection");
            fresh.close().await;
            return Ok(existing);
        }
        let live = conns.values().filter(|c| !c.is_closed()).count();
        if live >= self.config.max_connections {
            drop(conns);
            fresh.close().await;
            return Err(NetworkError::PoolFull(live));
        }
        conns.insert(peer_id.to_string(), fresh.clone());
        drop(conns);

        tracing::debug!(peer = peer_id, address, conn = fresh.id(), "dialed new connection");
        Ok(fresh)
    }

    async fn dial(&self, address: &str) -> Result<TcpStream, NetworkError> {
        match tokio::time::timeout(self.config.dial_timeout, TcpStream::connect(address)).await {
            Ok(Ok(stream)) => Ok(stream),
            Ok(Err(e)) => Err(NetworkError::Dial {
                address: address.to_string(),
                reason: e.to_string(),
            }),
            Err(_) => Err(NetworkError::Timeout(format!("dial {address}"))),
        }
    }

    /// Open connection for `peer_id`, if any.
    pub async fn get(&self, peer_id: &str) -> Option<Arc<Connection>> {
        self.connections
            .lock()
            .await
            .get(peer_id)
            .filter(|c| !c.is_closed())
            .cloned()
    }

    /// Register a connection built elsewhere. With `replace` set an existing
    /// connection is closed and superseded; otherwise the existing one is
    /// kept and `conn` is closed. Returns the connection left in the pool.
    pub async fn insert(&self, conn: Arc<Connection>, replace: bool) -> Arc<Connection> {
        let peer_id = conn.peer_id().to_string();
        let mut conns = self.connections.lock().await;
        let existing = conns.get(&peer_id).filter(|c| !c.is_closed()).cloned();
        let (kept, discarded) = match existing {
            Some(old) if !replace => (old, Some(conn)),
            old => {
                conns.insert(peer_id, conn.clone());
                (conn, old)
            }
        };
        drop(conns);

        if let Some(d) = discarded {
            d.close().await;
        }
        kept
    }

    /// Hand a connection back after use. It stays pooled unless it is closed
    /// or has been idle longer than `max_idle`.
    pub async fn release(&self, peer_id: &str, conn: Arc<Connection>) {
        if conn.is_closed() || conn.idle_for() > self.config.max_idle {
            self.remove_if(peer_id, conn.id()).await;
            conn.close().await;
            return;
        }
        let mut conns = self.connections.lock().await;
        conns.entry(peer_id.to_string()).or_insert(conn);
    }

    /// Force-close and forget the connection for `peer_id`.
    pub async fn remove(&self, peer_id: &str) -> bool {
        let removed = self.connections.lock().await.remove(peer_id);
        match removed {
            Some(conn) => {
                conn.close().await;
                true
            }
            None => false,
        }
    }

    /// Forget `peer_id` only if the pooled connection is still `conn_id`.
    pub async fn remove_if(&self, peer_id: &str, conn_id: u64) -> bool {
        let mut conns = self.connections.lock().await;
        if conns.get(peer_id).is_some_and(|c| c.id() == conn_id) {
            conns.remove(peer_id);
            true
        } else {
            false
        }
    }

    /// Close every connection idle longer than `max_idle`. Returns the
    /// affected peer ids.
    pub async fn sweep(&self) -> Vec<String> {
        let max_idle = self.config.max_idle;
        let mut expired = Vec::new();
        {
            let mut conns = self.connections.lock().await;
            conns.retain(|peer_id, conn| {
                if conn.is_closed() || conn.idle_for() > max_idle {
                    expired.push((peer_id.clone(), conn.clone()));
                    false
                } else {
                    true
                }
            });
        }

        let mut peers = Vec::with_capacity(expired.len());
        for (peer_id, conn) in expired {
            tracing::debug!(peer = %peer_id, idle_ms = conn.idle_for().as_millis() as u64, "evicting idle connection");
            conn.close().await;
            peers.push(peer_id);
        }
        peers
    }

    /// Run [`sweep`](Self::sweep) every `max_idle / 2` until shutdown.
    pub fn spawn_sweeper(
        self: &Arc<Self>,
        mut shutdown: broadcast::Receiver<()>,
    ) -> JoinHandle<()> {
        let pool = Arc::clone(self);
        let period = (self.config.max_idle / 2).max(Duration::from_millis(10));
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.tick().await;
            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        let evicted = pool.sweep().await;
                        if !evicted.is_empty() {
                            tracing::info!(count = evicted.len(), "pool sweep closed idle connections");
                        }
                    }
                    _ = shutdown.recv() => {
                        tracing::debug!("pool sweeper shutting down");
                        break;
                    }
                }
            }
        })
    }

    pub async fn len(&self) -> usize {
        self.connections.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    pub async fn contains(&self, peer_id: &str) -> bool {
        self.get(peer_id).await.is_some()
    }

    /// Close everything, for shutdown.
    pub async fn close_all(&self) {
        let drained: Vec<Arc<Connection>> =
            self.connections.lock().await.drain().map(|(_, c)| c).collect();
        for conn in drained {
            conn.close().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    async fn listener() -> (TcpListener, String) {
        let l = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = l.local_addr().unwrap().to_string();
        (l, addr)
    }

    /// Accept and hold connections so the client side stays open.
    fn hold_accepts(l: TcpListener) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut held = Vec::new();
            while let Ok((s, _)) = l.accept().await {
                held.push(s);
            }
        })
    }

    fn config(max_idle: Duration) -> PoolConfig {
        PoolConfig {
            dial_timeout: Duration::from_secs(1),
            max_idle,
            max_connections: 4,
        }
    }

    #[tokio::test]
    async fn acquire_twice_returns_same_connection() {
        let (l, addr) = listener().await;
        let _accept = hold_accepts(l);
        let pool = ConnectionPool::new(config(Duration::from_secs(60)));

        let a = pool.acquire("peer-1", &addr).await.unwrap();
        let b = pool.acquire("peer-1", &addr).await.unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(pool.len().await, 1);
    }

    #[tokio::test]
    async fn concurrent_acquires_leave_one_connection() {
        let (l, addr) = listener().await;
        let _accept = hold_accepts(l);
        let pool = Arc::new(ConnectionPool::new(config(Duration::from_secs(60))));

        let (a, b) = tokio::join!(pool.acquire("peer-1", &addr), pool.acquire("peer-1", &addr));
        let (a, b) = (a.unwrap(), b.unwrap());
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(pool.len().await, 1);
    }

    #[tokio::test]
    async fn dial_failure_is_returned() {
        let (l, addr) = listener().await;
        drop(l);
        let pool = ConnectionPool::new(config(Duration::from_secs(60)));
        let err = pool.acquire("peer-1", &addr).await.unwrap_err();
        assert!(err.is_transport());
        assert!(pool.is_empty().await);
    }

    #[tokio::test]
    async fn idle_connection_is_swept() {
        let (l, addr) = listener().await;
        let _accept = hold_accepts(l);
        let pool = ConnectionPool::new(config(Duration::from_millis(50)));

        let conn = pool.acquire("peer-1", &addr).await.unwrap();
        tokio::time::sleep(Duration::from_millis(120)).await;
        assert_eq!(pool.sweep().await, vec!["peer-1".to_string()]);
        assert!(conn.is_closed());
        assert!(!pool.contains("peer-1").await);
    }

    #[tokio::test]
    async fn sweeper_task_evicts_in_background() {
        let (l, addr) = listener().await;
        let _accept = hold_accepts(l);
        let pool = Arc::new(ConnectionPool::new(config(Duration::from_millis(40))));
        let (tx, rx) = broadcast::channel(1);
        let handle = pool.spawn_sweeper(rx);

        let conn = pool.acquire("peer-1", &addr).await.unwrap();
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(conn.is_closed());
        assert!(pool.is_empty().await);

        tx.send(()).unwrap();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn release_keeps_fresh_and_closes_stale() {
        let (l, addr) = listener().await;
        let _accept = hold_accepts(l);
        let pool = ConnectionPool::new(config(Duration::from_millis(50)));

        let conn = pool.acquire("peer-1", &addr).await.unwrap();
        pool.release("peer-1", conn.clone()).await;
        assert!(pool.contains("peer-1").await);

        tokio::time::sleep(Duration::from_millis(100)).await;
        pool.release("peer-1", conn.clone()).await;
        assert!(conn.is_closed());
        assert!(!pool.contains("peer-1").await);
    }

    #[tokio::test]
    async fn remove_closes_connection() {
        let (l, addr) = listener().await;
        let _accept = hold_accepts(l);
        let pool = ConnectionPool::new(config(Duration::from_secs(60)));

        let conn = pool.acquire("peer-1", &addr).await.unwrap();
        assert!(pool.remove("peer-1").await);
        assert!(conn.is_closed());
        assert!(!pool.remove("peer-1").await);

        let again = pool.acquire("peer-1", &addr).await.unwrap();
        assert_ne!(again.id(), conn.id());
    }

    #[tokio::test]
    async fn pool_enforces_connection_limit() {
        let (l, addr) = listener().await;
        let _accept = hold_accepts(l);
        let pool = ConnectionPool::new(PoolConfig {
            max_connections: 1,
            ..config(Duration::from_secs(60))
        });
        pool.acquire("peer-1", &addr).await.unwrap();
        assert!(matches!(
            pool.acquire("peer-2", &addr).await,
            Err(NetworkError::PoolFull(1))
        ));
    }
}
