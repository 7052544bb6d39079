//! A pooled TCP connection split into independently locked halves.
//!
//! The read half is taken once by the session's receive loop; writes go
//! through the write-half mutex so frames never interleave.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use strand_crypto::SessionKey;
use strand_protocol::codec::write_frame;
use strand_types::{ChainTip, NodeType, PeerIdentity};
use tokio::io::AsyncWriteExt;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{watch, Mutex, OnceCell};
use tokio::time::Instant;

use crate::NetworkError;

/// Session state established by a handshake over a [`Connection`].
#[derive(Debug)]
pub struct PeerSession {
    pub identity: PeerIdentity,
    pub node_type: NodeType,
    pub key: SessionKey,
    pub chain_tip: Option<ChainTip>,
}

pub struct Connection {
    id: u64,
    peer_id: String,
    address: String,
    reader: Mutex<Option<OwnedReadHalf>>,
    writer: Mutex<OwnedWriteHalf>,
    session: OnceCell<PeerSession>,
    opened_at: Instant,
    /// Milliseconds after `opened_at` of the last read or write.
    last_activity_ms: AtomicU64,
    closed: watch::Sender<bool>,
}

impl Connection {
    pub fn new(
        id: u64,
        peer_id: impl Into<String>,
        address: impl Into<String>,
        stream: TcpStream,
    ) -> Self {
        let (reader, writer) = stream.into_split();
        let (closed, _) = watch::channel(false);
        Self {
            id,
            peer_id: peer_id.into(),
            address: address.into(),
            reader: Mutex::new(Some(reader)),
            writer: Mutex::new(writer),
            session: OnceCell::new(),
            opened_at: Instant::now(),
            last_activity_ms: AtomicU64::new(0),
            closed,
        }
    }

    /// A connection whose handshake already completed (inbound side).
    pub fn with_session(
        id: u64,
        address: impl Into<String>,
        reader: OwnedReadHalf,
        writer: OwnedWriteHalf,
        session: PeerSession,
    ) -> Self {
        let (closed, _) = watch::channel(false);
        Self {
            id,
            peer_id: session.identity.id.clone(),
            address: address.into(),
            reader: Mutex::new(Some(reader)),
            writer: Mutex::new(writer),
            session: OnceCell::new_with(Some(session)),
            opened_at: Instant::now(),
            last_activity_ms: AtomicU64::new(0),
            closed,
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn peer_id(&self) -> &str {
        &self.peer_id
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn session(&self) -> Option<&PeerSession> {
        self.session.get()
    }

    /// Run `init` at most once; concurrent callers wait for the first.
    pub async fn get_or_init_session<F, Fut>(&self, init: F) -> Result<&PeerSession, NetworkError>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = Result<PeerSession, NetworkError>>,
    {
        self.session.get_or_try_init(init).await
    }

    /// Exclusive access to both halves, for the initiator handshake.
    pub async fn lock_halves(
        &self,
    ) -> (
        tokio::sync::MutexGuard<'_, Option<OwnedReadHalf>>,
        tokio::sync::MutexGuard<'_, OwnedWriteHalf>,
    ) {
        let reader = self.reader.lock().await;
        let writer = self.writer.lock().await;
        (reader, writer)
    }

    /// Hand the read half to the receive loop. Returns `None` after the first call.
    pub async fn take_reader(&self) -> Option<OwnedReadHalf> {
        self.reader.lock().await.take()
    }

    /// Write one frame.
    pub async fn send_frame(&self, payload: &[u8]) -> Result<(), NetworkError> {
        if self.is_closed() {
            return Err(NetworkError::ConnectionClosed(self.peer_id.clone()));
        }
        let mut writer = self.writer.lock().await;
        write_frame(&mut *writer, payload).await?;
        self.touch();
        Ok(())
    }

    pub fn touch(&self) {
        let ms = self.opened_at.elapsed().as_millis() as u64;
        self.last_activity_ms.fetch_max(ms, Ordering::Relaxed);
    }

    /// Time since the last read or write.
    pub fn idle_for(&self) -> Duration {
        let last = Duration::from_millis(self.last_activity_ms.load(Ordering::Relaxed));
        self.opened_at.elapsed().saturating_sub(last)
    }

    pub fn is_closed(&self) -> bool {
        *self.closed.borrow()
    }

    /// Resolves once [`close`](Self::close) has been called.
    pub async fn closed(&self) {
        let mut rx = self.closed.subscribe();
        let _ = rx.wait_for(|closed| *closed).await;
    }

    /// Mark closed and shut the write side down if no write is in flight.
    /// The socket is fully released when the receive loop drops the read half.
    pub async fn close(&self) {
        if self.closed.send_replace(true) {
            return;
        }
        if let Ok(mut writer) = self.writer.try_lock() {
            let _ = writer.shutdown().await;
        }
        tracing::debug!(peer = %self.peer_id, conn = self.id, "connection closed");
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("peer_id", &self.peer_id)
            .field("address", &self.address)
            .field("closed", &self.is_closed())
            .finish()
    }
}
