//! Peer address routing table.
//!
//! Each route keeps the plaintext address next to a copy encrypted under a
//! key derived from the node secret. Reads decrypt the copy and refuse to
//! return an address that no longer matches it.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::RwLock;
use strand_crypto::{blake2b_256_multi, NodeKeys, SessionKey};
use strand_protocol::{RouteEntry, RouteTable, WireMessage};
use strand_types::{AuditEvent, AuditLog, Timestamp};

use crate::probe::Prober;
use crate::qos::{Packet, PacketSink};
use crate::{BroadcastResult, NetworkError};

/// Where the router hands messages for delivery.
#[async_trait]
pub trait PacketTransport: Send + Sync {
    /// Deliver `message` to `peer_id`, reachable at `address`.
    async fn deliver(
        &self,
        peer_id: &str,
        address: &str,
        message: WireMessage,
    ) -> Result<(), NetworkError>;

    /// Ids of the peers a broadcast should reach.
    fn broadcast_targets(&self) -> Vec<String>;
}

struct Route {
    address: String,
    sealed: Vec<u8>,
}

pub struct Router {
    routes: RwLock<HashMap<String, Route>>,
    route_key: SessionKey,
    transport: Arc<dyn PacketTransport>,
    prober: Arc<dyn Prober>,
    probe_timeout: Duration,
    audit: Arc<dyn AuditLog>,
}

impl Router {
    pub fn new(
        keys: &NodeKeys,
        transport: Arc<dyn PacketTransport>,
        prober: Arc<dyn Prober>,
        probe_timeout: Duration,
        audit: Arc<dyn AuditLog>,
    ) -> Self {
        let route_key = SessionKey::new(blake2b_256_multi(&[
            keys.secret().as_bytes(),
            b"strand-route-table",
        ]));
        Self {
            routes: RwLock::new(HashMap::new()),
            route_key,
            transport,
            prober,
            probe_timeout,
            audit,
        }
    }

    pub fn add_route(&self, peer_id: &str, address: &str) -> Result<(), NetworkError> {
        let sealed = strand_crypto::encrypt(address.as_bytes(), &self.route_key)?;
        self.routes.write().insert(
            peer_id.to_string(),
            Route {
                address: address.to_string(),
                sealed,
            },
        );
        tracing::info!(peer = peer_id, address, "route added");
        self.audit.record(
            Timestamp::now(),
            AuditEvent::RouteAdded {
                peer: peer_id.to_string(),
            },
        );
        Ok(())
    }

    pub fn remove_route(&self, peer_id: &str, reason: &str) -> bool {
        let removed = self.routes.write().remove(peer_id).is_some();
        if removed {
            tracing::info!(peer = peer_id, reason, "route removed");
            self.audit.record(
                Timestamp::now(),
                AuditEvent::RouteRemoved {
                    peer: peer_id.to_string(),
                    reason: reason.to_string(),
                },
            );
        }
        removed
    }

    /// Decrypt the stored copy and return the address.
    pub fn get_route(&self, peer_id: &str) -> Result<String, NetworkError> {
        let (address, sealed) = {
            let routes = self.routes.read();
            let route = routes
                .get(peer_id)
                .ok_or_else(|| NetworkError::NoRoute(peer_id.to_string()))?;
            (route.address.clone(), route.sealed.clone())
        };
        let plain = strand_crypto::decrypt(&sealed, &self.route_key)?;
        if plain != address.as_bytes() {
            tracing::warn!(peer = peer_id, "route copy does not match address");
            return Err(NetworkError::NoRoute(peer_id.to_string()));
        }
        Ok(address)
    }

    pub fn has_route(&self, peer_id: &str) -> bool {
        self.routes.read().contains_key(peer_id)
    }

    pub fn len(&self) -> usize {
        self.routes.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.read().is_empty()
    }

    /// Look up the destination and hand the packet to the transport.
    pub async fn route_packet(&self, packet: &Packet) -> Result<(), NetworkError> {
        let address = self.get_route(&packet.destination)?;
        self.transport
            .deliver(
                &packet.destination,
                &address,
                WireMessage::Packet {
                    priority: packet.priority,
                    data: packet.payload.clone(),
                },
            )
            .await
    }

    /// Snapshot of every route, verified against its encrypted copy.
    pub fn table(&self) -> RouteTable {
        let ids: Vec<String> = self.routes.read().keys().cloned().collect();
        let entries = ids
            .into_iter()
            .filter_map(|peer_id| {
                let address = self.get_route(&peer_id).ok()?;
                Some(RouteEntry { peer_id, address })
            })
            .collect();
        RouteTable::new(entries)
    }

    /// Send the hashed table to every broadcast target. Each copy travels in
    /// its own envelope, so it is encrypted per peer.
    pub async fn broadcast_routes(&self) -> BroadcastResult {
        let table = self.table();
        let mut result = BroadcastResult::default();

        for peer_id in self.transport.broadcast_targets() {
            let address = match self.get_route(&peer_id) {
                Ok(a) => a,
                Err(_) => {
                    result.failed += 1;
                    continue;
                }
            };
            match self
                .transport
                .deliver(&peer_id, &address, WireMessage::RouteTable(table.clone()))
                .await
            {
                Ok(()) => result.sent += 1,
                Err(e) => {
                    tracing::debug!(peer = %peer_id, "route broadcast failed: {e}");
                    result.failed += 1;
                }
            }
        }
        tracing::debug!(routes = table.entries.len(), sent = result.sent, failed = result.failed, "broadcast routing table");
        result
    }

    /// Learn routes from a peer's table. Known routes are never overwritten.
    /// Returns the number of routes added.
    pub fn merge_routes(&self, from: &str, table: &RouteTable, local_id: &str) -> usize {
        if !table.verify() {
            tracing::warn!(peer = from, "route table failed integrity check");
            return 0;
        }
        let mut added = 0;
        for entry in &table.entries {
            if entry.peer_id == local_id || self.has_route(&entry.peer_id) {
                continue;
            }
            if self.add_route(&entry.peer_id, &entry.address).is_ok() {
                added += 1;
            }
        }
        added
    }

    /// Probe every route; unreachable ones are removed. Returns removed ids.
    pub async fn validate_routing(&self) -> Vec<String> {
        let snapshot: Vec<(String, String)> = self
            .routes
            .read()
            .iter()
            .map(|(id, r)| (id.clone(), r.address.clone()))
            .collect();

        let mut removed = Vec::new();
        for (peer_id, address) in snapshot {
            if !self.prober.probe(&address, self.probe_timeout).await
                && self.remove_route(&peer_id, "unreachable")
            {
                removed.push(peer_id);
            }
        }
        removed
    }
}

#[async_trait]
impl PacketSink for Router {
    async fn send_packet(&self, packet: &Packet) -> Result<(), NetworkError> {
        self.route_packet(packet).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use crate::probe::NullProber;
    use strand_nullables::NullAuditLog;

    #[derive(Default)]
    struct RecordingTransport {
        delivered: Mutex<Vec<(String, String, WireMessage)>>,
        targets: Vec<String>,
        failing: Vec<String>,
    }

    #[async_trait]
    impl PacketTransport for RecordingTransport {
        async fn deliver(
            &self,
            peer_id: &str,
            address: &str,
            message: WireMessage,
        ) -> Result<(), NetworkError> {
            if self.failing.iter().any(|p| p == peer_id) {
                return Err(NetworkError::ConnectionClosed(peer_id.to_string()));
            }
            self.delivered
                .lock()
                .push((peer_id.to_string(), address.to_string(), message));
            Ok(())
        }

        fn broadcast_targets(&self) -> Vec<String> {
            self.targets.clone()
        }
    }

    fn router_with(
        transport: Arc<RecordingTransport>,
        prober: NullProber,
        audit: Arc<NullAuditLog>,
    ) -> Router {
        Router::new(
            &NodeKeys::from_secret([5u8; 32]),
            transport,
            Arc::new(prober),
            Duration::from_millis(50),
            audit,
        )
    }

    fn router() -> (Router, Arc<RecordingTransport>, Arc<NullAuditLog>) {
        let transport = Arc::new(RecordingTransport {
            targets: vec!["a".into(), "b".into(), "c".into()],
            failing: vec!["b".into()],
            ..Default::default()
        });
        let audit = Arc::new(NullAuditLog::new());
        let r = router_with(transport.clone(), NullProber::new(), audit.clone());
        (r, transport, audit)
    }

    #[test]
    fn add_get_remove_with_audit() {
        let (r, _, audit) = router();
        r.add_route("a", "10.0.0.1:7300").unwrap();
        assert_eq!(r.get_route("a").unwrap(), "10.0.0.1:7300");
        assert!(r.remove_route("a", "test"));
        assert!(!r.remove_route("a", "test"));
        assert!(matches!(r.get_route("a"), Err(NetworkError::NoRoute(_))));
        assert_eq!(audit.count_kind("route_added"), 1);
        assert_eq!(audit.count_kind("route_removed"), 1);
    }

    #[test]
    fn tampered_plaintext_is_refused() {
        let (r, _, _) = router();
        r.add_route("a", "10.0.0.1:7300").unwrap();
        r.routes.write().get_mut("a").unwrap().address = "6.6.6.6:1".into();
        assert!(r.get_route("a").is_err());
    }

    #[tokio::test]
    async fn route_packet_uses_route_address() {
        let (r, transport, _) = router();
        r.add_route("a", "10.0.0.1:7300").unwrap();
        let packet = Packet::new("a", 1, b"ping".to_vec());
        r.route_packet(&packet).await.unwrap();

        let delivered = transport.delivered.lock();
        assert_eq!(delivered[0].0, "a");
        assert_eq!(delivered[0].1, "10.0.0.1:7300");
        assert!(matches!(delivered[0].2, WireMessage::Packet { priority: 1, .. }));
    }

    #[tokio::test]
    async fn route_packet_without_route_fails() {
        let (r, _, _) = router();
        let packet = Packet::new("nobody", 0, vec![]);
        assert!(matches!(r.route_packet(&packet).await, Err(NetworkError::NoRoute(_))));
    }

    #[tokio::test]
    async fn broadcast_tolerates_individual_failures() {
        let (r, transport, _) = router();
        r.add_route("a", "10.0.0.1:1").unwrap();
        r.add_route("b", "10.0.0.2:1").unwrap();
        // "c" has no route.
        let result = r.broadcast_routes().await;
        assert_eq!(result.sent, 1);
        assert_eq!(result.failed, 2);

        let delivered = transport.delivered.lock();
        match &delivered[0].2 {
            WireMessage::RouteTable(t) => {
                assert!(t.verify());
                assert_eq!(t.entries.len(), 2);
            }
            other => panic!("unexpected message {other:?}"),
        }
    }

    #[tokio::test]
    async fn validate_routing_drops_unreachable() {
        let transport = Arc::new(RecordingTransport::default());
        let prober = NullProber::new();
        prober.set_reachable("10.0.0.1:1", true);
        let audit = Arc::new(NullAuditLog::new());
        let r = router_with(transport, prober, audit.clone());
        r.add_route("up", "10.0.0.1:1").unwrap();
        r.add_route("down", "10.0.0.2:1").unwrap();

        assert_eq!(r.validate_routing().await, vec!["down".to_string()]);
        assert!(r.has_route("up"));
        assert_eq!(r.len(), 1);
        assert_eq!(audit.count_kind("route_removed"), 1);
    }

    #[test]
    fn merge_skips_known_and_self() {
        let (r, _, _) = router();
        r.add_route("a", "10.0.0.1:1").unwrap();
        let table = RouteTable::new(vec![
            RouteEntry { peer_id: "a".into(), address: "9.9.9.9:9".into() },
            RouteEntry { peer_id: "me".into(), address: "1.1.1.1:1".into() },
            RouteEntry { peer_id: "d".into(), address: "10.0.0.4:1".into() },
        ]);
        assert_eq!(r.merge_routes("a", &table, "me"), 1);
        assert_eq!(r.get_route("a").unwrap(), "10.0.0.1:1");
        assert_eq!(r.get_route("d").unwrap(), "10.0.0.4:1");

        let mut forged = table.clone();
        forged.entries[2].address = "6.6.6.6:6".into();
        assert_eq!(r.merge_routes("a", &forged, "me"), 0);
    }
}
