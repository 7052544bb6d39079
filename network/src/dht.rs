//! Kademlia-style peer discovery table.
//!
//! Nodes live in buckets indexed by the length of the key prefix they share
//! with the local node. Closest-node queries keep a bounded max-heap so a
//! lookup over `n` nodes costs `O(n log k)` without sorting the whole table.

use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use strand_types::{AuditEvent, AuditLog, NodeKey, PeerIdentity, Timestamp};

use crate::probe::Prober;
use crate::NetworkError;

/// Default bucket capacity (Kademlia `k`).
pub const DEFAULT_BUCKET_SIZE: usize = 20;

/// A discovered peer.
#[derive(Clone, Debug, PartialEq)]
pub struct KademliaNode {
    pub identity: PeerIdentity,
    pub key: NodeKey,
    pub last_seen: Timestamp,
    pub location: Option<String>,
}

/// Result of [`RoutingTable::add_node`].
#[derive(Clone, Debug, PartialEq)]
pub enum AddOutcome {
    Inserted,
    Updated,
    /// The bucket is full; `oldest` should be probed before anything is evicted.
    BucketFull { oldest: PeerIdentity },
    /// The node is the local node.
    Ignored,
}

#[derive(Default, Debug)]
struct Bucket {
    /// Least recently seen first.
    nodes: Vec<KademliaNode>,
}

/// The synchronous table. [`PeerDiscovery`] wraps it with locking and probing.
#[derive(Debug)]
pub struct RoutingTable {
    local: NodeKey,
    bucket_size: usize,
    buckets: Vec<Bucket>,
    /// Identity string -> bucket index.
    index: HashMap<String, usize>,
}

impl RoutingTable {
    pub fn new(local: NodeKey, bucket_size: usize) -> Self {
        let mut buckets = Vec::with_capacity(NodeKey::BITS);
        buckets.resize_with(NodeKey::BITS, Bucket::default);
        Self {
            local,
            bucket_size: bucket_size.max(1),
            buckets,
            index: HashMap::new(),
        }
    }

    /// Insert or refresh a node. A refreshed node moves to the tail of its
    /// bucket.
    pub fn add_node(
        &mut self,
        identity: PeerIdentity,
        location: Option<String>,
        now: Timestamp,
    ) -> AddOutcome {
        let key = identity.key();
        let Some(bucket_idx) = self.local.bucket_index(&key) else {
            return AddOutcome::Ignored;
        };
        let bucket = &mut self.buckets[bucket_idx];

        if let Some(pos) = bucket.nodes.iter().position(|n| n.identity.id == identity.id) {
            let mut node = bucket.nodes.remove(pos);
            node.identity = identity;
            node.last_seen = now;
            if location.is_some() {
                node.location = location;
            }
            bucket.nodes.push(node);
            return AddOutcome::Updated;
        }

        if bucket.nodes.len() >= self.bucket_size {
            return AddOutcome::BucketFull {
                oldest: bucket.nodes[0].identity.clone(),
            };
        }

        self.index.insert(identity.id.clone(), bucket_idx);
        bucket.nodes.push(KademliaNode {
            identity,
            key,
            last_seen: now,
            location,
        });
        AddOutcome::Inserted
    }

    pub fn remove_node(&mut self, id: &str) -> Option<KademliaNode> {
        let bucket_idx = self.index.remove(id)?;
        let bucket = &mut self.buckets[bucket_idx];
        let pos = bucket.nodes.iter().position(|n| n.identity.id == id)?;
        Some(bucket.nodes.remove(pos))
    }

    pub fn get(&self, id: &str) -> Option<&KademliaNode> {
        let bucket_idx = *self.index.get(id)?;
        self.buckets[bucket_idx]
            .nodes
            .iter()
            .find(|n| n.identity.id == id)
    }

    /// Record a successful contact without moving the node.
    pub fn mark_seen(&mut self, id: &str, now: Timestamp) -> bool {
        let Some(&bucket_idx) = self.index.get(id) else {
            return false;
        };
        match self.buckets[bucket_idx]
            .nodes
            .iter_mut()
            .find(|n| n.identity.id == id)
        {
            Some(node) => {
                node.last_seen = now;
                true
            }
            None => false,
        }
    }

    /// The `count` nodes closest to `target` by XOR distance, nearest first.
    /// Equal distances are ordered by identity string.
    pub fn find_closest(&self, target: &NodeKey, count: usize) -> Vec<PeerIdentity> {
        if count == 0 {
            return Vec::new();
        }

        let mut heap: BinaryHeap<Candidate<'_>> = BinaryHeap::with_capacity(count + 1);
        for node in self.buckets.iter().flat_map(|b| b.nodes.iter()) {
            let candidate = Candidate {
                distance: node.key.xor_distance(target),
                node,
            };
            if heap.len() < count {
                heap.push(candidate);
            } else if heap.peek().is_some_and(|worst| candidate < *worst) {
                heap.pop();
                heap.push(candidate);
            }
        }

        heap.into_sorted_vec()
            .into_iter()
            .map(|c| c.node.identity.clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    pub fn nodes(&self) -> impl Iterator<Item = &KademliaNode> {
        self.buckets.iter().flat_map(|b| b.nodes.iter())
    }

    /// Occupied bucket indices and their sizes, for diagnostics.
    pub fn bucket_sizes(&self) -> Vec<(usize, usize)> {
        self.buckets
            .iter()
            .enumerate()
            .filter(|(_, b)| !b.nodes.is_empty())
            .map(|(i, b)| (i, b.nodes.len()))
            .collect()
    }
}

struct Candidate<'a> {
    distance: NodeKey,
    node: &'a KademliaNode,
}

impl Ord for Candidate<'_> {
    fn cmp(&self, other: &Self) -> Ordering {
        NodeKey::cmp_distance(&self.distance, &other.distance)
            .then_with(|| self.node.identity.id.cmp(&other.node.identity.id))
    }
}

impl PartialOrd for Candidate<'_> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for Candidate<'_> {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Candidate<'_> {}

// ── Discovery service ───────────────────────────────────────────────────

/// Thread-safe discovery: the routing table plus liveness probing.
pub struct PeerDiscovery {
    table: RwLock<RoutingTable>,
    prober: Arc<dyn Prober>,
    ping_timeout: Duration,
    audit: Arc<dyn AuditLog>,
}

impl PeerDiscovery {
    pub fn new(
        local: &PeerIdentity,
        bucket_size: usize,
        prober: Arc<dyn Prober>,
        ping_timeout: Duration,
        audit: Arc<dyn AuditLog>,
    ) -> Self {
        Self {
            table: RwLock::new(RoutingTable::new(local.key(), bucket_size)),
            prober,
            ping_timeout,
            audit,
        }
    }

    /// Insert or refresh a peer. When its bucket is full the least recently
    /// seen entry is probed; it is evicted in favour of the newcomer only if
    /// the probe fails.
    pub async fn add_node(
        &self,
        identity: PeerIdentity,
        location: Option<String>,
        now: Timestamp,
    ) -> AddOutcome {
        let outcome = self
            .table
            .write()
            .add_node(identity.clone(), location.clone(), now);

        match &outcome {
            AddOutcome::Inserted => {
                tracing::debug!(peer = %identity.id, address = %identity.address, "discovered peer");
                self.audit.record(
                    now,
                    AuditEvent::PeerDiscovered {
                        peer: identity.id.clone(),
                        address: identity.address.clone(),
                    },
                );
            }
            AddOutcome::BucketFull { oldest } => {
                if self.probe_identity(oldest).await {
                    self.table.write().add_node(oldest.clone(), None, now);
                    tracing::trace!(peer = %identity.id, "bucket full, oldest peer still alive");
                } else {
                    let mut table = self.table.write();
                    table.remove_node(&oldest.id);
                    let retry = table.add_node(identity.clone(), location, now);
                    drop(table);
                    tracing::debug!(evicted = %oldest.id, peer = %identity.id, "replaced dead peer in full bucket");
                    if retry == AddOutcome::Inserted {
                        self.audit.record(
                            now,
                            AuditEvent::PeerDiscovered {
                                peer: identity.id.clone(),
                                address: identity.address.clone(),
                            },
                        );
                    }
                    return retry;
                }
            }
            AddOutcome::Updated | AddOutcome::Ignored => {}
        }
        outcome
    }

    pub fn remove_node(&self, id: &str) -> bool {
        let removed = self.table.write().remove_node(id).is_some();
        if removed {
            tracing::debug!(peer = id, "removed peer from discovery table");
        }
        removed
    }

    /// The `count` known peers closest to the key derived from `target_id`.
    pub fn find_closest(&self, target_id: &str, count: usize) -> Vec<PeerIdentity> {
        self.find_closest_key(&NodeKey::from_id(target_id), count)
    }

    pub fn find_closest_key(&self, target: &NodeKey, count: usize) -> Vec<PeerIdentity> {
        self.table.read().find_closest(target, count)
    }

    /// Probe a known peer. Success refreshes its last-seen time; failure is
    /// reported as [`NetworkError::Unreachable`] and the caller decides
    /// whether to evict.
    pub async fn ping_node(&self, id: &str, now: Timestamp) -> Result<(), NetworkError> {
        let identity = self
            .table
            .read()
            .get(id)
            .map(|n| n.identity.clone())
            .ok_or_else(|| NetworkError::PeerNotFound(id.to_string()))?;

        if self.probe_identity(&identity).await {
            self.table.write().mark_seen(id, now);
            Ok(())
        } else {
            tracing::debug!(peer = id, "ping failed");
            Err(NetworkError::Unreachable(id.to_string()))
        }
    }

    /// Ping every known peer and evict those that fail. Returns the evicted ids.
    pub async fn refresh(&self, now: Timestamp) -> Vec<String> {
        let ids: Vec<String> = self
            .table
            .read()
            .nodes()
            .map(|n| n.identity.id.clone())
            .collect();

        let mut evicted = Vec::new();
        for id in ids {
            if let Err(NetworkError::Unreachable(_)) = self.ping_node(&id, now).await {
                self.remove_node(&id);
                evicted.push(id);
            }
        }
        evicted
    }

    async fn probe_identity(&self, identity: &PeerIdentity) -> bool {
        self.prober.probe(&identity.address, self.ping_timeout).await
    }

    pub fn get(&self, id: &str) -> Option<KademliaNode> {
        self.table.read().get(id).cloned()
    }

    pub fn len(&self) -> usize {
        self.table.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.read().is_empty()
    }
}
