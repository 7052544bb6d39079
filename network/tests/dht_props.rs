use proptest::prelude::*;
use strand_network::RoutingTable;
use strand_types::{NodeKey, PeerIdentity, PublicKey, Timestamp};

fn peer(id: &str) -> PeerIdentity {
    PeerIdentity::new(id, "127.0.0.1:1", PublicKey([0u8; 32]))
}

proptest! {
    #[test]
    fn closest_is_sorted_by_xor_distance(
        ids in proptest::collection::hash_set("[a-z0-9]{1,12}", 1..60),
        target in "[a-z0-9]{1,12}",
        count in 1usize..30,
    ) {
        let mut table = RoutingTable::new(NodeKey::from_id("local-node"), 256);
        for id in &ids {
            table.add_node(peer(id), None, Timestamp::new(1));
        }
        let target_key = NodeKey::from_id(&target);
        let closest = table.find_closest(&target_key, count);

        prop_assert!(closest.len() <= count);
        prop_assert_eq!(closest.len(), count.min(table.len()));
        for pair in closest.windows(2) {
            let d0 = pair[0].key().xor_distance(&target_key);
            let d1 = pair[1].key().xor_distance(&target_key);
            prop_assert!(d0 <= d1);
        }

        // Nothing left out is closer than the farthest returned node.
        if let Some(last) = closest.last() {
            let bound = last.key().xor_distance(&target_key);
            for node in table.nodes() {
                if closest.iter().all(|c| c.id != node.identity.id) {
                    prop_assert!(node.key.xor_distance(&target_key) >= bound);
                }
            }
        }
    }
}
