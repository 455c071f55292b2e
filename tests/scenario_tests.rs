//! The literal end-to-end scenarios from the testable-properties
//! section, exercised through the crate's public API. S1, S3, and S6
//! are covered by unit tests colocated with `byte_lru`, `protocol`,
//! and `lru_freq`; this file covers the scenarios that need the
//! satellite node and recommender to exist.

use std::io::Cursor;

use orbitcache::node::{NodeConfig, SatelliteNode};
use orbitcache::policy::{Policy, StaticNeighborOracle};
use orbitcache::recommender::pull_prefetch;
use orbitcache::topology::Topology;

fn node_with_trace(capacity: u64, policy: Policy, trace: &str) -> SatelliteNode<Cursor<&str>> {
    SatelliteNode::new(
        NodeConfig { node_id: 0, cache_capacity: capacity, policy, epoch_offset: 0 },
        Cursor::new(trace),
        Topology::new(),
    )
}

#[test]
fn s2_one_hop_neighbor_hit_with_no_prior_sighting_does_not_admit() {
    let trace = "x, 2024-01-01 00:00:00, [Requests Records]: u,[0,0],[[X,50]]\n\
                 x, 2024-01-01 00:00:15, [Requests Records]: u,[0,0],[[Y,30]]\n";
    let mut node = node_with_trace(50, Policy::OneHop, trace);
    let mut oracle = StaticNeighborOracle::default();
    oracle.membership[2].insert("Y".to_string());

    node.handle_epoch(0, &mut oracle).unwrap(); // seeds cache with X:50
    let counters = node.handle_epoch(15, &mut oracle).unwrap();

    assert_eq!(counters.hit_obj_by_neigh, 1);
    assert_eq!(counters.hit_byte_by_neigh, 30);
    assert!(!node.check_membership("Y")); // never seen before, so not admitted
    assert!(node.check_membership("X")); // N's cache unchanged
}

#[test]
fn s4_epoch_barrier_across_two_satellites() {
    let trace_a = "a, 2024-01-01 00:00:15, [Requests Records]: u,[0,0],[[P,10]]\n";
    let trace_b = "b, 2024-01-01 00:00:15, [Requests Records]: u,[0,0],[[Q,10]]\n";
    let mut node_a = node_with_trace(100, Policy::LocalOnly, trace_a);
    let mut node_b = node_with_trace(100, Policy::LocalOnly, trace_b);
    let mut oracle = StaticNeighborOracle::default();

    for t in [0, 15, 30] {
        let expected = if t == 15 { 1 } else { 0 };
        assert_eq!(node_a.handle_epoch(t, &mut oracle).unwrap().total_obj, expected);
        assert_eq!(node_b.handle_epoch(t, &mut oracle).unwrap().total_obj, expected);
    }
}

#[test]
fn s5_prefetch_with_uplink_disallowed() {
    let candidates =
        vec![("A".to_string(), 40, 3), ("B".to_string(), 40, 2), ("C".to_string(), 40, 1)];
    let mut oracle = StaticNeighborOracle::default();
    oracle.membership[0].insert("B".to_string());

    let plan = pull_prefetch(&candidates, |_| false, &mut oracle, 100, false);

    assert!(plan.admitted.is_empty());
    assert_eq!(plan.isl_traffic[0], 40);
    assert_eq!(plan.uplink_bytes, 0);
}
