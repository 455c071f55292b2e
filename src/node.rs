//! Satellite cache node (C4): the per-satellite state machine that
//! owns one Byte-LRU, replays its trace epoch by epoch, and answers
//! the neighbor-check and prefetch-push verbs.
//!
//! The real satellite binary backs [`NeighborOracle`] with persistent
//! ISL sockets opened once at `CONF`, per §5's resource discipline;
//! this module itself never opens a socket, so it can be driven
//! directly in tests the way [`crate::policy`]'s are.

use std::collections::HashMap;
use std::io::Read;

use crate::byte_lru::ByteLru;
use crate::error::CoreResult;
use crate::lru_freq::LruFreq;
use crate::policy::{self, NeighborOracle, Outcome, Policy, PolicyState};
use crate::topology::Topology;
use crate::trace::TraceReader;

/// Seconds of inactivity after which a user's location state (LFU and
/// last-prefetch bookkeeping) is considered stale and reset, per
/// §4.4 "Per-user stale tracking".
const STALE_AFTER_SECONDS: i64 = 1800;

/// Per-epoch counters accumulated while handling one `REQ t`, mirroring
/// the `[Data]`/`[Latency]` log line fields of §6.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EpochCounters {
    pub total_obj: u64,
    pub total_byte: u64,
    pub hit_obj: u64,
    pub hit_byte: u64,
    pub hit_obj_by_neigh: u64,
    pub hit_byte_by_neigh: u64,
    pub hit_obj_by_pref: u64,
    pub hit_byte_by_pref: u64,
    /// `hash_check`: requests routed to a remote bucket owner for
    /// bookkeeping rather than served locally.
    pub hash_check_forwards: u64,
    /// Every `(id, size)` requested this epoch, in arrival order —
    /// feeds the ground-station catalog a prefetch puller observes
    /// traffic through between epochs (§2, §4.5).
    pub requested: Vec<(String, u64)>,
    /// Per-outcome latency sample counts, tracked alongside the full
    /// histogram so the `[Data]` line's `lat0..lat3` summary fields
    /// don't need to be re-derived from it.
    pub local_latency_samples: u64,
    pub neighbor_latency_samples: u64,
    pub uplink_latency_samples: u64,
    /// Histogram keyed by `(up*2, down*2 + offset, class)`, offset and
    /// class per outcome: local hit `(0, 2)`, neighbor hit `(6, 2)`,
    /// uplink miss `(6, 4)`.
    pub latency: HashMap<(i64, i64, i64), u64>,
}

impl EpochCounters {
    /// The four summary counts carried in the `[Data]` line's
    /// `lat0..lat3` slots: local-hit, neighbor-hit, uplink-miss
    /// latency sample counts, plus their sum.
    pub fn latency_summary(&self) -> [u64; 4] {
        [
            self.local_latency_samples,
            self.neighbor_latency_samples,
            self.uplink_latency_samples,
            self.local_latency_samples + self.neighbor_latency_samples + self.uplink_latency_samples,
        ]
    }

    fn record(&mut self, up: i64, down: i64, down_offset: i64, class: i64) {
        *self.latency.entry((up * 2, down * 2 + down_offset, class)).or_insert(0) += 1;
        match (down_offset, class) {
            (0, 2) => self.local_latency_samples += 1,
            (6, 2) => self.neighbor_latency_samples += 1,
            (6, 4) => self.uplink_latency_samples += 1,
            _ => {}
        }
    }
}

/// A satellite's configuration, as delivered in the `CONF` payload.
#[derive(Debug, Clone)]
pub struct NodeConfig {
    pub node_id: i64,
    pub cache_capacity: u64,
    pub policy: Policy,
    /// Seconds to add to every trace timestamp (§3 "Trace").
    pub epoch_offset: i64,
}

/// The full mutable state of one satellite cache node.
pub struct SatelliteNode<R> {
    node_id: i64,
    cache: ByteLru,
    policy: Policy,
    policy_state: PolicyState,
    topology: Topology,
    trace: TraceReader<R>,
    location_last_serve: HashMap<String, i64>,
    location_lfu: HashMap<String, LruFreq>,
    last_prefetch: HashMap<String, i64>,
    prefetch_map: HashMap<String, Vec<String>>,
    location_lfu_capacity: u64,
}

impl<R: Read> SatelliteNode<R> {
    /// Configures a node: opens its trace reader, initializes its
    /// cache, and records the topology it was given at `CONF`.
    pub fn new(config: NodeConfig, trace_source: R, topology: Topology) -> Self {
        Self {
            node_id: config.node_id,
            cache: ByteLru::new(config.cache_capacity),
            policy: config.policy,
            policy_state: PolicyState::default(),
            topology,
            trace: TraceReader::new(trace_source, config.epoch_offset),
            location_last_serve: HashMap::new(),
            location_lfu: HashMap::new(),
            last_prefetch: HashMap::new(),
            prefetch_map: HashMap::new(),
            location_lfu_capacity: config.cache_capacity,
        }
    }

    pub fn node_id(&self) -> i64 {
        self.node_id
    }

    pub fn cache(&self) -> &ByteLru {
        &self.cache
    }

    pub fn topology(&self) -> &Topology {
        &self.topology
    }

    /// Handles one `REQ t`: replays every trace record with
    /// `arrival_time <= t`, applying the configured policy to each
    /// `(id, size)` pair, then rewinds the one line that ran past `t`.
    pub fn handle_epoch(&mut self, t: i64, oracle: &mut dyn NeighborOracle) -> CoreResult<EpochCounters> {
        let mut counters = EpochCounters::default();

        loop {
            let Some((raw_line, record)) = self.trace.next_record_with_line()? else {
                break;
            };
            if record.arrival_time > t {
                self.trace.rewind_one_line(raw_line);
                break;
            }

            self.note_user_activity(&record.user_id, record.arrival_time);

            for (id, size) in &record.objects {
                counters.total_obj += 1;
                counters.total_byte += size;
                counters.requested.push((id.clone(), *size));

                let outcome = policy::decide(
                    self.policy,
                    &self.cache,
                    &mut self.policy_state,
                    &self.topology,
                    self.node_id,
                    oracle,
                    id,
                );
                self.tally_outcome(&mut counters, id, *size, outcome, record.latency_uplink, record.latency_downlink);

                if policy::should_admit(self.policy, &mut self.policy_state, id, outcome) {
                    self.cache.admit(id, *size);
                }
                self.lfu_for(&record.user_id).admit(id, *size);
            }
        }

        Ok(counters)
    }

    fn tally_outcome(
        &mut self,
        counters: &mut EpochCounters,
        id: &str,
        size: u64,
        outcome: Outcome,
        up: i64,
        down: i64,
    ) {
        match outcome {
            Outcome::Local => {
                counters.hit_obj += 1;
                counters.hit_byte += size;
                counters.record(up, down, 0, 2);
                if self.prefetch_map.values().any(|ids| ids.iter().any(|p| p == id)) {
                    counters.hit_obj_by_pref += 1;
                    counters.hit_byte_by_pref += size;
                }
            }
            Outcome::Remote { .. } => {
                counters.hit_obj += 1;
                counters.hit_byte += size;
                counters.hit_obj_by_neigh += 1;
                counters.hit_byte_by_neigh += size;
                counters.record(up, down, 6, 2);
            }
            Outcome::Miss | Outcome::Partial => {
                counters.record(up, down, 6, 4);
            }
            Outcome::Forwarded { owner } => {
                counters.record(up, down, 6, 4);
                counters.hash_check_forwards += 1;
                tracing::debug!(node_id = self.node_id, owner, id, size, "hash_check: forwarded record to owner");
            }
            Outcome::Parity => {
                counters.hit_obj += 1;
                counters.hit_byte += size;
                counters.hit_obj_by_neigh += 1;
                counters.hit_byte_by_neigh += size;
                counters.record(up, down, 6, 2);
            }
        }
    }

    fn note_user_activity(&mut self, user_id: &str, now: i64) {
        let last = self.location_last_serve.insert(user_id.to_string(), now);
        if let Some(last) = last {
            if (now - last).abs() >= STALE_AFTER_SECONDS {
                self.location_lfu.insert(user_id.to_string(), LruFreq::new(self.location_lfu_capacity));
            }
        }
    }

    fn lfu_for(&mut self, user_id: &str) -> &mut LruFreq {
        self.location_lfu
            .entry(user_id.to_string())
            .or_insert_with(|| LruFreq::new(self.location_lfu_capacity))
    }

    /// Answers a `CHK  id` probe: `true` iff `id` is in the local
    /// cache at the instant this is called.
    pub fn check_membership(&self, id: &str) -> bool {
        self.cache.contains(id)
    }

    /// Handles `PREF {user, data: [(id, size, freq), ...]}` (§4.4
    /// "Prefetch receiver"). Returns the number of `(id, size)` pairs
    /// actually admitted.
    pub fn receive_prefetch(&mut self, user_id: &str, now: i64, items: &[(String, u64, u64)]) -> usize {
        let last = self.last_prefetch.insert(user_id.to_string(), now);
        if let Some(last) = last {
            if (now - last).abs() >= STALE_AFTER_SECONDS {
                self.prefetch_map.remove(user_id);
            }
        }

        let mut accepted = 0;
        for (id, size, freq) in items {
            if self.cache.contains(id) {
                continue;
            }
            self.cache.admit(id, *size);
            let discounted_freq = freq / 2 + 1;
            self.lfu_for(user_id).set_freq(id, discounted_freq);
            self.prefetch_map.entry(user_id.to_string()).or_default().push(id.clone());
            accepted += 1;
        }
        accepted
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::StaticNeighborOracle;
    use std::io::Cursor;

    fn config(capacity: u64, policy: Policy) -> NodeConfig {
        NodeConfig { node_id: 0, cache_capacity: capacity, policy, epoch_offset: 0 }
    }

    #[test]
    fn handle_epoch_admits_and_tallies_local_hits() {
        let data = "x, 2024-01-01 00:00:10, [Requests Records]: u1,[1,2],[[A,40]]\n";
        let mut node = SatelliteNode::new(config(100, Policy::LocalOnly), Cursor::new(data), Topology::new());
        let mut oracle = StaticNeighborOracle::default();

        let counters = node.handle_epoch(15, &mut oracle).unwrap();
        assert_eq!(counters.total_obj, 1);
        assert_eq!(counters.hit_obj, 0); // first sighting: miss, then admitted
        assert!(node.check_membership("A"));
        assert_eq!(counters.requested, vec![("A".to_string(), 40)]);
    }

    #[test]
    fn s4_epoch_barrier_only_consumes_records_up_to_t() {
        let data = "x, 2024-01-01 00:00:15, [Requests Records]: u1,[0,0],[[A,10]]\n";
        let mut node = SatelliteNode::new(config(100, Policy::LocalOnly), Cursor::new(data), Topology::new());
        let mut oracle = StaticNeighborOracle::default();

        let at_zero = node.handle_epoch(0, &mut oracle).unwrap();
        assert_eq!(at_zero.total_obj, 0);
        let at_fifteen = node.handle_epoch(15, &mut oracle).unwrap();
        assert_eq!(at_fifteen.total_obj, 1);
        let at_thirty = node.handle_epoch(30, &mut oracle).unwrap();
        assert_eq!(at_thirty.total_obj, 0);
    }

    #[test]
    fn s2_one_hop_remote_hit_does_not_admit_when_unseen() {
        let data = "x, 2024-01-01 00:00:10, [Requests Records]: u1,[0,0],[[Y,30]]\n";
        let mut node = SatelliteNode::new(config(50, Policy::OneHop), Cursor::new(data), Topology::new());
        node.cache.admit("X", 50);
        let mut oracle = StaticNeighborOracle::default();
        oracle.membership[2].insert("Y".to_string());

        let counters = node.handle_epoch(15, &mut oracle).unwrap();
        assert_eq!(counters.hit_obj_by_neigh, 1);
        assert_eq!(counters.hit_byte_by_neigh, 30);
        assert!(!node.check_membership("Y"));
        assert!(node.check_membership("X"));
    }

    #[test]
    fn prefetch_receiver_discounts_frequency_and_skips_cached_ids() {
        let data = "";
        let mut node = SatelliteNode::new(config(100, Policy::LocalOnly), Cursor::new(data), Topology::new());
        node.cache.admit("already", 10);

        let accepted = node.receive_prefetch(
            "u1",
            0,
            &[("already".to_string(), 10, 4), ("fresh".to_string(), 20, 4)],
        );
        assert_eq!(accepted, 1);
        assert!(node.check_membership("fresh"));
        assert_eq!(node.lfu_for("u1").frequency("fresh"), Some(3)); // floor(0.5*4)+1
    }

    #[test]
    fn prefetch_receiver_clears_map_after_staleness_window() {
        let mut node = SatelliteNode::new(config(100, Policy::LocalOnly), Cursor::new(""), Topology::new());
        node.receive_prefetch("u1", 0, &[("a".to_string(), 10, 2)]);
        assert_eq!(node.prefetch_map.get("u1").map(Vec::len), Some(1));
        node.receive_prefetch("u1", 5000, &[("b".to_string(), 10, 2)]);
        assert_eq!(node.prefetch_map.get("u1").map(Vec::len), Some(1));
        assert_eq!(node.prefetch_map.get("u1").unwrap()[0], "b");
    }
}
