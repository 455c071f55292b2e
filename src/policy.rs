//! Request-handling policies (C6): the pluggable per-request decision
//! functions a satellite's epoch handler dispatches to.
//!
//! Modeled as a small closed set of tagged variants rather than the
//! source's dictionary-of-bound-methods, per §9 "Polymorphic policy
//! dispatch". Each policy is a pure function over the local cache, a
//! [`NeighborOracle`] standing in for the real ISL sockets, and one
//! request — so the policy table can be unit-tested without any
//! networking.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::byte_lru::ByteLru;
use crate::topology::{Topology, NO_NEIGHBOR, NUM_SLOTS};

/// Number of routing buckets `hash_check` pins object ids to.
pub const NUM_COLOR: u32 = 25;

/// Maximum BFS depth `hash_check` searches for a bucket's owner.
pub const HASH_CHECK_MAX_DEPTH: u32 = 4;

/// The per-run request-handling policy, selected once at `CONF`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Policy {
    /// `Local` iff in cache; else `Miss`; admit always.
    #[default]
    LocalOnly,
    /// Probe neighbors in slot order 3,2,1,0 on local miss; admit on
    /// miss or on a remote hit only if `seen` before.
    OneHop,
    /// Same neighbor search as `OneHop`, but always admits on any
    /// non-local outcome.
    OneHopNoBloom,
    /// Four-shard erasure coding; reconstructs from self plus
    /// neighbors.
    ErasureNoRemote,
    /// Deterministic hash-bucket routing to a BFS-discovered owner.
    HashCheck,
    /// Pure local LRU.
    Lru,
    /// Local LRU with one-hop neighbor fallback on miss.
    LruOnDemand,
}

/// The outcome of handling a single `(id, size)` request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Served from the local cache.
    Local,
    /// Served by a neighbor at the given ISL slot.
    Remote {
        /// Index (0..4) of the neighbor slot that served the request.
        slot: usize,
    },
    /// Not found anywhere reachable; served via ground-station uplink.
    Miss,
    /// `erasure_no_remote`: a neighbor could reconstruct, this node
    /// could not.
    Parity,
    /// `erasure_no_remote`: neither this node nor its neighbors could
    /// reach quorum; served degraded.
    Partial,
    /// `hash_check`: routed the request record to `owner`'s bucket
    /// catalog for bookkeeping rather than serving it locally.
    Forwarded {
        /// The satellite id that owns this object's hash bucket.
        owner: i64,
    },
}

/// Stands in for the real ISL sockets so policies can be tested
/// without networking. `slot` is the index (0..4) into the node's
/// `[N, S, E, W]` neighbor table.
pub trait NeighborOracle {
    /// Returns `true` iff the neighbor at `slot` has `id` cached.
    fn check(&mut self, slot: usize, id: &str) -> bool;
}

/// An in-memory oracle over a fixed `[bool; 4]`-per-object map, used
/// in tests and by the single-process simulator; the real satellite
/// binary backs this trait with persistent ISL sockets instead.
#[derive(Debug, Default)]
pub struct StaticNeighborOracle {
    /// `membership[slot]` is the set of ids that neighbor has.
    pub membership: [HashSet<String>; NUM_SLOTS],
}

impl NeighborOracle for StaticNeighborOracle {
    fn check(&mut self, slot: usize, id: &str) -> bool {
        self.membership[slot].contains(id)
    }
}

/// Per-policy mutable bookkeeping that must persist across epochs
/// (the `seen` bloom approximation, erasure shard metadata, and the
/// `hash_check` owner-discovery cache).
#[derive(Debug, Default)]
pub struct PolicyState {
    /// `one_hop`'s one-touch bloom approximation: ids seen in a
    /// previous epoch. Grows without bound by design — see §9's open
    /// questions.
    pub seen: HashSet<String>,
    /// `erasure_no_remote`: which shard suffixes (0..4) this node has
    /// seeded for a given object id.
    pub shards: HashMap<String, HashSet<u8>>,
    /// `hash_check`: memoized bucket → owner satellite id, `None` if
    /// no owner was found within the BFS depth bound.
    pub hash_owners: HashMap<u32, Option<i64>>,
}

/// Probe order used by `one_hop` / `one_hop_no_bloom` / `lru_on_demand`:
/// slot 3 (W) first, then 2 (E), 1 (S), 0 (N).
const PROBE_ORDER: [usize; NUM_SLOTS] = [3, 2, 1, 0];

/// Applies `policy` to one `(id, size)` request against `cache`,
/// returning the outcome. Does not itself call `admit` — the epoch
/// handler in [`crate::node`] is responsible for admission, since the
/// admission rule differs per policy and per outcome.
pub fn decide(
    policy: Policy,
    cache: &ByteLru,
    state: &mut PolicyState,
    topology: &Topology,
    self_id: i64,
    oracle: &mut dyn NeighborOracle,
    id: &str,
) -> Outcome {
    match policy {
        Policy::LocalOnly => {
            if cache.contains(id) {
                Outcome::Local
            } else {
                Outcome::Miss
            }
        }
        Policy::Lru => {
            if cache.contains(id) {
                Outcome::Local
            } else {
                Outcome::Miss
            }
        }
        Policy::OneHop | Policy::OneHopNoBloom | Policy::LruOnDemand => {
            if cache.contains(id) {
                return Outcome::Local;
            }
            for slot in PROBE_ORDER {
                if oracle.check(slot, id) {
                    return Outcome::Remote { slot };
                }
            }
            Outcome::Miss
        }
        Policy::ErasureNoRemote => decide_erasure(state, oracle, id),
        Policy::HashCheck => {
            let owner = hash_check_owner(state, topology, self_id, id, |node, bucket| {
                color_bucket(&node.to_string()) == bucket
            });
            match owner {
                Some(owner) => Outcome::Forwarded { owner },
                None => Outcome::Miss,
            }
        }
    }
}

/// Whether `decide`'s outcome should trigger `admit(id, size)` under
/// `policy`, per the admission rule column of §4.6's policy table.
pub fn should_admit(policy: Policy, state: &mut PolicyState, id: &str, outcome: Outcome) -> bool {
    match policy {
        Policy::LocalOnly | Policy::Lru | Policy::LruOnDemand => true,
        Policy::OneHopNoBloom => !matches!(outcome, Outcome::Local),
        Policy::OneHop => match outcome {
            Outcome::Local => false,
            Outcome::Miss => {
                state.seen.insert(id.to_string());
                true
            }
            Outcome::Remote { .. } => {
                let was_seen = state.seen.contains(id);
                state.seen.insert(id.to_string());
                was_seen
            }
            Outcome::Parity | Outcome::Partial | Outcome::Forwarded { .. } => false,
        },
        Policy::ErasureNoRemote => matches!(outcome, Outcome::Miss),
        Policy::HashCheck => false,
    }
}

/// Shard size for `erasure_no_remote`: `⌈orig / 4⌉ + 1`.
pub fn shard_size(original_size: u64) -> u64 {
    original_size.div_ceil(4) + 1
}

fn decide_erasure(state: &mut PolicyState, oracle: &mut dyn NeighborOracle, id: &str) -> Outcome {
    let self_has = state.shards.get(id).map(|s| s.len()).unwrap_or(0);
    if self_has == 0 {
        // First sighting: seed this node's metadata with shard 0.
        state.shards.entry(id.to_string()).or_default().insert(0);
        return Outcome::Miss;
    }

    // Quorum is re-evaluated fresh on every call against the union of
    // self plus the four neighbors; it is never inferred from whether
    // this node happens to still hold the object in its byte cache.
    // Neighbors are probed via the oracle using the shard count they
    // report through `check` (`id` presence stands in for "has at
    // least one shard" since the oracle is a boolean probe).
    let mut distinct = self_has;
    let mut any_neighbor_has_it = false;
    for slot in 0..NUM_SLOTS {
        if oracle.check(slot, id) {
            distinct += 1;
            any_neighbor_has_it = true;
        }
    }

    if distinct >= 3 {
        Outcome::Local
    } else if any_neighbor_has_it {
        Outcome::Parity
    } else {
        Outcome::Partial
    }
}

/// Hashes `object_id` into one of [`NUM_COLOR`] buckets. A simple
/// FNV-1a fold is used rather than MD5 — both are deterministic,
/// stable hashes over the id string, and the spec does not mandate a
/// specific hash family, only that routing be deterministic.
pub fn color_bucket(object_id: &str) -> u32 {
    let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
    for byte in object_id.as_bytes() {
        hash ^= u64::from(*byte);
        hash = hash.wrapping_mul(0x0000_0100_0000_01B3);
    }
    (hash % u64::from(NUM_COLOR)) as u32
}

/// Finds the satellite that owns `object_id`'s hash bucket, using a
/// BFS of depth [`HASH_CHECK_MAX_DEPTH`] from `self_id` and the
/// `owner_of_bucket` callback to test whether a given node claims a
/// given bucket. Results are memoized in `state.hash_owners` for the
/// run's lifetime (BFS is re-run once per bucket, not once per
/// request).
///
/// Per §9, buckets that remain unresolved after the depth bound are
/// left as `None` and the caller (the epoch handler) is expected to
/// emit a debug log rather than guess an owner.
pub fn hash_check_owner(
    state: &mut PolicyState,
    topology: &Topology,
    self_id: i64,
    object_id: &str,
    owner_of_bucket: impl Fn(i64, u32) -> bool,
) -> Option<i64> {
    let bucket = color_bucket(object_id);
    if let Some(&cached) = state.hash_owners.get(&bucket) {
        return cached;
    }

    let mut found = None;
    'outer: for probe_bucket in (bucket..bucket + NUM_COLOR).map(|b| b % NUM_COLOR) {
        for (node, _depth) in topology.bfs(self_id, HASH_CHECK_MAX_DEPTH) {
            if owner_of_bucket(node, probe_bucket) {
                found = Some(node);
                break 'outer;
            }
        }
    }

    if found.is_none() {
        tracing::debug!(bucket, object_id, "hash_check: no owner found within BFS depth bound");
    }
    state.hash_owners.insert(bucket, found);
    found
}

/// Picks the owning node's shard suffix to redistribute to neighbor
/// `i` (0-indexed among the four slots), per §4.6: "the owning node
/// stores shard 0 and calls `redistribute(suffix=i+1)` on each of its
/// four neighbors."
pub fn redistribute_suffix(neighbor_index: usize) -> u8 {
    (neighbor_index + 1) as u8
}

/// Returns the neighbor ids this node actually has (filters out
/// `NO_NEIGHBOR` slots) in fixed `[N, S, E, W]` order.
pub fn active_neighbors(slots: [i64; NUM_SLOTS]) -> impl Iterator<Item = (usize, i64)> {
    slots
        .into_iter()
        .enumerate()
        .filter(|&(_, id)| id != NO_NEIGHBOR)
}
