//! Ground-station recommender (C5): produces an ordered prefetch
//! stream for a satellite and pulls it under a byte budget.
//!
//! Stateless between epochs with respect to any one satellite — every
//! call is a fresh enumeration over the ground station's catalog.

use crate::lru_freq::LruFreq;
use crate::policy::NeighborOracle;
use crate::topology::NUM_SLOTS;

/// A ground station: a fixed 2-D position and an `LruFreq` catalog
/// seeded from traffic observed across the satellites it serves.
pub struct GroundStation {
    id: i64,
    lat: f64,
    lon: f64,
    catalog: LruFreq,
}

impl GroundStation {
    pub fn new(id: i64, lat: f64, lon: f64, catalog_capacity: u64) -> Self {
        Self { id, lat, lon, catalog: LruFreq::new(catalog_capacity) }
    }

    pub fn id(&self) -> i64 {
        self.id
    }

    /// Records an observed request, feeding the catalog used by both
    /// enumeration streams below.
    pub fn observe(&mut self, id: &str, size: u64) {
        self.catalog.admit(id, size);
    }

    /// Enumerates `(id, size, freq)` in descending frequency, then
    /// within a bucket in MRU order.
    pub fn get_most_accessed_items(&self) -> Vec<(String, u64, u64)> {
        self.catalog
            .iterate_most_frequent_first()
            .map(|(id, freq)| {
                let size = self
                    .catalog
                    .iterate_most_recent_first()
                    .find(|(candidate, _, _)| *candidate == id)
                    .map(|(_, size, _)| size)
                    .unwrap_or(0);
                (id.to_string(), size, freq)
            })
            .collect()
    }

    /// Enumerates `(id, size, freq)` in pure MRU order, ignoring
    /// frequency.
    pub fn get_most_recent_items(&self) -> Vec<(String, u64, u64)> {
        self.catalog
            .iterate_most_recent_first()
            .map(|(id, size, freq)| (id.to_string(), size, freq))
            .collect()
    }
}

/// 2-D Euclidean lat/lon distance — a deliberate approximation, not a
/// great-circle computation (§4.5).
fn distance(a_lat: f64, a_lon: f64, b_lat: f64, b_lon: f64) -> f64 {
    ((a_lat - b_lat).powi(2) + (a_lon - b_lon).powi(2)).sqrt()
}

/// Returns the station in `stations` closest to `(lat, lon)`, breaking
/// ties by ascending station id for determinism (§4.6 "Tie-breaking
/// and determinism").
pub fn closest_ground_station<'a>(
    stations: &'a [GroundStation],
    lat: f64,
    lon: f64,
) -> Option<&'a GroundStation> {
    stations.iter().min_by(|a, b| {
        let da = distance(a.lat, a.lon, lat, lon);
        let db = distance(b.lat, b.lon, lat, lon);
        da.partial_cmp(&db).unwrap_or(std::cmp::Ordering::Equal).then(a.id.cmp(&b.id))
    })
}

/// The result of one [`pull_prefetch`] call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PrefetchPlan {
    /// `(id, size)` pairs admitted to the satellite's local cache via
    /// ground-station uplink.
    pub admitted: Vec<(String, u64)>,
    /// Bytes routed via each of the four ISL slots instead of being
    /// admitted locally.
    pub isl_traffic: [u64; NUM_SLOTS],
    /// Candidates already present in the local cache (no budget
    /// consumed, nothing admitted).
    pub in_cache_count: u64,
    /// Total bytes admitted via uplink (equal to the sum of
    /// `admitted`'s sizes).
    pub uplink_bytes: u64,
}

/// Pulls `candidates` (typically [`GroundStation::get_most_accessed_items`])
/// against a satellite's cache-membership test, admitting objects
/// until cumulative uplink bytes exceed `prefetch_byte_budget`.
///
/// `contains` tests the satellite's local cache; `oracle` tests its
/// four ISL neighbors in slot order `[N, S, E, W]`. Only bytes
/// admitted via uplink count against the budget — in-cache hits and
/// ISL-routed bytes are free, matching S5.
pub fn pull_prefetch(
    candidates: &[(String, u64, u64)],
    contains: impl Fn(&str) -> bool,
    oracle: &mut dyn NeighborOracle,
    prefetch_byte_budget: u64,
    allow_uplink: bool,
) -> PrefetchPlan {
    let mut plan = PrefetchPlan::default();

    for (id, size, _freq) in candidates {
        if plan.uplink_bytes > prefetch_byte_budget {
            break;
        }
        if contains(id) {
            plan.in_cache_count += 1;
            continue;
        }
        if let Some(slot) = (0..NUM_SLOTS).find(|&slot| oracle.check(slot, id)) {
            plan.isl_traffic[slot] += size;
            continue;
        }
        if allow_uplink {
            plan.admitted.push((id.clone(), *size));
            plan.uplink_bytes += size;
        }
    }

    plan
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::StaticNeighborOracle;
    use std::collections::HashSet;

    #[test]
    fn most_accessed_orders_by_descending_frequency() {
        let mut gs = GroundStation::new(0, 0.0, 0.0, 1000);
        gs.observe("low", 10);
        gs.observe("high", 10);
        gs.observe("high", 10);
        let items = gs.get_most_accessed_items();
        assert_eq!(items[0].0, "high");
        assert_eq!(items[0].2, 2);
        assert_eq!(items[1].0, "low");
    }

    #[test]
    fn closest_station_breaks_ties_by_ascending_id() {
        let stations = vec![
            GroundStation::new(5, 0.0, 0.0, 100),
            GroundStation::new(1, 0.0, 0.0, 100),
        ];
        let closest = closest_ground_station(&stations, 0.0, 0.0).unwrap();
        assert_eq!(closest.id(), 1);
    }

    #[test]
    fn closest_station_picks_nearest_by_euclidean_distance() {
        let stations = vec![
            GroundStation::new(1, 10.0, 10.0, 100),
            GroundStation::new(2, 0.1, 0.1, 100),
        ];
        let closest = closest_ground_station(&stations, 0.0, 0.0).unwrap();
        assert_eq!(closest.id(), 2);
    }

    #[test]
    fn s5_prefetch_with_uplink_disallowed() {
        let candidates = vec![
            ("A".to_string(), 40, 3),
            ("B".to_string(), 40, 2),
            ("C".to_string(), 40, 1),
        ];
        let cached: HashSet<String> = HashSet::new();
        let mut oracle = StaticNeighborOracle::default();
        oracle.membership[0].insert("B".to_string());

        let plan = pull_prefetch(&candidates, |id| cached.contains(id), &mut oracle, 100, false);

        assert!(plan.admitted.is_empty());
        assert_eq!(plan.isl_traffic[0], 40);
        assert_eq!(plan.isl_traffic.iter().sum::<u64>(), 40);
        assert_eq!(plan.uplink_bytes, 0);
        assert_eq!(plan.in_cache_count, 0);
    }

    #[test]
    fn pull_prefetch_skips_cache_hits_without_spending_budget() {
        let candidates = vec![("X".to_string(), 40, 1)];
        let cached: HashSet<String> = ["X".to_string()].into_iter().collect();
        let mut oracle = StaticNeighborOracle::default();
        let plan = pull_prefetch(&candidates, |id| cached.contains(id), &mut oracle, 0, true);
        assert_eq!(plan.in_cache_count, 1);
        assert!(plan.admitted.is_empty());
    }

    #[test]
    fn pull_prefetch_stops_once_budget_exceeded() {
        let candidates = vec![
            ("A".to_string(), 60, 3),
            ("B".to_string(), 60, 2),
            ("C".to_string(), 60, 1),
        ];
        let cached: HashSet<String> = HashSet::new();
        let mut oracle = StaticNeighborOracle::default();
        let plan = pull_prefetch(&candidates, |id| cached.contains(id), &mut oracle, 100, true);
        assert_eq!(plan.admitted.len(), 2);
        assert_eq!(plan.uplink_bytes, 120);
    }
}
