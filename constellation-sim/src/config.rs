//! Emulation configuration (§6 "Emulation config") and the separate
//! logical-neighbor override file.

use std::collections::HashMap;

use orbitcache::error::{CoreError, CoreResult};
use orbitcache::policy::Policy;
use serde::{Deserialize, Serialize};

/// Top-level emulation config, as passed to the orchestrator.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EmulationConfig {
    pub topologies: Vec<TopologyBlock>,
    pub simtime: SimTime,
    pub simlogsetup: LogSetup,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TopologyBlock {
    pub nodes: Vec<NodeSpec>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct NodeSpec {
    #[serde(rename = "type")]
    pub node_type: String,
    pub nodeid: i64,
    pub trace: String,
    pub models: Vec<ModelSpec>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ModelSpec {
    pub iname: String,
    pub neighbors: [i64; 4],
    /// Which of C6's request-handling policies this node runs, per the
    /// original's `handle_requests_strategy` model argument. Defaults
    /// to `local_only` so configs predating this field still parse.
    #[serde(default)]
    pub policy: Policy,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SimTime {
    pub starttime: String,
    pub endtime: String,
    pub delta: i64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LogSetup {
    pub logfolder: String,
}

/// Maps a node id (as a string key, per the file's on-disk format) to
/// the four-element neighbor array that overrides whatever is in that
/// node's `ModelSpec`.
pub type NeighborMap = HashMap<String, [i64; 4]>;

pub fn parse_config(text: &str) -> CoreResult<EmulationConfig> {
    serde_json::from_str(text).map_err(CoreError::from)
}

pub fn parse_neighbor_map(text: &str) -> CoreResult<NeighborMap> {
    serde_json::from_str(text).map_err(CoreError::from)
}

impl EmulationConfig {
    /// Every `SAT` node across every topology block, in file order.
    pub fn satellite_nodes(&self) -> impl Iterator<Item = &NodeSpec> {
        self.topologies
            .iter()
            .flat_map(|block| block.nodes.iter())
            .filter(|node| node.node_type == "SAT")
    }
}

impl NodeSpec {
    /// This node's configured policy, taken from its first model entry
    /// (a node's `models` list carries exactly one `ModelCDNProvider`
    /// entry in every config this crate produces or consumes).
    pub fn policy(&self) -> Policy {
        self.models.first().map(|m| m.policy).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_a_minimal_config() {
        let text = r#"{
            "topologies":[{"nodes":[
                {"type":"SAT","nodeid":0,"trace":"a.log",
                 "models":[{"iname":"ModelCDNProvider","neighbors":[1,-1,-1,-1]}]}
            ]}],
            "simtime":{"starttime":"2024-01-01 00:00:00","endtime":"2024-01-02 00:00:00","delta":15},
            "simlogsetup":{"logfolder":"logs"}
        }"#;
        let config = parse_config(text).unwrap();
        assert_eq!(config.satellite_nodes().count(), 1);
        assert_eq!(config.simtime.delta, 15);
        // No `policy` field in the fixture: defaults to local_only.
        assert_eq!(config.satellite_nodes().next().unwrap().policy(), Policy::LocalOnly);
    }

    #[test]
    fn parses_a_configured_policy_per_node() {
        let text = r#"{
            "topologies":[{"nodes":[
                {"type":"SAT","nodeid":0,"trace":"a.log",
                 "models":[{"iname":"ModelCDNProvider","neighbors":[1,-1,-1,-1],"policy":"erasure_no_remote"}]}
            ]}],
            "simtime":{"starttime":"2024-01-01 00:00:00","endtime":"2024-01-02 00:00:00","delta":15},
            "simlogsetup":{"logfolder":"logs"}
        }"#;
        let config = parse_config(text).unwrap();
        assert_eq!(config.satellite_nodes().next().unwrap().policy(), Policy::ErasureNoRemote);
    }

    #[test]
    fn neighbor_map_overrides_by_string_node_id() {
        let text = r#"{"0": [1, -1, -1, -1], "1": [-1, 0, -1, -1]}"#;
        let map = parse_neighbor_map(text).unwrap();
        assert_eq!(map.get("0"), Some(&[1, -1, -1, -1]));
    }
}
