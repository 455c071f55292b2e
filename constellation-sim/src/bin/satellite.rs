//! One satellite cache node process (C4).
//!
//! Registers its ephemeral listening port with the orchestrator, then
//! accepts `CONF`, a long-lived `REQS` epoch channel, a long-lived
//! `ISL` channel serving its neighbors' `CHK `/`PREF` probes, `GET `
//! observable reads, and `KILL`.

use std::collections::HashMap;
use std::fs::File;
use std::net::{TcpListener, TcpStream};
use std::sync::{Arc, Mutex};
use std::thread;

use anyhow::{Context, Result};
use clap::Parser;
use serde::{Deserialize, Serialize};

use orbitcache::node::{NodeConfig, SatelliteNode};
use orbitcache::policy::{NeighborOracle, Policy};
use orbitcache::protocol::{self, ACK, CHK, CONF, GET, ISL, KILL, PREF, REGR, REQ, REQS};
use orbitcache::recommender::{pull_prefetch, GroundStation};
use orbitcache::topology::{Endpoint, Topology, NO_NEIGHBOR};

/// Fraction of a node's cache capacity offered as a prefetch-uplink
/// byte budget each epoch (§4.5's per-pull budget is not spelled out
/// numerically in the distilled spec; a quarter of local capacity
/// keeps uplink traffic bounded relative to the cache it feeds).
const PREFETCH_BUDGET_DIVISOR: u64 = 4;

#[derive(Parser, Debug)]
#[command(about = "One satellite cache node process")]
struct Args {
    #[arg(long)]
    node_id: i64,
    #[arg(long, default_value = "127.0.0.1:0")]
    listen: String,
    #[arg(long)]
    orchestrator: String,
    #[arg(long)]
    trace: String,
}

#[derive(Debug, Deserialize)]
struct EndpointDto {
    host: String,
    port: u16,
}

#[derive(Debug, Deserialize)]
struct ConfPayload {
    cache_capacity: u64,
    policy: Policy,
    epoch_offset: i64,
    /// This node's own `[N, S, E, W]` neighbor ids.
    neighbors: [i64; 4],
    /// Every node's neighbor slots, keyed by node id as a string.
    topology: HashMap<String, [i64; 4]>,
    /// Every registered node's listening endpoint, keyed by node id.
    endpoints: HashMap<String, EndpointDto>,
}

#[derive(Debug, Serialize)]
struct RegisterPayload {
    port: u16,
    server_id: i64,
}

#[derive(Debug, Deserialize)]
struct ReqPayload {
    time: i64,
}

#[derive(Debug, Serialize, Deserialize)]
struct PrefPayload {
    user: String,
    time: i64,
    data: Vec<(String, u64, u64)>,
}

/// Identifies the synthetic ground-station uplink user in `[Requests
/// Records]`-style bookkeeping — this node has no separate
/// ground-station process to attribute pulls to (§4.5, known
/// simplification: see DESIGN.md).
const GROUND_STATION_USER: &str = "ground_station";

/// Persistent outbound sockets to this node's four ISL neighbors,
/// opened once at `CONF` per §5's resource discipline.
struct NeighborSockets {
    streams: [Option<Mutex<TcpStream>>; 4],
}

impl NeighborOracle for NeighborSockets {
    fn check(&mut self, slot: usize, id: &str) -> bool {
        let Some(stream) = &self.streams[slot] else {
            return false;
        };
        let mut stream = match stream.lock() {
            Ok(guard) => guard,
            Err(_) => return false,
        };
        if protocol::write_frame(&mut *stream, CHK, id.as_bytes()).is_err() {
            return false;
        }
        matches!(protocol::read_frame(&mut *stream), Ok((_, payload)) if payload == b"FOUND")
    }
}

type Node = SatelliteNode<File>;

struct Shared {
    node: Mutex<Option<Node>>,
    oracle: Mutex<Option<NeighborSockets>>,
    /// This node's closest ground station, standing in for a dedicated
    /// ground-station process (§4.5, known simplification: see
    /// DESIGN.md). Seeded from the traffic this satellite itself
    /// observes, since there is no separate ground-station trace feed.
    ground_station: Mutex<Option<GroundStation>>,
    /// Loopback `ISL`-style channel this node pulls its own prefetch
    /// pushes through, exercising the same `PREF` wire path a real
    /// ground-station uplink would use.
    ground_uplink: Mutex<Option<TcpStream>>,
    trace_path: String,
    node_id: i64,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt::init();
    let args = Args::parse();

    let listener = TcpListener::bind(&args.listen).context("binding satellite listener")?;
    let local_port = listener.local_addr()?.port();

    let mut registration =
        TcpStream::connect(&args.orchestrator).context("connecting to orchestrator to register")?;
    let payload = serde_json::to_vec(&RegisterPayload { port: local_port, server_id: args.node_id })?;
    protocol::write_frame(&mut registration, REGR, &payload)?;

    let shared = Arc::new(Shared {
        node: Mutex::new(None),
        oracle: Mutex::new(None),
        ground_station: Mutex::new(None),
        ground_uplink: Mutex::new(None),
        trace_path: args.trace.clone(),
        node_id: args.node_id,
    });

    tracing::info!(node_id = args.node_id, port = local_port, "satellite listening");

    for incoming in listener.incoming() {
        let stream = incoming.context("accepting connection")?;
        let shared = Arc::clone(&shared);
        thread::spawn(move || {
            if let Err(err) = handle_connection(stream, &shared) {
                tracing::error!(error = %err, "connection handler failed");
            }
        });
    }
    Ok(())
}

fn handle_connection(mut stream: TcpStream, shared: &Shared) -> Result<()> {
    loop {
        let (verb, payload) = match protocol::read_frame(&mut stream) {
            Ok(frame) => frame,
            Err(_) => return Ok(()), // peer closed the connection
        };
        match verb {
            CONF => handle_conf(&mut stream, shared, &payload)?,
            REQS => handle_epoch_channel(&mut stream, shared)?,
            ISL => handle_isl_channel(&mut stream, shared)?,
            GET => handle_get(&mut stream, shared, &payload)?,
            KILL => {
                tracing::info!(node_id = shared.node_id, "received KILL, shutting down");
                std::process::exit(0);
            }
            other => {
                tracing::warn!(verb = ?other, "unrecognized verb on satellite connection");
                break;
            }
        }
    }
    Ok(())
}

fn handle_conf(stream: &mut TcpStream, shared: &Shared, payload: &[u8]) -> Result<()> {
    let conf: ConfPayload = serde_json::from_slice(payload).context("parsing CONF payload")?;

    let mut topology = Topology::new();
    for (id_str, slots) in &conf.topology {
        if let Ok(id) = id_str.parse::<i64>() {
            topology.set_neighbors(id, *slots);
        }
    }
    topology.set_neighbors(shared.node_id, conf.neighbors);
    for (id_str, endpoint) in &conf.endpoints {
        if let Ok(id) = id_str.parse::<i64>() {
            topology.set_endpoint(id, Endpoint { host: endpoint.host.clone(), port: endpoint.port });
        }
    }

    let file = File::open(&shared.trace_path).context("opening trace file")?;
    let node_config = NodeConfig {
        node_id: shared.node_id,
        cache_capacity: conf.cache_capacity,
        policy: conf.policy,
        epoch_offset: conf.epoch_offset,
    };
    *shared.node.lock().unwrap() = Some(SatelliteNode::new(node_config, file, topology.clone()));
    *shared.oracle.lock().unwrap() = Some(dial_neighbors(&conf.neighbors, &topology));
    *shared.ground_station.lock().unwrap() =
        Some(GroundStation::new(shared.node_id, 0.0, 0.0, conf.cache_capacity));
    *shared.ground_uplink.lock().unwrap() = dial_ground_uplink(shared.node_id, &topology);

    protocol::write_frame(stream, ACK, b"")?;
    Ok(())
}

/// Opens this node's own `ISL` loopback channel, used to push prefetch
/// pulls to itself via `PREF` the same way a real ground-station
/// uplink would (§4.5). Returns `None` if this node's own endpoint
/// isn't in the topology yet (registration lagging `CONF`).
fn dial_ground_uplink(self_id: i64, topology: &Topology) -> Option<TcpStream> {
    let endpoint = topology.endpoint(self_id)?;
    let mut stream = TcpStream::connect((endpoint.host.as_str(), endpoint.port))
        .map_err(|err| tracing::warn!(error = %err, "failed to dial ground-station uplink"))
        .ok()?;
    let handshake_ok = protocol::write_frame(&mut stream, ISL, b"").is_ok()
        && protocol::read_frame(&mut stream).is_ok();
    handshake_ok.then_some(stream)
}

/// Opens one persistent `ISL` socket per non-`-1` neighbor slot.
fn dial_neighbors(neighbors: &[i64; 4], topology: &Topology) -> NeighborSockets {
    let mut streams: [Option<Mutex<TcpStream>>; 4] = [None, None, None, None];
    for (slot, &neighbor_id) in neighbors.iter().enumerate() {
        if neighbor_id == NO_NEIGHBOR {
            continue;
        }
        let Some(endpoint) = topology.endpoint(neighbor_id) else {
            tracing::debug!(neighbor_id, "no known endpoint for neighbor yet");
            continue;
        };
        match TcpStream::connect((endpoint.host.as_str(), endpoint.port)) {
            Ok(mut stream) => {
                // The peer's handle_isl_channel sends one ACK as soon as it
                // sees ISL, before it starts looping on CHK/PREF; consume
                // it here so later CHK round-trips don't read it instead.
                let handshake_ok = protocol::write_frame(&mut stream, ISL, b"").is_ok()
                    && protocol::read_frame(&mut stream).is_ok();
                if handshake_ok {
                    streams[slot] = Some(Mutex::new(stream));
                }
            }
            Err(err) => tracing::warn!(neighbor_id, error = %err, "failed to dial ISL neighbor"),
        }
    }
    NeighborSockets { streams }
}

fn handle_epoch_channel(stream: &mut TcpStream, shared: &Shared) -> Result<()> {
    protocol::write_frame(stream, ACK, b"")?;
    loop {
        let (verb, payload) = protocol::read_frame(stream)?;
        if verb != REQ {
            break;
        }
        let req: ReqPayload = serde_json::from_slice(&payload).context("parsing REQ payload")?;

        let mut node_guard = shared.node.lock().unwrap();
        let mut oracle_guard = shared.oracle.lock().unwrap();
        let (Some(node), Some(oracle)) = (node_guard.as_mut(), oracle_guard.as_mut()) else {
            protocol::write_frame(stream, ACK, b"not configured")?;
            continue;
        };

        let counters = node.handle_epoch(req.time, oracle)?;
        tracing::info!(
            node_id = shared.node_id,
            time = req.time,
            total_obj = counters.total_obj,
            total_byte = counters.total_byte,
            hit_obj = counters.hit_obj,
            hit_byte = counters.hit_byte,
            hit_obj_neigh = counters.hit_obj_by_neigh,
            hit_byte_neigh = counters.hit_byte_by_neigh,
            "[Data]"
        );

        let prefetch_payload = build_prefetch_plan(shared, node, oracle, req.time, &counters.requested);
        drop(oracle_guard);
        drop(node_guard);

        if let Some(payload) = prefetch_payload {
            push_prefetch(shared, payload)?;
        }

        protocol::write_frame(stream, ACK, b"")?;
    }
    Ok(())
}

/// Between-epoch prefetch pull (§2, §4.5): feeds this epoch's observed
/// traffic into this node's ground-station stand-in, then pulls a
/// plan against the local cache and four ISL neighbors. Returns the
/// `PREF` payload to push, if anything was admitted.
///
/// Takes `node`/`oracle` already locked by the caller and does no
/// socket I/O itself, so the caller can release those locks before
/// [`push_prefetch`] blocks on the uplink round trip — this node's own
/// `ISL` handler needs the same `node` lock to service that `PREF`.
fn build_prefetch_plan(
    shared: &Shared,
    node: &Node,
    oracle: &mut NeighborSockets,
    time: i64,
    requested: &[(String, u64)],
) -> Option<PrefPayload> {
    let mut ground_station_guard = shared.ground_station.lock().unwrap();
    let ground_station = ground_station_guard.as_mut()?;
    for (id, size) in requested {
        ground_station.observe(id, *size);
    }

    let candidates = ground_station.get_most_accessed_items();
    let budget = node.cache().capacity() / PREFETCH_BUDGET_DIVISOR;
    let plan = pull_prefetch(&candidates, |id| node.check_membership(id), oracle, budget, true);
    if plan.admitted.is_empty() {
        return None;
    }
    Some(PrefPayload {
        user: GROUND_STATION_USER.to_string(),
        time,
        data: plan.admitted.into_iter().map(|(id, size)| (id, size, 1)).collect(),
    })
}

/// Pushes a prefetch plan to this node's own `ISL` loopback channel,
/// the same `PREF` wire path a real ground-station uplink would use.
fn push_prefetch(shared: &Shared, payload: PrefPayload) -> Result<()> {
    let Some(mut uplink) = shared.ground_uplink.lock().unwrap().take() else {
        return Ok(());
    };
    let sent = protocol::write_frame(&mut uplink, PREF, &serde_json::to_vec(&payload)?).is_ok()
        && protocol::read_frame(&mut uplink).is_ok();
    if sent {
        *shared.ground_uplink.lock().unwrap() = Some(uplink);
    } else {
        tracing::warn!(node_id = shared.node_id, "ground-station uplink dropped, not retrying");
    }
    Ok(())
}

fn handle_isl_channel(stream: &mut TcpStream, shared: &Shared) -> Result<()> {
    protocol::write_frame(stream, ACK, b"")?;
    loop {
        let (verb, payload) = protocol::read_frame(stream)?;
        match verb {
            CHK => {
                let id = String::from_utf8_lossy(&payload);
                let node_guard = shared.node.lock().unwrap();
                let found = node_guard.as_ref().is_some_and(|n| n.check_membership(&id));
                let response: &[u8] = if found { b"FOUND" } else { b"NOT_FOUND" };
                protocol::write_frame(stream, ACK, response)?;
            }
            PREF => {
                let pref: PrefPayload = serde_json::from_slice(&payload).context("parsing PREF payload")?;
                if let Some(node) = shared.node.lock().unwrap().as_mut() {
                    let accepted = node.receive_prefetch(&pref.user, pref.time, &pref.data);
                    tracing::info!(node_id = shared.node_id, user = %pref.user, accepted, total = pref.data.len(), "prefetch received");
                }
                protocol::write_frame(stream, ACK, b"")?;
            }
            _ => break,
        }
    }
    Ok(())
}

fn handle_get(stream: &mut TcpStream, shared: &Shared, payload: &[u8]) -> Result<()> {
    let key = String::from_utf8_lossy(payload);
    let node_guard = shared.node.lock().unwrap();
    let value = node_guard
        .as_ref()
        .map(|n| match key.as_ref() {
            "cache_capacity" => n.cache().capacity().to_string(),
            "cache_size" => n.cache().byte_size().to_string(),
            other_key => n.cache().contains(other_key).to_string(),
        })
        .unwrap_or_default();
    protocol::write_frame(stream, ACK, value.as_bytes())?;
    Ok(())
}
