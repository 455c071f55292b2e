//! Orchestrator (C7): boots one satellite process per node, exchanges
//! the topology map, then drives the global clock epoch by epoch
//! through a bounded worker pool — the only global synchronization
//! point in the system (§5 "Ordering guarantees").

use std::collections::HashMap;
use std::fs;
use std::net::{TcpListener, TcpStream};
use std::process::{Child, Command};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use anyhow::{bail, Context, Result};
use clap::Parser;
use serde::{Deserialize, Serialize};

use constellation_sim::config;
use orbitcache::protocol::{self, CONF, KILL, REQ};

/// Default fixed-size worker pool used to fan out epoch ticks, per
/// §4.7 step 5.
const DEFAULT_POOL_SIZE: usize = 30;

/// Timeout for collecting every satellite's `REGR`, per §6's CLI
/// surface ("non-zero if a satellite fails to register within a
/// 10-second timeout").
const REGISTRATION_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Parser, Debug)]
#[command(about = "Drives a satellite constellation cache emulation run")]
struct Args {
    config: String,
    #[allow(dead_code)] // orbit/FOV geometry is out of scope (§1 Non-goals); kept for CLI compatibility
    fov_dir: String,
    log_dir: String,
    cache_size: u64,
    neighbor_map: String,
}

#[derive(Debug, Clone, Serialize)]
struct EndpointDto {
    host: String,
    port: u16,
}

#[derive(Debug, Serialize)]
struct ConfPayload {
    cache_capacity: u64,
    policy: orbitcache::policy::Policy,
    epoch_offset: i64,
    neighbors: [i64; 4],
    topology: HashMap<String, [i64; 4]>,
    endpoints: HashMap<String, EndpointDto>,
}

#[derive(Debug, Deserialize)]
struct RegisterPayload {
    port: u16,
    server_id: i64,
}

struct RegisteredSatellite {
    node_id: i64,
    host: String,
    port: u16,
    neighbors: [i64; 4],
    policy: orbitcache::policy::Policy,
    _process: Child,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt::init();
    let args = Args::parse();

    let config_text = fs::read_to_string(&args.config).context("reading emulation config")?;
    let config = config::parse_config(&config_text).context("parsing emulation config")?;
    let neighbor_map_text = fs::read_to_string(&args.neighbor_map).context("reading neighbor map")?;
    let neighbor_map = config::parse_neighbor_map(&neighbor_map_text).context("parsing neighbor map")?;

    fs::create_dir_all(&args.log_dir).ok();

    let listener = TcpListener::bind("127.0.0.1:0").context("binding registration listener")?;
    let registration_addr = listener.local_addr()?;

    let satellite_binary = sibling_binary_path("satellite")?;
    let node_specs: Vec<_> = config.satellite_nodes().cloned().collect();
    let mut children = Vec::new();
    for node in &node_specs {
        let neighbors = neighbor_map
            .get(&node.nodeid.to_string())
            .copied()
            .or_else(|| node.models.first().map(|m| m.neighbors))
            .unwrap_or([-1, -1, -1, -1]);

        let child = Command::new(&satellite_binary)
            .arg("--node-id")
            .arg(node.nodeid.to_string())
            .arg("--orchestrator")
            .arg(registration_addr.to_string())
            .arg("--trace")
            .arg(&node.trace)
            .spawn()
            .with_context(|| format!("spawning satellite process for node {}", node.nodeid))?;
        children.push((node.nodeid, neighbors, node.policy(), child));
    }

    let registered = collect_registrations(&listener, children)?;
    tracing::info!(count = registered.len(), "all satellites registered");

    let topology: HashMap<String, [i64; 4]> =
        registered.iter().map(|s| (s.node_id.to_string(), s.neighbors)).collect();
    let endpoints: HashMap<String, EndpointDto> = registered
        .iter()
        .map(|s| (s.node_id.to_string(), EndpointDto { host: s.host.clone(), port: s.port }))
        .collect();

    let mut req_streams = HashMap::new();
    for sat in &registered {
        let mut conf_stream = TcpStream::connect((sat.host.as_str(), sat.port))
            .with_context(|| format!("connecting to satellite {} for CONF", sat.node_id))?;
        let payload = ConfPayload {
            cache_capacity: args.cache_size,
            policy: sat.policy,
            epoch_offset: 0,
            neighbors: sat.neighbors,
            topology: topology.clone(),
            endpoints: endpoints.clone(),
        };
        protocol::write_frame(&mut conf_stream, CONF, &serde_json::to_vec(&payload)?)?;
        let (_, _ack) = protocol::read_frame(&mut conf_stream)?;

        let mut req_stream = TcpStream::connect((sat.host.as_str(), sat.port))
            .with_context(|| format!("opening REQS channel to satellite {}", sat.node_id))?;
        protocol::write_frame(&mut req_stream, orbitcache::protocol::REQS, b"")?;
        let (_, _ack) = protocol::read_frame(&mut req_stream)?;
        req_streams.insert(sat.node_id, Mutex::new(req_stream));
    }

    let req_streams = Arc::new(req_streams);
    let start = 0i64;
    let end = start + 15 * 4 * 60 * 24 * 5;
    let node_ids: Vec<i64> = registered.iter().map(|s| s.node_id).collect();

    let mut t = start;
    while t < end {
        run_epoch_barrier(&req_streams, &node_ids, t, DEFAULT_POOL_SIZE)?;
        t += 15;
    }

    for sat in &registered {
        if let Ok(mut stream) = TcpStream::connect((sat.host.as_str(), sat.port)) {
            let _ = protocol::write_frame(&mut stream, KILL, b"");
        }
    }

    Ok(())
}

/// Submits `REQ t` to every satellite in `node_ids`, bounded to
/// `pool_size` concurrent in-flight requests at a time, and blocks
/// until every one has ACKed — the epoch barrier.
fn run_epoch_barrier(
    req_streams: &HashMap<i64, Mutex<TcpStream>>,
    node_ids: &[i64],
    t: i64,
    pool_size: usize,
) -> Result<()> {
    for chunk in node_ids.chunks(pool_size.max(1)) {
        std::thread::scope(|scope| -> Result<()> {
            let mut handles = Vec::new();
            for &node_id in chunk {
                let stream_lock = &req_streams[&node_id];
                handles.push(scope.spawn(move || -> Result<()> {
                    let mut stream = stream_lock.lock().unwrap();
                    let payload = serde_json::to_vec(&serde_json::json!({ "time": t }))?;
                    protocol::write_frame(&mut *stream, REQ, &payload)?;
                    protocol::read_frame(&mut *stream)?;
                    Ok(())
                }));
            }
            for handle in handles {
                handle.join().expect("epoch worker thread panicked")?;
            }
            Ok(())
        })?;
    }
    Ok(())
}

/// Accepts exactly `children.len()` `REGR` connections, failing with
/// an error (and thus a non-zero exit) if the deadline passes first.
fn collect_registrations(
    listener: &TcpListener,
    children: Vec<(i64, [i64; 4], orbitcache::policy::Policy, Child)>,
) -> Result<Vec<RegisteredSatellite>> {
    let expected = children.len();
    let mut pending: HashMap<i64, ([i64; 4], orbitcache::policy::Policy, Child)> =
        children.into_iter().map(|(id, n, policy, child)| (id, (n, policy, child))).collect();
    let mut registered = Vec::new();
    let deadline = Instant::now() + REGISTRATION_TIMEOUT;

    listener.set_nonblocking(true)?;
    while registered.len() < expected {
        if Instant::now() > deadline {
            bail!(
                "{} of {} satellites failed to register within {:?}",
                expected - registered.len(),
                expected,
                REGISTRATION_TIMEOUT
            );
        }
        match listener.accept() {
            Ok((mut stream, addr)) => {
                stream.set_nonblocking(false)?;
                let (_, payload) = protocol::read_frame(&mut stream)?;
                let reg: RegisterPayload = serde_json::from_slice(&payload)?;
                if let Some((neighbors, policy, child)) = pending.remove(&reg.server_id) {
                    registered.push(RegisteredSatellite {
                        node_id: reg.server_id,
                        host: addr.ip().to_string(),
                        port: reg.port,
                        neighbors,
                        policy,
                        _process: child,
                    });
                }
            }
            Err(ref err) if err.kind() == std::io::ErrorKind::WouldBlock => {
                std::thread::sleep(Duration::from_millis(20));
            }
            Err(err) => return Err(err).context("accepting satellite registration"),
        }
    }
    Ok(registered)
}

fn sibling_binary_path(name: &str) -> Result<std::path::PathBuf> {
    let exe = std::env::current_exe().context("resolving current executable path")?;
    let dir = exe.parent().context("executable has no parent directory")?;
    Ok(dir.join(name))
}
