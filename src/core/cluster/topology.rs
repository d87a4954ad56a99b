// src/core/cluster/topology.rs

//! Topology discovery: decides whether the remote is a standalone instance
//! or a cluster, opens a connection per node, and builds the slot map.
//!
//! Discovery runs once on connect and again on explicit refresh; in between,
//! the node map and slot map are read-only.

use crate::config::ConnectionConfig;
use crate::core::ClientError;
use crate::core::cluster::slot_map::{NodeId, SlotMap, SlotRange};
use crate::core::connection::Connection;
use crate::core::executor::execute;
use crate::core::protocol::{RespValue, command};
use bytes::Bytes;
use std::collections::HashMap;
use tracing::{debug, info};

/// Role of a node for the slot ranges it serves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeRole {
    Primary,
    Replica,
}

/// One cluster node: its connection and its role.
#[derive(Debug, Clone)]
pub struct NodeHandle {
    pub id: NodeId,
    pub conn: Connection,
    pub role: NodeRole,
}

/// The full picture of a cluster: every node plus the slot mapping.
#[derive(Debug)]
pub struct ClusterTopology {
    pub nodes: HashMap<NodeId, NodeHandle>,
    pub slot_map: SlotMap,
}

/// What discovery found at the seed endpoint.
#[derive(Debug)]
pub enum DiscoveredTopology {
    Standalone(NodeHandle),
    Cluster(ClusterTopology),
}

/// Connects to the seed endpoint and discovers the deployment shape.
///
/// `INFO CLUSTER` decides standalone versus cluster; in cluster mode,
/// `CLUSTER SLOTS` supplies the per-range node lists and a connection is
/// opened to every distinct node (database 0, seed credentials and TLS).
pub async fn discover(config: &ConnectionConfig) -> Result<DiscoveredTopology, ClientError> {
    let seed = Connection::open(config.clone()).await?;
    let info = execute(&seed, command("INFO", [Bytes::from_static(b"cluster")]))
        .await?
        .into_string()?
        .unwrap_or_default();

    if !cluster_enabled(&info) {
        debug!(node = %seed.addr(), "standalone deployment detected");
        let id = NodeId(seed.addr());
        return Ok(DiscoveredTopology::Standalone(NodeHandle {
            id,
            conn: seed,
            role: NodeRole::Primary,
        }));
    }

    let slots_reply = execute(&seed, command("CLUSTER", [Bytes::from_static(b"SLOTS")])).await?;
    let parsed = parse_cluster_slots(&slots_reply)?;
    let topology = build_cluster(config, parsed).await?;
    info!(
        nodes = topology.nodes.len(),
        ranges = topology.slot_map.ranges().len(),
        "cluster topology discovered"
    );
    seed.close().await;
    Ok(DiscoveredTopology::Cluster(topology))
}

/// Scans an `INFO cluster` section for `cluster_enabled:1`.
pub fn cluster_enabled(info: &str) -> bool {
    for line in info.lines() {
        if let Some(val) = line.strip_prefix("cluster_enabled:") {
            return val.trim() == "1";
        }
    }
    false
}

/// One `CLUSTER SLOTS` entry, decoded but not yet connected: the slot range
/// plus `(host, port)` per node, primary first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedSlotRange {
    pub start: u16,
    pub end: u16,
    pub endpoints: Vec<(String, u16)>,
}

/// Decodes a `CLUSTER SLOTS` reply. Each entry is
/// `[start, end, [primary host, port, id], [replica host, port, id]…]`.
pub fn parse_cluster_slots(reply: &RespValue) -> Result<Vec<ParsedSlotRange>, ClientError> {
    let RespValue::Array(entries) = reply else {
        return Err(ClientError::UnexpectedReply(format!(
            "CLUSTER SLOTS returned {reply:?}"
        )));
    };

    let mut ranges = Vec::with_capacity(entries.len());
    for entry in entries {
        let RespValue::Array(fields) = entry else {
            return Err(ClientError::UnexpectedReply(
                "CLUSTER SLOTS entry is not an array".to_string(),
            ));
        };
        if fields.len() < 3 {
            return Err(ClientError::UnexpectedReply(
                "CLUSTER SLOTS entry has fewer than three fields".to_string(),
            ));
        }
        let start = slot_bound(&fields[0])?;
        let end = slot_bound(&fields[1])?;
        let mut endpoints = Vec::with_capacity(fields.len() - 2);
        for node in &fields[2..] {
            endpoints.push(node_endpoint(node)?);
        }
        ranges.push(ParsedSlotRange {
            start,
            end,
            endpoints,
        });
    }
    Ok(ranges)
}

fn slot_bound(value: &RespValue) -> Result<u16, ClientError> {
    let raw = value.as_int()?;
    u16::try_from(raw)
        .map_err(|_| ClientError::UnexpectedReply(format!("slot bound {raw} out of range")))
}

fn node_endpoint(value: &RespValue) -> Result<(String, u16), ClientError> {
    let RespValue::Array(parts) = value else {
        return Err(ClientError::UnexpectedReply(
            "CLUSTER SLOTS node entry is not an array".to_string(),
        ));
    };
    if parts.len() < 2 {
        return Err(ClientError::UnexpectedReply(
            "CLUSTER SLOTS node entry has no host/port".to_string(),
        ));
    }
    let host = match &parts[0] {
        RespValue::BulkString(b) => String::from_utf8_lossy(b).to_string(),
        other => {
            return Err(ClientError::UnexpectedReply(format!(
                "node host is {other:?}"
            )));
        }
    };
    let port = u16::try_from(parts[1].as_int()?)
        .map_err(|_| ClientError::UnexpectedReply("node port out of range".to_string()))?;
    Ok((host, port))
}

/// Opens a connection per distinct endpoint and assembles the topology.
/// A node listed as primary for any range is a primary; every other node is
/// a replica.
async fn build_cluster(
    config: &ConnectionConfig,
    parsed: Vec<ParsedSlotRange>,
) -> Result<ClusterTopology, ClientError> {
    let mut roles: HashMap<NodeId, NodeRole> = HashMap::new();
    let mut addrs: HashMap<NodeId, (String, u16)> = HashMap::new();
    let mut ranges = Vec::with_capacity(parsed.len());

    for range in &parsed {
        let mut nodes = Vec::with_capacity(range.endpoints.len());
        for (pos, (host, port)) in range.endpoints.iter().enumerate() {
            let id = NodeId::new(host, *port);
            let role = if pos == 0 {
                NodeRole::Primary
            } else {
                NodeRole::Replica
            };
            let entry = roles.entry(id.clone()).or_insert(role);
            if role == NodeRole::Primary {
                *entry = NodeRole::Primary;
            }
            addrs.insert(id.clone(), (host.clone(), *port));
            nodes.push(id);
        }
        ranges.push(SlotRange {
            start: range.start,
            end: range.end,
            nodes,
        });
    }

    let slot_map = SlotMap::from_ranges(ranges)?;

    let mut nodes = HashMap::with_capacity(addrs.len());
    for (id, (host, port)) in addrs {
        let role = roles.get(&id).copied().unwrap_or(NodeRole::Replica);
        let conn = Connection::open(config.for_node(&host, port)).await?;
        debug!(node = %id, role = ?role, "cluster node connected");
        nodes.insert(
            id.clone(),
            NodeHandle {
                id: id.clone(),
                conn,
                role,
            },
        );
    }

    Ok(ClusterTopology {
        nodes,
        slot_map,
    })
}

impl ClusterTopology {
    /// Re-discovers the topology through `via` and returns the replacement.
    /// The caller swaps it in atomically and closes the old connections.
    pub async fn rediscover(
        &self,
        config: &ConnectionConfig,
        via: &Connection,
    ) -> Result<ClusterTopology, ClientError> {
        let reply = execute(via, command("CLUSTER", [Bytes::from_static(b"SLOTS")])).await?;
        let parsed = parse_cluster_slots(&reply)?;
        build_cluster(config, parsed).await
    }

    /// Closes every node connection. Used after a refresh swap.
    pub async fn close_all(&self) {
        for node in self.nodes.values() {
            node.conn.close().await;
        }
    }
}
