// src/core/cluster/router.rs

//! Key-based routing: given the keys of a command, decides which connection
//! receives it. One capability set with a standalone and a cluster
//! implementation, so callers never branch on deployment shape.

use crate::config::ConnectionConfig;
use crate::core::ClientError;
use crate::core::cluster::slot::common_slot;
use crate::core::cluster::slot_map::NodeId;
use crate::core::cluster::topology::{
    ClusterTopology, DiscoveredTopology, NodeHandle, NodeRole,
};
use crate::core::connection::Connection;
use crate::core::executor::execute;
use crate::core::protocol::command;
use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::RwLock;
use rand::seq::IteratorRandom;
use std::sync::Arc;
use tracing::{debug, info};

/// The routing decision: a node identity and its connection.
#[derive(Debug, Clone)]
pub struct RoutedNode {
    pub id: NodeId,
    pub conn: Connection,
}

impl From<&NodeHandle> for RoutedNode {
    fn from(node: &NodeHandle) -> Self {
        RoutedNode {
            id: node.id.clone(),
            conn: node.conn.clone(),
        }
    }
}

/// The router capability set shared by both deployment shapes.
#[async_trait]
pub trait Route: Send + Sync {
    /// Selects the connection for a command with key list `keys`.
    ///
    /// The wildcard key list `["*"]` marks a cluster-wide command: it goes to
    /// an arbitrary primary when `write` is set, otherwise to an arbitrary
    /// node. Any other key list must hash to a single slot or the routing
    /// fails `CrossSlot`. With `replica` set on a read, a random replica of
    /// the slot is chosen and `READONLY` is issued on it once per connection.
    async fn route(
        &self,
        keys: &[Bytes],
        write: bool,
        replica: bool,
    ) -> Result<RoutedNode, ClientError>;

    /// Every primary, for fan-out of cluster-wide writes.
    fn primaries(&self) -> Vec<RoutedNode>;

    /// Every node, primaries and replicas alike.
    fn nodes(&self) -> Vec<RoutedNode>;

    /// Re-discovers the topology and swaps it in atomically. A no-op for
    /// standalone deployments, whose topology is the seed endpoint itself.
    async fn refresh(&self) -> Result<(), ClientError> {
        Ok(())
    }
}

/// True when `keys` is the cluster-wide wildcard list.
fn is_wildcard(keys: &[Bytes]) -> bool {
    keys.len() == 1 && keys[0].as_ref() == b"*"
}

/// Routing for a standalone deployment: there is exactly one candidate, but
/// tag consistency is still validated so caller code ports to cluster mode
/// unchanged.
pub struct StandaloneRouter {
    node: RoutedNode,
}

impl StandaloneRouter {
    pub fn new(node: RoutedNode) -> Self {
        Self { node }
    }
}

#[async_trait]
impl Route for StandaloneRouter {
    async fn route(
        &self,
        keys: &[Bytes],
        _write: bool,
        _replica: bool,
    ) -> Result<RoutedNode, ClientError> {
        if !is_wildcard(keys) {
            common_slot(keys.iter().map(|k| k.as_ref()))?;
        }
        Ok(self.node.clone())
    }

    fn primaries(&self) -> Vec<RoutedNode> {
        vec![self.node.clone()]
    }

    fn nodes(&self) -> Vec<RoutedNode> {
        vec![self.node.clone()]
    }
}

/// Routing for a cluster. The topology behind the lock is read-mostly; an
/// explicit refresh atomically swaps the whole node map and slot map.
pub struct ClusterRouter {
    config: ConnectionConfig,
    topology: RwLock<Arc<ClusterTopology>>,
}

impl ClusterRouter {
    pub fn new(config: ConnectionConfig, topology: ClusterTopology) -> Self {
        Self {
            config,
            topology: RwLock::new(Arc::new(topology)),
        }
    }

    fn snapshot(&self) -> Arc<ClusterTopology> {
        self.topology.read().clone()
    }

    /// Picks the serving node for `slot`, preferring a random replica when
    /// asked for one on a read.
    fn pick(
        topology: &ClusterTopology,
        slot: u16,
        write: bool,
        replica: bool,
    ) -> Result<(RoutedNode, bool), ClientError> {
        let slot_nodes = topology.slot_map.nodes_for(slot);
        let (id, is_replica_read) = if !write && replica && slot_nodes.len() > 1 {
            let mut rng = rand::thread_rng();
            let chosen = slot_nodes[1..]
                .iter()
                .choose(&mut rng)
                .unwrap_or(&slot_nodes[0]);
            (chosen, true)
        } else {
            (&slot_nodes[0], false)
        };
        let node = topology.nodes.get(id).ok_or_else(|| {
            ClientError::InvalidSocket(format!("slot {slot} maps to unknown node {id}"))
        })?;
        Ok((node.into(), is_replica_read))
    }
}

#[async_trait]
impl Route for ClusterRouter {
    async fn route(
        &self,
        keys: &[Bytes],
        write: bool,
        replica: bool,
    ) -> Result<RoutedNode, ClientError> {
        let topology = self.snapshot();

        if is_wildcard(keys) || keys.is_empty() {
            let mut rng = rand::thread_rng();
            let chosen = topology
                .nodes
                .values()
                .filter(|n| !write || n.role == NodeRole::Primary)
                .choose(&mut rng)
                .ok_or_else(|| {
                    ClientError::InvalidSocket("cluster topology has no nodes".to_string())
                })?;
            return Ok(chosen.into());
        }

        let slot = common_slot(keys.iter().map(|k| k.as_ref()))?
            .ok_or(ClientError::CrossSlot)?;
        let (routed, is_replica_read) = Self::pick(&topology, slot, write, replica)?;

        // A replica serves reads only after READONLY, issued once per
        // connection.
        if is_replica_read && routed.conn.mark_readonly() {
            execute(&routed.conn, command("READONLY", [])).await?;
            debug!(node = %routed.id, "replica switched to READONLY");
        }
        Ok(routed)
    }

    fn primaries(&self) -> Vec<RoutedNode> {
        self.snapshot()
            .nodes
            .values()
            .filter(|n| n.role == NodeRole::Primary)
            .map(Into::into)
            .collect()
    }

    fn nodes(&self) -> Vec<RoutedNode> {
        self.snapshot().nodes.values().map(Into::into).collect()
    }

    /// Re-discovers the topology through any live node and swaps it in.
    async fn refresh(&self) -> Result<(), ClientError> {
        let current = self.snapshot();
        let mut last_err = ClientError::ConnectionClosed;
        for node in current.nodes.values() {
            match current.rediscover(&self.config, &node.conn).await {
                Ok(fresh) => {
                    let old = {
                        let mut guard = self.topology.write();
                        std::mem::replace(&mut *guard, Arc::new(fresh))
                    };
                    old.close_all().await;
                    info!("cluster topology refreshed");
                    return Ok(());
                }
                Err(err) => {
                    debug!(node = %node.id, error = %err, "topology refresh attempt failed");
                    last_err = err;
                }
            }
        }
        Err(last_err)
    }
}

/// Wraps the discovery result in the matching router implementation.
pub fn router_for(
    config: &ConnectionConfig,
    discovered: DiscoveredTopology,
) -> Arc<dyn Route> {
    match discovered {
        DiscoveredTopology::Standalone(node) => {
            Arc::new(StandaloneRouter::new(RoutedNode::from(&node)))
        }
        DiscoveredTopology::Cluster(topology) => {
            Arc::new(ClusterRouter::new(config.clone(), topology))
        }
    }
}
