// src/core/cluster/slot_map.rs

//! The slot → node mapping: a total function from each of the 16 384 slots
//! to an ordered node list, primary first.

use crate::core::ClientError;
use crate::core::cluster::slot::NUM_SLOTS;
use serde::{Deserialize, Serialize};

/// Identifies a node by its `host:port` endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId(pub String);

impl NodeId {
    pub fn new(host: &str, port: u16) -> Self {
        NodeId(format!("{host}:{port}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// One contiguous slot range and the nodes serving it, primary first.
#[derive(Debug, Clone)]
pub struct SlotRange {
    pub start: u16,
    pub end: u16,
    pub nodes: Vec<NodeId>,
}

/// An immutable mapping of every slot to its node list. Constructed once per
/// topology discovery and swapped wholesale on refresh.
#[derive(Debug, Clone)]
pub struct SlotMap {
    ranges: Vec<SlotRange>,
}

impl SlotMap {
    /// Builds the map from discovered ranges, validating that the ranges are
    /// well-formed, non-overlapping, each carry at least one node, and
    /// together cover all 16 384 slots.
    pub fn from_ranges(mut ranges: Vec<SlotRange>) -> Result<Self, ClientError> {
        ranges.sort_by_key(|r| r.start);
        let mut expected_next: u32 = 0;
        for range in &ranges {
            if range.nodes.is_empty() {
                return Err(ClientError::InvalidSocket(format!(
                    "slot range {}-{} has no nodes",
                    range.start, range.end
                )));
            }
            if range.end < range.start || u32::from(range.start) != expected_next {
                return Err(ClientError::InvalidSocket(format!(
                    "slot ranges do not tile the slot space at {}",
                    range.start
                )));
            }
            expected_next = u32::from(range.end) + 1;
        }
        if expected_next != NUM_SLOTS as u32 {
            return Err(ClientError::InvalidSocket(format!(
                "slot coverage ends at {expected_next}, expected {NUM_SLOTS}"
            )));
        }
        Ok(Self { ranges })
    }

    /// The single-node map used in standalone mode: every slot resolves to
    /// `node`.
    pub fn standalone(node: NodeId) -> Self {
        Self {
            ranges: vec![SlotRange {
                start: 0,
                end: (NUM_SLOTS - 1) as u16,
                nodes: vec![node],
            }],
        }
    }

    /// The ordered node list for `slot`, primary first. Total by
    /// construction.
    pub fn nodes_for(&self, slot: u16) -> &[NodeId] {
        let idx = self
            .ranges
            .partition_point(|r| r.end < slot)
            .min(self.ranges.len() - 1);
        &self.ranges[idx].nodes
    }

    /// The primary for `slot`.
    pub fn primary_for(&self, slot: u16) -> &NodeId {
        &self.nodes_for(slot)[0]
    }

    /// The replicas for `slot`; empty when the slot has no replica.
    pub fn replicas_for(&self, slot: u16) -> &[NodeId] {
        &self.nodes_for(slot)[1..]
    }

    pub fn ranges(&self) -> &[SlotRange] {
        &self.ranges
    }
}
